// src/matrix.rs

use crate::error::{PcaError, Result};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// A numeric sample-by-variable matrix with an explicit presence mask.
///
/// NaN is accepted only at construction and turned into a masked cell; the
/// stored value behind a masked cell is always `0.0`, so arithmetic that
/// forgets the mask cannot produce NaN. Infinite values are rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct DataMatrix {
    values: Array2<f64>,
    present: Array2<bool>,
}

/// Where the missing cells of a matrix are.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MissingValueInfo {
    /// Missing cell count per column.
    pub column_counts: Vec<usize>,
    /// Sorted indices of rows holding at least one missing cell.
    pub affected_rows: Vec<usize>,
    pub total_missing: usize,
}

impl MissingValueInfo {
    pub fn has_missing(&self) -> bool {
        self.total_missing > 0
    }
}

impl DataMatrix {
    /// Builds a matrix from row vectors, treating NaN as missing.
    ///
    /// # Errors
    /// Returns [`PcaError::Data`] for an empty matrix, rows of unequal length,
    /// or an infinite value.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, Vec::len);
        if n_rows == 0 || n_cols == 0 {
            return Err(PcaError::data("empty data matrix"));
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_cols) {
            return Err(PcaError::data(format!(
                "ragged data matrix: row {} has {} columns, expected {}",
                i,
                row.len(),
                n_cols
            )));
        }
        let flat: Vec<f64> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        let values = Array2::from_shape_vec((n_rows, n_cols), flat)
            .map_err(|e| PcaError::data(format!("cannot shape data matrix: {}", e)))?;
        Self::from_array(values)
    }

    /// Builds a matrix from an ndarray, treating NaN as missing.
    pub fn from_array(mut values: Array2<f64>) -> Result<Self> {
        if values.nrows() == 0 || values.ncols() == 0 {
            return Err(PcaError::data("empty data matrix"));
        }
        let present = values.mapv(|v| !v.is_nan());
        for ((i, j), v) in values.indexed_iter_mut() {
            if v.is_nan() {
                *v = 0.0;
            } else if v.is_infinite() {
                return Err(PcaError::data(format!(
                    "infinite value at row {}, column {}",
                    i, j
                )));
            }
        }
        Ok(Self { values, present })
    }

    /// Builds a matrix from values plus a mask supplied by an I/O layer.
    ///
    /// Values under `false` mask cells are ignored.
    pub fn with_mask(mut values: Array2<f64>, present: Array2<bool>) -> Result<Self> {
        if values.dim() != present.dim() {
            return Err(PcaError::data(format!(
                "mask shape {:?} does not match data shape {:?}",
                present.dim(),
                values.dim()
            )));
        }
        // masked cells become NaN so the finiteness check never sees them
        ndarray::Zip::from(&mut values)
            .and(&present)
            .for_each(|v, &keep| {
                if !keep {
                    *v = f64::NAN;
                }
            });
        Self::from_array(values)
    }

    /// Internal constructor for matrices whose invariants already hold.
    pub(crate) fn from_parts(values: Array2<f64>, present: Array2<bool>) -> Self {
        debug_assert_eq!(values.dim(), present.dim());
        Self { values, present }
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// Stored values; masked cells read as `0.0`.
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn mask(&self) -> &Array2<bool> {
        &self.present
    }

    pub(crate) fn into_parts(self) -> (Array2<f64>, Array2<bool>) {
        (self.values, self.present)
    }

    pub fn is_present(&self, row: usize, col: usize) -> bool {
        self.present[[row, col]]
    }

    pub fn has_missing(&self) -> bool {
        self.present.iter().any(|p| !p)
    }

    /// Row vectors with NaN restored for missing cells.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.values
            .outer_iter()
            .zip(self.present.outer_iter())
            .map(|(vals, mask)| {
                vals.iter()
                    .zip(mask.iter())
                    .map(|(&v, &p)| if p { v } else { f64::NAN })
                    .collect()
            })
            .collect()
    }

    pub fn missing_info(&self) -> MissingValueInfo {
        let column_counts: Vec<usize> = self
            .present
            .axis_iter(Axis(1))
            .map(|col| col.iter().filter(|p| !**p).count())
            .collect();
        let affected_rows: Vec<usize> = self
            .present
            .axis_iter(Axis(0))
            .enumerate()
            .filter(|(_, row)| row.iter().any(|p| !p))
            .map(|(i, _)| i)
            .collect();
        let total_missing = column_counts.iter().sum();
        MissingValueInfo {
            column_counts,
            affected_rows,
            total_missing,
        }
    }

    /// Sub-matrix of the given rows and columns, in the given order.
    pub fn select(&self, rows: &[usize], cols: &[usize]) -> DataMatrix {
        let values = self.values.select(Axis(0), rows).select(Axis(1), cols);
        let present = self.present.select(Axis(0), rows).select(Axis(1), cols);
        DataMatrix { values, present }
    }

    /// Removes the listed rows and columns.
    ///
    /// Returns the reduced matrix together with the retained row and column
    /// indices into `self`.
    ///
    /// # Errors
    /// Returns [`PcaError::Validation`] for an out-of-range index and
    /// [`PcaError::Data`] if nothing would remain.
    pub fn exclude(
        &self,
        excluded_rows: &[usize],
        excluded_cols: &[usize],
    ) -> Result<(DataMatrix, Vec<usize>, Vec<usize>)> {
        let keep_rows = retained_indices(self.nrows(), excluded_rows, "excluded rows")?;
        let keep_cols = retained_indices(self.ncols(), excluded_cols, "excluded columns")?;
        if keep_rows.is_empty() {
            return Err(PcaError::data("all rows were excluded"));
        }
        if keep_cols.is_empty() {
            return Err(PcaError::data("all columns were excluded"));
        }
        let reduced = self.select(&keep_rows, &keep_cols);
        Ok((reduced, keep_rows, keep_cols))
    }
}

fn retained_indices(len: usize, excluded: &[usize], parameter: &str) -> Result<Vec<usize>> {
    let mut drop = vec![false; len];
    for &idx in excluded {
        if idx >= len {
            return Err(PcaError::validation(
                parameter,
                format!("index {} is out of range for {} entries", idx, len),
            ));
        }
        drop[idx] = true;
    }
    Ok((0..len).filter(|&i| !drop[i]).collect())
}
