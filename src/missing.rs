// src/missing.rs

use crate::config::MissingStrategy;
use crate::error::{PcaError, Result};
use crate::matrix::{DataMatrix, MissingValueInfo};
use crate::stats::median;
use log::{debug, info};
use ndarray::Axis;

/// Result of applying a [`MissingStrategy`].
#[derive(Debug, Clone)]
pub struct MissingValueOutcome {
    /// Cleaned matrix. Masked cells remain only under `native`.
    pub data: DataMatrix,
    /// Sorted indices (into the handler's input) of rows removed by `drop`.
    pub removed_rows: Vec<usize>,
    /// Number of cells filled by `mean` or `median`.
    pub imputed_cells: usize,
}

/// Applies a missing-value strategy ahead of preprocessing.
///
/// The handler reports exactly which rows it removed; aligning row names or
/// group labels with the surviving rows is the caller's job.
#[derive(Debug, Clone, Copy)]
pub struct MissingValueHandler {
    strategy: MissingStrategy,
}

impl MissingValueHandler {
    pub fn new(strategy: MissingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> MissingStrategy {
        self.strategy
    }

    /// Cleans `data` according to the strategy.
    ///
    /// # Errors
    /// * `error`: [`PcaError::Data`] naming the first missing cell.
    /// * `drop`: [`PcaError::Data`] if every row is removed.
    /// * `mean`/`median`: [`PcaError::Data`] if a column has no observed value.
    pub fn handle(&self, data: &DataMatrix) -> Result<MissingValueOutcome> {
        let info = data.missing_info();
        if !info.has_missing() {
            return Ok(MissingValueOutcome {
                data: data.clone(),
                removed_rows: Vec::new(),
                imputed_cells: 0,
            });
        }
        debug!(
            "{} missing cell(s) in {} row(s); strategy '{}'",
            info.total_missing,
            info.affected_rows.len(),
            self.strategy
        );
        match self.strategy {
            MissingStrategy::Error => Err(first_missing_error(data, &info)),
            MissingStrategy::Drop => drop_rows(data, &info),
            MissingStrategy::Mean => impute(data, &info, |present| {
                present.iter().sum::<f64>() / present.len() as f64
            }),
            MissingStrategy::Median => impute(data, &info, |present| median(present)),
            MissingStrategy::Native => Ok(MissingValueOutcome {
                data: data.clone(),
                removed_rows: Vec::new(),
                imputed_cells: 0,
            }),
        }
    }
}

fn first_missing_error(data: &DataMatrix, info: &MissingValueInfo) -> PcaError {
    let row = info.affected_rows[0];
    let col = (0..data.ncols())
        .find(|&j| !data.is_present(row, j))
        .unwrap_or(0);
    PcaError::data(format!(
        "data contains {} missing value(s) (first at row {}, column {}); \
         choose a missing strategy of drop, mean, median or native (nipals only)",
        info.total_missing, row, col
    ))
}

fn drop_rows(data: &DataMatrix, info: &MissingValueInfo) -> Result<MissingValueOutcome> {
    let keep: Vec<usize> = (0..data.nrows())
        .filter(|i| info.affected_rows.binary_search(i).is_err())
        .collect();
    if keep.is_empty() {
        return Err(PcaError::data(
            "every row contains a missing value; nothing remains after dropping",
        ));
    }
    let all_cols: Vec<usize> = (0..data.ncols()).collect();
    info!(
        "Dropped {} of {} rows containing missing values",
        info.affected_rows.len(),
        data.nrows()
    );
    Ok(MissingValueOutcome {
        data: data.select(&keep, &all_cols),
        removed_rows: info.affected_rows.clone(),
        imputed_cells: 0,
    })
}

fn impute<F>(data: &DataMatrix, info: &MissingValueInfo, fill: F) -> Result<MissingValueOutcome>
where
    F: Fn(&[f64]) -> f64,
{
    let (mut values, mut present) = data.clone().into_parts();
    for (j, (mut col, mut mask)) in values
        .axis_iter_mut(Axis(1))
        .zip(present.axis_iter_mut(Axis(1)))
        .enumerate()
    {
        if info.column_counts[j] == 0 {
            continue;
        }
        let observed: Vec<f64> = col
            .iter()
            .zip(mask.iter())
            .filter(|(_, p)| **p)
            .map(|(&v, _)| v)
            .collect();
        if observed.is_empty() {
            return Err(PcaError::data(format!(
                "column {} has no observed values to impute from",
                j
            )));
        }
        let fill_value = fill(&observed);
        for (v, p) in col.iter_mut().zip(mask.iter_mut()) {
            if !*p {
                *v = fill_value;
                *p = true;
            }
        }
    }
    info!("Imputed {} missing cell(s)", info.total_missing);
    Ok(MissingValueOutcome {
        data: DataMatrix::from_parts(values, present),
        removed_rows: Vec::new(),
        imputed_cells: info.total_missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DataMatrix {
        DataMatrix::from_rows(&[
            vec![1.0, 10.0, 5.0],
            vec![f64::NAN, 20.0, 6.0],
            vec![3.0, 30.0, f64::NAN],
            vec![4.0, 40.0, 8.0],
            vec![100.0, 50.0, 9.0],
        ])
        .unwrap()
    }

    #[test]
    fn error_strategy_refuses_missing_data() {
        let err = MissingValueHandler::new(MissingStrategy::Error)
            .handle(&sample())
            .unwrap_err();
        assert!(err.is_data());
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn drop_removes_exactly_the_affected_rows() {
        let data = sample();
        let affected = data.missing_info().affected_rows.len();
        let out = MissingValueHandler::new(MissingStrategy::Drop).handle(&data).unwrap();
        assert_eq!(out.removed_rows, vec![1, 2]);
        assert_eq!(out.data.nrows(), data.nrows() - affected);
        assert!(!out.data.has_missing());
        assert_eq!(out.data.values().row(1).to_vec(), vec![4.0, 40.0, 8.0]);
    }

    #[test]
    fn drop_fails_when_nothing_survives() {
        let data = DataMatrix::from_rows(&[vec![f64::NAN, 1.0], vec![2.0, f64::NAN]]).unwrap();
        assert!(MissingValueHandler::new(MissingStrategy::Drop)
            .handle(&data)
            .unwrap_err()
            .is_data());
    }

    #[test]
    fn mean_and_median_only_touch_flagged_cells() {
        let data = sample();
        let mean = MissingValueHandler::new(MissingStrategy::Mean).handle(&data).unwrap();
        let median = MissingValueHandler::new(MissingStrategy::Median).handle(&data).unwrap();
        assert_eq!(mean.data.nrows(), data.nrows());
        assert_eq!(mean.imputed_cells, 2);
        // column 0 observed: 1, 3, 4, 100
        assert_eq!(mean.data.values()[[1, 0]], 27.0);
        assert_eq!(median.data.values()[[1, 0]], 3.5);
        // column 2 observed: 5, 6, 8, 9
        assert_eq!(median.data.values()[[2, 2]], 7.0);
        for ((i, j), &v) in data.values().indexed_iter() {
            if data.is_present(i, j) {
                assert_eq!(mean.data.values()[[i, j]], v);
                assert_eq!(median.data.values()[[i, j]], v);
            }
        }
    }

    #[test]
    fn all_missing_column_cannot_be_imputed() {
        let data = DataMatrix::from_rows(&[vec![1.0, f64::NAN], vec![2.0, f64::NAN]]).unwrap();
        assert!(MissingValueHandler::new(MissingStrategy::Mean)
            .handle(&data)
            .unwrap_err()
            .is_data());
    }

    #[test]
    fn native_keeps_the_mask() {
        let out = MissingValueHandler::new(MissingStrategy::Native)
            .handle(&sample())
            .unwrap();
        assert!(out.data.has_missing());
        assert!(out.removed_rows.is_empty());
    }
}
