// src/preprocessing.rs

use crate::config::PreprocessingFlags;
use crate::error::{PcaError, Result};
use crate::matrix::DataMatrix;
use crate::stats::{mean, median, sample_std, scaled_mad};
use log::{debug, warn};
use ndarray::{Array2, ArrayViewMut1, ArrayView1, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Denominators (standard deviation, MAD, row norm) below this are treated as zero.
pub const MIN_SCALE: f64 = 1e-8;

/// Statistics learned by [`Preprocessor::fit_transform`].
///
/// `center` and `scale` are the vectors actually applied column-wise:
/// `(x - center) / scale`. The raw statistics are kept alongside for export.
/// Columns whose raw denominator fell below [`MIN_SCALE`] have `scale = 1.0`
/// and are listed in `guarded_columns`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PreprocessingParams {
    pub flags: PreprocessingFlags,
    /// Column means of the row-processed training data.
    pub means: Vec<f64>,
    /// Column sample standard deviations (unguarded).
    pub stddevs: Vec<f64>,
    /// Column medians; empty unless robust scaling is on.
    pub medians: Vec<f64>,
    /// Column MADs scaled by 1.4826; empty unless robust scaling is on.
    pub mads: Vec<f64>,
    pub center: Vec<f64>,
    pub scale: Vec<f64>,
    /// Per-row means of the training data; filled only for SNV.
    pub row_means: Vec<f64>,
    /// Per-row standard deviations of the training data; filled only for SNV.
    pub row_stddevs: Vec<f64>,
    pub guarded_columns: Vec<usize>,
}

impl PreprocessingParams {
    pub fn n_features(&self) -> usize {
        self.center.len()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.flags.validate()?;
        let n = self.center.len();
        if self.scale.len() != n || self.means.len() != n || self.stddevs.len() != n {
            return Err(PcaError::Model(format!(
                "preprocessing vectors disagree in length (center {}, scale {}, means {}, stddevs {})",
                n,
                self.scale.len(),
                self.means.len(),
                self.stddevs.len()
            )));
        }
        if self.flags.robust_scale && (self.medians.len() != n || self.mads.len() != n) {
            return Err(PcaError::Model(
                "robust scaling requires one median and one MAD per column".to_string(),
            ));
        }
        if self.center.iter().any(|v| !v.is_finite()) {
            return Err(PcaError::Model("non-finite centering value".to_string()));
        }
        if self.scale.iter().any(|&v| !v.is_finite() || v <= 0.0) {
            return Err(PcaError::Model(
                "scale factors must be positive and finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Two-stage preprocessing: a row-wise transform (SNV or L2 norm) followed by
/// a column-wise transform whose statistics are learned once and replayed.
///
/// Missing cells stay masked and are ignored by every statistic.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    flags: PreprocessingFlags,
    params: Option<PreprocessingParams>,
}

impl Preprocessor {
    pub fn new(flags: PreprocessingFlags) -> Self {
        Self { flags, params: None }
    }

    /// Rebuilds a fitted preprocessor from exported parameters.
    pub fn from_parameters(params: PreprocessingParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            flags: params.flags,
            params: Some(params),
        })
    }

    pub fn flags(&self) -> PreprocessingFlags {
        self.flags
    }

    pub fn is_fitted(&self) -> bool {
        self.params.is_some()
    }

    pub fn fitted_parameters(&self) -> Option<&PreprocessingParams> {
        self.params.as_ref()
    }

    /// Replaces the fitted state, e.g. after loading a saved model.
    pub fn set_fitted_parameters(&mut self, params: PreprocessingParams) -> Result<()> {
        params.validate()?;
        self.flags = params.flags;
        self.params = Some(params);
        Ok(())
    }

    /// Learns column statistics from `data` and returns the transformed matrix.
    ///
    /// # Errors
    /// Returns [`PcaError::Validation`] for conflicting flags and
    /// [`PcaError::Data`] if a column has no observed value.
    pub fn fit_transform(&mut self, data: &DataMatrix) -> Result<DataMatrix> {
        self.flags.validate()?;
        let (mut values, present) = data.clone().into_parts();

        let (row_means, row_stddevs) = apply_row_stage(&self.flags, &mut values, &present);

        let n_features = values.ncols();
        let mut means = Vec::with_capacity(n_features);
        let mut stddevs = Vec::with_capacity(n_features);
        let mut medians = Vec::new();
        let mut mads = Vec::new();
        let mut center = Vec::with_capacity(n_features);
        let mut scale = Vec::with_capacity(n_features);
        let mut guarded_columns = Vec::new();

        for (j, (col, mask)) in values
            .axis_iter(Axis(1))
            .zip(present.axis_iter(Axis(1)))
            .enumerate()
        {
            let observed = observed_values(col, mask);
            if observed.is_empty() {
                return Err(PcaError::data(format!("column {} has no observed values", j)));
            }
            let m = mean(&observed);
            let sd = sample_std(&observed, m);
            means.push(m);
            stddevs.push(sd);

            let (c, raw_scale) = if self.flags.robust_scale {
                let med = median(&observed);
                let mad = scaled_mad(&observed, med);
                medians.push(med);
                mads.push(mad);
                (med, Some(mad))
            } else if self.flags.standard_scale {
                (m, Some(sd))
            } else if self.flags.scale_only {
                (0.0, Some(sd))
            } else if self.flags.mean_center {
                (m, None)
            } else {
                (0.0, None)
            };
            center.push(c);
            scale.push(match raw_scale {
                Some(s) if s < MIN_SCALE => {
                    guarded_columns.push(j);
                    1.0
                }
                Some(s) => s,
                None => 1.0,
            });
        }

        if !guarded_columns.is_empty() {
            warn!(
                "Column(s) {:?} have near-zero spread; their scale factor was set to 1.0",
                guarded_columns
            );
        }

        let params = PreprocessingParams {
            flags: self.flags,
            means,
            stddevs,
            medians,
            mads,
            center,
            scale,
            row_means,
            row_stddevs,
            guarded_columns,
        };
        apply_column_stage(&params, &mut values, &present);
        debug!(
            "Preprocessed {}x{} matrix with {:?}",
            values.nrows(),
            values.ncols(),
            self.flags
        );
        self.params = Some(params);
        Ok(DataMatrix::from_parts(values, present))
    }

    /// Applies the fitted parameters to new data without changing them.
    ///
    /// Row-wise statistics are per sample and are computed from `data` itself.
    pub fn transform(&self, data: &DataMatrix) -> Result<DataMatrix> {
        let params = self.params.as_ref().ok_or(PcaError::NotFitted)?;
        if data.ncols() != params.n_features() {
            return Err(PcaError::DimensionMismatch {
                expected: params.n_features(),
                found: data.ncols(),
            });
        }
        let (mut values, present) = data.clone().into_parts();
        apply_row_stage(&params.flags, &mut values, &present);
        apply_column_stage(params, &mut values, &present);
        Ok(DataMatrix::from_parts(values, present))
    }

    /// Undoes the column-wise stage: `x * scale + center`.
    ///
    /// The row-wise stage is not reversible without the original row
    /// statistics and is left applied.
    pub fn inverse_transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        let params = self.params.as_ref().ok_or(PcaError::NotFitted)?;
        if data.ncols() != params.n_features() {
            return Err(PcaError::DimensionMismatch {
                expected: params.n_features(),
                found: data.ncols(),
            });
        }
        let mut out = data.clone();
        for mut row in out.axis_iter_mut(Axis(0)) {
            Zip::from(&mut row)
                .and(&params.center[..])
                .and(&params.scale[..])
                .for_each(|v, &c, &s| *v = *v * s + c);
        }
        Ok(out)
    }
}

fn observed_values(values: ArrayView1<f64>, mask: ArrayView1<bool>) -> Vec<f64> {
    values
        .iter()
        .zip(mask.iter())
        .filter(|(_, p)| **p)
        .map(|(&v, _)| v)
        .collect()
}

/// Applies SNV or vector normalisation row by row; returns SNV row statistics.
fn apply_row_stage(
    flags: &PreprocessingFlags,
    values: &mut Array2<f64>,
    present: &Array2<bool>,
) -> (Vec<f64>, Vec<f64>) {
    let mut row_means = Vec::new();
    let mut row_stddevs = Vec::new();
    if !flags.snv && !flags.vector_norm {
        return (row_means, row_stddevs);
    }
    for (row, mask) in values.axis_iter_mut(Axis(0)).zip(present.axis_iter(Axis(0))) {
        if flags.snv {
            let (m, sd) = snv_row(row, mask);
            row_means.push(m);
            row_stddevs.push(sd);
        } else {
            normalize_row(row, mask);
        }
    }
    (row_means, row_stddevs)
}

fn snv_row(mut row: ArrayViewMut1<f64>, mask: ArrayView1<bool>) -> (f64, f64) {
    let observed = observed_values(row.view(), mask);
    let m = mean(&observed);
    let sd = sample_std(&observed, m);
    // rows without spread are only centered
    let divisor = if sd < MIN_SCALE { 1.0 } else { sd };
    Zip::from(&mut row).and(&mask).for_each(|v, &p| {
        if p {
            *v = (*v - m) / divisor;
        }
    });
    (m, sd)
}

fn normalize_row(mut row: ArrayViewMut1<f64>, mask: ArrayView1<bool>) {
    let norm = row
        .iter()
        .zip(mask.iter())
        .filter(|(_, p)| **p)
        .map(|(v, _)| v * v)
        .sum::<f64>()
        .sqrt();
    if norm < MIN_SCALE {
        return;
    }
    Zip::from(&mut row).and(&mask).for_each(|v, &p| {
        if p {
            *v /= norm;
        }
    });
}

fn apply_column_stage(params: &PreprocessingParams, values: &mut Array2<f64>, present: &Array2<bool>) {
    for (mut row, mask) in values.axis_iter_mut(Axis(0)).zip(present.axis_iter(Axis(0))) {
        Zip::from(&mut row)
            .and(&mask)
            .and(&params.center[..])
            .and(&params.scale[..])
            .for_each(|v, &p, &c, &s| {
                if p {
                    *v = (*v - c) / s;
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn matrix(values: Array2<f64>) -> DataMatrix {
        DataMatrix::from_array(values).unwrap()
    }

    #[test]
    fn standard_scaling_yields_unit_variance() {
        let data = matrix(array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0]]);
        let mut pre = Preprocessor::new(PreprocessingFlags::standard());
        let out = pre.fit_transform(&data).unwrap();
        for col in out.values().axis_iter(Axis(1)) {
            let v = col.to_vec();
            assert_abs_diff_eq!(mean(&v), 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(sample_std(&v, 0.0), 1.0, epsilon = 1e-12);
        }
        let params = pre.fitted_parameters().unwrap();
        assert_eq!(params.means, vec![2.5, 25.0]);
    }

    #[test]
    fn zero_variance_column_is_guarded_not_nan() {
        let data = matrix(array![[1.0, 5.0], [2.0, 5.0], [3.0, 5.0]]);
        let mut pre = Preprocessor::new(PreprocessingFlags::standard());
        let out = pre.fit_transform(&data).unwrap();
        assert!(out.values().iter().all(|v| v.is_finite()));
        assert_eq!(out.values().column(1).to_vec(), vec![0.0, 0.0, 0.0]);
        let params = pre.fitted_parameters().unwrap();
        assert_eq!(params.guarded_columns, vec![1]);
        assert_eq!(params.scale[1], 1.0);
        assert_eq!(params.stddevs[1], 0.0);
    }

    #[test]
    fn robust_scaling_uses_median_and_mad() {
        let data = matrix(array![[1.0], [2.0], [3.0], [4.0], [100.0]]);
        let flags = PreprocessingFlags {
            robust_scale: true,
            ..PreprocessingFlags::default()
        };
        let mut pre = Preprocessor::new(flags);
        let out = pre.fit_transform(&data).unwrap();
        let params = pre.fitted_parameters().unwrap();
        assert_eq!(params.medians, vec![3.0]);
        assert_abs_diff_eq!(params.mads[0], 1.4826, epsilon = 1e-12);
        assert_abs_diff_eq!(out.values()[[0, 0]], -2.0 / 1.4826, epsilon = 1e-12);
    }

    #[test]
    fn snv_runs_before_column_statistics() {
        let data = matrix(array![[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [5.0, 5.0, 5.0]]);
        let flags = PreprocessingFlags {
            snv: true,
            mean_center: true,
            ..PreprocessingFlags::default()
        };
        let mut pre = Preprocessor::new(flags);
        let out = pre.fit_transform(&data).unwrap();
        let params = pre.fitted_parameters().unwrap();
        // rows 0 and 1 become [-1, 0, 1]; the flat row is only centered
        assert_eq!(params.row_means, vec![2.0, 4.0, 5.0]);
        assert_abs_diff_eq!(params.means[0], -2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out.values()[[2, 1]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn vector_norm_gives_unit_rows() {
        let data = matrix(array![[3.0, 4.0], [0.0, 0.0]]);
        let flags = PreprocessingFlags {
            vector_norm: true,
            ..PreprocessingFlags::default()
        };
        let mut pre = Preprocessor::new(flags);
        let out = pre.fit_transform(&data).unwrap();
        assert_abs_diff_eq!(out.values()[[0, 0]], 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(out.values()[[0, 1]], 0.8, epsilon = 1e-12);
        assert_eq!(out.values().row(1).to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn transform_replays_fitted_parameters() {
        let data = matrix(array![[1.0, 7.0, 2.0], [4.0, 1.0, 8.0], [6.0, 3.0, 5.0], [2.0, 9.0, 4.0]]);
        let flags = PreprocessingFlags {
            snv: true,
            ..PreprocessingFlags::standard()
        };
        let mut pre = Preprocessor::new(flags);
        let fitted = pre.fit_transform(&data).unwrap();
        let before = pre.fitted_parameters().cloned();
        let replayed = pre.transform(&data).unwrap();
        assert_eq!(fitted, replayed);
        assert_eq!(before.as_ref(), pre.fitted_parameters());
    }

    #[test]
    fn parameters_round_trip_and_inverse() {
        let data = matrix(array![[1.0, 10.0], [2.0, 30.0], [6.0, 20.0]]);
        let mut pre = Preprocessor::new(PreprocessingFlags::standard());
        let out = pre.fit_transform(&data).unwrap();
        let restored = Preprocessor::from_parameters(pre.fitted_parameters().unwrap().clone()).unwrap();
        assert_eq!(restored.transform(&data).unwrap(), out);
        let back = restored.inverse_transform(out.values()).unwrap();
        for (a, b) in back.iter().zip(data.values().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn masked_cells_are_ignored_and_stay_masked() {
        let data = DataMatrix::from_rows(&[vec![1.0, f64::NAN], vec![3.0, 4.0], vec![5.0, 8.0]]).unwrap();
        let mut pre = Preprocessor::new(PreprocessingFlags::mean_centered());
        let out = pre.fit_transform(&data).unwrap();
        assert_eq!(pre.fitted_parameters().unwrap().means, vec![3.0, 6.0]);
        assert!(!out.is_present(0, 1));
        assert_eq!(out.values()[[0, 1]], 0.0);
    }

    #[test]
    fn transform_requires_fit_and_matching_width() {
        let pre = Preprocessor::new(PreprocessingFlags::standard());
        let data = matrix(array![[1.0, 2.0]]);
        assert!(matches!(pre.transform(&data), Err(PcaError::NotFitted)));
        let mut pre = pre;
        pre.fit_transform(&matrix(array![[1.0, 2.0, 3.0], [2.0, 3.0, 5.0]])).unwrap();
        assert!(matches!(
            pre.transform(&data),
            Err(PcaError::DimensionMismatch { expected: 3, found: 2 })
        ));
    }
}
