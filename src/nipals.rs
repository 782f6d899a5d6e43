// src/nipals.rs

use crate::config::NipalsOptions;
use crate::engine::{check_components, ComponentConvergence, Decomposition, ResidualSpectrum};
use crate::error::{PcaError, Result};
use crate::matrix::DataMatrix;
use log::{debug, info, trace, warn};
use ndarray::{Array1, Array2, ArrayView1, Axis, Zip};

/// Residual sum of squares below this fraction of the initial one is treated
/// as exhausted.
const EXHAUSTED_VARIANCE: f64 = 1e-20;

/// Nonlinear iterative partial least squares: extracts one component at a
/// time and deflates the data before the next.
///
/// Missing cells are skipped in every inner product, so the same routine
/// serves complete data (where it reduces to textbook NIPALS) and the
/// `native` missing-value strategy. Hitting `max_iterations` is recorded in
/// [`ComponentConvergence`] and logged, never returned as an error.
#[derive(Debug, Clone)]
pub struct NipalsEngine {
    options: NipalsOptions,
}

impl NipalsEngine {
    pub fn new(options: NipalsOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> NipalsOptions {
        self.options
    }

    pub fn fit(&self, data: &DataMatrix, n_components: usize) -> Result<Decomposition> {
        check_components(data, n_components, false)?;
        let mask = data.mask();
        let complete = !data.has_missing();
        let mut residual = data.values().to_owned();
        let (n_samples, n_features) = residual.dim();
        let dof = (n_samples - 1) as f64;

        let initial_ss = masked_sum_of_squares(&residual, mask);
        if initial_ss <= 0.0 {
            return Err(PcaError::data("data matrix has no variance after preprocessing"));
        }

        let mut scores = Array2::<f64>::zeros((n_samples, n_components));
        let mut loadings = Array2::<f64>::zeros((n_features, n_components));
        let mut eigenvalues = Array1::<f64>::zeros(n_components);
        let mut convergence = Vec::with_capacity(n_components);

        for a in 0..n_components {
            let remaining = masked_sum_of_squares(&residual, mask);
            if remaining <= EXHAUSTED_VARIANCE * initial_ss {
                return Err(PcaError::data(format!(
                    "requested {} components but the data is exhausted after {}",
                    n_components, a
                )));
            }

            let (t, p, status) = self.extract_component(&residual, mask, a);
            if !status.converged {
                warn!(
                    "NIPALS component {} stopped at the iteration cap ({}) with relative change {:.3e}",
                    a + 1,
                    status.iterations,
                    status.final_change
                );
            }

            // deflate observed cells only
            for ((i, j), value) in residual.indexed_iter_mut() {
                if mask[[i, j]] {
                    *value -= t[i] * p[j];
                }
            }

            eigenvalues[a] = t.dot(&t) / dof;
            scores.column_mut(a).assign(&t);
            loadings.column_mut(a).assign(&p);
            convergence.push(status);
            debug!(
                "NIPALS component {}: variance {:.6}, {} iteration(s)",
                a + 1,
                eigenvalues[a],
                status.iterations
            );
        }

        let residual_ss = masked_sum_of_squares(&residual, mask);
        let total_variance = eigenvalues.sum() + residual_ss / dof;
        let residual_spectrum = if complete {
            Some(ResidualSpectrum::from_residual(&residual))
        } else {
            None
        };

        info!(
            "NIPALS extracted {} component(s) ({:.2}% of variance){}",
            n_components,
            100.0 * eigenvalues.sum() / total_variance,
            if complete { "" } else { " with missing cells skipped" }
        );

        Ok(Decomposition {
            scores,
            loadings: Some(loadings),
            eigenvalues,
            total_variance,
            all_eigenvalues: None,
            residual_spectrum,
            convergence,
            kernel_model: None,
        })
    }

    fn extract_component(
        &self,
        residual: &Array2<f64>,
        mask: &Array2<bool>,
        component: usize,
    ) -> (Array1<f64>, Array1<f64>, ComponentConvergence) {
        let mut t = initial_scores(residual, mask);
        let mut p = Array1::<f64>::zeros(residual.ncols());
        let mut status = ComponentConvergence {
            component: component + 1,
            iterations: 0,
            converged: false,
            final_change: f64::INFINITY,
        };

        for iteration in 1..=self.options.max_iterations {
            // p = Xᵀt / tᵀt per column, over observed cells
            for (j, (col, col_mask)) in residual
                .axis_iter(Axis(1))
                .zip(mask.axis_iter(Axis(1)))
                .enumerate()
            {
                p[j] = masked_regression(col, col_mask, t.view());
            }
            let norm = p.dot(&p).sqrt();
            if norm > 0.0 {
                p /= norm;
            }

            // t = Xp / pᵀp per row, over observed cells
            let mut t_new = Array1::<f64>::zeros(residual.nrows());
            for (i, (row, row_mask)) in residual
                .axis_iter(Axis(0))
                .zip(mask.axis_iter(Axis(0)))
                .enumerate()
            {
                t_new[i] = masked_regression(row, row_mask, p.view());
            }

            let diff = &t_new - &t;
            let scale = t_new.dot(&t_new).sqrt().max(f64::MIN_POSITIVE);
            let change = diff.dot(&diff).sqrt() / scale;
            t = t_new;
            status.iterations = iteration;
            status.final_change = change;
            trace!(
                "NIPALS component {} iteration {}: change {:.3e}",
                component + 1,
                iteration,
                change
            );
            if change < self.options.tolerance {
                status.converged = true;
                break;
            }
        }
        (t, p, status)
    }
}

/// Starting score vector: the column with the largest observed sum of squares.
fn initial_scores(residual: &Array2<f64>, mask: &Array2<bool>) -> Array1<f64> {
    let mut best = 0;
    let mut best_ss = f64::NEG_INFINITY;
    for (j, (col, col_mask)) in residual
        .axis_iter(Axis(1))
        .zip(mask.axis_iter(Axis(1)))
        .enumerate()
    {
        let ss: f64 = col
            .iter()
            .zip(col_mask.iter())
            .filter(|(_, p)| **p)
            .map(|(v, _)| v * v)
            .sum();
        if ss > best_ss {
            best_ss = ss;
            best = j;
        }
    }
    residual.column(best).to_owned()
}

/// Least-squares coefficient of `y` on `x` using only observed positions.
fn masked_regression(y: ArrayView1<f64>, observed: ArrayView1<bool>, x: ArrayView1<f64>) -> f64 {
    let mut num = 0.0;
    let mut den = 0.0;
    Zip::from(y).and(observed).and(x).for_each(|&yv, &o, &xv| {
        if o {
            num += yv * xv;
            den += xv * xv;
        }
    });
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

fn masked_sum_of_squares(values: &Array2<f64>, mask: &Array2<bool>) -> f64 {
    values
        .iter()
        .zip(mask.iter())
        .filter(|(_, p)| **p)
        .map(|(v, _)| v * v)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn centered() -> DataMatrix {
        let x = array![
            [2.5, 2.4, 0.5],
            [0.5, 0.7, 1.9],
            [2.2, 2.9, 0.1],
            [1.9, 2.2, 1.2],
            [3.1, 3.0, 0.4],
            [2.3, 2.7, 0.8],
            [2.0, 1.6, 1.0],
            [1.0, 1.1, 1.5]
        ];
        let mean = x.mean_axis(Axis(0)).unwrap();
        DataMatrix::from_array(&x - &mean).unwrap()
    }

    #[test]
    fn complete_data_converges_with_orthonormal_loadings() {
        let fit = NipalsEngine::new(NipalsOptions::default())
            .fit(&centered(), 2)
            .unwrap();
        assert!(fit.convergence.iter().all(|c| c.converged));
        let loadings = fit.loadings.as_ref().unwrap();
        let gram = loadings.t().dot(loadings);
        assert_abs_diff_eq!(gram[[0, 0]], 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(gram[[0, 1]], 0.0, epsilon = 1e-6);
        assert!(fit.eigenvalues[0] >= fit.eigenvalues[1]);
        assert!(fit.residual_spectrum.is_some());
    }

    #[test]
    fn iteration_cap_is_soft() {
        let options = NipalsOptions {
            tolerance: 0.0,
            max_iterations: 3,
        };
        let fit = NipalsEngine::new(options).fit(&centered(), 1).unwrap();
        assert_eq!(fit.convergence[0].iterations, 3);
        assert!(!fit.convergence[0].converged);
        assert!(fit.scores.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn skips_missing_cells() {
        let data = DataMatrix::from_rows(&[
            vec![1.0, 2.0, f64::NAN],
            vec![-1.0, f64::NAN, -0.9],
            vec![0.5, 1.1, 0.4],
            vec![-0.5, -0.9, -0.6],
            vec![f64::NAN, 0.1, 0.2],
        ])
        .unwrap();
        let fit = NipalsEngine::new(NipalsOptions::default()).fit(&data, 2).unwrap();
        assert!(fit.scores.iter().all(|v| v.is_finite()));
        assert!(fit.loadings.as_ref().unwrap().iter().all(|v| v.is_finite()));
        assert!(fit.residual_spectrum.is_none());
        let cumulative = fit.eigenvalues.sum() / fit.total_variance;
        assert!(cumulative <= 1.0 + 1e-12);
    }

    #[test]
    fn single_row_is_refused() {
        let data = DataMatrix::from_array(array![[1.0, 2.0, 3.0]]).unwrap();
        let err = NipalsEngine::new(NipalsOptions::default())
            .fit(&data, 1)
            .unwrap_err();
        assert!(err.is_data(), "got {err}");
        assert!(NipalsEngine::new(NipalsOptions::default())
            .fit(&centered(), 0)
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn exhausted_variance_is_a_data_error() {
        let x = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]];
        let mean = x.mean_axis(Axis(0)).unwrap();
        let data = DataMatrix::from_array(&x - &mean).unwrap();
        let err = NipalsEngine::new(NipalsOptions::default())
            .fit(&data, 2)
            .unwrap_err();
        assert!(err.is_data());
    }
}
