// src/kernel_pca.rs

use crate::config::{KernelParams, KernelType, Method};
use crate::engine::{check_components, require_complete, Decomposition};
use crate::error::{PcaError, Result};
use crate::linalg_backends::{BackendEigh, LinAlgBackendProvider};
use crate::matrix::DataMatrix;
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Eigenvalues below this fraction of the largest are clipped to zero.
const EIGEN_CLIP: f64 = 1e-10;

/// Kernel function with its gamma already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
    pub kernel_type: KernelType,
    pub gamma: f64,
    pub degree: u32,
    pub coef0: f64,
}

impl Kernel {
    pub fn from_params(params: &KernelParams, n_features: usize) -> Self {
        Self {
            kernel_type: params.kernel_type,
            gamma: params.resolved_gamma(n_features),
            degree: params.degree,
            coef0: params.coef0,
        }
    }

    pub fn evaluate(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self.kernel_type {
            KernelType::Linear => a.dot(&b),
            KernelType::Polynomial => {
                (self.gamma * a.dot(&b) + self.coef0).powi(self.degree as i32)
            }
            KernelType::Rbf => {
                let sq: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
                (-self.gamma * sq).exp()
            }
        }
    }

    /// Kernel values between every row of `rows` and every row of `columns`.
    pub fn matrix(&self, rows: &Array2<f64>, columns: &Array2<f64>) -> Array2<f64> {
        let mut k = Array2::<f64>::zeros((rows.nrows(), columns.nrows()));
        for (i, a) in rows.outer_iter().enumerate() {
            for (j, b) in columns.outer_iter().enumerate() {
                k[[i, j]] = self.evaluate(a, b);
            }
        }
        k
    }

    fn gram(&self, data: &Array2<f64>) -> Array2<f64> {
        let n = data.nrows();
        let mut k = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in i..n {
                let v = self.evaluate(data.row(i), data.row(j));
                k[[i, j]] = v;
                k[[j, i]] = v;
            }
        }
        k
    }
}

/// Everything needed to project new samples into a fitted kernel PCA space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelModel {
    pub kernel: Kernel,
    /// Preprocessed training samples.
    pub training_data: Array2<f64>,
    /// Column means of the uncentered training kernel.
    pub kernel_column_means: Array1<f64>,
    pub kernel_grand_mean: f64,
    /// Eigenvectors of the centered kernel, shape (n_train, k).
    pub eigenvectors: Array2<f64>,
    /// Clipped eigenvalues of the centered kernel (not divided by n - 1).
    pub kernel_eigenvalues: Array1<f64>,
}

impl KernelModel {
    /// Projects preprocessed samples onto the fitted components.
    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        if data.ncols() != self.training_data.ncols() {
            return Err(PcaError::DimensionMismatch {
                expected: self.training_data.ncols(),
                found: data.ncols(),
            });
        }
        let mut k = self.kernel.matrix(data, &self.training_data);
        let row_means = k.mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(k.nrows()));
        for ((i, j), v) in k.indexed_iter_mut() {
            *v += self.kernel_grand_mean - self.kernel_column_means[j] - row_means[i];
        }
        let inv_sqrt = self
            .kernel_eigenvalues
            .mapv(|l| if l > 0.0 { 1.0 / l.sqrt() } else { 0.0 });
        Ok(k.dot(&self.eigenvectors) * &inv_sqrt.insert_axis(Axis(0)))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let n_train = self.training_data.nrows();
        if self.kernel_column_means.len() != n_train || self.eigenvectors.nrows() != n_train {
            return Err(PcaError::Model(
                "kernel model dimensions do not match its training data".to_string(),
            ));
        }
        if self.eigenvectors.ncols() != self.kernel_eigenvalues.len() {
            return Err(PcaError::Model(
                "kernel eigenvector and eigenvalue counts differ".to_string(),
            ));
        }
        Ok(())
    }
}

/// Kernel PCA: eigendecomposition of the double-centered kernel matrix.
///
/// Produces scores but no loadings, since the feature-space basis is
/// implicit. Memory is quadratic and time cubic in the sample count.
#[derive(Debug, Clone)]
pub struct KernelPcaEngine {
    params: KernelParams,
}

impl KernelPcaEngine {
    pub fn new(params: KernelParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &KernelParams {
        &self.params
    }

    pub fn fit(&self, data: &DataMatrix, n_components: usize) -> Result<Decomposition> {
        self.params.validate()?;
        check_components(data, n_components, true)?;
        require_complete(data, Method::Kernel)?;
        let x = data.values();
        let n = x.nrows();
        let kernel = Kernel::from_params(&self.params, x.ncols());
        debug!(
            "Kernel PCA: {} kernel, gamma {}, {} samples",
            kernel.kernel_type, kernel.gamma, n
        );

        let mut k = kernel.gram(x);
        if k.iter().any(|v| !v.is_finite()) {
            return Err(PcaError::numerical(
                "kernel matrix contains non-finite values; reduce gamma or the polynomial degree",
            ));
        }
        let column_means = k.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(n));
        let grand_mean = column_means.mean().unwrap_or(0.0);
        // K is symmetric, so row means equal column means
        for ((i, j), v) in k.indexed_iter_mut() {
            *v += grand_mean - column_means[i] - column_means[j];
        }

        let eig = LinAlgBackendProvider::<f64>::new().eigh_upper(&k)?;
        let mut order: Vec<usize> = (0..eig.eigenvalues.len()).collect();
        order.sort_by(|&a, &b| {
            eig.eigenvalues[b]
                .partial_cmp(&eig.eigenvalues[a])
                .unwrap_or(Ordering::Equal)
        });
        let largest = order.first().map(|&i| eig.eigenvalues[i]).unwrap_or(0.0);
        if largest <= 0.0 {
            return Err(PcaError::data("centered kernel matrix has no positive eigenvalue"));
        }
        let clip = |l: f64| if l > EIGEN_CLIP * largest { l } else { 0.0 };
        let clipped_total: f64 = eig.eigenvalues.iter().map(|&l| clip(l)).sum();

        let mut eigenvectors = Array2::<f64>::zeros((n, n_components));
        let mut kernel_eigenvalues = Array1::<f64>::zeros(n_components);
        for (a, &idx) in order.iter().take(n_components).enumerate() {
            kernel_eigenvalues[a] = clip(eig.eigenvalues[idx]);
            eigenvectors.column_mut(a).assign(&eig.eigenvectors.column(idx));
        }
        let scores = &eigenvectors * &kernel_eigenvalues.mapv(f64::sqrt).insert_axis(Axis(0));

        let dof = (n - 1) as f64;
        let eigenvalues = kernel_eigenvalues.mapv(|l| l / dof);
        let total_variance = clipped_total / dof;
        info!(
            "Kernel PCA extracted {} component(s) ({:.2}% of kernel variance)",
            n_components,
            100.0 * eigenvalues.sum() / total_variance
        );

        Ok(Decomposition {
            scores,
            loadings: None,
            eigenvalues,
            total_variance,
            all_eigenvalues: None,
            residual_spectrum: None,
            convergence: Vec::new(),
            kernel_model: Some(KernelModel {
                kernel,
                training_data: x.to_owned(),
                kernel_column_means: column_means,
                kernel_grand_mean: grand_mean,
                eigenvectors,
                kernel_eigenvalues,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn sample() -> DataMatrix {
        DataMatrix::from_array(array![
            [0.0, 1.0],
            [1.0, 0.5],
            [2.0, 2.5],
            [3.0, 2.0],
            [4.0, 4.5],
            [5.0, 3.0]
        ])
        .unwrap()
    }

    #[test]
    fn rbf_kernel_values() {
        let kernel = Kernel {
            kernel_type: KernelType::Rbf,
            gamma: 0.5,
            degree: 3,
            coef0: 1.0,
        };
        let a = array![0.0, 0.0];
        let b = array![1.0, 1.0];
        assert_abs_diff_eq!(kernel.evaluate(a.view(), b.view()), (-1.0f64).exp(), epsilon = 1e-15);
        assert_abs_diff_eq!(kernel.evaluate(a.view(), a.view()), 1.0, epsilon = 1e-15);
    }

    #[test]
    fn polynomial_kernel_values() {
        let kernel = Kernel {
            kernel_type: KernelType::Polynomial,
            gamma: 1.0,
            degree: 2,
            coef0: 1.0,
        };
        let a = array![1.0, 2.0];
        let b = array![3.0, 4.0];
        assert_abs_diff_eq!(kernel.evaluate(a.view(), b.view()), 144.0, epsilon = 1e-12);
    }

    #[test]
    fn transform_of_training_data_reproduces_scores() {
        let params = KernelParams {
            kernel_type: KernelType::Rbf,
            gamma: Some(0.2),
            ..KernelParams::default()
        };
        let fit = KernelPcaEngine::new(params).fit(&sample(), 3).unwrap();
        assert!(fit.loadings.is_none());
        let model = fit.kernel_model.as_ref().unwrap();
        let projected = model.transform(sample().values()).unwrap();
        for (a, b) in projected.iter().zip(fit.scores.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-8);
        }
    }

    #[test]
    fn degenerate_components_are_clipped_not_fatal() {
        // linear kernel on 2 features has rank 2, so the third component is noise
        let params = KernelParams {
            kernel_type: KernelType::Linear,
            ..KernelParams::default()
        };
        let fit = KernelPcaEngine::new(params).fit(&sample(), 4).unwrap();
        assert_eq!(fit.eigenvalues[2], 0.0);
        assert_eq!(fit.eigenvalues[3], 0.0);
        assert!(fit.scores.column(3).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn requires_fewer_components_than_samples() {
        let fit = KernelPcaEngine::new(KernelParams::default());
        let engine = crate::engine::PcaEngine::Kernel(fit);
        assert!(engine.fit(&sample(), 6).unwrap_err().is_data());
    }
}
