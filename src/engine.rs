// src/engine.rs

use crate::config::{Method, PcaConfig};
use crate::error::{PcaError, Result};
use crate::kernel_pca::{KernelModel, KernelPcaEngine};
use crate::matrix::DataMatrix;
use crate::nipals::NipalsEngine;
use crate::svd::SvdEngine;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Raw output of a decomposition, before variance summaries and diagnostics.
#[derive(Debug, Clone)]
pub struct Decomposition {
    /// Sample coordinates, shape (n_samples, k).
    pub scores: Array2<f64>,
    /// Variable weights, shape (n_features, k). `None` for kernel PCA.
    pub loadings: Option<Array2<f64>>,
    /// Variance captured by each retained component.
    pub eigenvalues: Array1<f64>,
    /// Denominator for explained-variance percentages.
    pub total_variance: f64,
    /// Every eigenvalue of the covariance when the method computes them all.
    pub all_eigenvalues: Option<Vec<f64>>,
    /// Power sums of the discarded spectrum, used for the Q limit.
    pub residual_spectrum: Option<ResidualSpectrum>,
    /// Per-component NIPALS convergence; empty for other methods.
    pub convergence: Vec<ComponentConvergence>,
    pub kernel_model: Option<KernelModel>,
}

impl Decomposition {
    pub fn n_components(&self) -> usize {
        self.eigenvalues.len()
    }
}

/// θ₁, θ₂, θ₃: sums of the first three powers of the residual covariance eigenvalues.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidualSpectrum {
    pub theta1: f64,
    pub theta2: f64,
    pub theta3: f64,
}

impl ResidualSpectrum {
    pub fn from_eigenvalues(discarded: &[f64]) -> Self {
        let mut spectrum = ResidualSpectrum {
            theta1: 0.0,
            theta2: 0.0,
            theta3: 0.0,
        };
        for &l in discarded.iter().filter(|l| **l > 0.0) {
            spectrum.theta1 += l;
            spectrum.theta2 += l * l;
            spectrum.theta3 += l * l * l;
        }
        spectrum
    }

    /// Spectrum of `EᵀE / (n - 1)` for a complete residual matrix `E`,
    /// obtained from traces instead of an eigendecomposition.
    pub fn from_residual(residual: &Array2<f64>) -> Self {
        let n = residual.nrows();
        let denom = (n.max(2) - 1) as f64;
        let cross = if residual.nrows() <= residual.ncols() {
            residual.dot(&residual.t())
        } else {
            residual.t().dot(residual)
        };
        let gram = cross / denom;
        let theta1 = gram.diag().sum();
        let theta2: f64 = gram.iter().map(|g| g * g).sum();
        let gram_sq = gram.dot(&gram);
        let theta3 = (&gram_sq * &gram).sum();
        ResidualSpectrum {
            theta1,
            theta2,
            theta3,
        }
    }
}

/// How a NIPALS component finished.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentConvergence {
    pub component: usize,
    pub iterations: usize,
    pub converged: bool,
    /// Relative change of the score vector at the last iteration.
    pub final_change: f64,
}

/// One of the interchangeable decomposition algorithms.
#[derive(Debug, Clone)]
pub enum PcaEngine {
    Svd(SvdEngine),
    Nipals(NipalsEngine),
    Kernel(KernelPcaEngine),
}

impl PcaEngine {
    pub fn from_config(config: &PcaConfig) -> Self {
        match config.method {
            Method::Svd => PcaEngine::Svd(SvdEngine::new()),
            Method::Nipals => PcaEngine::Nipals(NipalsEngine::new(config.nipals)),
            Method::Kernel => PcaEngine::Kernel(KernelPcaEngine::new(config.kernel.clone())),
        }
    }

    pub fn method(&self) -> Method {
        match self {
            PcaEngine::Svd(_) => Method::Svd,
            PcaEngine::Nipals(_) => Method::Nipals,
            PcaEngine::Kernel(_) => Method::Kernel,
        }
    }

    /// Extracts `n_components` components from preprocessed data.
    ///
    /// # Errors
    /// [`PcaError::Validation`] for zero components; [`PcaError::Data`] for
    /// too few samples, a component count above the rank bound, or missing
    /// cells the method cannot handle; [`PcaError::Numerical`] when the
    /// underlying factorisation fails.
    pub fn fit(&self, data: &DataMatrix, n_components: usize) -> Result<Decomposition> {
        match self {
            PcaEngine::Svd(engine) => engine.fit(data, n_components),
            PcaEngine::Nipals(engine) => engine.fit(data, n_components),
            PcaEngine::Kernel(engine) => engine.fit(data, n_components),
        }
    }
}

/// Bounds shared by every engine: at least one component, at least two
/// samples, and no more than `min(n - 1, p)` components (`n - 1` for kernels).
pub(crate) fn check_components(data: &DataMatrix, n_components: usize, kernel: bool) -> Result<()> {
    let max_components = if kernel {
        data.nrows().saturating_sub(1)
    } else {
        data.nrows().saturating_sub(1).min(data.ncols())
    };
    if n_components == 0 {
        return Err(PcaError::validation(
            "components",
            "must be at least 1 (the default of 2 is applied before fitting)",
        ));
    }
    if data.nrows() < 2 {
        return Err(PcaError::data(format!(
            "at least 2 samples are required, got {}",
            data.nrows()
        )));
    }
    if n_components > max_components {
        return Err(PcaError::data(format!(
            "requested {} components but at most {} can be extracted from a {}x{} matrix",
            n_components,
            max_components,
            data.nrows(),
            data.ncols()
        )));
    }
    Ok(())
}

/// Rejects masked cells for methods that need complete data.
pub(crate) fn require_complete(data: &DataMatrix, method: Method) -> Result<()> {
    let info = data.missing_info();
    if info.has_missing() {
        return Err(PcaError::data(format!(
            "method '{}' needs complete data but {} cell(s) are missing",
            method, info.total_missing
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn residual_traces_match_eigenvalue_sums() {
        // orthogonal columns: covariance eigenvalues are the column variances
        let e = array![[1.0, 0.0], [-1.0, 0.0], [0.0, 2.0], [0.0, -2.0]];
        let from_traces = ResidualSpectrum::from_residual(&e);
        let from_values = ResidualSpectrum::from_eigenvalues(&[2.0 / 3.0, 8.0 / 3.0]);
        assert_abs_diff_eq!(from_traces.theta1, from_values.theta1, epsilon = 1e-12);
        assert_abs_diff_eq!(from_traces.theta2, from_values.theta2, epsilon = 1e-12);
        assert_abs_diff_eq!(from_traces.theta3, from_values.theta3, epsilon = 1e-12);
    }

    #[test]
    fn zero_and_excess_components_are_rejected() {
        let data = DataMatrix::from_array(array![[1.0, 2.0], [2.0, 1.0], [3.0, 5.0]]).unwrap();
        let engine = PcaEngine::from_config(&PcaConfig::default());
        assert!(engine.fit(&data, 0).unwrap_err().is_validation());
        assert!(engine.fit(&data, 3).unwrap_err().is_data());
    }
}
