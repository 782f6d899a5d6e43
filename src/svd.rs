// src/svd.rs

use crate::config::Method;
use crate::engine::{check_components, require_complete, Decomposition, ResidualSpectrum};
use crate::error::{PcaError, Result};
use crate::linalg_backends::{BackendSVD, LinAlgBackendProvider};
use crate::matrix::DataMatrix;
use log::{debug, info};
use ndarray::{s, Array1, Array2, Axis};

/// Singular values below this fraction of the largest one count as zero.
pub const RANK_TOLERANCE: f64 = 1e-10;

/// Exact PCA through a thin singular value decomposition of the
/// preprocessed matrix `X = U Σ Vᵀ`.
///
/// Scores are `U Σ`, loadings are `V`, and component variances are
/// `σ² / (n - 1)`. Only the smaller of `U` and `V` is formed; the other
/// side is recovered by projection, so tall and wide matrices both stay
/// within `min(n, p)²` extra memory.
#[derive(Debug, Clone, Default)]
pub struct SvdEngine;

impl SvdEngine {
    pub fn new() -> Self {
        SvdEngine
    }

    pub fn fit(&self, data: &DataMatrix, n_components: usize) -> Result<Decomposition> {
        check_components(data, n_components, false)?;
        require_complete(data, Method::Svd)?;
        let x = data.values();
        let (n_samples, n_features) = x.dim();
        let backend = LinAlgBackendProvider::<f64>::new();

        let tall = n_samples >= n_features;
        debug!(
            "SVD of {}x{} matrix, forming {}",
            n_samples,
            n_features,
            if tall { "V" } else { "U" }
        );
        let svd = backend.svd_into(x.to_owned(), !tall, tall)?;
        let singular_values = svd.s;

        let leading = singular_values.first().copied().unwrap_or(0.0);
        if leading <= 0.0 {
            return Err(PcaError::data("data matrix has no variance after preprocessing"));
        }
        let rank = singular_values
            .iter()
            .take_while(|&&sv| sv > RANK_TOLERANCE * leading)
            .count();
        if rank < n_components {
            return Err(PcaError::data(format!(
                "requested {} components but the preprocessed data has numerical rank {}",
                n_components, rank
            )));
        }

        let (scores, loadings) = if tall {
            let vt = svd
                .vt
                .ok_or_else(|| PcaError::numerical("SVD backend did not return V"))?;
            let loadings = vt.slice(s![..n_components, ..]).t().to_owned();
            let scores = x.dot(&loadings);
            (scores, loadings)
        } else {
            let u = svd
                .u
                .ok_or_else(|| PcaError::numerical("SVD backend did not return U"))?;
            let u_k = u.slice(s![.., ..n_components]);
            let sigma_k = singular_values.slice(s![..n_components]);
            let scores = &u_k * &sigma_k.insert_axis(Axis(0));
            // V_k = Xᵀ U_k Σ_k⁻¹
            let loadings = x.t().dot(&u_k) / &sigma_k.insert_axis(Axis(0));
            (scores, loadings)
        };

        let dof = (n_samples - 1) as f64;
        let all_eigenvalues: Vec<f64> = singular_values.iter().map(|sv| sv * sv / dof).collect();
        let total_variance: f64 = all_eigenvalues.iter().sum();
        let eigenvalues = Array1::from(all_eigenvalues[..n_components].to_vec());
        let residual_spectrum = Some(ResidualSpectrum::from_eigenvalues(
            &all_eigenvalues[n_components..],
        ));

        info!(
            "SVD extracted {} of {} components ({:.2}% of variance)",
            n_components,
            all_eigenvalues.len(),
            100.0 * eigenvalues.sum() / total_variance
        );

        Ok(Decomposition {
            scores,
            loadings: Some(loadings),
            eigenvalues,
            total_variance,
            all_eigenvalues: Some(all_eigenvalues),
            residual_spectrum,
            convergence: Vec::new(),
            kernel_model: None,
        })
    }
}

/// Scores times transposed loadings.
pub fn reconstruct(scores: &Array2<f64>, loadings: &Array2<f64>) -> Array2<f64> {
    scores.dot(&loadings.t())
}
