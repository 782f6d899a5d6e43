// src/metrics.rs

use crate::engine::ResidualSpectrum;
use crate::error::{PcaError, Result};
use crate::matrix::DataMatrix;
use log::{debug, info};
use ndarray::{Array1, Array2, Axis, Zip};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor, Normal};

/// θ₁ below this fraction of the total variance means nothing was discarded.
const NEGLIGIBLE_RESIDUAL: f64 = 1e-12;

/// Per-sample diagnostics in the preprocessed space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleMetrics {
    /// Σ t² / λ over retained components.
    pub hotelling_t2: f64,
    /// √T².
    pub mahalanobis: f64,
    /// Squared reconstruction error over observed cells (Q / SPE).
    pub rss: f64,
    pub is_outlier: bool,
}

/// A control limit, or the reason it cannot be computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLimit {
    Available { value: f64 },
    Unavailable { reason: String },
}

impl ConfidenceLimit {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        ConfidenceLimit::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            ConfidenceLimit::Available { value } => Some(*value),
            ConfidenceLimit::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.value().is_some()
    }

    /// True only when the limit exists and `statistic` is above it.
    pub fn is_exceeded_by(&self, statistic: f64) -> bool {
        self.value().is_some_and(|limit| statistic > limit)
    }
}

/// T² and Q limits at the reporting levels plus the configured outlier level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticLimits {
    pub t2_95: ConfidenceLimit,
    pub t2_99: ConfidenceLimit,
    pub q_95: ConfidenceLimit,
    pub q_99: ConfidenceLimit,
    pub confidence_level: f64,
    pub t2: ConfidenceLimit,
    pub q: ConfidenceLimit,
}

/// Per-sample metrics together with the limits used to flag them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub samples: Vec<SampleMetrics>,
    pub limits: DiagnosticLimits,
}

impl MetricsReport {
    pub fn outlier_indices(&self) -> Vec<usize> {
        self.samples
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_outlier)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Computes leverage and residual diagnostics from a fitted linear model.
#[derive(Debug, Clone, Copy)]
pub struct MetricsCalculator {
    confidence_level: f64,
}

impl MetricsCalculator {
    /// # Errors
    /// [`PcaError::Validation`] unless `0 < confidence_level < 1`.
    pub fn new(confidence_level: f64) -> Result<Self> {
        if !(confidence_level > 0.0 && confidence_level < 1.0) {
            return Err(PcaError::validation(
                "confidence level",
                format!("must lie strictly between 0 and 1, got {}", confidence_level),
            ));
        }
        Ok(Self { confidence_level })
    }

    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    /// Control limits for a model with `n_samples` training rows and
    /// `n_components` retained components.
    ///
    /// The Q limit needs the discarded spectrum; without it (or when it is
    /// negligible) the limit is reported as unavailable rather than zero.
    pub fn limits(
        &self,
        n_samples: usize,
        n_components: usize,
        spectrum: Option<&ResidualSpectrum>,
        total_variance: f64,
    ) -> DiagnosticLimits {
        let q_at = |confidence: f64| match spectrum {
            None => ConfidenceLimit::unavailable(
                "discarded eigenvalues are not available for this model",
            ),
            Some(s) if s.theta1 <= NEGLIGIBLE_RESIDUAL * total_variance.max(0.0) || s.theta2 <= 0.0 => {
                ConfidenceLimit::unavailable("retained components explain all variance")
            }
            Some(s) => q_limit(s, confidence),
        };
        DiagnosticLimits {
            t2_95: t2_limit(n_samples, n_components, 0.95),
            t2_99: t2_limit(n_samples, n_components, 0.99),
            q_95: q_at(0.95),
            q_99: q_at(0.99),
            confidence_level: self.confidence_level,
            t2: t2_limit(n_samples, n_components, self.confidence_level),
            q: q_at(self.confidence_level),
        }
    }

    /// Computes T², Mahalanobis distance, RSS and the outlier flag per sample.
    ///
    /// `data` is the preprocessed matrix the model was fitted on (or new data
    /// passed through the same preprocessing); `scores` are its projections.
    ///
    /// # Errors
    /// [`PcaError::Numerical`] when a component has zero variance and
    /// [`PcaError::DimensionMismatch`] when shapes disagree.
    pub fn calculate(
        &self,
        data: &DataMatrix,
        scores: &Array2<f64>,
        loadings: &Array2<f64>,
        eigenvalues: &Array1<f64>,
        limits: DiagnosticLimits,
    ) -> Result<MetricsReport> {
        if loadings.nrows() != data.ncols() {
            return Err(PcaError::DimensionMismatch {
                expected: loadings.nrows(),
                found: data.ncols(),
            });
        }
        if scores.nrows() != data.nrows() || scores.ncols() != eigenvalues.len() {
            return Err(PcaError::numerical(format!(
                "scores shape {:?} does not match {} samples and {} eigenvalues",
                scores.dim(),
                data.nrows(),
                eigenvalues.len()
            )));
        }
        let t2 = hotelling_t2(scores, eigenvalues)?;
        let rss = residual_sum_of_squares(data, scores, loadings);

        let samples: Vec<SampleMetrics> = t2
            .iter()
            .zip(rss.iter())
            .map(|(&t2, &rss)| SampleMetrics {
                hotelling_t2: t2,
                mahalanobis: t2.sqrt(),
                rss,
                is_outlier: limits.t2.is_exceeded_by(t2) || limits.q.is_exceeded_by(rss),
            })
            .collect();

        let n_outliers = samples.iter().filter(|m| m.is_outlier).count();
        info!(
            "Computed diagnostics for {} samples; {} flagged at {:.0}% confidence",
            samples.len(),
            n_outliers,
            self.confidence_level * 100.0
        );
        debug!("T² limit {:?}, Q limit {:?}", limits.t2, limits.q);
        Ok(MetricsReport { samples, limits })
    }
}

/// Hotelling's T² per sample: Σₐ tₐ² / λₐ.
pub fn hotelling_t2(scores: &Array2<f64>, eigenvalues: &Array1<f64>) -> Result<Array1<f64>> {
    if let Some(a) = eigenvalues.iter().position(|&l| !(l > 0.0) || !l.is_finite()) {
        return Err(PcaError::numerical(format!(
            "component {} has zero variance; T² is undefined",
            a + 1
        )));
    }
    let scaled = scores.mapv(|t| t * t) / &eigenvalues.view().insert_axis(Axis(0));
    Ok(scaled.sum_axis(Axis(1)))
}

/// Σ over observed cells of (x - t Pᵀ)² per sample.
pub fn residual_sum_of_squares(
    data: &DataMatrix,
    scores: &Array2<f64>,
    loadings: &Array2<f64>,
) -> Array1<f64> {
    let reconstruction = scores.dot(&loadings.t());
    let mut rss = Array1::<f64>::zeros(data.nrows());
    Zip::from(&mut rss)
        .and(data.values().rows())
        .and(data.mask().rows())
        .and(reconstruction.rows())
        .for_each(|out, x, mask, xhat| {
            *out = x
                .iter()
                .zip(mask.iter())
                .zip(xhat.iter())
                .filter(|((_, p), _)| **p)
                .map(|((v, _), r)| (v - r).powi(2))
                .sum();
        });
    rss
}

/// Hotelling T² control limit: k(n−1)/(n−k) · F(confidence; k, n−k).
pub fn t2_limit(n_samples: usize, n_components: usize, confidence: f64) -> ConfidenceLimit {
    if n_components == 0 || n_samples <= n_components {
        return ConfidenceLimit::unavailable(format!(
            "needs more samples ({}) than components ({})",
            n_samples, n_components
        ));
    }
    let k = n_components as f64;
    let n = n_samples as f64;
    match FisherSnedecor::new(k, n - k) {
        Ok(f) => {
            let value = k * (n - 1.0) / (n - k) * f.inverse_cdf(confidence);
            if value.is_finite() {
                ConfidenceLimit::Available { value }
            } else {
                ConfidenceLimit::unavailable("F quantile is not finite")
            }
        }
        Err(e) => ConfidenceLimit::unavailable(format!("F distribution: {}", e)),
    }
}

/// Q (SPE) control limit by the Jackson–Mudholkar approximation.
///
/// Falls back to Box's scaled chi-square approximation `g·χ²(h)` with
/// `g = θ₂/θ₁`, `h = θ₁²/θ₂` when the Jackson–Mudholkar exponent `h₀`
/// is not positive.
pub fn q_limit(spectrum: &ResidualSpectrum, confidence: f64) -> ConfidenceLimit {
    let ResidualSpectrum {
        theta1,
        theta2,
        theta3,
    } = *spectrum;
    if !(theta1 > 0.0 && theta2 > 0.0) {
        return ConfidenceLimit::unavailable("residual spectrum is empty");
    }
    let h0 = 1.0 - 2.0 * theta1 * theta3 / (3.0 * theta2 * theta2);
    if h0 > 0.0 {
        let z = match Normal::new(0.0, 1.0) {
            Ok(normal) => normal.inverse_cdf(confidence),
            Err(e) => return ConfidenceLimit::unavailable(format!("normal distribution: {}", e)),
        };
        let base = z * (2.0 * theta2 * h0 * h0).sqrt() / theta1
            + 1.0
            + theta2 * h0 * (h0 - 1.0) / (theta1 * theta1);
        if base > 0.0 {
            let value = theta1 * base.powf(1.0 / h0);
            if value.is_finite() {
                return ConfidenceLimit::Available { value };
            }
        }
    }
    let g = theta2 / theta1;
    let h = theta1 * theta1 / theta2;
    match ChiSquared::new(h) {
        Ok(chi) => {
            let value = g * chi.inverse_cdf(confidence);
            if value.is_finite() {
                ConfidenceLimit::Available { value }
            } else {
                ConfidenceLimit::unavailable("chi-square quantile is not finite")
            }
        }
        Err(e) => ConfidenceLimit::unavailable(format!("chi-square distribution: {}", e)),
    }
}

/// Share of each component's variance carried by each variable, in percent.
///
/// Column `a` holds `100 · pⱼₐ² / Σⱼ pⱼₐ²`.
pub fn variable_contributions(loadings: &Array2<f64>) -> Array2<f64> {
    let squared = loadings.mapv(|p| p * p);
    let totals = squared.sum_axis(Axis(0));
    let mut out = squared;
    for (mut col, &total) in out.axis_iter_mut(Axis(1)).zip(totals.iter()) {
        if total > 0.0 {
            col.mapv_inplace(|v| 100.0 * v / total);
        }
    }
    out
}
