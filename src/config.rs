// src/config.rs

use crate::correlation::CorrelationMethod;
use crate::error::{PcaError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of components used when a request asks for zero.
pub const DEFAULT_COMPONENTS: usize = 2;

/// Decomposition algorithm used by [`crate::PCA::fit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Svd,
    Nipals,
    Kernel,
}

impl Method {
    pub const VARIANTS: &'static [&'static str] = &["svd", "nipals", "kernel"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Svd => "svd",
            Method::Nipals => "nipals",
            Method::Kernel => "kernel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelType {
    Linear,
    Polynomial,
    #[default]
    Rbf,
}

impl KernelType {
    pub const VARIANTS: &'static [&'static str] = &["linear", "poly", "rbf"];

    pub fn as_str(&self) -> &'static str {
        match self {
            KernelType::Linear => "linear",
            KernelType::Polynomial => "poly",
            KernelType::Rbf => "rbf",
        }
    }
}

/// How missing cells are treated before the decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingStrategy {
    /// Refuse data containing missing cells.
    #[default]
    Error,
    /// Remove every row with at least one missing cell.
    Drop,
    Mean,
    Median,
    /// Keep the mask and let NIPALS skip missing cells.
    Native,
}

impl MissingStrategy {
    pub const VARIANTS: &'static [&'static str] = &["error", "drop", "mean", "median", "native"];

    pub fn as_str(&self) -> &'static str {
        match self {
            MissingStrategy::Error => "error",
            MissingStrategy::Drop => "drop",
            MissingStrategy::Mean => "mean",
            MissingStrategy::Median => "median",
            MissingStrategy::Native => "native",
        }
    }
}

fn parse_choice<T: Copy>(
    parameter: &str,
    input: &str,
    choices: &[(&str, T)],
    valid: &[&str],
) -> Result<T> {
    let needle = input.trim().to_ascii_lowercase();
    choices
        .iter()
        .find(|(name, _)| *name == needle)
        .map(|(_, value)| *value)
        .ok_or_else(|| {
            PcaError::validation(
                parameter,
                format!("unknown value '{}'; expected one of: {}", input, valid.join(", ")),
            )
        })
}

impl FromStr for Method {
    type Err = PcaError;

    fn from_str(s: &str) -> Result<Self> {
        parse_choice(
            "method",
            s,
            &[("svd", Method::Svd), ("nipals", Method::Nipals), ("kernel", Method::Kernel)],
            Method::VARIANTS,
        )
    }
}

impl FromStr for KernelType {
    type Err = PcaError;

    fn from_str(s: &str) -> Result<Self> {
        parse_choice(
            "kernel type",
            s,
            &[
                ("linear", KernelType::Linear),
                ("poly", KernelType::Polynomial),
                ("polynomial", KernelType::Polynomial),
                ("rbf", KernelType::Rbf),
            ],
            KernelType::VARIANTS,
        )
    }
}

impl FromStr for MissingStrategy {
    type Err = PcaError;

    fn from_str(s: &str) -> Result<Self> {
        parse_choice(
            "missing strategy",
            s,
            &[
                ("error", MissingStrategy::Error),
                ("drop", MissingStrategy::Drop),
                ("mean", MissingStrategy::Mean),
                ("median", MissingStrategy::Median),
                ("native", MissingStrategy::Native),
            ],
            MissingStrategy::VARIANTS,
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for KernelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for MissingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kernel function parameters for kernel PCA.
///
/// `gamma = None` resolves to `1 / n_features` at fit time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelParams {
    pub kernel_type: KernelType,
    pub gamma: Option<f64>,
    pub degree: u32,
    pub coef0: f64,
}

impl Default for KernelParams {
    fn default() -> Self {
        Self {
            kernel_type: KernelType::Rbf,
            gamma: None,
            degree: 3,
            coef0: 1.0,
        }
    }
}

impl KernelParams {
    pub fn validate(&self) -> Result<()> {
        if let Some(gamma) = self.gamma {
            if !gamma.is_finite() || gamma <= 0.0 {
                return Err(PcaError::validation(
                    "kernel gamma",
                    format!("must be a positive finite number, got {}", gamma),
                ));
            }
        }
        if self.kernel_type == KernelType::Polynomial && self.degree < 1 {
            return Err(PcaError::validation("kernel degree", "must be at least 1"));
        }
        if !self.coef0.is_finite() {
            return Err(PcaError::validation("kernel coef0", "must be finite"));
        }
        Ok(())
    }

    /// Gamma to use for data with `n_features` columns.
    pub fn resolved_gamma(&self, n_features: usize) -> f64 {
        self.gamma.unwrap_or(1.0 / n_features.max(1) as f64)
    }
}

/// Row-wise and column-wise preprocessing switches.
///
/// Row-wise (`snv`, `vector_norm`) runs first on raw values; column-wise
/// statistics are then computed on the row-processed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PreprocessingFlags {
    pub mean_center: bool,
    pub standard_scale: bool,
    pub robust_scale: bool,
    pub scale_only: bool,
    pub snv: bool,
    pub vector_norm: bool,
}

impl PreprocessingFlags {
    /// Mean-centering plus unit-variance scaling.
    pub fn standard() -> Self {
        Self {
            mean_center: true,
            standard_scale: true,
            ..Self::default()
        }
    }

    pub fn mean_centered() -> Self {
        Self {
            mean_center: true,
            ..Self::default()
        }
    }

    /// The subset of switches kernel PCA honours, plus the names of the ones
    /// it drops. The kernel is double-centred in feature space, so column
    /// centering and centred scaling are not applied; `scale_only`, `snv` and
    /// `vector_norm` are kept.
    pub fn for_kernel(&self) -> (Self, Vec<&'static str>) {
        let mut dropped = Vec::new();
        if self.mean_center {
            dropped.push("mean_center");
        }
        if self.standard_scale {
            dropped.push("standard_scale");
        }
        if self.robust_scale {
            dropped.push("robust_scale");
        }
        let kept = Self {
            mean_center: false,
            standard_scale: false,
            robust_scale: false,
            ..*self
        };
        (kept, dropped)
    }

    pub fn validate(&self) -> Result<()> {
        if self.snv && self.vector_norm {
            return Err(PcaError::validation(
                "preprocessing",
                "snv and vector_norm are mutually exclusive row-wise transforms",
            ));
        }
        if self.standard_scale && self.robust_scale {
            return Err(PcaError::validation(
                "preprocessing",
                "standard_scale and robust_scale are mutually exclusive",
            ));
        }
        if self.scale_only && (self.mean_center || self.standard_scale || self.robust_scale) {
            return Err(PcaError::validation(
                "preprocessing",
                "scale_only cannot be combined with mean_center, standard_scale or robust_scale",
            ));
        }
        Ok(())
    }
}

/// Stopping rule for NIPALS component extraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NipalsOptions {
    /// Relative change of the score vector below which iteration stops.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for NipalsOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 1000,
        }
    }
}

/// A single PCA request.
///
/// Built with [`PcaConfig::new`] or `Default` and the `with_*` setters, then
/// handed to [`crate::PCA::fit`], which validates it before touching data.
///
/// ```
/// use pca_diagnostics::{Method, MissingStrategy, PcaConfig, PreprocessingFlags};
///
/// let config = PcaConfig::new(3)
///     .with_method(Method::Nipals)
///     .with_missing_strategy(MissingStrategy::Native)
///     .with_preprocessing(PreprocessingFlags::standard());
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaConfig {
    /// Requested number of components. Zero selects [`DEFAULT_COMPONENTS`].
    pub components: usize,
    pub preprocessing: PreprocessingFlags,
    pub method: Method,
    pub kernel: KernelParams,
    pub missing_strategy: MissingStrategy,
    /// Row indices (0-based, into the input matrix) left out of the analysis.
    pub excluded_rows: Vec<usize>,
    /// Column indices (0-based, into the input matrix) left out of the analysis.
    pub excluded_columns: Vec<usize>,
    /// Confidence level used for outlier flags, in (0, 1).
    pub confidence_level: f64,
    pub nipals: NipalsOptions,
    /// Coefficient used when metadata is supplied for eigencorrelations.
    pub correlation_method: CorrelationMethod,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            components: DEFAULT_COMPONENTS,
            preprocessing: PreprocessingFlags::mean_centered(),
            method: Method::Svd,
            kernel: KernelParams::default(),
            missing_strategy: MissingStrategy::Error,
            excluded_rows: Vec::new(),
            excluded_columns: Vec::new(),
            confidence_level: 0.95,
            nipals: NipalsOptions::default(),
            correlation_method: CorrelationMethod::Pearson,
        }
    }
}

impl PcaConfig {
    pub fn new(components: usize) -> Self {
        Self {
            components,
            ..Self::default()
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_preprocessing(mut self, preprocessing: PreprocessingFlags) -> Self {
        self.preprocessing = preprocessing;
        self
    }

    pub fn with_kernel(mut self, kernel: KernelParams) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_missing_strategy(mut self, strategy: MissingStrategy) -> Self {
        self.missing_strategy = strategy;
        self
    }

    pub fn with_excluded_rows(mut self, rows: Vec<usize>) -> Self {
        self.excluded_rows = rows;
        self
    }

    pub fn with_excluded_columns(mut self, columns: Vec<usize>) -> Self {
        self.excluded_columns = columns;
        self
    }

    pub fn with_confidence_level(mut self, level: f64) -> Self {
        self.confidence_level = level;
        self
    }

    pub fn with_nipals_options(mut self, options: NipalsOptions) -> Self {
        self.nipals = options;
        self
    }

    pub fn with_correlation_method(mut self, method: CorrelationMethod) -> Self {
        self.correlation_method = method;
        self
    }

    /// Component count after applying the zero-means-default rule.
    pub fn effective_components(&self) -> usize {
        if self.components == 0 {
            DEFAULT_COMPONENTS
        } else {
            self.components
        }
    }

    /// Checks every data-independent rule.
    ///
    /// # Errors
    /// Returns [`PcaError::Validation`] naming the offending parameter when the
    /// missing strategy is `native` with a method other than NIPALS, when
    /// preprocessing switches conflict, when kernel parameters are out of
    /// range, or when the confidence level or NIPALS options are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.missing_strategy == MissingStrategy::Native && self.method != Method::Nipals {
            return Err(PcaError::validation(
                "missing strategy",
                format!(
                    "'native' requires method 'nipals' (got '{}'); use one of: error, drop, mean, median",
                    self.method
                ),
            ));
        }
        self.preprocessing.validate()?;
        if self.method == Method::Kernel {
            self.kernel.validate()?;
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(PcaError::validation(
                "confidence level",
                format!("must lie strictly between 0 and 1, got {}", self.confidence_level),
            ));
        }
        if !(self.nipals.tolerance.is_finite() && self.nipals.tolerance > 0.0) {
            return Err(PcaError::validation("nipals tolerance", "must be positive and finite"));
        }
        if self.nipals.max_iterations == 0 {
            return Err(PcaError::validation("nipals max_iterations", "must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_runtime_strings() {
        assert_eq!("SVD".parse::<Method>().unwrap(), Method::Svd);
        assert_eq!("poly".parse::<KernelType>().unwrap(), KernelType::Polynomial);
        assert_eq!(" median ".parse::<MissingStrategy>().unwrap(), MissingStrategy::Median);
    }

    #[test]
    fn unknown_method_lists_alternatives() {
        let err = "pls".parse::<Method>().unwrap_err();
        assert!(err.is_validation());
        let text = err.to_string();
        assert!(text.contains("svd") && text.contains("nipals") && text.contains("kernel"));
    }

    #[test]
    fn native_requires_nipals() {
        let config = PcaConfig::new(2).with_missing_strategy(MissingStrategy::Native);
        assert!(config.validate().unwrap_err().is_validation());
        let config = config.with_method(Method::Nipals);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn conflicting_preprocessing_is_rejected() {
        let flags = PreprocessingFlags {
            snv: true,
            vector_norm: true,
            ..PreprocessingFlags::default()
        };
        assert!(flags.validate().is_err());
        let flags = PreprocessingFlags {
            scale_only: true,
            mean_center: true,
            ..PreprocessingFlags::default()
        };
        assert!(flags.validate().is_err());
        assert!(PreprocessingFlags::standard().validate().is_ok());
    }

    #[test]
    fn zero_components_means_default() {
        assert_eq!(PcaConfig::new(0).effective_components(), DEFAULT_COMPONENTS);
        assert_eq!(PcaConfig::new(5).effective_components(), 5);
    }

    #[test]
    fn kernel_keeps_only_uncentred_switches() {
        let flags = PreprocessingFlags {
            snv: true,
            ..PreprocessingFlags::standard()
        };
        let (kept, dropped) = flags.for_kernel();
        assert_eq!(dropped, vec!["mean_center", "standard_scale"]);
        assert!(kept.snv && !kept.mean_center && !kept.standard_scale);
        let scale_only = PreprocessingFlags {
            scale_only: true,
            ..PreprocessingFlags::default()
        };
        assert_eq!(scale_only.for_kernel(), (scale_only, Vec::new()));
    }

    #[test]
    fn kernel_parameters_are_checked_only_for_kernel_method() {
        let kernel = KernelParams {
            gamma: Some(-1.0),
            ..KernelParams::default()
        };
        let config = PcaConfig::new(2).with_kernel(kernel);
        assert!(config.validate().is_ok());
        assert!(config.with_method(Method::Kernel).validate().is_err());
    }

    #[test]
    fn default_gamma_is_inverse_feature_count() {
        let params = KernelParams::default();
        assert!((params.resolved_gamma(4) - 0.25).abs() < 1e-15);
    }
}
