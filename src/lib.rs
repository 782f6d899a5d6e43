// Principal component analysis with diagnostics

#![doc = include_str!("../README.md")]

pub mod config;
pub mod correlation;
pub mod ellipse;
pub mod engine;
pub mod error;
pub mod kernel_pca;
pub mod linalg_backends;
pub mod matrix;
pub mod metrics;
pub mod missing;
pub mod model;
pub mod nipals;
pub mod pca;
pub mod preprocessing;
pub mod svd;

mod stats;

pub use config::{
    KernelParams, KernelType, Method, MissingStrategy, NipalsOptions, PcaConfig,
    PreprocessingFlags, DEFAULT_COMPONENTS,
};
pub use correlation::{
    CorrelationMethod, EigencorrelationCalculator, EigencorrelationResult, SampleMetadata,
};
pub use ellipse::{EllipseCalculator, EllipseParams, EllipseSet};
pub use engine::{ComponentConvergence, Decomposition, PcaEngine};
pub use error::{PcaError, Result, SkippedGroup};
pub use matrix::{DataMatrix, MissingValueInfo};
pub use metrics::{
    ConfidenceLimit, DiagnosticLimits, MetricsCalculator, MetricsReport, SampleMetrics,
};
pub use missing::MissingValueHandler;
pub use model::{ModelComponents, ModelDocument, MODEL_FORMAT_VERSION};
pub use pca::{PcaResult, PCA};
pub use preprocessing::{PreprocessingParams, Preprocessor};
