// src/error.rs

use thiserror::Error;

/// Errors produced while fitting, projecting, diagnosing or persisting a PCA model.
///
/// Every public operation in this crate reports failure through this type.
/// Variants follow four families: invalid requests (`Validation`), unusable
/// input (`Data`, `DimensionMismatch`), numerical breakdown (`Numerical`), and
/// persistence (`Model`, `Io`, `Json`, `Bincode`).
#[derive(Error, Debug)]
pub enum PcaError {
    /// A configuration value or parameter combination was rejected.
    #[error("invalid {parameter}: {message}")]
    Validation { parameter: String, message: String },

    /// The input data cannot support the requested computation.
    #[error("data error: {0}")]
    Data(String),

    /// A decomposition or statistic could not be computed.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// `transform` or an accessor was used before `fit` or `load_model`.
    #[error("PCA model is not fitted; call fit or load a model first")]
    NotFitted,

    #[error("dimension mismatch: expected {expected} columns, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// No group produced an ellipse. Each entry explains one skipped group.
    #[error("no confidence ellipse could be computed ({} group(s) skipped)", skipped.len())]
    NoEllipses { skipped: Vec<SkippedGroup> },

    /// A stored model document is malformed or inconsistent.
    #[error("invalid model document: {0}")]
    Model(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary encoding error: {0}")]
    Bincode(String),
}

/// A group excluded from ellipse computation and why.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SkippedGroup {
    pub group: String,
    pub reason: String,
}

impl PcaError {
    pub(crate) fn validation(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        PcaError::Validation {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    pub(crate) fn data(message: impl Into<String>) -> Self {
        PcaError::Data(message.into())
    }

    pub(crate) fn numerical(message: impl Into<String>) -> Self {
        PcaError::Numerical(message.into())
    }

    /// True for errors caused by the caller's request rather than the data.
    pub fn is_validation(&self) -> bool {
        matches!(self, PcaError::Validation { .. })
    }

    pub fn is_data(&self) -> bool {
        matches!(self, PcaError::Data(_) | PcaError::DimensionMismatch { .. })
    }
}

impl From<bincode::error::EncodeError> for PcaError {
    fn from(e: bincode::error::EncodeError) -> Self {
        PcaError::Bincode(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for PcaError {
    fn from(e: bincode::error::DecodeError) -> Self {
        PcaError::Bincode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PcaError>;
