// src/model.rs

use crate::config::{Method, PcaConfig};
use crate::error::{PcaError, Result};
use crate::kernel_pca::KernelModel;
use crate::metrics::DiagnosticLimits;
use crate::preprocessing::PreprocessingParams;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Version written into every saved model; loading rejects any other value.
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// The fitted decomposition, independent of any particular input batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelComponents {
    pub method: Method,
    /// Feature-space loadings, shape (retained columns, k). `None` for kernel PCA.
    pub loadings: Option<Array2<f64>>,
    pub eigenvalues: Array1<f64>,
    /// Percent of total variance per component.
    pub explained_variance: Vec<f64>,
    pub cumulative_variance: Vec<f64>,
    pub component_labels: Vec<String>,
    /// Column count of the data the model was fitted on, before exclusions.
    pub n_input_columns: usize,
    /// Indices into the input columns that the model uses.
    pub retained_columns: Vec<usize>,
    pub kernel: Option<KernelModel>,
}

impl ModelComponents {
    pub fn n_components(&self) -> usize {
        self.eigenvalues.len()
    }
}

/// Self-describing persisted model: configuration, preprocessing, components
/// and diagnostic limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDocument {
    pub format_version: u32,
    pub software: String,
    pub software_version: String,
    pub config: PcaConfig,
    pub preprocessing: PreprocessingParams,
    pub model: ModelComponents,
    pub diagnostics: DiagnosticLimits,
}

impl ModelDocument {
    pub fn new(
        config: PcaConfig,
        preprocessing: PreprocessingParams,
        model: ModelComponents,
        diagnostics: DiagnosticLimits,
    ) -> Self {
        Self {
            format_version: MODEL_FORMAT_VERSION,
            software: env!("CARGO_PKG_NAME").to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            config,
            preprocessing,
            model,
            diagnostics,
        }
    }

    /// Checks the format version and that every part agrees on dimensions.
    ///
    /// # Errors
    /// [`PcaError::Model`] describing the first inconsistency found.
    pub fn validate(&self) -> Result<()> {
        if self.format_version != MODEL_FORMAT_VERSION {
            return Err(PcaError::Model(format!(
                "unsupported model format version {} (expected {})",
                self.format_version, MODEL_FORMAT_VERSION
            )));
        }
        self.config
            .validate()
            .map_err(|e| PcaError::Model(format!("stored configuration is invalid: {}", e)))?;
        self.preprocessing.validate()?;

        let model = &self.model;
        let n_features = model.retained_columns.len();
        if n_features == 0 || n_features != self.preprocessing.n_features() {
            return Err(PcaError::Model(format!(
                "{} retained column(s) but preprocessing covers {}",
                n_features,
                self.preprocessing.n_features()
            )));
        }
        if model.retained_columns.iter().any(|&c| c >= model.n_input_columns) {
            return Err(PcaError::Model(format!(
                "retained column index out of range for {} input column(s)",
                model.n_input_columns
            )));
        }
        let k = model.n_components();
        if k == 0 {
            return Err(PcaError::Model("model has no components".to_string()));
        }
        if model.explained_variance.len() != k
            || model.cumulative_variance.len() != k
            || model.component_labels.len() != k
        {
            return Err(PcaError::Model(
                "variance summaries do not match the component count".to_string(),
            ));
        }
        if model.method != self.config.method {
            return Err(PcaError::Model(format!(
                "model method '{}' differs from configured method '{}'",
                model.method, self.config.method
            )));
        }

        match (model.method, &model.loadings, &model.kernel) {
            (Method::Kernel, None, Some(kernel)) => {
                kernel.validate()?;
                if kernel.training_data.ncols() != n_features
                    || kernel.kernel_eigenvalues.len() != k
                {
                    return Err(PcaError::Model(
                        "kernel model does not match the retained columns or components"
                            .to_string(),
                    ));
                }
            }
            (Method::Kernel, _, _) => {
                return Err(PcaError::Model(
                    "kernel model must carry kernel data and no loadings".to_string(),
                ));
            }
            (_, Some(loadings), None) => {
                if loadings.dim() != (n_features, k) {
                    return Err(PcaError::Model(format!(
                        "loadings have shape {:?}, expected ({}, {})",
                        loadings.dim(),
                        n_features,
                        k
                    )));
                }
                if loadings.iter().any(|v| !v.is_finite()) {
                    return Err(PcaError::Model("loadings contain non-finite values".to_string()));
                }
            }
            (_, _, _) => {
                return Err(PcaError::Model(
                    "linear model must carry loadings and no kernel data".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Serializes as pretty-printed JSON.
    pub fn write_json<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Reads and validates a JSON document.
    pub fn read_json<R: Read>(reader: R) -> Result<Self> {
        let document: ModelDocument = serde_json::from_reader(reader)?;
        document.validate()?;
        Ok(document)
    }

    /// Compact binary encoding.
    pub fn write_binary<W: Write>(&self, writer: &mut W) -> Result<()> {
        bincode::serde::encode_into_std_write(self, writer, bincode::config::standard())?;
        Ok(())
    }

    pub fn read_binary<R: Read>(reader: &mut R) -> Result<Self> {
        let document: ModelDocument =
            bincode::serde::decode_from_std_read(reader, bincode::config::standard())?;
        document.validate()?;
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreprocessingFlags;
    use crate::metrics::MetricsCalculator;
    use crate::preprocessing::Preprocessor;
    use crate::DataMatrix;
    use ndarray::array;

    fn document() -> ModelDocument {
        let data = DataMatrix::from_array(array![[1.0, 2.0], [2.0, 1.0], [3.0, 5.0]]).unwrap();
        let mut pre = Preprocessor::new(PreprocessingFlags::mean_centered());
        pre.fit_transform(&data).unwrap();
        let limits = MetricsCalculator::new(0.95).unwrap().limits(3, 1, None, 1.0);
        ModelDocument::new(
            PcaConfig::new(1),
            pre.fitted_parameters().unwrap().clone(),
            ModelComponents {
                method: Method::Svd,
                loadings: Some(array![[0.6], [0.8]]),
                eigenvalues: array![2.0],
                explained_variance: vec![80.0],
                cumulative_variance: vec![80.0],
                component_labels: vec!["PC1".to_string()],
                n_input_columns: 2,
                retained_columns: vec![0, 1],
                kernel: None,
            },
            limits,
        )
    }

    #[test]
    fn json_document_round_trips() {
        let doc = document();
        let mut buf = Vec::new();
        doc.write_json(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.contains("\"format_version\": 1"));
        assert!(text.contains("\"software\": \"pca_diagnostics\""));
        let back = ModelDocument::read_json(buf.as_slice()).unwrap();
        assert_eq!(back.model.loadings, doc.model.loadings);
        assert_eq!(back.model.component_labels, doc.model.component_labels);
        assert_eq!(back.config, doc.config);
        assert!(!back.diagnostics.q.is_available());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut doc = document();
        doc.format_version = 7;
        let mut buf = Vec::new();
        doc.write_binary(&mut buf).unwrap();
        let err = ModelDocument::read_binary(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, PcaError::Model(_)));
    }

    #[test]
    fn loadings_shape_is_checked() {
        let mut doc = document();
        doc.model.loadings = Some(array![[0.6, 0.0], [0.8, 1.0]]);
        assert!(matches!(doc.validate(), Err(PcaError::Model(_))));
        let mut doc = document();
        doc.model.loadings = None;
        assert!(matches!(doc.validate(), Err(PcaError::Model(_))));
    }
}
