// src/pca.rs

use crate::config::{Method, PcaConfig, DEFAULT_COMPONENTS};
use crate::correlation::{
    component_label, EigencorrelationCalculator, EigencorrelationResult, SampleMetadata,
};
use crate::ellipse::{EllipseCalculator, EllipseSet};
use crate::engine::{require_complete, ComponentConvergence, PcaEngine};
use crate::error::{PcaError, Result};
use crate::matrix::DataMatrix;
use crate::metrics::{variable_contributions, DiagnosticLimits, MetricsCalculator, MetricsReport};
use crate::missing::MissingValueHandler;
use crate::model::{ModelComponents, ModelDocument};
use crate::preprocessing::{PreprocessingParams, Preprocessor};
use crate::svd::reconstruct;
use log::{debug, info, warn};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Everything produced by one [`PCA::fit`] call.
///
/// Row-aligned outputs (`scores`, `metrics`) follow `retained_rows`, which
/// indexes into the input matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaResult {
    /// Sample scores, shape (retained rows, k).
    pub scores: Array2<f64>,
    /// Loadings, shape (retained columns, k). `None` for kernel PCA.
    pub loadings: Option<Array2<f64>>,
    pub eigenvalues: Array1<f64>,
    /// Percent of total variance per component.
    pub explained_variance: Vec<f64>,
    pub cumulative_variance: Vec<f64>,
    /// "PC1", "PC2", ...
    pub component_labels: Vec<String>,
    pub method: Method,
    pub total_variance: f64,
    /// Full eigenvalue spectrum when the method computes it (SVD only).
    pub all_eigenvalues: Option<Vec<f64>>,
    pub preprocessing: PreprocessingParams,
    /// Per-sample T², Mahalanobis distance, RSS and outlier flag.
    pub metrics: Option<MetricsReport>,
    pub limits: DiagnosticLimits,
    /// Percent contribution of each variable to each component.
    pub variable_contributions: Option<Array2<f64>>,
    pub eigencorrelations: Option<EigencorrelationResult>,
    pub convergence: Vec<ComponentConvergence>,
    pub n_input_rows: usize,
    pub retained_rows: Vec<usize>,
    /// Rows removed by the `drop` missing-value strategy.
    pub removed_rows: Vec<usize>,
    pub retained_columns: Vec<usize>,
    pub imputed_cells: usize,
    /// Non-fatal problems encountered while fitting.
    pub warnings: Vec<String>,
}

impl PcaResult {
    pub fn n_components(&self) -> usize {
        self.eigenvalues.len()
    }

    /// Input row indices of samples flagged as outliers.
    pub fn outlier_rows(&self) -> Vec<usize> {
        self.metrics
            .as_ref()
            .map(|report| {
                report
                    .outlier_indices()
                    .into_iter()
                    .map(|i| self.retained_rows[i])
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Confidence ellipses per group in the `pc_x` / `pc_y` score plane.
    ///
    /// `groups` may hold one label per input row (rows that were excluded or
    /// dropped are then ignored) or one label per score row.
    ///
    /// # Errors
    /// [`PcaError::Data`] when `groups` matches neither length, plus every
    /// error of [`EllipseCalculator::group_ellipses`].
    pub fn group_ellipses(
        &self,
        groups: &[String],
        pc_x: usize,
        pc_y: usize,
        confidence_level: f64,
    ) -> Result<EllipseSet> {
        let calculator = EllipseCalculator::new(confidence_level)?;
        if groups.len() == self.scores.nrows() {
            return calculator.group_ellipses(&self.scores, groups, pc_x, pc_y);
        }
        if groups.len() != self.n_input_rows {
            return Err(PcaError::data(format!(
                "{} group labels for {} input rows ({} analysed)",
                groups.len(),
                self.n_input_rows,
                self.scores.nrows()
            )));
        }
        let aligned: Vec<String> = self.retained_rows.iter().map(|&r| groups[r].clone()).collect();
        calculator.group_ellipses(&self.scores, &aligned, pc_x, pc_y)
    }
}

/// Principal component analysis with preprocessing, missing-value handling
/// and outlier diagnostics.
///
/// A `PCA` starts empty, is fitted once with [`PCA::fit`] (or loaded from a
/// saved model) and can then project new samples with [`PCA::transform`].
#[derive(Debug, Clone, Default)]
pub struct PCA {
    config: Option<PcaConfig>,
    preprocessor: Option<Preprocessor>,
    model: Option<ModelComponents>,
    limits: Option<DiagnosticLimits>,
}

impl PCA {
    /// Creates an unfitted instance.
    ///
    /// ```
    /// use pca_diagnostics::PCA;
    /// let pca = PCA::new();
    /// assert!(!pca.is_fitted());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `config`, prepares `data` and extracts the components.
    ///
    /// Steps, in order: configuration checks, row/column exclusion,
    /// missing-value handling, preprocessing, decomposition, variance summary,
    /// control limits and per-sample diagnostics. Diagnostics that cannot be
    /// computed are reported in [`PcaResult::warnings`] instead of failing the
    /// fit.
    ///
    /// ```
    /// use pca_diagnostics::{DataMatrix, PcaConfig, PCA};
    ///
    /// let data = DataMatrix::from_rows(&[
    ///     vec![2.5, 2.4, 0.5],
    ///     vec![0.5, 0.7, 1.1],
    ///     vec![2.2, 2.9, 0.4],
    ///     vec![1.9, 2.2, 0.9],
    ///     vec![3.1, 3.0, 0.2],
    /// ])
    /// .unwrap();
    /// let mut pca = PCA::new();
    /// let result = pca.fit(&data, &PcaConfig::new(2)).unwrap();
    /// assert_eq!(result.scores.dim(), (5, 2));
    /// assert!(result.explained_variance[0] >= result.explained_variance[1]);
    /// ```
    ///
    /// # Errors
    /// [`PcaError::Validation`] for configuration problems (checked before any
    /// computation), [`PcaError::Data`] when the data cannot support the
    /// request, [`PcaError::Numerical`] when a factorisation fails.
    pub fn fit(&mut self, data: &DataMatrix, config: &PcaConfig) -> Result<PcaResult> {
        self.fit_inner(data, config, None)
    }

    /// Like [`PCA::fit`], additionally correlating scores with per-sample
    /// metadata. `metadata` is aligned to the rows of `data`.
    pub fn fit_with_metadata(
        &mut self,
        data: &DataMatrix,
        config: &PcaConfig,
        metadata: &SampleMetadata,
    ) -> Result<PcaResult> {
        self.fit_inner(data, config, Some(metadata))
    }

    fn fit_inner(
        &mut self,
        data: &DataMatrix,
        config: &PcaConfig,
        metadata: Option<&SampleMetadata>,
    ) -> Result<PcaResult> {
        config.validate()?;
        let mut config = config.clone();
        if config.components == 0 {
            info!("No component count requested; using {}", DEFAULT_COMPONENTS);
        }
        let k = config.effective_components();
        config.components = k;
        if let Some(meta) = metadata {
            meta.validate_len(data.nrows())?;
        }

        let (reduced, kept_rows, kept_columns) =
            data.exclude(&config.excluded_rows, &config.excluded_columns)?;
        info!(
            "Fitting {} PCA with {} component(s) on {} samples x {} variables",
            config.method,
            k,
            reduced.nrows(),
            reduced.ncols()
        );

        let mut warnings = Vec::new();
        let outcome = MissingValueHandler::new(config.missing_strategy).handle(&reduced)?;
        let mut dropped = vec![false; kept_rows.len()];
        for &r in &outcome.removed_rows {
            dropped[r] = true;
        }
        let removed_rows: Vec<usize> = outcome.removed_rows.iter().map(|&r| kept_rows[r]).collect();
        let retained_rows: Vec<usize> = kept_rows
            .iter()
            .zip(&dropped)
            .filter(|(_, d)| !**d)
            .map(|(&r, _)| r)
            .collect();
        if !removed_rows.is_empty() {
            warnings.push(format!(
                "{} row(s) with missing values were dropped",
                removed_rows.len()
            ));
        }

        if config.method == Method::Kernel {
            let (kept, dropped) = config.preprocessing.for_kernel();
            if !dropped.is_empty() {
                warn!(
                    "Kernel PCA centres in feature space; ignoring {}",
                    dropped.join(", ")
                );
                warnings.push(format!(
                    "kernel PCA ignores column preprocessing: {}",
                    dropped.join(", ")
                ));
                config.preprocessing = kept;
            }
        }
        let mut preprocessor = Preprocessor::new(config.preprocessing);
        let prepared = preprocessor.fit_transform(&outcome.data)?;
        let params = preprocessor
            .fitted_parameters()
            .cloned()
            .ok_or(PcaError::NotFitted)?;
        if !params.guarded_columns.is_empty() {
            warnings.push(format!(
                "{} column(s) had near-zero spread; their scale was set to 1",
                params.guarded_columns.len()
            ));
        }

        let decomposition = PcaEngine::from_config(&config).fit(&prepared, k)?;
        for c in decomposition.convergence.iter().filter(|c| !c.converged) {
            warnings.push(format!(
                "{} did not converge within {} iterations (last change {:.3e})",
                component_label(c.component - 1),
                c.iterations,
                c.final_change
            ));
        }

        let (explained_variance, cumulative_variance) =
            variance_summary(&decomposition.eigenvalues, decomposition.total_variance);
        let component_labels: Vec<String> = (0..k).map(component_label).collect();
        debug!("Explained variance (%): {:?}", explained_variance);

        let calculator = MetricsCalculator::new(config.confidence_level)?;
        let limits = calculator.limits(
            prepared.nrows(),
            k,
            decomposition.residual_spectrum.as_ref(),
            decomposition.total_variance,
        );
        let metrics = match &decomposition.loadings {
            Some(loadings) => match calculator.calculate(
                &prepared,
                &decomposition.scores,
                loadings,
                &decomposition.eigenvalues,
                limits.clone(),
            ) {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!("Sample diagnostics unavailable: {}", e);
                    warnings.push(format!("sample diagnostics unavailable: {}", e));
                    None
                }
            },
            None => {
                debug!("No feature-space loadings; skipping T² and Q diagnostics");
                None
            }
        };

        let eigencorrelations = match metadata.filter(|m| !m.is_empty()) {
            Some(meta) => match EigencorrelationCalculator::new(config.correlation_method)
                .calculate(&decomposition.scores, &meta.select_rows(&retained_rows))
            {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!("Eigencorrelations unavailable: {}", e);
                    warnings.push(format!("eigencorrelations unavailable: {}", e));
                    None
                }
            },
            None => None,
        };

        let result = PcaResult {
            scores: decomposition.scores,
            loadings: decomposition.loadings.clone(),
            eigenvalues: decomposition.eigenvalues.clone(),
            explained_variance: explained_variance.clone(),
            cumulative_variance: cumulative_variance.clone(),
            component_labels: component_labels.clone(),
            method: config.method,
            total_variance: decomposition.total_variance,
            all_eigenvalues: decomposition.all_eigenvalues,
            preprocessing: params,
            metrics,
            limits: limits.clone(),
            variable_contributions: decomposition.loadings.as_ref().map(variable_contributions),
            eigencorrelations,
            convergence: decomposition.convergence,
            n_input_rows: data.nrows(),
            retained_rows,
            removed_rows,
            retained_columns: kept_columns.clone(),
            imputed_cells: outcome.imputed_cells,
            warnings,
        };

        self.model = Some(ModelComponents {
            method: config.method,
            loadings: decomposition.loadings,
            eigenvalues: decomposition.eigenvalues,
            explained_variance,
            cumulative_variance,
            component_labels,
            n_input_columns: data.ncols(),
            retained_columns: kept_columns,
            kernel: decomposition.kernel_model,
        });
        self.preprocessor = Some(preprocessor);
        self.limits = Some(limits);
        self.config = Some(config);
        Ok(result)
    }

    /// Projects new samples into the fitted component space.
    ///
    /// `data` must have the same columns as the matrix the model was fitted
    /// on; excluded columns are dropped and the stored preprocessing is
    /// replayed. Masked cells are skipped for linear models; kernel models
    /// need complete rows.
    ///
    /// # Errors
    /// [`PcaError::NotFitted`], [`PcaError::DimensionMismatch`], or
    /// [`PcaError::Data`] for missing cells under kernel PCA.
    pub fn transform(&self, data: &DataMatrix) -> Result<Array2<f64>> {
        let prepared = self.prepare(data)?;
        let model = self.fitted_model()?;
        match (&model.loadings, &model.kernel) {
            (Some(loadings), _) => Ok(project_linear(&prepared, loadings)),
            (None, Some(kernel)) => {
                require_complete(&prepared, Method::Kernel)?;
                kernel.transform(prepared.values())
            }
            (None, None) => Err(PcaError::Model(
                "fitted model has neither loadings nor kernel data".to_string(),
            )),
        }
    }

    /// T², Mahalanobis distance, RSS and outlier flags for new samples,
    /// judged against the limits learned at fit time.
    ///
    /// # Errors
    /// [`PcaError::Validation`] for kernel models, which have no loadings,
    /// plus the errors of [`PCA::transform`].
    pub fn diagnose(&self, data: &DataMatrix) -> Result<MetricsReport> {
        let model = self.fitted_model()?;
        let loadings = model.loadings.as_ref().ok_or_else(|| {
            PcaError::validation(
                "method",
                "T² and Q diagnostics need feature-space loadings, which kernel PCA does not have",
            )
        })?;
        let limits = self.limits.clone().ok_or(PcaError::NotFitted)?;
        let prepared = self.prepare(data)?;
        let scores = project_linear(&prepared, loadings);
        MetricsCalculator::new(limits.confidence_level)?.calculate(
            &prepared,
            &scores,
            loadings,
            &model.eigenvalues,
            limits,
        )
    }

    /// Maps scores back to the original variable scale (retained columns only).
    ///
    /// Row-wise preprocessing is not undone.
    pub fn inverse_transform(&self, scores: &Array2<f64>) -> Result<Array2<f64>> {
        let model = self.fitted_model()?;
        let loadings = model.loadings.as_ref().ok_or_else(|| {
            PcaError::validation("method", "kernel PCA has no linear reconstruction")
        })?;
        if scores.ncols() != loadings.ncols() {
            return Err(PcaError::DimensionMismatch {
                expected: loadings.ncols(),
                found: scores.ncols(),
            });
        }
        let preprocessor = self.preprocessor.as_ref().ok_or(PcaError::NotFitted)?;
        preprocessor.inverse_transform(&reconstruct(scores, loadings))
    }

    fn fitted_model(&self) -> Result<&ModelComponents> {
        self.model.as_ref().ok_or(PcaError::NotFitted)
    }

    fn prepare(&self, data: &DataMatrix) -> Result<DataMatrix> {
        let model = self.fitted_model()?;
        let preprocessor = self.preprocessor.as_ref().ok_or(PcaError::NotFitted)?;
        if data.ncols() != model.n_input_columns {
            return Err(PcaError::DimensionMismatch {
                expected: model.n_input_columns,
                found: data.ncols(),
            });
        }
        if model.retained_columns.len() == data.ncols() {
            return preprocessor.transform(data);
        }
        let rows: Vec<usize> = (0..data.nrows()).collect();
        preprocessor.transform(&data.select(&rows, &model.retained_columns))
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    /// Effective configuration of the last fit (zero components resolved).
    pub fn config(&self) -> Option<&PcaConfig> {
        self.config.as_ref()
    }

    pub fn method(&self) -> Option<Method> {
        self.model.as_ref().map(|m| m.method)
    }

    pub fn components(&self) -> Option<&ModelComponents> {
        self.model.as_ref()
    }

    pub fn loadings(&self) -> Option<&Array2<f64>> {
        self.model.as_ref().and_then(|m| m.loadings.as_ref())
    }

    pub fn eigenvalues(&self) -> Option<&Array1<f64>> {
        self.model.as_ref().map(|m| &m.eigenvalues)
    }

    pub fn explained_variance(&self) -> Option<&[f64]> {
        self.model.as_ref().map(|m| m.explained_variance.as_slice())
    }

    pub fn preprocessing_parameters(&self) -> Option<&PreprocessingParams> {
        self.preprocessor
            .as_ref()
            .and_then(|p| p.fitted_parameters())
    }

    pub fn limits(&self) -> Option<&DiagnosticLimits> {
        self.limits.as_ref()
    }

    /// Snapshot of the fitted model for persistence.
    pub fn to_document(&self) -> Result<ModelDocument> {
        let config = self.config.clone().ok_or(PcaError::NotFitted)?;
        let preprocessing = self
            .preprocessing_parameters()
            .cloned()
            .ok_or(PcaError::NotFitted)?;
        let model = self.fitted_model()?.clone();
        let limits = self.limits.clone().ok_or(PcaError::NotFitted)?;
        Ok(ModelDocument::new(config, preprocessing, model, limits))
    }

    /// Rebuilds a fitted instance from a validated document.
    pub fn from_document(document: ModelDocument) -> Result<Self> {
        document.validate()?;
        let preprocessor = Preprocessor::from_parameters(document.preprocessing)?;
        Ok(Self {
            config: Some(document.config),
            preprocessor: Some(preprocessor),
            model: Some(document.model),
            limits: Some(document.diagnostics),
        })
    }

    /// Saves the fitted model to `path` in a compact binary format.
    ///
    /// # Errors
    /// [`PcaError::NotFitted`] for an unfitted instance, or an I/O or
    /// encoding error.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let document = self.to_document()?;
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        document.write_binary(&mut writer)?;
        writer.flush()?;
        info!("Saved PCA model to {:?}", path.as_ref());
        Ok(())
    }

    /// Loads a model written by [`PCA::save_model`].
    ///
    /// # Errors
    /// I/O and decoding errors, or [`PcaError::Model`] when the stored model
    /// has an unknown format version or inconsistent dimensions.
    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        let document = ModelDocument::read_binary(&mut reader)?;
        debug!(
            "Loaded {} model written by {} {}",
            document.model.method, document.software, document.software_version
        );
        Self::from_document(document)
    }

    /// Saves the fitted model as human-readable JSON.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let document = self.to_document()?;
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        document.write_json(&mut writer)?;
        writer.flush()?;
        info!("Saved PCA model as JSON to {:?}", path.as_ref());
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        Self::from_document(ModelDocument::read_json(reader)?)
    }
}

/// Percent explained and cumulative percent per component.
fn variance_summary(eigenvalues: &Array1<f64>, total_variance: f64) -> (Vec<f64>, Vec<f64>) {
    let explained: Vec<f64> = eigenvalues
        .iter()
        .map(|&l| if total_variance > 0.0 { 100.0 * l / total_variance } else { 0.0 })
        .collect();
    let cumulative = explained
        .iter()
        .scan(0.0, |acc, &v| {
            *acc += v;
            Some((*acc).min(100.0))
        })
        .collect();
    (explained, cumulative)
}

/// Scores for preprocessed rows.
///
/// Each component is fitted on the row's present cells and then deflated, so
/// new rows are scored exactly as NIPALS scored its training rows. With
/// orthonormal loadings this reduces to `X·P`.
fn project_linear(data: &DataMatrix, loadings: &Array2<f64>) -> Array2<f64> {
    let k = loadings.ncols();
    let mut scores = Array2::<f64>::zeros((data.nrows(), k));
    for (i, (row, mask)) in data
        .values()
        .outer_iter()
        .zip(data.mask().outer_iter())
        .enumerate()
    {
        let mut residual = row.to_owned();
        for a in 0..k {
            let p = loadings.column(a);
            let (mut num, mut den) = (0.0, 0.0);
            for j in 0..p.len() {
                if mask[j] {
                    num += residual[j] * p[j];
                    den += p[j] * p[j];
                }
            }
            let t = if den > 0.0 { num / den } else { 0.0 };
            scores[[i, a]] = t;
            residual.scaled_add(-t, &p);
        }
    }
    scores
}
