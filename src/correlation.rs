// src/correlation.rs

use crate::error::{PcaError, Result};
use crate::stats::{average_ranks, mean, pearson, sample_std};
use log::{debug, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Observations needed for a correlation with a defined p-value.
pub const MIN_OBSERVATIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    /// Pearson correlation of average ranks.
    Spearman,
}

impl FromStr for CorrelationMethod {
    type Err = PcaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pearson" => Ok(CorrelationMethod::Pearson),
            "spearman" => Ok(CorrelationMethod::Spearman),
            _ => Err(PcaError::validation(
                "correlation method",
                format!("unknown value '{}'; expected one of: pearson, spearman", s),
            )),
        }
    }
}

impl fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CorrelationMethod::Pearson => "pearson",
            CorrelationMethod::Spearman => "spearman",
        })
    }
}

/// Per-sample external variables kept out of the analysis matrix.
///
/// Numeric values use NaN for missing; categorical values use the empty
/// string for missing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SampleMetadata {
    pub numeric: BTreeMap<String, Vec<f64>>,
    pub categorical: BTreeMap<String, Vec<String>>,
}

impl SampleMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_numeric(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.numeric.insert(name.into(), values);
        self
    }

    pub fn with_categorical(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.categorical.insert(name.into(), values);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.numeric.is_empty() && self.categorical.is_empty()
    }

    /// Checks that every column has `n_rows` entries.
    pub fn validate_len(&self, n_rows: usize) -> Result<()> {
        let lengths = self
            .numeric
            .iter()
            .map(|(k, v)| (k, v.len()))
            .chain(self.categorical.iter().map(|(k, v)| (k, v.len())));
        for (name, len) in lengths {
            if len != n_rows {
                return Err(PcaError::data(format!(
                    "metadata variable '{}' has {} values, expected {}",
                    name, len, n_rows
                )));
            }
        }
        Ok(())
    }

    /// Metadata restricted to `rows`, in that order.
    pub fn select_rows(&self, rows: &[usize]) -> SampleMetadata {
        SampleMetadata {
            numeric: self
                .numeric
                .iter()
                .map(|(k, v)| (k.clone(), rows.iter().map(|&i| v[i]).collect()))
                .collect(),
            categorical: self
                .categorical
                .iter()
                .map(|(k, v)| (k.clone(), rows.iter().map(|&i| v[i].clone()).collect()))
                .collect(),
        }
    }
}

/// A metadata variable that produced no correlations, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedVariable {
    pub name: String,
    pub reason: String,
}

/// Correlations between component scores and metadata variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EigencorrelationResult {
    /// Variable name to one coefficient per entry of `components`.
    pub correlations: BTreeMap<String, Vec<f64>>,
    /// Two-sided p-values parallel to `correlations`.
    pub p_values: BTreeMap<String, Vec<f64>>,
    /// Variables that were correlated, sorted.
    pub variables: Vec<String>,
    /// Component labels ("PC1", ...) in column order.
    pub components: Vec<String>,
    pub method: CorrelationMethod,
    pub skipped: Vec<SkippedVariable>,
}

/// Correlates score columns with numeric and one-hot encoded categorical metadata.
#[derive(Debug, Clone, Default)]
pub struct EigencorrelationCalculator {
    method: CorrelationMethod,
    components: Option<Vec<usize>>,
}

impl EigencorrelationCalculator {
    pub fn new(method: CorrelationMethod) -> Self {
        Self {
            method,
            components: None,
        }
    }

    /// Restricts the analysis to these 0-based component indices.
    pub fn with_components(mut self, components: Vec<usize>) -> Self {
        self.components = Some(components);
        self
    }

    /// # Errors
    /// [`PcaError::Validation`] for an out-of-range component index and
    /// [`PcaError::Data`] when a metadata column length differs from the
    /// number of score rows or no component has variance.
    pub fn calculate(
        &self,
        scores: &Array2<f64>,
        metadata: &SampleMetadata,
    ) -> Result<EigencorrelationResult> {
        let (n_samples, n_components) = scores.dim();
        metadata.validate_len(n_samples)?;
        let requested: Vec<usize> = match &self.components {
            Some(list) => list.clone(),
            None => (0..n_components).collect(),
        };
        if let Some(&bad) = requested.iter().find(|&&c| c >= n_components) {
            return Err(PcaError::validation(
                "components",
                format!("index {} out of range for {} component(s)", bad, n_components),
            ));
        }

        let mut skipped = Vec::new();
        let mut used = Vec::new();
        for &c in &requested {
            let column = scores.column(c).to_vec();
            if sample_std(&column, mean(&column)) > 0.0 {
                used.push(c);
            } else {
                skipped.push(SkippedVariable {
                    name: component_label(c),
                    reason: "component scores have zero variance".to_string(),
                });
            }
        }
        if used.is_empty() {
            return Err(PcaError::data("no selected component has non-zero score variance"));
        }
        let score_columns: Vec<Vec<f64>> = used.iter().map(|&c| scores.column(c).to_vec()).collect();

        let mut variables: Vec<(String, Vec<f64>)> = metadata
            .numeric
            .iter()
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect();
        for (name, values) in &metadata.categorical {
            variables.extend(one_hot(name, values));
        }
        let mut name_counts: BTreeMap<String, usize> = BTreeMap::new();
        for (name, _) in &variables {
            *name_counts.entry(name.clone()).or_insert(0) += 1;
        }

        let mut correlations = BTreeMap::new();
        let mut p_values = BTreeMap::new();
        for (name, values) in variables {
            if name_counts.get(&name).copied().unwrap_or(0) > 1 {
                let reason = "name is shared by more than one metadata variable".to_string();
                warn!("Eigencorrelation omitted for '{}': {}", name, reason);
                skipped.push(SkippedVariable { name, reason });
                continue;
            }
            match self.correlate_variable(&score_columns, &values) {
                Ok((r, p)) => {
                    correlations.insert(name.clone(), r);
                    p_values.insert(name, p);
                }
                Err(reason) => {
                    warn!("Eigencorrelation omitted for '{}': {}", name, reason);
                    skipped.push(SkippedVariable { name, reason });
                }
            }
        }
        let variables: Vec<String> = correlations.keys().cloned().collect();
        debug!(
            "Eigencorrelations: {} variable(s) x {} component(s) by {}",
            variables.len(),
            used.len(),
            self.method
        );

        Ok(EigencorrelationResult {
            correlations,
            p_values,
            variables,
            components: used.iter().map(|&c| component_label(c)).collect(),
            method: self.method,
            skipped,
        })
    }

    fn correlate_variable(
        &self,
        score_columns: &[Vec<f64>],
        values: &[f64],
    ) -> std::result::Result<(Vec<f64>, Vec<f64>), String> {
        let kept: Vec<usize> = (0..values.len()).filter(|&i| values[i].is_finite()).collect();
        if kept.len() < MIN_OBSERVATIONS {
            return Err(format!(
                "{} observation(s) after removing missing values; at least {} are required",
                kept.len(),
                MIN_OBSERVATIONS
            ));
        }
        let y: Vec<f64> = kept.iter().map(|&i| values[i]).collect();
        if sample_std(&y, mean(&y)) <= 0.0 {
            return Err("variable has zero variance".to_string());
        }
        let y = match self.method {
            CorrelationMethod::Pearson => y,
            CorrelationMethod::Spearman => average_ranks(&y),
        };

        let mut rs = Vec::with_capacity(score_columns.len());
        let mut ps = Vec::with_capacity(score_columns.len());
        for column in score_columns {
            let x: Vec<f64> = kept.iter().map(|&i| column[i]).collect();
            let x = match self.method {
                CorrelationMethod::Pearson => x,
                CorrelationMethod::Spearman => average_ranks(&x),
            };
            let r = pearson(&x, &y)
                .ok_or_else(|| "scores are constant over the observed samples".to_string())?;
            rs.push(r);
            ps.push(correlation_p_value(r, kept.len()));
        }
        Ok((rs, ps))
    }
}

/// "PC1"-style label for a 0-based component index.
pub fn component_label(index: usize) -> String {
    format!("PC{}", index + 1)
}

/// Two-sided p-value of a correlation coefficient from `n` observations,
/// using Student's t with n − 2 degrees of freedom.
pub fn correlation_p_value(r: f64, n: usize) -> f64 {
    if n < MIN_OBSERVATIONS {
        return 1.0;
    }
    let r2 = r * r;
    if r2 >= 1.0 - 1e-15 {
        return 0.0;
    }
    let df = (n - 2) as f64;
    let t = r.abs() * (df / (1.0 - r2)).sqrt();
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

/// One indicator column per distinct non-empty category, named `<name>_<category>`.
/// Empty labels are missing (NaN) in every indicator.
fn one_hot(name: &str, values: &[String]) -> Vec<(String, Vec<f64>)> {
    let categories: BTreeSet<&str> = values
        .iter()
        .map(String::as_str)
        .filter(|c| !c.is_empty())
        .collect();
    categories
        .into_iter()
        .map(|cat| {
            let indicator = values
                .iter()
                .map(|v| {
                    if v.is_empty() {
                        f64::NAN
                    } else if v == cat {
                        1.0
                    } else {
                        0.0
                    }
                })
                .collect();
            (format!("{}_{}", name, cat), indicator)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn scores() -> Array2<f64> {
        array![
            [1.0, 0.3],
            [2.0, -0.1],
            [3.0, 0.4],
            [4.0, -0.2],
            [5.0, 0.0],
            [6.0, 0.1]
        ]
    }

    #[test]
    fn numeric_correlation_with_pairwise_deletion() {
        let metadata = SampleMetadata::new()
            .with_numeric("dose", vec![2.0, 4.0, f64::NAN, 8.0, 10.0, 12.0]);
        let result = EigencorrelationCalculator::new(CorrelationMethod::Pearson)
            .calculate(&scores(), &metadata)
            .unwrap();
        assert_eq!(result.components, vec!["PC1", "PC2"]);
        let r = &result.correlations["dose"];
        assert_abs_diff_eq!(r[0], 1.0, epsilon = 1e-12);
        assert_eq!(result.p_values["dose"][0], 0.0);
        assert!(r[1].abs() < 1.0);
        assert!(result.p_values["dose"][1] > 0.0 && result.p_values["dose"][1] <= 1.0);
    }

    #[test]
    fn p_value_matches_t_distribution() {
        // r = 0.5, n = 12: t = 0.5·√(10/0.75) = 1.8257, two-sided p ≈ 0.0979
        assert_abs_diff_eq!(correlation_p_value(0.5, 12), 0.0979, epsilon = 5e-4);
        assert_abs_diff_eq!(correlation_p_value(0.0, 12), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn categorical_is_one_hot_encoded() {
        let labels = ["a", "a", "a", "b", "b", ""].iter().map(|s| s.to_string()).collect();
        let metadata = SampleMetadata::new().with_categorical("site", labels);
        let result = EigencorrelationCalculator::new(CorrelationMethod::Pearson)
            .calculate(&scores(), &metadata)
            .unwrap();
        assert_eq!(result.variables, vec!["site_a", "site_b"]);
        // with the empty label removed the two indicators are complementary
        assert_abs_diff_eq!(
            result.correlations["site_a"][0],
            -result.correlations["site_b"][0],
            epsilon = 1e-12
        );
        assert!(result.correlations["site_a"][0] < 0.0);
    }

    #[test]
    fn spearman_is_rank_based() {
        let metadata = SampleMetadata::new().with_numeric("growth", vec![1.0, 8.0, 27.0, 64.0, 125.0, 216.0]);
        let result = EigencorrelationCalculator::new(CorrelationMethod::Spearman)
            .calculate(&scores(), &metadata)
            .unwrap();
        assert_abs_diff_eq!(result.correlations["growth"][0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn constant_and_sparse_variables_are_skipped() {
        let metadata = SampleMetadata::new()
            .with_numeric("flat", vec![1.0; 6])
            .with_numeric("sparse", vec![1.0, f64::NAN, f64::NAN, f64::NAN, f64::NAN, 2.0])
            .with_numeric("ok", vec![3.0, 1.0, 4.0, 1.0, 5.0, 9.0]);
        let result = EigencorrelationCalculator::new(CorrelationMethod::Pearson)
            .calculate(&scores(), &metadata)
            .unwrap();
        assert_eq!(result.variables, vec!["ok"]);
        let names: Vec<&str> = result.skipped.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["flat", "sparse"]);
    }

    #[test]
    fn clashing_variable_names_are_reported() {
        let site: Vec<String> = ["a", "b", "a", "b", "a", "b"].iter().map(|s| s.to_string()).collect();
        let metadata = SampleMetadata::new()
            .with_numeric("site_a", vec![3.0, 1.0, 4.0, 1.0, 5.0, 9.0])
            .with_categorical("site", site);
        let result = EigencorrelationCalculator::new(CorrelationMethod::Pearson)
            .calculate(&scores(), &metadata)
            .unwrap();
        assert_eq!(result.variables, vec!["site_b"]);
        let clashes = result.skipped.iter().filter(|s| s.name == "site_a").count();
        assert_eq!(clashes, 2);
    }

    #[test]
    fn component_subset_and_validation() {
        let metadata = SampleMetadata::new().with_numeric("x", vec![1.0, 3.0, 2.0, 5.0, 4.0, 6.0]);
        let calc = EigencorrelationCalculator::new(CorrelationMethod::Pearson).with_components(vec![1]);
        let result = calc.calculate(&scores(), &metadata).unwrap();
        assert_eq!(result.components, vec!["PC2"]);
        assert_eq!(result.correlations["x"].len(), 1);
        let bad = EigencorrelationCalculator::new(CorrelationMethod::Pearson).with_components(vec![2]);
        assert!(bad.calculate(&scores(), &metadata).unwrap_err().is_validation());
        let short = SampleMetadata::new().with_numeric("x", vec![1.0]);
        assert!(calc.calculate(&scores(), &short).unwrap_err().is_data());
    }
}
