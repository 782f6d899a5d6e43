// In tests/iris_tests.rs

use approx::assert_abs_diff_eq;
use ndarray::ArrayView2;
use pca_diagnostics::{
    DataMatrix, Method, PcaConfig, PreprocessingFlags, SampleMetadata, PCA,
};
use std::fs;
use std::path::PathBuf;

const SIGN_TOLERANCE: f64 = 1e-5;

fn load_iris() -> (DataMatrix, Vec<String>) {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/iris.csv");
    let text = fs::read_to_string(&path).expect("iris fixture should be readable");
    let mut rows = Vec::new();
    let mut species = Vec::new();
    for line in text.lines().skip(1).filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split(',').collect();
        rows.push(
            fields[..4]
                .iter()
                .map(|f| f.parse::<f64>().expect("numeric field"))
                .collect::<Vec<f64>>(),
        );
        species.push(fields[4].to_string());
    }
    (DataMatrix::from_rows(&rows).expect("valid matrix"), species)
}

fn assert_columns_close_with_sign_flips(
    a: ArrayView2<f64>,
    b: ArrayView2<f64>,
    tolerance: f64,
    context: &str,
) {
    assert_eq!(a.dim(), b.dim(), "dimensions differ for {}", context);
    for c in 0..a.ncols() {
        let sign = if a.column(c).dot(&b.column(c)) < 0.0 { -1.0 } else { 1.0 };
        for (i, (x, y)) in a.column(c).iter().zip(b.column(c).iter()).enumerate() {
            assert!(
                (x - sign * y).abs() < tolerance,
                "mismatch at ({}, {}) for {}: {} vs {}",
                i,
                c,
                context,
                x,
                sign * y
            );
        }
    }
}

#[test]
fn standardized_iris_variance_split() {
    let (data, _) = load_iris();
    let config = PcaConfig::new(2).with_preprocessing(PreprocessingFlags::standard());
    let result = PCA::new().fit(&data, &config).expect("iris fit");

    assert!(result.explained_variance[0] > 72.0 && result.explained_variance[0] < 74.0);
    assert!(result.cumulative_variance[1] > 95.0 && result.cumulative_variance[1] < 97.0);
    assert_abs_diff_eq!(result.eigenvalues[0], 2.9185, epsilon = 1e-3);
    assert_abs_diff_eq!(result.eigenvalues[1], 0.9140, epsilon = 1e-3);
    // standardized data: total variance equals the variable count
    assert_abs_diff_eq!(result.total_variance, 4.0, epsilon = 1e-9);

    let all = result.all_eigenvalues.as_ref().expect("svd keeps the spectrum");
    assert_eq!(all.len(), 4);
    assert_abs_diff_eq!(all.iter().sum::<f64>(), 4.0, epsilon = 1e-9);
}

#[test]
fn covariance_iris_is_dominated_by_petal_length() {
    let (data, _) = load_iris();
    let result = PCA::new().fit(&data, &PcaConfig::new(2)).expect("iris fit");
    assert_abs_diff_eq!(result.explained_variance[0], 92.46, epsilon = 0.05);

    let contributions = result.variable_contributions.as_ref().expect("linear model");
    let pc1 = contributions.column(0);
    let top = (0..4)
        .max_by(|&a, &b| pc1[a].total_cmp(&pc1[b]))
        .expect("four variables");
    assert_eq!(top, 2, "petal length should lead PC1, got {:?}", pc1);
    assert_abs_diff_eq!(pc1.sum(), 100.0, epsilon = 1e-9);
}

#[test]
fn nipals_agrees_with_svd_on_iris() {
    let (data, _) = load_iris();
    let base = PcaConfig::new(3).with_preprocessing(PreprocessingFlags::standard());
    let svd = PCA::new().fit(&data, &base).expect("svd fit");
    let nipals = PCA::new()
        .fit(&data, &base.clone().with_method(Method::Nipals))
        .expect("nipals fit");

    assert!(nipals.convergence.iter().all(|c| c.converged));
    for (a, b) in svd.eigenvalues.iter().zip(nipals.eigenvalues.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-6);
    }
    assert_columns_close_with_sign_flips(
        svd.scores.view(),
        nipals.scores.view(),
        SIGN_TOLERANCE,
        "iris scores",
    );
    assert_columns_close_with_sign_flips(
        svd.loadings.as_ref().expect("svd loadings").view(),
        nipals.loadings.as_ref().expect("nipals loadings").view(),
        SIGN_TOLERANCE,
        "iris loadings",
    );
}

#[test]
fn species_ellipses_cover_their_groups() {
    let (data, species) = load_iris();
    let config = PcaConfig::new(2).with_preprocessing(PreprocessingFlags::standard());
    let result = PCA::new().fit(&data, &config).expect("iris fit");
    let set = result
        .group_ellipses(&species, 0, 1, 0.95)
        .expect("three species ellipses");

    assert_eq!(set.ellipses.len(), 3);
    assert!(!set.is_partial());
    for (name, ellipse) in &set.ellipses {
        assert_eq!(ellipse.n_points, 50);
        assert!(ellipse.semi_major >= ellipse.semi_minor);
        let inside = result
            .scores
            .outer_iter()
            .zip(&species)
            .filter(|(_, s)| *s == name)
            .filter(|(row, _)| ellipse.contains(row[0], row[1]))
            .count();
        assert!(inside >= 42, "{} of 50 {} samples inside", inside, name);
    }
}

#[test]
fn species_indicator_tracks_first_component() {
    let (data, species) = load_iris();
    let metadata = SampleMetadata::new().with_categorical("species", species);
    let config = PcaConfig::new(2).with_preprocessing(PreprocessingFlags::standard());
    let result = PCA::new()
        .fit_with_metadata(&data, &config, &metadata)
        .expect("iris fit");

    let ec = result.eigencorrelations.as_ref().expect("metadata supplied");
    assert_eq!(
        ec.variables,
        vec!["species_setosa", "species_versicolor", "species_virginica"]
    );
    let setosa_pc1 = ec.correlations["species_setosa"][0];
    assert!(setosa_pc1.abs() > 0.9, "setosa vs PC1 r = {}", setosa_pc1);
    assert!(ec.p_values["species_setosa"][0] < 1e-10);
}
