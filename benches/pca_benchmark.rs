use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::{Array, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use pca_diagnostics::{
    DataMatrix, KernelParams, Method, MissingStrategy, PcaConfig, PreprocessingFlags, PCA,
};

fn generate_data(n_samples: usize, n_features: usize) -> Array2<f64> {
    Array::random((n_samples, n_features), Uniform::new(0., 10.))
}

/// Masks roughly every `stride`-th cell.
fn with_holes(values: &Array2<f64>, stride: usize) -> DataMatrix {
    let rows: Vec<Vec<f64>> = values
        .outer_iter()
        .enumerate()
        .map(|(i, row)| {
            row.iter()
                .enumerate()
                .map(|(j, &v)| if (i * 7 + j) % stride == 0 && j > 0 { f64::NAN } else { v })
                .collect()
        })
        .collect();
    DataMatrix::from_rows(&rows).unwrap()
}

fn bench_methods(c: &mut Criterion) {
    let mut group = c.benchmark_group("PCA_fit");
    let standard = PreprocessingFlags::standard();

    for &(n_samples, n_features) in [(100, 50), (500, 100), (100, 400)].iter() {
        let data = DataMatrix::from_array(generate_data(n_samples, n_features)).unwrap();
        let label = format!("{}x{}", n_samples, n_features);
        group.throughput(Throughput::Elements((n_samples * n_features) as u64));

        let configs = [
            ("svd", PcaConfig::new(10).with_preprocessing(standard)),
            (
                "nipals",
                PcaConfig::new(10)
                    .with_preprocessing(standard)
                    .with_method(Method::Nipals),
            ),
        ];
        for (name, config) in configs {
            group.bench_with_input(BenchmarkId::new(name, &label), &data, |b, data| {
                b.iter(|| PCA::new().fit(data, &config).unwrap());
            });
        }
    }
    group.finish();
}

fn bench_kernel(c: &mut Criterion) {
    let mut group = c.benchmark_group("PCA_kernel");
    group.sample_size(20);
    for &n_samples in [100usize, 300].iter() {
        let data = DataMatrix::from_array(generate_data(n_samples, 20)).unwrap();
        let config = PcaConfig::new(5)
            .with_method(Method::Kernel)
            .with_kernel(KernelParams::default());
        group.throughput(Throughput::Elements((n_samples * n_samples) as u64));
        group.bench_with_input(BenchmarkId::new("rbf", n_samples), &data, |b, data| {
            b.iter(|| PCA::new().fit(data, &config).unwrap());
        });
    }
    group.finish();
}

fn bench_native_missing(c: &mut Criterion) {
    let mut group = c.benchmark_group("PCA_native_missing");
    let values = generate_data(300, 60);
    let data = with_holes(&values, 13);
    let config = PcaConfig::new(5)
        .with_method(Method::Nipals)
        .with_missing_strategy(MissingStrategy::Native);
    group.bench_function("nipals_300x60", |b| {
        b.iter(|| PCA::new().fit(&data, &config).unwrap());
    });
    group.finish();
}

fn bench_transform(c: &mut Criterion) {
    let train = DataMatrix::from_array(generate_data(500, 100)).unwrap();
    let fresh = DataMatrix::from_array(generate_data(1000, 100)).unwrap();
    let mut pca = PCA::new();
    pca.fit(&train, &PcaConfig::new(10)).unwrap();
    c.bench_function("PCA_transform_1000x100", |b| {
        b.iter(|| pca.transform(&fresh).unwrap());
    });
}

criterion_group!(
    benches,
    bench_methods,
    bench_kernel,
    bench_native_missing,
    bench_transform
);
criterion_main!(benches);
