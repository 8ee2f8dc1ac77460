//! Benchmarks for the pyramid hot paths.
//!
//! Run with: `cargo bench`
//!
//! Synthetic rasters only, so no fixture files are needed:
//! - Reprojection from geographic coordinates
//! - 8-bit normalization
//! - Full pyramid build into memory

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use geopyramid::{
    Crs, GeoTransform, MemoryTileStore, NormalizeOptions, PyramidBuilder, PyramidConfig, Raster,
    ResamplingMethod, Reprojector, ZoomRange, normalize,
};

fn geographic_raster(size: usize) -> Raster<f32> {
    let data = (0..size * size)
        .map(|i| ((i % size) as f32).sin() * 100.0 + (i / size) as f32)
        .collect();
    let res = 2.0 / size as f64;
    let t = GeoTransform::from_origin(5.0, 47.0, res, res);
    Raster::from_vec(size, size, 1, data, Crs::WGS84, t).unwrap()
}

fn bench_reproject(c: &mut Criterion) {
    let raster = geographic_raster(1024);
    let mut group = c.benchmark_group("reproject");
    group.sample_size(10);

    for method in [ResamplingMethod::Nearest, ResamplingMethod::Bilinear] {
        group.bench_with_input(BenchmarkId::new("method", method), &method, |b, &method| {
            b.iter(|| {
                Reprojector::new(black_box(&raster))
                    .resampling(Some(method))
                    .reproject()
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let raster = geographic_raster(1024);
    c.bench_function("normalize_per_band", |b| {
        b.iter(|| normalize(black_box(&raster), &NormalizeOptions::default()).unwrap());
    });
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    group.sample_size(10);

    for max_zoom in [6u8, 8] {
        let config = PyramidConfig::default().with_zoom(ZoomRange::new(4, max_zoom).unwrap());
        let builder = PyramidBuilder::new(config).unwrap();
        let prepared = builder
            .prepare(&geographic_raster(1024).into())
            .unwrap();

        group.bench_with_input(BenchmarkId::new("max_zoom", max_zoom), &prepared, |b, raster| {
            b.iter(|| {
                let store = MemoryTileStore::new();
                builder.build(black_box(raster), &store).unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reproject, bench_normalize, bench_build);
criterion_main!(benches);
