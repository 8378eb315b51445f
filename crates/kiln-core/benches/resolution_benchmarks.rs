use criterion::{criterion_group, criterion_main, Criterion};
use kiln_core::{close_features, resolve_stage, FeatureWiringResolver};
use kiln_fetch::{DownloadManager, MemorySource};
use kiln_schema::{BundleInfo, Dependency, Feature};
use std::sync::Arc;

/// A layered feature graph: each feature depends on a few in the layer below.
fn layered_universe(layers: usize, width: usize) -> Vec<Feature> {
    let mut universe = Vec::with_capacity(layers * width);
    for layer in 0..layers {
        for i in 0..width {
            let mut feature = Feature::new(format!("f{layer}-{i}"));
            feature
                .bundles
                .push(BundleInfo::new(format!("mvn:bench/f{layer}-{i}/1.0")));
            if layer + 1 < layers {
                for j in 0..3 {
                    feature
                        .dependencies
                        .push(Dependency::new(format!("f{}-{}", layer + 1, (i + j) % width)));
                }
            }
            universe.push(feature);
        }
    }
    universe
}

fn bench_closure(c: &mut Criterion) {
    let universe = layered_universe(10, 50);
    let targets: Vec<String> = (0..50).map(|i| format!("f0-{i}")).collect();
    c.bench_function("closure_10x50_layers", |b| {
        b.iter(|| close_features(&universe, &targets).unwrap());
    });
}

fn bench_resolve(c: &mut Criterion) {
    let universe = layered_universe(6, 30);
    let features: Vec<String> = (0..30).map(|i| format!("f0-{i}")).collect();
    let downloads = DownloadManager::new(Arc::new(MemorySource::new()), 2).unwrap();
    let resolver = FeatureWiringResolver::new(50);
    c.bench_function("resolve_stage_6x30_layers", |b| {
        b.iter(|| {
            resolve_stage(&resolver, &universe, &downloads, &features, &[], &[], &[]).unwrap()
        });
    });
}

fn bench_cyclic_closure(c: &mut Criterion) {
    let mut universe = layered_universe(5, 40);
    for feature in universe.iter_mut().filter(|f| f.name.starts_with("f4-")) {
        feature.dependencies.push(Dependency::new("f0-0"));
    }
    c.bench_function("closure_cyclic_5x40", |b| {
        b.iter(|| close_features(&universe, &["f0-0"]).unwrap());
    });
}

criterion_group!(benches, bench_closure, bench_resolve, bench_cyclic_closure);
criterion_main!(benches);
