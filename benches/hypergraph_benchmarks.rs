//! Benchmark suite para o motor de roteamento de capabilities usando
//! Criterion. Foca nas operações de custo dominante do caminho quente:
//! mutação do feature store, recomputo espectral, pontuação SHGAT e busca
//! de hiperpath DR-DSP.

use capability_router::store::FeatureStore;
use capability_router::shgat::ShgatScorer;
use capability_router::spectral::SpectralClusterer;
use capability_router::types::{Embedding, ToolId};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const EMBEDDING_DIM: usize = 64;

fn synthetic_embedding(seed: usize, dim: usize) -> Vec<f64> {
    (0..dim)
        .map(|i| (((seed * 31 + i) % 97) as f64) / 97.0)
        .collect()
}

/// Constrói um store com `n_tools` ferramentas e uma capability por par
/// consecutivo de ferramentas, para exercitar incidência/espectral/SHGAT em
/// escala crescente.
fn build_store(n_tools: usize) -> FeatureStore {
    let mut store = FeatureStore::new(EMBEDDING_DIM, 1e-3);
    let tools: Vec<ToolId> = (0..n_tools)
        .map(|i| {
            store
                .upsert_tool(
                    &format!("tool:{i}"),
                    synthetic_embedding(i, EMBEDDING_DIM),
                    "bench-server",
                    &format!("tool-{i}"),
                )
                .unwrap()
        })
        .collect();
    for window in tools.windows(2) {
        let a = window[0];
        let b = window[1];
        let external_id = format!("cap:{}:{}", a.0, b.0);
        store
            .upsert_capability(
                &external_id,
                synthetic_embedding(a.index() + b.index(), EMBEDDING_DIM),
                vec![a, b],
                0.8,
            )
            .unwrap();
    }
    store.recompute_incidence_if_dirty();
    store
}

fn bench_store_mutation(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_mutation");
    for &n in &[10usize, 100, 500] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("upsert_tool", n), &n, |b, &n| {
            b.iter(|| {
                let mut store = FeatureStore::new(EMBEDDING_DIM, 1e-3);
                for i in 0..n {
                    black_box(
                        store
                            .upsert_tool(
                                &format!("tool:{i}"),
                                synthetic_embedding(i, EMBEDDING_DIM),
                                "bench-server",
                                &format!("tool-{i}"),
                            )
                            .unwrap(),
                    );
                }
            });
        });
    }
    group.finish();
}

fn bench_spectral_recompute(c: &mut Criterion) {
    let mut group = c.benchmark_group("spectral_recompute");
    for &n in &[10usize, 50, 150] {
        group.bench_with_input(BenchmarkId::new("recompute_if_needed", n), &n, |b, &n| {
            b.iter_batched(
                || build_store(n),
                |mut store| {
                    let mut clusterer = SpectralClusterer::new(4, 0.85, 1e-6, 100);
                    black_box(clusterer.recompute_if_needed(&mut store).unwrap());
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_shgat_scoring(c: &mut Criterion) {
    let mut group = c.benchmark_group("shgat_scoring");
    for &n in &[10usize, 100, 400] {
        let mut store = build_store(n);
        let mut clusterer = SpectralClusterer::new(4, 0.85, 1e-6, 100);
        clusterer.recompute_if_needed(&mut store).unwrap();
        let scorer = ShgatScorer::new(2);
        let intent = Embedding::new_unchecked(synthetic_embedding(7, EMBEDDING_DIM));

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("score_capabilities", n), &n, |b, _| {
            b.iter(|| {
                black_box(scorer.score_capabilities(&store, &clusterer, &intent, &[]));
            });
        });
    }
    group.finish();
}

fn bench_hyperpath_routing(c: &mut Criterion) {
    let mut group = c.benchmark_group("hyperpath_routing");
    for &n in &[10usize, 100, 400] {
        let store = build_store(n);
        let source = ToolId(0);
        let target = ToolId((n - 1) as u32);
        group.bench_with_input(BenchmarkId::new("find_shortest_hyperpath", n), &n, |b, _| {
            b.iter(|| {
                black_box(
                    capability_router::router::find_shortest_hyperpath(
                        &store, source, target, None,
                    )
                    .unwrap(),
                );
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_store_mutation,
    bench_spectral_recompute,
    bench_shgat_scoring,
    bench_hyperpath_routing
);
criterion_main!(benches);
