//! Benchmarks for closure maintenance and reachability reads.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use pm_reach::element::NodeId;
use pm_reach::engine::{Engine, EngineConfig};
use pm_reach::strategy::StrategyKind;

const NODES: u64 = 400;
const EDGES: usize = 1_200;

fn id(raw: u64) -> NodeId {
    NodeId::new(raw).unwrap()
}

fn random_dag(seed: u64) -> Vec<(u64, u64)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..EDGES)
        .map(|_| {
            let p = rng.gen_range(1..NODES);
            let c = rng.gen_range(p + 1..=(p + 20).min(NODES));
            (p, c)
        })
        .collect()
}

fn loaded(strategy: StrategyKind, edges: &[(u64, u64)]) -> Engine {
    let engine = Engine::new(EngineConfig {
        strategy,
        ..Default::default()
    })
    .unwrap();
    for &(p, c) in edges {
        engine.insert_edge(id(p), id(c)).unwrap();
    }
    engine
}

fn bench_build(c: &mut Criterion) {
    let edges = random_dag(0);
    c.bench_function("materialized_build_1200", |bench| {
        bench.iter(|| black_box(loaded(StrategyKind::Materialized, &edges)))
    });
}

fn bench_remove_reinsert(c: &mut Criterion) {
    let edges = random_dag(1);
    let engine = loaded(StrategyKind::Materialized, &edges);
    let (p, q) = edges[edges.len() / 2];

    c.bench_function("materialized_remove_reinsert", |bench| {
        bench.iter(|| {
            engine.remove_edge(id(p), id(q)).unwrap();
            engine.insert_edge(id(p), id(q)).unwrap();
        })
    });
}

fn bench_reads(c: &mut Criterion) {
    let edges = random_dag(2);
    let materialized = loaded(StrategyKind::Materialized, &edges);
    let on_demand = loaded(StrategyKind::OnDemand, &edges);

    c.bench_function("materialized_is_reachable", |bench| {
        bench.iter(|| black_box(materialized.is_reachable(id(1), id(NODES)).unwrap()))
    });
    c.bench_function("on_demand_is_reachable", |bench| {
        bench.iter(|| black_box(on_demand.is_reachable(id(1), id(NODES)).unwrap()))
    });
    c.bench_function("on_demand_descendants", |bench| {
        bench.iter(|| black_box(on_demand.descendants_of(&[id(1)]).unwrap()))
    });
}

criterion_group!(benches, bench_build, bench_remove_reinsert, bench_reads);
criterion_main!(benches);
