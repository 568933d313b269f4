//! # Engine Benchmarks
//!
//! Performance benchmarks for stage completion and accrual.
//!
//! Run with: `cargo bench -p footprint-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use footprint_core::{
    CarbonEstimator, DeviceClass, DeviceProfile, EmissionsFactor, EngineSettings, InstanceId,
    MemoryStore, Milliwatts, NewChain, ProfileDirectory, RetryPolicy, Role, StageEngine, UserId,
    WattageTable, carbon,
};
use std::hint::black_box;
use std::sync::Arc;

fn chain_with(engine: &StageEngine<MemoryStore>, contributors: u64) -> InstanceId {
    engine
        .create_chain(&NewChain {
            organization: "Bench".to_string(),
            name: "Chain".to_string(),
            description: String::new(),
            creator: UserId(1),
            members: (2..2 + contributors)
                .map(|u| (UserId(u), Role::Member))
                .collect(),
        })
        .expect("create chain")
        .instance
        .instance_id
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_stage_advance(c: &mut Criterion) {
    let mut group = c.benchmark_group("stage_advance");

    for size in [1u64, 10, 50] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let engine =
                        StageEngine::new(Arc::new(MemoryStore::new()), EngineSettings::default());
                    let origin = chain_with(&engine, size);
                    (engine, origin)
                },
                |(engine, origin)| {
                    for user in 2..2 + size {
                        black_box(
                            engine
                                .complete_stage(origin, UserId(user))
                                .expect("complete"),
                        );
                    }
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_accrue(c: &mut Criterion) {
    let store = Arc::new(MemoryStore::new());
    let engine = StageEngine::new(store.clone(), EngineSettings::default());
    let origin = chain_with(&engine, 1);
    let table = WattageTable::new()
        .with(DeviceClass::Desktop, "cpu", Milliwatts::from_watts(95))
        .with(DeviceClass::Desktop, "gpu", Milliwatts::from_watts(220))
        .with(DeviceClass::Desktop, "ram", Milliwatts::from_watts(8))
        .with(DeviceClass::Desktop, "psu", Milliwatts::from_watts(550));
    let profile = DeviceProfile {
        user_id: UserId(2),
        class: DeviceClass::Desktop,
        cpu: Some("cpu".to_string()),
        gpu: Some("gpu".to_string()),
        ram: Some("ram".to_string()),
        psu: Some("psu".to_string()),
    };
    let estimator = CarbonEstimator::new(
        store,
        Arc::new(table),
        Arc::new(ProfileDirectory::from_profiles([profile])),
        EmissionsFactor::default(),
        RetryPolicy::default(),
    );

    c.bench_function("accrue", |b| {
        b.iter(|| {
            black_box(
                estimator
                    .accrue(origin, UserId(2), black_box(60))
                    .expect("accrue"),
            )
        });
    });
}

fn bench_estimate(c: &mut Criterion) {
    let factor = EmissionsFactor::default();
    c.bench_function("estimate", |b| {
        b.iter(|| {
            carbon::estimate(
                black_box(Milliwatts::from_watts(720)),
                black_box(3600),
                factor,
            )
        });
    });
}

criterion_group!(benches, bench_stage_advance, bench_accrue, bench_estimate);
criterion_main!(benches);
