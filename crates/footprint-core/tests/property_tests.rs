//! # Property-Based Tests
//!
//! Invariants of stage progression and accrual checked with proptest, plus
//! threaded races against both backends.

use footprint_core::{
    CarbonEstimator, CarbonMass, DeviceClass, DeviceProfile, EmissionsFactor, EngineSettings,
    InstanceId, MemoryStore, Milliwatts, NewChain, Outcome, ProfileDirectory, ProgressStatus,
    RetryPolicy, Role, Stage, StageEngine, StorageBackend, Store, UserId, WattageTable, carbon,
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::{Arc, Barrier};
use std::thread;

// =============================================================================
// FIXTURES
// =============================================================================

fn new_chain(contributors: u64) -> NewChain {
    NewChain {
        organization: "Northwind".to_string(),
        name: "Telemetry".to_string(),
        description: String::new(),
        creator: UserId(1),
        members: (2..2 + contributors)
            .map(|u| (UserId(u), Role::Member))
            .collect(),
    }
}

fn wattage() -> WattageTable {
    WattageTable::new()
        .with(DeviceClass::Laptop, "i5-1235U", Milliwatts::from_watts(15))
        .with(DeviceClass::Laptop, "Iris Xe", Milliwatts::parse_watts("12.5").expect("watts"))
        .with(DeviceClass::Laptop, "16GB", Milliwatts::from_watts(3))
}

fn laptop(user: u64) -> DeviceProfile {
    DeviceProfile {
        user_id: UserId(user),
        class: DeviceClass::Laptop,
        cpu: Some("i5-1235U".to_string()),
        gpu: Some("Iris Xe".to_string()),
        ram: Some("16GB".to_string()),
        psu: None,
    }
}

/// Every member row of every instance in the chain, keyed by (instance, user).
fn snapshot<S: Store>(
    engine: &StageEngine<S>,
    origin: InstanceId,
) -> BTreeMap<(InstanceId, UserId), Option<ProgressStatus>> {
    let chain_id = engine.instance_view(origin).expect("origin").instance.chain_id;
    let mut rows = BTreeMap::new();
    for instance in engine.chain(chain_id).expect("chain") {
        for member in engine
            .instance_view(instance.instance_id)
            .expect("view")
            .members
        {
            rows.insert((member.instance_id, member.user_id), member.progress_status);
        }
    }
    rows
}

fn count_stage_advances(outcomes: &[Outcome]) -> usize {
    outcomes
        .iter()
        .filter(|o| matches!(o, Outcome::StageAdvanced { .. }))
        .count()
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// No member's status ever moves backwards, and owners never gain one,
    /// whatever order completions arrive in.
    #[test]
    fn progress_never_regresses(
        contributors in 1u64..5,
        calls in vec((0usize..8, 0u64..6), 1..40),
    ) {
        let engine = StageEngine::new(Arc::new(MemoryStore::new()), EngineSettings::default());
        let origin = engine
            .create_chain(&new_chain(contributors))
            .expect("create")
            .instance
            .instance_id;

        let mut before = snapshot(&engine, origin);
        for (pick, user) in calls {
            let chain_id = engine.instance_view(origin).expect("view").instance.chain_id;
            let instances = engine.chain(chain_id).expect("chain");
            let target = instances[pick % instances.len()].instance_id;
            let _ = engine.complete_stage(target, UserId(1 + user));

            let after = snapshot(&engine, origin);
            for (key, old) in &before {
                prop_assert!(after.get(key).is_some_and(|new| new >= old));
            }
            for ((_, user), status) in &after {
                if *user == UserId(1) {
                    prop_assert_eq!(*status, None);
                }
            }
            before = after;
        }
    }

    /// The instance's counters equal the sum of every accrual's delta.
    #[test]
    fn accruals_are_additive(
        sessions in vec((0u64..3, 0u64..20_000), 1..25),
    ) {
        let store = Arc::new(MemoryStore::new());
        let engine = StageEngine::new(store.clone(), EngineSettings::default());
        let origin = engine
            .create_chain(&new_chain(3))
            .expect("create")
            .instance
            .instance_id;
        let estimator = CarbonEstimator::new(
            store,
            Arc::new(wattage()),
            Arc::new(ProfileDirectory::from_profiles((1..=4).map(laptop))),
            EmissionsFactor::default(),
            RetryPolicy::none(),
        );

        let mut carbon = CarbonMass::ZERO;
        let mut seconds = 0u64;
        for (member, elapsed) in sessions {
            let accrual = estimator
                .accrue(origin, UserId(2 + member), elapsed)
                .expect("accrue");
            carbon = carbon.saturating_add(accrual.delta.carbon);
            seconds += elapsed;
        }

        let instance = engine.instance_view(origin).expect("view").instance;
        prop_assert_eq!(instance.carbon_emit, carbon);
        prop_assert_eq!(instance.session_duration, seconds);
    }

    /// Emissions scale linearly with time for whole-hour sessions.
    #[test]
    fn whole_hours_scale_linearly(watts in 1u64..2_000, hours in 1u64..48) {
        let factor = EmissionsFactor::default();
        let one = carbon::estimate(Milliwatts::from_watts(watts), 3600, factor);
        let many = carbon::estimate(Milliwatts::from_watts(watts), 3600 * hours, factor);
        prop_assert_eq!(many.carbon.micrograms(), one.carbon.micrograms() * hours);
        prop_assert_eq!(many.energy.value(), one.energy.value() * hours);
    }
}

// =============================================================================
// RACES
// =============================================================================

/// All contributors complete at once; exactly one of them advances the stage.
fn race_final_completions<S: Store + 'static>(store: Arc<S>, contributors: u64) {
    let engine = Arc::new(StageEngine::new(store, EngineSettings::default()));
    let origin = engine
        .create_chain(&new_chain(contributors))
        .expect("create")
        .instance
        .instance_id;

    let barrier = Arc::new(Barrier::new(contributors as usize));
    let handles: Vec<_> = (2..2 + contributors)
        .map(|user| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.complete_stage(origin, UserId(user)).expect("complete")
            })
        })
        .collect();
    let outcomes: Vec<Outcome> = handles
        .into_iter()
        .map(|h| h.join().expect("thread"))
        .collect();

    assert_eq!(count_stage_advances(&outcomes), 1);

    let chain_id = engine.instance_view(origin).expect("view").instance.chain_id;
    let developments: Vec<_> = engine
        .chain(chain_id)
        .expect("chain")
        .into_iter()
        .filter(|i| i.stage == Stage::Development)
        .collect();
    assert_eq!(developments.len(), 1);

    let members = engine
        .instance_view(developments[0].instance_id)
        .expect("development")
        .members;
    assert_eq!(members.len(), contributors as usize + 1);
    let in_progress = members
        .iter()
        .filter(|m| m.progress_status == Some(ProgressStatus::InProgress))
        .count();
    assert_eq!(in_progress, 1);
}

#[test]
fn concurrent_final_completions_memory() {
    race_final_completions(Arc::new(MemoryStore::new()), 8);
}

#[test]
fn concurrent_final_completions_redb() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = StorageBackend::redb(dir.path().join("race.redb")).expect("open");
    race_final_completions(Arc::new(store), 6);
}

#[test]
fn concurrent_accruals_all_land() {
    let store = Arc::new(MemoryStore::new());
    let engine = StageEngine::new(store.clone(), EngineSettings::default());
    let origin = engine
        .create_chain(&new_chain(4))
        .expect("create")
        .instance
        .instance_id;
    let estimator = Arc::new(CarbonEstimator::new(
        store,
        Arc::new(wattage()),
        Arc::new(ProfileDirectory::from_profiles((2..6).map(laptop))),
        EmissionsFactor::default(),
        RetryPolicy::default(),
    ));

    let handles: Vec<_> = (2..6u64)
        .map(|user| {
            let estimator = Arc::clone(&estimator);
            thread::spawn(move || {
                for _ in 0..25 {
                    estimator.accrue(origin, UserId(user), 720).expect("accrue");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread");
    }

    let per_call = carbon::estimate(
        Milliwatts(30_500),
        720,
        EmissionsFactor::default(),
    );
    let instance = engine.instance_view(origin).expect("view").instance;
    assert_eq!(instance.session_duration, 4 * 25 * 720);
    assert_eq!(instance.carbon_emit.micrograms(), per_call.carbon.micrograms() * 100);
}
