//! # footprint-core
//!
//! The stage progression and carbon accounting engine - THE LOGIC.
//!
//! A project chain moves through a fixed sequence of stages. Each stage is a
//! separate project instance with its own roster; when every contributing
//! member of an instance has finished, the engine forks (or reuses) the next
//! stage's instance and migrates the roster into it. Session time spent on a
//! project is turned into energy and CO₂e from hardware wattage data and
//! accumulated on the instance.
//!
//! ## Layout
//!
//! - `catalog`: the stage sequence and its transition rules
//! - `ledger`: roster operations inside a transaction
//! - `engine`: stage completion, chain administration, the completion sweep
//! - `carbon`: device power formulas and emissions accrual
//! - `store`: transactional storage (in-memory and redb)
//! - `ports`: traits for the collaborators the engine consumes
//! - `reference`: configuration-backed implementations of those traits
//!
//! ## Architectural Constraints
//!
//! - Has NO async, NO network dependencies (pure Rust)
//! - Every engine write runs inside exactly one store transaction
//! - Accounting is integer fixed-point; floats appear only in display helpers

// =============================================================================
// MODULES
// =============================================================================

pub mod carbon;
pub mod catalog;
pub mod engine;
pub mod formats;
pub mod ledger;
pub mod ports;
pub mod primitives;
pub mod reference;
pub mod retry;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    CarbonMass, ChainId, EnergyMwh, ErrorKind, FootprintError, InstanceId, InstanceStatus,
    LookupError, Member, Milliwatts, ProgressStatus, ProjectInstance, Role, Timeline, UserId,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use carbon::{
    Accrual, CarbonEstimator, DeviceClass, DeviceProfile, Emissions, EmissionsFactor, PowerDraw,
    PowerFormula,
};
pub use catalog::{Stage, StageCatalog};
pub use engine::{EngineSettings, InstanceView, NewChain, Outcome, StageEngine, SweepReport};
pub use ledger::{MembershipLedger, StageProgress};
pub use retry::RetryPolicy;

// =============================================================================
// RE-EXPORTS: Collaborators & Storage
// =============================================================================

pub use ports::{
    Clock, DevicePowerLookup, FixedClock, Notifier, NotifyError, NullNotifier, SystemClock,
    UserProfiles,
};
pub use reference::{ProfileDirectory, WattageTable};
pub use store::{LedgerRead, LedgerWrite, MemoryStore, RedbStore, StorageBackend, Store};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{RecordHeader, decode_record, encode_record};
