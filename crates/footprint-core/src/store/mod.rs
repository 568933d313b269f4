//! # Storage Layer
//!
//! Transactional access to instance and member rows.
//!
//! ## Transaction Model
//!
//! Every engine operation runs its reads and writes through one
//! [`LedgerWrite`] handle obtained from [`Store::write`]. The closure's
//! writes become visible only if it returns `Ok`; any error discards them.
//! Writers are serialized, so state read inside the closure cannot change
//! underneath it.
//!
//! ## Backends
//!
//! - [`MemoryStore`]: mutex-guarded tables (fast, volatile)
//! - [`RedbStore`]: redb database (ACID, persistent, single writer)
//! - [`StorageBackend`]: runtime choice between the two

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::{CarbonMass, ChainId, FootprintError, InstanceId, Member, ProjectInstance, Stage, UserId};
use std::path::Path;

// =============================================================================
// TRANSACTION TRAITS
// =============================================================================

/// Read operations available inside any transaction.
pub trait LedgerRead {
    fn instance(&self, id: InstanceId) -> Result<Option<ProjectInstance>, FootprintError>;

    /// Non-archived instance holding the `(chain, stage)` slot.
    fn slot(&self, chain: ChainId, stage: Stage) -> Result<Option<InstanceId>, FootprintError>;

    /// Every instance of a chain (archived ones included), ordered by id.
    fn chain_instances(&self, chain: ChainId) -> Result<Vec<ProjectInstance>, FootprintError>;

    /// Ids of all `InProgress` instances, ordered by id.
    fn active_instances(&self) -> Result<Vec<InstanceId>, FootprintError>;

    fn member(&self, instance: InstanceId, user: UserId) -> Result<Option<Member>, FootprintError>;

    /// Members of an instance, ordered by user id.
    fn members(&self, instance: InstanceId) -> Result<Vec<Member>, FootprintError>;
}

/// Write operations; only reachable from [`Store::write`].
pub trait LedgerWrite: LedgerRead {
    fn next_chain_id(&mut self) -> Result<ChainId, FootprintError>;

    fn next_instance_id(&mut self) -> Result<InstanceId, FootprintError>;

    /// Insert or replace an instance row and its secondary indexes.
    fn put_instance(&mut self, instance: &ProjectInstance) -> Result<(), FootprintError>;

    /// Claim the unique `(chain, stage)` slot for `instance`.
    ///
    /// Fails with `StageSlotTaken` if another instance holds it.
    fn claim_slot(
        &mut self,
        chain: ChainId,
        stage: Stage,
        instance: InstanceId,
    ) -> Result<(), FootprintError>;

    fn release_slot(&mut self, chain: ChainId, stage: Stage) -> Result<(), FootprintError>;

    fn put_member(&mut self, member: &Member) -> Result<(), FootprintError>;

    /// Add session time and emissions to an instance's counters.
    ///
    /// An increment applied inside the transaction, never a write-back of a
    /// value computed elsewhere. Returns the updated row.
    fn add_usage(
        &mut self,
        instance: InstanceId,
        seconds: u64,
        carbon: CarbonMass,
    ) -> Result<ProjectInstance, FootprintError>;
}

/// A transactional store.
pub trait Store: Send + Sync {
    /// Run `f` against a consistent snapshot.
    fn read<T, F>(&self, f: F) -> Result<T, FootprintError>
    where
        F: FnOnce(&dyn LedgerRead) -> Result<T, FootprintError>;

    /// Run `f` as one serialized write transaction; commit only on `Ok`.
    fn write<T, F>(&self, f: F) -> Result<T, FootprintError>
    where
        F: FnOnce(&mut dyn LedgerWrite) -> Result<T, FootprintError>;
}

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Storage backend chosen at runtime.
#[derive(Debug)]
pub enum StorageBackend {
    /// Mutex-guarded tables (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed redb database (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

impl StorageBackend {
    /// Open or create a redb database at `path`.
    pub fn redb(path: impl AsRef<Path>) -> Result<Self, FootprintError> {
        Ok(Self::Persistent(RedbStore::open(path)?))
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }
}

impl Store for StorageBackend {
    fn read<T, F>(&self, f: F) -> Result<T, FootprintError>
    where
        F: FnOnce(&dyn LedgerRead) -> Result<T, FootprintError>,
    {
        match self {
            Self::InMemory(store) => store.read(f),
            Self::Persistent(store) => store.read(f),
        }
    }

    fn write<T, F>(&self, f: F) -> Result<T, FootprintError>
    where
        F: FnOnce(&mut dyn LedgerWrite) -> Result<T, FootprintError>,
    {
        match self {
            Self::InMemory(store) => store.write(f),
            Self::Persistent(store) => store.write(f),
        }
    }
}
