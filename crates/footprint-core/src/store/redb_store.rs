//! # redb-backed Store
//!
//! A disk-backed store using the redb embedded database, providing:
//! - ACID transactions
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! The single-writer lock is what linearizes concurrent stage completions:
//! a second `begin_write` blocks until the first transaction commits or
//! aborts, and then reads the committed state.

use super::{LedgerRead, LedgerWrite, Store};
use crate::formats::{decode_record, encode_record};
use crate::{
    CarbonMass, ChainId, FootprintError, InstanceId, InstanceStatus, Member, ProjectInstance,
    Stage, UserId,
};
use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};
use std::path::Path;

/// Table for instances: instance_id -> encoded ProjectInstance
const INSTANCES: TableDefinition<u64, &[u8]> = TableDefinition::new("instances");

/// Table for members: (instance_id, user_id) -> encoded Member
const MEMBERS: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("members");

/// Unique slot index: (chain_id, stage code) -> instance_id, non-archived only
const CHAIN_STAGE: TableDefinition<(u64, u8), u64> = TableDefinition::new("chain_stage");

/// Chain membership of instances: (chain_id, instance_id) -> stage code
const CHAIN_INSTANCES: TableDefinition<(u64, u64), u8> = TableDefinition::new("chain_instances");

/// In-progress instances: instance_id -> stage code
const ACTIVE: TableDefinition<u64, u8> = TableDefinition::new("active");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const LAST_CHAIN_ID: &str = "last_chain_id";
const LAST_INSTANCE_ID: &str = "last_instance_id";

fn txn_err(e: impl std::fmt::Display) -> FootprintError {
    FootprintError::Transaction(e.to_string())
}

/// A disk-backed store using redb.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FootprintError> {
        let db = Database::create(path.as_ref()).map_err(|e| FootprintError::Io(e.to_string()))?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(txn_err)?;
            let _ = write_txn.open_table(INSTANCES).map_err(txn_err)?;
            let _ = write_txn.open_table(MEMBERS).map_err(txn_err)?;
            let _ = write_txn.open_table(CHAIN_STAGE).map_err(txn_err)?;
            let _ = write_txn.open_table(CHAIN_INSTANCES).map_err(txn_err)?;
            let _ = write_txn.open_table(ACTIVE).map_err(txn_err)?;
            let _ = write_txn.open_table(METADATA).map_err(txn_err)?;
            write_txn.commit().map_err(txn_err)?;
        }

        Ok(Self { db })
    }
}

impl Store for RedbStore {
    fn read<T, F>(&self, f: F) -> Result<T, FootprintError>
    where
        F: FnOnce(&dyn LedgerRead) -> Result<T, FootprintError>,
    {
        let txn = self.db.begin_read().map_err(txn_err)?;
        f(&RedbRead { txn })
    }

    fn write<T, F>(&self, f: F) -> Result<T, FootprintError>
    where
        F: FnOnce(&mut dyn LedgerWrite) -> Result<T, FootprintError>,
    {
        let txn = self.db.begin_write().map_err(txn_err)?;
        let mut ledger = RedbWrite { txn };
        match f(&mut ledger) {
            Ok(out) => {
                ledger.txn.commit().map_err(txn_err)?;
                Ok(out)
            }
            Err(e) => {
                if let Err(abort) = ledger.txn.abort() {
                    tracing::warn!(error = %abort, "redb abort failed after {}", e);
                }
                Err(e)
            }
        }
    }
}

// =============================================================================
// SHARED TABLE READERS
// =============================================================================

fn read_instance(
    table: &impl ReadableTable<u64, &'static [u8]>,
    id: InstanceId,
) -> Result<Option<ProjectInstance>, FootprintError> {
    table
        .get(id.0)
        .map_err(txn_err)?
        .map(|data| decode_record(data.value()))
        .transpose()
}

fn read_member(
    table: &impl ReadableTable<(u64, u64), &'static [u8]>,
    instance: InstanceId,
    user: UserId,
) -> Result<Option<Member>, FootprintError> {
    table
        .get((instance.0, user.0))
        .map_err(txn_err)?
        .map(|data| decode_record(data.value()))
        .transpose()
}

fn read_members(
    table: &impl ReadableTable<(u64, u64), &'static [u8]>,
    instance: InstanceId,
) -> Result<Vec<Member>, FootprintError> {
    let mut members = Vec::new();
    for entry in table
        .range((instance.0, 0u64)..=(instance.0, u64::MAX))
        .map_err(txn_err)?
    {
        let (_, value) = entry.map_err(txn_err)?;
        members.push(decode_record(value.value())?);
    }
    Ok(members)
}

fn read_slot(
    table: &impl ReadableTable<(u64, u8), u64>,
    chain: ChainId,
    stage: Stage,
) -> Result<Option<InstanceId>, FootprintError> {
    Ok(table
        .get((chain.0, stage.code()))
        .map_err(txn_err)?
        .map(|v| InstanceId(v.value())))
}

fn read_chain_ids(
    table: &impl ReadableTable<(u64, u64), u8>,
    chain: ChainId,
) -> Result<Vec<InstanceId>, FootprintError> {
    let mut ids = Vec::new();
    for entry in table
        .range((chain.0, 0u64)..=(chain.0, u64::MAX))
        .map_err(txn_err)?
    {
        let (key, _) = entry.map_err(txn_err)?;
        ids.push(InstanceId(key.value().1));
    }
    Ok(ids)
}

fn read_active(table: &impl ReadableTable<u64, u8>) -> Result<Vec<InstanceId>, FootprintError> {
    let mut ids = Vec::new();
    for entry in table.iter().map_err(txn_err)? {
        let (key, _) = entry.map_err(txn_err)?;
        ids.push(InstanceId(key.value()));
    }
    Ok(ids)
}

// =============================================================================
// READ TRANSACTION
// =============================================================================

struct RedbRead {
    txn: ReadTransaction,
}

impl LedgerRead for RedbRead {
    fn instance(&self, id: InstanceId) -> Result<Option<ProjectInstance>, FootprintError> {
        read_instance(&self.txn.open_table(INSTANCES).map_err(txn_err)?, id)
    }

    fn slot(&self, chain: ChainId, stage: Stage) -> Result<Option<InstanceId>, FootprintError> {
        read_slot(&self.txn.open_table(CHAIN_STAGE).map_err(txn_err)?, chain, stage)
    }

    fn chain_instances(&self, chain: ChainId) -> Result<Vec<ProjectInstance>, FootprintError> {
        let ids = read_chain_ids(&self.txn.open_table(CHAIN_INSTANCES).map_err(txn_err)?, chain)?;
        let table = self.txn.open_table(INSTANCES).map_err(txn_err)?;
        let mut instances = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(instance) = read_instance(&table, id)? {
                instances.push(instance);
            }
        }
        Ok(instances)
    }

    fn active_instances(&self) -> Result<Vec<InstanceId>, FootprintError> {
        read_active(&self.txn.open_table(ACTIVE).map_err(txn_err)?)
    }

    fn member(&self, instance: InstanceId, user: UserId) -> Result<Option<Member>, FootprintError> {
        read_member(&self.txn.open_table(MEMBERS).map_err(txn_err)?, instance, user)
    }

    fn members(&self, instance: InstanceId) -> Result<Vec<Member>, FootprintError> {
        read_members(&self.txn.open_table(MEMBERS).map_err(txn_err)?, instance)
    }
}

// =============================================================================
// WRITE TRANSACTION
// =============================================================================

struct RedbWrite {
    txn: WriteTransaction,
}

impl RedbWrite {
    fn bump_counter(&mut self, key: &str) -> Result<u64, FootprintError> {
        let mut table = self.txn.open_table(METADATA).map_err(txn_err)?;
        let last = table
            .get(key)
            .map_err(txn_err)?
            .map(|v| v.value())
            .unwrap_or(0);
        let next = last.saturating_add(1);
        table.insert(key, next).map_err(txn_err)?;
        Ok(next)
    }
}

impl LedgerRead for RedbWrite {
    fn instance(&self, id: InstanceId) -> Result<Option<ProjectInstance>, FootprintError> {
        read_instance(&self.txn.open_table(INSTANCES).map_err(txn_err)?, id)
    }

    fn slot(&self, chain: ChainId, stage: Stage) -> Result<Option<InstanceId>, FootprintError> {
        read_slot(&self.txn.open_table(CHAIN_STAGE).map_err(txn_err)?, chain, stage)
    }

    fn chain_instances(&self, chain: ChainId) -> Result<Vec<ProjectInstance>, FootprintError> {
        let ids = read_chain_ids(&self.txn.open_table(CHAIN_INSTANCES).map_err(txn_err)?, chain)?;
        let table = self.txn.open_table(INSTANCES).map_err(txn_err)?;
        let mut instances = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(instance) = read_instance(&table, id)? {
                instances.push(instance);
            }
        }
        Ok(instances)
    }

    fn active_instances(&self) -> Result<Vec<InstanceId>, FootprintError> {
        read_active(&self.txn.open_table(ACTIVE).map_err(txn_err)?)
    }

    fn member(&self, instance: InstanceId, user: UserId) -> Result<Option<Member>, FootprintError> {
        read_member(&self.txn.open_table(MEMBERS).map_err(txn_err)?, instance, user)
    }

    fn members(&self, instance: InstanceId) -> Result<Vec<Member>, FootprintError> {
        read_members(&self.txn.open_table(MEMBERS).map_err(txn_err)?, instance)
    }
}

impl LedgerWrite for RedbWrite {
    fn next_chain_id(&mut self) -> Result<ChainId, FootprintError> {
        self.bump_counter(LAST_CHAIN_ID).map(ChainId)
    }

    fn next_instance_id(&mut self) -> Result<InstanceId, FootprintError> {
        self.bump_counter(LAST_INSTANCE_ID).map(InstanceId)
    }

    fn put_instance(&mut self, instance: &ProjectInstance) -> Result<(), FootprintError> {
        let bytes = encode_record(instance)?;
        let id = instance.instance_id.0;
        let stage = instance.stage.code();

        let mut instances = self.txn.open_table(INSTANCES).map_err(txn_err)?;
        instances.insert(id, bytes.as_slice()).map_err(txn_err)?;

        let mut chain = self.txn.open_table(CHAIN_INSTANCES).map_err(txn_err)?;
        chain
            .insert((instance.chain_id.0, id), stage)
            .map_err(txn_err)?;

        let mut active = self.txn.open_table(ACTIVE).map_err(txn_err)?;
        if instance.status == InstanceStatus::InProgress {
            active.insert(id, stage).map_err(txn_err)?;
        } else {
            active.remove(id).map_err(txn_err)?;
        }
        Ok(())
    }

    fn claim_slot(
        &mut self,
        chain: ChainId,
        stage: Stage,
        instance: InstanceId,
    ) -> Result<(), FootprintError> {
        let mut table = self.txn.open_table(CHAIN_STAGE).map_err(txn_err)?;
        let holder = table
            .get((chain.0, stage.code()))
            .map_err(txn_err)?
            .map(|v| v.value());
        match holder {
            Some(holder) if holder != instance.0 => {
                Err(FootprintError::StageSlotTaken { chain, stage })
            }
            _ => {
                table
                    .insert((chain.0, stage.code()), instance.0)
                    .map_err(txn_err)?;
                Ok(())
            }
        }
    }

    fn release_slot(&mut self, chain: ChainId, stage: Stage) -> Result<(), FootprintError> {
        let mut table = self.txn.open_table(CHAIN_STAGE).map_err(txn_err)?;
        table.remove((chain.0, stage.code())).map_err(txn_err)?;
        Ok(())
    }

    fn put_member(&mut self, member: &Member) -> Result<(), FootprintError> {
        let bytes = encode_record(member)?;
        let mut table = self.txn.open_table(MEMBERS).map_err(txn_err)?;
        table
            .insert((member.instance_id.0, member.user_id.0), bytes.as_slice())
            .map_err(txn_err)?;
        Ok(())
    }

    fn add_usage(
        &mut self,
        instance: InstanceId,
        seconds: u64,
        carbon: CarbonMass,
    ) -> Result<ProjectInstance, FootprintError> {
        let mut row = self
            .instance(instance)?
            .ok_or(FootprintError::InstanceNotFound(instance))?;
        row.session_duration = row.session_duration.saturating_add(seconds);
        row.carbon_emit = row.carbon_emit.saturating_add(carbon);

        let bytes = encode_record(&row)?;
        let mut table = self.txn.open_table(INSTANCES).map_err(txn_err)?;
        table.insert(instance.0, bytes.as_slice()).map_err(txn_err)?;
        Ok(row)
    }
}

// =============================================================================
// TESTS
// =============================================================================
