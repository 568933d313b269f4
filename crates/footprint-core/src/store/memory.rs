//! In-memory store.
//!
//! A write transaction locks the tables, works on a copy and swaps the copy
//! in on success, so a failed closure leaves nothing behind.

use super::{LedgerRead, LedgerWrite, Store};
use crate::{
    CarbonMass, ChainId, FootprintError, InstanceId, InstanceStatus, Member, ProjectInstance,
    Stage, UserId,
};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
struct Tables {
    instances: BTreeMap<InstanceId, ProjectInstance>,
    members: BTreeMap<(InstanceId, UserId), Member>,
    slots: BTreeMap<(ChainId, Stage), InstanceId>,
    last_chain_id: u64,
    last_instance_id: u64,
}

/// Volatile store for tests, demos and `--backend memory`.
///
/// Every write copies all tables, so write cost grows with the data set.
/// Use [`RedbStore`](super::RedbStore) for anything long-lived.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, FootprintError> {
        self.tables
            .lock()
            .map_err(|_| FootprintError::Transaction("memory store lock poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn read<T, F>(&self, f: F) -> Result<T, FootprintError>
    where
        F: FnOnce(&dyn LedgerRead) -> Result<T, FootprintError>,
    {
        let tables = self.lock()?;
        f(&*tables)
    }

    fn write<T, F>(&self, f: F) -> Result<T, FootprintError>
    where
        F: FnOnce(&mut dyn LedgerWrite) -> Result<T, FootprintError>,
    {
        let mut tables = self.lock()?;
        let mut working = tables.clone();
        let out = f(&mut working)?;
        *tables = working;
        Ok(out)
    }
}

impl LedgerRead for Tables {
    fn instance(&self, id: InstanceId) -> Result<Option<ProjectInstance>, FootprintError> {
        Ok(self.instances.get(&id).cloned())
    }

    fn slot(&self, chain: ChainId, stage: Stage) -> Result<Option<InstanceId>, FootprintError> {
        Ok(self.slots.get(&(chain, stage)).copied())
    }

    fn chain_instances(&self, chain: ChainId) -> Result<Vec<ProjectInstance>, FootprintError> {
        Ok(self
            .instances
            .values()
            .filter(|instance| instance.chain_id == chain)
            .cloned()
            .collect())
    }

    fn active_instances(&self) -> Result<Vec<InstanceId>, FootprintError> {
        Ok(self
            .instances
            .values()
            .filter(|instance| instance.status == InstanceStatus::InProgress)
            .map(|instance| instance.instance_id)
            .collect())
    }

    fn member(&self, instance: InstanceId, user: UserId) -> Result<Option<Member>, FootprintError> {
        Ok(self.members.get(&(instance, user)).cloned())
    }

    fn members(&self, instance: InstanceId) -> Result<Vec<Member>, FootprintError> {
        Ok(self
            .members
            .range((instance, UserId(0))..=(instance, UserId(u64::MAX)))
            .map(|(_, member)| member.clone())
            .collect())
    }
}

impl LedgerWrite for Tables {
    fn next_chain_id(&mut self) -> Result<ChainId, FootprintError> {
        self.last_chain_id = self.last_chain_id.saturating_add(1);
        Ok(ChainId(self.last_chain_id))
    }

    fn next_instance_id(&mut self) -> Result<InstanceId, FootprintError> {
        self.last_instance_id = self.last_instance_id.saturating_add(1);
        Ok(InstanceId(self.last_instance_id))
    }

    fn put_instance(&mut self, instance: &ProjectInstance) -> Result<(), FootprintError> {
        self.instances.insert(instance.instance_id, instance.clone());
        Ok(())
    }

    fn claim_slot(
        &mut self,
        chain: ChainId,
        stage: Stage,
        instance: InstanceId,
    ) -> Result<(), FootprintError> {
        match self.slots.get(&(chain, stage)) {
            Some(holder) if *holder != instance => {
                Err(FootprintError::StageSlotTaken { chain, stage })
            }
            _ => {
                self.slots.insert((chain, stage), instance);
                Ok(())
            }
        }
    }

    fn release_slot(&mut self, chain: ChainId, stage: Stage) -> Result<(), FootprintError> {
        self.slots.remove(&(chain, stage));
        Ok(())
    }

    fn put_member(&mut self, member: &Member) -> Result<(), FootprintError> {
        self.members
            .insert((member.instance_id, member.user_id), member.clone());
        Ok(())
    }

    fn add_usage(
        &mut self,
        instance: InstanceId,
        seconds: u64,
        carbon: CarbonMass,
    ) -> Result<ProjectInstance, FootprintError> {
        let row = self
            .instances
            .get_mut(&instance)
            .ok_or(FootprintError::InstanceNotFound(instance))?;
        row.session_duration = row.session_duration.saturating_add(seconds);
        row.carbon_emit = row.carbon_emit.saturating_add(carbon);
        Ok(row.clone())
    }
}
