//! # Stage Progression Engine
//!
//! Orchestrates stage completion for project chains.
//!
//! ## Completion Flow
//!
//! ```text
//! complete_stage(instance, user)
//!   └─ write transaction
//!        ├─ load instance            (NotFound)
//!        ├─ closed? replay or fail   (Conflict)
//!        ├─ record completion        (Forbidden for owners / outsiders)
//!        ├─ all contributors done?   no  → UserStageCompleted
//!        └─ finalize
//!             ├─ last stage          → ProjectCompleted
//!             └─ otherwise: search-or-create next instance,
//!                migrate members, close old → StageAdvanced
//! ```
//!
//! The transaction is the unit of atomicity: either the completion, the new
//! instance, every migrated member and the closed old instance all land, or
//! none of them do. Store writers are serialized, so when N final
//! contributors race, exactly one finds the stage complete and the others
//! see its committed result.

use crate::ledger::{MembershipLedger, StageProgress};
use crate::ports::{Clock, Notifier, NullNotifier, SystemClock};
use crate::retry::RetryPolicy;
use crate::store::{LedgerRead, LedgerWrite, Store};
use crate::{
    CarbonMass, ChainId, FootprintError, InstanceId, InstanceStatus, Member, ProjectInstance, Role,
    Stage, StageCatalog, Timeline, UserId, primitives,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// SETTINGS & RESULTS
// =============================================================================

/// Tunables for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub stage_duration_days: u32,
    pub chain_duration_days: u32,
    pub retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            stage_duration_days: primitives::DEFAULT_STAGE_DURATION_DAYS,
            chain_duration_days: primitives::DEFAULT_CHAIN_DURATION_DAYS,
            retry: RetryPolicy::default(),
        }
    }
}

/// What a stage completion achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The caller is done; other contributors are not.
    UserStageCompleted {
        instance: InstanceId,
        progress: StageProgress,
    },
    /// The stage closed and `instance` now carries the chain.
    StageAdvanced {
        from: InstanceId,
        instance: InstanceId,
        stage: Stage,
    },
    /// The last stage closed; the chain is finished.
    ProjectCompleted { instance: InstanceId, chain: ChainId },
}

impl Outcome {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Outcome::UserStageCompleted { .. } => "user_stage_completed",
            Outcome::StageAdvanced { .. } => "stage_advanced",
            Outcome::ProjectCompleted { .. } => "project_completed",
        }
    }
}

/// Request to start a new chain at the first stage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewChain {
    pub organization: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub creator: UserId,
    /// Initial members besides the creator, who always joins as owner.
    #[serde(default)]
    pub members: Vec<(UserId, Role)>,
}

impl NewChain {
    fn validate(&self) -> Result<(), FootprintError> {
        let invalid = |msg: String| Err(FootprintError::InvalidInput(msg));
        for (field, value) in [("organization", &self.organization), ("name", &self.name)] {
            if value.trim().is_empty() {
                return invalid(format!("{field} must not be empty"));
            }
            if value.len() > primitives::MAX_NAME_LENGTH {
                return invalid(format!(
                    "{field} exceeds {} bytes",
                    primitives::MAX_NAME_LENGTH
                ));
            }
        }
        if self.description.len() > primitives::MAX_DESCRIPTION_LENGTH {
            return invalid(format!(
                "description exceeds {} bytes",
                primitives::MAX_DESCRIPTION_LENGTH
            ));
        }
        if self.members.len() > primitives::MAX_INITIAL_MEMBERS {
            return invalid(format!(
                "at most {} initial members",
                primitives::MAX_INITIAL_MEMBERS
            ));
        }
        let mut seen = BTreeSet::from([self.creator]);
        for (user, _) in &self.members {
            if !seen.insert(*user) {
                return invalid(format!("{user} listed more than once"));
            }
        }
        Ok(())
    }
}

/// An instance with its roster and contributor progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceView {
    pub instance: ProjectInstance,
    pub members: Vec<Member>,
    pub progress: StageProgress,
}

impl InstanceView {
    fn load<T: LedgerRead + ?Sized>(txn: &T, id: InstanceId) -> Result<Self, FootprintError> {
        let instance = txn
            .instance(id)?
            .ok_or(FootprintError::InstanceNotFound(id))?;
        Ok(Self {
            instance,
            members: txn.members(id)?,
            progress: MembershipLedger::progress(txn, id)?,
        })
    }
}

/// Counters from one completion sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub advanced: usize,
    pub completed: usize,
    pub failed: usize,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Drives chains through the stage catalog.
pub struct StageEngine<S: Store> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    settings: EngineSettings,
}

impl<S: Store> fmt::Debug for StageEngine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<S: Store> StageEngine<S> {
    /// Engine on the wall clock with notifications discarded.
    pub fn new(store: Arc<S>, settings: EngineSettings) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(NullNotifier),
            settings,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // -------------------------------------------------------------------------
    // Stage completion
    // -------------------------------------------------------------------------

    /// Record that `user` finished their part of the instance's stage and
    /// advance the chain if everyone has.
    pub fn complete_stage(
        &self,
        instance_id: InstanceId,
        user_id: UserId,
    ) -> Result<Outcome, FootprintError> {
        let now = self.clock.now();
        let outcome = self.settings.retry.run("complete_stage", || {
            self.store
                .write(|txn| complete_in(txn, instance_id, user_id, now))
        })?;

        tracing::info!(
            instance_id = instance_id.0,
            user_id = user_id.0,
            outcome = outcome.label(),
            "stage completion recorded"
        );
        if let Outcome::ProjectCompleted { instance, .. } = outcome {
            self.notify_completion(instance);
        }
        Ok(outcome)
    }

    /// Re-check every in-progress instance and finalize the ones whose
    /// contributors are all done.
    ///
    /// Each instance gets its own transaction. Failures are counted and
    /// logged; they never stop the sweep.
    pub fn sweep(&self) -> Result<SweepReport, FootprintError> {
        let now = self.clock.now();
        let ids = self.store.read(|txn| txn.active_instances())?;
        let mut report = SweepReport::default();

        for id in ids {
            report.scanned = report.scanned.saturating_add(1);
            let result = self
                .settings
                .retry
                .run("sweep", || self.store.write(|txn| sweep_one(txn, id, now)));
            match result {
                Ok(None) => {}
                Ok(Some(Outcome::ProjectCompleted { instance, .. })) => {
                    report.completed = report.completed.saturating_add(1);
                    self.notify_completion(instance);
                }
                Ok(Some(_)) => report.advanced = report.advanced.saturating_add(1),
                Err(e) => {
                    report.failed = report.failed.saturating_add(1);
                    tracing::warn!(instance_id = id.0, "sweep failed for instance: {}", e);
                }
            }
        }

        if report.advanced > 0 || report.completed > 0 || report.failed > 0 {
            tracing::info!(
                scanned = report.scanned,
                advanced = report.advanced,
                completed = report.completed,
                failed = report.failed,
                "completion sweep finished"
            );
        } else {
            tracing::debug!(scanned = report.scanned, "completion sweep found nothing to do");
        }
        Ok(report)
    }

    fn notify_completion(&self, instance_id: InstanceId) {
        let loaded = self.store.read(|txn| {
            let instance = txn
                .instance(instance_id)?
                .ok_or(FootprintError::InstanceNotFound(instance_id))?;
            Ok((instance, txn.members(instance_id)?))
        });
        let (instance, members) = match loaded {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(instance_id = instance_id.0, "cannot load completion recipients: {}", e);
                return;
            }
        };

        let message = format!(
            "{} ({}) has completed its final stage",
            instance.name, instance.organization
        );
        for member in members {
            if let Err(e) = self.notifier.notify(member.user_id, &message) {
                tracing::warn!(
                    instance_id = instance_id.0,
                    user_id = member.user_id.0,
                    "{}",
                    e
                );
            }
        }
    }

    // -------------------------------------------------------------------------
    // Chain administration
    // -------------------------------------------------------------------------

    /// Start a chain: first-stage instance, creator as owner, initial members.
    pub fn create_chain(&self, request: &NewChain) -> Result<InstanceView, FootprintError> {
        request.validate()?;
        let now = self.clock.now();
        let settings = self.settings;

        let view = settings.retry.run("create_chain", || {
            self.store.write(|txn| {
                let chain_id = txn.next_chain_id()?;
                let instance_id = txn.next_instance_id()?;
                let stage = StageCatalog::first();
                let instance = ProjectInstance {
                    instance_id,
                    chain_id,
                    organization: request.organization.trim().to_string(),
                    name: request.name.trim().to_string(),
                    description: request.description.clone(),
                    stage,
                    status: InstanceStatus::InProgress,
                    session_duration: 0,
                    carbon_emit: CarbonMass::ZERO,
                    timeline: Timeline::origin(
                        now,
                        settings.stage_duration_days,
                        settings.chain_duration_days,
                    ),
                    successor: None,
                    closed_at: None,
                };
                txn.claim_slot(chain_id, stage, instance_id)?;
                txn.put_instance(&instance)?;
                txn.put_member(&Member::new(instance_id, request.creator, Role::Owner, now))?;
                for (user, role) in &request.members {
                    txn.put_member(&Member::new(instance_id, *user, *role, now))?;
                }
                InstanceView::load(&*txn, instance_id)
            })
        })?;

        tracing::info!(
            chain_id = view.instance.chain_id.0,
            instance_id = view.instance.instance_id.0,
            creator = request.creator.0,
            members = view.members.len(),
            "chain created"
        );
        Ok(view)
    }

    /// Add `user` to an open instance on `inviter`'s authority.
    pub fn add_member(
        &self,
        instance_id: InstanceId,
        inviter: UserId,
        user: UserId,
        role: Role,
    ) -> Result<Member, FootprintError> {
        let now = self.clock.now();
        let member = self.settings.retry.run("add_member", || {
            self.store.write(|txn| {
                let instance = txn
                    .instance(instance_id)?
                    .ok_or(FootprintError::InstanceNotFound(instance_id))?;
                MembershipLedger::add_member(txn, &instance, inviter, user, role, now)
            })
        })?;
        tracing::info!(
            instance_id = instance_id.0,
            user_id = user.0,
            inviter = inviter.0,
            role = %role,
            "member added"
        );
        Ok(member)
    }

    /// Remove an instance from the active set. Owner only.
    ///
    /// Only `InProgress` instances can be archived; completed stages stay
    /// as history. The `(chain, stage)` slot is released so the stage can be restarted.
    pub fn archive(
        &self,
        instance_id: InstanceId,
        actor: UserId,
    ) -> Result<ProjectInstance, FootprintError> {
        let now = self.clock.now();
        let archived = self.settings.retry.run("archive", || {
            self.store.write(|txn| {
                let mut instance = txn
                    .instance(instance_id)?
                    .ok_or(FootprintError::InstanceNotFound(instance_id))?;
                instance.ensure_active()?;
                let member = txn.member(instance_id, actor)?.ok_or(FootprintError::NotAMember {
                    instance: instance_id,
                    user: actor,
                })?;
                if member.role != Role::Owner {
                    return Err(FootprintError::NotPermitted {
                        instance: instance_id,
                        user: actor,
                        action: "archive",
                    });
                }
                instance.status = InstanceStatus::Archived;
                instance.closed_at = Some(now);
                if txn.slot(instance.chain_id, instance.stage)? == Some(instance_id) {
                    txn.release_slot(instance.chain_id, instance.stage)?;
                }
                txn.put_instance(&instance)?;
                Ok(instance)
            })
        })?;
        tracing::info!(instance_id = instance_id.0, actor = actor.0, "instance archived");
        Ok(archived)
    }

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------

    pub fn instance_view(&self, instance_id: InstanceId) -> Result<InstanceView, FootprintError> {
        self.store.read(|txn| InstanceView::load(txn, instance_id))
    }

    /// Every instance of a chain, ordered by stage (then id).
    pub fn chain(&self, chain_id: ChainId) -> Result<Vec<ProjectInstance>, FootprintError> {
        let mut instances = self.store.read(|txn| txn.chain_instances(chain_id))?;
        if instances.is_empty() {
            return Err(FootprintError::ChainNotFound(chain_id));
        }
        instances.sort_by_key(|instance| (instance.stage, instance.instance_id));
        Ok(instances)
    }
}

// =============================================================================
// TRANSACTION BODIES
// =============================================================================

fn complete_in<T: LedgerWrite + ?Sized>(
    txn: &mut T,
    instance_id: InstanceId,
    user_id: UserId,
    now: DateTime<Utc>,
) -> Result<Outcome, FootprintError> {
    let instance = txn
        .instance(instance_id)?
        .ok_or(FootprintError::InstanceNotFound(instance_id))?;
    if !instance.is_active() {
        return replay_closed(&*txn, &instance, user_id);
    }

    MembershipLedger::record_completion(txn, instance_id, user_id)?;
    let progress = MembershipLedger::progress(txn, instance_id)?;
    if !progress.is_complete() {
        return Ok(Outcome::UserStageCompleted {
            instance: instance_id,
            progress,
        });
    }
    finalize(txn, instance, Some(user_id), now)
}

/// A repeated completion on an instance that an advance already closed
/// answers with that advance. Anything else on a closed instance conflicts,
/// including every call on a project's terminal instance.
fn replay_closed<T: LedgerRead + ?Sized>(
    txn: &T,
    instance: &ProjectInstance,
    user_id: UserId,
) -> Result<Outcome, FootprintError> {
    let closed = FootprintError::StageClosed {
        instance: instance.instance_id,
        status: instance.status,
    };
    let successor = match (instance.status, instance.successor) {
        (InstanceStatus::Complete, Some(successor)) => successor,
        _ => return Err(closed),
    };

    let member = txn
        .member(instance.instance_id, user_id)?
        .ok_or(FootprintError::NotAMember {
            instance: instance.instance_id,
            user: user_id,
        })?;
    if !member.role.is_contributor() {
        return Err(FootprintError::OwnerCannotComplete {
            instance: instance.instance_id,
            user: user_id,
        });
    }
    if !member.is_stage_complete() {
        return Err(closed);
    }

    let stage = match txn.instance(successor)? {
        Some(next) => next.stage,
        None => return Err(FootprintError::InstanceNotFound(successor)),
    };
    Ok(Outcome::StageAdvanced {
        from: instance.instance_id,
        instance: successor,
        stage,
    })
}

fn sweep_one<T: LedgerWrite + ?Sized>(
    txn: &mut T,
    instance_id: InstanceId,
    now: DateTime<Utc>,
) -> Result<Option<Outcome>, FootprintError> {
    let Some(instance) = txn.instance(instance_id)? else {
        return Ok(None);
    };
    if !instance.is_active() || !MembershipLedger::all_contributors_complete(&*txn, instance_id)? {
        return Ok(None);
    }
    finalize(txn, instance, None, now).map(Some)
}

/// Close a stage whose contributors are all done.
fn finalize<T: LedgerWrite + ?Sized>(
    txn: &mut T,
    mut instance: ProjectInstance,
    completing: Option<UserId>,
    now: DateTime<Utc>,
) -> Result<Outcome, FootprintError> {
    let from = instance.instance_id;

    let Some(next_stage) = StageCatalog::next(instance.stage) else {
        instance.status = InstanceStatus::Complete;
        instance.closed_at = Some(now);
        txn.put_instance(&instance)?;
        return Ok(Outcome::ProjectCompleted {
            instance: from,
            chain: instance.chain_id,
        });
    };

    let target = match txn.slot(instance.chain_id, next_stage)? {
        Some(existing) => {
            let row = txn
                .instance(existing)?
                .ok_or(FootprintError::InstanceNotFound(existing))?;
            row.ensure_active()?;
            row
        }
        None => {
            let id = txn.next_instance_id()?;
            txn.claim_slot(instance.chain_id, next_stage, id)?;
            let fresh = instance.fork(id, next_stage, now);
            txn.put_instance(&fresh)?;
            fresh
        }
    };

    let migrated = MembershipLedger::migrate(txn, from, target.instance_id, completing, now)?;

    instance.status = InstanceStatus::Complete;
    instance.successor = Some(target.instance_id);
    instance.closed_at = Some(now);
    txn.put_instance(&instance)?;

    tracing::debug!(
        from = from.0,
        to = target.instance_id.0,
        stage = %next_stage,
        migrated,
        "stage advanced"
    );
    Ok(Outcome::StageAdvanced {
        from,
        instance: target.instance_id,
        stage: next_stage,
    })
}

// =============================================================================
// TESTS
// =============================================================================
