//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API. The CLI's
//! `--json-mode` prints the same shapes.

use footprint_core::{
    Accrual, FootprintError, Member, NewChain, Outcome, ProjectInstance, Role, StageProgress,
    SweepReport, UserId,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// RFC 3339 in UTC with second precision, e.g. `2025-03-01T09:00:00Z`.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

/// Body of every non-2xx response produced by the handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    /// Coarse class: not_found, forbidden, conflict, lookup, invalid_input,
    /// transaction, storage, unauthorized, internal.
    pub kind: String,
    pub error: String,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(kind: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            kind: kind.to_string(),
            error: error.into(),
        }
    }
}

// =============================================================================
// SHARED VIEWS
// =============================================================================

/// JSON form of a project instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceJson {
    pub instance_id: u64,
    pub chain_id: u64,
    pub organization: String,
    pub name: String,
    pub description: String,
    pub stage: String,
    pub status: String,
    pub session_duration_secs: u64,
    pub carbon_emit_ug: u64,
    pub carbon_emit_kg: f64,
    pub stage_start: String,
    pub stage_due: String,
    pub chain_start: String,
    pub chain_due: String,
    pub stage_duration_days: u32,
    pub successor: Option<u64>,
    pub closed_at: Option<String>,
}

impl From<&ProjectInstance> for InstanceJson {
    fn from(instance: &ProjectInstance) -> Self {
        let timeline = &instance.timeline;
        Self {
            instance_id: instance.instance_id.0,
            chain_id: instance.chain_id.0,
            organization: instance.organization.clone(),
            name: instance.name.clone(),
            description: instance.description.clone(),
            stage: instance.stage.name().to_string(),
            status: instance.status.as_str().to_string(),
            session_duration_secs: instance.session_duration,
            carbon_emit_ug: instance.carbon_emit.micrograms(),
            carbon_emit_kg: instance.carbon_emit.kilograms(),
            stage_start: timestamp(&timeline.stage_start),
            stage_due: timestamp(&timeline.stage_due),
            chain_start: timestamp(&timeline.chain_start),
            chain_due: timestamp(&timeline.chain_due),
            stage_duration_days: timeline.stage_duration_days,
            successor: instance.successor.map(|id| id.0),
            closed_at: instance.closed_at.as_ref().map(timestamp),
        }
    }
}

/// JSON form of a member row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberJson {
    pub user_id: u64,
    pub role: String,
    /// Absent for owners.
    pub progress_status: Option<String>,
    pub joined_at: String,
}

impl From<&Member> for MemberJson {
    fn from(member: &Member) -> Self {
        Self {
            user_id: member.user_id.0,
            role: member.role.as_str().to_string(),
            progress_status: member.progress_status.map(|s| s.as_str().to_string()),
            joined_at: timestamp(&member.joined_at),
        }
    }
}

/// Contributor completion count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProgressJson {
    pub completed: usize,
    pub total: usize,
}

impl From<StageProgress> for ProgressJson {
    fn from(progress: StageProgress) -> Self {
        Self {
            completed: progress.completed,
            total: progress.total,
        }
    }
}

// =============================================================================
// INSTANCE & CHAIN RESPONSES
// =============================================================================

/// An instance with roster and progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceResponse {
    pub success: bool,
    pub instance: InstanceJson,
    pub members: Vec<MemberJson>,
    pub progress: ProgressJson,
}

impl From<&footprint_core::InstanceView> for InstanceResponse {
    fn from(view: &footprint_core::InstanceView) -> Self {
        Self {
            success: true,
            instance: InstanceJson::from(&view.instance),
            members: view.members.iter().map(MemberJson::from).collect(),
            progress: view.progress.into(),
        }
    }
}

/// All instances of a chain, ordered by stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainResponse {
    pub success: bool,
    pub chain_id: u64,
    pub instances: Vec<InstanceJson>,
}

impl ChainResponse {
    #[must_use]
    pub fn new(chain_id: u64, instances: &[ProjectInstance]) -> Self {
        Self {
            success: true,
            chain_id,
            instances: instances.iter().map(InstanceJson::from).collect(),
        }
    }
}

// =============================================================================
// CREATE CHAIN
// =============================================================================

/// One initial member of a new chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberSpec {
    pub user_id: u64,
    pub role: Role,
}

/// Chain creation request; the caller becomes the owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChainRequest {
    pub organization: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: Vec<MemberSpec>,
}

impl CreateChainRequest {
    #[must_use]
    pub fn into_new_chain(self, creator: UserId) -> NewChain {
        NewChain {
            organization: self.organization,
            name: self.name,
            description: self.description,
            creator,
            members: self
                .members
                .into_iter()
                .map(|m| (UserId(m.user_id), m.role))
                .collect(),
        }
    }
}

// =============================================================================
// MEMBERSHIP
// =============================================================================

/// Invitation acceptance: add `user_id` with `role`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: u64,
    pub role: Role,
}

/// The member row that was created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberResponse {
    pub success: bool,
    pub member: MemberJson,
}

// =============================================================================
// COMPLETE STAGE
// =============================================================================

/// Result of a stage completion.
///
/// `outcome` is one of `user_stage_completed`, `stage_advanced`,
/// `project_completed`; the optional fields that apply are filled in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteResponse {
    pub success: bool,
    pub outcome: String,
    /// Instance the caller should continue on (the successor after an advance).
    pub instance_id: u64,
    pub from_instance_id: Option<u64>,
    pub stage: Option<String>,
    pub chain_id: Option<u64>,
    pub progress: Option<ProgressJson>,
}

impl From<Outcome> for CompleteResponse {
    fn from(outcome: Outcome) -> Self {
        let label = outcome.label().to_string();
        match outcome {
            Outcome::UserStageCompleted { instance, progress } => Self {
                success: true,
                outcome: label,
                instance_id: instance.0,
                from_instance_id: None,
                stage: None,
                chain_id: None,
                progress: Some(progress.into()),
            },
            Outcome::StageAdvanced {
                from,
                instance,
                stage,
            } => Self {
                success: true,
                outcome: label,
                instance_id: instance.0,
                from_instance_id: Some(from.0),
                stage: Some(stage.name().to_string()),
                chain_id: None,
                progress: None,
            },
            Outcome::ProjectCompleted { instance, chain } => Self {
                success: true,
                outcome: label,
                instance_id: instance.0,
                from_instance_id: None,
                stage: None,
                chain_id: Some(chain.0),
                progress: None,
            },
        }
    }
}

// =============================================================================
// ACCRUE
// =============================================================================

/// Session-stop event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccrueRequest {
    pub elapsed_seconds: u64,
}

/// Applied accrual and the instance's new totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccrueResponse {
    pub success: bool,
    pub instance_id: u64,
    pub device: String,
    pub power_mw: u64,
    pub elapsed_seconds: u64,
    pub energy_mwh: u64,
    pub carbon_delta_ug: u64,
    pub carbon_total_ug: u64,
    pub carbon_total_kg: f64,
    pub session_duration_secs: u64,
}

impl From<&Accrual> for AccrueResponse {
    fn from(accrual: &Accrual) -> Self {
        Self {
            success: true,
            instance_id: accrual.instance.instance_id.0,
            device: accrual.device.as_str().to_string(),
            power_mw: accrual.power.total().value(),
            elapsed_seconds: accrual.elapsed_seconds,
            energy_mwh: accrual.delta.energy.value(),
            carbon_delta_ug: accrual.delta.carbon.micrograms(),
            carbon_total_ug: accrual.instance.carbon_emit.micrograms(),
            carbon_total_kg: accrual.instance.carbon_emit.kilograms(),
            session_duration_secs: accrual.instance.session_duration,
        }
    }
}

// =============================================================================
// ARCHIVE & SWEEP
// =============================================================================

/// The archived instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveResponse {
    pub success: bool,
    pub instance: InstanceJson,
}

/// Sweep counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SweepResponse {
    pub success: bool,
    pub scanned: usize,
    pub advanced: usize,
    pub completed: usize,
    pub failed: usize,
}

impl From<SweepReport> for SweepResponse {
    fn from(report: SweepReport) -> Self {
        Self {
            success: true,
            scanned: report.scanned,
            advanced: report.advanced,
            completed: report.completed,
            failed: report.failed,
        }
    }
}

/// Lower-case label for an error's kind, as used in `ErrorResponse::kind`.
#[must_use]
pub fn error_kind_label(error: &FootprintError) -> &'static str {
    use footprint_core::ErrorKind;
    match error.kind() {
        ErrorKind::NotFound => "not_found",
        ErrorKind::Forbidden => "forbidden",
        ErrorKind::Conflict => "conflict",
        ErrorKind::Lookup => "lookup",
        ErrorKind::Transaction => "transaction",
        ErrorKind::InvalidInput => "invalid_input",
        ErrorKind::Storage => "storage",
    }
}
