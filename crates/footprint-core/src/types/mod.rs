//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the engine:
//! - Identifiers (`ChainId`, `InstanceId`, `UserId`)
//! - Membership roles and progress (`Role`, `ProgressStatus`)
//! - Persisted records (`ProjectInstance`, `Member`, `Timeline`)
//! - Fixed-point accounting units (`Milliwatts`, `CarbonMass`, `EnergyMwh`)
//! - Error types (`FootprintError`, `LookupError`, `ErrorKind`)
//!
//! ## Accounting Guarantees
//!
//! Accounting values are integers with saturating arithmetic. Sums of
//! deltas commute exactly, whatever order concurrent members apply them in.

use crate::catalog::Stage;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identity shared by every instance of one project across its stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChainId(pub u64);

/// Unique identifier of one stage's project record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

/// Identifier of an already-authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain#{}", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance#{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user#{}", self.0)
    }
}

// =============================================================================
// ROLES & STATUSES
// =============================================================================

/// Role of a member on a project instance.
///
/// Owners never contribute to, nor block, stage completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Leader,
    Member,
}

impl Role {
    /// Contributors are the members whose progress gates completion.
    #[must_use]
    pub const fn is_contributor(self) -> bool {
        !matches!(self, Role::Owner)
    }

    /// Roles allowed to bring new people onto an instance.
    #[must_use]
    pub const fn can_invite(self) -> bool {
        matches!(self, Role::Owner | Role::Leader)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Leader => "leader",
            Role::Member => "member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = FootprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "leader" => Ok(Role::Leader),
            "member" => Ok(Role::Member),
            other => Err(FootprintError::InvalidInput(format!("unknown role '{other}'"))),
        }
    }
}

/// Per-member progress within one instance.
///
/// Variant order is the monotonic order: a status may only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    StageComplete,
}

impl ProgressStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "NotStarted",
            ProgressStatus::InProgress => "InProgress",
            ProgressStatus::StageComplete => "StageComplete",
        }
    }
}

/// Lifecycle status of a project instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceStatus {
    InProgress,
    Complete,
    Archived,
}

impl InstanceStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            InstanceStatus::InProgress => "InProgress",
            InstanceStatus::Complete => "Complete",
            InstanceStatus::Archived => "Archived",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ACCOUNTING UNITS
// =============================================================================

/// Electrical power in milliwatts.
///
/// Deserializes from reference data written in watts: an integer (`95`) or
/// a decimal string (`"8.5"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Default)]
#[serde(try_from = "WattsSpec")]
pub struct Milliwatts(pub u64);

/// Wire form of a wattage in reference data.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WattsSpec {
    Whole(u64),
    Text(String),
}

impl TryFrom<WattsSpec> for Milliwatts {
    type Error = FootprintError;

    fn try_from(spec: WattsSpec) -> Result<Self, Self::Error> {
        match spec {
            WattsSpec::Whole(watts) => Ok(Self::from_watts(watts)),
            WattsSpec::Text(text) => Self::parse_watts(&text),
        }
    }
}

impl Milliwatts {
    #[must_use]
    pub const fn from_watts(watts: u64) -> Self {
        Self(watts.saturating_mul(1000))
    }

    /// Parse a wattage written in watts, with at most three fractional digits.
    ///
    /// `"95"` is 95 000 mW, `"8.5"` is 8 500 mW, `"0.125"` is 125 mW.
    pub fn parse_watts(text: &str) -> Result<Self, FootprintError> {
        let invalid = || FootprintError::InvalidInput(format!("invalid wattage '{text}'"));
        let text = text.trim();
        let (whole, frac) = match text.split_once('.') {
            Some((w, f)) => (w, f),
            None => (text, ""),
        };
        if whole.is_empty() || frac.len() > 3 {
            return Err(invalid());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }
        let whole: u64 = whole.parse().map_err(|_| invalid())?;
        let mut frac_mw = 0u64;
        for (i, digit) in frac.bytes().enumerate() {
            let scale = 10u64.pow(2 - i as u32);
            frac_mw = frac_mw.saturating_add(u64::from(digit - b'0').saturating_mul(scale));
        }
        Ok(Self(whole.saturating_mul(1000).saturating_add(frac_mw)))
    }

    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Milliwatts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03} W", self.0 / 1000, self.0 % 1000)
    }
}

/// Energy in milliwatt-hours.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EnergyMwh(pub u64);

impl EnergyMwh {
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Whole watt-hours (truncated).
    #[must_use]
    pub const fn watt_hours(self) -> u64 {
        self.0 / 1000
    }
}

/// Mass of CO₂-equivalent in micrograms.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct CarbonMass(pub u64);

impl CarbonMass {
    pub const ZERO: Self = Self(0);

    pub const MICROGRAMS_PER_KG: u64 = 1_000_000_000;

    #[must_use]
    pub const fn micrograms(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Kilograms, for display and JSON only. Accounting stays in micrograms.
    #[must_use]
    #[allow(clippy::float_arithmetic)]
    pub fn kilograms(self) -> f64 {
        self.0 as f64 / Self::MICROGRAMS_PER_KG as f64
    }
}

impl fmt::Display for CarbonMass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:09} kg CO2e",
            self.0 / Self::MICROGRAMS_PER_KG,
            self.0 % Self::MICROGRAMS_PER_KG
        )
    }
}

// =============================================================================
// TIMELINE
// =============================================================================

/// Schedule fields carried on every instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    pub stage_start: DateTime<Utc>,
    pub stage_due: DateTime<Utc>,
    pub chain_start: DateTime<Utc>,
    pub chain_due: DateTime<Utc>,
    pub stage_duration_days: u32,
}

fn add_days(at: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    TimeDelta::try_days(i64::from(days))
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(at)
}

impl Timeline {
    /// Timeline for the first instance of a chain.
    #[must_use]
    pub fn origin(now: DateTime<Utc>, stage_duration_days: u32, chain_duration_days: u32) -> Self {
        Self {
            stage_start: now,
            stage_due: add_days(now, stage_duration_days),
            chain_start: now,
            chain_due: add_days(now, chain_duration_days),
            stage_duration_days,
        }
    }

    /// Timeline for the next stage: the stage window restarts at `now`,
    /// the chain window is carried over unchanged.
    #[must_use]
    pub fn next_stage(&self, now: DateTime<Utc>) -> Self {
        Self {
            stage_start: now,
            stage_due: add_days(now, self.stage_duration_days),
            chain_start: self.chain_start,
            chain_due: self.chain_due,
            stage_duration_days: self.stage_duration_days,
        }
    }
}

// =============================================================================
// PROJECT INSTANCE
// =============================================================================

/// One stage's worth of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInstance {
    pub instance_id: InstanceId,
    pub chain_id: ChainId,
    pub organization: String,
    pub name: String,
    pub description: String,
    pub stage: Stage,
    pub status: InstanceStatus,
    /// Accumulated session time in seconds.
    pub session_duration: u64,
    /// Accumulated emissions.
    pub carbon_emit: CarbonMass,
    pub timeline: Timeline,
    /// Next stage's instance, set when this one was closed by an advance.
    pub successor: Option<InstanceId>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl ProjectInstance {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == InstanceStatus::InProgress
    }

    /// Fresh instance of `stage` sharing this instance's chain identity.
    #[must_use]
    pub fn fork(&self, instance_id: InstanceId, stage: Stage, now: DateTime<Utc>) -> Self {
        Self {
            instance_id,
            chain_id: self.chain_id,
            organization: self.organization.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            stage,
            status: InstanceStatus::InProgress,
            session_duration: 0,
            carbon_emit: CarbonMass::ZERO,
            timeline: self.timeline.next_stage(now),
            successor: None,
            closed_at: None,
        }
    }

    /// Conflict error for operations that need an open instance.
    pub fn ensure_active(&self) -> Result<(), FootprintError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(FootprintError::StageClosed {
                instance: self.instance_id,
                status: self.status,
            })
        }
    }
}

// =============================================================================
// MEMBER
// =============================================================================

/// A person's participation record on one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub instance_id: InstanceId,
    pub user_id: UserId,
    pub role: Role,
    /// Always `None` for owners.
    pub progress_status: Option<ProgressStatus>,
    pub joined_at: DateTime<Utc>,
}

impl Member {
    /// New member record; contributors start `NotStarted`, owners carry no status.
    #[must_use]
    pub fn new(instance_id: InstanceId, user_id: UserId, role: Role, now: DateTime<Utc>) -> Self {
        Self {
            instance_id,
            user_id,
            role,
            progress_status: role.is_contributor().then_some(ProgressStatus::NotStarted),
            joined_at: now,
        }
    }

    /// Move progress forward to `status`; never regresses, never touches owners.
    ///
    /// Returns `true` if the stored status changed.
    pub fn advance_to(&mut self, status: ProgressStatus) -> bool {
        if !self.role.is_contributor() {
            self.progress_status = None;
            return false;
        }
        let next = self.progress_status.map_or(status, |current| current.max(status));
        let changed = self.progress_status != Some(next);
        self.progress_status = Some(next);
        changed
    }

    #[must_use]
    pub fn is_stage_complete(&self) -> bool {
        self.progress_status == Some(ProgressStatus::StageComplete)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Failure to resolve reference data for an accrual.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// The user has no active device on their profile.
    #[error("no active device registered for {0}")]
    NoActiveDevice(UserId),

    /// A component required by the device's power formula is missing.
    #[error("device profile for {user} has no {component} component")]
    MissingComponent { user: UserId, component: &'static str },

    /// The wattage tables have no entry for the component model.
    #[error("no wattage entry for '{model}' ({class})")]
    UnknownModel { model: String, class: String },
}

/// Coarse classification used by callers to map errors (HTTP status, retries).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Conflict,
    Lookup,
    Transaction,
    InvalidInput,
    Storage,
}

/// Errors that can occur in the engine.
///
/// - No silent failures
/// - Any error returned from inside a transaction aborts that transaction
#[derive(Debug, Error)]
pub enum FootprintError {
    #[error("instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("chain not found: {0}")]
    ChainNotFound(ChainId),

    #[error("{user} is not a member of {instance}")]
    NotAMember { instance: InstanceId, user: UserId },

    #[error("owners cannot complete a stage ({user} on {instance})")]
    OwnerCannotComplete { instance: InstanceId, user: UserId },

    #[error("{user} is not allowed to {action} on {instance}")]
    NotPermitted {
        instance: InstanceId,
        user: UserId,
        action: &'static str,
    },

    #[error("{instance} is already {status}")]
    StageClosed {
        instance: InstanceId,
        status: InstanceStatus,
    },

    #[error("{chain} already has an instance for stage {stage}")]
    StageSlotTaken { chain: ChainId, stage: Stage },

    #[error("{user} is already a member of {instance}")]
    AlreadyMember { instance: InstanceId, user: UserId },

    #[error("lookup failed: {0}")]
    Lookup(#[from] LookupError),

    #[error("transaction aborted: {0}")]
    Transaction(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl FootprintError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InstanceNotFound(_) | Self::ChainNotFound(_) => ErrorKind::NotFound,
            Self::NotAMember { .. } | Self::OwnerCannotComplete { .. } | Self::NotPermitted { .. } => {
                ErrorKind::Forbidden
            }
            Self::StageClosed { .. } | Self::StageSlotTaken { .. } | Self::AlreadyMember { .. } => {
                ErrorKind::Conflict
            }
            Self::Lookup(_) => ErrorKind::Lookup,
            Self::Transaction(_) => ErrorKind::Transaction,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Serialization(_) | Self::Deserialization(_) | Self::Io(_) => ErrorKind::Storage,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
