//! # Collaborator Ports
//!
//! Interfaces to the systems the engine consumes but does not own.
//!
//! - [`DevicePowerLookup`]: hardware wattage reference tables (read-only)
//! - [`UserProfiles`]: which device a user is working on
//! - [`Notifier`]: best-effort delivery of messages to users
//! - [`Clock`]: the current time, injectable for tests
//!
//! Implementations must be `Send + Sync`; the engine is shared across
//! request handlers.

use crate::carbon::{DeviceClass, DeviceProfile};
use crate::{LookupError, Milliwatts, UserId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Resolves a component model to its average power draw.
pub trait DevicePowerLookup: Send + Sync {
    /// Average wattage of `model` when used in a `class` device.
    fn wattage(&self, model: &str, class: DeviceClass) -> Result<Milliwatts, LookupError>;
}

/// Resolves a user's active device.
pub trait UserProfiles: Send + Sync {
    fn active_device(&self, user: UserId) -> Result<DeviceProfile, LookupError>;
}

/// Failure reported by a notification channel.
#[derive(Debug, Clone, Error)]
#[error("notification to {user} failed: {reason}")]
pub struct NotifyError {
    pub user: UserId,
    pub reason: String,
}

/// Fire-and-forget message delivery.
///
/// Errors are logged by the caller and never undo committed work.
pub trait Notifier: Send + Sync {
    fn notify(&self, user: UserId, message: &str) -> Result<(), NotifyError>;
}

/// Notifier that drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _user: UserId, _message: &str) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
