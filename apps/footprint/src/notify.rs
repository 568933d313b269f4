//! Notification delivery.
//!
//! Mail delivery lives outside this service; completion notices are emitted
//! as structured log events for the delivery pipeline to pick up.

use footprint_core::{Notifier, NotifyError, UserId};

/// Notifier that writes each message as an `info` event on the
/// `footprint::notify` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, user: UserId, message: &str) -> Result<(), NotifyError> {
        tracing::info!(target: "footprint::notify", user_id = user.0, "{}", message);
        Ok(())
    }
}
