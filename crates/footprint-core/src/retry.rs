//! Bounded retry for store transactions.
//!
//! Two kinds of failure are retried:
//! - `Transaction`: store-level aborts, retried with exponential backoff
//! - `StageSlotTaken`: a lost `(chain, stage)` claim, retried once at once;
//!   the fresh transaction then finds and reuses the winner's instance

use crate::{FootprintError, primitives};
use serde::Deserialize;
use std::thread;
use std::time::Duration;

/// How many times, and how patiently, to re-run a failed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts for store-level aborts (at least one).
    pub attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: primitives::DEFAULT_TXN_ATTEMPTS,
            backoff_ms: primitives::DEFAULT_TXN_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            attempts: 1,
            backoff_ms: 0,
        }
    }

    /// Run `op`, retrying per policy. `label` names the operation in logs.
    pub fn run<T>(
        &self,
        label: &'static str,
        mut op: impl FnMut() -> Result<T, FootprintError>,
    ) -> Result<T, FootprintError> {
        let max_attempts = self.attempts.max(1);
        let mut aborts = 0u32;
        let mut slot_retries = 0u32;

        loop {
            match op() {
                Err(FootprintError::Transaction(reason)) if aborts.saturating_add(1) < max_attempts => {
                    let delay = self.backoff_ms.saturating_mul(1u64 << aborts.min(16));
                    aborts = aborts.saturating_add(1);
                    tracing::warn!(
                        op = label,
                        attempt = aborts,
                        delay_ms = delay,
                        "transaction aborted, retrying: {}",
                        reason
                    );
                    if delay > 0 {
                        thread::sleep(Duration::from_millis(delay));
                    }
                }
                Err(err @ FootprintError::StageSlotTaken { .. })
                    if slot_retries < primitives::SLOT_CONFLICT_RETRIES =>
                {
                    slot_retries = slot_retries.saturating_add(1);
                    tracing::debug!(op = label, "lost stage slot race, retrying: {}", err);
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChainId, Stage};
    use std::cell::Cell;

    #[test]
    fn retries_transaction_errors_up_to_limit() {
        let calls = Cell::new(0u32);
        let policy = RetryPolicy {
            attempts: 3,
            backoff_ms: 0,
        };
        let result: Result<(), _> = policy.run("test", || {
            calls.set(calls.get() + 1);
            Err(FootprintError::Transaction("busy".to_string()))
        });
        assert!(matches!(result, Err(FootprintError::Transaction(_))));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn succeeds_after_transient_abort() {
        let calls = Cell::new(0u32);
        let result = RetryPolicy::default().run("test", || {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                Err(FootprintError::Transaction("busy".to_string()))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.expect("second attempt"), 7);
    }

    #[test]
    fn slot_conflict_retried_once_then_surfaced() {
        let calls = Cell::new(0u32);
        let result: Result<(), _> = RetryPolicy::none().run("test", || {
            calls.set(calls.get() + 1);
            Err(FootprintError::StageSlotTaken {
                chain: ChainId(1),
                stage: Stage::Development,
            })
        });
        assert!(matches!(result, Err(FootprintError::StageSlotTaken { .. })));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let calls = Cell::new(0u32);
        let result: Result<(), _> = RetryPolicy::default().run("test", || {
            calls.set(calls.get() + 1);
            Err(FootprintError::InvalidInput("bad".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
