//! Retry policy for recoverable failures
//!
//! A pure policy object: it inspects an error plus the attempt count and
//! answers with an action. The orchestrator owns the actual rollback and
//! refresh machinery, so policy and executor hold no references to each
//! other.

use std::time::Duration;

use crate::error::{RollsyncError, StrategyError};

/// What to do about a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Try again after the backoff.
    Retry(Duration),
    /// Refresh the replica view, then try again.
    RefreshAndRetry,
    /// Surface the error.
    Abort,
}

#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    /// Bounded retries for health timeouts, backed off at 10s per attempt.
    pub max_health_retries: u32,
    /// Replica errors get one refresh-then-retry.
    pub max_replica_retries: u32,
    /// Other recoverable strategy steps get this many retries.
    pub max_step_retries: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_health_retries: 3,
            max_replica_retries: 1,
            max_step_retries: 1,
        }
    }
}

impl RecoveryPolicy {
    /// Decide the next action for `error` after `attempt` prior retries.
    pub fn decide(&self, error: &RollsyncError, attempt: u32) -> RecoveryAction {
        if !error.is_recoverable() {
            return RecoveryAction::Abort;
        }

        // health failures surfacing through a strategy keep health policy
        let component = match error {
            RollsyncError::Strategy(StrategyError::Health(_)) => "health",
            other => other.component(),
        };

        match component {
            "health" => {
                if attempt < self.max_health_retries {
                    RecoveryAction::Retry(Duration::from_secs(10 * u64::from(attempt + 1)))
                } else {
                    RecoveryAction::Abort
                }
            }
            "replica" => {
                if attempt < self.max_replica_retries {
                    RecoveryAction::RefreshAndRetry
                } else {
                    RecoveryAction::Abort
                }
            }
            "strategy" | "dependency" => {
                if attempt < self.max_step_retries {
                    RecoveryAction::Retry(Duration::from_secs(5))
                } else {
                    RecoveryAction::Abort
                }
            }
            _ => RecoveryAction::Abort,
        }
    }
}
