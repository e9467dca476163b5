//! Update strategies
//!
//! All four strategies share one skeleton: per step, rewrite the replica's
//! image tag and restart it, gate on health, optionally run hook commands,
//! and pause between steps — all under a single strategy-level deadline.
//! Any failure rolls the already-updated set back (best effort, never
//! cancelled by the deadline) before the error surfaces.

pub mod blue_green;
pub mod canary;
pub mod percentage;
pub mod rolling;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, warn};

use crate::engine::Engine;
use crate::error::{HealthError, StrategyError};
use crate::health::{HealthCheckConfig, HealthChecker};
use crate::replica::{Replica, ReplicaUpdater};

/// Bound on pre/post hook commands.
const HOOK_TIMEOUT: Duration = Duration::from_secs(60);

/// Strategy discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    OneAtATime,
    Percentage,
    BlueGreen,
    Canary,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StrategyKind::OneAtATime => "one-at-a-time",
            StrategyKind::Percentage => "percentage",
            StrategyKind::BlueGreen => "blue-green",
            StrategyKind::Canary => "canary",
        };
        f.write_str(label)
    }
}

impl FromStr for StrategyKind {
    type Err = StrategyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "one-at-a-time" | "rolling" => Ok(StrategyKind::OneAtATime),
            "percentage" => Ok(StrategyKind::Percentage),
            "blue-green" | "bluegreen" => Ok(StrategyKind::BlueGreen),
            "canary" => Ok(StrategyKind::Canary),
            other => Err(StrategyError::InvalidConfig(format!(
                "unknown strategy kind {other}"
            ))),
        }
    }
}

/// Configuration shared by every strategy kind.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    pub health_check: HealthCheckConfig,
    /// Pause between replica updates (and between batches).
    pub delay_between_updates: Duration,
    /// Batch size for the percentage strategy, initial cohort size for
    /// canary, as a percentage of the replica count.
    pub percentage: Option<u32>,
    /// Command executed in each replica's container before its update.
    pub pre_command: Option<String>,
    /// Command executed in each replica's container after it passes health.
    pub post_command: Option<String>,
    /// End-to-end deadline for one strategy execution.
    pub timeout: Duration,
    pub rollback_on_failure: bool,
    /// Blue/green hold period before the blue set is retired.
    pub verification_period: Option<Duration>,
    /// Number of ramp cohorts after the initial canary cohort.
    pub progression_steps: u32,
    /// Pause between canary cohorts.
    pub step_wait_time: Duration,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: StrategyKind::OneAtATime,
            health_check: HealthCheckConfig::default(),
            delay_between_updates: Duration::ZERO,
            percentage: None,
            pre_command: None,
            post_command: None,
            timeout: Duration::from_secs(600),
            rollback_on_failure: true,
            verification_period: None,
            progression_steps: 4,
            step_wait_time: Duration::from_secs(120),
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), StrategyError> {
        if self.timeout.is_zero() {
            return Err(StrategyError::InvalidConfig(
                "strategy timeout must be positive".to_string(),
            ));
        }
        match self.kind {
            StrategyKind::Percentage | StrategyKind::Canary => {
                let pct = self.percentage.ok_or_else(|| {
                    StrategyError::InvalidConfig(format!(
                        "{} strategy requires a percentage",
                        self.kind
                    ))
                })?;
                if !(1..=100).contains(&pct) {
                    return Err(StrategyError::InvalidConfig(format!(
                        "percentage {pct} outside [1, 100]"
                    )));
                }
                if self.kind == StrategyKind::Canary && pct > 50 {
                    warn!(percentage = pct, "canary cohort above 50% defeats the ramp");
                }
            }
            _ => {}
        }
        if self.progression_steps == 0 {
            return Err(StrategyError::InvalidConfig(
                "progression_steps must be at least 1".to_string(),
            ));
        }
        self.health_check.validate()?;
        Ok(())
    }
}

/// Strategy-level deadline, checked at every suspension point. Sleeps are
/// clipped to it so an expired deadline is noticed at the next loop
/// iteration at the latest.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Instant::now() + duration,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn check(&self, doing: &str) -> Result<(), StrategyError> {
        if self.expired() {
            Err(StrategyError::DeadlineExceeded(doing.to_string()))
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, aborting at the deadline instead.
    pub async fn sleep(&self, duration: Duration, doing: &str) -> Result<(), StrategyError> {
        let wake = Instant::now() + duration;
        if wake >= self.at {
            sleep_until(self.at).await;
            return Err(StrategyError::DeadlineExceeded(doing.to_string()));
        }
        sleep_until(wake).await;
        Ok(())
    }
}

/// Executes one of the four strategies against a replica set.
pub struct Strategy {
    config: StrategyConfig,
    updater: Arc<dyn ReplicaUpdater>,
    engine: Arc<dyn Engine>,
}

impl Strategy {
    pub fn new(
        config: StrategyConfig,
        updater: Arc<dyn ReplicaUpdater>,
        engine: Arc<dyn Engine>,
    ) -> Self {
        Self {
            config,
            updater,
            engine,
        }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Run the configured strategy. An empty `new_tag` performs a no-op
    /// update: replicas restart on their current image and are health
    /// checked, which is how dependency services are exercised.
    pub async fn execute(
        &self,
        service: &str,
        new_tag: &str,
        replicas: &[Replica],
    ) -> Result<(), StrategyError> {
        self.config.validate()?;
        let deadline = Deadline::after(self.config.timeout);
        let mut updated: Vec<Replica> = Vec::new();

        info!(
            service,
            tag = new_tag,
            kind = %self.config.kind,
            replicas = replicas.len(),
            "starting update strategy"
        );

        let outcome = match self.config.kind {
            StrategyKind::OneAtATime => {
                rolling::run(self, new_tag, replicas, &deadline, &mut updated).await
            }
            StrategyKind::Percentage => {
                percentage::run(self, new_tag, replicas, &deadline, &mut updated).await
            }
            StrategyKind::BlueGreen => {
                blue_green::run(self, new_tag, replicas, &deadline, &mut updated).await
            }
            StrategyKind::Canary => {
                canary::run(self, new_tag, replicas, &deadline, &mut updated).await
            }
        };

        match outcome {
            Ok(()) => {
                info!(service, tag = new_tag, updated = updated.len(), "strategy complete");
                Ok(())
            }
            Err(err) => {
                error!(service, error = %err, "strategy failed");
                if self.config.rollback_on_failure {
                    self.rollback_partial(service, &updated).await;
                }
                Err(err)
            }
        }
    }

    /// The common per-replica step: deadline gate, pre-command, update,
    /// health gate, post-command, then the inter-update delay when more
    /// steps remain.
    pub(crate) async fn step(
        &self,
        replica: &Replica,
        new_tag: &str,
        deadline: &Deadline,
        updated: &mut Vec<Replica>,
        more_remaining: bool,
    ) -> Result<(), StrategyError> {
        self.apply_update(replica, new_tag, deadline).await?;
        updated.push(replica.clone());
        self.wait_for_health(replica, deadline).await?;
        self.run_post_command(replica).await?;

        if more_remaining && !self.config.delay_between_updates.is_zero() {
            deadline
                .sleep(self.config.delay_between_updates, "inter-update delay")
                .await?;
        }
        Ok(())
    }

    /// Pre-command plus the replica update itself. Callers that batch
    /// updates record successes into the updated set themselves.
    pub(crate) async fn apply_update(
        &self,
        replica: &Replica,
        new_tag: &str,
        deadline: &Deadline,
    ) -> Result<(), StrategyError> {
        deadline.check(&format!("updating {}", replica.service_id()))?;
        if let Some(command) = &self.config.pre_command {
            self.exec_hook(replica, command, true).await?;
        }
        self.updater.update(replica, new_tag).await?;
        Ok(())
    }

    pub(crate) async fn run_post_command(&self, replica: &Replica) -> Result<(), StrategyError> {
        if let Some(command) = &self.config.post_command {
            self.exec_hook(replica, command, false).await?;
        }
        Ok(())
    }

    async fn exec_hook(
        &self,
        replica: &Replica,
        command: &str,
        pre: bool,
    ) -> Result<(), StrategyError> {
        let fail = |reason: String| {
            if pre {
                StrategyError::PreCommand {
                    replica: replica.service_id(),
                    reason,
                }
            } else {
                StrategyError::PostCommand {
                    replica: replica.service_id(),
                    reason,
                }
            }
        };

        if replica.container_id.is_empty() {
            return Err(fail("replica has no container".to_string()));
        }
        let argv = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            command.to_string(),
        ];
        let output = self
            .engine
            .exec(&replica.container_id, &argv, HOOK_TIMEOUT)
            .await
            .map_err(|e| fail(e.to_string()))?;
        if !output.success() {
            let detail = output.stderr.lines().next().unwrap_or("").to_string();
            return Err(fail(format!("exit code {}: {detail}", output.exit_code)));
        }
        Ok(())
    }

    /// Poll the replica's health at 1 Hz until the consecutive-success
    /// threshold passes, the consecutive-failure threshold trips, or the
    /// deadline elapses. An errored probe counts as a failure.
    pub(crate) async fn wait_for_health(
        &self,
        replica: &Replica,
        deadline: &Deadline,
    ) -> Result<(), StrategyError> {
        let checker = HealthChecker::new(
            &self.config.health_check,
            replica,
            Arc::clone(&self.engine),
        )?;
        let success_needed = self.config.health_check.success_threshold;
        let failure_limit = self.config.health_check.failure_threshold;

        loop {
            if deadline.expired() {
                let snapshot = checker.snapshot().await;
                return Err(StrategyError::Health(HealthError::Timeout {
                    service_id: replica.service_id(),
                    message: snapshot.last_message,
                }));
            }

            checker.check().await;
            let snapshot = checker.snapshot().await;
            if snapshot.success_count >= success_needed {
                return Ok(());
            }
            if snapshot.failure_count >= failure_limit {
                return Err(StrategyError::Health(HealthError::FailureThreshold {
                    service_id: replica.service_id(),
                    failures: snapshot.failure_count,
                    message: snapshot.last_message,
                }));
            }

            if let Err(_expired) = deadline
                .sleep(Duration::from_secs(1), "health poll")
                .await
            {
                let snapshot = checker.snapshot().await;
                return Err(StrategyError::Health(HealthError::Timeout {
                    service_id: replica.service_id(),
                    message: snapshot.last_message,
                }));
            }
        }
    }

    /// Roll back every updated replica, best effort: individual failures
    /// are logged, never aborted on, and the deadline does not apply.
    /// With an empty set a single service-level rollback is still issued
    /// so callers can observe that a rollback was attempted.
    pub(crate) async fn rollback_partial(&self, service: &str, updated: &[Replica]) {
        if updated.is_empty() {
            warn!(service, "rollback requested before any replica was updated");
            if let Err(e) = self.updater.rollback(service, None).await {
                error!(service, error = %e, "service-level rollback failed");
            }
            return;
        }
        for replica in updated {
            if let Err(e) = self.updater.rollback(service, Some(replica)).await {
                error!(
                    replica = %replica.service_id(),
                    error = %e,
                    "replica rollback failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            StrategyKind::OneAtATime,
            StrategyKind::Percentage,
            StrategyKind::BlueGreen,
            StrategyKind::Canary,
        ] {
            assert_eq!(kind.to_string().parse::<StrategyKind>().unwrap(), kind);
        }
        assert!("zigzag".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = StrategyConfig {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StrategyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_percentage_bounds() {
        let mut config = StrategyConfig {
            kind: StrategyKind::Percentage,
            percentage: None,
            ..Default::default()
        };
        assert!(config.validate().is_err(), "missing percentage");

        config.percentage = Some(0);
        assert!(config.validate().is_err());

        config.percentage = Some(101);
        assert!(config.validate().is_err());

        config.percentage = Some(50);
        assert!(config.validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_clips_sleep() {
        let deadline = Deadline::after(Duration::from_secs(5));
        assert!(deadline.sleep(Duration::from_secs(1), "short nap").await.is_ok());
        let err = deadline
            .sleep(Duration::from_secs(60), "long nap")
            .await
            .unwrap_err();
        assert!(matches!(err, StrategyError::DeadlineExceeded(_)));
        assert!(deadline.expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_check() {
        let deadline = Deadline::after(Duration::from_millis(10));
        assert!(deadline.check("early").is_ok());
        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(deadline.check("late").is_err());
    }
}
