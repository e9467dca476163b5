//! Rolling update orchestrator
//!
//! Binds the compose model, replica detection, dependency graph, backup
//! log, health gating and the configured strategy into one `update` /
//! `rollback` surface. One update runs at a time per process (mutex gate)
//! and per compose file (exclusive on-disk lock). The orchestrator, not
//! the strategy, emits lifecycle notifications and metrics; failures of
//! either are logged and swallowed.

pub mod recovery;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backup::{BackupLog, RollbackEntry};
use crate::compose::ComposeModel;
use crate::engine::Engine;
use crate::error::{ConfigError, Result, RollbackError, RollsyncError};
use crate::graph::DependencyGraph;
use crate::metrics::MetricsCollector;
use crate::notify::Notifier;
use crate::replica::{Replica, ReplicaManager, ReplicaStatus, ReplicaUpdater};
use crate::strategy::{Deadline, Strategy, StrategyConfig};
use recovery::{RecoveryAction, RecoveryPolicy};

/// Bound on the in-memory deployment history.
const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    InProgress,
    Succeeded,
    Failed,
    RolledBack,
}

/// Record of one update drive, kept in memory only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentState {
    pub id: Uuid,
    pub service_name: String,
    pub new_tag: String,
    pub old_tag: String,
    pub status: DeploymentStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Strategy attempts consumed by the recovery loop.
    pub attempts: u32,
    pub max_attempts: u32,
    pub rollback_on_failure: bool,
}

/// Exclusive on-disk lock next to the live compose file. Held for the
/// whole update so concurrent invocations from other processes bail out
/// instead of interleaving writes.
struct UpdateLock {
    path: PathBuf,
}

impl UpdateLock {
    fn acquire(compose_path: &Path) -> std::result::Result<Self, ConfigError> {
        let name = compose_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("compose.yml");
        let path = compose_path.with_file_name(format!(".{name}.lock"));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(ConfigError::Locked(path.display().to_string()))
            }
            Err(e) => Err(ConfigError::Locked(format!("{}: {e}", path.display()))),
        }
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// A failure during the ordered walk, tagged with the service whose step
/// failed. A dependency failing mid-order must roll back that dependency,
/// not the originally requested target.
struct UpdateFailure {
    service: String,
    error: RollsyncError,
}

pub struct Orchestrator {
    compose_path: PathBuf,
    engine: Arc<dyn Engine>,
    replicas: Arc<ReplicaManager>,
    strategy: Strategy,
    backups: BackupLog,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<dyn MetricsCollector>,
    policy: RecoveryPolicy,
    update_gate: Mutex<()>,
    current: RwLock<Option<DeploymentState>>,
    history: RwLock<Vec<DeploymentState>>,
}

impl Orchestrator {
    pub fn new(
        compose_path: impl Into<PathBuf>,
        engine: Arc<dyn Engine>,
        strategy_config: StrategyConfig,
        backups: BackupLog,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        let compose_path = compose_path.into();
        let replicas = Arc::new(ReplicaManager::new(
            compose_path.clone(),
            Arc::clone(&engine),
        ));
        let updater: Arc<dyn ReplicaUpdater> = Arc::clone(&replicas) as Arc<dyn ReplicaUpdater>;
        let strategy = Strategy::new(strategy_config, updater, Arc::clone(&engine));
        Self {
            compose_path,
            engine,
            replicas,
            strategy,
            backups,
            notifier,
            metrics,
            policy: RecoveryPolicy::default(),
            update_gate: Mutex::new(()),
            current: RwLock::new(None),
            history: RwLock::new(Vec::new()),
        }
    }

    pub fn with_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn replicas(&self) -> &ReplicaManager {
        &self.replicas
    }

    pub fn backups(&self) -> &BackupLog {
        &self.backups
    }

    /// Drive a rolling update of `service` to `new_tag`.
    ///
    /// Dependencies update first with an empty tag (restart plus health
    /// pass on their current image); only the requested service gets the
    /// new tag. Any failure triggers a rollback of the service whose step
    /// failed when `rollback_on_failure` is set, and the original error
    /// propagates either way.
    pub async fn update(&self, service: &str, new_tag: &str) -> Result<()> {
        let _gate = self.update_gate.lock().await;
        let _lock = UpdateLock::acquire(&self.compose_path)?;
        let started = Instant::now();

        self.announce_start(service, new_tag).await;
        let outcome = self.update_inner(service, new_tag).await;

        match outcome {
            Ok(()) => {
                let duration = started.elapsed();
                self.finish_deployment(DeploymentStatus::Succeeded).await;
                self.announce_success(service, new_tag, duration).await;
                info!(service, tag = new_tag, ?duration, "update complete");
                Ok(())
            }
            Err(UpdateFailure {
                service: failed,
                error: err,
            }) => {
                error!(
                    service,
                    failed = %failed,
                    component = err.component(),
                    critical = err.is_critical(),
                    error = %err,
                    "update failed"
                );
                self.announce_failure(service, new_tag, &err).await;

                let mut status = DeploymentStatus::Failed;
                if self.strategy.config().rollback_on_failure {
                    match self.rollback_inner(&failed).await {
                        Ok(()) => status = DeploymentStatus::RolledBack,
                        Err(rollback_err) => {
                            // surfaced, but the original failure wins
                            error!(
                                service = %failed,
                                error = %rollback_err,
                                "rollback after failed update also failed"
                            );
                        }
                    }
                }
                self.finish_deployment(status).await;
                Err(err)
            }
        }
    }

    /// Restore the newest snapshot for `service` and restart it.
    pub async fn rollback(&self, service: &str) -> Result<()> {
        let _gate = self.update_gate.lock().await;
        let _lock = UpdateLock::acquire(&self.compose_path)?;
        self.rollback_inner(service).await
    }

    /// Restore the newest snapshot whose recorded tag equals `version`.
    pub async fn rollback_to_version(&self, service: &str, version: &str) -> Result<()> {
        let _gate = self.update_gate.lock().await;
        let _lock = UpdateLock::acquire(&self.compose_path)?;
        let entry = self
            .backups
            .find_version(service, version)?
            .ok_or_else(|| {
                RollsyncError::Rollback(RollbackError::VersionNotFound {
                    service: service.to_string(),
                    version: version.to_string(),
                })
            })?;
        self.restore_entry(service, &entry).await
    }

    pub async fn current_deployment(&self) -> Option<DeploymentState> {
        self.current.read().await.clone()
    }

    pub async fn deployment_history(&self, limit: Option<usize>) -> Vec<DeploymentState> {
        let history = self.history.read().await;
        let limit = limit.unwrap_or(history.len());
        history.iter().rev().take(limit).cloned().collect()
    }

    async fn update_inner(
        &self,
        service: &str,
        new_tag: &str,
    ) -> std::result::Result<(), UpdateFailure> {
        // failures before the ordered walk starts belong to the target
        let fail = |error: RollsyncError| UpdateFailure {
            service: service.to_string(),
            error,
        };

        let model = ComposeModel::load(&self.compose_path).map_err(|e| fail(e.into()))?;
        model.require(service).map_err(|e| fail(e.into()))?;
        let graph = DependencyGraph::from_model(&model);
        let order = graph
            .update_order(&[service])
            .map_err(|e| fail(e.into()))?;
        info!(service, tag = new_tag, ?order, "resolved update order");

        let old_tag = model
            .service(service)
            .and_then(|spec| spec.image_tag())
            .unwrap_or("latest")
            .to_string();
        self.begin_deployment(service, new_tag, &old_tag).await;

        self.run_ordered(&model, &order, service, new_tag).await
    }

    async fn run_ordered(
        &self,
        model: &ComposeModel,
        order: &[String],
        target: &str,
        new_tag: &str,
    ) -> std::result::Result<(), UpdateFailure> {
        for service in order {
            let tag = if service == target { new_tag } else { "" };
            if let Err(error) = self.update_service(model, service, tag).await {
                return Err(UpdateFailure {
                    service: service.clone(),
                    error,
                });
            }
        }
        Ok(())
    }

    /// One service of the resolved order: ensure replicas, snapshot, run
    /// the strategy under the recovery policy, then a refreshed health
    /// sweep.
    async fn update_service(
        &self,
        model: &ComposeModel,
        service: &str,
        tag: &str,
    ) -> Result<()> {
        let replicas = self.ensure_replicas(service).await?;

        let current_tag = model
            .service(service)
            .and_then(|spec| spec.image_tag())
            .unwrap_or("latest");
        self.backups
            .snapshot(&self.compose_path, service, current_tag)?;

        self.run_strategy_with_recovery(service, tag, replicas)
            .await?;

        self.replicas
            .refresh()
            .await
            .map_err(RollsyncError::Replica)?;
        let refreshed = self
            .replicas
            .get_for(service)
            .await
            .map_err(RollsyncError::Replica)?;
        self.health_sweep(service, &refreshed).await
    }

    async fn run_strategy_with_recovery(
        &self,
        service: &str,
        tag: &str,
        mut replicas: Vec<Replica>,
    ) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .strategy
                .execute(service, tag, &replicas)
                .await
                .map_err(RollsyncError::Strategy);
            let Err(err) = result else { return Ok(()) };

            match self.policy.decide(&err, attempt) {
                RecoveryAction::Abort => return Err(err),
                RecoveryAction::Retry(backoff) => {
                    warn!(service, attempt, ?backoff, error = %err, "retrying strategy");
                    tokio::time::sleep(backoff).await;
                }
                RecoveryAction::RefreshAndRetry => {
                    warn!(service, attempt, error = %err, "refreshing replicas and retrying");
                    self.replicas
                        .refresh()
                        .await
                        .map_err(RollsyncError::Replica)?;
                    replicas = self
                        .replicas
                        .get_for(service)
                        .await
                        .map_err(RollsyncError::Replica)?;
                }
            }
            attempt += 1;
            self.record_attempt().await;
        }
    }

    /// Replicas for `service`, with the single refresh retry replica
    /// errors are granted.
    async fn ensure_replicas(&self, service: &str) -> Result<Vec<Replica>> {
        let replicas = self
            .replicas
            .get_for(service)
            .await
            .map_err(RollsyncError::Replica)?;
        if !replicas.is_empty() {
            return Ok(replicas);
        }
        debug!(service, "no cached replicas, refreshing detector view");
        self.replicas
            .refresh()
            .await
            .map_err(RollsyncError::Replica)?;
        let replicas = self
            .replicas
            .get_for(service)
            .await
            .map_err(RollsyncError::Replica)?;
        if replicas.is_empty() {
            return Err(RollsyncError::Replica(
                crate::error::ReplicaError::NoneDetected(service.to_string()),
            ));
        }
        Ok(replicas)
    }

    /// Final verification pass over a fresh replica view. Placeholders
    /// without containers are skipped; they have nothing to probe.
    async fn health_sweep(&self, service: &str, replicas: &[Replica]) -> Result<()> {
        let deadline = Deadline::after(self.strategy.config().timeout);
        for replica in replicas {
            if replica.status == ReplicaStatus::NotFound {
                debug!(replica = %replica.service_id(), "skipping sweep of absent replica");
                continue;
            }
            self.strategy
                .wait_for_health(replica, &deadline)
                .await
                .map_err(RollsyncError::Strategy)?;
        }
        info!(service, replicas = replicas.len(), "health sweep passed");
        Ok(())
    }

    async fn rollback_inner(&self, service: &str) -> Result<()> {
        let entry = self
            .backups
            .latest(service)?
            .ok_or_else(|| RollsyncError::Rollback(RollbackError::NoHistory(service.to_string())))?;
        self.restore_entry(service, &entry).await
    }

    async fn restore_entry(&self, service: &str, entry: &RollbackEntry) -> Result<()> {
        let from_tag = ComposeModel::load(&self.compose_path)
            .ok()
            .and_then(|model| {
                model
                    .service(service)
                    .and_then(|spec| spec.image_tag().map(str::to_string))
            })
            .unwrap_or_default();

        self.backups.restore(entry, &self.compose_path)?;
        self.engine
            .compose_up(&self.compose_path, service)
            .await?;

        self.replicas
            .refresh()
            .await
            .map_err(RollsyncError::Replica)?;
        let replicas = self
            .replicas
            .get_for(service)
            .await
            .map_err(RollsyncError::Replica)?;
        self.health_sweep(service, &replicas).await?;

        self.announce_rollback(service, &from_tag, &entry.image_tag)
            .await;
        Ok(())
    }

    // lifecycle bookkeeping

    async fn begin_deployment(&self, service: &str, new_tag: &str, old_tag: &str) {
        let state = DeploymentState {
            id: Uuid::new_v4(),
            service_name: service.to_string(),
            new_tag: new_tag.to_string(),
            old_tag: old_tag.to_string(),
            status: DeploymentStatus::InProgress,
            started_at: Utc::now(),
            finished_at: None,
            attempts: 0,
            max_attempts: self.policy.max_health_retries,
            rollback_on_failure: self.strategy.config().rollback_on_failure,
        };
        let mut current = self.current.write().await;
        *current = Some(state);
    }

    async fn record_attempt(&self) {
        let mut current = self.current.write().await;
        if let Some(state) = current.as_mut() {
            state.attempts += 1;
        }
    }

    async fn finish_deployment(&self, status: DeploymentStatus) {
        let finished = {
            let mut current = self.current.write().await;
            current.take().map(|mut state| {
                state.status = status;
                state.finished_at = Some(Utc::now());
                state
            })
        };
        if let Some(state) = finished {
            let mut history = self.history.write().await;
            history.push(state);
            if history.len() > HISTORY_LIMIT {
                history.remove(0);
            }
        }
    }

    // notifications and metrics: never fatal

    async fn announce_start(&self, service: &str, tag: &str) {
        self.metrics.record_deployment_start(service, tag);
        if self.notifier.should_notify_on_start() {
            if let Err(e) = self.notifier.notify_start(service, tag).await {
                warn!(error = %e, "start notification failed (ignored)");
            }
        }
    }

    async fn announce_success(&self, service: &str, tag: &str, duration: Duration) {
        self.metrics
            .record_deployment_success(service, tag, duration);
        if self.notifier.should_notify_on_success() {
            if let Err(e) = self.notifier.notify_success(service, tag, duration).await {
                warn!(error = %e, "success notification failed (ignored)");
            }
        }
    }

    async fn announce_failure(&self, service: &str, tag: &str, err: &RollsyncError) {
        let reason = err.to_string();
        self.metrics
            .record_deployment_failure(service, tag, err.component());
        if self.notifier.should_notify_on_failure() {
            if let Err(e) = self.notifier.notify_failure(service, tag, &reason).await {
                warn!(error = %e, "failure notification failed (ignored)");
            }
        }
    }

    async fn announce_rollback(&self, service: &str, from: &str, to: &str) {
        self.metrics.record_rollback(service, from, to);
        if self.notifier.should_notify_on_rollback() {
            if let Err(e) = self.notifier.notify_rollback(service, from, to).await {
                warn!(error = %e, "rollback notification failed (ignored)");
            }
        }
    }
}
