//! Deployment metrics
//!
//! Thin recorder interface the orchestrator emits into. [`RuntimeMetrics`]
//! forwards to the `metrics` facade so whatever exporter the host process
//! installs picks the series up; [`NullMetrics`] drops everything.

use std::time::Duration;

use metrics::{counter, histogram};

/// Recorder for deployment lifecycle events.
pub trait MetricsCollector: Send + Sync {
    fn record_deployment_start(&self, service: &str, tag: &str);

    fn record_deployment_success(&self, service: &str, tag: &str, duration: Duration);

    fn record_deployment_failure(&self, service: &str, tag: &str, reason: &str);

    fn record_rollback(&self, service: &str, from_version: &str, to_version: &str);
}

/// Emits counters and histograms through the `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuntimeMetrics;

impl MetricsCollector for RuntimeMetrics {
    fn record_deployment_start(&self, service: &str, tag: &str) {
        counter!(
            "rollsync_deployments_total",
            "service" => service.to_string(),
            "tag" => tag.to_string()
        )
        .increment(1);
    }

    fn record_deployment_success(&self, service: &str, tag: &str, duration: Duration) {
        counter!(
            "rollsync_deployments_succeeded_total",
            "service" => service.to_string(),
            "tag" => tag.to_string()
        )
        .increment(1);
        histogram!(
            "rollsync_deployment_duration_seconds",
            "service" => service.to_string()
        )
        .record(duration.as_secs_f64());
    }

    fn record_deployment_failure(&self, service: &str, tag: &str, reason: &str) {
        counter!(
            "rollsync_deployments_failed_total",
            "service" => service.to_string(),
            "tag" => tag.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    fn record_rollback(&self, service: &str, from_version: &str, to_version: &str) {
        counter!(
            "rollsync_rollbacks_total",
            "service" => service.to_string(),
            "from" => from_version.to_string(),
            "to" => to_version.to_string()
        )
        .increment(1);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetrics;

impl MetricsCollector for NullMetrics {
    fn record_deployment_start(&self, _service: &str, _tag: &str) {}

    fn record_deployment_success(&self, _service: &str, _tag: &str, _duration: Duration) {}

    fn record_deployment_failure(&self, _service: &str, _tag: &str, _reason: &str) {}

    fn record_rollback(&self, _service: &str, _from_version: &str, _to_version: &str) {}
}
