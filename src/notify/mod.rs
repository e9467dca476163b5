//! Deployment lifecycle notifications
//!
//! The orchestrator reports four lifecycle events through the [`Notifier`]
//! trait. Delivery failures are never fatal to an update; the orchestrator
//! logs and swallows them. [`LogNotifier`] is the default sink;
//! [`WebhookNotifier`] posts a JSON document per event.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::error::NotifyError;

/// Per-event enable flags plus the four send operations.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn should_notify_on_start(&self) -> bool;
    fn should_notify_on_success(&self) -> bool;
    fn should_notify_on_failure(&self) -> bool;
    fn should_notify_on_rollback(&self) -> bool;

    async fn notify_start(&self, service: &str, version: &str) -> Result<(), NotifyError>;

    async fn notify_success(
        &self,
        service: &str,
        version: &str,
        duration: Duration,
    ) -> Result<(), NotifyError>;

    async fn notify_failure(
        &self,
        service: &str,
        version: &str,
        reason: &str,
    ) -> Result<(), NotifyError>;

    async fn notify_rollback(
        &self,
        service: &str,
        from_version: &str,
        to_version: &str,
    ) -> Result<(), NotifyError>;
}

/// Default notifier: structured log lines, always enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn should_notify_on_start(&self) -> bool {
        true
    }

    fn should_notify_on_success(&self) -> bool {
        true
    }

    fn should_notify_on_failure(&self) -> bool {
        true
    }

    fn should_notify_on_rollback(&self) -> bool {
        true
    }

    async fn notify_start(&self, service: &str, version: &str) -> Result<(), NotifyError> {
        info!(service, version, event = "start", "deployment started");
        Ok(())
    }

    async fn notify_success(
        &self,
        service: &str,
        version: &str,
        duration: Duration,
    ) -> Result<(), NotifyError> {
        info!(service, version, event = "success", ?duration, "deployment succeeded");
        Ok(())
    }

    async fn notify_failure(
        &self,
        service: &str,
        version: &str,
        reason: &str,
    ) -> Result<(), NotifyError> {
        info!(service, version, event = "failure", reason, "deployment failed");
        Ok(())
    }

    async fn notify_rollback(
        &self,
        service: &str,
        from_version: &str,
        to_version: &str,
    ) -> Result<(), NotifyError> {
        info!(
            service,
            from = from_version,
            to = to_version,
            event = "rollback",
            "deployment rolled back"
        );
        Ok(())
    }
}

/// Which lifecycle events a webhook subscriber wants.
#[derive(Debug, Clone, Copy)]
pub struct NotifyEvents {
    pub on_start: bool,
    pub on_success: bool,
    pub on_failure: bool,
    pub on_rollback: bool,
}

impl Default for NotifyEvents {
    fn default() -> Self {
        Self {
            on_start: false,
            on_success: true,
            on_failure: true,
            on_rollback: true,
        }
    }
}

/// POSTs one JSON document per lifecycle event.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    events: NotifyEvents,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, events: NotifyEvents) -> Result<Self, NotifyError> {
        let url = url.into();
        if url.is_empty() {
            return Err(NotifyError::InvalidConfig("empty webhook url".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            client,
            url,
            events,
        })
    }

    async fn post(&self, payload: serde_json::Value) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Send(e.to_string()))?;
        if !response.status().is_success() {
            return Err(NotifyError::Send(format!(
                "webhook returned HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn should_notify_on_start(&self) -> bool {
        self.events.on_start
    }

    fn should_notify_on_success(&self) -> bool {
        self.events.on_success
    }

    fn should_notify_on_failure(&self) -> bool {
        self.events.on_failure
    }

    fn should_notify_on_rollback(&self) -> bool {
        self.events.on_rollback
    }

    async fn notify_start(&self, service: &str, version: &str) -> Result<(), NotifyError> {
        self.post(json!({
            "event": "deployment_start",
            "service": service,
            "version": version,
        }))
        .await
    }

    async fn notify_success(
        &self,
        service: &str,
        version: &str,
        duration: Duration,
    ) -> Result<(), NotifyError> {
        self.post(json!({
            "event": "deployment_success",
            "service": service,
            "version": version,
            "duration_seconds": duration.as_secs_f64(),
        }))
        .await
    }

    async fn notify_failure(
        &self,
        service: &str,
        version: &str,
        reason: &str,
    ) -> Result<(), NotifyError> {
        self.post(json!({
            "event": "deployment_failure",
            "service": service,
            "version": version,
            "reason": reason,
        }))
        .await
    }

    async fn notify_rollback(
        &self,
        service: &str,
        from_version: &str,
        to_version: &str,
    ) -> Result<(), NotifyError> {
        self.post(json!({
            "event": "deployment_rollback",
            "service": service,
            "from_version": from_version,
            "to_version": to_version,
        }))
        .await
    }
}
