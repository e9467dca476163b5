//! Threshold counters and rate gate shared by every checker kind
//!
//! Composition instead of inheritance: each concrete checker holds a
//! [`ProbeState`] and feeds probe outcomes into it. `update_status` is the
//! only writer; `status`, `should_check` and `snapshot` are readers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Read-only view of a checker's state.
#[derive(Debug, Clone)]
pub struct ProbeSnapshot {
    pub healthy: bool,
    pub success_count: u32,
    pub failure_count: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_message: String,
}

#[derive(Debug)]
struct StateInner {
    success_count: u32,
    failure_count: u32,
    healthy: bool,
    last_check: Option<Instant>,
    last_check_at: Option<DateTime<Utc>>,
    last_message: String,
}

#[derive(Debug)]
pub struct ProbeState {
    success_threshold: u32,
    failure_threshold: u32,
    retry_interval: Duration,
    inner: RwLock<StateInner>,
}

impl ProbeState {
    pub fn new(success_threshold: u32, failure_threshold: u32, retry_interval: Duration) -> Self {
        Self {
            success_threshold,
            failure_threshold,
            retry_interval,
            inner: RwLock::new(StateInner {
                success_count: 0,
                failure_count: 0,
                healthy: false,
                last_check: None,
                last_check_at: None,
                last_message: String::new(),
            }),
        }
    }

    /// Whether a live probe is due. True before the first check and once
    /// `retry_interval` has elapsed since the last one; callers polling
    /// faster get the cached status instead of a live probe.
    pub async fn should_check(&self) -> bool {
        let inner = self.inner.read().await;
        match inner.last_check {
            None => true,
            Some(last) => last.elapsed() >= self.retry_interval,
        }
    }

    /// Apply one probe outcome. A success bumps `success_count` and resets
    /// `failure_count`, and vice versa; the reported status only flips at
    /// the configured thresholds.
    pub async fn update_status(&self, healthy: bool, message: impl Into<String>) {
        let mut inner = self.inner.write().await;
        if healthy {
            inner.success_count += 1;
            inner.failure_count = 0;
            if inner.success_count >= self.success_threshold {
                inner.healthy = true;
            }
        } else {
            inner.failure_count += 1;
            inner.success_count = 0;
            if inner.failure_count >= self.failure_threshold {
                inner.healthy = false;
            }
        }
        inner.last_check = Some(Instant::now());
        inner.last_check_at = Some(Utc::now());
        inner.last_message = message.into();
    }

    pub async fn status(&self) -> bool {
        self.inner.read().await.healthy
    }

    pub async fn snapshot(&self) -> ProbeSnapshot {
        let inner = self.inner.read().await;
        ProbeSnapshot {
            healthy: inner.healthy,
            success_count: inner.success_count,
            failure_count: inner.failure_count,
            last_check: inner.last_check_at,
            last_message: inner.last_message.clone(),
        }
    }
}
