//! rollsync: zero-downtime rolling image updates for docker-compose
//! services on a single host.
//!
//! Given a service and a target image tag, the orchestrator rewrites the
//! service's image reference in the compose file, restarts the affected
//! replicas under one of four strategies (one-at-a-time, percentage
//! batches, blue/green, canary), gates every step on health checks, keeps
//! versioned snapshots of the compose file, and rolls back on failure.
//! Updates propagate through the `depends_on` graph, dependencies first.

pub mod backup;
pub mod compose;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod health;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod replica;
pub mod strategy;

// Re-export common error types
pub use error::{Result, RollsyncError};
