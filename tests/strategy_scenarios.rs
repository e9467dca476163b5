//! Strategy-level scenarios driven through test doubles: ordering,
//! batching, rollback coverage and the empty-set rollback contract.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{replica, CountingUpdater, MockEngine};
use rollsync::error::{HealthError, StrategyError};
use rollsync::health::{CheckKind, HealthCheckConfig};
use rollsync::replica::Replica;
use rollsync::strategy::{Strategy, StrategyConfig, StrategyKind};

fn health(failure_threshold: u32) -> HealthCheckConfig {
    HealthCheckConfig {
        kind: CheckKind::Container,
        timeout: Duration::from_secs(1),
        retry_interval: Duration::from_millis(100),
        success_threshold: 1,
        failure_threshold,
        ..Default::default()
    }
}

fn config(kind: StrategyKind, failure_threshold: u32) -> StrategyConfig {
    StrategyConfig {
        kind,
        health_check: health(failure_threshold),
        timeout: Duration::from_secs(30),
        ..Default::default()
    }
}

fn web_replicas(engine: &MockEngine, count: u32) -> Vec<Replica> {
    engine.add_service("shop", "web", count, "acme/web:v1");
    (1..=count)
        .map(|i| replica("web", &i.to_string(), &format!("web-c{i}"), "v1"))
        .collect()
}

#[tokio::test]
async fn sequential_happy_path_updates_in_order() {
    let engine = Arc::new(MockEngine::new());
    let updater = Arc::new(CountingUpdater::new());
    let mut replicas = web_replicas(&engine, 3);
    // hand the strategy a shuffled list; it must sort by replica id
    replicas.swap(0, 2);

    let strategy = Strategy::new(
        config(StrategyKind::OneAtATime, 3),
        Arc::clone(&updater) as Arc<dyn rollsync::replica::ReplicaUpdater>,
        Arc::clone(&engine) as Arc<dyn rollsync::engine::Engine>,
    );
    strategy.execute("web", "v2", &replicas).await.unwrap();

    let updates = updater.updates();
    assert_eq!(
        updates,
        vec![
            ("web-1".to_string(), "v2".to_string()),
            ("web-2".to_string(), "v2".to_string()),
            ("web-3".to_string(), "v2".to_string()),
        ]
    );
    assert!(updater.rollbacks().is_empty(), "no rollback on success");
}

#[tokio::test]
async fn percentage_failure_rolls_back_every_touched_replica() {
    let engine = Arc::new(MockEngine::new());
    let updater = Arc::new(CountingUpdater::new());
    let replicas = web_replicas(&engine, 4);
    engine.set_unhealthy("web-c3");

    let strategy = Strategy::new(
        StrategyConfig {
            percentage: Some(50),
            ..config(StrategyKind::Percentage, 1)
        },
        Arc::clone(&updater) as Arc<dyn rollsync::replica::ReplicaUpdater>,
        Arc::clone(&engine) as Arc<dyn rollsync::engine::Engine>,
    );
    let err = strategy.execute("web", "v2", &replicas).await.unwrap_err();

    assert!(matches!(
        err,
        StrategyError::Health(HealthError::FailureThreshold { .. })
    ));
    // both batches were applied before replica 3 failed its gate
    assert_eq!(updater.updates().len(), 4);

    let mut rolled_back: Vec<String> = updater
        .rollbacks()
        .into_iter()
        .filter_map(|(_, replica)| replica)
        .collect();
    rolled_back.sort();
    assert_eq!(rolled_back, ["web-1", "web-2", "web-3", "web-4"]);
}

#[tokio::test]
async fn empty_set_rollback_is_still_observable() {
    let engine = Arc::new(MockEngine::new());
    let updater = Arc::new(CountingUpdater::new());
    let replicas = web_replicas(&engine, 2);
    updater.fail_update("web-1");

    let strategy = Strategy::new(
        config(StrategyKind::OneAtATime, 3),
        Arc::clone(&updater) as Arc<dyn rollsync::replica::ReplicaUpdater>,
        Arc::clone(&engine) as Arc<dyn rollsync::engine::Engine>,
    );
    let err = strategy.execute("web", "v2", &replicas).await.unwrap_err();

    assert!(matches!(err, StrategyError::Update(_)));
    assert_eq!(
        updater.rollbacks(),
        vec![("web".to_string(), None)],
        "one service-level rollback even though nothing was updated"
    );
}

#[tokio::test]
async fn rollback_can_be_disabled() {
    let engine = Arc::new(MockEngine::new());
    let updater = Arc::new(CountingUpdater::new());
    let replicas = web_replicas(&engine, 2);
    engine.set_unhealthy("web-c2");

    let strategy = Strategy::new(
        StrategyConfig {
            rollback_on_failure: false,
            ..config(StrategyKind::OneAtATime, 1)
        },
        Arc::clone(&updater) as Arc<dyn rollsync::replica::ReplicaUpdater>,
        Arc::clone(&engine) as Arc<dyn rollsync::engine::Engine>,
    );
    assert!(strategy.execute("web", "v2", &replicas).await.is_err());
    assert!(updater.rollbacks().is_empty());
}

#[tokio::test]
async fn canary_single_replica_is_one_cohort() {
    let engine = Arc::new(MockEngine::new());
    let updater = Arc::new(CountingUpdater::new());
    let replicas = web_replicas(&engine, 1);

    let strategy = Strategy::new(
        StrategyConfig {
            percentage: Some(20),
            ..config(StrategyKind::Canary, 3)
        },
        Arc::clone(&updater) as Arc<dyn rollsync::replica::ReplicaUpdater>,
        Arc::clone(&engine) as Arc<dyn rollsync::engine::Engine>,
    );
    strategy.execute("web", "v2", &replicas).await.unwrap();
    assert_eq!(updater.updates().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn canary_ramps_through_cohorts() {
    let engine = Arc::new(MockEngine::new());
    let updater = Arc::new(CountingUpdater::new());
    let replicas = web_replicas(&engine, 5);

    let strategy = Strategy::new(
        StrategyConfig {
            percentage: Some(20),
            step_wait_time: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
            ..config(StrategyKind::Canary, 3)
        },
        Arc::clone(&updater) as Arc<dyn rollsync::replica::ReplicaUpdater>,
        Arc::clone(&engine) as Arc<dyn rollsync::engine::Engine>,
    );
    strategy.execute("web", "v2", &replicas).await.unwrap();

    let updates = updater.updates();
    assert_eq!(updates.len(), 5);
    // the canary cohort is the first replica in compose order
    assert_eq!(updates[0].0, "web-1");
}

#[tokio::test(start_paused = true)]
async fn blue_green_verifies_whole_set() {
    let engine = Arc::new(MockEngine::new());
    let updater = Arc::new(CountingUpdater::new());
    let replicas = web_replicas(&engine, 3);

    let strategy = Strategy::new(
        StrategyConfig {
            verification_period: Some(Duration::from_secs(5)),
            timeout: Duration::from_secs(60),
            ..config(StrategyKind::BlueGreen, 3)
        },
        Arc::clone(&updater) as Arc<dyn rollsync::replica::ReplicaUpdater>,
        Arc::clone(&engine) as Arc<dyn rollsync::engine::Engine>,
    );
    strategy.execute("web", "v2", &replicas).await.unwrap();
    assert_eq!(updater.updates().len(), 3);
    assert!(updater.rollbacks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn deadline_aborts_and_rolls_back() {
    let engine = Arc::new(MockEngine::new());
    let updater = Arc::new(CountingUpdater::new());
    let replicas = web_replicas(&engine, 2);

    let strategy = Strategy::new(
        StrategyConfig {
            delay_between_updates: Duration::from_secs(10),
            timeout: Duration::from_secs(3),
            ..config(StrategyKind::OneAtATime, 3)
        },
        Arc::clone(&updater) as Arc<dyn rollsync::replica::ReplicaUpdater>,
        Arc::clone(&engine) as Arc<dyn rollsync::engine::Engine>,
    );
    let err = strategy.execute("web", "v2", &replicas).await.unwrap_err();

    assert!(matches!(err, StrategyError::DeadlineExceeded(_)));
    // the first replica was updated before the deadline hit the delay
    assert_eq!(updater.updates().len(), 1);
    assert_eq!(updater.rollbacks().len(), 1);
}
