//! Canary ramp strategy
//!
//! A small initial cohort (`max(1, floor(len * percentage / 100))`
//! replicas) takes the new tag first. Once it verifies healthy, the
//! remainder rolls out across `progression_steps` cohorts with
//! `step_wait_time` between them, each cohort gated on health.

use tracing::info;

use crate::error::StrategyError;
use crate::replica::Replica;
use crate::strategy::{Deadline, Strategy};

/// Initial canary cohort size.
pub(crate) fn initial_cohort(total: usize, percentage: u32) -> usize {
    (total * percentage as usize / 100).max(1)
}

/// Cohort size for the ramp: `ceil(remaining / steps)`.
pub(crate) fn ramp_cohort(remaining: usize, steps: u32) -> usize {
    remaining.div_ceil(steps.max(1) as usize).max(1)
}

pub(crate) async fn run(
    strategy: &Strategy,
    new_tag: &str,
    replicas: &[Replica],
    deadline: &Deadline,
    updated: &mut Vec<Replica>,
) -> Result<(), StrategyError> {
    if replicas.is_empty() {
        return Ok(());
    }
    // validate() guarantees the percentage is present and in range
    let percentage = strategy.config().percentage.unwrap_or(10);
    let initial = initial_cohort(replicas.len(), percentage).min(replicas.len());

    info!(cohort = initial, total = replicas.len(), "deploying canary cohort");
    for replica in &replicas[..initial] {
        strategy.apply_update(replica, new_tag, deadline).await?;
        updated.push(replica.clone());
        strategy.wait_for_health(replica, deadline).await?;
        strategy.run_post_command(replica).await?;
    }

    let remaining = &replicas[initial..];
    if remaining.is_empty() {
        info!("canary cohort covered every replica");
        return Ok(());
    }

    let size = ramp_cohort(remaining.len(), strategy.config().progression_steps);
    let cohorts: Vec<&[Replica]> = remaining.chunks(size).collect();
    let total_cohorts = cohorts.len();

    for (index, cohort) in cohorts.iter().enumerate() {
        deadline
            .sleep(strategy.config().step_wait_time, "canary step wait")
            .await?;
        info!(
            cohort = index + 1,
            total_cohorts,
            size = cohort.len(),
            "widening canary"
        );
        for replica in cohort.iter() {
            strategy.apply_update(replica, new_tag, deadline).await?;
            updated.push(replica.clone());
            strategy.wait_for_health(replica, deadline).await?;
            strategy.run_post_command(replica).await?;
        }
    }
    Ok(())
}
