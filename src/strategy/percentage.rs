//! Fixed-percentage batch strategy
//!
//! Replicas are split into batches of `max(1, floor(len * percentage /
//! 100))` in compose order. Each batch updates its members concurrently,
//! then passes one health gate per replica sequentially before the next
//! batch starts.

use futures_util::future::join_all;
use tracing::info;

use crate::error::StrategyError;
use crate::replica::Replica;
use crate::strategy::{Deadline, Strategy};

/// `max(1, floor(total * percentage / 100))`.
pub(crate) fn batch_size(total: usize, percentage: u32) -> usize {
    (total * percentage as usize / 100).max(1)
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
    let percentage = strategy.config().percentage.unwrap_or(100);
    let size = batch_size(replicas.len(), percentage);
    let batches: Vec<&[Replica]> = replicas.chunks(size).collect();
    let total_batches = batches.len();

    for (index, batch) in batches.iter().enumerate() {
        deadline.check(&format!("batch {}/{total_batches}", index + 1))?;
        info!(
            batch = index + 1,
            total_batches,
            size = batch.len(),
            "updating batch"
        );

        // fan the updates out; successes join the updated set even when a
        // sibling fails, so rollback covers everything that was touched
        let results = join_all(
            batch
                .iter()
                .map(|replica| strategy.apply_update(replica, new_tag, deadline)),
        )
        .await;

        let mut first_failure = None;
        for (replica, result) in batch.iter().zip(results) {
            match result {
                Ok(()) => updated.push(replica.clone()),
                Err(err) if first_failure.is_none() => first_failure = Some(err),
                Err(_) => {}
            }
        }
        if let Some(err) = first_failure {
            return Err(err);
        }

        for replica in batch.iter() {
            strategy.wait_for_health(replica, deadline).await?;
        }
        for replica in batch.iter() {
            strategy.run_post_command(replica).await?;
        }

        let delay = strategy.config().delay_between_updates;
        if index + 1 < total_batches && !delay.is_zero() {
            deadline.sleep(delay, "inter-batch delay").await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_floors_with_minimum_one() {
        assert_eq!(batch_size(1, 1), 1);
        assert_eq!(batch_size(3, 50), 1);
        assert_eq!(batch_size(4, 50), 2);
        assert_eq!(batch_size(10, 33), 3);
    }

    #[test]
    fn test_full_percentage_is_one_batch() {
        assert_eq!(batch_size(7, 100), 7);
    }

    #[test]
    fn test_batch_count() {
        let size = batch_size(4, 50);
        assert_eq!((0..4).collect::<Vec<_>>().chunks(size).count(), 2);
    }
}
