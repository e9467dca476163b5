//! One-at-a-time strategy
//!
//! Replicas are updated strictly sequentially, each gated on health
//! before the next begins. Order is lexicographic by replica id so runs
//! are deterministic.

use tracing::info;

use crate::error::StrategyError;
use crate::replica::Replica;
use crate::strategy::{Deadline, Strategy};

pub(crate) async fn run(
    strategy: &Strategy,
    new_tag: &str,
    replicas: &[Replica],
    deadline: &Deadline,
    updated: &mut Vec<Replica>,
) -> Result<(), StrategyError> {
    let mut ordered: Vec<Replica> = replicas.to_vec();
    ordered.sort_by(|a, b| a.replica_id.cmp(&b.replica_id));

    let total = ordered.len();
    for (index, replica) in ordered.iter().enumerate() {
        info!(
            replica = %replica.service_id(),
            step = index + 1,
            total,
            "updating replica"
        );
        strategy
            .step(replica, new_tag, deadline, updated, index + 1 < total)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexicographic_order() {
        let mut ids = vec!["2", "10", "1"];
        ids.sort();
        // lexicographic on purpose: "10" sorts before "2"
        assert_eq!(ids, ["1", "10", "2"]);
    }
}
