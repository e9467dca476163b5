//! Blue/green strategy (simulated)
//!
//! The green set is not a parallel deployment: the existing replicas are
//! updated in place and treated as the green set from that point on. The
//! strategy still enforces blue/green semantics — every green replica must
//! verify healthy, then hold through the verification period, before the
//! blue set is declared retired. Any failure before that point rolls the
//! whole set back.

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
    info!(replicas = replicas.len(), "standing up green set");
    for replica in replicas {
        strategy.apply_update(replica, new_tag, deadline).await?;
        updated.push(replica.clone());
    }

    info!("verifying green set");
    for replica in replicas {
        strategy.wait_for_health(replica, deadline).await?;
    }

    if let Some(period) = strategy.config().verification_period {
        if !period.is_zero() {
            info!(?period, "holding green set through verification period");
            deadline.sleep(period, "verification period").await?;
            // the hold only counts if the set is still healthy at its end
            for replica in replicas {
                strategy.wait_for_health(replica, deadline).await?;
            }
        }
    }

    for replica in replicas {
        strategy.run_post_command(replica).await?;
    }

    info!("green set verified, blue set retired");
    Ok(())
}
