//! Data-parallel process coordination
//!
//! Every process runs the same training loop on its own shard. The only
//! collective is a blocking mean reduction over named scalars, used for the
//! logged losses and for gradient averaging inside models.
//!
//! - [`LocalGroup`]: a world of one, reductions are the identity
//! - [`InProcessGroup`]: N ranks as threads of one process
//! - [`TcpGroup`]: N processes joined over TCP through rank 0

mod bootstrap;
mod launch;
mod local;
mod tcp;

pub use bootstrap::{augment_seed, init_process_group, shuffle_seed, DistributedEnv};
pub use launch::{launch_workers, wait_workers, WorkerHandle};
pub use local::{InProcessGroup, LocalGroup};
pub use tcp::{TcpGroup, TcpRendezvous};

use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Named scalar values exchanged by the reduction (losses, gradients)
pub type LossMap = BTreeMap<String, f64>;

/// A group of cooperating training processes
pub trait ProcessGroup: Send + Sync {
    /// This process's rank in `0..world_size`
    fn rank(&self) -> usize;

    /// Number of participating processes
    fn world_size(&self) -> usize;

    /// Rank 0 owns logging and every file write
    fn is_master(&self) -> bool {
        self.rank() == 0
    }

    /// Element-wise mean of `values` across all ranks.
    ///
    /// Blocks until every rank has contributed. All ranks must pass the same
    /// key set.
    fn all_reduce_mean(&self, values: &LossMap) -> Result<LossMap>;

    /// Block until every rank reaches this point
    fn barrier(&self) -> Result<()>;
}

/// Mean over per-rank contributions, summed in rank order.
///
/// Summing in a fixed order makes the result bit-identical on every rank.
pub(crate) fn mean_of(contributions: &[LossMap]) -> Result<LossMap> {
    let Some(first) = contributions.first() else {
        return Err(Error::DistributedSync(
            "reduction received no contributions".to_string(),
        ));
    };

    for (rank, values) in contributions.iter().enumerate().skip(1) {
        if !values.keys().eq(first.keys()) {
            return Err(Error::DistributedSync(format!(
                "rank {rank} reduced keys {:?}, rank 0 reduced {:?}",
                values.keys().collect::<Vec<_>>(),
                first.keys().collect::<Vec<_>>()
            )));
        }
    }

    let n = contributions.len() as f64;
    Ok(first
        .keys()
        .map(|key| {
            let sum: f64 = contributions.iter().map(|values| values[key]).sum();
            (key.clone(), sum / n)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, f64)]) -> LossMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_mean_of_two_ranks() {
        let reduced = mean_of(&[map(&[("a", 2.0)]), map(&[("a", 4.0)])]).unwrap();
        assert_eq!(reduced, map(&[("a", 3.0)]));
    }

    #[test]
    fn test_mean_of_rejects_key_mismatch() {
        let result = mean_of(&[map(&[("a", 2.0)]), map(&[("b", 4.0)])]);
        assert!(matches!(result, Err(Error::DistributedSync(_))));
    }

    #[test]
    fn test_mean_of_empty() {
        assert!(mean_of(&[]).is_err());
    }
}
