//! Per-epoch sample order and rank sharding

use crate::distributed::shuffle_seed;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Decides which sample indices a rank visits in a given epoch.
///
/// The shuffled order depends only on `(seed, epoch)`, so all ranks agree on
/// it. For more than one rank, the order is padded by wrapping around to a
/// multiple of the world size and then dealt out with stride `world_size`,
/// which gives every rank the same number of samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochSampler {
    len: usize,
    shuffle: bool,
    seed: u64,
    rank: usize,
    world_size: usize,
}

impl EpochSampler {
    /// Sampler for a single process
    pub fn new(len: usize, shuffle: bool, seed: u64) -> Self {
        Self {
            len,
            shuffle,
            seed,
            rank: 0,
            world_size: 1,
        }
    }

    /// Shard across `world_size` ranks
    pub fn with_shard(mut self, rank: usize, world_size: usize) -> Self {
        self.world_size = world_size.max(1);
        self.rank = rank.min(self.world_size - 1);
        self
    }

    /// Number of indices each rank receives per epoch
    pub fn shard_len(&self) -> usize {
        if self.world_size > 1 {
            self.len.div_ceil(self.world_size)
        } else {
            self.len
        }
    }

    /// This rank's indices for `epoch`
    pub fn indices(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(shuffle_seed(self.seed, epoch));
            order.shuffle(&mut rng);
        }

        if self.world_size == 1 || self.len == 0 {
            return order;
        }

        let total = self.shard_len() * self.world_size;
        let padding: Vec<usize> = (0..total - self.len).map(|i| order[i % self.len]).collect();
        order.extend(padding);

        order
            .into_iter()
            .skip(self.rank)
            .step_by(self.world_size)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_serial_order_is_identity() {
        let sampler = EpochSampler::new(5, false, 42);
        assert_eq!(sampler.indices(1), vec![0, 1, 2, 3, 4]);
        assert_eq!(sampler.indices(7), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_shuffle_is_reproducible_per_epoch() {
        let sampler = EpochSampler::new(100, true, 42);
        assert_eq!(sampler.indices(3), sampler.indices(3));
        assert_ne!(sampler.indices(3), sampler.indices(4));
    }

    #[test]
    fn test_padding_wraps_around() {
        let a = EpochSampler::new(5, false, 0).with_shard(0, 2);
        let b = EpochSampler::new(5, false, 0).with_shard(1, 2);
        assert_eq!(a.indices(1), vec![0, 2, 4]);
        assert_eq!(b.indices(1), vec![1, 3, 0]);
    }

    #[test]
    fn test_empty_source() {
        let sampler = EpochSampler::new(0, true, 0).with_shard(1, 2);
        assert!(sampler.indices(1).is_empty());
        assert_eq!(sampler.shard_len(), 0);
    }

    proptest! {
        #[test]
        fn prop_shards_are_even_and_cover(len in 1usize..200, world in 1usize..6, epoch in 0usize..50, seed in any::<u64>()) {
            let shards: Vec<Vec<usize>> = (0..world)
                .map(|rank| EpochSampler::new(len, true, seed).with_shard(rank, world).indices(epoch))
                .collect();

            let expected = len.div_ceil(world);
            for shard in &shards {
                prop_assert_eq!(shard.len(), expected);
            }

            let seen: BTreeSet<usize> = shards.iter().flatten().copied().collect();
            prop_assert_eq!(seen.len(), len);
        }

        #[test]
        fn prop_single_rank_is_permutation(len in 0usize..300, epoch in 0usize..50, seed in any::<u64>()) {
            let mut indices = EpochSampler::new(len, true, seed).indices(epoch);
            indices.sort_unstable();
            prop_assert_eq!(indices, (0..len).collect::<Vec<_>>());
        }
    }
}
