//! Single-process groups

use super::{mean_of, LossMap, ProcessGroup};
use crate::error::{Error, Result};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// A world of one process
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalGroup;

impl LocalGroup {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessGroup for LocalGroup {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn all_reduce_mean(&self, values: &LossMap) -> Result<LossMap> {
        Ok(values.clone())
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Rendezvous {
    arrived: usize,
    generation: u64,
    /// First rank whose handle was dropped
    departed: Option<usize>,
}

#[derive(Debug)]
struct Shared {
    rendezvous: Mutex<Rendezvous>,
    released: Condvar,
    slots: Mutex<Vec<Option<LossMap>>>,
}

/// N ranks running as threads of one process, for simulations and tests.
///
/// Each rank holds its own handle; handles share a rendezvous and one slot
/// per rank. A reduction writes the local slot, waits for all ranks, reads
/// every slot, then waits again so no rank overwrites its slot while a peer
/// is still reading.
///
/// Dropping a handle (its thread returned or panicked) fails every pending
/// and later wait with [`Error::DistributedSync`].
///
/// # Example
///
/// ```
/// use armonizar::distributed::{InProcessGroup, LossMap, ProcessGroup};
/// use std::thread;
///
/// let handles: Vec<_> = InProcessGroup::create(2)
///     .into_iter()
///     .map(|group| {
///         thread::spawn(move || {
///             let mut losses = LossMap::new();
///             losses.insert("G_L2".into(), 2.0 + 2.0 * group.rank() as f64);
///             group.all_reduce_mean(&losses).unwrap()
///         })
///     })
///     .collect();
///
/// for handle in handles {
///     assert_eq!(handle.join().unwrap()["G_L2"], 3.0);
/// }
/// ```
#[derive(Debug)]
pub struct InProcessGroup {
    rank: usize,
    world_size: usize,
    shared: Arc<Shared>,
}

impl InProcessGroup {
    /// Create one handle per rank, index = rank
    pub fn create(world_size: usize) -> Vec<InProcessGroup> {
        let world_size = world_size.max(1);
        let shared = Arc::new(Shared {
            rendezvous: Mutex::new(Rendezvous::default()),
            released: Condvar::new(),
            slots: Mutex::new(vec![None; world_size]),
        });

        (0..world_size)
            .map(|rank| InProcessGroup {
                rank,
                world_size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn wait_all(&self) -> Result<()> {
        let mut state = self.lock_rendezvous()?;
        if let Some(rank) = state.departed {
            return Err(self.departed_error(rank));
        }

        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.world_size {
            state.arrived = 0;
            state.generation += 1;
            self.shared.released.notify_all();
            return Ok(());
        }

        while state.generation == generation && state.departed.is_none() {
            state = self.shared.released.wait(state).map_err(|_| self.poisoned())?;
        }
        match state.departed {
            Some(rank) if state.generation == generation => Err(self.departed_error(rank)),
            _ => Ok(()),
        }
    }

    fn reduce_slots(&self) -> Result<LossMap> {
        let slots = self.lock_slots()?;
        let contributions = slots
            .iter()
            .enumerate()
            .map(|(rank, slot)| {
                slot.clone()
                    .ok_or_else(|| Error::DistributedSync(format!("rank {rank} did not contribute")))
            })
            .collect::<Result<Vec<_>>>()?;
        mean_of(&contributions)
    }

    fn lock_rendezvous(&self) -> Result<MutexGuard<'_, Rendezvous>> {
        self.shared.rendezvous.lock().map_err(|_| self.poisoned())
    }

    fn lock_slots(&self) -> Result<MutexGuard<'_, Vec<Option<LossMap>>>> {
        self.shared.slots.lock().map_err(|_| self.poisoned())
    }

    fn poisoned(&self) -> Error {
        Error::DistributedSync(format!("rank {}: reduction state poisoned", self.rank))
    }

    fn departed_error(&self, rank: usize) -> Error {
        Error::DistributedSync(format!(
            "rank {}: rank {rank} left the group before the reduction",
            self.rank
        ))
    }
}

impl Drop for InProcessGroup {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.rendezvous.lock() {
            state.departed.get_or_insert(self.rank);
        }
        self.shared.released.notify_all();
    }
}

impl ProcessGroup for InProcessGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_mean(&self, values: &LossMap) -> Result<LossMap> {
        {
            let mut slots = self.lock_slots()?;
            slots[self.rank] = Some(values.clone());
        }
        self.wait_all()?;

        let reduced = self.reduce_slots();
        self.wait_all()?;
        reduced
    }

    fn barrier(&self) -> Result<()> {
        self.wait_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_local_group_is_identity() {
        let group = LocalGroup::new();
        let mut values = LossMap::new();
        values.insert("G_L1".to_string(), 0.25);

        assert!(group.is_master());
        assert_eq!(group.world_size(), 1);
        assert_eq!(group.all_reduce_mean(&values).unwrap(), values);
    }

    #[test]
    fn test_in_process_reduction_two_ranks() {
        let results: Vec<LossMap> = InProcessGroup::create(2)
            .into_iter()
            .map(|group| {
                thread::spawn(move || {
                    let mut values = LossMap::new();
                    let a = if group.rank() == 0 { 2.0 } else { 4.0 };
                    values.insert("a".to_string(), a);
                    group.all_reduce_mean(&values).unwrap()
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        for reduced in results {
            assert_eq!(reduced.len(), 1);
            assert_eq!(reduced["a"], 3.0);
        }
    }

    #[test]
    fn test_repeated_rounds_do_not_mix() {
        let results: Vec<Vec<f64>> = InProcessGroup::create(3)
            .into_iter()
            .map(|group| {
                thread::spawn(move || {
                    (0..20)
                        .map(|round| {
                            let mut values = LossMap::new();
                            values.insert("x".to_string(), (round * 10 + group.rank()) as f64);
                            group.all_reduce_mean(&values).unwrap()["x"]
                        })
                        .collect()
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        for per_rank in &results {
            for (round, value) in per_rank.iter().enumerate() {
                assert_eq!(*value, (round * 10) as f64 + 1.0);
            }
        }
    }

    #[test]
    fn test_dropped_peer_fails_later_reduction() {
        let mut groups = InProcessGroup::create(2);
        drop(groups.pop());

        let result = groups[0].all_reduce_mean(&LossMap::new());
        assert!(
            matches!(&result, Err(Error::DistributedSync(msg)) if msg.contains("rank 1 left")),
            "{result:?}"
        );
    }

    #[test]
    fn test_peer_failing_mid_run_releases_waiting_rank() {
        let mut groups = InProcessGroup::create(2);
        let failing = groups.pop().unwrap();
        let waiting = groups.pop().unwrap();

        let waiter = thread::spawn(move || waiting.all_reduce_mean(&LossMap::new()));
        let peer = thread::spawn(move || {
            let _group = failing;
            thread::sleep(std::time::Duration::from_millis(50));
            panic!("rank 1 failed before its reduction");
        });

        assert!(peer.join().is_err());
        assert!(matches!(waiter.join().unwrap(), Err(Error::DistributedSync(_))));
    }

    #[test]
    fn test_finished_ranks_do_not_fail_each_other() {
        let handles: Vec<_> = InProcessGroup::create(3)
            .into_iter()
            .map(|group| {
                thread::spawn(move || {
                    group.barrier()?;
                    group.all_reduce_mean(&LossMap::from([("x".to_string(), 1.0)]))
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap()["x"], 1.0);
        }
    }

    #[test]
    fn test_only_rank_zero_is_master() {
        let groups = InProcessGroup::create(2);
        assert!(groups[0].is_master());
        assert!(!groups[1].is_master());
    }
}
