//! Per-worker active stream counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of active streams per backend worker.
///
/// Counts only move through [`WorkloadLease`], so every increment is paired
/// with exactly one decrement.
#[derive(Debug)]
pub struct WorkloadCounter {
    loads: Box<[AtomicUsize]>,
}

impl WorkloadCounter {
    /// Creates counters for `workers` workers, all at zero.
    pub fn new(workers: usize) -> Self {
        Self {
            loads: (0..workers).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    /// Increments the count for `index` and returns the lease that undoes it.
    ///
    /// Returns `None` for an index outside the pool.
    pub fn acquire(self: &Arc<Self>, index: usize) -> Option<WorkloadLease> {
        let slot = self.loads.get(index)?;
        slot.fetch_add(1, Ordering::SeqCst);
        Some(WorkloadLease {
            counter: Arc::clone(self),
            index,
        })
    }

    /// Current load of worker `index`, zero for an unknown index.
    pub fn load(&self, index: usize) -> usize {
        self.loads
            .get(index)
            .map_or(0, |slot| slot.load(Ordering::SeqCst))
    }

    /// Loads of all workers in index order.
    pub fn snapshot(&self) -> Vec<usize> {
        self.loads
            .iter()
            .map(|slot| slot.load(Ordering::SeqCst))
            .collect()
    }

    /// Index of the worker with the lowest load; the lowest index wins ties.
    pub fn least_loaded(&self) -> Option<usize> {
        self.snapshot()
            .into_iter()
            .enumerate()
            .min_by_key(|&(index, load)| (load, index))
            .map(|(index, _)| index)
    }

    pub fn workers(&self) -> usize {
        self.loads.len()
    }
}

/// One unit of load on a worker, released on drop.
#[derive(Debug)]
pub struct WorkloadLease {
    counter: Arc<WorkloadCounter>,
    index: usize,
}

impl WorkloadLease {
    pub fn worker_index(&self) -> usize {
        self.index
    }
}

impl Drop for WorkloadLease {
    fn drop(&mut self) {
        let previous = self.counter.loads[self.index].fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "workload counter underflow");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_increments_and_releases() {
        let counter = Arc::new(WorkloadCounter::new(3));

        let first = counter.acquire(1).unwrap();
        let second = counter.acquire(1).unwrap();
        assert_eq!(counter.snapshot(), vec![0, 2, 0]);
        assert_eq!(first.worker_index(), 1);

        drop(first);
        assert_eq!(counter.load(1), 1);
        drop(second);
        assert_eq!(counter.load(1), 0);
    }

    #[test]
    fn test_unknown_worker_is_rejected() {
        let counter = Arc::new(WorkloadCounter::new(2));
        assert!(counter.acquire(2).is_none());
        assert_eq!(counter.load(7), 0);
        assert_eq!(counter.workers(), 2);
    }

    #[test]
    fn test_least_loaded_prefers_lowest_index() {
        let counter = Arc::new(WorkloadCounter::new(3));
        assert_eq!(counter.least_loaded(), Some(0));

        let _a = counter.acquire(0).unwrap();
        let _b = counter.acquire(2).unwrap();
        assert_eq!(counter.least_loaded(), Some(1));

        let _c = counter.acquire(1).unwrap();
        assert_eq!(counter.least_loaded(), Some(0));

        assert_eq!(WorkloadCounter::new(0).least_loaded(), None);
    }

    #[test]
    fn test_concurrent_leases_balance_out() {
        let counter = Arc::new(WorkloadCounter::new(1));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let _lease = counter.acquire(0).unwrap();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(counter.load(0), 0);
    }
}
