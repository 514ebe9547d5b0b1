//! Pop-then-steal scheduler.

use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;
use strand_tasks_int::error::{Error, ErrorKind, Result};
use strand_tasks_int::guid::FatGuid;
use strand_tasks_int::worker::WorkerId;
use strand_tasks_int::workpile::{Cost, Workpile};

/// Round-robin cursor over all workpiles except the caller's home pile.
///
/// For worker `w` over `N` piles the traversal is the rotation starting at
/// `(w + 1) % N` and ending at `(w - 1 + N) % N`. Each iterator is owned
/// exclusively by a single worker and reset on every take.
#[derive(Debug)]
struct StealIterator {
    home: usize,
    cursor: usize,
    pools: Vec<Arc<dyn Workpile>>,
}

impl StealIterator {
    fn new(home: usize, pools: Vec<Arc<dyn Workpile>>) -> Self {
        Self {
            home,
            cursor: 0,
            pools,
        }
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

impl Iterator for StealIterator {
    type Item = Arc<dyn Workpile>;

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.pools.len();
        if self.cursor + 1 >= n {
            return None;
        }
        let idx = (self.home + 1 + self.cursor) % n;
        self.cursor += 1;
        Some(Arc::clone(&self.pools[idx]))
    }
}

/// Maps each worker to a home workpile and serves take and give requests.
///
/// A take first pops from the requester's home pile (LIFO) and, on a miss,
/// walks the requester's steal iterator until a victim yields a task or the
/// rotation is exhausted. The pool array and the iterator cache are
/// immutable after the one-time mapping step; only each iterator's cursor
/// mutates, guarded by a per-worker mutex that is uncontended because every
/// iterator belongs to exactly one worker.
#[derive(Debug)]
pub struct WorkStealScheduler {
    worker_id_begin: usize,
    worker_id_end: usize,
    pools: Vec<Arc<dyn Workpile>>,
    steal_iterators: Vec<Mutex<StealIterator>>,
}

impl WorkStealScheduler {
    /// Creates a scheduler serving the inclusive worker id range.
    ///
    /// Workpiles must be attached with [`map_workpiles`] before the first
    /// take or give.
    ///
    /// [`map_workpiles`]: WorkStealScheduler::map_workpiles
    pub fn new(worker_id_begin: usize, worker_id_end: usize) -> Self {
        assert!(worker_id_begin <= worker_id_end);
        Self {
            worker_id_begin,
            worker_id_end,
            pools: Vec::new(),
            steal_iterators: Vec::new(),
        }
    }

    /// Number of workers this scheduler serves.
    #[inline]
    pub fn workers_per_scheduler(&self) -> usize {
        1 + self.worker_id_end - self.worker_id_begin
    }

    /// One-time binding of the workpile array.
    ///
    /// Builds the per-worker steal iterators, each snapshotting the full
    /// pool array.
    pub fn map_workpiles(&mut self, pools: Vec<Arc<dyn Workpile>>) -> Result<()> {
        if !self.pools.is_empty() {
            return Err(Error::new(
                ErrorKind::FailedPrecondition,
                "workpiles are already mapped",
            ));
        }
        if pools.len() != self.workers_per_scheduler() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "one workpile per worker is required",
            ));
        }
        self.steal_iterators = (0..pools.len())
            .map(|home| Mutex::new(StealIterator::new(home, pools.clone())))
            .collect();
        self.pools = pools;
        Ok(())
    }

    #[inline]
    fn home(&self, worker: WorkerId) -> &Arc<dyn Workpile> {
        &self.pools[worker.raw() % self.pools.len()]
    }

    /// Attempts to obtain tasks for `src`, writing them to `out`.
    ///
    /// Returns the number of tasks delivered; at most one in this
    /// implementation. A miss is not an error.
    pub fn take(&self, cost: &Cost, src: WorkerId, out: &mut [FatGuid]) -> Result<u32> {
        if self.pools.is_empty() {
            return Err(ErrorKind::FailedPrecondition.into());
        }
        if out.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "no capacity for a take",
            ));
        }

        // first try to pop from the home pile
        let mut popped = self.home(src).pop(cost);
        if popped.is_none() {
            // on a miss, walk every other pile in rotation order
            let mut iter = self.steal_iterators[src.raw() % self.pools.len()].lock();
            iter.reset();
            while popped.is_none() {
                match iter.next() {
                    Some(victim) => popped = victim.steal(cost),
                    None => break,
                }
            }
        }

        match popped {
            Some(task) => {
                trace!("delivering {} to worker {src}", task.guid);
                out[0] = task;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    /// Places tasks on the home pile of `src`, preserving order.
    pub fn give(&self, edts: &[FatGuid], src: WorkerId) -> Result<()> {
        if self.pools.is_empty() {
            return Err(ErrorKind::FailedPrecondition.into());
        }
        let pile = self.home(src);
        for edt in edts {
            trace!("worker {src} gives {}", edt.guid);
            pile.push(*edt);
        }
        Ok(())
    }
}
