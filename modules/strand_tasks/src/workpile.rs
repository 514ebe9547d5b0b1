//! Chase–Lev workpile.

use crossbeam_deque as deque;
use parking_lot::Mutex;
use strand_tasks_int::guid::FatGuid;
use strand_tasks_int::workpile::{Cost, Workpile};

/// Work-stealing deque workpile.
///
/// The home worker pushes and pops at the LIFO end for cache locality;
/// thieves steal from the opposite end, observing the victim's pushes in
/// FIFO order. The owner handle sits behind a mutex only to make the shared
/// object `Sync`; the lock is uncontended because push and pop are
/// home-worker operations.
#[derive(Debug)]
pub struct DequeWorkpile {
    owner: Mutex<deque::Worker<FatGuid>>,
    stealer: deque::Stealer<FatGuid>,
}

impl DequeWorkpile {
    /// Creates an empty workpile.
    pub fn new() -> Self {
        let owner = deque::Worker::new_lifo();
        let stealer = owner.stealer();
        Self {
            owner: Mutex::new(owner),
            stealer,
        }
    }
}

impl Default for DequeWorkpile {
    fn default() -> Self {
        Self::new()
    }
}

impl Workpile for DequeWorkpile {
    fn push(&self, task: FatGuid) {
        debug_assert!(!task.is_null(), "the null guid never enters a workpile");
        self.owner.lock().push(task);
    }

    fn pop(&self, _cost: &Cost) -> Option<FatGuid> {
        self.owner.lock().pop()
    }

    fn steal(&self, _cost: &Cost) -> Option<FatGuid> {
        // a lost race reads as a miss; the caller moves on to the next victim
        self.stealer.steal().success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_tasks_int::guid::Guid;

    fn task(id: u64) -> FatGuid {
        FatGuid::new(Guid::from_raw(id), std::ptr::null_mut())
    }

    #[test]
    fn pop_is_lifo() {
        let pile = DequeWorkpile::new();
        let cost = Cost::default();
        for id in 1..=3 {
            pile.push(task(id));
        }
        assert_eq!(pile.pop(&cost).unwrap().guid, Guid::from_raw(3));
        assert_eq!(pile.pop(&cost).unwrap().guid, Guid::from_raw(2));
        assert_eq!(pile.pop(&cost).unwrap().guid, Guid::from_raw(1));
        assert!(pile.pop(&cost).is_none());
    }

    #[test]
    fn steal_is_fifo() {
        let pile = DequeWorkpile::new();
        let cost = Cost::default();
        for id in 1..=3 {
            pile.push(task(id));
        }
        assert_eq!(pile.steal(&cost).unwrap().guid, Guid::from_raw(1));
        assert_eq!(pile.steal(&cost).unwrap().guid, Guid::from_raw(2));
        assert_eq!(pile.steal(&cost).unwrap().guid, Guid::from_raw(3));
        assert!(pile.steal(&cost).is_none());
    }

    #[test]
    fn each_element_is_removed_once() {
        let pile = DequeWorkpile::new();
        let cost = Cost::default();
        for id in 1..=4 {
            pile.push(task(id));
        }
        let mut seen = Vec::new();
        seen.extend(pile.steal(&cost));
        seen.extend(pile.pop(&cost));
        seen.extend(pile.steal(&cost));
        seen.extend(pile.pop(&cost));
        let mut ids: Vec<_> = seen.iter().map(|t| t.guid.as_raw()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(pile.pop(&cost).is_none());
        assert!(pile.steal(&cost).is_none());
    }
}
