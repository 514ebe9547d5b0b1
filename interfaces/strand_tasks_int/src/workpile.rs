//! The workpile contract.

use std::fmt::Debug;

use crate::guid::FatGuid;

/// Opaque cost hint threaded through take and steal operations.
///
/// The core trickles it down unchanged; implementations may consult it to
/// bias victim selection.
#[derive(Debug, Default, Copy, Clone)]
pub struct Cost(pub u64);

/// A per-worker pile of schedulable tasks.
///
/// Each workpile has a home worker: only the home worker calls [`push`] and
/// [`pop`], which operate LIFO for cache locality. Foreign workers call
/// [`steal`], which removes from the opposite end (FIFO relative to pushes
/// on the victim). Implementations synchronize internally; `pop` and
/// `steal` are linearizable and at most one removal succeeds per element.
///
/// [`push`]: Workpile::push
/// [`pop`]: Workpile::pop
/// [`steal`]: Workpile::steal
pub trait Workpile: Send + Sync + Debug {
    /// Pushes a task onto the home end.
    ///
    /// `task` must not be the null guid.
    fn push(&self, task: FatGuid);

    /// Removes the most recently pushed task, if any. Home worker only.
    fn pop(&self, cost: &Cost) -> Option<FatGuid>;

    /// Steals the oldest task, if any. Foreign workers only.
    ///
    /// A miss (empty pile or lost race) is reported as `None` and is not
    /// retried within a single take.
    fn steal(&self, cost: &Cost) -> Option<FatGuid>;
}
