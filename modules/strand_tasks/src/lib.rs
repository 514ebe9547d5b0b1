//! Work-stealing task-execution core of the strand runtime.
//!
//! A fixed pool of worker threads drains per-worker workpiles through a
//! pop-then-steal scheduler. Every resource and lifecycle operation
//! (memory, task retrieval, task destruction, identity lifecycle) is
//! reified as a message on the policy domain's bus. A distinguished master
//! worker bootstraps the first task from packed user arguments and then
//! joins the common loop.
//!
//! ```no_run
//! use strand_tasks::{api, Builder};
//! use strand_tasks_int::error::Result;
//! use strand_tasks_int::guid::{FatGuid, Guid, NULL_GUID};
//!
//! fn main_task(_paramv: &[u64], depv: &[FatGuid]) -> Result<Guid> {
//!     // the single dependency is the data block holding the packed args
//!     assert_eq!(depv.len(), 1);
//!     api::shutdown()?;
//!     Ok(NULL_GUID)
//! }
//!
//! # fn main() -> Result<()> {
//! let runtime = Builder::new().workers(Some(4)).build()?;
//! let args = 4u64.to_le_bytes().iter().copied().chain([1, 2, 3, 4]).collect::<Vec<_>>();
//! runtime.run_main(main_task, &args)?;
//! # Ok(())
//! # }
//! ```
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    rustdoc::broken_intra_doc_links
)]

pub mod api;
mod compute;
mod guid_provider;
mod mem;
mod policy;
mod runtime;
mod scheduler;
mod task;
mod worker;
mod workpile;

pub use compute::{current_policy, current_worker, ComputeTarget, ThreadComputeTarget};
pub use guid_provider::{GuidProvider, PtrGuidProvider};
pub use mem::{MemPlatform, PlatformAllocator, CHUNK_ALIGN};
pub use policy::PolicyDomain;
pub use runtime::{Builder, Runtime};
pub use scheduler::WorkStealScheduler;
pub use worker::Worker;
pub use workpile::DequeWorkpile;
