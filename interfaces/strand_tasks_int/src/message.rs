//! The reified policy-domain message protocol.
//!
//! Every resource and lifecycle operation of the core flows through a
//! [`PolicyMessage`] submitted to the policy domain's single entry point.
//! Each message kind is a distinct variant with directly named request and
//! response fields; response fields are populated in place when a message
//! is processed synchronously.

use std::ptr::NonNull;

use crate::guid::{FatGuid, Guid, GuidKind};
use crate::task::EdtExecFn;
use crate::worker::WorkerId;

/// Provenance tag of a memory request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemType {
    /// Memory backing guid headers and their metadata payloads.
    GuidMemtype,
    /// Memory backing data-block payloads.
    DbMemtype,
}

/// A message on the policy-domain bus.
///
/// Fields marked "out" are response fields: untouched when a submission
/// fails, populated before the synchronous entry point returns otherwise.
#[derive(Debug)]
pub enum PolicyMessage {
    /// Request a chunk of memory from the memory platform.
    MemAlloc {
        /// Requested size in bytes.
        size: u64,
        /// Allocation property bits (unused by the core, reserved).
        properties: u64,
        /// Provenance of the request.
        mem_type: MemType,
        /// Out: the allocated chunk.
        ptr: Option<NonNull<u8>>,
    },
    /// Return a chunk to the memory platform.
    MemUnalloc {
        /// The chunk being returned.
        ptr: NonNull<u8>,
        /// Provenance of the original allocation.
        mem_type: MemType,
    },
    /// Request tasks from the scheduler.
    CommTake {
        /// In: capacity-sized slots; out: the delivered tasks.
        guids: Vec<FatGuid>,
        /// In: slot capacity; out: number of tasks delivered.
        guid_count: u32,
        /// Request property bits (unused by the core, reserved).
        properties: u64,
        /// Kind filter; the core only takes [`GuidKind::Edt`].
        kind: GuidKind,
        /// Out: execute entry for the delivered task.
        extra: Option<EdtExecFn>,
        /// The requesting worker.
        src: WorkerId,
    },
    /// Hand tasks to the scheduler for placement.
    CommGive {
        /// The tasks to place; insertion order is preserved.
        guids: Vec<FatGuid>,
        /// Request property bits (unused by the core, reserved).
        properties: u64,
        /// Kind of the given guids.
        kind: GuidKind,
        /// The giving worker.
        src: WorkerId,
    },
    /// Instantiate a task from a template.
    WorkCreate {
        /// The template to instantiate; its counts are authoritative.
        template: Guid,
        /// Parameter values, length must equal the template's `paramc`.
        paramv: Vec<u64>,
        /// Dependency slots, length must equal the template's `depc`.
        depv: Vec<FatGuid>,
        /// Creation property bits (unused by the core, reserved).
        properties: u64,
        /// Out: the created task.
        guid: FatGuid,
        /// The creating worker.
        src: WorkerId,
    },
    /// Create a data block.
    DbCreate {
        /// Payload size in bytes.
        size: u64,
        /// Creation property bits (unused by the core, reserved).
        properties: u64,
        /// Out: the created data block, metadata addressing the payload.
        guid: FatGuid,
    },
    /// Destroy a task after its execution attempt.
    WorkDestroy {
        /// The task to destroy.
        guid: FatGuid,
        /// Destruction property bits (unused by the core, reserved).
        properties: u64,
    },
    /// Release a guid through the guid provider.
    GuidDestroy {
        /// The guid to release.
        guid: FatGuid,
        /// Destruction property bits (unused by the core, reserved).
        properties: u64,
        /// Whether the metadata payload is released together with the
        /// identity; requires the header/payload adjacency invariant.
        release_val: bool,
    },
}

impl PolicyMessage {
    /// Name of the message kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            PolicyMessage::MemAlloc { .. } => "MEM_ALLOC",
            PolicyMessage::MemUnalloc { .. } => "MEM_UNALLOC",
            PolicyMessage::CommTake { .. } => "COMM_TAKE",
            PolicyMessage::CommGive { .. } => "COMM_GIVE",
            PolicyMessage::WorkCreate { .. } => "WORK_CREATE",
            PolicyMessage::DbCreate { .. } => "DB_CREATE",
            PolicyMessage::WorkDestroy { .. } => "WORK_DESTROY",
            PolicyMessage::GuidDestroy { .. } => "GUID_DESTROY",
        }
    }

    /// Whether processing this message produces new work or resources.
    ///
    /// Producers are rejected once the bus is shutting down; draining
    /// messages keep flowing so teardown can complete.
    pub fn is_producer(&self) -> bool {
        match self {
            PolicyMessage::MemAlloc { .. }
            | PolicyMessage::CommTake { .. }
            | PolicyMessage::CommGive { .. }
            | PolicyMessage::WorkCreate { .. }
            | PolicyMessage::DbCreate { .. } => true,
            PolicyMessage::MemUnalloc { .. }
            | PolicyMessage::WorkDestroy { .. }
            | PolicyMessage::GuidDestroy { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_classification() {
        let take = PolicyMessage::CommTake {
            guids: vec![FatGuid::NULL],
            guid_count: 1,
            properties: 0,
            kind: GuidKind::Edt,
            extra: None,
            src: WorkerId::MASTER,
        };
        assert!(take.is_producer());
        assert_eq!(take.kind_name(), "COMM_TAKE");

        let destroy = PolicyMessage::WorkDestroy {
            guid: FatGuid::NULL,
            properties: 0,
        };
        assert!(!destroy.is_producer());
    }
}
