//! Operations bound to the calling thread's environment.
//!
//! Threads that belong to the runtime (the bootstrap thread and every
//! worker thread) carry a bound policy domain; these functions build the
//! corresponding bus messages on their behalf. Task bodies use them to
//! create new work and to request shutdown.

use strand_tasks_int::error::{Error, ErrorKind, Result};
use strand_tasks_int::guid::{FatGuid, Guid};
use strand_tasks_int::message::PolicyMessage;
use strand_tasks_int::task::EdtFn;
use strand_tasks_int::worker::WorkerId;

use crate::compute::{current_policy, current_worker};

/// Creates a data block of `size` bytes.
///
/// The returned fat guid's metadata addresses the writable payload.
pub fn db_create(size: u64) -> Result<FatGuid> {
    let policy = current_policy()?;
    let mut msg = PolicyMessage::DbCreate {
        size,
        properties: 0,
        guid: FatGuid::NULL,
    };
    policy.process_message(&mut msg, true)?;
    match msg {
        PolicyMessage::DbCreate { guid, .. } => Ok(guid),
        _ => Err(ErrorKind::Internal.into()),
    }
}

/// Creates a task template from a body and its parameter and dependency
/// counts.
pub fn edt_template_create(func: EdtFn, paramc: u32, depc: u32) -> Result<Guid> {
    let policy = current_policy()?;
    policy.create_edt_template(func, paramc, depc)
}

/// Instantiates a task from a template, binding all dependency slots.
///
/// The counts of `paramv` and `depv` must match the template. The task is
/// scheduled immediately on the calling worker's home workpile.
pub fn edt_create(template: Guid, paramv: &[u64], depv: &[FatGuid]) -> Result<Guid> {
    let policy = current_policy()?;
    let src = current_worker().map_or(WorkerId::MASTER, |w| w.id());
    let mut msg = PolicyMessage::WorkCreate {
        template,
        paramv: paramv.to_vec(),
        depv: depv.to_vec(),
        properties: 0,
        guid: FatGuid::NULL,
        src,
    };
    policy.process_message(&mut msg, true)?;
    match msg {
        PolicyMessage::WorkCreate { guid, .. } => Ok(guid.guid),
        _ => Err(ErrorKind::Internal.into()),
    }
}

/// Requests runtime shutdown.
///
/// Worker loops drain at their next iteration boundary; the call returns
/// immediately.
pub fn shutdown() -> Result<()> {
    let policy = current_policy().map_err(|e| {
        Error::new(
            ErrorKind::FailedPrecondition,
            format!("shutdown outside the runtime: {e}"),
        )
    })?;
    policy.request_shutdown();
    Ok(())
}
