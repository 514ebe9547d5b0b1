//! Task instantiation, execution and destruction.

use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use log::trace;
use strand_tasks_int::error::{Error, ErrorKind, Result};
use strand_tasks_int::guid::{FatGuid, Guid, GuidKind};
use strand_tasks_int::task::{EdtRunStatus, EdtTask, EdtTemplate};

use crate::guid_provider::GuidProvider;

/// Instantiates task metadata from a template.
///
/// The template's parameter and dependency counts are authoritative; the
/// provided values must match them. All dependency slots are bound at
/// creation, so the returned task is immediately schedulable.
pub(crate) fn instantiate_edt(
    provider: &dyn GuidProvider,
    template: Guid,
    paramv: Vec<u64>,
    depv: Vec<FatGuid>,
) -> Result<FatGuid> {
    let (tval, tkind) = provider.get_val(template);
    if tkind != GuidKind::EdtTemplate {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            "guid is not a task template",
        ));
    }
    // SAFETY: the guid's kind was just checked; a created guid's identity
    // payload addresses its metadata, here an `EdtTemplate`.
    let tmpl = unsafe { &*(tval as usize as *const EdtTemplate) };

    if paramv.len() != tmpl.paramc as usize || depv.len() != tmpl.depc as usize {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            "parameter or dependency count does not match the template",
        ));
    }

    let fguid = provider.create_guid(mem::size_of::<EdtTask>(), GuidKind::Edt)?;
    let task = EdtTask::new(template, tmpl.func, paramv, depv);
    // SAFETY: `create_guid` returned an exclusively owned chunk sized and
    // aligned for an `EdtTask`.
    unsafe { fguid.metadata.cast::<EdtTask>().write(task) };
    trace!("instantiated task {} from template {template}", fguid.guid);
    Ok(fguid)
}

/// Execute entry carried in take responses.
///
/// # Safety
///
/// `task` must address live [`EdtTask`] metadata claimed exclusively by the
/// calling worker through a successful take.
pub(crate) unsafe fn edt_execute(task: *mut EdtTask) -> Result<()> {
    // SAFETY: the caller guarantees exclusive access to live metadata.
    let task = unsafe { &*task };
    task.begin_run();

    let func = task.func();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| func(task.paramv(), task.depv())));
    task.finish_run();

    match outcome {
        Ok(Ok(output)) => {
            if output.is_valid() {
                trace!("task produced output event {output}");
            }
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(Error::new(ErrorKind::Aborted, "task body panicked")),
    }
}

/// Drops task metadata in place and releases its guid.
///
/// # Safety
///
/// `fguid` must be a live task no other worker can reach anymore: either
/// one whose execution attempt finished, or one drained from a workpile
/// that no take will observe again.
pub(crate) unsafe fn edt_destroy(provider: &dyn GuidProvider, fguid: FatGuid) -> Result<()> {
    let task = fguid.metadata.cast::<EdtTask>();
    assert!(!task.is_null(), "destroying a task without metadata");
    // SAFETY: the caller guarantees the metadata is live and unreachable;
    // destruction happens at most once because the release below returns
    // the chunk to the platform.
    unsafe {
        debug_assert_ne!(
            (*task).run_status(),
            EdtRunStatus::Running,
            "destroying a task while it executes"
        );
        ptr::drop_in_place(task);
    }
    provider.release_guid(fguid, true)?;
    trace!("destroyed task {}", fguid.guid);
    Ok(())
}
