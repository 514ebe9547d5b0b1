//! Raw task primitives.

use std::sync::atomic::Ordering;

use atomic::Atomic;

use crate::error::Result;
use crate::guid::{FatGuid, Guid};

/// Body of an event-driven task.
///
/// Receives the task's parameters and the dependency slots it was created
/// with and returns the guid of its output event, or [`NULL_GUID`] when the
/// task produces none. A non-`Ok` return is an execution failure: it is
/// recorded by the executing worker, which then continues with its loop;
/// the task is destroyed either way.
///
/// [`NULL_GUID`]: crate::guid::NULL_GUID
pub type EdtFn = fn(paramv: &[u64], depv: &[FatGuid]) -> Result<Guid>;

/// Execute entry of a task, as carried in a take response.
///
/// The pointer must address live [`EdtTask`] metadata that has not been
/// executed yet; the worker dispatches through this entry without
/// interpreting the metadata itself.
pub type EdtExecFn = unsafe fn(task: *mut EdtTask) -> Result<()>;

/// Run status of a task.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub enum EdtRunStatus {
    /// The task has not started executing.
    Idle,
    /// The task body is executing on a worker.
    Running,
    /// The execution attempt finished.
    Completed,
}

/// Template from which tasks are instantiated.
///
/// Fixes the body and the parameter and dependency counts of every task
/// created from it.
#[derive(Debug, Copy, Clone)]
pub struct EdtTemplate {
    /// Task body.
    pub func: EdtFn,
    /// Number of parameters a task instance takes.
    pub paramc: u32,
    /// Number of dependency slots a task instance has.
    pub depc: u32,
}

/// Metadata of an event-driven task.
///
/// Lives in memory obtained through the policy domain; its lifetime ends
/// with the task's destroy message. A task is created, scheduled, taken,
/// executed and destroyed at most once each.
#[derive(Debug)]
pub struct EdtTask {
    template: Guid,
    func: EdtFn,
    paramv: Vec<u64>,
    depv: Vec<FatGuid>,
    run_status: Atomic<EdtRunStatus>,
}

impl EdtTask {
    /// Creates task metadata from a template instantiation.
    pub fn new(template: Guid, func: EdtFn, paramv: Vec<u64>, depv: Vec<FatGuid>) -> Self {
        Self {
            template,
            func,
            paramv,
            depv,
            run_status: Atomic::new(EdtRunStatus::Idle),
        }
    }

    /// Guid of the template this task was instantiated from.
    #[inline]
    pub fn template(&self) -> Guid {
        self.template
    }

    /// The task body.
    #[inline]
    pub fn func(&self) -> EdtFn {
        self.func
    }

    /// The task's parameters.
    #[inline]
    pub fn paramv(&self) -> &[u64] {
        &self.paramv
    }

    /// The task's dependency slots.
    #[inline]
    pub fn depv(&self) -> &[FatGuid] {
        &self.depv
    }

    /// Number of parameters.
    #[inline]
    pub fn paramc(&self) -> u32 {
        self.paramv.len() as u32
    }

    /// Number of dependency slots.
    #[inline]
    pub fn depc(&self) -> u32 {
        self.depv.len() as u32
    }

    /// Current run status.
    #[inline]
    pub fn run_status(&self) -> EdtRunStatus {
        self.run_status.load(Ordering::Acquire)
    }

    /// Marks the task as executing.
    ///
    /// # Panics
    ///
    /// Panics if the task has already started executing; a second execution
    /// attempt is an unrecoverable invariant violation.
    pub fn begin_run(&self) {
        let prev = self.run_status.swap(EdtRunStatus::Running, Ordering::AcqRel);
        assert_eq!(
            prev,
            EdtRunStatus::Idle,
            "task executed more than once (template {})",
            self.template
        );
    }

    /// Marks the execution attempt as finished.
    pub fn finish_run(&self) {
        let prev = self
            .run_status
            .swap(EdtRunStatus::Completed, Ordering::AcqRel);
        assert_eq!(prev, EdtRunStatus::Running, "task was not running");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guid::NULL_GUID;

    fn noop(_paramv: &[u64], _depv: &[FatGuid]) -> Result<Guid> {
        Ok(NULL_GUID)
    }

    #[test]
    fn run_status_transitions() {
        let task = EdtTask::new(Guid::from_raw(1), noop, vec![7], vec![]);
        assert_eq!(task.run_status(), EdtRunStatus::Idle);
        assert_eq!(task.paramc(), 1);
        assert_eq!(task.depc(), 0);

        task.begin_run();
        assert_eq!(task.run_status(), EdtRunStatus::Running);
        task.finish_run();
        assert_eq!(task.run_status(), EdtRunStatus::Completed);
    }

    #[test]
    #[should_panic(expected = "executed more than once")]
    fn double_execution_is_fatal() {
        let task = EdtTask::new(Guid::from_raw(1), noop, vec![], vec![]);
        task.begin_run();
        task.finish_run();
        task.begin_run();
    }
}
