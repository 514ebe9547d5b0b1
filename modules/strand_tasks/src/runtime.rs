//! Runtime construction and the four-phase lifecycle orchestration.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use atomic::Atomic;
use log::{debug, info, trace};
use strand_tasks_int::error::{Error, ErrorKind, Result};
use strand_tasks_int::task::EdtFn;
use strand_tasks_int::worker::{WorkerId, WorkerType};
use strand_tasks_int::workpile::Workpile;

use crate::compute::ThreadComputeTarget;
use crate::guid_provider::PtrGuidProvider;
use crate::mem::PlatformAllocator;
use crate::policy::{MainTask, PolicyDomain};
use crate::scheduler::WorkStealScheduler;
use crate::worker::Worker;
use crate::workpile::DequeWorkpile;

/// A builder for a [`Runtime`].
#[derive(Debug)]
pub struct Builder {
    workers: Option<usize>,
    memory_limit: Option<usize>,
    work_destroy_await: bool,
}

impl Builder {
    /// Default number of workers created by the runtime.
    ///
    /// Defaults to the number of available threads on the machine.
    pub const DEFAULT_NUM_WORKERS: Option<usize> = None;

    /// Creates a new builder with the default settings.
    #[inline]
    pub fn new() -> Self {
        Self {
            workers: Self::DEFAULT_NUM_WORKERS,
            memory_limit: None,
            work_destroy_await: false,
        }
    }

    /// Changes the number of workers.
    ///
    /// Setting `None` creates a worker per available thread. The count is
    /// clamped to at least 1.
    #[inline]
    pub fn workers(mut self, workers: Option<usize>) -> Self {
        self.workers = workers;
        self
    }

    /// Caps the memory platform at `limit` bytes in use.
    #[inline]
    pub fn memory_limit(mut self, limit: Option<usize>) -> Self {
        self.memory_limit = limit;
        self
    }

    /// Whether workers await the response of their task-destroy messages.
    ///
    /// Off by default: destroys from the worker loop are fire-and-forget,
    /// so a destroy racing the shutdown is dropped rather than surfaced.
    #[inline]
    pub fn work_destroy_await(mut self, await_response: bool) -> Self {
        self.work_destroy_await = await_response;
        self
    }

    /// Builds the runtime with the provided settings.
    ///
    /// All workers are begun and started: slaves sit latched on their
    /// threads, the master's real start happens inside [`Runtime::run`].
    #[inline]
    pub fn build(self) -> Result<Arc<Runtime>> {
        Runtime::new(self.workers, self.memory_limit, self.work_destroy_await)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum RuntimeState {
    Ready,
    Running,
    Finished,
}

/// The assembled task-execution core.
///
/// Owns a policy domain with one workpile and one worker per configured
/// thread. The calling thread becomes the master worker for the duration
/// of [`run`]/[`run_main`]; slave workers run on their own threads.
///
/// [`run`]: Runtime::run
/// [`run_main`]: Runtime::run_main
#[derive(Debug)]
pub struct Runtime {
    policy: Arc<PolicyDomain>,
    state: Atomic<RuntimeState>,
}

impl Runtime {
    fn new(
        workers: Option<usize>,
        memory_limit: Option<usize>,
        work_destroy_await: bool,
    ) -> Result<Arc<Self>> {
        // Use the provided number or the number of available cpu cores,
        // at least 1.
        let count = workers.unwrap_or_else(num_cpus::get).max(1);
        debug!("Number of workers {count}");

        let mem = Box::new(PlatformAllocator::new(memory_limit));
        let guid_provider = Box::new(PtrGuidProvider::new());

        let workpiles: Vec<Arc<dyn Workpile>> = (0..count)
            .map(|_| Arc::new(DequeWorkpile::new()) as Arc<dyn Workpile>)
            .collect();
        let mut scheduler = WorkStealScheduler::new(0, count - 1);
        scheduler.map_workpiles(workpiles.clone())?;

        let workers = (0..count)
            .map(|id| {
                let worker_type = if id == 0 {
                    WorkerType::Master
                } else {
                    WorkerType::Slave
                };
                let id = WorkerId::new(id).ok_or_else(|| {
                    Error::new(ErrorKind::ResourceExhausted, "too many workers spawned")
                })?;
                Ok(Arc::new(Worker::new(
                    id,
                    worker_type,
                    Box::new(ThreadComputeTarget::new(worker_type)),
                    work_destroy_await,
                )))
            })
            .collect::<Result<Vec<_>>>()?;

        let policy = Arc::new(PolicyDomain::new(
            mem,
            guid_provider,
            workpiles,
            scheduler,
            workers,
        ));

        PolicyDomain::begin(&policy)?;
        PolicyDomain::start(&policy)?;

        Ok(Arc::new(Self {
            policy,
            state: Atomic::new(RuntimeState::Ready),
        }))
    }

    /// The runtime's policy domain.
    #[inline]
    pub fn policy(&self) -> &Arc<PolicyDomain> {
        &self.policy
    }

    /// Requests shutdown; worker loops drain at their next iteration.
    pub fn shutdown(&self) {
        self.policy.request_shutdown();
    }

    /// Runs the core without a main task.
    ///
    /// Work is expected to be created through [`api`] before or during the
    /// run. Must be called from the thread that built the runtime, which
    /// becomes the master worker until shutdown; afterwards all subsystems
    /// are torn down in reverse start order.
    ///
    /// [`api`]: crate::api
    pub fn run(&self) -> Result<()> {
        self.run_inner(None)
    }

    /// Runs the core, bootstrapping `main` from the packed user arguments.
    ///
    /// The blob's first 8 bytes are the little-endian payload length; the
    /// master copies the payload into a data block and submits a task with
    /// the block as its single dependency before entering its loop. Must
    /// be called from the thread that built the runtime.
    pub fn run_main(&self, main: EdtFn, packed_args: &[u8]) -> Result<()> {
        self.run_inner(Some(MainTask {
            func: main,
            packed_args: packed_args.to_vec(),
        }))
    }

    fn run_inner(&self, main: Option<MainTask>) -> Result<()> {
        if self
            .state
            .compare_exchange(
                RuntimeState::Ready,
                RuntimeState::Running,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(Error::new(
                ErrorKind::FailedPrecondition,
                "the runtime has already run",
            ));
        }

        if let Some(main) = main {
            self.policy.set_main_task(main);
        }

        // the master's second start
        let master = Arc::clone(self.policy.master_worker());
        if let Err(e) = Worker::start(&master, &self.policy) {
            if e.kind() == ErrorKind::ShuttingDown {
                // shutdown won the race against the run; drain immediately
                self.teardown();
                return Ok(());
            }
            return Err(e);
        }

        // the master's first start is long done: let the slaves loose
        trace!("releasing slave workers");
        for worker in self.policy.workers() {
            worker.release_compute();
        }

        // the calling thread is the master until the loop drains
        Worker::run(&master, &self.policy);

        self.teardown();
        Ok(())
    }

    fn teardown(&self) {
        let prev = self.state.swap(RuntimeState::Finished, Ordering::AcqRel);
        if prev == RuntimeState::Finished {
            return;
        }
        self.policy.stop();
        self.policy.finish();
        info!("Runtime torn down");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // a runtime dropped without (or before finishing) a run still
        // stops its workers and frees what the policy domain owns
        self.policy.request_shutdown();
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api;
    use strand_tasks_int::guid::{FatGuid, Guid, NULL_GUID};
    use strand_tasks_int::worker::WorkerPhase;

    fn stop_task(_paramv: &[u64], _depv: &[FatGuid]) -> Result<Guid> {
        api::shutdown()?;
        Ok(NULL_GUID)
    }

    #[test]
    fn master_start_is_two_phase() {
        let runtime = Builder::new().workers(Some(1)).build().unwrap();
        let master = runtime.policy().master_worker();
        // the build round only early-starts the master
        assert_eq!(master.worker_type(), WorkerType::Master);
        assert_eq!(master.phase(), WorkerPhase::EarlyBound);
        assert!(!master.is_running());
    }

    #[test]
    fn exactly_one_master_with_id_zero() {
        let runtime = Builder::new().workers(Some(3)).build().unwrap();
        let masters: Vec<_> = runtime
            .policy()
            .workers()
            .iter()
            .filter(|w| w.worker_type() == WorkerType::Master)
            .collect();
        assert_eq!(masters.len(), 1);
        assert_eq!(masters[0].id(), WorkerId::MASTER);
    }

    #[test]
    fn stop_destroys_the_worker_guid() {
        let runtime = Builder::new().workers(Some(2)).build().unwrap();
        let slave = Arc::clone(&runtime.policy().workers()[1]);
        assert!(slave.is_running());
        assert!(slave.fguid().guid.is_valid());

        runtime.shutdown();
        runtime.teardown();

        assert_eq!(slave.phase(), WorkerPhase::Stopped);
        assert!(!slave.is_running());
        assert!(slave.fguid().guid.is_uninitialized());
    }

    #[test]
    fn run_twice_is_rejected() {
        let runtime = Builder::new().workers(Some(1)).build().unwrap();
        let template = api::edt_template_create(stop_task, 0, 0).unwrap();
        api::edt_create(template, &[], &[]).unwrap();

        runtime.run().unwrap();
        let err = runtime.run().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    }

    #[test]
    #[should_panic(expected = "paired with the wrong type")]
    fn nonzero_master_id_is_fatal() {
        let _ = Worker::new(
            WorkerId::new(1).unwrap(),
            WorkerType::Master,
            Box::new(ThreadComputeTarget::new(WorkerType::Master)),
            false,
        );
    }
}
