//! Workers: the execution loop and its lifecycle.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::{Arc, Weak};

use atomic::Atomic;
use log::{debug, error, info, trace};
use parking_lot::Mutex;
use strand_tasks_int::error::{Error, ErrorKind, Result};
use strand_tasks_int::guid::{FatGuid, GuidKind};
use strand_tasks_int::message::PolicyMessage;
use strand_tasks_int::task::EdtTask;
use strand_tasks_int::worker::{WorkerId, WorkerPhase, WorkerType};

use crate::api;
use crate::compute::ComputeTarget;
use crate::policy::{MainTask, PolicyDomain};

/// A worker: one execution loop on one compute target.
///
/// Workers obtain tasks from the scheduler through the policy-domain bus,
/// invoke their execute entries and destroy them afterwards. The master
/// worker (id 0) additionally bootstraps the first task from packed user
/// arguments before entering the common loop.
#[derive(Debug)]
pub struct Worker {
    id: WorkerId,
    worker_type: WorkerType,
    phase: Atomic<WorkerPhase>,
    running: AtomicBool,
    policy: Mutex<Weak<PolicyDomain>>,
    fguid: Mutex<FatGuid>,
    cur_task: AtomicPtr<EdtTask>,
    computes: Vec<Box<dyn ComputeTarget>>,
    work_destroy_await: bool,
}

impl Worker {
    pub(crate) fn new(
        id: WorkerId,
        worker_type: WorkerType,
        compute: Box<dyn ComputeTarget>,
        work_destroy_await: bool,
    ) -> Self {
        assert!(
            (id == WorkerId::MASTER) == (worker_type == WorkerType::Master),
            "worker {id} paired with the wrong type {worker_type:?}"
        );
        Self {
            id,
            worker_type,
            phase: Atomic::new(WorkerPhase::Created),
            running: AtomicBool::new(false),
            policy: Mutex::new(Weak::new()),
            fguid: Mutex::new(FatGuid::UNINITIALIZED),
            cur_task: AtomicPtr::new(ptr::null_mut()),
            computes: vec![compute],
            work_destroy_await,
        }
    }

    /// The worker's id.
    #[inline]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// The worker's type.
    #[inline]
    pub fn worker_type(&self) -> WorkerType {
        self.worker_type
    }

    /// Current phase of the start state machine.
    #[inline]
    pub fn phase(&self) -> WorkerPhase {
        self.phase.load(Ordering::Acquire)
    }

    /// Whether the worker's loop may run.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The worker's guid, as assigned at start.
    pub fn fguid(&self) -> FatGuid {
        *self.fguid.lock()
    }

    /// Metadata of the task currently executing on this worker, or null.
    pub fn current_task(&self) -> *mut EdtTask {
        self.cur_task.load(Ordering::Acquire)
    }

    /// Stops the loop at the next iteration boundary.
    pub(crate) fn halt(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub(crate) fn release_compute(&self) {
        self.computes[0].release();
    }

    /// First lifecycle phase.
    ///
    /// The master additionally binds the bootstrap thread's environment so
    /// that messages can be issued before the worker proper starts.
    pub(crate) fn begin(this: &Arc<Self>, policy: &Arc<PolicyDomain>) -> Result<()> {
        assert_eq!(
            this.computes.len(),
            1,
            "worker {} must own exactly one compute target",
            this.id
        );
        for compute in &this.computes {
            compute.begin()?;
        }
        if this.worker_type == WorkerType::Master {
            for compute in &this.computes {
                compute.set_current_env(policy, this);
            }
        }
        Ok(())
    }

    /// Starts the worker.
    ///
    /// The master's first start only advances the phase machine to
    /// [`WorkerPhase::EarlyBound`]; it is started again alongside the
    /// slaves. The real start mints the worker guid, binds the policy, sets
    /// the running flag and starts the compute target.
    pub(crate) fn start(this: &Arc<Self>, policy: &Arc<PolicyDomain>) -> Result<()> {
        if this.worker_type == WorkerType::Master
            && this
                .phase
                .compare_exchange(
                    WorkerPhase::Created,
                    WorkerPhase::EarlyBound,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            trace!("worker {} early start", this.id);
            return Ok(());
        }

        let guid = policy
            .guid_provider()
            .get_guid(Arc::as_ptr(this) as u64, GuidKind::Worker)?;
        *this.fguid.lock() = FatGuid::new(guid, Arc::as_ptr(this).cast_mut().cast());
        *this.policy.lock() = Arc::downgrade(policy);

        let prev = this.phase.swap(WorkerPhase::Running, Ordering::AcqRel);
        assert!(
            matches!(prev, WorkerPhase::Created | WorkerPhase::EarlyBound),
            "worker {} started twice",
            this.id
        );
        this.running.store(true, Ordering::Release);

        for compute in &this.computes {
            compute.start(policy, this)?;
        }
        debug!("Started worker {}", this.id);
        Ok(())
    }

    /// The worker routine.
    ///
    /// Slaves bind their thread environment; the master performs the main
    /// task bootstrap. Both then enter the common take/execute/destroy
    /// loop until the running flag clears.
    pub(crate) fn run(this: &Arc<Self>, policy: &Arc<PolicyDomain>) {
        if this.worker_type != WorkerType::Master {
            // slaves reach `run` already on their own thread
            this.computes[0].set_current_env(policy, this);
        } else if let Some(main) = policy.take_main_task() {
            if let Err(e) = this.bootstrap_main(main) {
                error!("worker {}: main task bootstrap failed: {e}", this.id);
            }
        }

        info!("Starting scheduler routine of worker {}", this.id);
        this.worker_loop(policy);
        trace!("worker {} loop drained", this.id);
    }

    /// Builds and submits the first task from the packed user arguments.
    fn bootstrap_main(&self, main: MainTask) -> Result<()> {
        let blob = &main.packed_args;
        if blob.len() < 8 {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "packed arguments are shorter than the length word",
            ));
        }
        let mut word = [0u8; 8];
        word.copy_from_slice(&blob[..8]);
        let total_length = u64::from_le_bytes(word);
        let payload = usize::try_from(total_length)
            .ok()
            .and_then(|len| len.checked_add(8))
            .and_then(|end| blob.get(8..end))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidArgument,
                    "packed arguments are shorter than their length word claims",
                )
            })?;

        // move the packed arguments into a data block
        let db = api::db_create(total_length)?;
        // SAFETY: the data block payload is `total_length` writable bytes.
        unsafe { ptr::copy_nonoverlapping(payload.as_ptr(), db.metadata, payload.len()) };

        // the main task takes no parameters and depends only on the block
        let template = api::edt_template_create(main.func, 0, 1)?;
        let edt = api::edt_create(template, &[], &[db])?;
        debug!("worker {}: main task {edt} is ready", self.id);
        Ok(())
    }

    /// The common loop: take one task, execute it, destroy it.
    fn worker_loop(&self, policy: &Arc<PolicyDomain>) {
        while self.is_running() {
            let mut msg = PolicyMessage::CommTake {
                guids: vec![FatGuid::NULL],
                guid_count: 1,
                properties: 0,
                kind: GuidKind::Edt,
                extra: None,
                src: self.id,
            };
            if self.send_message(policy, &mut msg, true).is_err() {
                // most likely shutting down; the loop re-checks `running`
                std::thread::yield_now();
                continue;
            }
            let PolicyMessage::CommTake {
                guids,
                guid_count,
                extra,
                ..
            } = msg
            else {
                unreachable!("take response changed kind");
            };

            if guid_count == 0 {
                std::thread::yield_now();
                continue;
            }

            let fguid = guids[0];
            assert!(
                fguid.guid.is_valid() && !fguid.metadata.is_null(),
                "scheduler delivered an unresolved task"
            );
            let Some(execute) = extra else {
                unreachable!("take response without an execute entry")
            };

            let task = fguid.metadata.cast::<EdtTask>();
            self.cur_task.store(task, Ordering::Release);
            // SAFETY: the take claimed the task exclusively for this worker
            // and `extra` is the execute entry for its metadata.
            if let Err(e) = unsafe { execute(task) } {
                error!("worker {}: task {} failed: {e}", self.id, fguid.guid);
            }
            self.cur_task.store(ptr::null_mut(), Ordering::Release);

            // destroy the work; failures ignored, we may be shutting down
            let mut destroy = PolicyMessage::WorkDestroy {
                guid: fguid,
                properties: 0,
            };
            let _ = self.send_message(policy, &mut destroy, self.work_destroy_await);
        }
    }

    /// Stops the worker: clears the running flag, joins the compute target
    /// and destroys the worker guid.
    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::Release);
        for compute in &self.computes {
            if let Err(e) = compute.stop() {
                error!("worker {}: compute target stop failed: {e}", self.id);
            }
        }

        // destroy the worker guid; failures ignored, we are most likely
        // shutting down
        let fguid = *self.fguid.lock();
        if fguid.guid.is_valid() {
            let policy = self.policy.lock().upgrade();
            if let Some(policy) = policy {
                let mut msg = PolicyMessage::GuidDestroy {
                    guid: fguid,
                    properties: 0,
                    release_val: false,
                };
                let _ = policy.process_message(&mut msg, false);
            }
        }
        *self.fguid.lock() = FatGuid::UNINITIALIZED;

        self.phase.store(WorkerPhase::Stopped, Ordering::Release);
        info!("Stopped worker {}", self.id);
    }

    /// Final compute-target teardown.
    pub(crate) fn finish(&self) {
        for compute in &self.computes {
            if let Err(e) = compute.finish() {
                error!("worker {}: compute target finish failed: {e}", self.id);
            }
        }
    }

    /// Submits a message through the worker's compute target.
    pub fn send_message(
        &self,
        policy: &PolicyDomain,
        msg: &mut PolicyMessage,
        await_response: bool,
    ) -> Result<()> {
        assert_eq!(
            self.computes.len(),
            1,
            "worker {} must own exactly one compute target",
            self.id
        );
        self.computes[0].send_message(policy, msg, await_response)
    }

    /// Polls the worker's compute target for an inbound message.
    pub fn poll_message(&self, policy: &PolicyDomain, msg: &mut PolicyMessage) -> Result<()> {
        assert_eq!(self.computes.len(), 1);
        self.computes[0].poll_message(policy, msg)
    }

    /// Blocks on the worker's compute target for an inbound message.
    pub fn wait_message(&self, policy: &PolicyDomain, msg: &mut PolicyMessage) -> Result<()> {
        assert_eq!(self.computes.len(), 1);
        self.computes[0].wait_message(policy, msg)
    }
}
