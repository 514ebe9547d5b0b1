//! Compute targets and the thread-local current environment.
//!
//! A compute target is the thread-spawning layer a worker executes on. The
//! runtime uses one target per worker: the master's target represents the
//! thread that started the runtime, slave targets own a spawned thread that
//! is held on a latch until the bootstrap ordering allows it to run.

use std::cell::RefCell;
use std::fmt::Debug;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{error, info, trace};
use parking_lot::Mutex;
use strand_tasks_int::error::{Error, ErrorKind, Result};
use strand_tasks_int::message::PolicyMessage;
use strand_tasks_int::worker::WorkerType;

use crate::policy::PolicyDomain;
use crate::worker::Worker;

struct CurrentEnv {
    policy: Weak<PolicyDomain>,
    worker: Weak<Worker>,
}

thread_local! {
    static CURRENT_ENV: RefCell<Option<CurrentEnv>> = const { RefCell::new(None) };
}

/// Binds the calling thread to a policy domain and worker.
///
/// Subsequent [`current_policy`]/[`current_worker`] calls on this thread
/// resolve to the bound pair.
pub(crate) fn bind_current_env(policy: &Arc<PolicyDomain>, worker: &Arc<Worker>) {
    trace!("binding current environment to worker {}", worker.id());
    CURRENT_ENV.with(|env| {
        *env.borrow_mut() = Some(CurrentEnv {
            policy: Arc::downgrade(policy),
            worker: Arc::downgrade(worker),
        });
    });
}

/// The policy domain bound to the calling thread.
///
/// Fails with [`ErrorKind::Unavailable`] when the thread has no bound
/// environment, or the domain has been torn down.
pub fn current_policy() -> Result<Arc<PolicyDomain>> {
    CURRENT_ENV
        .with(|env| env.borrow().as_ref().and_then(|e| e.policy.upgrade()))
        .ok_or_else(|| {
            Error::new(
                ErrorKind::Unavailable,
                "no policy domain is bound to this thread",
            )
        })
}

/// The worker bound to the calling thread, if any.
pub fn current_worker() -> Option<Arc<Worker>> {
    CURRENT_ENV.with(|env| env.borrow().as_ref().and_then(|e| e.worker.upgrade()))
}

/// The execution vehicle of a worker.
pub trait ComputeTarget: Send + Sync + Debug {
    /// First lifecycle phase.
    fn begin(&self) -> Result<()>;

    /// Starts the target; slave targets spawn their thread here and hold it
    /// on the release latch.
    fn start(&self, policy: &Arc<PolicyDomain>, worker: &Arc<Worker>) -> Result<()>;

    /// Opens the release latch; a no-op for targets without one.
    fn release(&self);

    /// Stops the target, joining a spawned thread.
    fn stop(&self) -> Result<()>;

    /// Final teardown phase.
    fn finish(&self) -> Result<()>;

    /// Binds the calling thread's environment to `policy` and `worker`.
    fn set_current_env(&self, policy: &Arc<PolicyDomain>, worker: &Arc<Worker>);

    /// Submits a message to the policy domain on behalf of the worker.
    fn send_message(
        &self,
        policy: &PolicyDomain,
        msg: &mut PolicyMessage,
        await_response: bool,
    ) -> Result<()>;

    /// Polls for an inbound message.
    fn poll_message(&self, policy: &PolicyDomain, msg: &mut PolicyMessage) -> Result<()>;

    /// Blocks for an inbound message.
    fn wait_message(&self, policy: &PolicyDomain, msg: &mut PolicyMessage) -> Result<()>;
}

/// OS-thread compute target.
///
/// The master variant represents the thread that brings the runtime up and
/// never spawns; slave variants spawn a named thread on start that waits on
/// a bounded-channel latch before entering the worker's run routine, which
/// keeps slaves out of their loop until the master's first start completed.
#[derive(Debug)]
pub struct ThreadComputeTarget {
    worker_type: WorkerType,
    release: Sender<()>,
    latch: Receiver<()>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadComputeTarget {
    /// Creates a target for a worker of the given type.
    pub fn new(worker_type: WorkerType) -> Self {
        let (release, latch) = bounded(1);
        Self {
            worker_type,
            release,
            latch,
            thread: Mutex::new(None),
        }
    }
}

impl ComputeTarget for ThreadComputeTarget {
    fn begin(&self) -> Result<()> {
        Ok(())
    }

    fn start(&self, policy: &Arc<PolicyDomain>, worker: &Arc<Worker>) -> Result<()> {
        if self.worker_type == WorkerType::Master {
            // the bringup thread is the master's vehicle
            return Ok(());
        }

        let latch = self.latch.clone();
        let policy = Arc::clone(policy);
        let worker = Arc::clone(worker);
        let name = format!("Worker {}", worker.id());
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                info!("Spawned new worker {}", worker.id());
                // wait for the bootstrap ordering to allow the run
                let _ = latch.recv();
                Worker::run(&worker, &policy);
            })
            .map_err(|e| Error::new(ErrorKind::Internal, e))?;
        *self.thread.lock() = Some(handle);
        Ok(())
    }

    fn release(&self) {
        let _ = self.release.try_send(());
    }

    fn stop(&self) -> Result<()> {
        // unblock a still-latched thread so it can observe the stop
        self.release();
        if let Some(handle) = self.thread.lock().take() {
            handle
                .join()
                .map_err(|_| Error::new(ErrorKind::Internal, "worker thread panicked"))?;
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        Ok(())
    }

    fn set_current_env(&self, policy: &Arc<PolicyDomain>, worker: &Arc<Worker>) {
        bind_current_env(policy, worker);
    }

    fn send_message(
        &self,
        policy: &PolicyDomain,
        msg: &mut PolicyMessage,
        await_response: bool,
    ) -> Result<()> {
        policy.process_message(msg, await_response)
    }

    fn poll_message(&self, _policy: &PolicyDomain, _msg: &mut PolicyMessage) -> Result<()> {
        // a single-domain target processes messages synchronously; there is
        // no inbound queue to poll
        Err(ErrorKind::Unimplemented.into())
    }

    fn wait_message(&self, _policy: &PolicyDomain, _msg: &mut PolicyMessage) -> Result<()> {
        Err(ErrorKind::Unimplemented.into())
    }
}

impl Drop for ThreadComputeTarget {
    fn drop(&mut self) {
        if let Some(handle) = self.thread.get_mut().take() {
            // a target dropped without a stop still releases and joins
            let _ = self.release.try_send(());
            if handle.join().is_err() {
                error!("worker thread panicked during teardown");
            }
        }
    }
}
