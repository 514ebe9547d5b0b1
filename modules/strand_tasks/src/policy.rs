//! The policy domain: single owner of the core's subsystems and the bus
//! all of their interactions flow through.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, trace};
use parking_lot::Mutex;
use strand_tasks_int::error::{Error, ErrorKind, Result};
use strand_tasks_int::guid::{FatGuid, Guid, GuidKind};
use strand_tasks_int::message::PolicyMessage;
use strand_tasks_int::task::{EdtExecFn, EdtFn, EdtTemplate};
use strand_tasks_int::worker::WorkerId;
use strand_tasks_int::workpile::{Cost, Workpile};

use crate::guid_provider::GuidProvider;
use crate::mem::MemPlatform;
use crate::scheduler::WorkStealScheduler;
use crate::task;
use crate::worker::Worker;

/// The main task handed to the master worker's bootstrap.
#[derive(Debug)]
pub(crate) struct MainTask {
    /// Body of the main task.
    pub func: EdtFn,
    /// Packed user arguments: an 8-byte little-endian length word followed
    /// by that many opaque bytes.
    pub packed_args: Vec<u8>,
}

/// Owner of workers, scheduler, workpiles, guid provider and memory
/// platform, and the dispatcher of every message between them.
///
/// Subsystems are started in order (memory platform, guid provider,
/// workers) and torn down in reverse during shutdown.
#[derive(Debug)]
pub struct PolicyDomain {
    // field order is teardown order
    workers: Vec<Arc<Worker>>,
    scheduler: WorkStealScheduler,
    workpiles: Vec<Arc<dyn Workpile>>,
    guid_provider: Box<dyn GuidProvider>,
    mem: Box<dyn MemPlatform>,
    shutdown: AtomicBool,
    main_task: Mutex<Option<MainTask>>,
}

impl PolicyDomain {
    pub(crate) fn new(
        mem: Box<dyn MemPlatform>,
        guid_provider: Box<dyn GuidProvider>,
        workpiles: Vec<Arc<dyn Workpile>>,
        scheduler: WorkStealScheduler,
        workers: Vec<Arc<Worker>>,
    ) -> Self {
        Self {
            workers,
            scheduler,
            workpiles,
            guid_provider,
            mem,
            shutdown: AtomicBool::new(false),
            main_task: Mutex::new(None),
        }
    }

    /// The domain's guid provider.
    pub fn guid_provider(&self) -> &dyn GuidProvider {
        &*self.guid_provider
    }

    /// The domain's memory platform.
    pub fn mem_platform(&self) -> &dyn MemPlatform {
        &*self.mem
    }

    /// Number of workers owned by the domain.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    pub(crate) fn master_worker(&self) -> &Arc<Worker> {
        &self.workers[0]
    }

    pub(crate) fn set_main_task(&self, main: MainTask) {
        *self.main_task.lock() = Some(main);
    }

    pub(crate) fn take_main_task(&self) -> Option<MainTask> {
        self.main_task.lock().take()
    }

    /// Whether the shutdown token has been set.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Sets the shutdown token and halts every worker loop.
    ///
    /// Work-producing messages submitted afterwards fail with
    /// [`ErrorKind::ShuttingDown`]; draining messages keep flowing so the
    /// teardown can complete.
    pub fn request_shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutdown requested");
        for worker in &self.workers {
            worker.halt();
        }
    }

    /// First lifecycle phase across all owned subsystems.
    pub(crate) fn begin(this: &Arc<Self>) -> Result<()> {
        trace!("policy domain begin");
        this.mem.begin()?;
        this.guid_provider.begin()?;
        for worker in &this.workers {
            Worker::begin(worker, this)?;
        }
        Ok(())
    }

    /// Second lifecycle phase; the master worker's start is the early
    /// no-op, slaves spawn latched.
    pub(crate) fn start(this: &Arc<Self>) -> Result<()> {
        trace!("policy domain start");
        this.mem.start()?;
        this.guid_provider.start(this)?;
        for worker in &this.workers {
            Worker::start(worker, this)?;
        }
        Ok(())
    }

    /// Stops all subsystems in reverse start order.
    pub(crate) fn stop(&self) {
        info!("Stopping policy domain");
        self.request_shutdown();
        for worker in &self.workers {
            worker.stop();
        }
        self.drain_workpiles();
        self.guid_provider.stop();
        self.mem.stop();
    }

    /// Final teardown phase in reverse start order.
    pub(crate) fn finish(&self) {
        for worker in &self.workers {
            worker.finish();
        }
        self.guid_provider.finish();
        self.mem.finish();
        info!("Policy domain finished");
    }

    /// Destroys tasks left on the workpiles by an early shutdown.
    fn drain_workpiles(&self) {
        let cost = Cost::default();
        let mut drained = 0usize;
        for pile in &self.workpiles {
            while let Some(task) = pile.steal(&cost) {
                // SAFETY: every worker loop has stopped, so nothing can
                // take this task anymore.
                if unsafe { task::edt_destroy(&*self.guid_provider, task) }.is_err() {
                    break;
                }
                drained += 1;
            }
        }
        if drained > 0 {
            info!("Drained {drained} unexecuted tasks at shutdown");
        }
    }

    /// Single entry point of the message bus.
    ///
    /// Routes the message to the responsible subsystem. With
    /// `await_response` the call is synchronous and the message's response
    /// fields are populated before return; without it the submission is
    /// fire-and-forget and may be silently dropped during shutdown.
    pub fn process_message(&self, msg: &mut PolicyMessage, await_response: bool) -> Result<()> {
        if self.is_shutting_down() && msg.is_producer() {
            if !await_response {
                trace!("dropping {} during shutdown", msg.kind_name());
                return Ok(());
            }
            return Err(ErrorKind::ShuttingDown.into());
        }

        trace!("processing {}", msg.kind_name());
        match msg {
            PolicyMessage::MemAlloc {
                size,
                mem_type,
                ptr,
                ..
            } => {
                *ptr = Some(self.mem.allocate(*size, *mem_type)?);
                Ok(())
            }
            PolicyMessage::MemUnalloc { ptr, mem_type } => self.mem.deallocate(*ptr, *mem_type),
            PolicyMessage::CommTake {
                guids,
                guid_count,
                kind,
                extra,
                src,
                ..
            } => self.handle_take(guids, guid_count, *kind, extra, *src),
            PolicyMessage::CommGive {
                guids, kind, src, ..
            } => {
                if *kind != GuidKind::Edt {
                    return Err(Error::new(
                        ErrorKind::InvalidArgument,
                        "only tasks can be given to the scheduler",
                    ));
                }
                self.scheduler.give(guids, *src)
            }
            PolicyMessage::WorkCreate {
                template,
                paramv,
                depv,
                guid,
                src,
                ..
            } => {
                let fguid = task::instantiate_edt(
                    &*self.guid_provider,
                    *template,
                    mem::take(paramv),
                    mem::take(depv),
                )?;
                // no event layer: a task with all slots bound is ready
                self.scheduler.give(&[fguid], *src)?;
                *guid = fguid;
                Ok(())
            }
            PolicyMessage::DbCreate { size, guid, .. } => {
                let fguid = self
                    .guid_provider
                    .create_guid(*size as usize, GuidKind::Db)?;
                *guid = fguid;
                Ok(())
            }
            PolicyMessage::WorkDestroy { guid, .. } => {
                // SAFETY: a destroy is only submitted for a task whose
                // execution attempt finished, or by the shutdown drain;
                // either way no other worker can reach it.
                unsafe { task::edt_destroy(&*self.guid_provider, *guid) }
            }
            PolicyMessage::GuidDestroy {
                guid, release_val, ..
            } => self.guid_provider.release_guid(*guid, *release_val),
        }
    }

    fn handle_take(
        &self,
        guids: &mut [FatGuid],
        guid_count: &mut u32,
        kind: GuidKind,
        extra: &mut Option<EdtExecFn>,
        src: WorkerId,
    ) -> Result<()> {
        if kind != GuidKind::Edt {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "only tasks can be taken",
            ));
        }
        let capacity = (*guid_count as usize).min(guids.len());
        let delivered = self
            .scheduler
            .take(&Cost::default(), src, &mut guids[..capacity])?;
        *guid_count = delivered;
        if delivered == 1 {
            *extra = Some(task::edt_execute);
        }
        Ok(())
    }

    /// Creates a task template.
    ///
    /// Templates fix the body and the parameter and dependency counts of
    /// the tasks instantiated from them.
    pub fn create_edt_template(&self, func: EdtFn, paramc: u32, depc: u32) -> Result<Guid> {
        let fguid = self
            .guid_provider
            .create_guid(mem::size_of::<EdtTemplate>(), GuidKind::EdtTemplate)?;
        // SAFETY: `create_guid` returned an exclusively owned chunk sized
        // and aligned for an `EdtTemplate`.
        unsafe {
            fguid
                .metadata
                .cast::<EdtTemplate>()
                .write(EdtTemplate { func, paramc, depc });
        }
        trace!("created template {} (paramc {paramc}, depc {depc})", fguid.guid);
        Ok(fguid.guid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Builder;
    use strand_tasks_int::guid::NULL_GUID;
    use strand_tasks_int::message::MemType;

    fn noop(_paramv: &[u64], _depv: &[FatGuid]) -> Result<Guid> {
        Ok(NULL_GUID)
    }

    #[test]
    fn take_on_an_empty_system_is_a_miss() {
        let runtime = Builder::new().workers(Some(1)).build().unwrap();
        let mut msg = PolicyMessage::CommTake {
            guids: vec![FatGuid::NULL],
            guid_count: 1,
            properties: 0,
            kind: GuidKind::Edt,
            extra: None,
            src: WorkerId::MASTER,
        };
        runtime.policy().process_message(&mut msg, true).unwrap();
        let PolicyMessage::CommTake {
            guid_count, extra, ..
        } = msg
        else {
            unreachable!()
        };
        assert_eq!(guid_count, 0);
        assert!(extra.is_none());
    }

    #[test]
    fn work_create_schedules_and_take_delivers() {
        let runtime = Builder::new().workers(Some(1)).build().unwrap();
        let policy = runtime.policy();
        let chunks_before = policy.mem_platform().live_chunks();

        let template = policy.create_edt_template(noop, 1, 0).unwrap();
        let mut create = PolicyMessage::WorkCreate {
            template,
            paramv: vec![9],
            depv: vec![],
            properties: 0,
            guid: FatGuid::NULL,
            src: WorkerId::MASTER,
        };
        policy.process_message(&mut create, true).unwrap();
        let PolicyMessage::WorkCreate { guid: created, .. } = create else {
            unreachable!()
        };
        assert!(created.guid.is_valid());

        let mut take = PolicyMessage::CommTake {
            guids: vec![FatGuid::NULL],
            guid_count: 1,
            properties: 0,
            kind: GuidKind::Edt,
            extra: None,
            src: WorkerId::MASTER,
        };
        policy.process_message(&mut take, true).unwrap();
        let PolicyMessage::CommTake {
            guids,
            guid_count,
            extra,
            ..
        } = take
        else {
            unreachable!()
        };
        assert_eq!(guid_count, 1);
        assert_eq!(guids[0], created);
        let execute = extra.unwrap();

        // SAFETY: the take above claimed the task exclusively.
        unsafe { execute(guids[0].metadata.cast()) }.unwrap();

        let mut destroy = PolicyMessage::WorkDestroy {
            guid: guids[0],
            properties: 0,
        };
        policy.process_message(&mut destroy, true).unwrap();

        // the task's header and payload are gone; only the template remains
        assert_eq!(policy.mem_platform().live_chunks(), chunks_before + 1);
    }

    #[test]
    fn mismatched_counts_are_rejected() {
        let runtime = Builder::new().workers(Some(1)).build().unwrap();
        let policy = runtime.policy();
        let template = policy.create_edt_template(noop, 0, 1).unwrap();

        let mut create = PolicyMessage::WorkCreate {
            template,
            paramv: vec![],
            depv: vec![],
            properties: 0,
            guid: FatGuid::NULL,
            src: WorkerId::MASTER,
        };
        let err = policy.process_message(&mut create, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn shutdown_rejects_producers_and_admits_drains() {
        let runtime = Builder::new().workers(Some(1)).build().unwrap();
        let policy = runtime.policy();

        let db = {
            let mut msg = PolicyMessage::DbCreate {
                size: 16,
                properties: 0,
                guid: FatGuid::NULL,
            };
            policy.process_message(&mut msg, true).unwrap();
            let PolicyMessage::DbCreate { guid, .. } = msg else {
                unreachable!()
            };
            guid
        };

        policy.request_shutdown();

        // producers are rejected ...
        let mut take = PolicyMessage::CommTake {
            guids: vec![FatGuid::NULL],
            guid_count: 1,
            properties: 0,
            kind: GuidKind::Edt,
            extra: None,
            src: WorkerId::MASTER,
        };
        let err = policy.process_message(&mut take, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShuttingDown);

        // ... fire-and-forget producers are silently dropped ...
        let mut alloc = PolicyMessage::MemAlloc {
            size: 8,
            properties: 0,
            mem_type: MemType::GuidMemtype,
            ptr: None,
        };
        policy.process_message(&mut alloc, false).unwrap();
        let PolicyMessage::MemAlloc { ptr, .. } = alloc else {
            unreachable!()
        };
        assert!(ptr.is_none());

        // ... and draining messages keep flowing
        let mut destroy = PolicyMessage::GuidDestroy {
            guid: db,
            properties: 0,
            release_val: true,
        };
        policy.process_message(&mut destroy, true).unwrap();
    }
}
