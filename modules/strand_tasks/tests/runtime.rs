//! Scenario tests for the assembled runtime.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use strand_tasks::{api, Builder, Runtime};
use strand_tasks_int::error::{ErrorKind, Result};
use strand_tasks_int::guid::{FatGuid, Guid, NULL_GUID};

static INIT: Once = Once::new();

fn new_runtime(workers: usize) -> Arc<Runtime> {
    INIT.call_once(pretty_env_logger::init);
    Builder::new().workers(Some(workers)).build().unwrap()
}

/// Shuts the runtime down from a helper thread after a grace period.
fn watchdog(runtime: &Arc<Runtime>, after: Duration) -> std::thread::JoinHandle<()> {
    let runtime = Arc::clone(runtime);
    std::thread::spawn(move || {
        std::thread::sleep(after);
        runtime.shutdown();
    })
}

mod loopback {
    use super::*;

    static FLAG: AtomicU64 = AtomicU64::new(0);

    fn set_flag(_paramv: &[u64], _depv: &[FatGuid]) -> Result<Guid> {
        FLAG.store(7, Ordering::SeqCst);
        api::shutdown()?;
        Ok(NULL_GUID)
    }

    #[test]
    fn single_worker_executes_a_seeded_task() {
        let runtime = new_runtime(1);

        // seed one task directly, no main bootstrap
        let template = api::edt_template_create(set_flag, 0, 0).unwrap();
        api::edt_create(template, &[], &[]).unwrap();

        runtime.run().unwrap();
        assert_eq!(FLAG.load(Ordering::SeqCst), 7);
    }
}

mod drain {
    use super::*;

    const TASKS: usize = 4;
    static EXECUTED: AtomicUsize = AtomicUsize::new(0);

    fn count(_paramv: &[u64], _depv: &[FatGuid]) -> Result<Guid> {
        if EXECUTED.fetch_add(1, Ordering::SeqCst) + 1 == TASKS {
            api::shutdown()?;
        }
        Ok(NULL_GUID)
    }

    #[test]
    fn two_workers_drain_a_seeded_pile() {
        let runtime = new_runtime(2);

        // all four tasks land on the master's pile; the slave can only
        // reach them by stealing
        let template = api::edt_template_create(count, 0, 0).unwrap();
        for _ in 0..TASKS {
            api::edt_create(template, &[], &[]).unwrap();
        }

        runtime.run().unwrap();
        assert_eq!(EXECUTED.load(Ordering::SeqCst), TASKS);
    }
}

mod spread {
    use super::*;

    const TASKS: usize = 64;
    static EXECUTED: AtomicUsize = AtomicUsize::new(0);

    fn count(paramv: &[u64], _depv: &[FatGuid]) -> Result<Guid> {
        assert_eq!(paramv.len(), 1);
        std::thread::sleep(Duration::from_micros(paramv[0]));
        if EXECUTED.fetch_add(1, Ordering::SeqCst) + 1 == TASKS {
            api::shutdown()?;
        }
        Ok(NULL_GUID)
    }

    #[test]
    fn every_task_executes_exactly_once_under_stealing() {
        let runtime = new_runtime(4);

        let template = api::edt_template_create(count, 1, 0).unwrap();
        for i in 0..TASKS {
            api::edt_create(template, &[(i % 7) as u64 * 50], &[]).unwrap();
        }

        runtime.run().unwrap();
        // a double execution would also trip the task's own status assert
        assert_eq!(EXECUTED.load(Ordering::SeqCst), TASKS);
    }
}

mod empty {
    use super::*;

    #[test]
    fn empty_system_shuts_down_cleanly() {
        let runtime = new_runtime(2);
        let guard = watchdog(&runtime, Duration::from_millis(50));

        // nothing was seeded: both workers spin on misses until the
        // watchdog flips the shutdown token
        runtime.run().unwrap();
        guard.join().unwrap();
    }
}

mod bootstrap {
    use super::*;

    static VERIFIED: AtomicU64 = AtomicU64::new(0);

    fn main_task(paramv: &[u64], depv: &[FatGuid]) -> Result<Guid> {
        assert!(paramv.is_empty());
        assert_eq!(depv.len(), 1);
        let db = depv[0];
        assert!(db.guid.is_valid());

        // SAFETY: the master copied exactly 16 packed bytes into the block.
        let bytes = unsafe { std::slice::from_raw_parts(db.metadata, 16) };
        let expected: Vec<u8> = (0x01..=0x10).collect();
        assert_eq!(bytes, &expected[..]);

        VERIFIED.store(1, Ordering::SeqCst);
        api::shutdown()?;
        Ok(NULL_GUID)
    }

    #[test]
    fn master_bootstraps_the_main_task() {
        let runtime = new_runtime(2);

        let mut packed = 16u64.to_le_bytes().to_vec();
        packed.extend(0x01..=0x10u8);

        runtime.run_main(main_task, &packed).unwrap();
        assert_eq!(VERIFIED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn truncated_packed_args_fail_the_bootstrap() {
        let runtime = new_runtime(1);
        let guard = watchdog(&runtime, Duration::from_millis(50));

        fn never(_paramv: &[u64], _depv: &[FatGuid]) -> Result<Guid> {
            panic!("the bootstrap must not have produced a task");
        }

        // claims 16 payload bytes but carries none; the bootstrap fails and
        // the loop runs empty until the watchdog fires
        let packed = 16u64.to_le_bytes().to_vec();
        runtime.run_main(never, &packed).unwrap();
        guard.join().unwrap();
    }
}

mod exhaustion {
    use super::*;

    fn noop(_paramv: &[u64], _depv: &[FatGuid]) -> Result<Guid> {
        Ok(NULL_GUID)
    }

    #[test]
    fn allocation_failure_propagates_to_the_caller() {
        // too small for even one guid header
        INIT.call_once(pretty_env_logger::init);
        let _runtime = Builder::new()
            .workers(Some(1))
            .memory_limit(Some(8))
            .build()
            .unwrap();

        let err = api::edt_template_create(noop, 0, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }
}

mod race {
    use super::*;

    fn noop(_paramv: &[u64], _depv: &[FatGuid]) -> Result<Guid> {
        Ok(NULL_GUID)
    }

    #[test]
    fn shutdown_during_takes_is_benign() {
        let runtime = new_runtime(2);
        // fire almost immediately so takes race the token
        let guard = watchdog(&runtime, Duration::from_millis(1));

        runtime.run().unwrap();
        guard.join().unwrap();

        // the bus now rejects new work with the dedicated error
        let template_err = api::edt_template_create(noop, 0, 0).unwrap_err();
        assert_eq!(template_err.kind(), ErrorKind::ShuttingDown);
    }

    #[test]
    fn a_failing_task_does_not_stop_the_worker() {
        let runtime = new_runtime(1);

        fn fail(_paramv: &[u64], _depv: &[FatGuid]) -> Result<Guid> {
            Err(ErrorKind::Internal.into())
        }
        fn stop(_paramv: &[u64], _depv: &[FatGuid]) -> Result<Guid> {
            api::shutdown()?;
            Ok(NULL_GUID)
        }

        // the failing task is recorded and destroyed; the next task still
        // runs and ends the test. Home pops are LIFO, so the task pushed
        // last executes first.
        let failing = api::edt_template_create(fail, 0, 0).unwrap();
        let stopping = api::edt_template_create(stop, 0, 0).unwrap();
        api::edt_create(stopping, &[], &[]).unwrap();
        api::edt_create(failing, &[], &[]).unwrap();

        runtime.run().unwrap();
    }
}
