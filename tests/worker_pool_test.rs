//! Worker pool jobs as seen from the loop: results, failures, timeouts and
//! cancellation.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use tickloop::{Scheduler, SchedulerConfig, WorkerError, WorkerPoolConfig};

fn scheduler_with_threads(threads: usize) -> Scheduler {
    Scheduler::new(SchedulerConfig {
        worker_pool: WorkerPoolConfig::with_threads(threads),
        ..Default::default()
    })
}

// =============================================================================
// Results
// =============================================================================

#[test]
fn job_result_is_delivered_on_loop_thread() {
    let sched = scheduler_with_threads(2);
    let loop_thread = thread::current().id();
    let seen = Rc::new(RefCell::new(None));

    let s = seen.clone();
    sched
        .submit(
            || Ok::<_, String>((thread::current().id(), "checksum".len())),
            move |result: Result<(thread::ThreadId, usize), WorkerError>| {
                let (worker_thread, value) = result.unwrap();
                *s.borrow_mut() = Some((worker_thread, thread::current().id(), value));
            },
        )
        .unwrap();
    sched.run().unwrap();

    let (worker_thread, callback_thread, value) = seen.borrow().unwrap();
    assert_ne!(worker_thread, loop_thread);
    assert_eq!(callback_thread, loop_thread);
    assert_eq!(value, 8);
}

#[test]
fn each_job_gets_exactly_one_completion() {
    let sched = scheduler_with_threads(4);
    let results = Rc::new(RefCell::new(Vec::new()));

    for n in 0..16u32 {
        let r = results.clone();
        sched
            .submit(move || Ok::<_, String>(n * n), move |result: Result<u32, WorkerError>| {
                r.borrow_mut().push(result.unwrap())
            })
            .unwrap();
    }
    assert_eq!(sched.outstanding_jobs(), 16);
    sched.run().unwrap();

    let mut results = results.borrow().clone();
    results.sort_unstable();
    assert_eq!(results, (0..16u32).map(|n| n * n).collect::<Vec<_>>());
    assert_eq!(sched.outstanding_jobs(), 0);
    assert_eq!(sched.stats().completion_executed, 16);
}

#[test]
fn one_completion_per_pass() {
    let sched = scheduler_with_threads(1);
    let checks = Rc::new(RefCell::new(Vec::new()));

    for n in 0..3 {
        let (s, c) = (sched.clone(), checks.clone());
        sched
            .submit(move || Ok::<_, String>(n), move |result: Result<i32, WorkerError>| {
                let n = result.unwrap();
                let c2 = c.clone();
                s.schedule_check(move || c2.borrow_mut().push(n)).map(|_| ())
            })
            .unwrap();
    }
    sched.run().unwrap();

    // every completion's check ran before the next completion was taken
    assert_eq!(*checks.borrow(), vec![0, 1, 2]);
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn job_error_arrives_as_failed() {
    let sched = scheduler_with_threads(1);
    let seen = Rc::new(RefCell::new(None));
    let s = seen.clone();
    sched
        .submit(
            || Err::<(), _>("permission denied"),
            move |result: Result<(), WorkerError>| *s.borrow_mut() = result.err(),
        )
        .unwrap();
    sched.run().unwrap();

    assert_eq!(*seen.borrow(), Some(WorkerError::Failed("permission denied".into())));
    assert_eq!(sched.stats().failures, 0, "handled by the callback, not the hook");
}

#[test]
fn job_panic_arrives_as_panicked() {
    let sched = scheduler_with_threads(1);
    let seen = Rc::new(RefCell::new(None));
    let s = seen.clone();
    sched
        .submit(
            || -> Result<u8, String> { panic!("worker blew up") },
            move |result: Result<u8, WorkerError>| *s.borrow_mut() = result.err(),
        )
        .unwrap();
    sched.run().unwrap();

    assert_eq!(*seen.borrow(), Some(WorkerError::Panicked("worker blew up".into())));
    let pool = sched.pool_stats().unwrap();
    assert_eq!(pool.jobs_panicked, 1);
}

#[test]
fn failing_completion_callback_reaches_error_hook() {
    let sched = scheduler_with_threads(1);
    let failures = Rc::new(Cell::new(0));
    let f = failures.clone();
    sched.on_unhandled_error(move |kind, _, _| {
        assert_eq!(kind, tickloop::TaskKind::Completion);
        f.set(f.get() + 1);
    });
    sched
        .submit(|| Ok::<_, String>(()), |_: Result<(), WorkerError>| Err::<(), _>("bad reply"))
        .unwrap();
    sched.run().unwrap();

    assert_eq!(failures.get(), 1);
}

// =============================================================================
// Timeouts and cancellation
// =============================================================================

#[test]
fn slow_job_times_out_once() {
    let sched = scheduler_with_threads(1);
    let calls = Rc::new(RefCell::new(Vec::new()));
    let c = calls.clone();
    sched
        .submit_with_timeout(
            || {
                thread::sleep(Duration::from_millis(200));
                Ok::<_, String>(1)
            },
            20,
            move |result: Result<i32, WorkerError>| c.borrow_mut().push(result),
        )
        .unwrap();
    sched.run().unwrap();

    assert_eq!(*calls.borrow(), vec![Err(WorkerError::TimedOut(20))]);
    assert_eq!(sched.stats().completions_dropped, 1);
}

#[test]
fn fast_job_beats_its_timeout() {
    let sched = scheduler_with_threads(1);
    let calls = Rc::new(RefCell::new(Vec::new()));
    let c = calls.clone();
    sched
        .submit_with_timeout(
            || Ok::<_, String>("fast"),
            10_000,
            move |result: Result<&'static str, WorkerError>| c.borrow_mut().push(result),
        )
        .unwrap();
    sched.run().unwrap();

    assert_eq!(*calls.borrow(), vec![Ok("fast")]);
    assert_eq!(sched.stats().timer_executed, 0);
}

#[test]
fn cancelled_job_never_calls_back() {
    let sched = scheduler_with_threads(1);
    let called = Rc::new(Cell::new(false));
    let c = called.clone();
    let job = sched
        .submit(
            || {
                thread::sleep(Duration::from_millis(20));
                Ok::<_, String>(())
            },
            move |_: Result<(), WorkerError>| c.set(true),
        )
        .unwrap();
    assert!(sched.cancel_job(&job));
    assert!(!sched.cancel_job(&job));
    sched.run().unwrap();

    assert!(!called.get());
    assert!(job.is_cancelled());
    assert!(!job.is_delivered());
}

#[test]
fn cancel_after_delivery_is_noop() {
    let sched = scheduler_with_threads(1);
    let job = sched
        .submit(|| Ok::<_, String>(()), |_: Result<(), WorkerError>| {})
        .unwrap();
    sched.run().unwrap();

    assert!(job.is_delivered());
    assert!(!sched.cancel_job(&job));
}

// =============================================================================
// Joined jobs
// =============================================================================

#[test]
fn joined_values_arrive_in_submission_order() {
    let sched = scheduler_with_threads(4);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    let jobs = (0..4u64).map(|n| {
        move || {
            thread::sleep(Duration::from_millis(40 - n * 10));
            Ok::<_, String>(n * 10)
        }
    });
    let handles = sched
        .submit_all(jobs, move |result: Result<Vec<u64>, WorkerError>| {
            s.borrow_mut().push(result)
        })
        .unwrap();
    assert_eq!(handles.len(), 4);
    sched.run().unwrap();

    assert_eq!(*seen.borrow(), vec![Ok(vec![0, 10, 20, 30])]);
    assert!(handles.iter().all(|h| h.is_delivered()));
}

#[test]
fn first_failure_fails_fast_and_cancels_the_rest() {
    let sched = scheduler_with_threads(3);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    let jobs = (0..3u32).map(|n| {
        move || {
            if n == 1 {
                return Err(format!("shard {n} unreachable"));
            }
            thread::sleep(Duration::from_millis(50));
            Ok(n)
        }
    });
    sched
        .submit_all(jobs, move |result: Result<Vec<u32>, WorkerError>| {
            s.borrow_mut().push(result)
        })
        .unwrap();
    sched.run().unwrap();

    assert_eq!(
        *seen.borrow(),
        vec![Err(WorkerError::Failed("shard 1 unreachable".into()))]
    );
    assert_eq!(sched.stats().completions_dropped, 2);
    assert_eq!(sched.outstanding_jobs(), 0);
}

#[test]
fn settled_join_collects_every_outcome() {
    let sched = scheduler_with_threads(2);
    let seen = Rc::new(RefCell::new(None));
    let s = seen.clone();
    let jobs = (0..3u32).map(|n| {
        move || {
            match n {
                1 => return Err("bad input".to_string()),
                2 => panic!("job 2 blew up"),
                _ => {}
            }
            Ok(n)
        }
    });
    sched
        .submit_all_settled(jobs, move |results: Vec<Result<u32, WorkerError>>| {
            *s.borrow_mut() = Some(results)
        })
        .unwrap();
    sched.run().unwrap();

    assert_eq!(
        seen.borrow_mut().take(),
        Some(vec![
            Ok(0),
            Err(WorkerError::Failed("bad input".into())),
            Err(WorkerError::Panicked("job 2 blew up".into())),
        ])
    );
    assert_eq!(sched.stats().completion_executed, 3);
}

#[test]
fn empty_join_completes_without_the_pool() {
    let sched = scheduler_with_threads(1);
    let seen = Rc::new(RefCell::new(None));
    let s = seen.clone();
    let handles = sched
        .submit_all(
            Vec::<fn() -> Result<u8, String>>::new(),
            move |result: Result<Vec<u8>, WorkerError>| *s.borrow_mut() = Some(result),
        )
        .unwrap();
    assert!(handles.is_empty());
    sched.run().unwrap();

    assert_eq!(seen.borrow_mut().take(), Some(Ok(Vec::new())));
    assert!(sched.pool_stats().is_none());
}

// =============================================================================
// Pool lifecycle
// =============================================================================

#[test]
fn pool_starts_on_first_submit() {
    let sched = scheduler_with_threads(3);
    assert!(sched.pool_stats().is_none());

    sched
        .submit(|| Ok::<_, String>(()), |_: Result<(), WorkerError>| {})
        .unwrap();
    let stats = sched.pool_stats().unwrap();
    assert_eq!(stats.threads_active + stats.threads_idle, 3);
    sched.run().unwrap();
}

#[test]
fn submit_after_stop_is_rejected() {
    let sched = scheduler_with_threads(1);
    let s = sched.clone();
    sched.run_with(move || { s.shutdown(); }).unwrap();

    let err = sched
        .submit(|| Ok::<_, String>(()), |_: Result<(), WorkerError>| {})
        .unwrap_err();
    assert_eq!(err, tickloop::SchedulerError::ShutDown);
}
