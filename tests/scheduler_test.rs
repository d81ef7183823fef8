//! Integration tests for the task scheduler.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use skeldex::config::SchedulerConfig;
use skeldex::error::Error;
use skeldex::scheduler::{Executor, Job, Scheduler, TaskFailure, ThreadExecutor, rayon_pool};

type Doubler = Scheduler<u32, String, u32, String>;

fn config(name: &str) -> SchedulerConfig {
    SchedulerConfig {
        name: name.to_string(),
        workers: 4,
        input_capacity: None,
    }
}

fn doubler(name: &str) -> Doubler {
    let pool = rayon_pool(&config(name)).unwrap();
    Scheduler::with_config(&config(name), |n: &u32| Ok(n * 2), pool)
}

/// Records jobs instead of running them, so tests control dispatch timing.
#[derive(Default)]
struct HeldExecutor {
    jobs: Mutex<Vec<Job>>,
}

impl HeldExecutor {
    fn run_all(&self) {
        let jobs: Vec<Job> = self.jobs.lock().unwrap().drain(..).collect();
        for job in jobs {
            job();
        }
    }

    fn drop_all(&self) {
        self.jobs.lock().unwrap().clear();
    }
}

impl Executor for HeldExecutor {
    fn execute(&self, job: Job) {
        self.jobs.lock().unwrap().push(job);
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[test]
fn every_item_is_accepted_exactly_once() {
    let scheduler = doubler("exactly-once");
    for n in 0..200u32 {
        scheduler.submit(n, format!("deposit-{n}")).unwrap();
    }
    assert!(scheduler.auto(None).unwrap());

    let mut seen = HashSet::new();
    while scheduler.has_pending() {
        let result = scheduler.accept().unwrap();
        assert_eq!(result.deposit, format!("deposit-{}", result.item));
        assert_eq!(*result.outcome.as_ref().unwrap(), result.item * 2);
        assert!(seen.insert(result.item), "item {} accepted twice", result.item);
    }
    assert_eq!(seen.len(), 200);
    assert_eq!(scheduler.pending_count(), 0);
    assert!(matches!(scheduler.accept(), Err(Error::Idle)));

    scheduler.close();
    scheduler.wait_dispatcher().unwrap();
}

#[test]
fn items_submitted_while_running_are_processed() {
    let scheduler = doubler("interleaved");
    scheduler.auto(None).unwrap();

    for n in 0..10u32 {
        scheduler.submit(n, String::new()).unwrap();
        let result = scheduler.accept().unwrap();
        assert_eq!(result.item, n);
        assert_eq!(result.outcome.unwrap(), n * 2);
    }

    scheduler.close();
    scheduler.wait_dispatcher().unwrap();
}

#[test]
fn accepted_item_can_be_submitted_again() {
    let scheduler = doubler("resubmit");
    scheduler.auto(None).unwrap();

    let first = scheduler.submit(7, "first".to_string()).unwrap();
    let result = scheduler.accept().unwrap();
    assert_eq!(result.deposit, "first");

    let second = scheduler.submit(7, "second".to_string()).unwrap();
    assert_ne!(first, second);
    assert_eq!(scheduler.accept().unwrap().deposit, "second");
}

// ---------------------------------------------------------------------------
// Submission rules
// ---------------------------------------------------------------------------

#[test]
fn duplicate_submission_keeps_original_deposit() {
    let executor = Arc::new(HeldExecutor::default());
    let scheduler: Doubler = Scheduler::new(|n: &u32| Ok(n + 1), Arc::clone(&executor));

    scheduler.submit(1, "original".to_string()).unwrap();
    let err = scheduler.submit(1, "imposter".to_string()).unwrap_err();
    assert!(matches!(err, Error::AlreadySubmitted(_)));
    assert_eq!(scheduler.pending_count(), 1);

    assert!(scheduler.try_handle());
    assert!(!scheduler.try_handle());
    executor.run_all();

    let result = scheduler.accept().unwrap();
    assert_eq!(result.deposit, "original");
    assert_eq!(result.outcome.unwrap(), 2);
}

#[test]
fn submit_after_close_is_rejected() {
    let scheduler = doubler("closed");
    scheduler.submit(1, String::new()).unwrap();
    scheduler.close();
    assert!(!scheduler.is_open());

    assert!(matches!(
        scheduler.submit(2, String::new()),
        Err(Error::Closed)
    ));
    assert!(matches!(
        scheduler.update(&1, String::new()),
        Err(Error::Closed)
    ));
    assert_eq!(scheduler.pending_count(), 1);

    // Already submitted items still run after close.
    scheduler.auto(None).unwrap();
    assert_eq!(scheduler.accept().unwrap().item, 1);
    scheduler.wait_dispatcher().unwrap();
}

#[test]
fn update_swaps_deposit_of_in_flight_item() {
    let executor = Arc::new(HeldExecutor::default());
    let scheduler: Doubler = Scheduler::new(|n: &u32| Ok(*n), Arc::clone(&executor));

    assert!(matches!(
        scheduler.update(&5, "nothing".to_string()),
        Err(Error::NotSubmitted(_))
    ));

    scheduler.submit(5, "before".to_string()).unwrap();
    let old = scheduler.update(&5, "after".to_string()).unwrap();
    assert_eq!(old, "before");

    scheduler.handle().unwrap();
    executor.run_all();
    assert_eq!(scheduler.accept().unwrap().deposit, "after");
}

#[test]
fn bounded_input_still_delivers_everything() {
    let mut config = config("bounded");
    config.input_capacity = Some(2);
    let pool = rayon_pool(&config).unwrap();
    let scheduler: Doubler = Scheduler::with_config(&config, |n: &u32| Ok(n * 2), pool);
    scheduler.auto(None).unwrap();

    for n in 0..50u32 {
        scheduler.submit(n, String::new()).unwrap();
    }
    let mut total = 0;
    while scheduler.has_pending() {
        total += scheduler.accept().unwrap().outcome.unwrap();
    }
    assert_eq!(total, (0..50u32).map(|n| n * 2).sum::<u32>());
}

#[test]
fn full_input_does_not_stall_other_calls() {
    let mut config = config("full-input");
    config.input_capacity = Some(1);
    let executor = Arc::new(HeldExecutor::default());
    let scheduler: Arc<Doubler> = Arc::new(Scheduler::with_config(
        &config,
        |n: &u32| Ok(n * 2),
        Arc::clone(&executor),
    ));

    scheduler.submit(1, "first".to_string()).unwrap();
    let blocked = {
        let scheduler = Arc::clone(&scheduler);
        thread::spawn(move || scheduler.submit(2, "second".to_string()))
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!blocked.is_finished());

    // None of these wait for the blocked submit.
    assert!(scheduler.has_pending());
    assert_eq!(scheduler.pending_count(), 2);
    assert!(!scheduler.has_completed());
    assert_eq!(
        scheduler.update(&1, "first-updated".to_string()).unwrap(),
        "first"
    );
    scheduler.close();
    assert!(!scheduler.is_open());

    // The submit that got in before close still reaches the dispatch loop.
    scheduler.auto(None).unwrap();
    assert!(blocked.join().unwrap().is_ok());
    scheduler.wait_dispatcher().unwrap();
    executor.run_all();

    let mut deposits: Vec<String> = (0..2)
        .map(|_| scheduler.accept().unwrap().deposit)
        .collect();
    deposits.sort();
    assert_eq!(deposits, vec!["first-updated", "second"]);
    assert!(matches!(scheduler.accept(), Err(Error::Idle)));
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_submitters_and_acceptor() {
    const THREADS: u32 = 4;
    const PER_THREAD: u32 = 250;

    let scheduler = Arc::new(doubler("concurrent"));
    scheduler.auto(None).unwrap();

    let acceptor = {
        let scheduler = Arc::clone(&scheduler);
        thread::spawn(move || {
            let mut seen = HashMap::new();
            while seen.len() < (THREADS * PER_THREAD) as usize {
                match scheduler.accept_timeout(Duration::from_millis(20)) {
                    Ok(Some(result)) => {
                        assert_eq!(result.outcome.unwrap(), result.item * 2);
                        assert!(
                            seen.insert(result.item, result.deposit).is_none(),
                            "item {} accepted twice",
                            result.item
                        );
                    }
                    // Submitters may not have caught up yet.
                    Ok(None) | Err(Error::Idle) => thread::sleep(Duration::from_millis(1)),
                    Err(e) => panic!("accept failed: {e}"),
                }
            }
            seen
        })
    };

    let submitters: Vec<_> = (0..THREADS)
        .map(|t| {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || {
                for n in t * PER_THREAD..(t + 1) * PER_THREAD {
                    scheduler.submit(n, format!("deposit-{n}")).unwrap();
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }

    let seen = acceptor.join().unwrap();
    assert_eq!(seen.len(), (THREADS * PER_THREAD) as usize);
    for (item, deposit) in seen {
        assert_eq!(deposit, format!("deposit-{item}"));
    }
    assert!(!scheduler.has_pending());
}

#[test]
fn racing_duplicate_submits_have_one_winner() {
    let executor = Arc::new(HeldExecutor::default());
    let scheduler: Arc<Doubler> = Arc::new(Scheduler::new(|n: &u32| Ok(*n), Arc::clone(&executor)));
    let barrier = Arc::new(Barrier::new(8));

    let racers: Vec<_> = (0..8)
        .map(|i| {
            let scheduler = Arc::clone(&scheduler);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                scheduler.submit(42, format!("racer-{i}"))
            })
        })
        .collect();
    let results: Vec<_> = racers.into_iter().map(|r| r.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, Error::AlreadySubmitted(_)))
    );
    assert_eq!(scheduler.pending_count(), 1);

    scheduler.handle().unwrap();
    executor.run_all();
    assert!(scheduler.accept().unwrap().deposit.starts_with("racer-"));
}

#[test]
fn competing_acceptors_release_the_loser() {
    let executor = Arc::new(HeldExecutor::default());
    let scheduler: Arc<Doubler> = Arc::new(Scheduler::new(|n: &u32| Ok(*n), Arc::clone(&executor)));
    scheduler.submit(1, String::new()).unwrap();

    let acceptors: Vec<_> = (0..2)
        .map(|_| {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || scheduler.accept().map(|r| r.item))
        })
        .collect();
    thread::sleep(Duration::from_millis(20));
    scheduler.handle().unwrap();
    executor.run_all();

    let results: Vec<_> = acceptors.into_iter().map(|a| a.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| matches!(r, Ok(1))).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(Error::Idle)))
            .count(),
        1
    );
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn failed_item_is_reported_and_others_continue() {
    let pool = rayon_pool(&config("failing")).unwrap();
    let scheduler: Doubler = Scheduler::with_config(
        &config("failing"),
        |n: &u32| {
            if *n == 3 {
                Err(format!("cannot process {n}"))
            } else {
                Ok(*n)
            }
        },
        pool,
    );
    for n in 0..6u32 {
        scheduler.submit(n, String::new()).unwrap();
    }
    scheduler.auto(None).unwrap();

    let mut ok = 0;
    let mut failed = Vec::new();
    while scheduler.has_pending() {
        let result = scheduler.accept().unwrap();
        match result.outcome {
            Ok(_) => ok += 1,
            Err(TaskFailure::Failed(msg)) => failed.push((result.item, msg)),
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }
    assert_eq!(ok, 5);
    assert_eq!(failed, vec![(3, "cannot process 3".to_string())]);
}

#[test]
fn panicking_closure_becomes_a_failure() {
    let executor = Arc::new(HeldExecutor::default());
    let scheduler: Doubler = Scheduler::new(
        |n: &u32| -> Result<u32, String> { panic!("boom on {n}") },
        Arc::clone(&executor),
    );
    scheduler.submit(9, String::new()).unwrap();
    scheduler.handle().unwrap();
    executor.run_all();

    let result = scheduler.accept().unwrap();
    assert!(!result.is_ok());
    match result.outcome {
        Err(TaskFailure::Panicked(msg)) => assert_eq!(msg, "boom on 9"),
        other => panic!("expected a panic failure, got {other:?}"),
    }
}

#[test]
fn dropped_job_is_reported_as_abandoned() {
    let executor = Arc::new(HeldExecutor::default());
    let scheduler: Doubler = Scheduler::new(|n: &u32| Ok(*n), Arc::clone(&executor));
    scheduler.submit(4, "kept".to_string()).unwrap();
    scheduler.handle().unwrap();
    executor.drop_all();

    let result = scheduler.accept().unwrap();
    assert_eq!(result.deposit, "kept");
    assert!(matches!(result.outcome, Err(TaskFailure::Abandoned)));
}

// ---------------------------------------------------------------------------
// Dispatch loop
// ---------------------------------------------------------------------------

#[test]
fn auto_starts_only_once() {
    let scheduler = doubler("auto-once");
    assert!(scheduler.auto(None).unwrap());
    assert!(!scheduler.auto(None).unwrap());

    scheduler.close();
    scheduler.wait_dispatcher().unwrap();
    // Still a no-op once the loop has exited.
    assert!(!scheduler.auto(None).unwrap());
}

#[test]
fn shutdown_hook_runs_after_drain() {
    let scheduler = doubler("hook");
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    scheduler
        .auto(Some(Box::new(move |_executor: &dyn Executor| {
            flag.store(true, Ordering::SeqCst);
        })))
        .unwrap();

    scheduler.submit(1, String::new()).unwrap();
    assert!(matches!(
        scheduler.wait_dispatcher(),
        Err(Error::InvalidArgument(_))
    ));

    scheduler.close();
    scheduler.wait_dispatcher().unwrap();
    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(scheduler.accept().unwrap().item, 1);
}

#[test]
fn accept_timeout_and_try_accept_do_not_block() {
    let executor = Arc::new(HeldExecutor::default());
    let scheduler: Doubler = Scheduler::new(|n: &u32| Ok(*n), Arc::clone(&executor));

    assert!(scheduler.try_accept().unwrap().is_none());
    assert!(matches!(
        scheduler.accept_timeout(Duration::from_millis(10)),
        Err(Error::Idle)
    ));

    scheduler.submit(2, String::new()).unwrap();
    assert!(
        scheduler
            .accept_timeout(Duration::from_millis(20))
            .unwrap()
            .is_none()
    );
    assert!(!scheduler.has_completed());

    scheduler.handle().unwrap();
    executor.run_all();
    assert!(scheduler.has_completed());
    assert_eq!(scheduler.completed_count(), 1);
    assert_eq!(scheduler.try_accept().unwrap().unwrap().item, 2);
}

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

#[test]
fn thread_executor_spawns_per_item() {
    let executor = Arc::new(ThreadExecutor::new("per-item"));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let scheduler: Doubler = Scheduler::new(
        move |n: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(*n)
        },
        Arc::clone(&executor),
    );
    for n in 0..5u32 {
        scheduler.submit(n, String::new()).unwrap();
    }
    scheduler.auto(None).unwrap();
    while scheduler.has_pending() {
        scheduler.accept().unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(executor.spawned(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn tokio_blocking_pool_as_executor() {
    let handle = tokio::runtime::Handle::current();
    let total = tokio::task::spawn_blocking(move || {
        let scheduler: Doubler = Scheduler::new(|n: &u32| Ok(n * 3), handle);
        for n in 1..=10u32 {
            scheduler.submit(n, String::new()).unwrap();
        }
        scheduler.auto(None).unwrap();
        let mut total = 0;
        while scheduler.has_pending() {
            total += scheduler.accept().unwrap().outcome.unwrap();
        }
        total
    })
    .await
    .unwrap();
    assert_eq!(total, 165);
}
