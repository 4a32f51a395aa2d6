//! End-to-end fiber lifecycle tests: running, forking, joining,
//! interrupting, and asynchronous suspension.

use filament::{Cause, Effect, Env, Resume, Runtime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

fn never() -> Effect<String, i32> {
    Effect::async_register(|_resume| {})
}

#[test]
fn run_returns_the_value() {
    let runtime = Runtime::new();
    let program: Effect<String, i32> = Effect::succeed(20)
        .map(|n| n * 2)
        .flat_map(|n| Effect::sync(move || n + 2));
    assert_eq!(runtime.run(program).unwrap(), 42);
}

#[test]
fn failure_short_circuits_the_chain() {
    let runtime = Runtime::new();
    let touched = Arc::new(AtomicBool::new(false));
    let witness = Arc::clone(&touched);
    let program: Effect<String, i32> = Effect::succeed(1)
        .flat_map(|_| Effect::fail("boom".to_string()))
        .map(move |n: i32| {
            witness.store(true, Ordering::SeqCst);
            n
        });
    let exit = runtime.run(program);
    assert_eq!(exit.cause(), Some(&Cause::fail("boom".to_string())));
    assert!(!touched.load(Ordering::SeqCst));
}

#[test]
fn panic_in_thunk_becomes_a_defect() {
    let runtime = Runtime::new();
    let program: Effect<String, i32> = Effect::sync(|| panic!("kaboom"));
    let exit = runtime.run(program);
    let cause = exit.cause().expect("failure expected");
    assert!(cause.is_die());
    assert!(!cause.is_failure());
    assert_eq!(cause.defects()[0].message(), "kaboom");
}

#[test]
fn fork_join_round_trip() {
    let runtime = Runtime::new();
    let program: Effect<String, i32> = Effect::sync(|| 6 * 7)
        .fork()
        .flat_map(|fiber| fiber.join());
    assert_eq!(runtime.run(program).unwrap(), 42);
}

#[test]
fn join_surfaces_the_child_cause_exactly() {
    let runtime = Runtime::new();
    let program: Effect<String, i32> = Effect::fail("child failed".to_string())
        .fork()
        .flat_map(|fiber| fiber.join());
    let exit = runtime.run(program);
    assert_eq!(exit.cause(), Some(&Cause::fail("child failed".to_string())));
}

#[test]
fn join_is_idempotent_across_observers() {
    let runtime = Runtime::new();
    let program: Effect<String, (i32, i32)> = Effect::sync(|| 9).fork().flat_map(|fiber| {
        let again = fiber.clone();
        fiber
            .join()
            .flat_map(move |first| again.join().map(move |second| (first, second)))
    });
    assert_eq!(runtime.run(program).unwrap(), (9, 9));
}

#[test]
fn cooperative_yield_interleaves_fibers() {
    let runtime = Runtime::new();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let worker = |first: &'static str, second: &'static str, log: Arc<Mutex<Vec<&'static str>>>| {
        let log2 = Arc::clone(&log);
        Effect::<String, ()>::sync(move || log.lock().push(first))
            .flat_map(|()| Effect::yield_now())
            .flat_map(move |()| Effect::sync(move || log2.lock().push(second)))
    };

    let a = worker("a1", "a2", Arc::clone(&log));
    let b = worker("b1", "b2", Arc::clone(&log));
    let program: Effect<String, ()> = a.fork().flat_map(move |fa| {
        b.fork()
            .flat_map(move |fb| fa.join().flat_map(move |()| fb.join()))
    });
    runtime.run(program).unwrap();
    assert_eq!(*log.lock(), vec!["a1", "b1", "a2", "b2"]);
}

#[test]
fn identical_runs_produce_structurally_equal_exits() {
    let program = || {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let out = Arc::clone(&log);
        let worker =
            |first: &'static str, second: &'static str, log: Arc<Mutex<Vec<&'static str>>>| {
                let log2 = Arc::clone(&log);
                Effect::<String, ()>::sync(move || log.lock().push(first))
                    .flat_map(|()| Effect::yield_now())
                    .flat_map(move |()| Effect::sync(move || log2.lock().push(second)))
            };
        let a = worker("a1", "a2", Arc::clone(&log));
        let b = worker("b1", "b2", Arc::clone(&log));
        a.fork()
            .flat_map(move |fa| {
                b.fork()
                    .flat_map(move |fb| fa.join().flat_map(move |()| fb.join()))
            })
            .flat_map(move |()| Effect::sync(move || out.lock().clone()))
    };
    let first = Runtime::new().run(program());
    let second = Runtime::new().run(program());
    assert_eq!(first, second);
    assert_eq!(first.unwrap(), vec!["a1", "b1", "a2", "b2"]);

    let failing = || -> filament::Exit<String, i32> {
        Runtime::new().run(
            Effect::fail("child failed".to_string())
                .fork()
                .flat_map(|fiber| fiber.join()),
        )
    };
    assert_eq!(failing(), failing());
}

#[test]
fn interrupting_a_suspended_fiber_yields_an_interrupt_cause() {
    let runtime = Runtime::new();
    // Interrupt from a forked canceller so the interrupting fiber's id is
    // known; the cause must carry exactly that id.
    let program = never().fork().flat_map(|victim| {
        victim.interrupt().fork().flat_map(move |canceller| {
            let canceller_id = canceller.id().clone();
            canceller.join().map(move |exit| (exit, canceller_id))
        })
    });
    let (exit, canceller_id) = runtime.run(program).unwrap();
    assert!(exit.is_interrupted());
    let cause = exit.cause().expect("interrupted exit has a cause");
    assert_eq!(cause.interruptors(), vec![&canceller_id]);
}

#[test]
fn interrupting_a_completed_fiber_returns_the_cached_exit() {
    let runtime = Runtime::new();
    let program: Effect<String, filament::Exit<String, i32>> =
        Effect::succeed(5).fork().flat_map(|fiber| {
            let target = fiber.clone();
            fiber.join().flat_map(move |_| target.interrupt())
        });
    let exit = runtime.run(program).unwrap();
    assert_eq!(exit.unwrap(), 5);
}

#[test]
fn ensuring_runs_on_interruption() {
    let runtime = Runtime::new();
    let cleaned = Arc::new(AtomicBool::new(false));
    let witness = Arc::clone(&cleaned);
    let child = never().ensuring(Effect::sync(move || {
        witness.store(true, Ordering::SeqCst);
    }));
    // Yield once so the child reaches its suspension point before the
    // interrupt; a fiber interrupted before its first step runs nothing.
    let program = child.fork().flat_map(|fiber| {
        Effect::yield_now().flat_map(move |()| fiber.interrupt())
    });
    let exit = runtime.run(program).unwrap();
    assert!(exit.is_interrupted());
    assert!(cleaned.load(Ordering::SeqCst));
}

#[test]
fn second_interrupt_does_not_cut_a_suspended_finalizer_short() {
    let runtime = Runtime::new();
    let finished = Arc::new(AtomicBool::new(false));
    let witness = Arc::clone(&finished);
    let gate: Arc<Mutex<Option<Resume<String, i32>>>> = Arc::new(Mutex::new(None));
    let stash = Arc::clone(&gate);

    // A finalizer that suspends until released, then records completion.
    let finalizer: Effect<String, ()> = Effect::<String, i32>::async_register(move |resume| {
        *stash.lock() = Some(resume);
    })
    .flat_map(move |_| {
        Effect::sync(move || {
            witness.store(true, Ordering::SeqCst);
        })
    });
    let victim = never().ensuring(finalizer);

    let program: Effect<String, filament::Exit<String, i32>> =
        victim.fork().flat_map(move |fiber| {
            let again = fiber.clone();
            let awaited = fiber.clone();
            // Let the victim suspend, interrupt it, and let the unwind reach
            // the finalizer's own suspension point.
            Effect::yield_now()
                .flat_map(move |()| fiber.interrupt().fork())
                .flat_map(|_| Effect::yield_now())
                .flat_map(|()| Effect::yield_now())
                // A second interrupt lands while the finalizer is suspended.
                .flat_map(move |()| again.interrupt().fork())
                .flat_map(|_| Effect::yield_now())
                // Release the finalizer and observe the victim's outcome.
                .flat_map(move |()| {
                    Effect::sync(move || {
                        if let Some(resume) = gate.lock().take() {
                            resume.succeed(0);
                        }
                    })
                })
                .flat_map(move |()| awaited.await_exit())
        });
    let exit = runtime.run(program).unwrap();
    assert!(exit.is_interrupted());
    assert!(!exit.cause().is_some_and(Cause::is_die));
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn ensuring_runs_on_success_and_failure() {
    let runtime = Runtime::new();
    let count = Arc::new(std::sync::atomic::AtomicU32::new(0));

    let c1 = Arc::clone(&count);
    let ok: Effect<String, i32> = Effect::succeed(1).ensuring(Effect::sync(move || {
        c1.fetch_add(1, Ordering::SeqCst);
    }));
    assert_eq!(runtime.run(ok).unwrap(), 1);

    let c2 = Arc::clone(&count);
    let failing: Effect<String, i32> =
        Effect::fail("e".to_string()).ensuring(Effect::sync(move || {
            c2.fetch_add(1, Ordering::SeqCst);
        }));
    assert!(runtime.run(failing).is_failure());

    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn async_completion_from_a_foreign_thread() {
    let runtime = Runtime::new();
    let program: Effect<String, i32> = Effect::async_register(|resume| {
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            resume.succeed(7);
        });
    });
    assert_eq!(runtime.run(program).unwrap(), 7);
}

#[test]
fn first_async_completion_wins() {
    let runtime = Runtime::new();
    let program: Effect<String, i32> = Effect::async_register(|resume| {
        let other = resume.clone();
        resume.succeed(1);
        other.succeed(2);
    });
    assert_eq!(runtime.run(program).unwrap(), 1);
}

#[test]
fn poll_reads_without_suspending() {
    let runtime = Runtime::new();
    let program: Effect<String, (bool, bool)> = never().fork().flat_map(|pending| {
        Effect::succeed(3).fork().flat_map(move |done| {
            let done_poll = done.clone();
            done.join().flat_map(move |_| {
                pending.poll().flat_map(move |p| {
                    done_poll.poll().map(move |d| (p.is_some(), d.is_some()))
                })
            })
        })
    });
    let (pending_done, joined_done) = runtime.run(program).unwrap();
    assert!(!pending_done);
    assert!(joined_done);
}

#[test]
fn catch_all_recovers_expected_failures_only() {
    let runtime = Runtime::new();
    let recovered: Effect<String, i32> =
        Effect::<String, i32>::fail("oops".to_string()).catch_all(|e| {
            Effect::succeed(i32::try_from(e.len()).unwrap_or_default())
        });
    assert_eq!(runtime.run(recovered).unwrap(), 4);

    let defect: Effect<String, i32> =
        Effect::<String, i32>::sync(|| panic!("hard")).catch_all(|_| Effect::succeed(0));
    let exit = runtime.run(defect);
    assert!(exit.cause().is_some_and(Cause::is_die));
}

#[test]
fn service_resolves_from_the_environment() {
    #[derive(Debug)]
    struct Greeter {
        prefix: &'static str,
    }

    let runtime = Runtime::builder()
        .env(Env::new().with(Greeter { prefix: "hello" }))
        .build();
    let program: Effect<String, String> =
        filament::service::<Greeter, String>().map(|g| format!("{}, world", g.prefix));
    assert_eq!(runtime.run(program).unwrap(), "hello, world");
}

#[test]
fn missing_service_dies_with_the_type_name() {
    struct Absent;

    let runtime = Runtime::new();
    let program: Effect<String, Arc<Absent>> = filament::service::<Absent, String>();
    let exit = runtime.run(program);
    let cause = exit.cause().expect("missing capability is a failure");
    assert!(cause.is_die());
    assert!(cause.defects()[0].message().contains("Absent"));
}

#[test]
#[should_panic(expected = "effect failed")]
fn run_or_panic_reraises_failures() {
    let runtime = Runtime::new();
    let program: Effect<String, i32> = Effect::fail("boom".to_string());
    let _ = runtime.run_or_panic(program);
}

#[test]
fn orphaned_fibers_are_drained_when_the_root_completes() {
    let runtime = Runtime::new();
    let cleaned = Arc::new(AtomicBool::new(false));
    let witness = Arc::clone(&cleaned);
    // Fork a fiber that would wait forever and never join it; yield so it
    // reaches its suspension point before the root completes.
    let program: Effect<String, i32> = never()
        .ensuring(Effect::sync(move || {
            witness.store(true, Ordering::SeqCst);
        }))
        .fork()
        .flat_map(|_| Effect::yield_now())
        .flat_map(|()| Effect::succeed(1));
    assert_eq!(runtime.run(program).unwrap(), 1);
    assert!(cleaned.load(Ordering::SeqCst));
}

#[test]
fn suspend_defers_construction_until_run() {
    let runtime = Runtime::new();
    let built = Arc::new(AtomicBool::new(false));
    let witness = Arc::clone(&built);
    let program: Effect<String, i32> = Effect::suspend(move || {
        witness.store(true, Ordering::SeqCst);
        Effect::succeed(11)
    });
    assert!(!built.load(Ordering::SeqCst));
    assert_eq!(runtime.run(program).unwrap(), 11);
    assert!(built.load(Ordering::SeqCst));
}
