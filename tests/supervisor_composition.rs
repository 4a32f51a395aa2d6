//! Supervisor behavior observed through whole runs: counting, composition
//! ordering, and panic isolation.

use filament::{Effect, FiberId, Runtime, Supervisor, Tally};
use parking_lot::Mutex;
use std::sync::Arc;

struct Recorder {
    label: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Supervisor for Recorder {
    type Value = usize;

    fn value(&self) -> usize {
        self.log.lock().len()
    }

    fn on_fork(&self, _parent: Option<&FiberId>, _child: &FiberId) {
        self.log.lock().push(format!("{}:fork", self.label));
    }

    fn on_end(&self, _fiber: &FiberId) {
        self.log.lock().push(format!("{}:end", self.label));
    }
}

struct PanickingSupervisor;

impl Supervisor for PanickingSupervisor {
    type Value = ();

    fn value(&self) {}

    fn on_start(&self, _fiber: &FiberId) {
        panic!("bad supervisor");
    }
}

fn forking_program() -> Effect<String, i32> {
    Effect::sync(|| 1).fork().flat_map(|fa| {
        Effect::sync(|| 2)
            .fork()
            .flat_map(move |fb| fa.join().flat_map(move |a| fb.join().map(move |b| a + b)))
    })
}

#[test]
fn tally_counts_every_fiber_in_a_run() {
    let tally = Arc::new(Tally::new());
    let runtime = Runtime::builder().supervisor(Arc::clone(&tally)).build();
    assert_eq!(runtime.run(forking_program()).unwrap(), 3);
    let snap = tally.value();
    // Root plus two forked children.
    assert_eq!(snap.forked, 3);
    assert_eq!(snap.started, 3);
    assert_eq!(snap.ended, 3);
}

#[test]
fn zipped_supervisors_both_see_every_event_left_first() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let zipped = Arc::new(
        Recorder {
            label: "l",
            log: Arc::clone(&log),
        }
        .zip(Recorder {
            label: "r",
            log: Arc::clone(&log),
        }),
    );
    let runtime = Runtime::builder().supervisor(zipped).build();
    runtime.run(forking_program()).unwrap();

    let events = log.lock().clone();
    // Every event is doubled, left before right.
    assert_eq!(events.len() % 2, 0);
    for pair in events.chunks(2) {
        assert!(pair[0].starts_with("l:"));
        assert!(pair[1].starts_with("r:"));
        assert_eq!(pair[0][2..], pair[1][2..]);
    }
    assert_eq!(events.iter().filter(|e| *e == "l:fork").count(), 3);
    assert_eq!(events.iter().filter(|e| *e == "l:end").count(), 3);
}

#[test]
fn zipped_value_pairs_the_constituents_at_read_time() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let zipped = Arc::new(
        Recorder {
            label: "l",
            log,
        }
        .zip(Tally::new()),
    );
    let runtime = Runtime::builder().supervisor(Arc::clone(&zipped)).build();
    runtime.run(forking_program()).unwrap();

    let (recorded, snap) = zipped.value();
    assert_eq!(recorded, 6);
    assert_eq!(snap.forked, 3);
    assert_eq!(snap.ended, 3);
}

#[test]
fn a_panicking_supervisor_does_not_disturb_the_run() {
    let runtime = Runtime::builder()
        .supervisor(Arc::new(PanickingSupervisor))
        .build();
    assert_eq!(runtime.run(forking_program()).unwrap(), 3);
}

#[test]
fn supervision_observes_failed_fibers_too() {
    let tally = Arc::new(Tally::new());
    let runtime = Runtime::builder().supervisor(Arc::clone(&tally)).build();
    let program: Effect<String, ()> = Effect::fail("boom".to_string())
        .fork()
        .flat_map(|fiber| fiber.join());
    assert!(runtime.run(program).is_failure());
    let snap = tally.value();
    assert_eq!(snap.forked, 2);
    assert_eq!(snap.ended, 2);
}
