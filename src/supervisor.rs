//! Fiber lifecycle observation.
//!
//! A [`Supervisor`] watches fiber lifecycle events (fork, start, end) and
//! exposes an aggregate [`Supervisor::value`] describing what it observed.
//! Callbacks are synchronous, must not block, and receive fiber identities
//! only; a supervisor never holds a fiber's value or cause and cannot alter
//! scheduling. A panicking callback is confined to that one notification:
//! the runtime logs it and the fiber proceeds untouched.
//!
//! Supervisors compose with [`Supervisor::zip`]: both constituents see every
//! event, left before right, and the composed value pairs the constituent
//! values as read at observation time.

use crate::types::FiberId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Observes fiber lifecycle events.
pub trait Supervisor: Send + Sync + 'static {
    /// The aggregate this supervisor exposes.
    type Value: Clone + Send + Sync + 'static;

    /// Reads the current aggregate value.
    fn value(&self) -> Self::Value;

    /// A fiber was forked. `parent` is absent for the root fiber.
    fn on_fork(&self, parent: Option<&FiberId>, child: &FiberId) {
        let _ = (parent, child);
    }

    /// A fiber is about to execute its first step.
    fn on_start(&self, fiber: &FiberId) {
        let _ = fiber;
    }

    /// A fiber completed.
    fn on_end(&self, fiber: &FiberId) {
        let _ = fiber;
    }

    /// Composes two supervisors. Both see every event, `self` first.
    fn zip<R: Supervisor>(self, right: R) -> Zip<Self, R>
    where
        Self: Sized,
    {
        Zip { left: self, right }
    }
}

/// The do-nothing supervisor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSupervision;

impl Supervisor for NoSupervision {
    type Value = ();

    fn value(&self) {}
}

/// Returns the do-nothing supervisor, the identity for [`Supervisor::zip`]
/// up to value shape.
#[must_use]
pub const fn none() -> NoSupervision {
    NoSupervision
}

/// Two supervisors observing the same events, left before right.
#[derive(Debug, Clone, Default)]
pub struct Zip<L, R> {
    left: L,
    right: R,
}

impl<L: Supervisor, R: Supervisor> Supervisor for Zip<L, R> {
    type Value = (L::Value, R::Value);

    fn value(&self) -> Self::Value {
        (self.left.value(), self.right.value())
    }

    fn on_fork(&self, parent: Option<&FiberId>, child: &FiberId) {
        self.left.on_fork(parent, child);
        self.right.on_fork(parent, child);
    }

    fn on_start(&self, fiber: &FiberId) {
        self.left.on_start(fiber);
        self.right.on_start(fiber);
    }

    fn on_end(&self, fiber: &FiberId) {
        self.left.on_end(fiber);
        self.right.on_end(fiber);
    }
}

/// Counts lifecycle events.
#[derive(Debug, Default)]
pub struct Tally {
    forked: AtomicU64,
    started: AtomicU64,
    ended: AtomicU64,
}

impl Tally {
    /// A tally with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// A point-in-time reading of a [`Tally`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TallySnapshot {
    /// Fibers forked so far.
    pub forked: u64,
    /// Fibers that began executing.
    pub started: u64,
    /// Fibers that completed.
    pub ended: u64,
}

impl Supervisor for Tally {
    type Value = TallySnapshot;

    fn value(&self) -> TallySnapshot {
        TallySnapshot {
            forked: self.forked.load(Ordering::Acquire),
            started: self.started.load(Ordering::Acquire),
            ended: self.ended.load(Ordering::Acquire),
        }
    }

    fn on_fork(&self, _parent: Option<&FiberId>, _child: &FiberId) {
        self.forked.fetch_add(1, Ordering::AcqRel);
    }

    fn on_start(&self, _fiber: &FiberId) {
        self.started.fetch_add(1, Ordering::AcqRel);
    }

    fn on_end(&self, _fiber: &FiberId) {
        self.ended.fetch_add(1, Ordering::AcqRel);
    }
}

/// Object-safe view the runtime dispatches lifecycle events through; the
/// aggregate value stays on the concrete type the caller retained.
pub(crate) trait DynSupervisor: Send + Sync {
    fn on_fork(&self, parent: Option<&FiberId>, child: &FiberId);
    fn on_start(&self, fiber: &FiberId);
    fn on_end(&self, fiber: &FiberId);
}

impl<S: Supervisor> DynSupervisor for S {
    fn on_fork(&self, parent: Option<&FiberId>, child: &FiberId) {
        Supervisor::on_fork(self, parent, child);
    }

    fn on_start(&self, fiber: &FiberId) {
        Supervisor::on_start(self, fiber);
    }

    fn on_end(&self, fiber: &FiberId) {
        Supervisor::on_end(self, fiber);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        label: &'static str,
        log: std::sync::Arc<Mutex<Vec<String>>>,
    }

    impl Supervisor for Recorder {
        type Value = usize;

        fn value(&self) -> usize {
            self.log.lock().len()
        }

        fn on_start(&self, fiber: &FiberId) {
            self.log.lock().push(format!("{}:start:{fiber}", self.label));
        }

        fn on_end(&self, fiber: &FiberId) {
            self.log.lock().push(format!("{}:end:{fiber}", self.label));
        }
    }

    #[test]
    fn zip_dispatches_left_then_right() {
        let log = std::sync::Arc::new(Mutex::new(Vec::new()));
        let zipped = Recorder {
            label: "l",
            log: std::sync::Arc::clone(&log),
        }
        .zip(Recorder {
            label: "r",
            log: std::sync::Arc::clone(&log),
        });
        let id = FiberId::new_for_test(1);
        Supervisor::on_start(&zipped, &id);
        Supervisor::on_end(&zipped, &id);
        assert_eq!(
            *log.lock(),
            vec!["l:start:F1", "r:start:F1", "l:end:F1", "r:end:F1"]
        );
    }

    #[test]
    fn zip_value_pairs_at_read_time() {
        let log = std::sync::Arc::new(Mutex::new(Vec::new()));
        let zipped = Recorder {
            label: "l",
            log: std::sync::Arc::clone(&log),
        }
        .zip(Tally::new());
        let id = FiberId::new_for_test(1);
        let before = zipped.value();
        Supervisor::on_start(&zipped, &id);
        let after = zipped.value();
        assert_eq!(before.0, 0);
        assert_eq!(before.1.started, 0);
        assert_eq!(after.0, 1);
        assert_eq!(after.1.started, 1);
    }

    #[test]
    fn tally_counts_each_event_kind() {
        let tally = Tally::new();
        let id = FiberId::new_for_test(1);
        Supervisor::on_fork(&tally, None, &id);
        Supervisor::on_start(&tally, &id);
        Supervisor::on_start(&tally, &id);
        let snap = tally.value();
        assert_eq!(snap.forked, 1);
        assert_eq!(snap.started, 2);
        assert_eq!(snap.ended, 0);
    }
}
