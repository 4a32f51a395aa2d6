//! Fibers: cooperatively scheduled logical threads.
//!
//! A [`Fiber`] is the handle to a running interpretation of an effect
//! description. It exposes the synchronization surface of the runtime:
//!
//! - [`Fiber::join`] suspends the caller until the fiber completes, folds the
//!   fiber's ref values back into the caller on success, and surfaces the
//!   fiber's cause on failure
//! - [`Fiber::await_exit`] like `join`, but yields the [`Exit`] as a value
//!   and never fails
//! - [`Fiber::poll`] reads the current outcome without suspending
//! - [`Fiber::interrupt`] requests cooperative interruption of the fiber and
//!   its live descendants, then awaits the final outcome
//!
//! Internally each fiber owns a [`FiberCell`]: the phase machine
//! (`Ready → Running → {Suspended | Ready}* → Done`), the saved continuation
//! stack, the interruption flag, child handles for transitive interrupts, and
//! the observers waiting on completion. Once `Done`, the exit is cached and
//! every later observer receives the same outcome.

use crate::effect::prim::{shared, unshared, Cont, ErasedExit, Prim};
use crate::effect::{typed_exit, Effect};
use crate::exit::Exit;
use crate::runtime::RuntimeCore;
use crate::types::FiberId;
use core::fmt;
use core::marker::PhantomData;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Where a fiber is in its lifecycle.
pub(crate) enum Phase {
    /// Scheduled (or about to be): `0` is the next program step to run.
    Ready(Prim),
    /// Currently being stepped by the executor.
    Running,
    /// Waiting for an asynchronous callback to resume it.
    Suspended,
    /// Finished; the exit is cached for all observers.
    Done(ErasedExit),
}

pub(crate) struct FiberInner {
    pub(crate) phase: Phase,
    pub(crate) conts: Vec<Cont>,
    pub(crate) interrupter: Option<FiberId>,
    /// Set once the interrupt cause has been injected, so unwinding through
    /// failure continuations is not restarted at every checkpoint.
    pub(crate) interrupting: bool,
    pub(crate) children: Vec<Weak<FiberCell>>,
    pub(crate) observers: Vec<Box<dyn FnOnce(ErasedExit) + Send>>,
}

/// The shared state of one fiber.
pub(crate) struct FiberCell {
    id: FiberId,
    /// Advisory interruption flag, checked at every checkpoint and at async
    /// re-entry. The attributed interrupter lives under the state lock.
    interrupt_flag: AtomicBool,
    pub(crate) state: Mutex<FiberInner>,
    pub(crate) runtime: Weak<RuntimeCore>,
}

impl FiberCell {
    pub(crate) fn new(id: FiberId, prim: Prim, runtime: Weak<RuntimeCore>) -> Arc<Self> {
        Arc::new(Self {
            id,
            interrupt_flag: AtomicBool::new(false),
            state: Mutex::new(FiberInner {
                phase: Phase::Ready(prim),
                conts: Vec::new(),
                interrupter: None,
                interrupting: false,
                children: Vec::new(),
                observers: Vec::new(),
            }),
            runtime,
        })
    }

    pub(crate) fn id(&self) -> &FiberId {
        &self.id
    }

    pub(crate) fn interrupt_requested(&self) -> bool {
        self.interrupt_flag.load(Ordering::Acquire)
    }

    /// Returns the cached exit, if the fiber has completed.
    pub(crate) fn poll_exit(&self) -> Option<ErasedExit> {
        match &self.state.lock().phase {
            Phase::Done(exit) => Some(exit.clone()),
            _ => None,
        }
    }

    /// Registers `observer` to run with the exit; runs immediately if the
    /// fiber is already done.
    pub(crate) fn on_done(&self, observer: Box<dyn FnOnce(ErasedExit) + Send>) {
        let mut st = self.state.lock();
        if let Phase::Done(exit) = &st.phase {
            let exit = exit.clone();
            drop(st);
            observer(exit);
        } else {
            st.observers.push(observer);
        }
    }

    pub(crate) fn add_child(&self, child: &Arc<Self>) {
        self.state.lock().children.push(Arc::downgrade(child));
    }

    /// Requests interruption of this fiber and, transitively, its live
    /// children. Advisory and cooperative: the interpreter acts on it at the
    /// next checkpoint. A `Done` fiber is left untouched.
    pub(crate) fn interrupt_as(self: &Arc<Self>, interrupter: &FiberId) {
        let mut wake = false;
        let children;
        {
            let mut st = self.state.lock();
            if matches!(st.phase, Phase::Done(_)) {
                return;
            }
            if st.interrupter.is_none() {
                st.interrupter = Some(interrupter.clone());
            }
            self.interrupt_flag.store(true, Ordering::Release);
            if matches!(st.phase, Phase::Suspended) && !st.interrupting {
                // Wake it with a placeholder step; the checkpoint at re-entry
                // converts it into the interrupt cause before anything runs.
                // A fiber already unwinding from an earlier interrupt is left
                // suspended: the checkpoint would inject nothing, the
                // placeholder would reach a continuation expecting the async
                // result, and an in-flight finalizer would be cut short.
                st.phase = Phase::Ready(Prim::Succeed(shared(())));
                wake = true;
            }
            children = st.children.clone();
        }
        if let Some(runtime) = self.runtime.upgrade() {
            if wake {
                runtime.schedule(self);
            } else {
                runtime.promote_to_interrupt_lane(&self.id);
            }
            runtime.notify();
        }
        tracing::trace!(fiber = %self.id, by = %interrupter, "interrupt requested");
        for child in children {
            if let Some(child) = child.upgrade() {
                child.interrupt_as(interrupter);
            }
        }
    }
}

impl fmt::Debug for FiberCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberCell").field("id", &self.id).finish()
    }
}

/// Resumes a suspended fiber with its next program step.
///
/// The first resumption wins; later calls (a duplicate callback, a
/// completion racing an interrupt wake-up) are ignored.
#[derive(Clone)]
pub(crate) struct ResumeErased {
    pub(crate) fiber: Arc<FiberCell>,
}

impl ResumeErased {
    pub(crate) fn resume(&self, prim: Prim) {
        let Some(runtime) = self.fiber.runtime.upgrade() else {
            return;
        };
        {
            let mut st = self.fiber.state.lock();
            if !matches!(st.phase, Phase::Suspended) {
                return;
            }
            st.phase = Phase::Ready(prim);
        }
        runtime.schedule(&self.fiber);
        runtime.notify();
    }
}

/// Handle to a running fiber producing `A` or failing with `Cause<E>`.
pub struct Fiber<E, A> {
    cell: Arc<FiberCell>,
    _marker: PhantomData<fn() -> (E, A)>,
}

impl<E, A> Clone for Fiber<E, A> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            _marker: PhantomData,
        }
    }
}

impl<E, A> fmt::Debug for Fiber<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber").field("id", self.id()).finish()
    }
}

impl<E, A> Fiber<E, A> {
    pub(crate) fn from_cell(cell: Arc<FiberCell>) -> Self {
        Self {
            cell,
            _marker: PhantomData,
        }
    }

    /// Returns this fiber's identity.
    #[must_use]
    pub fn id(&self) -> &FiberId {
        self.cell.id()
    }
}

impl<E, A> Fiber<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    /// Awaits this fiber's completion and propagates its outcome.
    ///
    /// On success the fiber's ref values are folded back into the caller
    /// (each ref's join transform applied, caller's value on the left) and
    /// the fiber's value is produced. On failure the fiber's cause becomes
    /// the caller's cause. Join is idempotent: every observer receives the
    /// same cached exit.
    #[must_use]
    pub fn join(&self) -> Effect<E, A> {
        let cell = Arc::clone(&self.cell);
        let child = Arc::clone(&self.cell);
        Effect::from_prim(Prim::FlatMap(
            Box::new(await_prim(cell)),
            Box::new(move |v| {
                let exit: ErasedExit = unshared(v);
                Prim::FlatMap(
                    Box::new(Prim::RefJoinChild { child }),
                    Box::new(move |_| match exit {
                        Exit::Success(value) => Prim::Succeed(value),
                        Exit::Failure(cause) => Prim::FailCause(Box::new(move || cause)),
                    }),
                )
            }),
        ))
    }

    /// Awaits this fiber's completion and yields the [`Exit`] as a value.
    ///
    /// Never fails and does not fold ref values back.
    #[must_use]
    pub fn await_exit(&self) -> Effect<E, Exit<E, A>> {
        let cell = Arc::clone(&self.cell);
        Effect::from_prim(Prim::FlatMap(
            Box::new(await_prim(cell)),
            Box::new(|v| {
                let exit: ErasedExit = unshared(v);
                Prim::Succeed(shared(typed_exit::<E, A>(exit)))
            }),
        ))
    }

    /// Reads the current outcome without suspending.
    #[must_use]
    pub fn poll(&self) -> Effect<E, Option<Exit<E, A>>> {
        let cell = Arc::clone(&self.cell);
        Effect::from_prim(Prim::Sync(Box::new(move || {
            shared(cell.poll_exit().map(typed_exit::<E, A>))
        })))
    }

    /// Requests interruption of this fiber and its live descendants, then
    /// awaits the final outcome.
    ///
    /// Interruption is advisory and cooperative: it takes effect at the
    /// fiber's next checkpoint. Interrupting an already completed fiber is a
    /// no-op yielding the cached exit.
    #[must_use]
    pub fn interrupt(&self) -> Effect<E, Exit<E, A>> {
        let target = Arc::clone(&self.cell);
        let cell = Arc::clone(&self.cell);
        Effect::from_prim(Prim::FlatMap(
            Box::new(Prim::InterruptFiber { target }),
            Box::new(move |_| {
                Prim::FlatMap(
                    Box::new(await_prim(cell)),
                    Box::new(|v| {
                        let exit: ErasedExit = unshared(v);
                        Prim::Succeed(shared(typed_exit::<E, A>(exit)))
                    }),
                )
            }),
        ))
    }
}

/// An async registration that resumes with the fiber's cached exit.
fn await_prim(cell: Arc<FiberCell>) -> Prim {
    Prim::Async(Box::new(move |resume: ResumeErased| {
        cell.on_done(Box::new(move |exit| {
            resume.resume(Prim::Succeed(shared(exit)));
        }));
    }))
}
