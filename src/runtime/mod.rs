//! The executor: a cooperative, single-threaded event loop.
//!
//! [`Runtime::run`] forks a root fiber for the given description and steps
//! runnable fibers until the root completes. Each step interprets up to a
//! configurable budget of primitives before the fiber is requeued, so one
//! busy fiber cannot starve its peers. Asynchronous completions may arrive
//! from foreign threads; they requeue the suspended fiber and wake the loop
//! if it is parked.
//!
//! Interruption is checked at a *checkpoint* before every primitive: the
//! first time a pending interrupt is observed, the interpreter replaces the
//! fiber's next step with the interrupt cause, which then unwinds through the
//! saved continuation stack. Failure continuations run during that unwind,
//! which is what makes `ensuring` and `locally` reliable under interruption.
//!
//! When the root completes, every fiber still live is interrupted and
//! stepped to quiescence before the exit is returned, so no fiber outlives
//! the run that created it.

pub(crate) mod scheduler;

use crate::cause::{Cause, Defect};
use crate::effect::prim::{shared, AnyShared, Cont, ErasedCause, ErasedExit, Prim};
use crate::effect::{missing_capability_defect, typed_exit, Effect};
use crate::env::Env;
use crate::exit::Exit;
use crate::fiber::{FiberCell, Phase, ResumeErased};
use crate::fiber_ref::store::RefStore;
use crate::supervisor::{DynSupervisor, NoSupervision, Supervisor};
use crate::types::{FiberId, Location, RuntimeFiberId};
use parking_lot::{Condvar, Mutex};
use scheduler::Scheduler;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// How long the loop parks while waiting for a foreign-thread completion.
/// A bounded wait keeps the loop responsive even if a notification is lost
/// to a pathological callback.
const PARK_TIMEOUT: Duration = Duration::from_millis(10);

/// Default number of primitives a fiber may interpret per scheduling slice.
const DEFAULT_STEP_BUDGET: u32 = 128;

/// Outcome of feeding one result into the continuation stack.
enum Step {
    /// Keep interpreting with this primitive.
    Next(Prim),
    /// The stack drained; the fiber has its exit.
    Done(ErasedExit),
}

/// Shared state of one executor.
pub(crate) struct RuntimeCore {
    env: Env,
    supervisor: Arc<dyn DynSupervisor>,
    step_budget: u32,
    sched: Mutex<Scheduler>,
    fibers: Mutex<HashMap<FiberId, Arc<FiberCell>>>,
    refs: RefStore,
    idle: Condvar,
    idle_lock: Mutex<()>,
}

impl RuntimeCore {
    /// Queues a runnable fiber, lane chosen by its pending-interrupt flag.
    pub(crate) fn schedule(&self, fiber: &Arc<FiberCell>) {
        let mut sched = self.sched.lock();
        if fiber.interrupt_requested() {
            sched.schedule_interrupt(fiber.id().clone());
        } else {
            sched.schedule(fiber.id().clone());
        }
    }

    /// Promotes an already queued fiber to the interrupt lane.
    pub(crate) fn promote_to_interrupt_lane(&self, fiber: &FiberId) {
        self.sched.lock().promote(fiber);
    }

    /// Wakes the loop if it is parked.
    ///
    /// Takes the idle lock so a notification cannot slip between the loop's
    /// emptiness check and its wait.
    pub(crate) fn notify(&self) {
        let _guard = self.idle_lock.lock();
        self.idle.notify_all();
    }

    /// Parks the loop until work arrives or the timeout elapses.
    fn park(&self) {
        let mut guard = self.idle_lock.lock();
        if !self.sched.lock().is_empty() {
            return;
        }
        let _ = self.idle.wait_for(&mut guard, PARK_TIMEOUT);
    }

    /// Pops the next runnable fiber, skipping stale queue entries.
    fn next_ready(&self) -> Option<Arc<FiberCell>> {
        loop {
            let id = self.sched.lock().pop()?;
            if let Some(cell) = self.fibers.lock().get(&id).cloned() {
                return Some(cell);
            }
        }
    }

    /// Creates a fiber for `prim`, seeds its ref values from the parent, and
    /// queues it.
    fn spawn_fiber(
        self: &Arc<Self>,
        parent: Option<&Arc<FiberCell>>,
        prim: Prim,
        location: Location,
    ) -> Arc<FiberCell> {
        let id = FiberId::Runtime(RuntimeFiberId::next_at(location));
        if let Some(parent) = parent {
            self.refs.fork_into(parent.id(), id.clone());
        }
        let cell = FiberCell::new(id.clone(), prim, Arc::downgrade(self));
        if let Some(parent) = parent {
            parent.add_child(&cell);
        }
        self.guarded(|s| s.on_fork(parent.map(|p| p.id()), &id));
        self.guarded(|s| s.on_start(&id));
        self.fibers.lock().insert(id.clone(), Arc::clone(&cell));
        self.sched.lock().schedule(id.clone());
        tracing::trace!(fiber = %id, "fiber spawned");
        cell
    }

    /// Interprets up to `step_budget` primitives of one fiber.
    fn step(self: &Arc<Self>, fiber: &Arc<FiberCell>) {
        let (mut current, mut conts) = {
            let mut st = fiber.state.lock();
            match std::mem::replace(&mut st.phase, Phase::Running) {
                Phase::Ready(prim) => (prim, std::mem::take(&mut st.conts)),
                other => {
                    // Stale queue entry; put the phase back untouched.
                    st.phase = other;
                    return;
                }
            }
        };
        let mut budget = self.step_budget;

        loop {
            // Checkpoint: inject the interrupt cause exactly once, then let
            // it unwind through the continuation stack.
            if fiber.interrupt_requested() {
                let inject = {
                    let mut st = fiber.state.lock();
                    if st.interrupting {
                        None
                    } else {
                        st.interrupting = true;
                        Some(st.interrupter.clone().unwrap_or_else(|| fiber.id().clone()))
                    }
                };
                if let Some(interrupter) = inject {
                    current = Prim::FailCause(Box::new(move || Cause::interrupt(interrupter)));
                }
            }

            if budget == 0 {
                self.requeue(fiber, current, conts);
                return;
            }
            budget -= 1;

            let step = match current {
                Prim::Succeed(value) => Self::continue_with(&mut conts, value),
                Prim::Sync(thunk) => match catch_unwind(AssertUnwindSafe(thunk)) {
                    Ok(value) => Step::Next(Prim::Succeed(value)),
                    Err(payload) => Step::Next(Self::died(payload)),
                },
                Prim::FailCause(make) => {
                    let cause = match catch_unwind(AssertUnwindSafe(make)) {
                        Ok(cause) => cause,
                        Err(payload) => Cause::die(Defect::from_panic(payload.as_ref())),
                    };
                    Self::unwind_with(&mut conts, cause)
                }
                Prim::Suspend(make) => match catch_unwind(AssertUnwindSafe(make)) {
                    Ok(prim) => Step::Next(prim),
                    Err(payload) => Step::Next(Self::died(payload)),
                },
                Prim::FlatMap(inner, on_success) => {
                    conts.push(Cont::OnSuccess(on_success));
                    Step::Next(*inner)
                }
                Prim::FoldCause(inner, on_success, on_failure) => {
                    conts.push(Cont::OnExit {
                        on_success,
                        on_failure,
                    });
                    Step::Next(*inner)
                }
                Prim::Fork(inner, location) => {
                    let child = self.spawn_fiber(Some(fiber), *inner, location);
                    Step::Next(Prim::Succeed(shared(child)))
                }
                Prim::Service { access, type_name } => match access(&self.env) {
                    Some(value) => Step::Next(Prim::Succeed(value)),
                    None => {
                        let defect = missing_capability_defect(type_name);
                        Step::Next(Prim::FailCause(Box::new(move || Cause::die(defect))))
                    }
                },
                Prim::Async(register) => {
                    {
                        let mut st = fiber.state.lock();
                        st.conts = conts;
                        st.phase = Phase::Suspended;
                    }
                    let resume = ResumeErased {
                        fiber: Arc::clone(fiber),
                    };
                    let recover = resume.clone();
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(move || register(resume))) {
                        let defect = Defect::from_panic(payload.as_ref());
                        recover.resume(Prim::FailCause(Box::new(move || Cause::die(defect))));
                    }
                    return;
                }
                Prim::YieldNow => {
                    self.requeue(fiber, Prim::Succeed(shared(())), conts);
                    return;
                }
                Prim::RefModify { spec, modify } => {
                    match catch_unwind(AssertUnwindSafe(|| {
                        self.refs.modify(fiber.id(), &spec, modify)
                    })) {
                        Ok(out) => Step::Next(Prim::Succeed(out)),
                        Err(payload) => Step::Next(Self::died(payload)),
                    }
                }
                Prim::RefJoinChild { child } => {
                    let merge = matches!(child.poll_exit(), Some(Exit::Success(_)));
                    self.refs.join_child(fiber.id(), child.id(), merge);
                    Step::Next(Prim::Succeed(shared(())))
                }
                Prim::InterruptFiber { target } => {
                    target.interrupt_as(fiber.id());
                    Step::Next(Prim::Succeed(shared(())))
                }
            };

            match step {
                Step::Next(prim) => current = prim,
                Step::Done(exit) => {
                    self.finish(fiber, exit);
                    return;
                }
            }
        }
    }

    /// Feeds a value to the continuation stack.
    fn continue_with(conts: &mut Vec<Cont>, value: AnyShared) -> Step {
        match conts.pop() {
            Some(Cont::OnSuccess(k) | Cont::OnExit { on_success: k, .. }) => {
                match catch_unwind(AssertUnwindSafe(move || k(value))) {
                    Ok(prim) => Step::Next(prim),
                    Err(payload) => Step::Next(Self::died(payload)),
                }
            }
            None => Step::Done(Exit::Success(value)),
        }
    }

    /// Unwinds a cause through the continuation stack, skipping success-only
    /// frames and running the first failure arm found.
    fn unwind_with(conts: &mut Vec<Cont>, cause: ErasedCause) -> Step {
        loop {
            match conts.pop() {
                Some(Cont::OnSuccess(_)) => {}
                Some(Cont::OnExit { on_failure, .. }) => {
                    let original = cause.clone();
                    return match catch_unwind(AssertUnwindSafe(move || on_failure(cause))) {
                        Ok(prim) => Step::Next(prim),
                        Err(payload) => {
                            let defect = Cause::die(Defect::from_panic(payload.as_ref()));
                            let composed = original.then(defect);
                            Step::Next(Prim::FailCause(Box::new(move || composed)))
                        }
                    };
                }
                None => return Step::Done(Exit::Failure(cause)),
            }
        }
    }

    fn died(payload: Box<dyn Any + Send>) -> Prim {
        let defect = Defect::from_panic(payload.as_ref());
        Prim::FailCause(Box::new(move || Cause::die(defect)))
    }

    /// Parks the fiber back in the ready state with its remaining work.
    fn requeue(&self, fiber: &Arc<FiberCell>, current: Prim, conts: Vec<Cont>) {
        {
            let mut st = fiber.state.lock();
            st.conts = conts;
            st.phase = Phase::Ready(current);
        }
        self.schedule(fiber);
    }

    /// Records a fiber's exit, notifies observers and the supervisor, and
    /// removes the fiber from the tables.
    fn finish(&self, fiber: &Arc<FiberCell>, exit: ErasedExit) {
        let observers = {
            let mut st = fiber.state.lock();
            st.phase = Phase::Done(exit.clone());
            std::mem::take(&mut st.observers)
        };
        if exit.is_failure() {
            // Nothing will merge these values; drop them now.
            self.refs.reap(fiber.id());
        }
        self.fibers.lock().remove(fiber.id());
        self.sched.lock().remove(fiber.id());
        self.guarded(|s| s.on_end(fiber.id()));
        tracing::trace!(fiber = %fiber.id(), failed = exit.is_failure(), "fiber finished");
        for observer in observers {
            observer(exit.clone());
        }
        self.notify();
    }

    /// Runs a supervisor callback, confining any panic to a log line.
    fn guarded(&self, f: impl FnOnce(&dyn DynSupervisor)) {
        let supervisor = Arc::clone(&self.supervisor);
        if catch_unwind(AssertUnwindSafe(move || f(supervisor.as_ref()))).is_err() {
            tracing::error!("supervisor callback panicked; event dropped");
        }
    }

    /// Interrupts every live fiber and steps the loop to quiescence.
    fn drain(self: &Arc<Self>, interrupter: &FiberId) {
        let live: Vec<Arc<FiberCell>> = self.fibers.lock().values().cloned().collect();
        for cell in &live {
            cell.interrupt_as(interrupter);
        }
        while let Some(fiber) = self.next_ready() {
            self.step(&fiber);
        }
        self.sched.lock().clear();
        self.fibers.lock().clear();
        self.refs.clear();
    }
}

impl std::fmt::Debug for RuntimeCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeCore")
            .field("step_budget", &self.step_budget)
            .field("fibers", &self.fibers.lock().len())
            .finish()
    }
}

/// Configures and builds a [`Runtime`].
pub struct RuntimeBuilder {
    env: Env,
    supervisor: Arc<dyn DynSupervisor>,
    step_budget: u32,
}

impl std::fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("env", &self.env)
            .field("step_budget", &self.step_budget)
            .finish()
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// A builder with an empty environment, no supervision, and the default
    /// step budget.
    #[must_use]
    pub fn new() -> Self {
        Self {
            env: Env::new(),
            supervisor: Arc::new(NoSupervision),
            step_budget: DEFAULT_STEP_BUDGET,
        }
    }

    /// Sets the capability environment fibers resolve services against.
    #[must_use]
    pub fn env(mut self, env: Env) -> Self {
        self.env = env;
        self
    }

    /// Installs a supervisor. Retain your own handle to the supervisor to
    /// read its aggregate value; the runtime only dispatches events to it.
    #[must_use]
    pub fn supervisor<S: Supervisor>(mut self, supervisor: Arc<S>) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Sets how many primitives a fiber interprets per scheduling slice.
    ///
    /// Clamped to at least 1.
    #[must_use]
    pub fn step_budget(mut self, budget: u32) -> Self {
        self.step_budget = budget.max(1);
        self
    }

    /// Builds the runtime.
    #[must_use]
    pub fn build(self) -> Runtime {
        Runtime {
            core: Arc::new(RuntimeCore {
                env: self.env,
                supervisor: self.supervisor,
                step_budget: self.step_budget,
                sched: Mutex::new(Scheduler::new()),
                fibers: Mutex::new(HashMap::new()),
                refs: RefStore::new(),
                idle: Condvar::new(),
                idle_lock: Mutex::new(()),
            }),
        }
    }
}

/// Executes effect descriptions to completion.
#[derive(Debug, Clone)]
pub struct Runtime {
    core: Arc<RuntimeCore>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// A runtime with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        RuntimeBuilder::new().build()
    }

    /// Starts configuring a runtime.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Runs a description to completion on a fresh root fiber and returns
    /// its [`Exit`].
    ///
    /// Blocks the calling thread, cooperatively stepping every runnable
    /// fiber. When the root completes, all remaining fibers are interrupted
    /// and stepped to quiescence before this returns.
    #[track_caller]
    pub fn run<E, A>(&self, effect: Effect<E, A>) -> Exit<E, A>
    where
        E: Clone + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
    {
        let location = Location::caller();
        let root = self.core.spawn_fiber(None, effect.into_prim(), location);
        tracing::debug!(root = %root.id(), "run started");
        loop {
            if let Some(exit) = root.poll_exit() {
                self.core.drain(root.id());
                tracing::debug!(root = %root.id(), failed = exit.is_failure(), "run finished");
                return typed_exit(exit);
            }
            if let Some(fiber) = self.core.next_ready() {
                self.core.step(&fiber);
            } else {
                self.core.park();
            }
        }
    }

    /// Runs a description and returns its value.
    ///
    /// # Panics
    ///
    /// Panics with the rendered cause if the description does not succeed.
    /// This is the one place the crate re-raises a failure as a panic; every
    /// other surface reports causes as values.
    #[track_caller]
    pub fn run_or_panic<E, A>(&self, effect: Effect<E, A>) -> A
    where
        E: Clone + std::fmt::Debug + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
    {
        match self.run(effect) {
            Exit::Success(value) => value,
            Exit::Failure(cause) => panic!("effect failed: {cause:?}"),
        }
    }
}
