//! Lazy effect descriptions.
//!
//! An [`Effect<E, A>`] is an immutable description of a computation that,
//! when interpreted by the runtime, either produces an `A` or terminates
//! with a [`Cause<E>`]. Construction is pure: no constructor or combinator
//! runs user code. The description only does something when a
//! [`Runtime`](crate::runtime::Runtime) drives it on a fiber.
//!
//! The combinator surface is deliberately narrow: the primitives the
//! execution semantics require (`succeed`, `sync`, `fail_cause`, `suspend`,
//! `flat_map`, `fold_cause`, `fork`, `service`, `async_register`,
//! `yield_now`) plus the few derived forms the rest of the crate and its
//! tests lean on. Collection traversal helpers and the wider combinator zoo
//! belong to a layer above this one.

pub(crate) mod prim;

use crate::cause::{Cause, Defect};
use crate::env::MissingCapability;
use crate::exit::Exit;
use crate::fiber::{Fiber, ResumeErased};
use crate::types::Location;
use core::convert::Infallible;
use core::fmt;
use core::marker::PhantomData;
use parking_lot::Mutex;
use prim::{shared, unshared, ErasedCause, ErasedExit, Prim};
use std::sync::Arc;

/// Erases a typed cause for transport through the interpreter.
pub(crate) fn erase_cause<E: Send + Sync + 'static>(cause: Cause<E>) -> ErasedCause {
    cause.map(shared)
}

/// Restores a typed cause at the API boundary.
pub(crate) fn typed_cause<E: Clone + Send + Sync + 'static>(cause: ErasedCause) -> Cause<E> {
    cause.map(unshared)
}

/// Restores a typed exit at the API boundary.
pub(crate) fn typed_exit<E, A>(exit: ErasedExit) -> Exit<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    match exit {
        Exit::Success(value) => Exit::Success(unshared(value)),
        Exit::Failure(cause) => Exit::Failure(typed_cause(cause)),
    }
}

/// An immutable, lazily evaluated description of a computation.
///
/// Values and errors travel through the interpreter type-erased, which is
/// why `E` and `A` carry `Clone + Send + Sync + 'static` bounds: the typed
/// facade restores them when the description completes, and a cached exit
/// may be handed to any number of observers.
pub struct Effect<E, A> {
    prim: Prim,
    _marker: PhantomData<fn() -> (E, A)>,
}

impl<E, A> fmt::Debug for Effect<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Effect(..)")
    }
}

impl<E, A> Effect<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    pub(crate) fn from_prim(prim: Prim) -> Self {
        Self {
            prim,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_prim(self) -> Prim {
        self.prim
    }

    /// A pure value.
    #[must_use]
    pub fn succeed(value: A) -> Self {
        Self::from_prim(Prim::Succeed(shared(value)))
    }

    /// A synchronous thunk, run when the description is interpreted.
    ///
    /// A panic inside the thunk becomes a `Die` cause; it never escapes the
    /// interpreter.
    pub fn sync(f: impl FnOnce() -> A + Send + 'static) -> Self {
        Self::from_prim(Prim::Sync(Box::new(move || shared(f()))))
    }

    /// An expected failure.
    #[must_use]
    pub fn fail(error: E) -> Self {
        Self::fail_cause(Cause::fail(error))
    }

    /// Failure with a full cause tree.
    #[must_use]
    pub fn fail_cause(cause: Cause<E>) -> Self {
        Self::from_prim(Prim::FailCause(Box::new(move || erase_cause(cause))))
    }

    /// Failure with a lazily built cause tree.
    pub fn fail_cause_with(f: impl FnOnce() -> Cause<E> + Send + 'static) -> Self {
        Self::from_prim(Prim::FailCause(Box::new(move || erase_cause(f()))))
    }

    /// An unexpected fault.
    #[must_use]
    pub fn die(defect: Defect) -> Self {
        Self::fail_cause(Cause::die(defect))
    }

    /// Lifts a `Result` into a description.
    #[must_use]
    pub fn from_result(result: Result<A, E>) -> Self {
        match result {
            Ok(value) => Self::succeed(value),
            Err(error) => Self::fail(error),
        }
    }

    /// Defers construction of the description itself.
    ///
    /// A panic while building the description becomes a `Die` cause.
    pub fn suspend(f: impl FnOnce() -> Self + Send + 'static) -> Self {
        Self::from_prim(Prim::Suspend(Box::new(move || f().into_prim())))
    }

    /// Registers an asynchronous callback. The fiber suspends until the
    /// given [`Resume`] is completed, from any thread; the first completion
    /// wins.
    pub fn async_register(register: impl FnOnce(Resume<E, A>) + Send + 'static) -> Self {
        Self::from_prim(Prim::Async(Box::new(move |inner: ResumeErased| {
            register(Resume {
                inner,
                _marker: PhantomData,
            });
        })))
    }

    /// Transforms the success value.
    pub fn map<B>(self, f: impl FnOnce(A) -> B + Send + 'static) -> Effect<E, B>
    where
        B: Clone + Send + Sync + 'static,
    {
        Effect::from_prim(Prim::FlatMap(
            Box::new(self.prim),
            Box::new(move |v| Prim::Succeed(shared(f(unshared(v))))),
        ))
    }

    /// Sequences this description with a continuation on its value.
    ///
    /// On failure the continuation is skipped and the cause short-circuits.
    pub fn flat_map<B>(self, f: impl FnOnce(A) -> Effect<E, B> + Send + 'static) -> Effect<E, B>
    where
        B: Clone + Send + Sync + 'static,
    {
        Effect::from_prim(Prim::FlatMap(
            Box::new(self.prim),
            Box::new(move |v| f(unshared(v)).into_prim()),
        ))
    }

    /// Sequences two descriptions and combines their values.
    pub fn zip_with<B, C>(
        self,
        that: Effect<E, B>,
        f: impl FnOnce(A, B) -> C + Send + 'static,
    ) -> Effect<E, C>
    where
        B: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
    {
        self.flat_map(move |a| that.map(move |b| f(a, b)))
    }

    /// Runs exactly one of the two continuations with this description's
    /// outcome. The failure arm observes the full cause, including
    /// interruption unwinding through it, which is what makes guaranteed
    /// cleanup expressible.
    pub fn fold_cause<E2, B>(
        self,
        on_success: impl FnOnce(A) -> Effect<E2, B> + Send + 'static,
        on_failure: impl FnOnce(Cause<E>) -> Effect<E2, B> + Send + 'static,
    ) -> Effect<E2, B>
    where
        E2: Clone + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
    {
        Effect::from_prim(Prim::FoldCause(
            Box::new(self.prim),
            Box::new(move |v| on_success(unshared(v)).into_prim()),
            Box::new(move |cause| on_failure(typed_cause(cause)).into_prim()),
        ))
    }

    /// Recovers from the first expected failure in the cause.
    ///
    /// Causes with no `Fail` leaf (pure defects or interruption) are not
    /// recoverable here and propagate unchanged.
    pub fn catch_all<E2>(self, f: impl FnOnce(E) -> Effect<E2, A> + Send + 'static) -> Effect<E2, A>
    where
        E2: Clone + Send + Sync + 'static,
    {
        self.fold_cause(Effect::succeed, move |cause| {
            let first = cause.failures().first().map(|e| (*e).clone());
            match first {
                Some(error) => f(error),
                // No typed failures, so the map closure can never run.
                None => Effect::fail_cause(cause.map(|_| unreachable!())),
            }
        })
    }

    /// Transforms every expected failure in the cause.
    pub fn map_error<E2>(self, f: impl Fn(E) -> E2 + Send + Sync + 'static) -> Effect<E2, A>
    where
        E2: Clone + Send + Sync + 'static,
    {
        self.fold_cause(Effect::succeed, move |cause| {
            Effect::fail_cause(cause.map(&f))
        })
    }

    /// Runs `finalizer` after this description on every exit path: success,
    /// failure, and interruption. A finalizer failure is appended
    /// sequentially to the original cause rather than replacing it.
    #[must_use]
    pub fn ensuring(self, finalizer: Effect<E, ()>) -> Self {
        // Exactly one of the two continuations runs, so the finalizer is
        // threaded through a once-cell both can reach.
        let fin = Arc::new(Mutex::new(Some(finalizer.into_prim())));
        let fin_failure = Arc::clone(&fin);
        let take = |cell: &Mutex<Option<Prim>>| {
            cell.lock()
                .take()
                .map_or_else(|| Prim::Succeed(shared(())), |p| p)
        };
        Self::from_prim(Prim::FoldCause(
            Box::new(self.prim),
            Box::new(move |v| {
                Prim::FlatMap(
                    Box::new(take(&fin)),
                    Box::new(move |_| Prim::Succeed(v)),
                )
            }),
            Box::new(move |cause| {
                let original = cause.clone();
                Prim::FoldCause(
                    Box::new(take(&fin_failure)),
                    Box::new(move |_| Prim::FailCause(Box::new(move || cause))),
                    Box::new(move |fin_cause| {
                        Prim::FailCause(Box::new(move || original.then(fin_cause)))
                    }),
                )
            }),
        ))
    }

    /// Starts this description on a new fiber and yields its handle
    /// immediately; the current fiber continues without waiting.
    ///
    /// The child inherits the caller's ref values through each ref's fork
    /// transform and is tagged with the caller's source location.
    #[must_use]
    #[track_caller]
    pub fn fork(self) -> Effect<E, Fiber<E, A>> {
        let location = Location::caller();
        Effect::from_prim(Prim::FlatMap(
            Box::new(Prim::Fork(Box::new(self.prim), location)),
            Box::new(|v| {
                let cell: Arc<crate::fiber::FiberCell> = unshared(v);
                Prim::Succeed(shared(Fiber::<E, A>::from_cell(cell)))
            }),
        ))
    }
}

impl<E> Effect<E, ()>
where
    E: Clone + Send + Sync + 'static,
{
    /// The trivially successful description.
    #[must_use]
    pub fn unit() -> Self {
        Self::succeed(())
    }

    /// A cooperative checkpoint: reschedules the fiber and lets peers run.
    #[must_use]
    pub fn yield_now() -> Self {
        Self::from_prim(Prim::YieldNow)
    }
}

/// Reads the capability `T` out of the ambient environment.
///
/// The lookup is by unique type token. A missing capability is a contract
/// violation: the fiber dies with a [`MissingCapability`] defect rather than
/// failing with a typed error.
#[must_use]
pub fn service<T, E>() -> Effect<E, Arc<T>>
where
    T: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    Effect::from_prim(Prim::Service {
        access: Box::new(|env| env.get::<T>().map(|arc| shared(arc))),
        type_name: std::any::type_name::<T>(),
    })
}

/// An effect that cannot fail.
pub type UEffect<A> = Effect<Infallible, A>;

/// Completes a suspended [`Effect::async_register`] registration.
///
/// May be cloned and sent to other threads; the first completion wins and
/// later ones are ignored. If the fiber was interrupted while suspended, the
/// interruption takes precedence over the delivered continuation.
pub struct Resume<E, A> {
    inner: ResumeErased,
    _marker: PhantomData<fn(E, A)>,
}

impl<E, A> Clone for Resume<E, A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E, A> fmt::Debug for Resume<E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Resume(..)")
    }
}

impl<E, A> Resume<E, A>
where
    E: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
{
    /// Resumes the fiber with the given description.
    pub fn complete(&self, effect: Effect<E, A>) {
        self.inner.resume(effect.into_prim());
    }

    /// Resumes the fiber with a value.
    pub fn succeed(&self, value: A) {
        self.complete(Effect::succeed(value));
    }

    /// Resumes the fiber with an expected failure.
    pub fn fail(&self, error: E) {
        self.complete(Effect::fail(error));
    }
}

/// The defect raised when a capability lookup fails.
pub(crate) fn missing_capability_defect(type_name: &'static str) -> Defect {
    Defect::new(
        MissingCapability { type_name }.to_string(),
    )
}
