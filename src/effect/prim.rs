//! Type-erased effect primitives.
//!
//! The typed [`Effect`](super::Effect) facade compiles down to this closed
//! tagged variant, one case per primitive operation. Values and errors move
//! through the interpreter erased as `Arc<dyn Any + Send + Sync>`; the typed
//! combinators close over the concrete types and restore them at the
//! boundary. The interpreter is a single iterative dispatch over this enum
//! with an explicit continuation stack, so deeply nested sequential chains
//! cannot overflow the call stack.

use crate::cause::Cause;
use crate::exit::Exit;
use crate::fiber::{FiberCell, ResumeErased};
use crate::fiber_ref::store::ErasedFiberRef;
use crate::types::Location;
use std::any::Any;
use std::sync::Arc;

/// An erased, shareable value.
pub(crate) type AnyShared = Arc<dyn Any + Send + Sync>;

/// A cause whose error payloads are erased.
pub(crate) type ErasedCause = Cause<AnyShared>;

/// A fiber exit whose value and error payloads are erased.
pub(crate) type ErasedExit = Exit<AnyShared, AnyShared>;

/// Erases a value.
pub(crate) fn shared<A: Send + Sync + 'static>(value: A) -> AnyShared {
    Arc::new(value)
}

/// Restores an erased value to its concrete type.
///
/// The typed `Effect` facade guarantees the erased value under every
/// continuation has the type the continuation closed over, so a mismatch
/// here is an internal invariant violation, not a user error.
pub(crate) fn unshared<A: Clone + Send + Sync + 'static>(value: AnyShared) -> A {
    value.downcast::<A>().map_or_else(
        |_| {
            panic!(
                "effect value invariant violated: expected {}",
                std::any::type_name::<A>()
            )
        },
        |arc| (*arc).clone(),
    )
}

/// One primitive operation of an effect description.
pub(crate) enum Prim {
    /// A pure value.
    Succeed(AnyShared),
    /// A synchronous thunk producing a value.
    Sync(Box<dyn FnOnce() -> AnyShared + Send>),
    /// A lazily evaluated failure cause.
    FailCause(Box<dyn FnOnce() -> ErasedCause + Send>),
    /// A lazily evaluated nested description.
    Suspend(Box<dyn FnOnce() -> Prim + Send>),
    /// Sequencing: run the inner description, feed its value onward.
    FlatMap(Box<Prim>, Box<dyn FnOnce(AnyShared) -> Prim + Send>),
    /// Sequencing with failure observation: exactly one branch runs.
    FoldCause(
        Box<Prim>,
        Box<dyn FnOnce(AnyShared) -> Prim + Send>,
        Box<dyn FnOnce(ErasedCause) -> Prim + Send>,
    ),
    /// Start the inner description on a new fiber; yields the fiber cell.
    Fork(Box<Prim>, Location),
    /// Read a capability out of the ambient environment.
    Service {
        /// Resolves the capability against the environment.
        access: Box<dyn FnOnce(&crate::env::Env) -> Option<AnyShared> + Send>,
        /// Capability type name, for the defect raised on a failed lookup.
        type_name: &'static str,
    },
    /// Register an asynchronous callback; the fiber suspends until resumed.
    Async(Box<dyn FnOnce(ResumeErased) + Send>),
    /// A cooperative checkpoint: reschedule and let peers run.
    YieldNow,
    /// Read-and-replace the acting fiber's value for a ref.
    RefModify {
        /// The ref being modified.
        spec: Arc<ErasedFiberRef>,
        /// Maps the current value to (operation result, stored value).
        modify: Box<dyn FnOnce(&AnyShared) -> (AnyShared, AnyShared) + Send>,
    },
    /// Fold a terminated child's ref values into the acting fiber.
    RefJoinChild {
        /// The joined child.
        child: Arc<FiberCell>,
    },
    /// Request interruption of a fiber, attributed to the acting fiber.
    InterruptFiber {
        /// The fiber to interrupt.
        target: Arc<FiberCell>,
    },
}

/// A frame of the interpreter's explicit continuation stack.
pub(crate) enum Cont {
    /// Runs on success; skipped while a cause unwinds.
    OnSuccess(Box<dyn FnOnce(AnyShared) -> Prim + Send>),
    /// Runs on either outcome; the failure arm observes the cause.
    OnExit {
        /// Success continuation.
        on_success: Box<dyn FnOnce(AnyShared) -> Prim + Send>,
        /// Failure continuation.
        on_failure: Box<dyn FnOnce(ErasedCause) -> Prim + Send>,
    },
}
