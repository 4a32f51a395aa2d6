//! Fiber-local state with structured inheritance.
//!
//! A [`FiberRef`] is a mutable cell whose value is scoped to a fiber. Forking
//! copies the parent's value into the child through the ref's *fork*
//! transform; joining folds the child's terminal value back into the parent
//! through the ref's *join* transform. Under the default policies a child
//! sees the parent's value at fork and the child's value wins at join, which
//! makes sequential fork-then-join behave like plain mutable state.
//!
//! Order-sensitive joins are intentional: the runtime does not impose
//! commutativity. When merged contributions must not depend on join order,
//! construct the ref with [`FiberRef::combining`] and a [`Commutative`]
//! operation.

pub(crate) mod store;

use crate::algebra::Commutative;
use crate::effect::prim::{shared, AnyShared, Prim};
use crate::effect::Effect;
use core::fmt;
use core::marker::PhantomData;
use std::sync::Arc;
use store::ErasedFiberRef;

fn typed<A: Clone + Send + Sync + 'static>(value: &AnyShared) -> A {
    value.downcast_ref::<A>().map_or_else(
        || {
            panic!(
                "fiber ref value invariant violated: expected {}",
                std::any::type_name::<A>()
            )
        },
        Clone::clone,
    )
}

/// A fiber-local cell of type `A`.
///
/// Cheap to clone; clones refer to the same cell.
pub struct FiberRef<A> {
    spec: Arc<ErasedFiberRef>,
    _marker: PhantomData<fn() -> A>,
}

impl<A> Clone for FiberRef<A> {
    fn clone(&self) -> Self {
        Self {
            spec: Arc::clone(&self.spec),
            _marker: PhantomData,
        }
    }
}

impl<A> fmt::Debug for FiberRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FiberRef(..)")
    }
}

impl<A> FiberRef<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// A ref with the default policies: the child inherits the parent's
    /// value unchanged at fork, and the child's value wins at join.
    #[must_use]
    pub fn new(initial: A) -> Self {
        Self::with_policy(initial, |v: &A| v.clone(), |_: &A, child: &A| {
            child.clone()
        })
    }

    /// A ref with explicit fork and join transforms.
    ///
    /// `fork` maps the parent's value to the child's starting value; `join`
    /// maps (parent's current value, child's terminal value) to the parent's
    /// merged value.
    pub fn with_policy(
        initial: A,
        fork: impl Fn(&A) -> A + Send + Sync + 'static,
        join: impl Fn(&A, &A) -> A + Send + Sync + 'static,
    ) -> Self {
        Self {
            spec: Arc::new(ErasedFiberRef::new(
                shared(initial),
                Arc::new(move |v| shared(fork(&typed::<A>(v)))),
                Arc::new(move |l, r| shared(join(&typed::<A>(l), &typed::<A>(r)))),
            )),
            _marker: PhantomData,
        }
    }

    /// A ref whose join is the given commutative operation, so the merged
    /// value does not depend on the order children are joined in.
    #[must_use]
    pub fn combining(initial: A, op: Commutative<A>) -> Self {
        Self::with_policy(initial, |v: &A| v.clone(), move |l: &A, r: &A| {
            op.combine(l, r)
        })
    }

    /// Reads the acting fiber's current value.
    #[must_use]
    pub fn get<E>(&self) -> Effect<E, A>
    where
        E: Clone + Send + Sync + 'static,
    {
        self.modify(|v| (v.clone(), v.clone()))
    }

    /// Replaces the acting fiber's value.
    #[must_use]
    pub fn set<E>(&self, value: A) -> Effect<E, ()>
    where
        E: Clone + Send + Sync + 'static,
    {
        self.modify(move |_| ((), value))
    }

    /// Applies `f` to the acting fiber's value.
    pub fn update<E>(&self, f: impl FnOnce(&A) -> A + Send + 'static) -> Effect<E, ()>
    where
        E: Clone + Send + Sync + 'static,
    {
        self.modify(move |v| ((), f(v)))
    }

    /// Reads and replaces the acting fiber's value in one atomic step,
    /// producing a derived result.
    pub fn modify<E, B>(&self, f: impl FnOnce(&A) -> (B, A) + Send + 'static) -> Effect<E, B>
    where
        E: Clone + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
    {
        let spec = Arc::clone(&self.spec);
        Effect::from_prim(Prim::RefModify {
            spec,
            modify: Box::new(move |v| {
                let (out, next) = f(&typed::<A>(v));
                (shared(out), shared(next))
            }),
        })
    }

    /// Restores the acting fiber's value to the ref's initial value.
    #[must_use]
    pub fn reset<E>(&self) -> Effect<E, ()>
    where
        E: Clone + Send + Sync + 'static,
    {
        let spec = Arc::clone(&self.spec);
        Effect::from_prim(Prim::RefModify {
            spec: Arc::clone(&spec),
            modify: Box::new(move |_| (shared(()), spec.initial())),
        })
    }

    /// Runs `effect` with the ref set to `value`, restoring the previous
    /// value afterwards on every exit path, including failure and
    /// interruption.
    #[must_use]
    pub fn locally<E, B>(&self, value: A, effect: Effect<E, B>) -> Effect<E, B>
    where
        E: Clone + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
    {
        let this = self.clone();
        self.get::<E>().flat_map(move |saved| {
            let run_ref = this.clone();
            this.set::<E>(value).flat_map(move |()| {
                let on_success_ref = run_ref.clone();
                let on_failure_ref = run_ref;
                let saved_for_failure = saved.clone();
                effect.fold_cause(
                    move |b| on_success_ref.set(saved).map(move |()| b),
                    move |cause| {
                        on_failure_ref
                            .set(saved_for_failure)
                            .flat_map(move |()| Effect::fail_cause(cause))
                    },
                )
            })
        })
    }
}
