//! Function-shaped algebraic building blocks.
//!
//! The runtime does not depend on a typeclass hierarchy; where it needs an
//! equality, an ordering, or a combine operation it takes one of these plain
//! values. [`Commutative`] is the shape [`FiberRef::combining`] consumes for
//! order-independent joins, and [`Equivalence`] is what
//! [`Cause::equals_with`] uses for payload comparison.
//!
//! [`FiberRef::combining`]: crate::fiber_ref::FiberRef::combining
//! [`Cause::equals_with`]: crate::cause::Cause::equals_with

use core::cmp::Ordering;
use std::sync::Arc;

/// An equality test for values of type `A`.
#[derive(Clone)]
pub struct Equivalence<A: ?Sized> {
    equals: Arc<dyn Fn(&A, &A) -> bool + Send + Sync>,
}

impl<A: ?Sized> Equivalence<A> {
    /// Creates an equivalence from an equality function.
    pub fn new(equals: impl Fn(&A, &A) -> bool + Send + Sync + 'static) -> Self {
        Self {
            equals: Arc::new(equals),
        }
    }

    /// Tests two values for equality.
    #[must_use]
    pub fn equals(&self, x: &A, y: &A) -> bool {
        (self.equals)(x, y)
    }
}

impl<A: PartialEq + ?Sized> Default for Equivalence<A>
where
    A: 'static,
{
    fn default() -> Self {
        Self::new(A::eq)
    }
}

/// A total ordering for values of type `A`.
#[derive(Clone)]
pub struct Compare<A: ?Sized> {
    compare: Arc<dyn Fn(&A, &A) -> Ordering + Send + Sync>,
}

impl<A: ?Sized + 'static> Compare<A> {
    /// Creates an ordering from a compare function.
    pub fn new(compare: impl Fn(&A, &A) -> Ordering + Send + Sync + 'static) -> Self {
        Self {
            compare: Arc::new(compare),
        }
    }

    /// Compares two values.
    #[must_use]
    pub fn compare(&self, x: &A, y: &A) -> Ordering {
        (self.compare)(x, y)
    }

    /// The dual ordering.
    #[must_use]
    pub fn inverted(&self) -> Self {
        let inner = Arc::clone(&self.compare);
        Self::new(move |x, y| inner(y, x))
    }

    /// The equivalence induced by this ordering.
    #[must_use]
    pub fn to_equivalence(&self) -> Equivalence<A> {
        let inner = Arc::clone(&self.compare);
        Equivalence::new(move |x, y| inner(x, y) == Ordering::Equal)
    }
}

impl<A: Clone + 'static> Compare<A> {
    /// The maximum of two values; on a tie the first argument is chosen.
    #[must_use]
    pub fn max(&self, x: &A, y: &A) -> A {
        if self.compare(x, y) == Ordering::Less {
            y.clone()
        } else {
            x.clone()
        }
    }

    /// The minimum of two values; on a tie the first argument is chosen.
    #[must_use]
    pub fn min(&self, x: &A, y: &A) -> A {
        if self.compare(x, y) == Ordering::Greater {
            y.clone()
        } else {
            x.clone()
        }
    }
}

impl<A: Ord + 'static> Default for Compare<A> {
    fn default() -> Self {
        Self::new(A::cmp)
    }
}

/// An associative binary operation on `A`.
#[derive(Clone)]
pub struct Associative<A> {
    combine: Arc<dyn Fn(&A, &A) -> A + Send + Sync>,
}

impl<A> Associative<A> {
    /// Creates an associative operation.
    ///
    /// Associativity is the caller's obligation; the runtime cannot check it.
    pub fn new(combine: impl Fn(&A, &A) -> A + Send + Sync + 'static) -> Self {
        Self {
            combine: Arc::new(combine),
        }
    }

    /// Combines two values.
    #[must_use]
    pub fn combine(&self, x: &A, y: &A) -> A {
        (self.combine)(x, y)
    }
}

/// A commutative (and associative) binary operation on `A`.
///
/// This is the shape a [`FiberRef`](crate::fiber_ref::FiberRef) join should
/// take when merged child contributions must not depend on join order, for
/// example integer addition for counters.
#[derive(Clone)]
pub struct Commutative<A> {
    inner: Associative<A>,
}

impl<A> Commutative<A> {
    /// Creates a commutative operation.
    ///
    /// Commutativity is the caller's obligation; the runtime cannot check it.
    pub fn new(combine: impl Fn(&A, &A) -> A + Send + Sync + 'static) -> Self {
        Self {
            inner: Associative::new(combine),
        }
    }

    /// Combines two values.
    #[must_use]
    pub fn combine(&self, x: &A, y: &A) -> A {
        self.inner.combine(x, y)
    }

    /// Combines two values with the arguments swapped.
    #[must_use]
    pub fn commute(&self, x: &A, y: &A) -> A {
        self.inner.combine(y, x)
    }

    /// Views this operation as merely associative.
    #[must_use]
    pub fn as_associative(&self) -> &Associative<A> {
        &self.inner
    }
}
