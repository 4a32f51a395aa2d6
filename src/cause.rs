//! Composable failure trees.
//!
//! A [`Cause`] describes zero or more reasons an effect did not produce a
//! value:
//!
//! - `Fail(E)`: an expected, typed failure
//! - `Die(Defect)`: an unexpected fault (an escaped panic or invariant violation)
//! - `Interrupt(FiberId)`: the fiber was told to stop, carrying who asked
//! - `Empty`: nothing to report; the identity for composition
//!
//! Causes compose sequentially with [`Cause::then`] ("left happened, then
//! right") and in parallel with [`Cause::both`] ("left and right happened
//! concurrently"). Both operators are associative with `Empty` as a two-sided
//! identity, and equality is defined up to those laws: trees are normalized
//! to a sequence of `Then`-separated parallel groups before comparison, so
//! `Then(Then(a, b), c) == Then(a, Then(b, c))`.

use crate::algebra::Equivalence;
use crate::types::FiberId;
use core::fmt;
use std::any::Any;

/// Payload of an unexpected fault.
///
/// Wraps the fault's message for safe transport across fiber boundaries.
/// Two defects are equal when their messages are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defect {
    message: String,
}

impl Defect {
    /// Creates a defect with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Creates a defect from a caught panic payload.
    ///
    /// Extracts the panic message when it is a `&str` or `String`; anything
    /// else is reported as an opaque panic.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload.downcast_ref::<&str>().map_or_else(
            || {
                payload
                    .downcast_ref::<String>()
                    .cloned()
                    .unwrap_or_else(|| "panic with non-string payload".to_string())
            },
            |s| (*s).to_string(),
        );
        Self { message }
    }

    /// Returns the defect message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "defect: {}", self.message)
    }
}

/// An immutable tree of reasons an effect did not produce a value.
#[derive(Debug, Clone)]
pub enum Cause<E> {
    /// Nothing to report. Identity for [`Cause::then`] and [`Cause::both`].
    Empty,
    /// An expected, typed failure.
    Fail(E),
    /// An unexpected fault.
    Die(Defect),
    /// The fiber was interrupted by the carried fiber.
    Interrupt(FiberId),
    /// Sequential composition: left happened, then right.
    Then(Box<Cause<E>>, Box<Cause<E>>),
    /// Parallel composition: left and right happened concurrently.
    Both(Box<Cause<E>>, Box<Cause<E>>),
}

impl<E> Cause<E> {
    /// The empty cause.
    #[must_use]
    pub const fn empty() -> Self {
        Self::Empty
    }

    /// An expected failure.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Fail(error)
    }

    /// An unexpected fault.
    #[must_use]
    pub const fn die(defect: Defect) -> Self {
        Self::Die(defect)
    }

    /// Interruption attributed to `interrupter`.
    #[must_use]
    pub const fn interrupt(interrupter: FiberId) -> Self {
        Self::Interrupt(interrupter)
    }

    /// Sequential composition, eliding `Empty` operands.
    #[must_use]
    pub fn then(self, other: Self) -> Self {
        match (self, other) {
            (Self::Empty, c) | (c, Self::Empty) => c,
            (l, r) => Self::Then(Box::new(l), Box::new(r)),
        }
    }

    /// Parallel composition, eliding `Empty` operands.
    #[must_use]
    pub fn both(self, other: Self) -> Self {
        match (self, other) {
            (Self::Empty, c) | (c, Self::Empty) => c,
            (l, r) => Self::Both(Box::new(l), Box::new(r)),
        }
    }

    /// Returns true if the tree contains no leaf at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.any_leaf(|leaf| !matches!(leaf, Self::Empty))
    }

    /// Returns true if the tree contains at least one `Fail` leaf.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.any_leaf(|leaf| matches!(leaf, Self::Fail(_)))
    }

    /// Returns true if the tree contains at least one `Die` leaf.
    #[must_use]
    pub fn is_die(&self) -> bool {
        self.any_leaf(|leaf| matches!(leaf, Self::Die(_)))
    }

    /// Returns true if the tree contains at least one `Interrupt` leaf.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.any_leaf(|leaf| matches!(leaf, Self::Interrupt(_)))
    }

    /// All expected failures, in left-to-right depth-first order.
    #[must_use]
    pub fn failures(&self) -> Vec<&E> {
        let mut out = Vec::new();
        self.each_leaf(|leaf| {
            if let Self::Fail(e) = leaf {
                out.push(e);
            }
        });
        out
    }

    /// All defects, in left-to-right depth-first order.
    #[must_use]
    pub fn defects(&self) -> Vec<&Defect> {
        let mut out = Vec::new();
        self.each_leaf(|leaf| {
            if let Self::Die(d) = leaf {
                out.push(d);
            }
        });
        out
    }

    /// All interrupters, in left-to-right depth-first order.
    #[must_use]
    pub fn interruptors(&self) -> Vec<&FiberId> {
        let mut out = Vec::new();
        self.each_leaf(|leaf| {
            if let Self::Interrupt(id) = leaf {
                out.push(id);
            }
        });
        out
    }

    /// Transforms the error payload without disturbing the tree shape.
    #[must_use]
    pub fn map<E2>(self, f: impl Fn(E) -> E2) -> Cause<E2> {
        self.map_ref(&f)
    }

    fn map_ref<E2, F: Fn(E) -> E2>(self, f: &F) -> Cause<E2> {
        match self {
            Self::Empty => Cause::Empty,
            Self::Fail(e) => Cause::Fail(f(e)),
            Self::Die(d) => Cause::Die(d),
            Self::Interrupt(id) => Cause::Interrupt(id),
            Self::Then(l, r) => Cause::Then(Box::new(l.map_ref(f)), Box::new(r.map_ref(f))),
            Self::Both(l, r) => Cause::Both(Box::new(l.map_ref(f)), Box::new(r.map_ref(f))),
        }
    }

    /// Folds the tree bottom-up through `folder`.
    pub fn fold<Z, F: CauseFolder<E, Z>>(&self, folder: &mut F) -> Z {
        match self {
            Self::Empty => folder.empty(),
            Self::Fail(e) => folder.fail(e),
            Self::Die(d) => folder.die(d),
            Self::Interrupt(id) => folder.interrupt(id),
            Self::Then(l, r) => {
                let left = l.fold(folder);
                let right = r.fold(folder);
                folder.then(left, right)
            }
            Self::Both(l, r) => {
                let left = l.fold(folder);
                let right = r.fold(folder);
                folder.both(left, right)
            }
        }
    }

    /// Structural equality up to associativity and `Empty` elision, with an
    /// explicit equivalence for the error payload.
    #[must_use]
    pub fn equals_with(&self, other: &Self, eq: &Equivalence<E>) -> bool {
        norm_eq(self, other, &|a, b| eq.equals(a, b))
    }

    /// Visits every leaf in left-to-right depth-first order.
    ///
    /// Traversal uses an explicit stack; deep sequential chains cannot
    /// overflow the call stack.
    fn each_leaf<'a>(&'a self, mut visit: impl FnMut(&'a Self)) {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Self::Then(l, r) | Self::Both(l, r) => {
                    stack.push(r);
                    stack.push(l);
                }
                leaf => visit(leaf),
            }
        }
    }

    fn any_leaf(&self, mut pred: impl FnMut(&Self) -> bool) -> bool {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Self::Then(l, r) | Self::Both(l, r) => {
                    stack.push(r);
                    stack.push(l);
                }
                leaf => {
                    if pred(leaf) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Flattens the `Then` spine into sequential steps, dropping `Empty`.
    fn sequential_parts(&self) -> Vec<&Self> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Self::Then(l, r) => {
                    stack.push(r);
                    stack.push(l);
                }
                Self::Empty => {}
                other => out.push(other),
            }
        }
        out
    }

    /// Flattens the `Both` spine into parallel parts, dropping `Empty`.
    fn parallel_parts(&self) -> Vec<&Self> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Self::Both(l, r) => {
                    stack.push(r);
                    stack.push(l);
                }
                Self::Empty => {}
                other => out.push(other),
            }
        }
        out
    }
}

/// Bottom-up catamorphism over a [`Cause`] tree.
pub trait CauseFolder<E, Z> {
    /// Folds an `Empty` leaf.
    fn empty(&mut self) -> Z;
    /// Folds a `Fail` leaf.
    fn fail(&mut self, error: &E) -> Z;
    /// Folds a `Die` leaf.
    fn die(&mut self, defect: &Defect) -> Z;
    /// Folds an `Interrupt` leaf.
    fn interrupt(&mut self, interrupter: &FiberId) -> Z;
    /// Combines the results of a sequential node.
    fn then(&mut self, left: Z, right: Z) -> Z;
    /// Combines the results of a parallel node.
    fn both(&mut self, left: Z, right: Z) -> Z;
}

fn leaf_eq<E>(a: &Cause<E>, b: &Cause<E>, eq: &impl Fn(&E, &E) -> bool) -> bool {
    match (a, b) {
        (Cause::Fail(x), Cause::Fail(y)) => eq(x, y),
        (Cause::Die(x), Cause::Die(y)) => x == y,
        (Cause::Interrupt(x), Cause::Interrupt(y)) => x == y,
        _ => false,
    }
}

/// Canonical form for comparison: `Empty` elided, `Then` and `Both` spines
/// flattened, single-element groups collapsed. A `Seq` never directly
/// contains a `Seq`, a `Par` never directly contains a `Par`.
enum Norm<'a, E> {
    Empty,
    Leaf(&'a Cause<E>),
    Seq(Vec<Norm<'a, E>>),
    Par(Vec<Norm<'a, E>>),
}

fn collapse<'a, E>(
    mut parts: Vec<Norm<'a, E>>,
    wrap: fn(Vec<Norm<'a, E>>) -> Norm<'a, E>,
) -> Norm<'a, E> {
    match parts.len() {
        0 => Norm::Empty,
        1 => parts.pop().map_or(Norm::Empty, |part| part),
        _ => wrap(parts),
    }
}

fn normalize<E>(cause: &Cause<E>) -> Norm<'_, E> {
    match cause {
        Cause::Empty => Norm::Empty,
        Cause::Then(l, r) => {
            let mut parts = Vec::new();
            for side in [l.as_ref(), r.as_ref()] {
                match normalize(side) {
                    Norm::Empty => {}
                    Norm::Seq(inner) => parts.extend(inner),
                    other => parts.push(other),
                }
            }
            collapse(parts, Norm::Seq)
        }
        Cause::Both(l, r) => {
            let mut parts = Vec::new();
            for side in [l.as_ref(), r.as_ref()] {
                match normalize(side) {
                    Norm::Empty => {}
                    Norm::Par(inner) => parts.extend(inner),
                    other => parts.push(other),
                }
            }
            collapse(parts, Norm::Par)
        }
        leaf => Norm::Leaf(leaf),
    }
}

fn norm_eq_inner<E>(a: &Norm<'_, E>, b: &Norm<'_, E>, eq: &impl Fn(&E, &E) -> bool) -> bool {
    match (a, b) {
        (Norm::Empty, Norm::Empty) => true,
        (Norm::Leaf(x), Norm::Leaf(y)) => leaf_eq(x, y, eq),
        (Norm::Seq(xs), Norm::Seq(ys)) | (Norm::Par(xs), Norm::Par(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| norm_eq_inner(x, y, eq))
        }
        _ => false,
    }
}

fn norm_eq<E>(a: &Cause<E>, b: &Cause<E>, eq: &impl Fn(&E, &E) -> bool) -> bool {
    norm_eq_inner(&normalize(a), &normalize(b), eq)
}

impl<E: PartialEq> PartialEq for Cause<E> {
    fn eq(&self, other: &Self) -> bool {
        norm_eq(self, other, &E::eq)
    }
}

impl<E: Eq> Eq for Cause<E> {}

impl<E: fmt::Display> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "<empty>");
        }
        let steps = self.sequential_parts();
        for (i, step) in steps.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            let parts = step.parallel_parts();
            let grouped = parts.len() > 1;
            if grouped {
                write!(f, "(")?;
            }
            for (j, part) in parts.iter().enumerate() {
                if j > 0 {
                    write!(f, " & ")?;
                }
                match part {
                    Self::Fail(e) => write!(f, "fail: {e}")?,
                    Self::Die(d) => write!(f, "{d}")?,
                    Self::Interrupt(id) => write!(f, "interrupted by {id}")?,
                    nested => write!(f, "{nested}")?,
                }
            }
            if grouped {
                write!(f, ")")?;
            }
        }
        Ok(())
    }
}
