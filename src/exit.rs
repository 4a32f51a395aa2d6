//! The final result of a fiber.
//!
//! An [`Exit`] is either a success carrying a value or a failure carrying a
//! full [`Cause`] tree. Unlike a plain `Result`, the failure side keeps the
//! structural information about what went wrong: expected failures, defects,
//! and interruptions, sequentially and in parallel.

use crate::cause::Cause;
use core::fmt;

/// The outcome of a completed fiber: a value or a cause.
#[derive(Debug, Clone, PartialEq)]
pub enum Exit<E, A> {
    /// The fiber produced a value.
    Success(A),
    /// The fiber terminated without a value, for the carried reasons.
    Failure(Cause<E>),
}

impl<E, A> Exit<E, A> {
    /// A successful exit.
    #[must_use]
    pub const fn succeed(value: A) -> Self {
        Self::Success(value)
    }

    /// A failed exit with the given cause.
    #[must_use]
    pub const fn fail_cause(cause: Cause<E>) -> Self {
        Self::Failure(cause)
    }

    /// Returns true if this exit is a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true if this exit is a failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns true if the exit's cause contains an interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Success(_) => false,
            Self::Failure(cause) => cause.is_interrupted(),
        }
    }

    /// Returns the cause, if this exit is a failure.
    #[must_use]
    pub const fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Self::Success(_) => None,
            Self::Failure(cause) => Some(cause),
        }
    }

    /// Maps the success value.
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Exit<E, B> {
        match self {
            Self::Success(a) => Exit::Success(f(a)),
            Self::Failure(cause) => Exit::Failure(cause),
        }
    }

    /// Maps every expected failure in the cause.
    pub fn map_error<E2>(self, f: impl Fn(E) -> E2) -> Exit<E2, A> {
        match self {
            Self::Success(a) => Exit::Success(a),
            Self::Failure(cause) => Exit::Failure(cause.map(f)),
        }
    }

    /// Converts to a `Result`, wrapping the cause in a std error.
    pub fn into_result(self) -> Result<A, ExitError<E>> {
        match self {
            Self::Success(a) => Ok(a),
            Self::Failure(cause) => Err(ExitError { cause }),
        }
    }

    /// Returns the success value or panics with the rendered cause.
    ///
    /// # Panics
    ///
    /// Panics if the exit is a failure.
    #[track_caller]
    pub fn unwrap(self) -> A
    where
        E: fmt::Debug,
    {
        match self {
            Self::Success(a) => a,
            Self::Failure(cause) => {
                panic!("called `Exit::unwrap()` on a `Failure` value: {cause:?}")
            }
        }
    }

    /// Returns the success value or a default.
    pub fn unwrap_or(self, default: A) -> A {
        match self {
            Self::Success(a) => a,
            Self::Failure(_) => default,
        }
    }
}

impl<E, A> From<Result<A, E>> for Exit<E, A> {
    fn from(result: Result<A, E>) -> Self {
        match result {
            Ok(a) => Self::Success(a),
            Err(e) => Self::Failure(Cause::fail(e)),
        }
    }
}

/// A failed exit's cause, packaged as a std error.
#[derive(Debug, Clone)]
pub struct ExitError<E> {
    cause: Cause<E>,
}

impl<E> ExitError<E> {
    /// Returns the underlying cause.
    #[must_use]
    pub const fn cause(&self) -> &Cause<E> {
        &self.cause
    }

    /// Unwraps the underlying cause.
    #[must_use]
    pub fn into_cause(self) -> Cause<E> {
        self.cause
    }
}

impl<E: fmt::Display> fmt::Display for ExitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for ExitError<E> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::Defect;
    use crate::types::FiberId;

    #[test]
    fn predicates() {
        let ok: Exit<String, i32> = Exit::succeed(42);
        let failed: Exit<String, i32> = Exit::fail_cause(Cause::fail("boom".into()));
        let interrupted: Exit<String, i32> =
            Exit::fail_cause(Cause::interrupt(FiberId::new_for_test(1)));

        assert!(ok.is_success() && !ok.is_failure() && !ok.is_interrupted());
        assert!(failed.is_failure() && !failed.is_interrupted());
        assert!(interrupted.is_interrupted());
    }

    #[test]
    fn map_transforms_success_only() {
        let ok: Exit<String, i32> = Exit::succeed(21);
        assert_eq!(ok.map(|n| n * 2), Exit::succeed(42));

        let failed: Exit<String, i32> = Exit::fail_cause(Cause::fail("e".into()));
        assert!(failed.map(|n| n * 2).is_failure());
    }

    #[test]
    fn map_error_rewrites_cause_payload() {
        let failed: Exit<String, i32> = Exit::fail_cause(Cause::fail("abc".into()));
        let mapped = failed.map_error(|s| s.len());
        assert_eq!(mapped.cause(), Some(&Cause::fail(3)));
    }

    #[test]
    fn into_result_preserves_cause() {
        let failed: Exit<String, i32> =
            Exit::fail_cause(Cause::fail("x".into()).then(Cause::die(Defect::new("d"))));
        let err = failed.into_result().unwrap_err();
        assert!(err.cause().is_failure());
        assert!(err.cause().is_die());
    }

    #[test]
    #[should_panic(expected = "called `Exit::unwrap()` on a `Failure` value")]
    fn unwrap_panics_on_failure() {
        let failed: Exit<String, i32> = Exit::fail_cause(Cause::fail("boom".into()));
        let _ = failed.unwrap();
    }

    #[test]
    fn from_result() {
        let exit: Exit<String, i32> = Ok::<_, String>(7).into();
        assert_eq!(exit, Exit::succeed(7));
        let exit: Exit<String, i32> = Err::<i32, _>("e".to_string()).into();
        assert_eq!(exit.cause(), Some(&Cause::fail("e".to_string())));
    }
}
