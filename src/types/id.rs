//! Identifier types for runtime entities.
//!
//! Every fiber is tagged at fork time with a [`FiberId`]: a process-unique
//! sequence number drawn from a monotonic atomic counter, a coarse creation
//! timestamp, and the source location of the fork call. Ids are immutable and
//! never reused.
//!
//! A fiber born from several concurrent ancestors (for example, the
//! attributed interrupter of a race) is identified by a *composite* id: the
//! set of its ancestors' runtime ids. Composite ids participate in equality
//! and ordering by set semantics.

use core::fmt;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static FIBER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A source-location tag recorded when a fiber is forked.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    file: &'static str,
    line: u32,
}

impl Location {
    /// Captures the caller's source location.
    #[must_use]
    #[track_caller]
    pub fn caller() -> Self {
        let loc = std::panic::Location::caller();
        Self {
            file: loc.file(),
            line: loc.line(),
        }
    }

    /// Returns the source file.
    #[must_use]
    pub const fn file(&self) -> &'static str {
        self.file
    }

    /// Returns the line number within [`Location::file`].
    #[must_use]
    pub const fn line(&self) -> u32 {
        self.line
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// The identity of a single fiber created by one fork.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuntimeFiberId {
    sequence: u64,
    start_time_millis: u64,
    location: Location,
}

impl RuntimeFiberId {
    /// Allocates the next fiber id from the process-wide counter.
    ///
    /// The counter is monotonic for the lifetime of the process, so sequence
    /// numbers are unique and never reused.
    #[must_use]
    #[track_caller]
    pub fn next() -> Self {
        Self::next_at(Location::caller())
    }

    /// Allocates the next fiber id tagged with an explicit location, used
    /// when the fork site was captured earlier than the id is minted.
    #[must_use]
    pub fn next_at(location: Location) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);
        Self {
            sequence: FIBER_COUNTER.fetch_add(1, Ordering::Relaxed),
            start_time_millis: now,
            location,
        }
    }

    /// Creates an id with explicit fields, for tests.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(sequence: u64) -> Self {
        Self {
            sequence,
            start_time_millis: 0,
            location: Location {
                file: "test",
                line: 0,
            },
        }
    }

    /// Returns the monotonic sequence number.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the creation timestamp in milliseconds since the Unix epoch.
    #[must_use]
    pub const fn start_time_millis(&self) -> u64 {
        self.start_time_millis
    }

    /// Returns the source location of the fork that created this fiber.
    #[must_use]
    pub const fn location(&self) -> Location {
        self.location
    }
}

impl fmt::Debug for RuntimeFiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuntimeFiberId({} @ {})", self.sequence, self.location)
    }
}

impl fmt::Display for RuntimeFiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.sequence)
    }
}

/// A fiber identity: either a single runtime id or a set of them.
///
/// Composite ids arise when a failure is attributed to several concurrent
/// fibers at once. Two composite ids are equal when their constituent sets
/// are equal, regardless of how they were combined.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FiberId {
    /// The id of a single forked fiber.
    Runtime(RuntimeFiberId),
    /// A fiber born from several concurrent ancestors.
    Composite(BTreeSet<RuntimeFiberId>),
}

impl FiberId {
    /// Allocates a fresh runtime id at the caller's location.
    #[must_use]
    #[track_caller]
    pub fn next() -> Self {
        Self::Runtime(RuntimeFiberId::next())
    }

    /// Returns the set of constituent runtime ids.
    #[must_use]
    pub fn ids(&self) -> BTreeSet<RuntimeFiberId> {
        match self {
            Self::Runtime(id) => core::iter::once(*id).collect(),
            Self::Composite(ids) => ids.clone(),
        }
    }

    /// Combines two fiber ids into one identity covering both.
    ///
    /// Combining is associative and commutative; duplicate constituents
    /// collapse by set union.
    #[must_use]
    pub fn combine(&self, other: &Self) -> Self {
        let mut ids = self.ids();
        ids.extend(other.ids());
        if ids.len() == 1 {
            if let Some(&id) = ids.iter().next() {
                return Self::Runtime(id);
            }
        }
        Self::Composite(ids)
    }

    /// Creates a single-constituent id for tests.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(sequence: u64) -> Self {
        Self::Runtime(RuntimeFiberId::new_for_test(sequence))
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Runtime(id) => write!(f, "FiberId({id:?})"),
            Self::Composite(ids) => {
                write!(f, "FiberId(")?;
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        write!(f, " & ")?;
                    }
                    write!(f, "{id}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Runtime(id) => write!(f, "{id}"),
            Self::Composite(ids) => {
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        write!(f, "&")?;
                    }
                    write!(f, "{id}")?;
                }
                Ok(())
            }
        }
    }
}
