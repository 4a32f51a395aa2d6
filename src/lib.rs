//! Filament: a structured-concurrency effect runtime.
//!
//! # Overview
//!
//! Filament separates *describing* a computation from *running* it. An
//! [`Effect`] is an immutable, lazy description; a [`Runtime`] interprets it
//! on cooperatively scheduled fibers. Failures are values: a fiber that does
//! not succeed terminates with a [`Cause`] tree recording expected failures,
//! defects, and interruptions, sequentially and in parallel.
//!
//! # Core Guarantees
//!
//! - **Laziness**: building or combining effects runs no user code
//! - **Failure totality**: panics in user thunks become defects; causes are
//!   reported as values, never re-raised except by `run_or_panic`
//! - **Cooperative interruption**: interrupts take effect at checkpoints and
//!   unwind through failure continuations, so cleanup always runs
//! - **Structured state**: fiber-local refs flow parent to child at fork and
//!   merge back at join under per-ref policies
//! - **No orphan fibers**: when a run's root completes, every remaining
//!   fiber is interrupted and drained before the exit is returned
//!
//! # Module Structure
//!
//! - [`types`]: Identifier types (fiber ids, source locations)
//! - [`cause`]: The failure tree and its operations
//! - [`exit`]: Final fiber results
//! - [`algebra`]: Function-shaped equality, ordering, and combine operations
//! - [`env`]: The capability environment
//! - [`effect`]: Effect descriptions and combinators
//! - [`fiber`]: Fiber handles (join, await, poll, interrupt)
//! - [`fiber_ref`]: Fiber-local state with fork/join policies
//! - [`supervisor`]: Fiber lifecycle observation
//! - [`runtime`]: The executor
//!
//! # Example
//!
//! ```
//! use filament::{Effect, Runtime};
//!
//! let runtime = Runtime::new();
//! let program: Effect<String, i32> = Effect::succeed(20).map(|n| n * 2).flat_map(|n| {
//!     Effect::sync(move || n + 2)
//! });
//! assert_eq!(runtime.run(program).unwrap(), 42);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod algebra;
pub mod cause;
pub mod effect;
pub mod env;
pub mod exit;
pub mod fiber;
pub mod fiber_ref;
pub mod runtime;
pub mod supervisor;
pub mod types;

// Re-exports for convenient access to core types
pub use cause::{Cause, Defect};
pub use effect::{service, Effect, Resume, UEffect};
pub use env::{Env, MissingCapability};
pub use exit::{Exit, ExitError};
pub use fiber::Fiber;
pub use fiber_ref::FiberRef;
pub use runtime::{Runtime, RuntimeBuilder};
pub use supervisor::{NoSupervision, Supervisor, Tally, TallySnapshot};
pub use types::{FiberId, Location, RuntimeFiberId};
