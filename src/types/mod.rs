//! Core identifier types.

pub mod id;

pub use id::{FiberId, Location, RuntimeFiberId};
