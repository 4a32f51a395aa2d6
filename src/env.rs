//! Capability environment.
//!
//! Effects read collaborating services out of an ambient [`Env`]: a mapping
//! from a unique capability tag to an implementation. The tag is the
//! capability's [`TypeId`], a unique token rather than a name string, so two
//! capabilities can never collide. There is no ambient authority: the
//! environment is supplied explicitly when the runtime is built and threaded
//! to every fiber it runs.
//!
//! Looking up a capability the environment does not hold is a programming
//! contract violation, not a recoverable failure: the interpreter converts it
//! into a [`MissingCapability`] defect.

use core::fmt;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// An immutable registry of capability implementations keyed by type.
#[derive(Clone, Default)]
pub struct Env {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Env {
    /// An empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an environment extended with an implementation of `T`.
    ///
    /// A previous entry for the same capability is replaced.
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.entries.insert(TypeId::of::<T>(), Arc::new(value));
        self
    }

    /// Looks up the implementation of `T`, if present.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|any| any.downcast::<T>().ok())
    }

    /// Returns the number of registered capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no capabilities are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("capabilities", &self.entries.len())
            .finish()
    }
}

/// Contract violation raised as a defect when a capability lookup fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing capability: {type_name}")]
pub struct MissingCapability {
    /// The name of the requested capability type, for diagnostics.
    pub type_name: &'static str,
}

impl MissingCapability {
    /// Records a failed lookup of capability `T`.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
        }
    }
}
