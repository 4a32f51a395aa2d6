//! Process-wide storage for fiber-local ref values.
//!
//! The store is the only state shared across fibers in the core. It maps a
//! fiber's identity to that fiber's current value for every ref it carries.
//! Entries are seeded when a fiber is forked (the ref's fork transform
//! applied to the parent's value), mutated only by the owning fiber, merged
//! into the parent at join, and removed when the fiber is reaped.

use crate::effect::prim::AnyShared;
use crate::types::FiberId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static REF_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The type-erased identity and merge policy of one ref.
///
/// The typed [`FiberRef`](super::FiberRef) facade closes over the value type;
/// the store only ever sees erased values and these erased transforms.
pub(crate) struct ErasedFiberRef {
    id: u64,
    initial: AnyShared,
    fork: Arc<dyn Fn(&AnyShared) -> AnyShared + Send + Sync>,
    join: Arc<dyn Fn(&AnyShared, &AnyShared) -> AnyShared + Send + Sync>,
}

impl ErasedFiberRef {
    pub(crate) fn new(
        initial: AnyShared,
        fork: Arc<dyn Fn(&AnyShared) -> AnyShared + Send + Sync>,
        join: Arc<dyn Fn(&AnyShared, &AnyShared) -> AnyShared + Send + Sync>,
    ) -> Self {
        Self {
            id: REF_COUNTER.fetch_add(1, Ordering::Relaxed),
            initial,
            fork,
            join,
        }
    }

    pub(crate) fn initial(&self) -> AnyShared {
        Arc::clone(&self.initial)
    }
}

struct Slot {
    spec: Arc<ErasedFiberRef>,
    value: AnyShared,
}

/// The shared ref store, keyed by fiber identity.
#[derive(Default)]
pub(crate) struct RefStore {
    entries: Mutex<HashMap<FiberId, HashMap<u64, Slot>>>,
}

impl RefStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reads and replaces the acting fiber's value for `spec` in one step.
    ///
    /// The closure receives the current value (seeding from the ref's
    /// initial value if the fiber has no entry yet) and returns the
    /// operation's result paired with the value to store.
    pub(crate) fn modify(
        &self,
        fiber: &FiberId,
        spec: &Arc<ErasedFiberRef>,
        f: impl FnOnce(&AnyShared) -> (AnyShared, AnyShared),
    ) -> AnyShared {
        let mut entries = self.entries.lock();
        let slot = entries
            .entry(fiber.clone())
            .or_default()
            .entry(spec.id)
            .or_insert_with(|| Slot {
                spec: Arc::clone(spec),
                value: spec.initial(),
            });
        let (out, next) = f(&slot.value);
        slot.value = next;
        out
    }

    /// Seeds a child fiber's entries from its parent's current values,
    /// applying each ref's fork transform.
    pub(crate) fn fork_into(&self, parent: &FiberId, child: FiberId) {
        let mut entries = self.entries.lock();
        let seeded: HashMap<u64, Slot> = entries.get(parent).map_or_else(HashMap::new, |map| {
            map.iter()
                .map(|(id, slot)| {
                    (
                        *id,
                        Slot {
                            spec: Arc::clone(&slot.spec),
                            value: (slot.spec.fork)(&slot.value),
                        },
                    )
                })
                .collect()
        });
        if !seeded.is_empty() {
            entries.insert(child, seeded);
        }
    }

    /// Folds a terminated child's values back into the parent and removes
    /// the child's entries.
    ///
    /// For each ref the child carried, the parent's pre-join value (or the
    /// ref's initial value if the parent has none) is the left operand and
    /// the child's terminal value is the right operand of the ref's join
    /// transform. When `merge` is false (the child did not succeed) the
    /// child's entries are only reaped.
    pub(crate) fn join_child(&self, parent: &FiberId, child: &FiberId, merge: bool) {
        let mut entries = self.entries.lock();
        let Some(child_map) = entries.remove(child) else {
            return;
        };
        if !merge {
            return;
        }
        for (id, slot) in child_map {
            let parent_map = entries.entry(parent.clone()).or_default();
            let current = parent_map
                .get(&id)
                .map_or_else(|| slot.spec.initial(), |s| Arc::clone(&s.value));
            let merged = (slot.spec.join)(&current, &slot.value);
            parent_map.insert(
                id,
                Slot {
                    spec: slot.spec,
                    value: merged,
                },
            );
        }
    }

    /// Removes every entry owned by `fiber`.
    pub(crate) fn reap(&self, fiber: &FiberId) {
        self.entries.lock().remove(fiber);
    }

    /// Removes all entries; called when a top-level run finishes.
    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_ref(initial: i64) -> Arc<ErasedFiberRef> {
        Arc::new(ErasedFiberRef::new(
            Arc::new(initial),
            Arc::new(|v| Arc::clone(v)),
            Arc::new(|_, right| Arc::clone(right)),
        ))
    }

    fn adding_ref(initial: i64) -> Arc<ErasedFiberRef> {
        Arc::new(ErasedFiberRef::new(
            Arc::new(initial),
            Arc::new(|v| Arc::clone(v)),
            Arc::new(|l, r| {
                let l = *l.clone().downcast::<i64>().unwrap();
                let r = *r.clone().downcast::<i64>().unwrap();
                Arc::new(l + r)
            }),
        ))
    }

    fn read(store: &RefStore, fiber: &FiberId, spec: &Arc<ErasedFiberRef>) -> i64 {
        let out = store.modify(fiber, spec, |v| (Arc::clone(v), Arc::clone(v)));
        *out.downcast::<i64>().unwrap()
    }

    fn write(store: &RefStore, fiber: &FiberId, spec: &Arc<ErasedFiberRef>, value: i64) {
        store.modify(fiber, spec, |_| (Arc::new(()), Arc::new(value)));
    }

    #[test]
    fn unset_ref_reads_initial() {
        let store = RefStore::new();
        let spec = int_ref(42);
        let fiber = FiberId::new_for_test(1);
        assert_eq!(read(&store, &fiber, &spec), 42);
    }

    #[test]
    fn fork_seeds_child_from_parent() {
        let store = RefStore::new();
        let spec = int_ref(0);
        let parent = FiberId::new_for_test(1);
        let child = FiberId::new_for_test(2);
        write(&store, &parent, &spec, 7);
        store.fork_into(&parent, child.clone());
        assert_eq!(read(&store, &child, &spec), 7);
    }

    #[test]
    fn join_prefers_child_under_default_policy() {
        let store = RefStore::new();
        let spec = int_ref(0);
        let parent = FiberId::new_for_test(1);
        let child = FiberId::new_for_test(2);
        write(&store, &parent, &spec, 1);
        store.fork_into(&parent, child.clone());
        write(&store, &child, &spec, 9);
        store.join_child(&parent, &child, true);
        assert_eq!(read(&store, &parent, &spec), 9);
    }

    #[test]
    fn join_without_merge_only_reaps() {
        let store = RefStore::new();
        let spec = int_ref(0);
        let parent = FiberId::new_for_test(1);
        let child = FiberId::new_for_test(2);
        write(&store, &parent, &spec, 1);
        store.fork_into(&parent, child.clone());
        write(&store, &child, &spec, 9);
        store.join_child(&parent, &child, false);
        assert_eq!(read(&store, &parent, &spec), 1);
    }

    #[test]
    fn additive_join_accumulates_in_either_order() {
        let store = RefStore::new();
        let spec = adding_ref(0);
        let parent = FiberId::new_for_test(1);
        let a = FiberId::new_for_test(2);
        let b = FiberId::new_for_test(3);
        store.fork_into(&parent, a.clone());
        store.fork_into(&parent, b.clone());
        write(&store, &a, &spec, 3);
        write(&store, &b, &spec, 5);
        store.join_child(&parent, &b, true);
        store.join_child(&parent, &a, true);
        assert_eq!(read(&store, &parent, &spec), 8);
    }

    #[test]
    fn reap_discards_entries() {
        let store = RefStore::new();
        let spec = int_ref(0);
        let fiber = FiberId::new_for_test(1);
        write(&store, &fiber, &spec, 5);
        store.reap(&fiber);
        assert_eq!(read(&store, &fiber, &spec), 0);
    }
}
