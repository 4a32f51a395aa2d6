//! Two-lane run queue.
//!
//! The executor pulls fibers from two FIFO lanes:
//! 1. Interrupt lane (highest priority) - fibers with a pending interrupt
//! 2. Ready lane - all other runnable fibers
//!
//! A fiber appears in the queue at most once; scheduling an already queued
//! fiber is a no-op, and a pending interrupt promotes the fiber from the
//! ready lane without losing its queue membership.

use crate::types::FiberId;
use std::collections::{HashSet, VecDeque};

/// The two-lane run queue.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    /// Interrupt lane: fibers with a pending interrupt (highest priority).
    interrupt_lane: VecDeque<FiberId>,
    /// Ready lane: general runnable fibers.
    ready_lane: VecDeque<FiberId>,
    /// Set of fibers currently in the queue (for dedup).
    scheduled: HashSet<FiberId>,
}

impl Scheduler {
    /// Creates a new empty queue.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of queued fibers.
    pub(crate) fn len(&self) -> usize {
        self.scheduled.len()
    }

    /// Returns true if no fibers are queued.
    pub(crate) fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }

    /// Queues a fiber in the ready lane.
    ///
    /// Does nothing if the fiber is already queued.
    pub(crate) fn schedule(&mut self, fiber: FiberId) {
        if self.scheduled.insert(fiber.clone()) {
            self.ready_lane.push_back(fiber);
        }
    }

    /// Queues a fiber in the interrupt lane.
    ///
    /// Does nothing if the fiber is already queued there; a ready-lane entry
    /// is promoted.
    pub(crate) fn schedule_interrupt(&mut self, fiber: FiberId) {
        if self.scheduled.insert(fiber.clone()) {
            self.interrupt_lane.push_back(fiber);
        } else {
            self.promote(&fiber);
        }
    }

    /// Moves an already queued fiber from the ready lane to the interrupt
    /// lane. Does nothing if the fiber is not queued or already promoted.
    pub(crate) fn promote(&mut self, fiber: &FiberId) {
        if !self.scheduled.contains(fiber) {
            return;
        }
        if let Some(pos) = self.ready_lane.iter().position(|f| f == fiber) {
            let entry = self
                .ready_lane
                .remove(pos)
                .unwrap_or_else(|| fiber.clone());
            self.interrupt_lane.push_back(entry);
        }
    }

    /// Pops the next fiber to run.
    ///
    /// Order: interrupt lane > ready lane; FIFO within each lane.
    pub(crate) fn pop(&mut self) -> Option<FiberId> {
        let next = self
            .interrupt_lane
            .pop_front()
            .or_else(|| self.ready_lane.pop_front())?;
        self.scheduled.remove(&next);
        Some(next)
    }

    /// Removes a fiber from whichever lane holds it.
    pub(crate) fn remove(&mut self, fiber: &FiberId) {
        if !self.scheduled.remove(fiber) {
            return;
        }
        if let Some(pos) = self.interrupt_lane.iter().position(|f| f == fiber) {
            self.interrupt_lane.remove(pos);
        } else if let Some(pos) = self.ready_lane.iter().position(|f| f == fiber) {
            self.ready_lane.remove(pos);
        }
    }

    /// Drops everything.
    pub(crate) fn clear(&mut self) {
        self.interrupt_lane.clear();
        self.ready_lane.clear();
        self.scheduled.clear();
    }
}
