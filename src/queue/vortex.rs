//! The time vortex: the per-rank ordered event queue used during the run
//! phase.
//!
//! A binary heap keyed by the full `(delivery_time, priority_order,
//! queue_order)` order. Inserts are `O(log n)`, `front` is `O(1)`, and pops
//! come out in the strict total order that deterministic replay depends on.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

use crate::activity::{compare, Activity, Schedule};
use crate::error::{CoreError, CoreResult};
use crate::queue::ActivityQueue;
use crate::sim::SimClock;
use crate::types::SimTime;

#[derive(Debug)]
struct VortexEntry {
    // Ordering key cached at insert so heap sifts never touch the trait
    // object.
    key: Schedule,
    activity: Box<dyn Activity>,
}

impl PartialEq for VortexEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VortexEntry {}

impl PartialOrd for VortexEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VortexEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // std's heap is a max-heap: ordering entries by the greater-than
        // comparator makes the schedule minimum the heap maximum.
        compare::<true, true, true>(&other.key, &self.key)
    }
}

/// Ordered heap of pending activities for one rank.
#[derive(Debug)]
pub struct TimeVortex {
    heap: BinaryHeap<VortexEntry>,
    clock: SimClock,
    insertions: u64,
    max_depth: usize,
}

impl TimeVortex {
    /// Creates a vortex gated on the given clock.
    pub fn new(clock: SimClock) -> Self {
        Self {
            heap: BinaryHeap::new(),
            clock,
            insertions: 0,
            max_depth: 0,
        }
    }

    /// Creates a vortex wrapped in a shareable queue handle.
    pub fn shared(clock: SimClock) -> Rc<RefCell<TimeVortex>> {
        Rc::new(RefCell::new(Self::new(clock)))
    }

    /// Delivery time of the next activity, if any.
    pub fn next_delivery_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|entry| entry.key.delivery_time())
    }

    /// Largest number of activities held at any point.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Total number of inserts over the queue's lifetime.
    pub fn insertions(&self) -> u64 {
        self.insertions
    }
}

impl ActivityQueue for TimeVortex {
    fn insert(&mut self, mut activity: Box<dyn Activity>) -> CoreResult<()> {
        let delivery_time = activity.schedule().delivery_time();
        let now = self.clock.now();
        if delivery_time < now {
            return Err(CoreError::SchedulingViolation { delivery_time, now });
        }

        self.insertions += 1;
        activity.schedule_mut().set_queue_order(self.insertions);
        let key = *activity.schedule();
        self.heap.push(VortexEntry { key, activity });
        self.max_depth = self.max_depth.max(self.heap.len());
        Ok(())
    }

    fn front(&self) -> Option<&dyn Activity> {
        self.heap.peek().map(|entry| entry.activity.as_ref())
    }

    fn pop(&mut self) -> Option<Box<dyn Activity>> {
        self.heap.pop().map(|entry| entry.activity)
    }

    fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}
