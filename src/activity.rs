//! Activities: timestamped, priority-ordered units of scheduled work.
//!
//! An activity is anything the scheduler can hold and fire: events sent
//! across links, clock edges, internal actions. Every activity carries a
//! [`Schedule`] record whose three fields form a strict total order, and the
//! whole substrate's determinism rests on that order:
//!
//! 1. `delivery_time`: the absolute simulated time at which it fires.
//! 2. `priority_order`: a packed word, priority class in the high 32 bits
//!    and order tag in the low 32 bits.
//! 3. `queue_order`: per-queue insertion counter, the final tiebreaker.

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::types::SimTime;

// Priority classes. Lower values fire first at equal delivery time.
pub const THREAD_SYNC_PRIORITY: u64 = 20;
pub const SYNC_PRIORITY: u64 = 25;
pub const STOP_ACTION_PRIORITY: u64 = 30;
pub const CLOCK_PRIORITY: u64 = 40;
pub const EVENT_PRIORITY: u64 = 50;
pub const MEM_EVENT_PRIORITY: u64 = 50;
pub const BARRIER_PRIORITY: u64 = 75;
pub const ONE_SHOT_PRIORITY: u64 = 80;
pub const STATISTIC_CLOCK_PRIORITY: u64 = 85;
pub const FINAL_EVENT_PRIORITY: u64 = 98;
pub const EXIT_PRIORITY: u64 = 99;

/// The ordering record carried by every activity.
///
/// The triple `(delivery_time, priority_order, queue_order)` forms a strict
/// total order within a queue: ties in the first two fields are broken by
/// `queue_order`, and ties in all three cannot occur because each queue
/// assigns `queue_order` from its own monotone counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    delivery_time: SimTime,
    // Priority class in the high bits, order tag in the low bits, so the
    // second comparison level is a single 64-bit compare.
    priority_order: u64,
    queue_order: u64,
}

impl Schedule {
    /// Creates a schedule with no priority class set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a schedule with the given priority class.
    pub fn with_priority(priority: u64) -> Self {
        let mut schedule = Self::default();
        schedule.set_priority(priority);
        schedule
    }

    /// Returns the absolute simulated time at which the activity fires.
    pub fn delivery_time(&self) -> SimTime {
        self.delivery_time
    }

    /// Sets the delivery time. Called exactly once per scheduling, before
    /// the activity is inserted into a queue.
    pub fn set_delivery_time(&mut self, time: SimTime) {
        self.delivery_time = time;
    }

    /// Returns the priority class (high 32 bits of the packed word).
    pub fn priority(&self) -> u64 {
        self.priority_order >> 32
    }

    /// Sets the priority class, preserving the order tag.
    pub fn set_priority(&mut self, priority: u64) {
        self.priority_order = (self.priority_order & 0x0000_0000_FFFF_FFFF) | (priority << 32);
    }

    /// Returns the order tag (low 32 bits of the packed word).
    pub fn order_tag(&self) -> u32 {
        (self.priority_order & 0xFFFF_FFFF) as u32
    }

    /// Sets the order tag, preserving the priority class.
    pub fn set_order_tag(&mut self, tag: u32) {
        self.priority_order = (self.priority_order & 0xFFFF_FFFF_0000_0000) | u64::from(tag);
    }

    /// Returns the packed priority/order-tag word.
    pub fn priority_order(&self) -> u64 {
        self.priority_order
    }

    /// Returns the per-queue insertion counter.
    pub fn queue_order(&self) -> u64 {
        self.queue_order
    }

    pub(crate) fn set_queue_order(&mut self, order: u64) {
        self.queue_order = order;
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "time: {}, priority: {}, order tag: {}, queue order: {}",
            self.delivery_time,
            self.priority(),
            self.order_tag(),
            self.queue_order
        )
    }
}

/// Compares two schedules on the fields selected by the const parameters:
/// `T` includes delivery time, `P` the packed priority word, `Q` the queue
/// order. The canonical dequeue comparator is `compare::<true, true, true>`;
/// a queue that intrinsically preserves insertion order may use
/// `compare::<true, true, false>`.
pub fn compare<const T: bool, const P: bool, const Q: bool>(
    lhs: &Schedule,
    rhs: &Schedule,
) -> Ordering {
    if T && lhs.delivery_time != rhs.delivery_time {
        return lhs.delivery_time.cmp(&rhs.delivery_time);
    }
    if P && lhs.priority_order != rhs.priority_order {
        return lhs.priority_order.cmp(&rhs.priority_order);
    }
    if Q {
        lhs.queue_order.cmp(&rhs.queue_order)
    } else {
        Ordering::Equal
    }
}

/// Less-than over the selected fields.
pub fn less<const T: bool, const P: bool, const Q: bool>(lhs: &Schedule, rhs: &Schedule) -> bool {
    compare::<T, P, Q>(lhs, rhs) == Ordering::Less
}

/// Greater-than over the selected fields, for max-heap implementations that
/// need the natural order inverted.
pub fn greater<const T: bool, const P: bool, const Q: bool>(
    lhs: &Schedule,
    rhs: &Schedule,
) -> bool {
    compare::<T, P, Q>(lhs, rhs) == Ordering::Greater
}

/// A schedulable unit of work.
///
/// Activities are created by a producer, inserted into exactly one queue,
/// popped and executed exactly once. Ownership transfers to the queue on
/// insert and to the executor on pop, so the same activity object can never
/// be admitted twice.
pub trait Activity: fmt::Debug {
    /// The ordering record for this activity.
    fn schedule(&self) -> &Schedule;

    /// Mutable access to the ordering record. Queues use this to assign
    /// `queue_order` at insertion.
    fn schedule_mut(&mut self) -> &mut Schedule;

    /// Fires the activity. Consumes it: an activity fires exactly once.
    fn execute(self: Box<Self>) -> CoreResult<()>;

    /// Converts into `Any` so consumers that know the concrete type can
    /// recover it after a pop.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}
