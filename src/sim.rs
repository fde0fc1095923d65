//! Per-rank simulation context and the serial scheduler.
//!
//! Each rank runs a single scheduler thread that owns the rank's clock,
//! untimed-phase counters and [`TimeVortex`]. [`Simulation`] is a cheap
//! cloneable handle to that state; links and queues hold clones of the
//! individual pieces they need.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::Serialize;

use crate::activity::Activity;
use crate::error::CoreResult;
use crate::queue::{ActivityQueue, QueueRef, TimeVortex};
use crate::time::TimeLord;
use crate::types::{Rank, SimTime};

/// Shared handle to a rank's simulated clock.
#[derive(Clone, Debug, Default)]
pub struct SimClock {
    cycle: Rc<Cell<SimTime>>,
}

impl SimClock {
    /// The current simulated cycle.
    pub fn now(&self) -> SimTime {
        self.cycle.get()
    }

    /// Moves the clock. The scheduler advances it to each activity's
    /// delivery time; embeddings driving their own loop may set it directly.
    pub fn set(&self, cycle: SimTime) {
        self.cycle.set(cycle);
    }
}

#[derive(Debug, Default)]
struct UntimedState {
    phase: Cell<SimTime>,
    msg_count: Cell<u64>,
}

/// Shared handle to a rank's untimed-phase counter and message accounting.
#[derive(Clone, Debug, Default)]
pub struct UntimedCounters {
    state: Rc<UntimedState>,
}

impl UntimedCounters {
    /// The current untimed phase number.
    pub fn phase(&self) -> SimTime {
        self.state.phase.get()
    }

    /// Advances to the next untimed phase.
    pub fn advance_phase(&self) {
        self.state.phase.set(self.state.phase.get() + 1);
    }

    /// Restarts phase numbering, used when the complete exchange begins.
    pub fn reset_phase(&self) {
        self.state.phase.set(0);
    }

    /// Untimed messages sent on this rank since the last reset.
    pub fn msg_count(&self) -> u64 {
        self.state.msg_count.get()
    }

    /// Clears the per-phase message counter.
    pub fn reset_msg_count(&self) {
        self.state.msg_count.set(0);
    }

    pub(crate) fn increment_msg_count(&self) {
        self.state.msg_count.set(self.state.msg_count.get() + 1);
    }
}

/// Counters maintained by the scheduler loop.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct SchedulerStats {
    /// Activities popped and executed.
    pub activities_executed: u64,
    /// Simulated cycle after the most recent run.
    pub final_cycle: SimTime,
}

struct SimulationState {
    rank: Rank,
    clock: SimClock,
    untimed: UntimedCounters,
    time_lord: TimeLord,
    vortex: Rc<RefCell<TimeVortex>>,
    stats: RefCell<SchedulerStats>,
}

/// Handle to one rank's simulation context.
///
/// Clones share the same underlying state; every link on the rank carries
/// one.
#[derive(Clone)]
pub struct Simulation {
    state: Rc<SimulationState>,
}

impl Simulation {
    /// Creates a rank context with a 1ns core timebase.
    pub fn new(rank: Rank) -> Self {
        // The default timebase string always parses.
        match Self::with_core_timebase(rank, "1ns") {
            Ok(sim) => sim,
            Err(_) => unreachable!("default core timebase is valid"),
        }
    }

    /// Creates a rank context with the given core timebase, e.g. `"1ps"`.
    pub fn with_core_timebase(rank: Rank, core_timebase: &str) -> CoreResult<Self> {
        let clock = SimClock::default();
        Ok(Self {
            state: Rc::new(SimulationState {
                rank,
                clock: clock.clone(),
                untimed: UntimedCounters::default(),
                time_lord: TimeLord::new(core_timebase)?,
                vortex: TimeVortex::shared(clock),
                stats: RefCell::new(SchedulerStats::default()),
            }),
        })
    }

    /// This rank's id.
    pub fn rank(&self) -> Rank {
        self.state.rank
    }

    /// Handle to this rank's clock.
    pub fn clock(&self) -> SimClock {
        self.state.clock.clone()
    }

    /// The current simulated cycle.
    pub fn current_cycle(&self) -> SimTime {
        self.state.clock.now()
    }

    /// Handle to this rank's untimed counters.
    pub fn untimed_counters(&self) -> UntimedCounters {
        self.state.untimed.clone()
    }

    /// The current untimed phase number.
    pub fn untimed_phase(&self) -> SimTime {
        self.state.untimed.phase()
    }

    /// Untimed messages sent on this rank since the last reset.
    pub fn untimed_msg_count(&self) -> u64 {
        self.state.untimed.msg_count()
    }

    /// This rank's time services.
    pub fn time_lord(&self) -> &TimeLord {
        &self.state.time_lord
    }

    /// This rank's shared time vortex as a queue handle. Handler links wire
    /// this into their peer at configuration time.
    pub fn time_vortex(&self) -> QueueRef {
        self.state.vortex.clone()
    }

    /// Delivery time of the next pending activity, if any.
    pub fn next_delivery_time(&self) -> Option<SimTime> {
        self.state.vortex.borrow().next_delivery_time()
    }

    /// Number of activities pending in the vortex.
    pub fn pending_activities(&self) -> usize {
        self.state.vortex.borrow().len()
    }

    /// Schedules an activity directly into the rank's vortex.
    pub fn insert_activity(&self, activity: Box<dyn Activity>) -> CoreResult<()> {
        self.state.vortex.borrow_mut().insert(activity)
    }

    /// Runs the scheduler until the vortex holds nothing at or before
    /// `end_time`. Returns the number of activities executed.
    ///
    /// Each iteration pops the `(delivery_time, priority_order,
    /// queue_order)`-minimum, advances the clock to its delivery time and
    /// fires it. The vortex borrow is released before the activity runs, so
    /// handlers are free to send.
    pub fn run_until(&self, end_time: SimTime) -> CoreResult<u64> {
        let mut executed = 0;
        loop {
            let next = self.state.vortex.borrow().next_delivery_time();
            let Some(time) = next else { break };
            if time > end_time {
                break;
            }

            let activity = self.state.vortex.borrow_mut().pop();
            let Some(activity) = activity else { break };

            self.state.clock.set(time);
            tracing::trace!(rank = self.state.rank, "executing activity ({})", activity.schedule());
            activity.execute()?;

            executed += 1;
            let mut stats = self.state.stats.borrow_mut();
            stats.activities_executed += 1;
            stats.final_cycle = time;
        }
        Ok(executed)
    }

    /// Scheduler counters for this rank.
    pub fn stats(&self) -> SchedulerStats {
        *self.state.stats.borrow()
    }

    /// Exports rank statistics as JSON.
    pub fn export_stats(&self) -> serde_json::Value {
        let stats = self.state.stats.borrow();
        let vortex = self.state.vortex.borrow();
        serde_json::json!({
            "rank": self.state.rank,
            "current_cycle": self.state.clock.now(),
            "untimed_phase": self.state.untimed.phase(),
            "activities_executed": stats.activities_executed,
            "pending_activities": vortex.len(),
            "vortex_insertions": vortex.insertions(),
            "vortex_max_depth": vortex.max_depth(),
        })
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("rank", &self.state.rank)
            .field("current_cycle", &self.state.clock.now())
            .field("untimed_phase", &self.state.untimed.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Schedule, CLOCK_PRIORITY};
    use crate::error::CoreError;

    #[derive(Debug)]
    struct Probe {
        schedule: Schedule,
        fired: Rc<RefCell<Vec<SimTime>>>,
    }

    impl Probe {
        fn boxed(time: SimTime, fired: &Rc<RefCell<Vec<SimTime>>>) -> Box<Self> {
            let mut schedule = Schedule::with_priority(CLOCK_PRIORITY);
            schedule.set_delivery_time(time);
            Box::new(Self { schedule, fired: fired.clone() })
        }
    }

    impl Activity for Probe {
        fn schedule(&self) -> &Schedule {
            &self.schedule
        }

        fn schedule_mut(&mut self) -> &mut Schedule {
            &mut self.schedule
        }

        fn execute(self: Box<Self>) -> CoreResult<()> {
            self.fired.borrow_mut().push(self.schedule.delivery_time());
            Ok(())
        }

        fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
            self
        }
    }

    #[test]
    fn test_run_until_advances_clock_and_fires_in_order() {
        let sim = Simulation::new(0);
        let fired = Rc::new(RefCell::new(Vec::new()));
        sim.insert_activity(Probe::boxed(30, &fired)).unwrap();
        sim.insert_activity(Probe::boxed(10, &fired)).unwrap();
        sim.insert_activity(Probe::boxed(20, &fired)).unwrap();

        let executed = sim.run_until(25).unwrap();
        assert_eq!(executed, 2);
        assert_eq!(*fired.borrow(), vec![10, 20]);
        assert_eq!(sim.current_cycle(), 20);
        assert_eq!(sim.pending_activities(), 1);

        sim.run_until(SimTime::MAX).unwrap();
        assert_eq!(*fired.borrow(), vec![10, 20, 30]);
        assert_eq!(sim.stats().activities_executed, 3);
        assert_eq!(sim.stats().final_cycle, 30);
    }

    #[test]
    fn test_insert_in_past_is_rejected() {
        let sim = Simulation::new(0);
        sim.clock().set(100);
        let fired = Rc::new(RefCell::new(Vec::new()));
        assert!(matches!(
            sim.insert_activity(Probe::boxed(99, &fired)),
            Err(CoreError::SchedulingViolation { .. })
        ));
    }

    #[test]
    fn test_untimed_counters() {
        let sim = Simulation::new(2);
        let untimed = sim.untimed_counters();
        assert_eq!(untimed.phase(), 0);
        untimed.advance_phase();
        untimed.advance_phase();
        assert_eq!(sim.untimed_phase(), 2);
        untimed.reset_phase();
        assert_eq!(sim.untimed_phase(), 0);

        untimed.increment_msg_count();
        untimed.increment_msg_count();
        assert_eq!(sim.untimed_msg_count(), 2);
        untimed.reset_msg_count();
        assert_eq!(sim.untimed_msg_count(), 0);
    }

    #[test]
    fn test_export_stats_shape() {
        let sim = Simulation::new(1);
        let fired = Rc::new(RefCell::new(Vec::new()));
        sim.insert_activity(Probe::boxed(5, &fired)).unwrap();
        sim.run_until(10).unwrap();

        let stats = sim.export_stats();
        assert_eq!(stats["rank"], 1);
        assert_eq!(stats["current_cycle"], 5);
        assert_eq!(stats["activities_executed"], 1);
        assert_eq!(stats["pending_activities"], 0);
    }

    #[test]
    fn test_invalid_core_timebase() {
        assert!(Simulation::with_core_timebase(0, "1lightyear").is_err());
    }
}
