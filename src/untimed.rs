//! The untimed-phase driver.
//!
//! Before the run phase (and again after it, mirrored) the simulation
//! executes a sequence of untimed phases numbered 0, 1, 2, … Each phase is a
//! barrier-synchronized exchange: every rank sends untimed events aimed at
//! the next phase, the phase number advances globally, and receivers drain
//! whatever has become visible. The loop ends at quiescence: a barrier at
//! which no rank sent anything during the preceding phase.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};

use crate::error::CoreResult;
use crate::sim::Simulation;
use crate::types::SimTime;

/// The cross-rank reduction at the end of each untimed phase.
///
/// Implementations block until every rank has finished the phase and return
/// the total number of untimed messages sent across all ranks during it.
pub trait QuiescenceBarrier {
    fn reduce_messages(&mut self, local: u64, phase: SimTime) -> u64;
}

/// Barrier for a single-rank simulation: the local count is the total.
#[derive(Debug, Default)]
pub struct SingleRank;

impl QuiescenceBarrier for SingleRank {
    fn reduce_messages(&mut self, local: u64, _phase: SimTime) -> u64 {
        local
    }
}

#[derive(Debug)]
struct BarrierShared {
    barrier: Barrier,
    // Two accumulators indexed by phase parity, so one can be reset while
    // the other is in use.
    sums: [AtomicU64; 2],
}

/// Barrier for shared-memory multi-rank runs: one clone per rank thread.
#[derive(Clone, Debug)]
pub struct ThreadedBarrier {
    shared: Arc<BarrierShared>,
}

impl ThreadedBarrier {
    /// Creates a barrier coordinating `ranks` threads.
    pub fn new(ranks: usize) -> Self {
        Self {
            shared: Arc::new(BarrierShared {
                barrier: Barrier::new(ranks),
                sums: [AtomicU64::new(0), AtomicU64::new(0)],
            }),
        }
    }
}

impl QuiescenceBarrier for ThreadedBarrier {
    fn reduce_messages(&mut self, local: u64, phase: SimTime) -> u64 {
        let current = &self.shared.sums[(phase % 2) as usize];
        current.fetch_add(local, Ordering::SeqCst);

        let leader = self.shared.barrier.wait().is_leader();
        let total = current.load(Ordering::SeqCst);
        if leader {
            // Clear the other accumulator for the next phase while every
            // rank is still pinned between the two waits.
            self.shared.sums[((phase + 1) % 2) as usize].store(0, Ordering::SeqCst);
        }
        self.shared.barrier.wait();
        total
    }
}

/// Drives a rank's untimed phases to quiescence.
///
/// The phase callback is invoked once per phase with the phase number; it is
/// where the rank's components perform their `send_untimed_data` /
/// `recv_untimed_data` exchanges.
pub struct UntimedPhaseDriver<B> {
    sim: Simulation,
    barrier: B,
}

impl<B: QuiescenceBarrier> UntimedPhaseDriver<B> {
    pub fn new(sim: &Simulation, barrier: B) -> Self {
        Self { sim: sim.clone(), barrier }
    }

    /// Runs the init exchange. Returns the number of phases executed.
    pub fn run_init<F>(&mut self, phase_fn: F) -> CoreResult<SimTime>
    where
        F: FnMut(SimTime) -> CoreResult<()>,
    {
        self.run_phases(phase_fn)
    }

    /// Runs the complete exchange. Phase numbering restarts at zero; the
    /// closedown protocol is otherwise identical to init.
    pub fn run_complete<F>(&mut self, phase_fn: F) -> CoreResult<SimTime>
    where
        F: FnMut(SimTime) -> CoreResult<()>,
    {
        self.sim.untimed_counters().reset_phase();
        self.run_phases(phase_fn)
    }

    fn run_phases<F>(&mut self, mut phase_fn: F) -> CoreResult<SimTime>
    where
        F: FnMut(SimTime) -> CoreResult<()>,
    {
        let untimed = self.sim.untimed_counters();
        let mut phases_run = 0;
        loop {
            let phase = untimed.phase();
            untimed.reset_msg_count();
            phase_fn(phase)?;

            let local = untimed.msg_count();
            let total = self.barrier.reduce_messages(local, phase);
            tracing::debug!(rank = self.sim.rank(), phase, local, total, "untimed phase finished");
            phases_run += 1;

            if total == 0 {
                break;
            }
            untimed.advance_phase();
        }
        Ok(phases_run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::link::Link;

    #[test]
    fn test_single_rank_reaches_quiescence() {
        let sim = Simulation::new(0);
        let (left, right) = Link::connect(&sim, "a", "b");

        // Phase 0 sends one message; phase 1 drains it and sends nothing.
        let mut driver = UntimedPhaseDriver::new(&sim, SingleRank);
        let mut drained = 0;
        let phases = driver
            .run_init(|phase| {
                if phase == 0 {
                    left.send_untimed_data(Event::empty())?;
                }
                if right.recv_untimed_data()?.is_some() {
                    drained += 1;
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(phases, 2);
        assert_eq!(drained, 1);
        assert_eq!(sim.untimed_phase(), 1);
    }

    #[test]
    fn test_quiet_rank_stops_immediately() {
        let sim = Simulation::new(0);
        let mut driver = UntimedPhaseDriver::new(&sim, SingleRank);
        let phases = driver.run_init(|_| Ok(())).unwrap();
        assert_eq!(phases, 1);
        assert_eq!(sim.untimed_phase(), 0);
    }

    #[test]
    fn test_complete_restarts_phase_numbering() {
        let sim = Simulation::new(0);
        sim.untimed_counters().advance_phase();
        sim.untimed_counters().advance_phase();

        let mut driver = UntimedPhaseDriver::new(&sim, SingleRank);
        let mut first_phase = None;
        driver
            .run_complete(|phase| {
                first_phase.get_or_insert(phase);
                Ok(())
            })
            .unwrap();
        assert_eq!(first_phase, Some(0));
    }

    #[test]
    fn test_multi_phase_chain() {
        let sim = Simulation::new(0);
        let (left, right) = Link::connect(&sim, "a", "b");

        // Each drained message triggers one more send, three times over.
        let mut sends_left = 3u32;
        let mut driver = UntimedPhaseDriver::new(&sim, SingleRank);
        let phases = driver
            .run_init(|phase| {
                if phase == 0 || (right.recv_untimed_data()?.is_some() && sends_left > 0) {
                    if sends_left > 0 {
                        left.send_untimed_data(Event::empty())?;
                        sends_left -= 1;
                    }
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(sends_left, 0);
        // Three sending phases plus the quiescent one.
        assert_eq!(phases, 4);
    }

    #[test]
    fn test_threaded_barrier_sums_across_ranks() {
        let ranks = 4;
        let barrier = ThreadedBarrier::new(ranks);
        let mut handles = Vec::new();

        for rank in 0..ranks {
            let mut barrier = barrier.clone();
            handles.push(std::thread::spawn(move || {
                let mut totals = Vec::new();
                for phase in 0..3u64 {
                    totals.push(barrier.reduce_messages(rank as u64 + phase, phase));
                }
                totals
            }));
        }

        for handle in handles {
            let totals = handle.join().unwrap();
            // Sum over ranks of (rank + phase) = 6 + 4 * phase.
            assert_eq!(totals, vec![6, 10, 14]);
        }
    }

    #[test]
    fn test_threaded_quiescence_across_ranks() {
        // Rank 0 keeps sending for two phases; rank 1 never sends. Both
        // must observe the same termination phase.
        let barrier = ThreadedBarrier::new(2);
        let mut handles = Vec::new();

        for rank in 0..2 {
            let barrier = barrier.clone();
            handles.push(std::thread::spawn(move || {
                let sim = Simulation::new(rank);
                let (left, _right) = Link::connect(&sim, "a", "b");
                let mut driver = UntimedPhaseDriver::new(&sim, barrier);
                driver
                    .run_init(|phase| {
                        if rank == 0 && phase < 2 {
                            left.send_untimed_data(Event::empty())?;
                        }
                        Ok(())
                    })
                    .unwrap()
            }));
        }

        let phases: Vec<SimTime> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(phases, vec![3, 3]);
    }
}
