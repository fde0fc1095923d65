//! Integration tests for activity ordering.
//!
//! These exercise the dequeue order guarantees end to end: time first, then
//! the packed priority/order-tag word, then per-queue insertion order.

use parsim::queue::ActivityQueue;
use parsim::{activity, Activity, Event, Schedule, SimClock, SimTime, TimeVortex};

fn event(time: SimTime, priority: u64, tag: u32) -> Box<Event> {
    let mut event = Event::empty();
    event.set_delivery_time(time);
    event.schedule_mut().set_priority(priority);
    event.schedule_mut().set_order_tag(tag);
    Box::new(event)
}

fn drain(vortex: &mut TimeVortex) -> Vec<(SimTime, u64, u32)> {
    let mut order = Vec::new();
    while let Some(activity) = vortex.pop() {
        let s = activity.schedule();
        order.push((s.delivery_time(), s.priority(), s.order_tag()));
    }
    order
}

#[test]
fn order_within_time() {
    // A(t=10, prio=50, tag=2), B(t=10, prio=50, tag=1), C(t=10, prio=40,
    // tag=9) must dequeue as C, B, A.
    let mut vortex = TimeVortex::new(SimClock::default());
    vortex.insert(event(10, 50, 2)).unwrap();
    vortex.insert(event(10, 50, 1)).unwrap();
    vortex.insert(event(10, 40, 9)).unwrap();

    assert_eq!(drain(&mut vortex), vec![(10, 40, 9), (10, 50, 1), (10, 50, 2)]);
}

#[test]
fn queue_order_tiebreak_preserves_insertion() {
    // Two events identical in delivery time and priority word: X then Y in,
    // X then Y out.
    let mut vortex = TimeVortex::new(SimClock::default());
    let mut x = event(5, 50, 1);
    x.assign_unique_id(0);
    let x_id = x.id();
    let mut y = event(5, 50, 1);
    y.assign_unique_id(0);
    let y_id = y.id();

    vortex.insert(x).unwrap();
    vortex.insert(y).unwrap();

    let first = parsim::downcast_event(vortex.pop().unwrap()).unwrap();
    let second = parsim::downcast_event(vortex.pop().unwrap()).unwrap();
    assert_eq!(first.id(), x_id);
    assert_eq!(second.id(), y_id);
}

#[test]
fn priority_classes_fire_in_documented_order() {
    let classes = [
        activity::EXIT_PRIORITY,
        activity::THREAD_SYNC_PRIORITY,
        activity::CLOCK_PRIORITY,
        activity::FINAL_EVENT_PRIORITY,
        activity::SYNC_PRIORITY,
        activity::EVENT_PRIORITY,
        activity::STOP_ACTION_PRIORITY,
        activity::BARRIER_PRIORITY,
        activity::ONE_SHOT_PRIORITY,
        activity::STATISTIC_CLOCK_PRIORITY,
    ];

    let mut vortex = TimeVortex::new(SimClock::default());
    for &class in &classes {
        vortex.insert(event(100, class, 0)).unwrap();
    }

    let fired: Vec<u64> = drain(&mut vortex).iter().map(|t| t.1).collect();
    assert_eq!(fired, vec![20, 25, 30, 40, 50, 75, 80, 85, 98, 99]);
}

#[test]
fn interleaved_times_and_priorities() {
    let mut vortex = TimeVortex::new(SimClock::default());
    vortex.insert(event(20, 20, 0)).unwrap();
    vortex.insert(event(10, 99, 0)).unwrap();
    vortex.insert(event(10, 50, 7)).unwrap();
    vortex.insert(event(30, 40, 0)).unwrap();
    vortex.insert(event(10, 50, 3)).unwrap();

    // Time dominates priority; priority dominates tag.
    assert_eq!(
        drain(&mut vortex),
        vec![(10, 50, 3), (10, 50, 7), (10, 99, 0), (20, 20, 0), (30, 40, 0)]
    );
}

#[test]
fn schedule_accessors_do_not_perturb_each_other() {
    let mut schedule = Schedule::new();
    schedule.set_priority(75);
    schedule.set_order_tag(1234);
    assert_eq!(schedule.priority(), 75);
    assert_eq!(schedule.order_tag(), 1234);

    schedule.set_priority(20);
    assert_eq!(schedule.order_tag(), 1234);
    schedule.set_order_tag(9);
    assert_eq!(schedule.priority(), 20);
}

#[test]
fn schedule_serde_round_trip_is_bit_exact() {
    let mut schedule = Schedule::with_priority(activity::EVENT_PRIORITY);
    schedule.set_delivery_time(0xDEAD_BEEF_CAFE);
    schedule.set_order_tag(0x8000_0001);

    let json = serde_json::to_string(&schedule).unwrap();
    let restored: Schedule = serde_json::from_str(&json).unwrap();
    assert_eq!(schedule, restored);
}
