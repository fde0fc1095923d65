//! Two components exchanging events over link pairs.
//!
//! `ping` serves balls at `pong` through a handler link; `pong` acks each
//! ball on the reverse direction, which `ping` polls. The run is bracketed
//! by the untimed init and complete exchanges.
//!
//! Run with: `cargo run --example ping_pong`

use std::cell::RefCell;
use std::rc::Rc;

use parsim::{
    Event, EventData, EventHandler, Link, SimTime, Simulation, SingleRank, UntimedPhaseDriver,
};

#[derive(Debug)]
struct Ball(u32);

impl EventData for Ball {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Pong acks every ball it receives, one cycle later.
struct Pong {
    ack_link: Link,
    received: Rc<RefCell<u32>>,
}

impl EventHandler for Pong {
    fn handle(&mut self, event: Option<Event>) {
        let Some(event) = event else { return };
        let ball = event.data_as::<Ball>().map(|b| b.0).unwrap_or(0);
        *self.received.borrow_mut() += 1;
        if let Err(err) = self.ack_link.send(1, Some(Event::new(Ball(ball)))) {
            eprintln!("ack failed: {err}");
        }
    }
}

struct Discard;

impl EventHandler for Discard {
    fn handle(&mut self, _event: Option<Event>) {}
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sim = Simulation::new(0);

    // ping -> pong is handler-delivered; pong -> ping is polled.
    let (ping_out, pong_in) = Link::connect(&sim, "ping.out", "pong.in");
    let (pong_out, ping_in) = Link::connect(&sim, "pong.out", "ping.in");

    let received = Rc::new(RefCell::new(0));
    pong_in.set_functor(Pong { ack_link: pong_out.clone(), received: received.clone() })?;
    ping_in.set_polling();
    ping_out.set_functor(Discard)?;
    pong_out.set_functor(Discard)?;

    // Init exchange: ping announces itself, pong drains the greeting.
    let mut driver = UntimedPhaseDriver::new(&sim, SingleRank);
    driver.run_init(|phase| {
        if phase == 0 {
            ping_out.send_untimed_data(Event::new(Ball(0)))?;
        }
        let _ = pong_in.recv_untimed_data()?;
        Ok(())
    })?;

    let links = [&ping_out, &pong_in, &pong_out, &ping_in];
    for link in links {
        link.finalize_configuration()?;
    }

    // Serve five balls, then run the rally.
    for serve in 1..=5u64 {
        ping_out.send(serve, Some(Event::new(Ball(serve as u32))))?;
    }
    let executed = sim.run_until(SimTime::MAX)?;

    // Ping polls its inbound link as time advances, draining the acks.
    let mut acks = 0;
    while acks < 5 {
        while ping_in.recv()?.is_some() {
            acks += 1;
        }
        if acks < 5 {
            sim.clock().set(sim.current_cycle() + 1);
        }
    }

    println!("activities executed: {executed}");
    println!("balls received by pong: {}", received.borrow());
    println!("acks polled by ping: {acks}");
    println!("stats: {}", sim.export_stats());

    for link in links {
        link.prepare_for_complete()?;
    }
    driver.run_complete(|_phase| Ok(()))?;

    Ok(())
}
