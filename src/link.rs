//! Links: paired directional channels between components.
//!
//! A link always exists as one half of a mutually-referencing pair; sending
//! on one half deposits events into the queue serving the other half's
//! owner. The pair's wiring is decided by each half's *kind* (how its owner
//! consumes events) and gated by its *mode* (which phase of the simulation
//! it is in):
//!
//! ```text
//!     Init ──finalize_configuration──▶ Run ──prepare_for_complete──▶ Complete
//! ```
//!
//! During `Init` and `Complete` only untimed operations are legal; during
//! `Run` only timed `send`/`recv` are. Violations are programming errors
//! and are reported, never recovered.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{CoreError, CoreResult};
use crate::event::{downcast_event, DeliveryInfo, Event, EventHandler, HandlerRef};
use crate::profile::{HandlerMetadata, ProfileToolList, ProfileToolRef};
use crate::queue::{InitQueue, PollingLinkQueue, QueueRef};
use crate::sim::Simulation;
use crate::time::TimeConverter;
use crate::types::{link_tag_for_name, LinkTag, SimTime};

/// How the owner of a link consumes events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkKind {
    /// No consumer configured yet. Illegal once the run phase starts.
    Uninitialized,
    /// Events are delivered by invoking the owner's handler.
    Handler,
    /// The owner pulls ready events with [`Link::recv`].
    Poll,
    /// The link is the local stand-in for a remote endpoint; a sync manager
    /// moves its traffic across ranks.
    Sync,
}

/// The phase state of a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkMode {
    Init,
    Run,
    Complete,
}

enum Pair {
    Unpaired,
    Peer(Weak<RefCell<LinkInner>>),
    // A sync half has no external owner; the component half keeps it alive
    // and drops it on its own teardown.
    OwnedSync(Rc<RefCell<LinkInner>>),
}

impl Pair {
    fn upgrade(&self) -> Option<Rc<RefCell<LinkInner>>> {
        match self {
            Pair::Unpaired => None,
            Pair::Peer(weak) => weak.upgrade(),
            Pair::OwnedSync(rc) => Some(rc.clone()),
        }
    }
}

struct LinkInner {
    name: String,
    tag: LinkTag,
    kind: LinkKind,
    mode: LinkMode,
    latency: SimTime,
    // Core cycles per user delay unit; zero means no timebase configured
    // and delays are taken as core cycles.
    default_time_base: SimTime,
    delivery_info: DeliveryInfo,
    send_queue: Option<QueueRef>,
    pair: Pair,
    profile_tools: ProfileToolList,
}

/// One half of a link pair.
///
/// `Link` is a cheap handle; clones refer to the same half. The pair
/// reference is fixed at construction and never mutated afterwards.
#[derive(Clone)]
pub struct Link {
    inner: Rc<RefCell<LinkInner>>,
    sim: Simulation,
}

impl Link {
    fn new_inner(name: &str) -> Rc<RefCell<LinkInner>> {
        Rc::new(RefCell::new(LinkInner {
            name: name.to_string(),
            tag: link_tag_for_name(name),
            kind: LinkKind::Uninitialized,
            mode: LinkMode::Init,
            latency: 0,
            default_time_base: 0,
            delivery_info: DeliveryInfo::None,
            send_queue: None,
            pair: Pair::Unpaired,
            profile_tools: ProfileToolList::default(),
        }))
    }

    /// Creates a mutually-paired link. Each half's tag derives from its own
    /// name, so both endpoints of a distributed run agree on event ordering
    /// without communicating.
    pub fn connect(sim: &Simulation, left_name: &str, right_name: &str) -> (Link, Link) {
        let left = Self::new_inner(left_name);
        let right = Self::new_inner(right_name);
        left.borrow_mut().pair = Pair::Peer(Rc::downgrade(&right));
        right.borrow_mut().pair = Pair::Peer(Rc::downgrade(&left));
        (
            Link { inner: left, sim: sim.clone() },
            Link { inner: right, sim: sim.clone() },
        )
    }

    /// Creates a self-paired link: sends come back to the owner.
    pub fn loopback(sim: &Simulation, name: &str) -> Link {
        let inner = Self::new_inner(name);
        let weak = Rc::downgrade(&inner);
        inner.borrow_mut().pair = Pair::Peer(weak);
        Link { inner, sim: sim.clone() }
    }

    /// Creates a link whose pair is a sync half standing in for a remote
    /// endpoint. The sync half is owned by the returned link; the sync
    /// manager wires it with [`Link::configure_sync`].
    pub fn connect_sync(sim: &Simulation, name: &str) -> Link {
        let local = Self::new_inner(name);
        let sync = Self::new_inner(&format!("{name}.sync"));
        {
            let mut half = sync.borrow_mut();
            half.kind = LinkKind::Sync;
            half.pair = Pair::Peer(Rc::downgrade(&local));
        }
        local.borrow_mut().pair = Pair::OwnedSync(sync);
        Link { inner: local, sim: sim.clone() }
    }

    /// This link's name.
    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    /// This link's deterministic tag.
    pub fn tag(&self) -> LinkTag {
        self.inner.borrow().tag
    }

    /// How this link's owner consumes events.
    pub fn kind(&self) -> LinkKind {
        self.inner.borrow().kind
    }

    /// The phase this link is in.
    pub fn mode(&self) -> LinkMode {
        self.inner.borrow().mode
    }

    /// Outbound latency charged to this link's sends, in core cycles.
    pub fn latency(&self) -> SimTime {
        self.inner.borrow().latency
    }

    /// Replaces the outbound latency.
    pub fn set_latency(&self, latency: SimTime) {
        self.inner.borrow_mut().latency = latency;
    }

    /// The opposite half of the pair, if it is still alive.
    pub fn pair(&self) -> Option<Link> {
        self.inner
            .borrow()
            .pair
            .upgrade()
            .map(|inner| Link { inner, sim: self.sim.clone() })
    }

    fn pair_rc(&self) -> CoreResult<Rc<RefCell<LinkInner>>> {
        let upgraded = self.inner.borrow().pair.upgrade();
        upgraded.ok_or_else(|| CoreError::StalePair { link: self.name() })
    }

    /// Installs the handler that receives events sent *to* this link's
    /// owner, and marks the link handler-consumed. Fatal on polling links.
    pub fn set_functor(&self, handler: impl EventHandler + 'static) -> CoreResult<()> {
        self.install_functor(Rc::new(RefCell::new(handler)), false, "set_functor")
    }

    /// Replaces a previously installed handler, transferring accumulated
    /// profiling bookkeeping from the old handler to the new one. Events
    /// already stamped keep delivering to the handler they captured.
    pub fn replace_functor(&self, handler: impl EventHandler + 'static) -> CoreResult<()> {
        self.install_functor(Rc::new(RefCell::new(handler)), true, "replace_functor")
    }

    fn install_functor(&self, handler: HandlerRef, replace: bool, op: &'static str) -> CoreResult<()> {
        let pair = self.pair_rc()?;
        {
            let mut me = self.inner.borrow_mut();
            if me.kind == LinkKind::Poll {
                return Err(CoreError::KindViolation { op, kind: me.kind });
            }
            me.kind = LinkKind::Handler;
            if Rc::ptr_eq(&self.inner, &pair) {
                if replace {
                    if let DeliveryInfo::Handler(old) = &me.delivery_info {
                        handler.borrow_mut().transfer_profiling_info(&*old.borrow());
                    }
                }
                me.delivery_info = DeliveryInfo::Handler(handler);
                return Ok(());
            }
        }

        let mut peer = pair.borrow_mut();
        if replace {
            if let DeliveryInfo::Handler(old) = &peer.delivery_info {
                handler.borrow_mut().transfer_profiling_info(&*old.borrow());
            }
        }
        peer.delivery_info = DeliveryInfo::Handler(handler);
        Ok(())
    }

    /// Marks this link poll-consumed: its owner pulls events with
    /// [`Link::recv`] instead of installing a handler.
    pub fn set_polling(&self) {
        self.inner.borrow_mut().kind = LinkKind::Poll;
    }

    /// Sets the timebase applied to delays passed to [`Link::send`].
    /// `None` clears it; delays are then taken as core cycles.
    pub fn set_default_time_base(&self, timebase: Option<&TimeConverter>) {
        self.inner.borrow_mut().default_time_base =
            timebase.map(TimeConverter::factor).unwrap_or(0);
    }

    /// The configured default timebase, if any.
    pub fn default_time_base(&self) -> Option<TimeConverter> {
        let factor = self.inner.borrow().default_time_base;
        (factor != 0).then(|| TimeConverter::new(factor))
    }

    /// Adds latency charged to this link's own sends.
    pub fn add_send_latency(&self, cycles: SimTime, timebase: &str) -> CoreResult<()> {
        let factor = self.sim.time_lord().sim_cycles(timebase)?;
        self.inner.borrow_mut().latency += cycles * factor;
        Ok(())
    }

    /// Adds send latency through a pre-resolved converter, avoiding the
    /// string parse.
    pub fn add_send_latency_with(&self, cycles: SimTime, timebase: &TimeConverter) {
        self.inner.borrow_mut().latency += timebase.convert_to_core_time(cycles);
    }

    /// Adds latency charged to the pair's sends. Splitting a pipeline delay
    /// between the two endpoints never double-counts: each direction pays
    /// only its own side's latency.
    pub fn add_recv_latency(&self, cycles: SimTime, timebase: &str) -> CoreResult<()> {
        let factor = self.sim.time_lord().sim_cycles(timebase)?;
        let pair = self.pair_rc()?;
        pair.borrow_mut().latency += cycles * factor;
        Ok(())
    }

    /// Adds receive latency through a pre-resolved converter.
    pub fn add_recv_latency_with(&self, cycles: SimTime, timebase: &TimeConverter) -> CoreResult<()> {
        let pair = self.pair_rc()?;
        pair.borrow_mut().latency += timebase.convert_to_core_time(cycles);
        Ok(())
    }

    /// Sends an event to the pair's owner after `delay` (scaled by the
    /// default timebase when one is configured) plus this link's latency.
    /// `None` sends a null event that invokes the receiving handler with no
    /// event object. Legal only during the run phase.
    pub fn send(&self, delay: SimTime, event: Option<Event>) -> CoreResult<()> {
        let scaled = {
            let me = self.inner.borrow();
            if me.default_time_base != 0 {
                delay * me.default_time_base
            } else {
                delay
            }
        };
        self.send_core(scaled, event)
    }

    /// Sends with an explicit timebase for the delay.
    pub fn send_with_timebase(
        &self,
        delay: SimTime,
        timebase: &TimeConverter,
        event: Option<Event>,
    ) -> CoreResult<()> {
        self.send_core(timebase.convert_to_core_time(delay), event)
    }

    fn send_core(&self, delay: SimTime, event: Option<Event>) -> CoreResult<()> {
        let (queue, event) = {
            let me = self.inner.borrow();
            if me.mode != LinkMode::Run {
                return Err(CoreError::PhaseViolation { op: "send", mode: me.mode });
            }

            let cycle = self.sim.current_cycle() + delay + me.latency;
            let mut event = event.unwrap_or_else(Event::null);
            event.set_delivery_time(cycle);
            event.set_delivery_info(me.tag, me.delivery_info.clone());

            if !me.profile_tools.is_empty() {
                me.profile_tools.event_sent(&event);
            }

            let queue = me
                .send_queue
                .clone()
                .ok_or_else(|| CoreError::UnwiredQueue { link: me.name.clone() })?;
            (queue, event)
        };
        let result = queue.borrow_mut().insert(Box::new(event));
        result
    }

    /// Pulls the next ready event sent to this link's owner. Returns `None`
    /// when nothing has reached its delivery time yet. Fatal on non-polling
    /// links; handler links have no user-visible receive.
    pub fn recv(&self) -> CoreResult<Option<Event>> {
        {
            let me = self.inner.borrow();
            if me.kind != LinkKind::Poll {
                return Err(CoreError::KindViolation { op: "recv", kind: me.kind });
            }
            if me.mode != LinkMode::Run {
                return Err(CoreError::PhaseViolation { op: "recv", mode: me.mode });
            }
        }

        let pair = self.pair_rc()?;
        let queue = pair.borrow().send_queue.clone();
        let Some(queue) = queue else { return Ok(None) };
        // The polling queue holds back items still in the future.
        let popped = queue.borrow_mut().pop();
        Ok(popped.and_then(downcast_event))
    }

    /// Sends untimed data to the pair's owner during the init or complete
    /// phase. The event is aimed at the next untimed phase and counted
    /// toward the quiescence check.
    pub fn send_untimed_data(&self, mut data: Event) -> CoreResult<()> {
        let queue = {
            let mut me = self.inner.borrow_mut();
            if me.mode == LinkMode::Run {
                return Err(CoreError::PhaseViolation { op: "send_untimed_data", mode: me.mode });
            }

            let untimed = self.sim.untimed_counters();
            untimed.increment_msg_count();
            data.set_delivery_time(untimed.phase() + 1);
            data.set_delivery_info(me.tag, me.delivery_info.clone());
            self.untimed_queue(&mut me)
        };
        let result = queue.borrow_mut().insert(Box::new(data));
        result
    }

    /// Deposits untimed data arriving from another rank. Called by the sync
    /// manager; the event keeps the delivery phase and routing it was
    /// stamped with on the sending rank.
    pub fn send_untimed_data_sync(&self, data: Event) -> CoreResult<()> {
        let queue = {
            let mut me = self.inner.borrow_mut();
            self.untimed_queue(&mut me)
        };
        let result = queue.borrow_mut().insert(Box::new(data));
        result
    }

    fn untimed_queue(&self, me: &mut LinkInner) -> QueueRef {
        match &me.send_queue {
            Some(queue) => queue.clone(),
            None => {
                let queue: QueueRef =
                    Rc::new(RefCell::new(InitQueue::new(self.sim.untimed_counters())));
                me.send_queue = Some(queue.clone());
                queue
            }
        }
    }

    /// Pulls untimed data whose phase has been reached, or `None`.
    pub fn recv_untimed_data(&self) -> CoreResult<Option<Event>> {
        {
            let me = self.inner.borrow();
            if me.mode == LinkMode::Run {
                return Err(CoreError::PhaseViolation { op: "recv_untimed_data", mode: me.mode });
            }
        }

        let pair = self.pair_rc()?;
        let queue = pair.borrow().send_queue.clone();
        let Some(queue) = queue else { return Ok(None) };

        let mut queue = queue.borrow_mut();
        let ready = queue
            .front()
            .map(|front| front.schedule().delivery_time() <= self.sim.untimed_phase())
            .unwrap_or(false);
        if !ready {
            return Ok(None);
        }
        Ok(queue.pop().and_then(downcast_event))
    }

    /// Transitions Init → Run and wires the pair's run-phase queue
    /// according to this link's kind. Idempotent over pair traversal: a
    /// sync half makes no wiring changes, and a sync pair's transition
    /// rides on this one because nothing else owns it.
    pub fn finalize_configuration(&self) -> CoreResult<()> {
        let kind = {
            let mut me = self.inner.borrow_mut();
            me.mode = LinkMode::Run;
            me.kind
        };
        if kind == LinkKind::Sync {
            // The sync manager installed the wiring already.
            return Ok(());
        }
        if kind == LinkKind::Uninitialized {
            return Err(CoreError::KindViolation { op: "finalize_configuration", kind });
        }

        let pair = self.pair_rc()?;
        let peer_kind = {
            let mut peer = pair.borrow_mut();
            // Release any init queue left from the untimed exchange, then
            // install the queue the peer's sends will use during the run.
            peer.send_queue = match kind {
                LinkKind::Handler => Some(self.sim.time_vortex()),
                LinkKind::Poll => {
                    Some(Rc::new(RefCell::new(PollingLinkQueue::new(self.sim.clock()))))
                }
                LinkKind::Sync | LinkKind::Uninitialized => None,
            };
            peer.kind
        };
        tracing::debug!(link = %self.name(), kind = ?kind, "link configuration finalized");

        if peer_kind == LinkKind::Sync && !Rc::ptr_eq(&self.inner, &pair) {
            Link { inner: pair, sim: self.sim.clone() }.finalize_configuration()?;
        }
        Ok(())
    }

    /// Transitions Run → Complete and tears down the pair's run-phase
    /// wiring. Untimed operations become legal again; a later untimed send
    /// re-creates the phase queue on demand.
    pub fn prepare_for_complete(&self) -> CoreResult<()> {
        let kind = {
            let mut me = self.inner.borrow_mut();
            me.mode = LinkMode::Complete;
            me.kind
        };
        if kind == LinkKind::Sync {
            return Ok(());
        }

        let pair = self.pair_rc()?;
        let peer_kind = {
            let mut peer = pair.borrow_mut();
            // Dropping the reference also destroys a poll peer's private
            // queue; the shared vortex outlives it.
            peer.send_queue = None;
            peer.kind
        };

        if peer_kind == LinkKind::Sync && !Rc::ptr_eq(&self.inner, &pair) {
            Link { inner: pair, sim: self.sim.clone() }.prepare_for_complete()?;
        }
        Ok(())
    }

    /// Installs cross-rank wiring on this link: the staging queue its sends
    /// drain into, and the tag of the remote link that re-sends them after
    /// transport. Called by the sync manager; the pair must be a sync half.
    pub fn configure_sync(&self, staging: QueueRef, remote_tag: LinkTag) -> CoreResult<()> {
        let pair = self.pair_rc()?;
        let pair_kind = pair.borrow().kind;
        if pair_kind != LinkKind::Sync {
            return Err(CoreError::KindViolation { op: "configure_sync", kind: pair_kind });
        }

        let mut me = self.inner.borrow_mut();
        me.send_queue = Some(staging);
        me.delivery_info = DeliveryInfo::RemoteLink(remote_tag);
        Ok(())
    }

    /// The queue this link's sends currently drain into, if wired. The sync
    /// manager uses this to drain a staging queue.
    pub fn send_queue(&self) -> Option<QueueRef> {
        self.inner.borrow().send_queue.clone()
    }

    /// Directly installs this link's send queue. Sync-manager-facing.
    pub fn install_send_queue(&self, queue: QueueRef) {
        self.inner.borrow_mut().send_queue = Some(queue);
    }

    /// Attaches a profile tool observing this link's sends. The key
    /// returned by the tool's registration is passed back on every
    /// notification.
    pub fn attach_profile_tool(&self, tool: ProfileToolRef, metadata: &HandlerMetadata) {
        let key = tool.borrow_mut().register_handler(metadata);
        self.inner.borrow_mut().profile_tools.attach(tool, key);
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Link")
            .field("name", &inner.name)
            .field("tag", &inner.tag)
            .field("kind", &inner.kind)
            .field("mode", &inner.mode)
            .field("latency", &inner.latency)
            .finish()
    }
}
