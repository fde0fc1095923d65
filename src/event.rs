//! Events: activities sent across links between components.
//!
//! An [`Event`] is an [`Activity`] that additionally carries delivery
//! information (how the receiving side consumes it), an optional globally
//! unique id, and a user payload. Components never construct delivery
//! information themselves; the owning link stamps it during `send`.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};

use crate::activity::{Activity, Schedule, EVENT_PRIORITY};
use crate::error::{CoreError, CoreResult};
use crate::types::{LinkTag, Rank, SimTime};

/// Process-wide counter backing [`Event::generate_unique_id`]. This is the
/// only cross-thread shared mutable state in the core.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Globally unique event identifier: a process-wide counter value paired
/// with the rank it was generated on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId {
    pub counter: u64,
    pub rank: Rank,
}

impl EventId {
    /// Sentinel for "no id assigned".
    pub const NO_ID: EventId = EventId { counter: 0, rank: -1 };
}

/// User payload carried by an event.
///
/// Payload types opt in to broadcast cloning by overriding [`clone_data`];
/// the default refuses, and [`Event::try_clone`] surfaces that refusal as an
/// error rather than silently duplicating state that was never meant to be
/// duplicated.
///
/// [`clone_data`]: EventData::clone_data
pub trait EventData: fmt::Debug + 'static {
    /// Clones the payload for a broadcast. Returns `None` if the payload
    /// does not support it.
    fn clone_data(&self) -> Option<Box<dyn EventData>> {
        None
    }

    /// Upcast for consumers that know the concrete payload type.
    fn as_any(&self) -> &dyn Any;
}

// JSON payloads are cloneable out of the box.
impl EventData for serde_json::Value {
    fn clone_data(&self) -> Option<Box<dyn EventData>> {
        Some(Box::new(self.clone()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Callback invoked when an event reaches its delivery time on a handler
/// link. A `None` argument means a null event fired: the send carried no
/// event object, only the timing.
pub trait EventHandler {
    fn handle(&mut self, event: Option<Event>);

    /// Hook for moving accumulated profiling bookkeeping from a handler
    /// being replaced into its replacement.
    fn transfer_profiling_info(&mut self, _old: &dyn EventHandler) {}
}

/// Shared handle to a handler. Events in flight hold one of these, so a
/// handler replaced mid-run stays alive until every event stamped with it
/// has fired.
pub type HandlerRef = Rc<RefCell<dyn EventHandler>>;

/// How an event gets consumed after it is popped from a queue.
///
/// The variant is selected by the kind of the link the event was sent on:
/// handler links stamp the peer's handler, sync links stamp the remote
/// link's tag so the sync manager can route the event after transport.
/// Polling peers pull events directly, so their delivery info stays `None`.
#[derive(Clone, Default)]
pub enum DeliveryInfo {
    #[default]
    None,
    Handler(HandlerRef),
    RemoteLink(LinkTag),
}

impl fmt::Debug for DeliveryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryInfo::None => write!(f, "None"),
            DeliveryInfo::Handler(_) => write!(f, "Handler"),
            DeliveryInfo::RemoteLink(tag) => write!(f, "RemoteLink({tag})"),
        }
    }
}

/// Component metadata recorded along an event's path, available with the
/// `event-tracking` feature.
#[cfg(feature = "event-tracking")]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventTracking {
    pub first_component: String,
    pub first_type: String,
    pub first_port: String,
    pub last_component: String,
    pub last_type: String,
    pub last_port: String,
}

/// An activity sent across a link.
#[derive(Debug)]
pub struct Event {
    schedule: Schedule,
    delivery_info: DeliveryInfo,
    id: Option<EventId>,
    data: Option<Box<dyn EventData>>,
    // Null events deliver `None` to the handler and are consumed on fire.
    null_delivery: bool,
    #[cfg(feature = "event-tracking")]
    tracking: EventTracking,
}

impl Event {
    /// Creates an event carrying the given payload.
    pub fn new(data: impl EventData) -> Self {
        Self::from_boxed(Box::new(data))
    }

    /// Creates an event from an already-boxed payload.
    pub fn from_boxed(data: Box<dyn EventData>) -> Self {
        Self {
            schedule: Schedule::with_priority(EVENT_PRIORITY),
            delivery_info: DeliveryInfo::None,
            id: None,
            data: Some(data),
            null_delivery: false,
            #[cfg(feature = "event-tracking")]
            tracking: EventTracking::default(),
        }
    }

    /// Creates an event with no payload.
    pub fn empty() -> Self {
        Self {
            schedule: Schedule::with_priority(EVENT_PRIORITY),
            delivery_info: DeliveryInfo::None,
            id: None,
            data: None,
            null_delivery: false,
            #[cfg(feature = "event-tracking")]
            tracking: EventTracking::default(),
        }
    }

    /// Creates a null event: it fires at its delivery time, invokes the
    /// handler with `None`, and is consumed.
    pub(crate) fn null() -> Self {
        let mut event = Self::empty();
        event.null_delivery = true;
        event
    }

    /// True if this is a null event manufactured by a payload-less send.
    pub fn is_null(&self) -> bool {
        self.null_delivery
    }

    /// The ordering record.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// The absolute simulated time at which the event fires.
    pub fn delivery_time(&self) -> SimTime {
        self.schedule.delivery_time()
    }

    /// Sets the delivery time. The owning link calls this during `send`;
    /// producers may also pre-stamp events they insert into a queue
    /// directly.
    pub fn set_delivery_time(&mut self, time: SimTime) {
        self.schedule.set_delivery_time(time);
    }

    /// Stamps the order tag and delivery info for the next transfer step.
    /// Only the owning link calls this.
    pub(crate) fn set_delivery_info(&mut self, tag: LinkTag, info: DeliveryInfo) {
        self.schedule.set_order_tag(tag as u32);
        self.delivery_info = info;
    }

    /// How this event will be consumed.
    pub fn delivery_info(&self) -> &DeliveryInfo {
        &self.delivery_info
    }

    /// The payload, if any.
    pub fn data(&self) -> Option<&dyn EventData> {
        self.data.as_deref()
    }

    /// Downcasts the payload to a concrete type.
    pub fn data_as<T: 'static>(&self) -> Option<&T> {
        self.data.as_deref().and_then(|d| d.as_any().downcast_ref())
    }

    /// Consumes the event, returning its payload.
    pub fn into_data(self) -> Option<Box<dyn EventData>> {
        self.data
    }

    /// The unique id, if one has been assigned.
    pub fn id(&self) -> Option<EventId> {
        self.id
    }

    /// Assigns a unique id on first call and returns it; later calls return
    /// the same id.
    pub fn assign_unique_id(&mut self, rank: Rank) -> EventId {
        if let Some(id) = self.id {
            return id;
        }
        let id = Self::generate_unique_id(rank);
        self.id = Some(id);
        id
    }

    /// Generates an id unique across ranks, components and events.
    pub fn generate_unique_id(rank: Rank) -> EventId {
        let counter = ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
        if counter == u64::MAX {
            // Wrap would silently reuse ids and corrupt replay.
            panic!("event id counter exhausted");
        }
        EventId { counter, rank }
    }

    /// Clones the event for a broadcast. Fails unless the payload opts in
    /// via [`EventData::clone_data`]; the clone carries no id.
    pub fn try_clone(&self) -> CoreResult<Event> {
        let data = self
            .data
            .as_deref()
            .and_then(|data| data.clone_data())
            .ok_or(CoreError::CloneUnsupported)?;
        Ok(Event {
            schedule: self.schedule,
            delivery_info: self.delivery_info.clone(),
            id: None,
            data: Some(data),
            null_delivery: false,
            #[cfg(feature = "event-tracking")]
            tracking: self.tracking.clone(),
        })
    }

    /// Records the component an event was first sent from. Later calls are
    /// ignored; the origin of a forwarded event does not change.
    #[cfg(feature = "event-tracking")]
    pub fn add_send_component(&mut self, component: &str, component_type: &str, port: &str) {
        if self.tracking.first_component.is_empty() {
            self.tracking.first_component = component.to_string();
            self.tracking.first_type = component_type.to_string();
            self.tracking.first_port = port.to_string();
        }
    }

    /// Records the component an event was last received by.
    #[cfg(feature = "event-tracking")]
    pub fn add_recv_component(&mut self, component: &str, component_type: &str, port: &str) {
        self.tracking.last_component = component.to_string();
        self.tracking.last_type = component_type.to_string();
        self.tracking.last_port = port.to_string();
    }

    /// The recorded path metadata.
    #[cfg(feature = "event-tracking")]
    pub fn tracking(&self) -> &EventTracking {
        &self.tracking
    }
}

impl Activity for Event {
    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn schedule_mut(&mut self) -> &mut Schedule {
        &mut self.schedule
    }

    fn execute(self: Box<Self>) -> CoreResult<()> {
        match self.delivery_info.clone() {
            DeliveryInfo::Handler(handler) => {
                let event = if self.null_delivery { None } else { Some(*self) };
                handler.borrow_mut().handle(event);
                Ok(())
            }
            DeliveryInfo::None | DeliveryInfo::RemoteLink(_) => Err(CoreError::Undeliverable),
        }
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Recovers an [`Event`] from a popped activity, if it is one.
pub fn downcast_event(activity: Box<dyn Activity>) -> Option<Event> {
    activity.into_any().downcast::<Event>().ok().map(|boxed| *boxed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[derive(Debug)]
    struct Marker(u32);

    impl EventData for Marker {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug, Clone)]
    struct Broadcastable(String);

    impl EventData for Broadcastable {
        fn clone_data(&self) -> Option<Box<dyn EventData>> {
            Some(Box::new(self.clone()))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_default_priority_is_event_class() {
        let event = Event::new(Marker(1));
        assert_eq!(event.schedule().priority(), EVENT_PRIORITY);
    }

    #[test]
    fn test_payload_downcast() {
        let event = Event::new(Marker(7));
        assert_eq!(event.data_as::<Marker>().unwrap().0, 7);
        assert!(event.data_as::<Broadcastable>().is_none());
    }

    #[test]
    fn test_unique_ids_do_not_repeat() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(Event::generate_unique_id(0)));
        }
        // Same counter value on another rank is still a distinct id.
        let a = Event::generate_unique_id(0);
        let b = EventId { counter: a.counter, rank: 1 };
        assert_ne!(a, b);
    }

    #[test]
    fn test_assign_unique_id_is_stable() {
        let mut event = Event::empty();
        assert_eq!(event.id(), None);
        let id = event.assign_unique_id(3);
        assert_eq!(event.assign_unique_id(3), id);
        assert_eq!(event.id(), Some(id));
        assert_eq!(id.rank, 3);
    }

    #[test]
    fn test_no_id_sentinel() {
        assert_eq!(EventId::NO_ID.counter, 0);
        assert_eq!(EventId::NO_ID.rank, -1);
    }

    #[test]
    fn test_default_clone_fails_loudly() {
        let plain = Event::new(Marker(1));
        assert!(matches!(plain.try_clone(), Err(CoreError::CloneUnsupported)));

        let empty = Event::empty();
        assert!(matches!(empty.try_clone(), Err(CoreError::CloneUnsupported)));
    }

    #[test]
    fn test_opt_in_clone_succeeds() {
        let mut original = Event::new(Broadcastable("hello".to_string()));
        original.set_delivery_time(42);
        original.assign_unique_id(0);

        let copy = original.try_clone().unwrap();
        assert_eq!(copy.delivery_time(), 42);
        assert_eq!(copy.data_as::<Broadcastable>().unwrap().0, "hello");
        // The clone is a distinct event and carries no id.
        assert_eq!(copy.id(), None);
    }

    #[test]
    fn test_json_payload_clones() {
        let event = Event::new(serde_json::json!({"kind": "probe"}));
        let copy = event.try_clone().unwrap();
        assert_eq!(
            copy.data_as::<serde_json::Value>().unwrap()["kind"],
            "probe"
        );
    }

    #[test]
    fn test_execute_without_handler_is_undeliverable() {
        let event = Box::new(Event::new(Marker(1)));
        assert!(matches!(event.execute(), Err(CoreError::Undeliverable)));
    }

    #[test]
    fn test_execute_invokes_handler() {
        struct Recorder(Rc<RefCell<Vec<Option<u32>>>>);

        impl EventHandler for Recorder {
            fn handle(&mut self, event: Option<Event>) {
                self.0
                    .borrow_mut()
                    .push(event.map(|e| e.data_as::<Marker>().unwrap().0));
            }
        }

        let seen = Rc::new(RefCell::new(Vec::new()));
        let handler: HandlerRef = Rc::new(RefCell::new(Recorder(seen.clone())));

        let mut event = Event::new(Marker(9));
        event.set_delivery_info(4, DeliveryInfo::Handler(handler.clone()));
        Box::new(event).execute().unwrap();

        let mut null = Event::null();
        null.set_delivery_info(4, DeliveryInfo::Handler(handler));
        Box::new(null).execute().unwrap();

        assert_eq!(*seen.borrow(), vec![Some(9), None]);
    }

    #[test]
    fn test_delivery_info_stamps_order_tag() {
        let mut event = Event::empty();
        event.set_delivery_info(0x1_0000_0007, DeliveryInfo::None);
        // Only the low 32 bits of the tag land in the packed word.
        assert_eq!(event.schedule().order_tag(), 7);
        assert_eq!(event.schedule().priority(), EVENT_PRIORITY);
    }

    #[cfg(feature = "event-tracking")]
    #[test]
    fn test_tracking_keeps_first_sender() {
        let mut event = Event::empty();
        event.add_send_component("cpu0", "cpu", "out");
        event.add_recv_component("mem0", "mem", "in");
        event.add_send_component("router0", "router", "east");
        event.add_recv_component("mem1", "mem", "in");

        let tracking = event.tracking();
        assert_eq!(tracking.first_component, "cpu0");
        assert_eq!(tracking.last_component, "mem1");
    }

    #[test]
    fn test_downcast_event() {
        let event: Box<dyn Activity> = Box::new(Event::new(Marker(5)));
        let recovered = downcast_event(event).unwrap();
        assert_eq!(recovered.data_as::<Marker>().unwrap().0, 5);
    }
}
