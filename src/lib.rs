//! # Parsim
//!
//! The event-scheduling substrate of a parallel discrete-event simulation
//! framework: timestamped activities delivered between components over
//! paired links, in a total order that replays identically across runs and
//! ranks.
//!
//! ## Architecture
//!
//! - **Activities** carry a three-level sort key (delivery time, packed
//!   priority/order-tag word, per-queue insertion counter) that forms a
//!   strict total order.
//! - **Events** are activities with delivery information (handler or remote
//!   route), a payload, and an on-demand globally unique id.
//! - **Queues** come in three flavors behind one contract: the per-rank
//!   [`TimeVortex`] heap, the clock-gated [`PollingLinkQueue`] FIFO, and the
//!   phase-keyed [`InitQueue`] for untimed data.
//! - **Links** are paired directional channels. Their kind (handler, poll,
//!   sync) decides how the receiving side consumes events; their mode
//!   (init, run, complete) gates which operations are legal.
//! - **The untimed driver** runs the barrier-synchronized init/complete
//!   exchanges until quiescence.
//!
//! Each rank is serial: one scheduler thread owns the rank's clock and
//! vortex. Cross-rank traffic funnels through sync links staged for an
//! external sync manager. The only process-wide shared state is the event
//! id counter.

pub mod activity;
pub mod error;
pub mod event;
pub mod link;
pub mod profile;
pub mod queue;
pub mod sim;
pub mod time;
pub mod types;
pub mod untimed;

// Re-export commonly used types
pub use activity::{compare, greater, less, Activity, Schedule};
pub use error::{CoreError, CoreResult};
pub use event::{
    downcast_event, DeliveryInfo, Event, EventData, EventHandler, EventId, HandlerRef,
};
#[cfg(feature = "event-tracking")]
pub use event::EventTracking;
pub use link::{Link, LinkKind, LinkMode};
pub use profile::{EventProfileTool, HandlerMetadata, ProfileToolRef};
pub use queue::{ActivityQueue, InitQueue, PollingLinkQueue, QueueRef, TimeVortex};
pub use sim::{SchedulerStats, SimClock, Simulation, UntimedCounters};
pub use time::{TimeConverter, TimeLord};
pub use types::{link_tag_for_name, LinkTag, Rank, SimTime};
pub use untimed::{QuiescenceBarrier, SingleRank, ThreadedBarrier, UntimedPhaseDriver};
