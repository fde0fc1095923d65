//! Error definitions for the scheduling substrate.
//!
//! Every error in this module is a programming error: the core never
//! recovers from any of them, because deterministic replay precludes silent
//! fallbacks. Callers decide whether to abort or surface the message.

use thiserror::Error;

use crate::link::{LinkKind, LinkMode};
use crate::types::SimTime;

/// Errors reported by links, queues and the scheduler.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An operation was attempted in a link phase that forbids it, e.g. a
    /// timed `send` during `Init` or an untimed send during `Run`.
    #[error("cannot call {op} while the link is in the {mode:?} phase")]
    PhaseViolation { op: &'static str, mode: LinkMode },

    /// An operation was attempted on a link kind that forbids it, e.g.
    /// `recv` on a handler link or `set_functor` on a polling link.
    #[error("cannot call {op} on a {kind:?} link")]
    KindViolation { op: &'static str, kind: LinkKind },

    /// A broadcast clone was requested for an event whose payload does not
    /// opt in to cloning.
    #[error("event payload does not support cloning for broadcast")]
    CloneUnsupported,

    /// An activity was scheduled in the past relative to the queue's notion
    /// of "now" (the simulated clock, or the untimed phase counter).
    #[error("activity scheduled at {delivery_time} is before the current time {now}")]
    SchedulingViolation { delivery_time: SimTime, now: SimTime },

    /// The opposite half of a link pair has been dropped.
    #[error("link '{link}' has no live pair")]
    StalePair { link: String },

    /// A link reached the run phase without a send queue wired in.
    #[error("link '{link}' has no send queue wired")]
    UnwiredQueue { link: String },

    /// An event fired without a local delivery handler. Events staged for
    /// cross-rank transport are drained by the sync manager and must never
    /// reach a local execute.
    #[error("event executed without a local delivery handler")]
    Undeliverable,

    /// A time string could not be parsed into cycles.
    #[error("unrecognized time '{0}' (expected forms like \"1ns\", \"10us\")")]
    UnknownTimeUnit(String),

    /// A time value was finer than the core timebase and cannot be
    /// represented as a whole number of core cycles.
    #[error("time '{unit}' does not divide into the core timebase")]
    TimeResolution { unit: String },

    /// A time value overflowed the cycle representation.
    #[error("time '{0}' is out of range")]
    TimeOutOfRange(String),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
