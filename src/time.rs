//! Time services: mapping unit strings to core-cycle factors.
//!
//! Each rank's clock counts core cycles. The [`TimeLord`] resolves strings
//! like `"1ns"` or `"10us"` into the number of core cycles they span, and
//! hands out [`TimeConverter`]s so hot paths can skip repeated string
//! parsing.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
use crate::types::SimTime;

// Everything is normalized through femtoseconds, the finest supported unit.
const FEMTOS_PER: &[(&str, u128)] = &[
    ("s", 1_000_000_000_000_000),
    ("ms", 1_000_000_000_000),
    ("us", 1_000_000_000),
    ("ns", 1_000_000),
    ("ps", 1_000),
    ("fs", 1),
];

/// A pre-resolved conversion factor between a user timebase and core cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeConverter {
    factor: SimTime,
}

impl TimeConverter {
    /// Wraps a raw factor. Factor zero means "no timebase"; links treat it
    /// as unconfigured.
    pub fn new(factor: SimTime) -> Self {
        Self { factor }
    }

    /// Core cycles per unit of this timebase.
    pub fn factor(&self) -> SimTime {
        self.factor
    }

    /// Converts a cycle count in this timebase to core cycles.
    pub fn convert_to_core_time(&self, cycles: SimTime) -> SimTime {
        cycles * self.factor
    }

    /// Converts core cycles to whole cycles of this timebase, rounding down.
    pub fn convert_from_core_time(&self, core_cycles: SimTime) -> SimTime {
        core_cycles / self.factor
    }
}

/// Resolves time strings against the core timebase.
#[derive(Debug)]
pub struct TimeLord {
    core_femtos: u128,
    cache: RefCell<HashMap<String, SimTime>>,
}

impl TimeLord {
    /// Creates a time lord whose core timebase is the given time string,
    /// e.g. `"1ns"`.
    pub fn new(core_timebase: &str) -> CoreResult<Self> {
        Ok(Self {
            core_femtos: parse_femtos(core_timebase)?,
            cache: RefCell::new(HashMap::new()),
        })
    }

    /// Number of core cycles spanned by the given time string.
    pub fn sim_cycles(&self, time: &str) -> CoreResult<SimTime> {
        if let Some(&factor) = self.cache.borrow().get(time) {
            return Ok(factor);
        }

        let femtos = parse_femtos(time)?;
        if femtos % self.core_femtos != 0 {
            return Err(CoreError::TimeResolution { unit: time.to_string() });
        }
        let factor = SimTime::try_from(femtos / self.core_femtos)
            .map_err(|_| CoreError::TimeOutOfRange(time.to_string()))?;

        self.cache.borrow_mut().insert(time.to_string(), factor);
        Ok(factor)
    }

    /// A converter for the given time string.
    pub fn time_converter(&self, time: &str) -> CoreResult<TimeConverter> {
        Ok(TimeConverter::new(self.sim_cycles(time)?))
    }
}

fn parse_femtos(time: &str) -> CoreResult<u128> {
    let time = time.trim();
    let digits_end = time
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(time.len());
    let (digits, unit) = time.split_at(digits_end);

    let value: u128 = digits
        .parse()
        .map_err(|_| CoreError::UnknownTimeUnit(time.to_string()))?;
    if value == 0 {
        return Err(CoreError::UnknownTimeUnit(time.to_string()));
    }

    let scale = FEMTOS_PER
        .iter()
        .find(|(suffix, _)| *suffix == unit.trim())
        .map(|(_, scale)| *scale)
        .ok_or_else(|| CoreError::UnknownTimeUnit(time.to_string()))?;

    value
        .checked_mul(scale)
        .ok_or_else(|| CoreError::TimeOutOfRange(time.to_string()))
}
