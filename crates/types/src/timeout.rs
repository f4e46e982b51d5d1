//! Scheduled timeout descriptor and its total order.

use crate::RoundStep;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A scheduled (or fired) consensus timeout.
///
/// The ticker keeps at most one outstanding timeout; a newly requested
/// timeout only takes effect when it is strictly later than the armed one
/// under the lexicographic (height, round, step, retry) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutInfo {
    /// How long to wait before firing.
    pub duration: Duration,
    /// Height the timeout belongs to.
    pub height: u64,
    /// Round the timeout belongs to.
    pub round: u64,
    /// Step the timeout drives out of.
    pub step: RoundStep,
    /// Retry counter for repeated timeouts at the same (height, round, step).
    pub retry: u32,
}

impl TimeoutInfo {
    /// Create a new timeout descriptor.
    pub fn new(duration: Duration, height: u64, round: u64, step: RoundStep, retry: u32) -> Self {
        Self {
            duration,
            height,
            round,
            step,
            retry,
        }
    }

    /// Lexicographic position key: (height, round, step, retry).
    fn order_key(&self) -> (u64, u64, RoundStep, u32) {
        (self.height, self.round, self.step, self.retry)
    }

    /// Whether `self` is at or before `other` in the protocol order.
    ///
    /// Duration is deliberately not part of the order; only the protocol
    /// position decides preemption.
    pub fn earlier_or_equal(&self, other: &TimeoutInfo) -> bool {
        self.order_key() <= other.order_key()
    }
}

impl fmt::Display for TimeoutInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "timeout({}/{}/{} retry={} after {:?})",
            self.height, self.round, self.step, self.retry, self.duration
        )
    }
}
