//! Protocol view: the (height, round) pair.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A unique point in the consensus protocol.
///
/// Totally ordered by (height, round): all rounds of height H sort before
/// round 0 of height H+1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct View {
    /// Block height being agreed upon.
    pub height: u64,
    /// Attempt number within the height.
    pub round: u64,
}

impl View {
    /// Create a new view.
    pub fn new(height: u64, round: u64) -> Self {
        Self { height, round }
    }

    /// The view for the next round at the same height.
    pub fn next_round(self) -> Self {
        Self {
            height: self.height,
            round: self.round + 1,
        }
    }

    /// The view for round 0 of the next height.
    pub fn next_height(self) -> Self {
        Self {
            height: self.height + 1,
            round: 0,
        }
    }
}

impl Ord for View {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.height, self.round).cmp(&(other.height, other.round))
    }
}

impl PartialOrd for View {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.height, self.round)
    }
}
