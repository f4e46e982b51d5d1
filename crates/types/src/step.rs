//! Round step enumeration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase within a consensus round.
///
/// Strictly increasing within a round; entering a new round or height resets
/// the step to `NewRound` / `NewHeight`. The discriminant order is load-bearing:
/// it defines both the in-round progression and the timeout total order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum RoundStep {
    /// Waiting out the commit delay before starting round 0 of a new height.
    NewHeight = 1,
    /// A round has been entered but propose has not started.
    NewRound = 2,
    /// Waiting for (or broadcasting) the proposal.
    Propose = 3,
    /// Prevote cast, collecting prevotes.
    Prevote = 4,
    /// Saw 2/3 of any prevotes, waiting briefly for a majority to emerge.
    PrevoteWait = 5,
    /// Precommit cast, collecting precommits.
    Precommit = 6,
    /// Saw 2/3 of any precommits, waiting briefly for a majority to emerge.
    PrecommitWait = 7,
    /// Precommit majority seen, committing the block.
    Commit = 8,
}

impl RoundStep {
    /// Short name used in logs and storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStep::NewHeight => "new_height",
            RoundStep::NewRound => "new_round",
            RoundStep::Propose => "propose",
            RoundStep::Prevote => "prevote",
            RoundStep::PrevoteWait => "prevote_wait",
            RoundStep::Precommit => "precommit",
            RoundStep::PrecommitWait => "precommit_wait",
            RoundStep::Commit => "commit",
        }
    }
}

impl fmt::Display for RoundStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
