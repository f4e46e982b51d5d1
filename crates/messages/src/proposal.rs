//! Block proposal payload.

use accord_types::{Block, View};
use serde::{Deserialize, Serialize};

/// A proposed block for a (height, round).
///
/// `pol_round` (proof-of-lock round) is set when the proposer re-proposes a
/// block it locked in an earlier round; it names the round whose prevote
/// quorum justifies the re-proposal. `None` means a fresh proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Height and round the block is proposed for.
    pub view: View,
    /// The proposed block.
    pub block: Block,
    /// Round whose prevote quorum locks this block, if re-proposed.
    pub pol_round: Option<u64>,
}

impl Proposal {
    /// Create a fresh proposal with no proof-of-lock.
    pub fn new(view: View, block: Block) -> Self {
        Self {
            view,
            block,
            pol_round: None,
        }
    }

    /// Create a re-proposal justified by a prevote quorum at `pol_round`.
    pub fn with_pol(view: View, block: Block, pol_round: u64) -> Self {
        Self {
            view,
            block,
            pol_round: Some(pol_round),
        }
    }
}
