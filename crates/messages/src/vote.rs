//! Prevote and precommit payloads.

use accord_types::{Hash, Signature, View};
use serde::{Deserialize, Serialize};

/// A vote cast in a prevote or precommit step.
///
/// `block_hash` of `None` is a nil vote: "I saw no acceptable proposal this
/// round". Precommits for a concrete block carry a commit seal — a signature
/// over the commit message ([`accord_types::signing::commit_seal_message`])
/// that is attached to the finalized header.
///
/// A validator may cast at most one vote per (height, round, step); a second
/// vote for a different block hash is a provable conflicting-vote fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Height and round the vote belongs to.
    pub view: View,
    /// Voted block hash, `None` for a nil vote.
    pub block_hash: Option<Hash>,
    /// Commit seal; present only on precommits for a concrete block.
    pub seal: Option<Signature>,
}

impl Vote {
    /// A nil vote for the given view.
    pub fn nil(view: View) -> Self {
        Self {
            view,
            block_hash: None,
            seal: None,
        }
    }

    /// A prevote for a block (no seal).
    pub fn prevote(view: View, block_hash: Hash) -> Self {
        Self {
            view,
            block_hash: Some(block_hash),
            seal: None,
        }
    }

    /// A precommit for a block with its commit seal.
    pub fn precommit(view: View, block_hash: Hash, seal: Signature) -> Self {
        Self {
            view,
            block_hash: Some(block_hash),
            seal: Some(seal),
        }
    }

    /// Whether this is a nil vote.
    pub fn is_nil(&self) -> bool {
        self.block_hash.is_none()
    }
}
