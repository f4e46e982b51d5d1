//! Conflicting-vote evidence.

use crate::ConsensusMessage;
use accord_types::Address;
use serde::{Deserialize, Serialize};

/// Proof that a validator cast two votes for different block hashes in the
/// same (height, round, step).
///
/// Both envelopes carry the offender's signature, so the fault is provable to
/// any third party. The consensus core only detects and surfaces evidence;
/// slashing consumers are external.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictingVoteEvidence {
    /// The equivocating validator.
    pub offender: Address,
    /// The vote recorded first.
    pub first: ConsensusMessage,
    /// The conflicting vote that arrived later.
    pub second: ConsensusMessage,
}
