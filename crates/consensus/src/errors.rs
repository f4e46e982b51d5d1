//! Error taxonomy for the consensus engine.

use accord_messages::MessageCode;
use accord_types::Address;

/// Errors from vote aggregation in a [`MessageSet`](crate::MessageSet).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoteError {
    /// Message code does not match the set's code.
    #[error("message code {got} does not match set code {expected}")]
    CodeMismatch {
        expected: MessageCode,
        got: MessageCode,
    },

    /// Signer is not a member of the set's validator set.
    #[error("vote from {0}: not an active validator")]
    InvalidValidatorAddress(Address),

    /// Vote height does not match the set's view.
    #[error("vote height {got} does not match view height {expected}")]
    HeightMismatch { expected: u64, got: u64 },

    /// Vote round does not match the set's view.
    #[error("vote round {got} does not match view round {expected}")]
    RoundMismatch { expected: u64, got: u64 },

    /// The validator already voted for a different block hash in this
    /// (height, round, step) — a provable Byzantine fault.
    #[error("conflicting votes from {address}")]
    ConflictingVotes { address: Address },
}

/// Engine-level errors surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsensusError {
    /// `start()` called on a running engine.
    #[error("consensus engine already started")]
    AlreadyStarted,

    /// `stop()` (or an operation requiring a running engine) called on a
    /// stopped engine.
    #[error("consensus engine not started")]
    NotStarted,

    /// Finalization attempted without a 2f+1 precommit quorum on the block.
    /// Not fatal to the node — the round retries via timeouts.
    #[error("not enough precommits: got {got}, need {needed}")]
    InsufficientPrecommits { got: usize, needed: usize },
}
