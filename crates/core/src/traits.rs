//! Core traits for the consensus engine and its external seams.

use crate::{Action, Event};
use accord_messages::Proposal;
use accord_types::ValidatorSet;
use std::time::Duration;

/// A state machine that processes events.
///
/// This is the core abstraction for the consensus architecture. All
/// consensus logic is implemented as a state machine that:
///
/// - **Synchronous**: No async, no `.await`
/// - **Deterministic**: Same state + event = same actions
/// - **Pure-ish**: Mutates self, but performs no I/O
pub trait StateMachine {
    /// Process an event, returning actions to perform.
    ///
    /// Never blocks; all I/O happens in the runner via the returned actions.
    fn handle(&mut self, event: Event) -> Vec<Action>;

    /// Set the current time.
    ///
    /// Called by the runner before each `handle()` call. Time is an explicit
    /// dependency so tests can drive the clock deterministically.
    fn set_time(&mut self, now: Duration);

    /// Get the time last set via `set_time()`.
    fn now(&self) -> Duration;
}

/// Typed outcome of proposal verification.
///
/// The consensus core uses the variant to decide whether to wait (future
/// block), ignore the message (not from the proposer), or advance the round
/// (anything else).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// The block builds on a height the local chain has not reached yet;
    /// buffer the proposal and retry once caught up.
    #[error("block at height {height} is ahead of the local chain")]
    FutureBlock { height: u64 },

    /// The envelope is not a verified message from the view's proposer.
    #[error("proposal not from the view's proposer")]
    NotFromProposer,

    /// Payload does not match the header (tx-hash mismatch, bad root).
    #[error("invalid block body: {0}")]
    InvalidBody(String),

    /// Header fails chain rules (parent hash, timestamp, proposer seal).
    #[error("invalid block header: {0}")]
    InvalidHeader(String),
}

/// Delegated verification of proposed blocks.
///
/// Implemented by the external chain + transaction-pool layer. The consensus
/// core calls this exactly once per accepted proposal before prevoting on it.
pub trait ProposalVerifier: Send + Sync {
    /// Verify a proposal's block against chain rules.
    fn verify(&self, proposal: &Proposal) -> Result<(), VerifyError>;
}

/// Source of the active validator set per height.
///
/// Backed by the governance snapshot layer in production and by fixed
/// committees in tests.
pub trait ValidatorSource: Send + Sync {
    /// The validator set in force at `height`.
    fn validators(&self, height: u64) -> ValidatorSet;
}
