//! Catch-up request and reply payloads.
//!
//! A node stuck in Prevote or Precommit across repeated timeout retries asks
//! the validators it is missing votes from to re-send them. The reply carries
//! complete signed envelopes, which the receiver replays through its normal
//! message-handling path as if freshly received.

use crate::ConsensusMessage;
use accord_types::RoundStep;
use serde::{Deserialize, Serialize};

/// Request for the votes a peer holds at a (height, round, step).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchUpRequest {
    /// Height the requester is stuck at.
    pub height: u64,
    /// Round the requester is stuck at.
    pub round: u64,
    /// Step whose votes are requested (Prevote or Precommit).
    pub step: RoundStep,
}

/// Reply carrying all votes the responder holds for the requested round/step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchUpReply {
    /// Height the payloads belong to.
    pub height: u64,
    /// Complete signed envelopes, replayable through normal handling.
    pub messages: Vec<ConsensusMessage>,
}
