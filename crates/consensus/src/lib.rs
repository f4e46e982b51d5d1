//! Round-based BFT consensus state machine.
//!
//! This crate provides a synchronous, Tendermint-style consensus
//! implementation driving validators through
//! Propose → Prevote → Precommit → Commit cycles.
//!
//! # Architecture
//!
//! The state machine processes events synchronously:
//!
//! - `Event::TimeoutFired` → advance out of a stalled step, or escalate to
//!   catch-up when stuck at the same (height, round, step)
//! - `Event::MessageReceived` → verify the envelope, tally votes, detect
//!   quorums, and drive round transitions
//! - `Event::BlockProposalRequest` → block injected by the assembly layer,
//!   proposed when this node is next the proposer
//!
//! All I/O is performed by the runner via returned `Action`s.
//!
//! # Terminology
//!
//! - **Height**: block number being agreed upon. Strictly sequential.
//!
//! - **Round**: attempt number within a height. Increases when a round fails
//!   to reach a precommit quorum in time.
//!
//! - **Step**: phase within a round (Propose/Prevote/Precommit/...), strictly
//!   increasing within a round.
//!
//! - **POL (proof-of-lock)**: a 2f+1 prevote quorum justifying a proposer
//!   re-proposing a block it locked in an earlier round.
//!
//! # Safety
//!
//! - **Vote locking**: once a validator precommits block B at (H, R), it
//!   prevotes only B in later rounds of H until a later nil prevote quorum
//!   unlocks it.
//!
//! - **Quorum intersection**: any two quorums of 2f+1 overlap in at least one
//!   honest validator, so conflicting blocks cannot both reach a precommit
//!   majority.
//!
//! - **Conflicting votes**: a second vote from the same validator for a
//!   different hash in the same (height, round, step) is rejected, the first
//!   tally is preserved, and signed evidence is surfaced to the runner.
//!
//! # Liveness
//!
//! - **Timeout-driven rounds**: every step schedules a timeout; a round that
//!   stalls advances to round R+1 with a backed-off proposer rotation.
//!
//! - **Catch-up**: a node stuck at the same (height, round, step) across
//!   repeated timeout retries asks the validators it is missing votes from to
//!   re-send them, and replays its own logged messages when it is the one
//!   missing (post-restart recovery).

mod backlog;
mod config;
mod errors;
mod message_set;
mod round_state;
mod sent_storage;
mod state;

pub use backlog::FutureMessageBacklog;
pub use config::ConsensusConfig;
pub use errors::{ConsensusError, VoteError};
pub use message_set::MessageSet;
pub use round_state::RoundState;
pub use sent_storage::{SentEntry, SentMessageStorage};
pub use state::ConsensusState;
