//! Network messages for the consensus protocol.

mod catch_up;
mod envelope;
mod evidence;
mod proposal;
mod vote;

pub use catch_up::{CatchUpReply, CatchUpRequest};
pub use envelope::{ConsensusMessage, EnvelopeError, MessageCode};
pub use evidence::ConflictingVoteEvidence;
pub use proposal::Proposal;
pub use vote::Vote;
