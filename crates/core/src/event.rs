//! Event types for the deterministic state machine.

use accord_messages::ConsensusMessage;
use accord_types::{Block, TimeoutInfo};

/// All possible events the consensus engine can receive.
///
/// Events are **passive data** — they describe something that happened.
/// The state machine processes events and returns actions.
#[derive(Debug, Clone)]
pub enum Event {
    /// A signed envelope arrived from the network (or was replayed from a
    /// catch-up reply).
    ///
    /// Sender identity comes from the envelope signature, verified against
    /// the active validator set — never from the claimed address alone.
    MessageReceived { message: ConsensusMessage },

    /// A scheduled timeout fired.
    TimeoutFired { info: TimeoutInfo },

    /// The block-assembly layer requests that this block be proposed when the
    /// local node is next the proposer at the block's height.
    BlockProposalRequest { block: Block },
}

impl Event {
    /// Get a human-readable name for this event type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::MessageReceived { .. } => "MessageReceived",
            Event::TimeoutFired { .. } => "TimeoutFired",
            Event::BlockProposalRequest { .. } => "BlockProposalRequest",
        }
    }
}
