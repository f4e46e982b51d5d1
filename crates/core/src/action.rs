//! Action types for the deterministic state machine.

use crate::Event;
use accord_messages::{ConflictingVoteEvidence, ConsensusMessage};
use accord_types::{Address, Block, TimeoutInfo};

/// Actions the state machine wants to perform.
///
/// Actions are **commands** — they describe something to do. The runner
/// executes actions and may convert results back into events.
#[derive(Debug, Clone)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// Broadcast a signed envelope to every validator in the active set.
    Broadcast { message: ConsensusMessage },

    /// Gossip a signed envelope to the local node's ring neighbors only,
    /// bounding fan-out to O(1) per node.
    Gossip {
        neighbors: Vec<Address>,
        message: ConsensusMessage,
    },

    /// Send a signed envelope to an explicit subset of validators.
    Multicast {
        targets: Vec<Address>,
        message: ConsensusMessage,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Arm the single consensus timeout.
    ///
    /// The ticker only honors this when `info` is at or after the currently
    /// armed timeout in protocol order; stale requests are silently dropped.
    ScheduleTimeout { info: TimeoutInfo },

    // ═══════════════════════════════════════════════════════════════════════
    // Chain
    // ═══════════════════════════════════════════════════════════════════════
    /// Hand a finalized block (committed seals attached) to the external
    /// chain layer for execution and storage.
    CommitBlock { block: Block },

    // ═══════════════════════════════════════════════════════════════════════
    // Internal (fed back as events with Internal priority)
    // ═══════════════════════════════════════════════════════════════════════
    /// Enqueue an internal event for processing before external inputs.
    EnqueueInternal { event: Box<Event> },

    // ═══════════════════════════════════════════════════════════════════════
    // Faults
    // ═══════════════════════════════════════════════════════════════════════
    /// Surface provable conflicting-vote evidence. Slashing consumers are
    /// external; the runner decides where evidence goes.
    ReportEvidence { evidence: ConflictingVoteEvidence },
}

impl Action {
    /// Get a human-readable name for this action type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Broadcast { .. } => "Broadcast",
            Action::Gossip { .. } => "Gossip",
            Action::Multicast { .. } => "Multicast",
            Action::ScheduleTimeout { .. } => "ScheduleTimeout",
            Action::CommitBlock { .. } => "CommitBlock",
            Action::EnqueueInternal { .. } => "EnqueueInternal",
            Action::ReportEvidence { .. } => "ReportEvidence",
        }
    }
}
