//! Buffer for messages that arrived ahead of the local view.

use accord_messages::ConsensusMessage;
use accord_types::View;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::debug;

/// Holds verified envelopes whose view is ahead of the local node, ordered so
/// the earliest view drains first.
///
/// Entries are popped back into processing once the local view catches up.
/// Capacity is bounded; when full, new future messages are dropped — the
/// catch-up protocol recovers anything that mattered.
#[derive(Debug, Default)]
pub struct FutureMessageBacklog {
    heap: BinaryHeap<Reverse<BacklogEntry>>,
    capacity: usize,
    seq: u64,
}

#[derive(Debug)]
struct BacklogEntry {
    view: View,
    seq: u64,
    message: ConsensusMessage,
}

impl PartialEq for BacklogEntry {
    fn eq(&self, other: &Self) -> bool {
        self.view == other.view && self.seq == other.seq
    }
}

impl Eq for BacklogEntry {}

impl PartialOrd for BacklogEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BacklogEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // seq breaks ties so same-view messages drain in arrival order
        (self.view, self.seq).cmp(&(other.view, other.seq))
    }
}

impl FutureMessageBacklog {
    /// Create a backlog holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            capacity,
            seq: 0,
        }
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the backlog is empty.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Buffer a message tagged with the view it belongs to.
    ///
    /// Dropped silently when the backlog is at capacity.
    pub fn push(&mut self, view: View, message: ConsensusMessage) {
        if self.heap.len() >= self.capacity {
            debug!(%view, capacity = self.capacity, "backlog full, dropping future message");
            return;
        }
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(Reverse(BacklogEntry { view, seq, message }));
    }

    /// Pop every buffered message whose view is now at or behind `current`,
    /// earliest view first.
    pub fn drain_due(&mut self, current: View) -> Vec<ConsensusMessage> {
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.view > current {
                break;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            due.push(entry.message);
        }
        due
    }
}
