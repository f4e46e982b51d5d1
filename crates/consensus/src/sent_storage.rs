//! Durable log of the local node's own sent messages.

use accord_messages::ConsensusMessage;
use accord_storage::{keys, KeyValueStore, StorageError};
use accord_types::RoundStep;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One logged sent message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentEntry {
    /// Round the message was sent in.
    pub round: u64,
    /// Step the message was sent from.
    pub step: RoundStep,
    /// The signed envelope as broadcast.
    pub message: ConsensusMessage,
}

/// Ordered per-height log of every message this node has sent.
///
/// Feeds the catch-up protocol: a node that restarted mid-round replays its
/// own last vote from here instead of equivocating with a fresh one, and a
/// stuck peer's missing-vote request is answered from the same log.
///
/// Entries within a height are kept sorted by (round, step) regardless of
/// insertion order. Each append is mirrored to the key-value store under the
/// sent-message namespace; persistence is best effort — a write failure is
/// logged and the in-memory log keeps working (liveness aid, not a safety
/// log).
///
/// Shared between the engine and the runner, hence the internal lock.
pub struct SentMessageStorage {
    entries: Mutex<BTreeMap<u64, Vec<SentEntry>>>,
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for SentMessageStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentMessageStorage")
            .field("heights", &self.entries.lock().len())
            .finish()
    }
}

impl SentMessageStorage {
    /// Create a log backed by `store`, reloading any entries a previous run
    /// persisted.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let storage = Self {
            entries: Mutex::new(BTreeMap::new()),
            store,
        };
        if let Err(error) = storage.reload() {
            warn!(%error, "failed to reload sent-message log, starting empty");
        }
        storage
    }

    fn reload(&self) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        for (key, value) in self.store.scan_prefix(keys::SENT_MESSAGE_PREFIX)? {
            let suffix = &key[keys::SENT_MESSAGE_PREFIX.len()..];
            if suffix.len() < 8 {
                continue;
            }
            let mut height_bytes = [0u8; 8];
            height_bytes.copy_from_slice(&suffix[..8]);
            let height = u64::from_be_bytes(height_bytes);
            let entry: SentEntry = match serde_json::from_slice(&value) {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(height, %error, "skipping undecodable sent-message entry");
                    continue;
                }
            };
            let log = entries.entry(height).or_default();
            let at = log
                .partition_point(|e| (e.round, e.step) <= (entry.round, entry.step));
            log.insert(at, entry);
        }
        Ok(())
    }

    /// Append a sent message for (height, round, step), keeping the height's
    /// log sorted by (round, step).
    pub fn record(&self, height: u64, round: u64, step: RoundStep, message: ConsensusMessage) {
        let entry = SentEntry {
            round,
            step,
            message,
        };

        if let Ok(encoded) = serde_json::to_vec(&entry) {
            let key = keys::sent_message_key(height, step, round);
            if let Err(error) = self.store.put(&key, &encoded) {
                warn!(height, round, %step, %error, "failed to persist sent message");
            }
        }

        let mut entries = self.entries.lock();
        let log = entries.entry(height).or_default();
        let at = log.partition_point(|e| (e.round, e.step) <= (entry.round, entry.step));
        log.insert(at, entry);
    }

    /// Index of the first entry at or after (round, step) in the height's
    /// (round, step)-sorted log.
    pub fn lookup(&self, height: u64, round: u64, step: RoundStep) -> Option<usize> {
        let entries = self.entries.lock();
        let log = entries.get(&height)?;
        let at = log.partition_point(|e| (e.round, e.step) < (round, step));
        (at < log.len()).then_some(at)
    }

    /// The most recently recorded message for exactly (height, round, step).
    pub fn last_sent(
        &self,
        height: u64,
        round: u64,
        step: RoundStep,
    ) -> Option<ConsensusMessage> {
        let entries = self.entries.lock();
        let log = entries.get(&height)?;
        log.iter()
            .rev()
            .find(|e| e.round == round && e.step == step)
            .map(|e| e.message.clone())
    }

    /// All logged entries for a height, in (round, step) order.
    pub fn entries_for(&self, height: u64) -> Vec<SentEntry> {
        self.entries.lock().get(&height).cloned().unwrap_or_default()
    }

    /// Drop every entry logged at or below `height`, in memory and on disk.
    ///
    /// Called after a height finalizes to bound log growth.
    pub fn truncate(&self, height: u64) {
        let mut entries = self.entries.lock();
        let drop_heights: Vec<u64> = entries.range(..=height).map(|(h, _)| *h).collect();
        for h in drop_heights {
            if let Some(log) = entries.remove(&h) {
                debug!(height = h, entries = log.len(), "truncating sent-message log");
            }
            match self.store.scan_prefix(&keys::sent_message_height_prefix(h)) {
                Ok(persisted) => {
                    for (key, _) in persisted {
                        if let Err(error) = self.store.delete(&key) {
                            warn!(height = h, %error, "failed to delete sent-message entry");
                        }
                    }
                }
                Err(error) => {
                    warn!(height = h, %error, "failed to scan sent-message entries");
                }
            }
        }
    }
}
