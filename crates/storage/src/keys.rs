//! Key namespaces owned by the consensus core.
//!
//! The exact byte layout of values is an implementation detail; the key
//! namespaces below are the stable contract with operators and tooling.

use accord_types::{Hash, RoundStep};

/// Namespace prefix for governance snapshots.
pub const SNAPSHOT_PREFIX: &[u8] = b"tendermint-snapshot";

/// Namespace prefix for sent-message-storage entries.
pub const SENT_MESSAGE_PREFIX: &[u8] = b"tendermint-rsh-";

/// Key for the snapshot at a block hash: `"tendermint-snapshot" || hash`.
pub fn snapshot_key(block_hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(SNAPSHOT_PREFIX.len() + Hash::BYTES);
    key.extend_from_slice(SNAPSHOT_PREFIX);
    key.extend_from_slice(block_hash.as_bytes());
    key
}

/// Key for a sent message: `"tendermint-rsh-" || height || step || round`.
///
/// Height, step, and round are big-endian so that lexicographic key order
/// matches numeric order and a height's entries share one scannable prefix.
pub fn sent_message_key(height: u64, step: RoundStep, round: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(SENT_MESSAGE_PREFIX.len() + 8 + 1 + 8);
    key.extend_from_slice(SENT_MESSAGE_PREFIX);
    key.extend_from_slice(&height.to_be_bytes());
    key.push(step as u8);
    key.extend_from_slice(&round.to_be_bytes());
    key
}

/// Prefix covering every sent message stored for a height.
pub fn sent_message_height_prefix(height: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(SENT_MESSAGE_PREFIX.len() + 8);
    key.extend_from_slice(SENT_MESSAGE_PREFIX);
    key.extend_from_slice(&height.to_be_bytes());
    key
}
