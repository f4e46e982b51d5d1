//! Domain-separated signing for consensus messages.
//!
//! Every signed artifact in the protocol has a unique domain tag prefix, so a
//! signature produced in one context can never be replayed in another.
//!
//! | Tag | Purpose |
//! |-----|---------|
//! | `consensus_msg:` | Message envelopes (propose/prevote/precommit/catch-up) |
//! | `commit_seal:` | Committed seals carried in finalized block headers |
//! | `header_seal:` | Proposer seal over a block header |

use crate::Hash;

/// Domain tag for message envelopes.
///
/// Format: `consensus_msg:` || code || payload
pub const DOMAIN_CONSENSUS_MESSAGE: &[u8] = b"consensus_msg:";

/// Domain tag for commit seals.
///
/// Format: `commit_seal:` || height || block_hash
pub const DOMAIN_COMMIT_SEAL: &[u8] = b"commit_seal:";

/// Domain tag for header seals.
///
/// Format: `header_seal:` || header_hash
pub const DOMAIN_HEADER_SEAL: &[u8] = b"header_seal:";

/// Build the signing message for an envelope.
///
/// The signature covers the envelope minus the signature field itself: the
/// message code byte and the serialized payload.
pub fn envelope_message(code: u8, payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(DOMAIN_CONSENSUS_MESSAGE.len() + 1 + payload.len());
    message.extend_from_slice(DOMAIN_CONSENSUS_MESSAGE);
    message.push(code);
    message.extend_from_slice(payload);
    message
}

/// Build the signing message for a commit seal.
///
/// This is what precommit seals sign and what `finalize_block` verifies when
/// attaching committed seals to a header.
pub fn commit_seal_message(height: u64, block_hash: &Hash) -> Vec<u8> {
    let mut message = Vec::with_capacity(DOMAIN_COMMIT_SEAL.len() + 8 + Hash::BYTES);
    message.extend_from_slice(DOMAIN_COMMIT_SEAL);
    message.extend_from_slice(&height.to_le_bytes());
    message.extend_from_slice(block_hash.as_bytes());
    message
}

/// Build the signing message for a proposer's header seal.
pub fn header_seal_message(header_hash: &Hash) -> Vec<u8> {
    let mut message = Vec::with_capacity(DOMAIN_HEADER_SEAL.len() + Hash::BYTES);
    message.extend_from_slice(DOMAIN_HEADER_SEAL);
    message.extend_from_slice(header_hash.as_bytes());
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domains_do_not_collide() {
        let hash = Hash::from_bytes(b"block");
        let seal = commit_seal_message(1, &hash);
        let header = header_seal_message(&hash);
        let envelope = envelope_message(1, hash.as_bytes());
        assert_ne!(seal, header);
        assert_ne!(seal, envelope);
        assert_ne!(header, envelope);
    }
}
