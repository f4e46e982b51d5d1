//! Block and header types.
//!
//! Transaction execution is external to the consensus core, so the payload is
//! carried as opaque transaction hashes. The header additionally carries the
//! clique-style governance fields: a candidate validator plus a nonce encoding
//! the authorize/drop flag, tallied by the snapshot layer.

use crate::{Address, Hash, PublicKey, Signature, Validator};
use serde::{Deserialize, Serialize};

/// Header nonce value proposing to authorize the candidate.
pub const NONCE_AUTH: [u8; 8] = [0xff; 8];

/// Header nonce value proposing to drop the candidate.
pub const NONCE_DROP: [u8; 8] = [0x00; 8];

/// Consensus metadata for a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Height of this block.
    pub height: u64,
    /// Hash of the parent block.
    pub parent_hash: Hash,
    /// Address of the proposing validator.
    pub proposer: Address,
    /// Round in which the block was proposed.
    pub round: u64,
    /// Proposal timestamp in milliseconds.
    pub timestamp: u64,
    /// Root over the transaction payload.
    pub tx_root: Hash,
    /// Candidate validator this header votes on, if any.
    pub candidate: Option<Validator>,
    /// Authorize/drop flag for the candidate vote.
    pub nonce: [u8; 8],
    /// Proposer's seal over the header hash.
    pub seal: Signature,
    /// Commit seals from 2f+1 precommits, attached at finalization.
    pub committed_seals: Vec<Signature>,
}

impl BlockHeader {
    /// Hash of the header's consensus content.
    ///
    /// Excludes the seal and committed seals so that the hash is stable from
    /// proposal through finalization.
    pub fn hash(&self) -> Hash {
        let candidate_bytes = match &self.candidate {
            Some(validator) => {
                let mut bytes = vec![1u8];
                bytes.extend_from_slice(validator.address.as_bytes());
                bytes.extend_from_slice(validator.public_key.as_bytes());
                bytes
            }
            None => vec![0u8],
        };
        Hash::from_parts(&[
            &self.height.to_le_bytes(),
            self.parent_hash.as_bytes(),
            self.proposer.as_bytes(),
            &self.round.to_le_bytes(),
            &self.timestamp.to_le_bytes(),
            self.tx_root.as_bytes(),
            &candidate_bytes,
            &self.nonce,
        ])
    }

    /// Whether the nonce encodes a recognized governance flag.
    pub fn nonce_is_valid(&self) -> bool {
        self.nonce == NONCE_AUTH || self.nonce == NONCE_DROP
    }

    /// Whether the header proposes to authorize (true) or drop (false) its
    /// candidate. `None` when the nonce is malformed.
    pub fn authorizes(&self) -> Option<bool> {
        match self.nonce {
            NONCE_AUTH => Some(true),
            NONCE_DROP => Some(false),
            _ => None,
        }
    }

    /// Verify the proposer's seal against the given public key.
    pub fn verify_seal(&self, public_key: &PublicKey) -> bool {
        let message = crate::signing::header_seal_message(&self.hash());
        public_key.verify(&message, &self.seal)
    }
}

/// A block: header plus opaque transaction payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Consensus metadata.
    pub header: BlockHeader,
    /// Hashes of the transactions included in the block.
    pub transactions: Vec<Hash>,
}

impl Block {
    /// Create a block, computing the tx_root over the payload.
    pub fn new(mut header: BlockHeader, transactions: Vec<Hash>) -> Self {
        header.tx_root = Self::tx_root(&transactions);
        Self {
            header,
            transactions,
        }
    }

    /// Hash identifying this block (the header hash).
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Height of this block.
    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Compute the root over a transaction list.
    pub fn tx_root(transactions: &[Hash]) -> Hash {
        let parts: Vec<&[u8]> = transactions.iter().map(|h| h.as_bytes() as &[u8]).collect();
        Hash::from_parts(&parts)
    }

    /// Whether the header's tx_root matches the payload.
    pub fn payload_matches_root(&self) -> bool {
        Self::tx_root(&self.transactions) == self.header.tx_root
    }

    /// Return a copy with the given committed seals attached.
    pub fn with_committed_seals(&self, seals: Vec<Signature>) -> Block {
        let mut block = self.clone();
        block.header.committed_seals = seals;
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyPair;

    fn make_header(height: u64) -> BlockHeader {
        BlockHeader {
            height,
            parent_hash: Hash::ZERO,
            proposer: Address::ZERO,
            round: 0,
            timestamp: 0,
            tx_root: Hash::ZERO,
            candidate: None,
            nonce: NONCE_DROP,
            seal: Signature::zero(),
            committed_seals: vec![],
        }
    }

    #[test]
    fn test_hash_stable_across_sealing() {
        let key = KeyPair::from_seed([9u8; 32]);
        let mut header = make_header(3);
        let unsealed = header.hash();

        header.seal = key.sign(&crate::signing::header_seal_message(&unsealed));
        header.committed_seals = vec![Signature::zero(); 3];
        assert_eq!(header.hash(), unsealed);
    }

    #[test]
    fn test_seal_verification() {
        let key = KeyPair::from_seed([10u8; 32]);
        let mut header = make_header(1);
        header.seal = key.sign(&crate::signing::header_seal_message(&header.hash()));
        assert!(header.verify_seal(&key.public_key()));

        let other = KeyPair::from_seed([11u8; 32]);
        assert!(!header.verify_seal(&other.public_key()));
    }

    #[test]
    fn test_payload_root() {
        let txs = vec![Hash::from_bytes(b"a"), Hash::from_bytes(b"b")];
        let block = Block::new(make_header(2), txs);
        assert!(block.payload_matches_root());

        let mut tampered = block.clone();
        tampered.transactions.push(Hash::from_bytes(b"c"));
        assert!(!tampered.payload_matches_root());
    }
}
