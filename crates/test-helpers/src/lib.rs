//! Shared fixtures for consensus tests.
//!
//! Deterministic committees, pre-signed votes and proposals, and mock
//! implementations of the engine's external seams. Everything here is
//! deterministic: the same inputs always produce the same keys, blocks, and
//! signatures, so tests can assert on exact values.

use accord_core::{ProposalVerifier, ValidatorSource, VerifyError};
use accord_messages::{ConsensusMessage, MessageCode, Proposal, Vote};
use accord_types::{
    signing, Address, Block, BlockHeader, Hash, KeyPair, ProposerPolicy, Signature, Validator,
    ValidatorSet, View, NONCE_DROP,
};

/// A deterministic committee of `n` validators at height 1.
///
/// Keys are derived from fixed seeds and returned sorted to match the set's
/// address ordering, so `keys[i]` is the validator at set index `i`.
pub fn test_committee(n: usize) -> (Vec<KeyPair>, ValidatorSet) {
    let mut keys: Vec<KeyPair> = (0..n)
        .map(|i| KeyPair::from_seed([i as u8 + 1; 32]))
        .collect();
    keys.sort_by_key(KeyPair::address);
    let validators: Vec<Validator> = keys
        .iter()
        .map(|k| Validator {
            address: k.address(),
            public_key: k.public_key(),
        })
        .collect();
    let set = ValidatorSet::new(validators, ProposerPolicy::RoundRobin, 1);
    (keys, set)
}

/// A signed prevote envelope plus its decoded payload.
pub fn signed_prevote(
    key: &KeyPair,
    view: View,
    block_hash: Option<Hash>,
) -> (ConsensusMessage, Vote) {
    let vote = match block_hash {
        Some(hash) => Vote::prevote(view, hash),
        None => Vote::nil(view),
    };
    let message = ConsensusMessage::sign(MessageCode::Prevote, &vote, key)
        .expect("signing a vote fixture cannot fail");
    (message, vote)
}

/// A signed precommit envelope plus its decoded payload.
///
/// A precommit for a concrete block carries a valid commit seal, as the
/// engine's own precommits do.
pub fn signed_precommit(
    key: &KeyPair,
    view: View,
    block_hash: Option<Hash>,
) -> (ConsensusMessage, Vote) {
    let vote = match block_hash {
        Some(hash) => {
            let seal = key.sign(&signing::commit_seal_message(view.height, &hash));
            Vote::precommit(view, hash, seal)
        }
        None => Vote::nil(view),
    };
    let message = ConsensusMessage::sign(MessageCode::Precommit, &vote, key)
        .expect("signing a vote fixture cannot fail");
    (message, vote)
}

/// A minimal unsealed block at height 1 with a distinguishing seed.
pub fn test_block(seed: u64, proposer: &Address) -> Block {
    let header = BlockHeader {
        height: 1,
        parent_hash: Hash::from_bytes(&seed.to_le_bytes()),
        proposer: *proposer,
        round: 0,
        timestamp: seed,
        tx_root: Hash::ZERO,
        candidate: None,
        nonce: NONCE_DROP,
        seal: Signature::zero(),
        committed_seals: vec![],
    };
    Block::new(header, vec![])
}

/// A fully sealed proposal for `view`, proposed and signed by `key`.
pub fn sealed_proposal(
    key: &KeyPair,
    view: View,
    transactions: Vec<Hash>,
) -> (Proposal, ConsensusMessage) {
    let header = BlockHeader {
        height: view.height,
        parent_hash: Hash::from_bytes(b"parent"),
        proposer: key.address(),
        round: view.round,
        timestamp: 0,
        tx_root: Hash::ZERO,
        candidate: None,
        nonce: NONCE_DROP,
        seal: Signature::zero(),
        committed_seals: vec![],
    };
    let mut block = Block::new(header, transactions);
    let seal_message = signing::header_seal_message(&block.header.hash());
    block.header.seal = key.sign(&seal_message);

    let proposal = Proposal::new(view, block);
    let message = ConsensusMessage::sign(MessageCode::Propose, &proposal, key)
        .expect("signing a proposal fixture cannot fail");
    (proposal, message)
}

/// A proposal verifier with a fixed verdict.
pub struct MockVerifier {
    error: Option<VerifyError>,
}

impl MockVerifier {
    /// Accepts every proposal.
    pub fn ok() -> Self {
        Self { error: None }
    }

    /// Rejects every proposal with the given error.
    pub fn failing(error: VerifyError) -> Self {
        Self { error: Some(error) }
    }
}

impl ProposalVerifier for MockVerifier {
    fn verify(&self, _proposal: &Proposal) -> Result<(), VerifyError> {
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// A validator source returning the same committee for every height.
pub struct FixedValidatorSource {
    validators: ValidatorSet,
}

impl FixedValidatorSource {
    /// Serve `validators` at every height.
    pub fn new(validators: ValidatorSet) -> Self {
        Self { validators }
    }
}

impl ValidatorSource for FixedValidatorSource {
    fn validators(&self, _height: u64) -> ValidatorSet {
        self.validators.clone()
    }
}
