//! Governance snapshot: validator set plus pending header votes.

use accord_storage::{keys, KeyValueStore, StorageError};
use accord_types::{Address, BlockHeader, Hash, Validator, ValidatorSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Errors from applying headers or persisting snapshots.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GovernanceError {
    /// Headers are not a contiguous run starting right after the snapshot.
    #[error("headers do not extend the snapshot contiguously")]
    InvalidVotingChain,

    /// Header sealed by a non-validator (or the seal does not verify).
    #[error("header sealed by {0}: not an authorized validator")]
    Unauthorized(Address),

    /// Header carries a candidate but no recognized authorize/drop nonce.
    #[error("header nonce encodes no recognized governance flag")]
    InvalidVote,

    /// Backing store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Snapshot failed to encode or decode.
    #[error("snapshot codec failure: {0}")]
    Codec(String),
}

/// One active header vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceVote {
    /// The validator that sealed the voting header.
    pub signer: Address,
    /// The candidate being voted on.
    pub candidate: Address,
    /// Authorize (true) or drop (false).
    pub authorize: bool,
}

/// Running vote count for one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyEntry {
    /// The candidate being voted on.
    pub candidate: Address,
    /// Direction of the tallied votes. Votes in the opposite direction for
    /// the same candidate replace the signer's earlier vote rather than
    /// cancelling the tally.
    pub authorize: bool,
    /// Number of active votes.
    pub votes: usize,
}

/// The governance state at one block: validator set, active votes, tallies.
///
/// Immutable in use: [`Snapshot::apply`] folds headers into a new snapshot
/// and leaves the original untouched, mirroring how validator sets are
/// treated as per-height snapshots everywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Number of blocks between vote resets.
    pub epoch: u64,
    /// Block height this snapshot was taken at.
    pub number: u64,
    /// Hash of the block this snapshot was taken at.
    pub hash: Hash,
    /// Active votes, in arrival order.
    pub votes: Vec<GovernanceVote>,
    /// Running counts per candidate.
    pub tally: Vec<TallyEntry>,
    /// The validator set in force after this block.
    pub validator_set: ValidatorSet,
}

impl Snapshot {
    /// A fresh snapshot with no pending votes.
    pub fn new(epoch: u64, number: u64, hash: Hash, validator_set: ValidatorSet) -> Self {
        Self {
            epoch,
            number,
            hash,
            votes: Vec::new(),
            tally: Vec::new(),
            validator_set,
        }
    }

    /// Fold a contiguous run of sealed headers into a new snapshot.
    ///
    /// Headers must be strictly increasing by height starting at
    /// `self.number + 1`. Each header is one vote from its sealing proposer;
    /// a candidate reaching a strict majority of the current set is added or
    /// removed immediately, and all votes referencing it are purged. Epoch
    /// boundaries clear every pending vote and tally first.
    pub fn apply(&self, headers: &[BlockHeader]) -> Result<Snapshot, GovernanceError> {
        if headers.is_empty() {
            return Ok(self.clone());
        }
        if headers[0].height != self.number + 1 {
            return Err(GovernanceError::InvalidVotingChain);
        }
        for pair in headers.windows(2) {
            if pair[1].height != pair[0].height + 1 {
                return Err(GovernanceError::InvalidVotingChain);
            }
        }

        let mut snap = self.clone();
        for header in headers {
            snap.apply_header(header)?;
        }

        // The set's height advances by the number of folded headers
        snap.validator_set = ValidatorSet::new(
            snap.validator_set.validators().to_vec(),
            snap.validator_set.policy(),
            self.validator_set.height() + headers.len() as u64,
        );
        Ok(snap)
    }

    fn apply_header(&mut self, header: &BlockHeader) -> Result<(), GovernanceError> {
        if self.epoch > 0 && header.height % self.epoch == 0 {
            debug!(height = header.height, "epoch boundary, clearing pending votes");
            self.votes.clear();
            self.tally.clear();
        }

        let signer = header.proposer;
        let Some(public_key) = self.validator_set.public_key(signer) else {
            return Err(GovernanceError::Unauthorized(signer));
        };
        if !header.verify_seal(&public_key) {
            return Err(GovernanceError::Unauthorized(signer));
        }

        if let Some(candidate) = &header.candidate {
            let authorize = header.authorizes().ok_or(GovernanceError::InvalidVote)?;

            // One active vote per signer per target
            self.uncast(signer, candidate.address);
            if self.cast(signer, candidate.address, authorize) {
                self.settle(candidate);
            }
        }

        self.number = header.height;
        self.hash = header.hash();
        Ok(())
    }

    /// Record a vote if it is meaningful for the current set.
    ///
    /// Authorizing an existing member or dropping a non-member changes
    /// nothing, so such votes are discarded.
    fn cast(&mut self, signer: Address, candidate: Address, authorize: bool) -> bool {
        if self.validator_set.contains(candidate) == authorize {
            debug!(%signer, %candidate, authorize, "discarding no-op governance vote");
            return false;
        }
        self.votes.push(GovernanceVote {
            signer,
            candidate,
            authorize,
        });
        match self
            .tally
            .iter_mut()
            .find(|t| t.candidate == candidate && t.authorize == authorize)
        {
            Some(entry) => entry.votes += 1,
            None => self.tally.push(TallyEntry {
                candidate,
                authorize,
                votes: 1,
            }),
        }
        true
    }

    /// Retract the signer's earlier vote for a candidate, if any.
    fn uncast(&mut self, signer: Address, candidate: Address) {
        let Some(at) = self
            .votes
            .iter()
            .position(|v| v.signer == signer && v.candidate == candidate)
        else {
            return;
        };
        let vote = self.votes.remove(at);
        if let Some(entry) = self
            .tally
            .iter_mut()
            .find(|t| t.candidate == vote.candidate && t.authorize == vote.authorize)
        {
            entry.votes = entry.votes.saturating_sub(1);
        }
        self.tally.retain(|t| t.votes > 0);
    }

    /// Apply the candidate's change if its tally passed a strict majority.
    fn settle(&mut self, candidate: &Validator) {
        let threshold = self.validator_set.size() / 2;
        let Some(entry) = self
            .tally
            .iter()
            .find(|t| t.candidate == candidate.address && t.votes > threshold)
        else {
            return;
        };
        let authorize = entry.authorize;
        let target = candidate.address;

        let mut members = self.validator_set.validators().to_vec();
        if authorize {
            members.push(*candidate);
        } else {
            members.retain(|v| v.address != target);
            // Votes cast by the dropped validator die with its membership
            let orphaned: Vec<GovernanceVote> = self
                .votes
                .iter()
                .filter(|v| v.signer == target)
                .cloned()
                .collect();
            for vote in orphaned {
                self.uncast(vote.signer, vote.candidate);
            }
        }
        info!(candidate = %target, authorize, "governance vote passed");
        self.validator_set = ValidatorSet::new(
            members,
            self.validator_set.policy(),
            self.validator_set.height(),
        );

        // The settled candidate's slate is wiped clean
        self.votes.retain(|v| v.candidate != target);
        self.tally.retain(|t| t.candidate != target);
    }

    /// Persist this snapshot under its block hash.
    pub fn store(&self, store: &dyn KeyValueStore) -> Result<(), GovernanceError> {
        let encoded =
            serde_json::to_vec(self).map_err(|e| GovernanceError::Codec(e.to_string()))?;
        store.put(&keys::snapshot_key(&self.hash), &encoded)?;
        Ok(())
    }

    /// Load the snapshot stored for a block hash, if any.
    pub fn load(
        store: &dyn KeyValueStore,
        block_hash: &Hash,
    ) -> Result<Option<Snapshot>, GovernanceError> {
        let Some(encoded) = store.get(&keys::snapshot_key(block_hash))? else {
            return Ok(None);
        };
        let snapshot =
            serde_json::from_slice(&encoded).map_err(|e| GovernanceError::Codec(e.to_string()))?;
        Ok(Some(snapshot))
    }
}
