//! Per-(view, step) vote accumulator with quorum detection.

use crate::errors::VoteError;
use accord_messages::{ConsensusMessage, MessageCode, Vote};
use accord_types::{Address, Hash, Signature, ValidatorSet, View};
use indexmap::IndexMap;
use tracing::debug;

/// Accumulates signed votes for one (view, message code), grouped by voted
/// block hash.
///
/// Votes are keyed by sender for duplicate and conflict detection, and by
/// `Option<Hash>` (`None` = nil vote) for quorum tallying. Once some hash key
/// collects strictly more than 2f votes, it is cached as the majority winner;
/// the winner never changes afterwards, because a validator voting for two
/// different hashes is flagged as conflicting before it could tip a second
/// hash over the threshold.
///
/// The engine mutates sets only from its own event loop, so no internal lock
/// is needed (see the crate docs on the single-threaded core).
#[derive(Debug, Clone)]
pub struct MessageSet {
    view: View,
    code: MessageCode,
    validators: ValidatorSet,
    by_address: IndexMap<Address, (ConsensusMessage, Vote)>,
    by_block: IndexMap<Option<Hash>, Vec<Address>>,
    maj23: Option<Option<Hash>>,
}

impl MessageSet {
    /// Create an empty set for a (view, code) against a validator set.
    pub fn new(view: View, code: MessageCode, validators: ValidatorSet) -> Self {
        Self {
            view,
            code,
            validators,
            by_address: IndexMap::new(),
            by_block: IndexMap::new(),
            maj23: None,
        }
    }

    /// The view this set accumulates votes for.
    pub fn view(&self) -> View {
        self.view
    }

    /// The message code this set accepts.
    pub fn code(&self) -> MessageCode {
        self.code
    }

    /// Add a verified vote.
    ///
    /// Returns `Ok(true)` when the vote was recorded, `Ok(false)` for a
    /// harmless duplicate (same sender, same hash), and an error otherwise.
    /// A conflicting vote (same sender, different hash) returns
    /// [`VoteError::ConflictingVotes`] and leaves the original tally intact —
    /// the caller extracts evidence via [`MessageSet::get`].
    pub fn add_vote(&mut self, message: ConsensusMessage, vote: Vote) -> Result<bool, VoteError> {
        if message.code != self.code {
            return Err(VoteError::CodeMismatch {
                expected: self.code,
                got: message.code,
            });
        }
        if !self.validators.contains(message.address) {
            return Err(VoteError::InvalidValidatorAddress(message.address));
        }
        if vote.view.height != self.view.height {
            return Err(VoteError::HeightMismatch {
                expected: self.view.height,
                got: vote.view.height,
            });
        }
        if vote.view.round != self.view.round {
            return Err(VoteError::RoundMismatch {
                expected: self.view.round,
                got: vote.view.round,
            });
        }

        if let Some((_, existing)) = self.by_address.get(&message.address) {
            if existing.block_hash == vote.block_hash {
                return Ok(false);
            }
            return Err(VoteError::ConflictingVotes {
                address: message.address,
            });
        }

        let address = message.address;
        let hash_key = vote.block_hash;
        self.by_address.insert(address, (message, vote));
        let voters = self.by_block.entry(hash_key).or_default();
        voters.push(address);

        // First hash past 2f wins and stays won.
        if self.maj23.is_none() && voters.len() > 2 * self.validators.f() {
            debug!(
                view = %self.view,
                code = %self.code,
                block_hash = ?hash_key,
                votes = voters.len(),
                "2/3 majority reached"
            );
            self.maj23 = Some(hash_key);
        }

        Ok(true)
    }

    /// Total votes received.
    pub fn total_received(&self) -> usize {
        self.by_address.len()
    }

    /// Votes received for a specific hash key (`None` = nil votes).
    pub fn votes_for(&self, block_hash: Option<Hash>) -> usize {
        self.by_block.get(&block_hash).map(Vec::len).unwrap_or(0)
    }

    /// Whether some single hash key has reached the 2f+1 majority.
    pub fn has_majority(&self) -> bool {
        self.maj23.is_some()
    }

    /// Whether 2f+1 votes have arrived regardless of what they voted for.
    pub fn has_two_thirds_any(&self) -> bool {
        !self.validators.is_empty() && self.by_address.len() >= self.validators.min_majority()
    }

    /// The winning hash key once a majority formed (`Some(None)` = nil
    /// majority). Idempotent: once set, every call returns the same winner.
    pub fn two_thirds_majority(&self) -> Option<Option<Hash>> {
        self.maj23
    }

    /// The stored message from a sender, if it voted.
    pub fn get(&self, address: Address) -> Option<&ConsensusMessage> {
        self.by_address.get(&address).map(|(message, _)| message)
    }

    /// Addresses that have voted, in arrival order.
    pub fn voters(&self) -> Vec<Address> {
        self.by_address.keys().copied().collect()
    }

    /// Validators in the set that have not voted yet, in set order.
    ///
    /// Drives catch-up requests: these are the peers whose votes the local
    /// node never received.
    pub fn missing_voters(&self) -> Vec<Address> {
        self.validators
            .list()
            .into_iter()
            .filter(|address| !self.by_address.contains_key(address))
            .collect()
    }

    /// All stored envelopes, in arrival order. Used to answer catch-up
    /// requests.
    pub fn messages(&self) -> Vec<ConsensusMessage> {
        self.by_address
            .values()
            .map(|(message, _)| message.clone())
            .collect()
    }

    /// Commit seals carried by votes for the given block hash.
    pub fn seals_for(&self, block_hash: Hash) -> Vec<Signature> {
        self.by_address
            .values()
            .filter(|(_, vote)| vote.block_hash == Some(block_hash))
            .filter_map(|(_, vote)| vote.seal)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_test_helpers::{signed_prevote, test_committee};

    fn make_set(n: usize) -> (Vec<accord_types::KeyPair>, MessageSet) {
        let (keys, validators) = test_committee(n);
        let view = View::new(1, 0);
        (keys, MessageSet::new(view, MessageCode::Prevote, validators))
    }

    #[test]
    fn test_majority_threshold() {
        let (keys, mut set) = make_set(4);
        let view = View::new(1, 0);
        let hash = Hash::from_bytes(b"block");

        for (i, key) in keys.iter().take(2).enumerate() {
            let (message, vote) = signed_prevote(key, view, Some(hash));
            assert!(set.add_vote(message, vote).unwrap(), "vote {i}");
            assert!(!set.has_majority(), "no majority at {} votes", i + 1);
        }

        // Third vote crosses 2f = 2
        let (message, vote) = signed_prevote(&keys[2], view, Some(hash));
        assert!(set.add_vote(message, vote).unwrap());
        assert!(set.has_majority());
        assert_eq!(set.two_thirds_majority(), Some(Some(hash)));
    }

    #[test]
    fn test_winner_is_idempotent() {
        let (keys, mut set) = make_set(4);
        let view = View::new(1, 0);
        let hash = Hash::from_bytes(b"winner");

        for key in keys.iter().take(3) {
            let (message, vote) = signed_prevote(key, view, Some(hash));
            set.add_vote(message, vote).unwrap();
        }
        let winner = set.two_thirds_majority();

        // A fourth vote for a different hash does not change the winner
        let (message, vote) = signed_prevote(&keys[3], view, Some(Hash::from_bytes(b"late")));
        set.add_vote(message, vote).unwrap();
        assert_eq!(set.two_thirds_majority(), winner);
    }

    #[test]
    fn test_conflicting_vote_rejected_tally_intact() {
        let (keys, mut set) = make_set(4);
        let view = View::new(1, 0);
        let first_hash = Hash::from_bytes(b"first");

        let (message, vote) = signed_prevote(&keys[0], view, Some(first_hash));
        set.add_vote(message, vote).unwrap();

        let (message, vote) = signed_prevote(&keys[0], view, Some(Hash::from_bytes(b"second")));
        let err = set.add_vote(message, vote).unwrap_err();
        assert!(matches!(err, VoteError::ConflictingVotes { address } if address == keys[0].address()));

        assert_eq!(set.total_received(), 1);
        assert_eq!(set.votes_for(Some(first_hash)), 1);
    }

    #[test]
    fn test_duplicate_vote_is_harmless() {
        let (keys, mut set) = make_set(4);
        let view = View::new(1, 0);
        let hash = Hash::from_bytes(b"block");

        let (message, vote) = signed_prevote(&keys[0], view, Some(hash));
        assert!(set.add_vote(message.clone(), vote.clone()).unwrap());
        assert!(!set.add_vote(message, vote).unwrap());
        assert_eq!(set.total_received(), 1);
    }

    #[test]
    fn test_nil_votes_tally_separately() {
        let (keys, mut set) = make_set(4);
        let view = View::new(1, 0);
        let hash = Hash::from_bytes(b"block");

        let (message, vote) = signed_prevote(&keys[0], view, Some(hash));
        set.add_vote(message, vote).unwrap();
        for key in keys.iter().skip(1) {
            let (message, vote) = signed_prevote(key, view, None);
            set.add_vote(message, vote).unwrap();
        }

        assert_eq!(set.votes_for(Some(hash)), 1);
        assert_eq!(set.votes_for(None), 3);
        // Nil reached 2f+1: the majority winner is the nil key
        assert_eq!(set.two_thirds_majority(), Some(None));
    }

    #[test]
    fn test_view_mismatch_rejected() {
        let (keys, mut set) = make_set(4);
        let hash = Hash::from_bytes(b"block");

        let (message, vote) = signed_prevote(&keys[0], View::new(2, 0), Some(hash));
        assert!(matches!(
            set.add_vote(message, vote),
            Err(VoteError::HeightMismatch { .. })
        ));

        let (message, vote) = signed_prevote(&keys[0], View::new(1, 3), Some(hash));
        assert!(matches!(
            set.add_vote(message, vote),
            Err(VoteError::RoundMismatch { .. })
        ));
    }

    #[test]
    fn test_outsider_rejected() {
        let (_, mut set) = make_set(4);
        let outsider = accord_types::KeyPair::from_seed([0xCC; 32]);
        let (message, vote) = signed_prevote(&outsider, View::new(1, 0), None);
        assert!(matches!(
            set.add_vote(message, vote),
            Err(VoteError::InvalidValidatorAddress(_))
        ));
    }

    #[test]
    fn test_missing_voters() {
        let (keys, mut set) = make_set(4);
        let view = View::new(1, 0);

        let (message, vote) = signed_prevote(&keys[1], view, None);
        set.add_vote(message, vote).unwrap();

        let missing = set.missing_voters();
        assert_eq!(missing.len(), 3);
        assert!(!missing.contains(&keys[1].address()));
    }
}
