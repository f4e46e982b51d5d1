//! Ordered validator membership and proposer selection.

use crate::{Address, PublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A consensus validator: address plus the key envelopes are verified against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// Validator address (sort key of the set).
    pub address: Address,
    /// ed25519 public key for signature verification.
    pub public_key: PublicKey,
}

/// Proposer selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProposerPolicy {
    /// Proposer advances with the round: `index(previous) + round` mod size.
    #[default]
    RoundRobin,
    /// Proposer stays on the same validator across rounds until explicitly
    /// advanced to a new previous-proposer.
    Sticky,
}

/// An ordered, immutable set of validators for one (height, round).
///
/// Validators are sorted ascending by address, which is deterministic across
/// nodes — required so every node agrees on `f`, quorum thresholds, and the
/// proposer index. The set is never mutated once constructed; advancing the
/// proposer produces a new instance ([`ValidatorSet::calc_proposer`]).
///
/// An empty set is valid: it means "unknown validators" and no quorum is
/// possible (`min_majority() == 1` can never be met by zero voters because
/// membership checks fail first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    policy: ProposerPolicy,
    height: u64,
    proposer_index: usize,
}

impl ValidatorSet {
    /// Construct a set for a height, sorting validators ascending by address.
    ///
    /// Duplicate addresses are collapsed to the first occurrence.
    pub fn new(mut validators: Vec<Validator>, policy: ProposerPolicy, height: u64) -> Self {
        validators.sort_by(|a, b| a.address.cmp(&b.address));
        validators.dedup_by(|a, b| a.address == b.address);
        Self {
            validators,
            policy,
            height,
            proposer_index: 0,
        }
    }

    /// Number of validators.
    pub fn size(&self) -> usize {
        self.validators.len()
    }

    /// Whether the set is empty (no quorum possible).
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Height this set was derived for.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// The proposer policy.
    pub fn policy(&self) -> ProposerPolicy {
        self.policy
    }

    /// Addresses in ascending sorted order.
    pub fn list(&self) -> Vec<Address> {
        self.validators.iter().map(|v| v.address).collect()
    }

    /// All validators in ascending address order.
    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// Look up a validator by address, returning its index.
    pub fn get_by_address(&self, address: Address) -> Option<(usize, &Validator)> {
        self.validators
            .iter()
            .enumerate()
            .find(|(_, v)| v.address == address)
    }

    /// Look up a validator by index.
    pub fn get_by_index(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    /// Whether the address belongs to the set.
    pub fn contains(&self, address: Address) -> bool {
        self.get_by_address(address).is_some()
    }

    /// Public key registered for an address, if a member.
    pub fn public_key(&self, address: Address) -> Option<PublicKey> {
        self.get_by_address(address).map(|(_, v)| v.public_key)
    }

    /// Maximum tolerable Byzantine validators: `floor((n - 1) / 3)`.
    pub fn f(&self) -> usize {
        self.validators.len().saturating_sub(1) / 3
    }

    /// Quorum threshold: `2f + 1` votes.
    pub fn min_majority(&self) -> usize {
        2 * self.f() + 1
    }

    /// The current proposer, `None` for an empty set.
    pub fn proposer(&self) -> Option<&Validator> {
        self.validators.get(self.proposer_index)
    }

    /// Whether the address is the current proposer.
    pub fn is_proposer(&self, address: Address) -> bool {
        self.proposer().map(|v| v.address == address).unwrap_or(false)
    }

    /// Derive the set with the proposer advanced for `round`.
    ///
    /// Round-robin seeds from the previous proposer's index plus the round;
    /// sticky keeps the previous proposer regardless of round. An unknown or
    /// absent previous proposer seeds from the round alone. Returns a new
    /// instance — sets are immutable snapshots.
    pub fn calc_proposer(&self, previous_proposer: Option<Address>, round: u64) -> ValidatorSet {
        let mut next = self.clone();
        if next.validators.is_empty() {
            return next;
        }
        let size = next.validators.len() as u64;
        let previous_index = previous_proposer
            .and_then(|addr| next.get_by_address(addr).map(|(i, _)| i as u64));
        let seed = match (next.policy, previous_index) {
            (ProposerPolicy::RoundRobin, Some(index)) => index + round,
            (ProposerPolicy::RoundRobin, None) => round,
            (ProposerPolicy::Sticky, Some(index)) => index,
            (ProposerPolicy::Sticky, None) => 0,
        };
        next.proposer_index = (seed % size) as usize;
        next
    }

    /// Ring-adjacent validators of `address` in the sorted ordering.
    ///
    /// Used to bound re-broadcast fan-out to O(1) per node. Returns an empty
    /// set when the address is unknown or the set has no other members.
    pub fn neighbors(&self, address: Address) -> Vec<Address> {
        let size = self.validators.len();
        let Some((index, _)) = self.get_by_address(address) else {
            return vec![];
        };
        match size {
            0 | 1 => vec![],
            2 => vec![self.validators[(index + 1) % 2].address],
            _ => {
                let prev = (index + size - 1) % size;
                let next = (index + 1) % size;
                vec![self.validators[prev].address, self.validators[next].address]
            }
        }
    }
}

impl fmt::Display for ValidatorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ValidatorSet(height={}, size={})",
            self.height,
            self.size()
        )
    }
}
