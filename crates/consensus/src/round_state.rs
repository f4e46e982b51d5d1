//! Mutable bookkeeping for the current height and round.

use crate::message_set::MessageSet;
use accord_messages::{MessageCode, Proposal};
use accord_types::{Block, Hash, RoundStep, ValidatorSet, View};
use std::collections::BTreeMap;

/// State of the consensus protocol at the current height.
///
/// Created fresh at each new height (round 0, step `NewHeight`), mutated
/// monotonically through the steps of a round, and reset per height.
/// Locked/valid block state persists across rounds within a height per the
/// Tendermint locking rule; vote sets are kept per round so earlier rounds
/// can still justify proofs-of-lock and late commits.
#[derive(Debug)]
pub struct RoundState {
    view: View,
    step: RoundStep,
    validators: ValidatorSet,
    proposal: Option<Proposal>,
    locked_round: Option<u64>,
    locked_block: Option<Block>,
    valid_round: Option<u64>,
    valid_block: Option<Block>,
    prevotes: BTreeMap<u64, MessageSet>,
    precommits: BTreeMap<u64, MessageSet>,
    commit_round: Option<u64>,
    pending_request: Option<Block>,
}

impl RoundState {
    /// Fresh state for round 0 of a height.
    pub fn new(height: u64, validators: ValidatorSet) -> Self {
        Self {
            view: View::new(height, 0),
            step: RoundStep::NewHeight,
            validators,
            proposal: None,
            locked_round: None,
            locked_block: None,
            valid_round: None,
            valid_block: None,
            prevotes: BTreeMap::new(),
            precommits: BTreeMap::new(),
            commit_round: None,
            pending_request: None,
        }
    }

    /// Current view.
    pub fn view(&self) -> View {
        self.view
    }

    /// Current height.
    pub fn height(&self) -> u64 {
        self.view.height
    }

    /// Current round.
    pub fn round(&self) -> u64 {
        self.view.round
    }

    /// Current step.
    pub fn step(&self) -> RoundStep {
        self.step
    }

    /// Set the current step.
    pub fn set_step(&mut self, step: RoundStep) {
        self.step = step;
    }

    /// The validator set snapshot for the current (height, round).
    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    /// The accepted proposal for the current round, if any.
    pub fn proposal(&self) -> Option<&Proposal> {
        self.proposal.as_ref()
    }

    /// Accept a proposal for the current round.
    pub fn set_proposal(&mut self, proposal: Proposal) {
        self.proposal = Some(proposal);
    }

    /// Round this node locked in, if locked.
    pub fn locked_round(&self) -> Option<u64> {
        self.locked_round
    }

    /// Block this node locked on, if locked.
    pub fn locked_block(&self) -> Option<&Block> {
        self.locked_block.as_ref()
    }

    /// Latest round that produced a prevote quorum for a block this height.
    pub fn valid_round(&self) -> Option<u64> {
        self.valid_round
    }

    /// Block certified by the latest prevote quorum this height.
    pub fn valid_block(&self) -> Option<&Block> {
        self.valid_block.as_ref()
    }

    /// The round whose precommit quorum is being committed, if committing.
    pub fn commit_round(&self) -> Option<u64> {
        self.commit_round
    }

    /// Mark the round whose precommit quorum triggered the commit.
    pub fn set_commit_round(&mut self, round: u64) {
        self.commit_round = Some(round);
    }

    /// The block injected for proposal at this height, if any.
    pub fn pending_request(&self) -> Option<&Block> {
        self.pending_request.as_ref()
    }

    /// Stash a block to propose when this node is next the proposer.
    pub fn set_pending_request(&mut self, block: Block) {
        self.pending_request = Some(block);
    }

    /// Lock on a block: the prevote quorum at `round` certifies `block`.
    pub fn lock(&mut self, round: u64, block: Block) {
        self.locked_round = Some(round);
        self.locked_block = Some(block.clone());
        self.valid_round = Some(round);
        self.valid_block = Some(block);
    }

    /// Release the lock after a nil prevote quorum.
    pub fn unlock(&mut self) {
        self.locked_round = None;
        self.locked_block = None;
    }

    /// Advance to a later round at the same height.
    ///
    /// The proposal is dropped and valid-block tracking reset; the lock and
    /// the per-round vote sets are kept — earlier prevote sets still serve
    /// proof-of-lock checks and earlier precommit sets can still complete a
    /// late commit.
    pub fn advance_round(&mut self, round: u64, validators: ValidatorSet) {
        debug_assert!(round > self.view.round);
        self.view.round = round;
        self.validators = validators;
        self.proposal = None;
        self.valid_round = None;
        self.valid_block = None;
        self.step = RoundStep::NewRound;
    }

    /// Hash of the block this node would prevote for right now: the locked
    /// block if locked, else the current proposal, else nil.
    pub fn prevote_hash(&self) -> Option<Hash> {
        if let Some(block) = &self.locked_block {
            return Some(block.hash());
        }
        self.proposal.as_ref().map(|p| p.block.hash())
    }

    /// The prevote set for a round at this height, created on first use.
    pub fn prevotes_mut(&mut self, round: u64) -> &mut MessageSet {
        let view = View::new(self.view.height, round);
        let validators = self.validators.clone();
        self.prevotes
            .entry(round)
            .or_insert_with(|| MessageSet::new(view, MessageCode::Prevote, validators))
    }

    /// The prevote set for a round, if any votes arrived.
    pub fn prevotes(&self, round: u64) -> Option<&MessageSet> {
        self.prevotes.get(&round)
    }

    /// The precommit set for a round at this height, created on first use.
    pub fn precommits_mut(&mut self, round: u64) -> &mut MessageSet {
        let view = View::new(self.view.height, round);
        let validators = self.validators.clone();
        self.precommits
            .entry(round)
            .or_insert_with(|| MessageSet::new(view, MessageCode::Precommit, validators))
    }

    /// The precommit set for a round, if any votes arrived.
    pub fn precommits(&self, round: u64) -> Option<&MessageSet> {
        self.precommits.get(&round)
    }
}
