//! The consensus engine: a deterministic state machine over rounds.

use crate::backlog::FutureMessageBacklog;
use crate::config::ConsensusConfig;
use crate::errors::{ConsensusError, VoteError};
use crate::message_set::MessageSet;
use crate::round_state::RoundState;
use crate::sent_storage::SentMessageStorage;
use accord_core::{Action, Event, ProposalVerifier, StateMachine, ValidatorSource, VerifyError};
use accord_messages::{
    CatchUpReply, CatchUpRequest, ConflictingVoteEvidence, ConsensusMessage, MessageCode,
    Proposal, Vote,
};
use accord_types::{signing, Address, Block, Hash, KeyPair, RoundStep, TimeoutInfo, ValidatorSet};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The consensus state machine for one validator.
///
/// Drives the local node through Propose → Prevote → Precommit → Commit for
/// each height, one round at a time. All inputs arrive as [`Event`]s through
/// [`StateMachine::handle`]; all outputs leave as [`Action`]s. The engine
/// never performs I/O itself.
///
/// # Height lifecycle
///
/// On `start()` (and after every commit) the engine derives a fresh
/// [`RoundState`] from the last committed height, schedules the new-height
/// timeout, and waits. When that timeout fires, round 0 begins: the proposer
/// broadcasts a block, everyone prevotes, a prevote quorum locks the block,
/// everyone precommits, and a precommit quorum finalizes it. Any stall
/// advances the round with a rotated proposer and a backed-off timeout.
///
/// # Restart behavior
///
/// A restarted engine re-derives its round state from the committed height
/// and replays its own logged votes from [`SentMessageStorage`] rather than
/// signing fresh ones, so a crash between signing and broadcasting can never
/// turn into equivocation.
pub struct ConsensusState {
    config: ConsensusConfig,
    keypair: KeyPair,
    address: Address,
    verifier: Arc<dyn ProposalVerifier>,
    validator_source: Arc<dyn ValidatorSource>,
    sent: Arc<SentMessageStorage>,
    round_state: RoundState,
    backlog: FutureMessageBacklog,
    started: bool,
    committed_height: u64,
    last_proposer: Option<Address>,
    now: Duration,
}

impl ConsensusState {
    /// Create an engine resuming from `committed_height`.
    pub fn new(
        config: ConsensusConfig,
        keypair: KeyPair,
        verifier: Arc<dyn ProposalVerifier>,
        validator_source: Arc<dyn ValidatorSource>,
        sent: Arc<SentMessageStorage>,
        committed_height: u64,
    ) -> Self {
        let address = keypair.address();
        let height = committed_height + 1;
        let validators = validator_source.validators(height).calc_proposer(None, 0);
        let max_backlog = config.max_backlog;
        Self {
            config,
            keypair,
            address,
            verifier,
            validator_source,
            sent,
            round_state: RoundState::new(height, validators),
            backlog: FutureMessageBacklog::new(max_backlog),
            started: false,
            committed_height,
            last_proposer: None,
            now: Duration::ZERO,
        }
    }

    /// This node's validator address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The current round state (read-only).
    pub fn round_state(&self) -> &RoundState {
        &self.round_state
    }

    /// Whether the engine is running.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Start the engine, deriving round state from the committed height.
    pub fn start(&mut self) -> Result<Vec<Action>, ConsensusError> {
        if self.started {
            return Err(ConsensusError::AlreadyStarted);
        }
        self.started = true;
        info!(
            height = self.committed_height + 1,
            address = %self.address,
            "consensus engine starting"
        );
        Ok(self.begin_height())
    }

    /// Stop the engine. Safe to call from any state; double-stop errors.
    pub fn stop(&mut self) -> Result<(), ConsensusError> {
        if !self.started {
            return Err(ConsensusError::NotStarted);
        }
        self.started = false;
        info!(height = self.round_state.height(), "consensus engine stopped");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Height and round transitions
    // ═══════════════════════════════════════════════════════════════════════

    /// Validator set for `(height, round)` with the proposer pointer applied.
    ///
    /// Once a block has committed, the pointer advances past the proposer
    /// that sealed it, so round 0 of every height rotates under round-robin;
    /// later rounds at the same height keep rotating from that base. Sticky
    /// sets ignore the round entirely.
    fn validators_for(&self, height: u64, round: u64) -> ValidatorSet {
        let validators = self.validator_source.validators(height);
        match self.last_proposer {
            Some(last) => validators.calc_proposer(Some(last), round + 1),
            None => validators.calc_proposer(None, round),
        }
    }

    /// Set up round 0 of the height after the committed one and schedule the
    /// new-height delay.
    fn begin_height(&mut self) -> Vec<Action> {
        let height = self.committed_height + 1;
        let validators = self.validators_for(height, 0);
        self.round_state = RoundState::new(height, validators);

        let duration = self.config.timeout_duration(RoundStep::NewHeight, 0, 0);
        let info = TimeoutInfo::new(duration, height, 0, RoundStep::NewHeight, 0);
        let mut actions = vec![Action::ScheduleTimeout { info }];
        actions.extend(self.drain_backlog());
        actions
    }

    /// Advance to a later round at the current height and start proposing.
    fn enter_round(&mut self, round: u64) -> Vec<Action> {
        let height = self.round_state.height();
        if round <= self.round_state.round() && self.round_state.step() != RoundStep::NewHeight {
            return vec![];
        }
        info!(height, round, "entering round");
        if round > self.round_state.round() {
            let validators = self.validators_for(height, round);
            self.round_state.advance_round(round, validators);
        }
        let mut actions = self.drain_backlog();
        actions.extend(self.enter_propose());
        actions
    }

    /// Enter the propose step of the current round.
    fn enter_propose(&mut self) -> Vec<Action> {
        let view = self.round_state.view();
        let duration = self
            .config
            .timeout_duration(RoundStep::Propose, view.round, 0);
        let info = TimeoutInfo::new(duration, view.height, view.round, RoundStep::Propose, 0);
        let mut actions = vec![Action::ScheduleTimeout { info }];
        self.round_state.set_step(RoundStep::Propose);

        if !self.round_state.validators().contains(self.address) {
            debug!(%view, "not in the validator set, observing");
            return actions;
        }

        if self.round_state.validators().is_proposer(self.address) {
            actions.extend(self.propose_if_ready());
        } else if self.round_state.proposal().is_some() && self.pol_satisfied() {
            // Proposal already on hand (backlogged or early), no need to wait
            actions.extend(self.enter_prevote());
        }
        actions
    }

    /// Broadcast our proposal if we are the proposer and hold a block.
    ///
    /// A locked block is re-proposed as-is, justified by its proof-of-lock
    /// round; otherwise the block injected by the assembly layer is stamped
    /// with this round and sealed fresh.
    fn propose_if_ready(&mut self) -> Vec<Action> {
        if self.round_state.proposal().is_some() {
            return vec![];
        }
        let view = self.round_state.view();

        let (block, pol_round) = if let Some(locked) = self.round_state.locked_block() {
            (locked.clone(), self.round_state.locked_round())
        } else if let Some(pending) = self.round_state.pending_request() {
            let mut block = pending.clone();
            block.header.proposer = self.address;
            block.header.round = view.round;
            let seal_message = signing::header_seal_message(&block.header.hash());
            block.header.seal = self.keypair.sign(&seal_message);
            (block, None)
        } else {
            debug!(%view, "proposer has no block to propose yet");
            return vec![];
        };

        let proposal = match pol_round {
            Some(round) => Proposal::with_pol(view, block, round),
            None => Proposal::new(view, block),
        };
        let envelope = match ConsensusMessage::sign(MessageCode::Propose, &proposal, &self.keypair)
        {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(%view, %error, "failed to sign proposal");
                return vec![];
            }
        };

        info!(
            %view,
            block_hash = %proposal.block.hash(),
            pol_round = ?pol_round,
            "broadcasting proposal"
        );
        self.sent
            .record(view.height, view.round, RoundStep::Propose, envelope.clone());
        self.round_state.set_proposal(proposal);

        let mut actions = vec![Action::Broadcast { message: envelope }];
        // Proposer holds a complete proposal, prevote without waiting
        actions.extend(self.enter_prevote());
        actions
    }

    /// Cast and broadcast our prevote for the current round.
    fn enter_prevote(&mut self) -> Vec<Action> {
        if self.round_state.step() >= RoundStep::Prevote {
            return vec![];
        }
        if !self.round_state.validators().contains(self.address) {
            // Observers track quorums but never vote
            self.round_state.set_step(RoundStep::Prevote);
            return self.evaluate_round_quorums();
        }
        let view = self.round_state.view();

        let logged = self.sent.last_sent(view.height, view.round, RoundStep::Prevote);
        let (envelope, vote) = if let Some(previous) = logged {
            // Replay the logged vote, a fresh one could equivocate
            match previous.decode::<Vote>() {
                Ok(vote) => (previous, vote),
                Err(error) => {
                    warn!(%view, %error, "logged prevote is undecodable, skipping");
                    return vec![];
                }
            }
        } else {
            let vote = match self.round_state.prevote_hash() {
                Some(hash) => Vote::prevote(view, hash),
                None => Vote::nil(view),
            };
            match ConsensusMessage::sign(MessageCode::Prevote, &vote, &self.keypair) {
                Ok(envelope) => {
                    self.sent
                        .record(view.height, view.round, RoundStep::Prevote, envelope.clone());
                    (envelope, vote)
                }
                Err(error) => {
                    warn!(%view, %error, "failed to sign prevote");
                    return vec![];
                }
            }
        };

        debug!(%view, block_hash = ?vote.block_hash, "broadcasting prevote");
        self.round_state.set_step(RoundStep::Prevote);

        let duration = self
            .config
            .timeout_duration(RoundStep::Prevote, view.round, 0);
        let info = TimeoutInfo::new(duration, view.height, view.round, RoundStep::Prevote, 0);
        let mut actions = vec![
            Action::ScheduleTimeout { info },
            Action::Broadcast {
                message: envelope.clone(),
            },
        ];

        if let Err(error) = self
            .round_state
            .prevotes_mut(view.round)
            .add_vote(envelope, vote)
        {
            warn!(%view, %error, "failed to record own prevote");
        }
        actions.extend(self.evaluate_round_quorums());
        actions
    }

    /// Cast and broadcast our precommit for the current round.
    ///
    /// A precommit for a concrete block carries a commit seal; the seals of
    /// the eventual quorum are attached to the finalized header.
    fn enter_precommit(&mut self, block_hash: Option<Hash>) -> Vec<Action> {
        if self.round_state.step() >= RoundStep::Precommit {
            return vec![];
        }
        if !self.round_state.validators().contains(self.address) {
            self.round_state.set_step(RoundStep::Precommit);
            return self.evaluate_round_quorums();
        }
        let view = self.round_state.view();

        let logged = self
            .sent
            .last_sent(view.height, view.round, RoundStep::Precommit);
        let (envelope, vote) = if let Some(previous) = logged {
            match previous.decode::<Vote>() {
                Ok(vote) => (previous, vote),
                Err(error) => {
                    warn!(%view, %error, "logged precommit is undecodable, skipping");
                    return vec![];
                }
            }
        } else {
            let vote = match block_hash {
                Some(hash) => {
                    let seal_message = signing::commit_seal_message(view.height, &hash);
                    Vote::precommit(view, hash, self.keypair.sign(&seal_message))
                }
                None => Vote::nil(view),
            };
            match ConsensusMessage::sign(MessageCode::Precommit, &vote, &self.keypair) {
                Ok(envelope) => {
                    self.sent.record(
                        view.height,
                        view.round,
                        RoundStep::Precommit,
                        envelope.clone(),
                    );
                    (envelope, vote)
                }
                Err(error) => {
                    warn!(%view, %error, "failed to sign precommit");
                    return vec![];
                }
            }
        };

        debug!(%view, block_hash = ?vote.block_hash, "broadcasting precommit");
        self.round_state.set_step(RoundStep::Precommit);

        let duration = self
            .config
            .timeout_duration(RoundStep::Precommit, view.round, 0);
        let info = TimeoutInfo::new(duration, view.height, view.round, RoundStep::Precommit, 0);
        let mut actions = vec![
            Action::ScheduleTimeout { info },
            Action::Broadcast {
                message: envelope.clone(),
            },
        ];

        if let Err(error) = self
            .round_state
            .precommits_mut(view.round)
            .add_vote(envelope, vote)
        {
            warn!(%view, %error, "failed to record own precommit");
        }
        actions.extend(self.evaluate_round_quorums());
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Quorum evaluation and commit
    // ═══════════════════════════════════════════════════════════════════════

    /// React to whatever quorums the current round's vote sets show.
    ///
    /// Safe to call repeatedly; every transition is guarded by the current
    /// step, so re-evaluating after each vote (or after a late proposal
    /// arrives) is idempotent.
    fn evaluate_round_quorums(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        let round = self.round_state.round();

        let (prevote_winner, prevote_any) = match self.round_state.prevotes(round) {
            Some(set) => (set.two_thirds_majority(), set.has_two_thirds_any()),
            None => (None, false),
        };
        let step = self.round_state.step();
        match prevote_winner {
            Some(Some(hash)) => {
                let proposed = self
                    .round_state
                    .proposal()
                    .filter(|p| p.block.hash() == hash)
                    .map(|p| p.block.clone());
                if let Some(block) = proposed {
                    self.round_state.lock(round, block);
                    if step >= RoundStep::Prevote && step < RoundStep::Precommit {
                        actions.extend(self.enter_precommit(Some(hash)));
                    }
                }
            }
            Some(None) => {
                self.round_state.unlock();
                if step >= RoundStep::Prevote && step < RoundStep::Precommit {
                    actions.extend(self.enter_precommit(None));
                }
            }
            None => {
                if prevote_any && step == RoundStep::Prevote {
                    self.round_state.set_step(RoundStep::PrevoteWait);
                    actions.push(self.schedule_wait(RoundStep::PrevoteWait));
                }
            }
        }

        let (precommit_winner, precommit_any) = match self.round_state.precommits(round) {
            Some(set) => (set.two_thirds_majority(), set.has_two_thirds_any()),
            None => (None, false),
        };
        let step = self.round_state.step();
        match precommit_winner {
            Some(Some(hash)) => actions.extend(self.try_commit(round, hash)),
            Some(None) => {
                // The round precommitted nil, it cannot succeed anymore
                if step < RoundStep::Commit {
                    actions.extend(self.enter_round(round + 1));
                }
            }
            None => {
                if precommit_any && step == RoundStep::Precommit {
                    self.round_state.set_step(RoundStep::PrecommitWait);
                    actions.push(self.schedule_wait(RoundStep::PrecommitWait));
                }
            }
        }
        actions
    }

    fn schedule_wait(&self, step: RoundStep) -> Action {
        let view = self.round_state.view();
        let duration = self.config.timeout_duration(step, view.round, 0);
        Action::ScheduleTimeout {
            info: TimeoutInfo::new(duration, view.height, view.round, step, 0),
        }
    }

    /// Finalize and commit once a precommit quorum exists for `block_hash`.
    fn try_commit(&mut self, round: u64, block_hash: Hash) -> Vec<Action> {
        if self.round_state.commit_round().is_some() {
            return vec![];
        }
        let block = self
            .round_state
            .proposal()
            .map(|p| &p.block)
            .filter(|b| b.hash() == block_hash)
            .or_else(|| {
                self.round_state
                    .valid_block()
                    .filter(|b| b.hash() == block_hash)
            })
            .or_else(|| {
                self.round_state
                    .locked_block()
                    .filter(|b| b.hash() == block_hash)
            })
            .cloned();
        let Some(block) = block else {
            debug!(
                height = self.round_state.height(),
                round,
                %block_hash,
                "precommit quorum for a block not on hand, waiting for proposal"
            );
            return vec![];
        };

        match self.finalize_block(round, block_hash, block) {
            Ok(sealed) => {
                let height = self.round_state.height();
                info!(
                    height,
                    round,
                    %block_hash,
                    seals = sealed.header.committed_seals.len(),
                    "committing block"
                );
                self.round_state.set_commit_round(round);
                self.round_state.set_step(RoundStep::Commit);
                self.committed_height = height;
                self.last_proposer = Some(sealed.header.proposer);
                self.sent.truncate(height);

                let mut actions = vec![Action::CommitBlock { block: sealed }];
                actions.extend(self.begin_height());
                actions
            }
            Err(error) => {
                warn!(
                    height = self.round_state.height(),
                    round,
                    %error,
                    "finalization failed, round continues"
                );
                vec![]
            }
        }
    }

    /// Re-derive the precommit quorum for `round` and attach its seals.
    ///
    /// Committing is irreversible, so the seal quorum is re-checked here even
    /// though the caller already saw a vote quorum.
    fn finalize_block(
        &mut self,
        round: u64,
        block_hash: Hash,
        block: Block,
    ) -> Result<Block, ConsensusError> {
        let needed = self.round_state.validators().min_majority();
        let seals = self
            .round_state
            .precommits(round)
            .map(|set| set.seals_for(block_hash))
            .unwrap_or_default();
        if seals.len() < needed {
            return Err(ConsensusError::InsufficientPrecommits {
                got: seals.len(),
                needed,
            });
        }
        Ok(block.with_committed_seals(seals))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Message handling
    // ═══════════════════════════════════════════════════════════════════════

    fn handle_message(&mut self, message: ConsensusMessage) -> Vec<Action> {
        match message.code {
            MessageCode::Propose => self.handle_proposal_envelope(message),
            MessageCode::Prevote | MessageCode::Precommit => self.handle_vote_envelope(message),
            MessageCode::CatchUpRequest => self.handle_catch_up_request(message),
            MessageCode::CatchUpReply => self.handle_catch_up_reply(message),
        }
    }

    /// Verify an envelope against the set in force at `height`.
    fn verify_envelope(&self, message: &ConsensusMessage, height: u64) -> bool {
        let result = if height == self.round_state.height() {
            message.verify(self.round_state.validators())
        } else {
            message.verify(&self.validator_source.validators(height))
        };
        if let Err(error) = result {
            warn!(code = %message.code, %error, "rejecting envelope");
            return false;
        }
        true
    }

    fn handle_proposal_envelope(&mut self, message: ConsensusMessage) -> Vec<Action> {
        let proposal: Proposal = match message.decode() {
            Ok(proposal) => proposal,
            Err(error) => {
                warn!(%error, "undecodable proposal payload");
                return vec![];
            }
        };
        let view = proposal.view;
        let current = self.round_state.view();

        if view.height < current.height {
            debug!(%view, "dropping stale proposal");
            return vec![];
        }
        if !self.verify_envelope(&message, view.height) {
            return vec![];
        }
        if view > current {
            debug!(%view, "buffering future proposal");
            self.backlog.push(view, message);
            return vec![];
        }
        if view.round < current.round {
            debug!(%view, "dropping old-round proposal");
            return vec![];
        }
        if self.round_state.proposal().is_some() {
            debug!(%view, "dropping duplicate proposal");
            return vec![];
        }
        match self.verify_proposal(&proposal, &message) {
            Ok(()) => {}
            Err(VerifyError::NotFromProposer) => {
                warn!(%view, sender = %message.address, "proposal from non-proposer");
                return vec![];
            }
            Err(VerifyError::FutureBlock { height }) => {
                debug!(%view, height, "proposal is ahead of the local chain, buffering");
                self.backlog.push(view, message);
                return vec![];
            }
            Err(error) => {
                warn!(%view, %error, "invalid proposal, advancing round");
                return self.enter_round(view.round + 1);
            }
        }

        debug!(%view, block_hash = %proposal.block.hash(), "accepted proposal");
        let mut actions = self.relay_to_neighbors(&message);
        self.round_state.set_proposal(proposal);


        if self.round_state.step() <= RoundStep::Propose && self.pol_satisfied() {
            actions.extend(self.enter_prevote());
        }
        // A vote quorum may have been waiting for exactly this block
        actions.extend(self.evaluate_round_quorums());
        actions
    }

    /// Validate a proposal and its envelope for the current view without
    /// touching round state.
    ///
    /// Checks, in order: the envelope signature against the active set and
    /// the sender being the round's proposer, the block height agreeing with
    /// the proposal view, the header's sealer being a registered validator
    /// with a verifying seal, and finally the delegated chain verifier.
    pub fn verify_proposal(
        &self,
        proposal: &Proposal,
        message: &ConsensusMessage,
    ) -> Result<(), VerifyError> {
        let validators = self.round_state.validators();
        if message.verify(validators).is_err() || !validators.is_proposer(message.address) {
            return Err(VerifyError::NotFromProposer);
        }
        if proposal.block.height() != proposal.view.height {
            return Err(VerifyError::InvalidHeader(
                "block height does not match the proposal view".into(),
            ));
        }
        let Some(proposer_key) = validators.public_key(proposal.block.header.proposer) else {
            return Err(VerifyError::InvalidHeader(
                "header sealed by an unknown proposer".into(),
            ));
        };
        if !proposal.block.header.verify_seal(&proposer_key) {
            return Err(VerifyError::InvalidHeader(
                "header seal does not verify".into(),
            ));
        }
        self.verifier.verify(proposal)
    }

    /// Whether the current proposal's proof-of-lock round, if claimed, is
    /// backed by an actual prevote quorum for the proposed block.
    fn pol_satisfied(&self) -> bool {
        let Some(proposal) = self.round_state.proposal() else {
            return false;
        };
        let Some(pol_round) = proposal.pol_round else {
            return true;
        };
        self.round_state
            .prevotes(pol_round)
            .and_then(MessageSet::two_thirds_majority)
            == Some(Some(proposal.block.hash()))
    }

    fn handle_vote_envelope(&mut self, message: ConsensusMessage) -> Vec<Action> {
        let vote: Vote = match message.decode() {
            Ok(vote) => vote,
            Err(error) => {
                warn!(%error, "undecodable vote payload");
                return vec![];
            }
        };
        let view = vote.view;
        let current_height = self.round_state.height();

        if view.height < current_height {
            debug!(%view, code = %message.code, "dropping stale vote");
            return vec![];
        }
        if !self.verify_envelope(&message, view.height) {
            return vec![];
        }
        if view.height > current_height {
            debug!(%view, code = %message.code, "buffering future-height vote");
            self.backlog.push(view, message);
            return vec![];
        }

        let code = message.code;
        let round = view.round;
        let set = match code {
            MessageCode::Prevote => self.round_state.prevotes_mut(round),
            _ => self.round_state.precommits_mut(round),
        };
        match set.add_vote(message.clone(), vote) {
            Ok(true) => {}
            Ok(false) => return vec![],
            Err(VoteError::ConflictingVotes { address }) => {
                warn!(%view, code = %code, offender = %address, "conflicting votes detected");
                let Some(first) = set.get(address).cloned() else {
                    return vec![];
                };
                return vec![Action::ReportEvidence {
                    evidence: ConflictingVoteEvidence {
                        offender: address,
                        first,
                        second: message,
                    },
                }];
            }
            Err(error) => {
                debug!(%view, code = %code, %error, "rejecting vote");
                return vec![];
            }
        }
        let mut actions = self.relay_to_neighbors(&message);
        actions.extend(self.after_vote_added(code, round));
        actions
    }

    /// Relay a newly accepted envelope to our ring neighbors.
    ///
    /// Bounds re-broadcast fan-out to O(1) per node; duplicate suppression in
    /// the vote sets stops the relay from cycling.
    fn relay_to_neighbors(&self, message: &ConsensusMessage) -> Vec<Action> {
        let neighbors = self.round_state.validators().neighbors(self.address);
        if neighbors.is_empty() {
            return vec![];
        }
        vec![Action::Gossip {
            neighbors,
            message: message.clone(),
        }]
    }

    /// Quorum and round-skip checks after a vote landed in a set.
    fn after_vote_added(&mut self, code: MessageCode, round: u64) -> Vec<Action> {
        let current = self.round_state.round();

        if round > current {
            // f+1 distinct voters at a later round prove the network moved
            // on; a prevote and a precommit from the same validator count once
            let mut voters: BTreeSet<Address> = BTreeSet::new();
            if let Some(set) = self.round_state.prevotes(round) {
                voters.extend(set.voters());
            }
            if let Some(set) = self.round_state.precommits(round) {
                voters.extend(set.voters());
            }
            if voters.len() > self.round_state.validators().f() {
                debug!(
                    height = self.round_state.height(),
                    from = current,
                    to = round,
                    "skipping ahead to the network's round"
                );
                let mut actions = self.enter_round(round);
                actions.extend(self.evaluate_round_quorums());
                return actions;
            }
            return vec![];
        }

        if round < current {
            // An old round's precommit quorum can still complete the height
            if code == MessageCode::Precommit {
                if let Some(Some(hash)) = self
                    .round_state
                    .precommits(round)
                    .and_then(MessageSet::two_thirds_majority)
                {
                    return self.try_commit(round, hash);
                }
            }
            return vec![];
        }

        self.evaluate_round_quorums()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Catch-up protocol
    // ═══════════════════════════════════════════════════════════════════════

    fn handle_catch_up_request(&mut self, message: ConsensusMessage) -> Vec<Action> {
        let request: CatchUpRequest = match message.decode() {
            Ok(request) => request,
            Err(error) => {
                warn!(%error, "undecodable catch-up request");
                return vec![];
            }
        };
        if request.height != self.round_state.height() {
            debug!(
                height = request.height,
                local = self.round_state.height(),
                "catch-up request for another height"
            );
            return vec![];
        }
        if !self.verify_envelope(&message, request.height) {
            return vec![];
        }

        let messages = match request.step {
            RoundStep::Prevote => self
                .round_state
                .prevotes(request.round)
                .map(MessageSet::messages),
            RoundStep::Precommit => self
                .round_state
                .precommits(request.round)
                .map(MessageSet::messages),
            _ => None,
        }
        .unwrap_or_default();
        if messages.is_empty() {
            return vec![];
        }

        let reply = CatchUpReply {
            height: request.height,
            messages,
        };
        match ConsensusMessage::sign(MessageCode::CatchUpReply, &reply, &self.keypair) {
            Ok(envelope) => {
                debug!(
                    height = request.height,
                    round = request.round,
                    step = %request.step,
                    peer = %message.address,
                    "answering catch-up request"
                );
                vec![Action::Multicast {
                    targets: vec![message.address],
                    message: envelope,
                }]
            }
            Err(error) => {
                warn!(%error, "failed to sign catch-up reply");
                vec![]
            }
        }
    }

    fn handle_catch_up_reply(&mut self, message: ConsensusMessage) -> Vec<Action> {
        let reply: CatchUpReply = match message.decode() {
            Ok(reply) => reply,
            Err(error) => {
                warn!(%error, "undecodable catch-up reply");
                return vec![];
            }
        };
        if reply.height != self.round_state.height() {
            debug!(height = reply.height, "catch-up reply for another height");
            return vec![];
        }
        if !self.verify_envelope(&message, reply.height) {
            return vec![];
        }

        debug!(
            height = reply.height,
            count = reply.messages.len(),
            peer = %message.address,
            "replaying catch-up payloads"
        );
        // Replay through the normal handling path, each one re-verified
        reply
            .messages
            .into_iter()
            .map(|inner| Action::EnqueueInternal {
                event: Box::new(Event::MessageReceived { message: inner }),
            })
            .collect()
    }

    /// Ask the validators whose votes we are missing to re-send them; replay
    /// our own logged vote if we are the one missing (post-restart).
    fn request_catch_up(&mut self, step: RoundStep) -> Vec<Action> {
        let view = self.round_state.view();
        let missing = match step {
            RoundStep::Prevote => self.round_state.prevotes_mut(view.round).missing_voters(),
            RoundStep::Precommit => self.round_state.precommits_mut(view.round).missing_voters(),
            _ => return vec![],
        };
        if missing.is_empty() {
            return vec![];
        }

        let mut actions = Vec::new();
        if missing.contains(&self.address) {
            if let Some(own) = self.sent.last_sent(view.height, view.round, step) {
                debug!(%view, %step, "replaying own logged vote");
                actions.push(Action::EnqueueInternal {
                    event: Box::new(Event::MessageReceived { message: own }),
                });
            }
        }

        let targets: Vec<Address> = missing.into_iter().filter(|a| *a != self.address).collect();
        if targets.is_empty() {
            return actions;
        }
        let request = CatchUpRequest {
            height: view.height,
            round: view.round,
            step,
        };
        match ConsensusMessage::sign(MessageCode::CatchUpRequest, &request, &self.keypair) {
            Ok(envelope) => {
                info!(%view, %step, peers = targets.len(), "requesting missed votes");
                actions.push(Action::Multicast {
                    targets,
                    message: envelope,
                });
            }
            Err(error) => warn!(%error, "failed to sign catch-up request"),
        }
        actions
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Timeouts and proposal requests
    // ═══════════════════════════════════════════════════════════════════════

    fn handle_timeout(&mut self, info: TimeoutInfo) -> Vec<Action> {
        let state = &self.round_state;
        if info.height != state.height() || info.round > state.round() {
            debug!(%info, "dropping timeout for another view");
            return vec![];
        }
        if info.round < state.round() && info.step != RoundStep::NewHeight {
            debug!(%info, "dropping timeout from an earlier round");
            return vec![];
        }

        match info.step {
            RoundStep::NewHeight => {
                if state.step() == RoundStep::NewHeight {
                    self.enter_round(0)
                } else {
                    vec![]
                }
            }
            RoundStep::NewRound | RoundStep::Propose => {
                if state.step() <= RoundStep::Propose {
                    debug!(%info, "propose window expired");
                    self.enter_prevote()
                } else {
                    vec![]
                }
            }
            RoundStep::Prevote | RoundStep::Precommit => self.handle_stuck_timeout(info),
            RoundStep::PrevoteWait => {
                if state.step() != RoundStep::PrevoteWait {
                    return vec![];
                }
                // The wait expired without a majority, precommit what we saw
                let winner = state
                    .prevotes(info.round)
                    .and_then(MessageSet::two_thirds_majority)
                    .flatten()
                    .filter(|hash| {
                        state
                            .proposal()
                            .map(|p| p.block.hash() == *hash)
                            .unwrap_or(false)
                    });
                self.enter_precommit(winner)
            }
            RoundStep::PrecommitWait => {
                if state.step() == RoundStep::PrecommitWait {
                    self.enter_round(info.round + 1)
                } else {
                    vec![]
                }
            }
            RoundStep::Commit => vec![],
        }
    }

    /// A Prevote/Precommit timeout fired with no quorum progress: back off
    /// and retry, escalating to the catch-up protocol after enough retries.
    fn handle_stuck_timeout(&mut self, info: TimeoutInfo) -> Vec<Action> {
        if self.round_state.step() != info.step || self.round_state.round() != info.round {
            return vec![];
        }
        let retry = info.retry + 1;
        let mut actions = Vec::new();
        if retry >= self.config.catch_up_retries {
            actions.extend(self.request_catch_up(info.step));
        }
        let duration = self.config.timeout_duration(info.step, info.round, retry);
        actions.push(Action::ScheduleTimeout {
            info: TimeoutInfo::new(duration, info.height, info.round, info.step, retry),
        });
        actions
    }

    fn handle_proposal_request(&mut self, block: Block) -> Vec<Action> {
        let height = self.round_state.height();
        if block.height() != height {
            debug!(
                block_height = block.height(),
                height, "dropping proposal request for another height"
            );
            return vec![];
        }
        self.round_state.set_pending_request(block);

        let step = self.round_state.step();
        if self.round_state.validators().is_proposer(self.address)
            && step >= RoundStep::NewRound
            && step <= RoundStep::Propose
        {
            return self.propose_if_ready();
        }
        vec![]
    }

    fn drain_backlog(&mut self) -> Vec<Action> {
        self.backlog
            .drain_due(self.round_state.view())
            .into_iter()
            .map(|message| Action::EnqueueInternal {
                event: Box::new(Event::MessageReceived { message }),
            })
            .collect()
    }
}

impl StateMachine for ConsensusState {
    fn handle(&mut self, event: Event) -> Vec<Action> {
        if !self.started {
            debug!(event = event.type_name(), "engine stopped, dropping event");
            return vec![];
        }
        match event {
            Event::MessageReceived { message } => self.handle_message(message),
            Event::TimeoutFired { info } => self.handle_timeout(info),
            Event::BlockProposalRequest { block } => self.handle_proposal_request(block),
        }
    }

    fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    fn now(&self) -> Duration {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_storage::MemoryStore;
    use accord_test_helpers::{
        sealed_proposal, signed_precommit, signed_prevote, test_block, test_committee,
        FixedValidatorSource, MockVerifier,
    };
    use accord_types::{KeyPair, View};
    use tracing_test::traced_test;

    fn engine_at(
        keys: &[KeyPair],
        local: usize,
        validators: &accord_types::ValidatorSet,
    ) -> ConsensusState {
        ConsensusState::new(
            ConsensusConfig::default(),
            keys[local].clone(),
            Arc::new(MockVerifier::ok()),
            Arc::new(FixedValidatorSource::new(validators.clone())),
            Arc::new(SentMessageStorage::new(Arc::new(MemoryStore::new()))),
            0,
        )
    }

    /// Drive the engine from start into round 0's propose step.
    fn start_round_zero(engine: &mut ConsensusState) -> Vec<Action> {
        let mut actions = engine.start().unwrap();
        actions.extend(engine.handle(Event::TimeoutFired {
            info: TimeoutInfo::new(Duration::ZERO, 1, 0, RoundStep::NewHeight, 0),
        }));
        actions
    }

    fn broadcasts(actions: &[Action]) -> Vec<&ConsensusMessage> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Broadcast { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    fn committed_blocks(actions: &[Action]) -> Vec<&Block> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::CommitBlock { block } => Some(block),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_start_is_exclusive() {
        let (keys, validators) = test_committee(4);
        let mut engine = engine_at(&keys, 0, &validators);
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(ConsensusError::AlreadyStarted)));
        engine.stop().unwrap();
        assert!(matches!(engine.stop(), Err(ConsensusError::NotStarted)));
    }

    #[traced_test]
    #[test]
    fn test_single_validator_commits_alone() {
        let (keys, validators) = test_committee(1);
        let mut engine = engine_at(&keys, 0, &validators);
        start_round_zero(&mut engine);

        // No block yet, the engine waits for the assembly layer
        assert!(engine.round_state().proposal().is_none());

        let block = test_block(1, &keys[0].address());
        let actions = engine.handle(Event::BlockProposalRequest { block });

        // f=0, majority=1: our own votes carry the whole round through
        let committed = committed_blocks(&actions);
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].header.committed_seals.len(), 1);
        assert_eq!(engine.round_state().height(), 2);
    }

    #[traced_test]
    #[test]
    fn test_four_validators_full_round() {
        let (keys, validators) = test_committee(4);
        // keys[0] is round 0's proposer; run the engine as keys[1]
        let mut engine = engine_at(&keys, 1, &validators);
        start_round_zero(&mut engine);
        assert_eq!(engine.round_state().step(), RoundStep::Propose);

        let view = View::new(1, 0);
        let (proposal, envelope) = sealed_proposal(&keys[0], view, vec![]);
        let hash = proposal.block.hash();

        let actions = engine.handle(Event::MessageReceived { message: envelope });
        let sent = broadcasts(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].code, MessageCode::Prevote);
        assert_eq!(engine.round_state().step(), RoundStep::Prevote);

        // Two more prevotes reach the 2f+1 = 3 quorum (ours is the third)
        for key in [&keys[0], &keys[2]] {
            let (message, _) = signed_prevote(key, view, Some(hash));
            let actions = engine.handle(Event::MessageReceived { message });
            if engine.round_state().step() == RoundStep::Precommit {
                let sent = broadcasts(&actions);
                assert_eq!(sent.len(), 1);
                assert_eq!(sent[0].code, MessageCode::Precommit);
            }
        }
        assert_eq!(engine.round_state().step(), RoundStep::Precommit);
        assert_eq!(engine.round_state().locked_round(), Some(0));

        // Two peer precommits complete the quorum and commit the block
        let mut all_actions = Vec::new();
        for key in [&keys[0], &keys[2]] {
            let (message, _) = signed_precommit(key, view, Some(hash));
            all_actions.extend(engine.handle(Event::MessageReceived { message }));
        }
        let committed = committed_blocks(&all_actions);
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].hash(), hash);
        assert_eq!(committed[0].header.committed_seals.len(), 3);
        assert_eq!(engine.round_state().height(), 2);
    }

    #[traced_test]
    #[test]
    fn test_proposer_rotates_across_heights() {
        let (keys, validators) = test_committee(4);
        let mut engine = engine_at(&keys, 1, &validators);
        start_round_zero(&mut engine);
        assert!(engine.round_state().validators().is_proposer(keys[0].address()));

        // Commit height 1 with keys[0] proposing
        let view = View::new(1, 0);
        let (proposal, envelope) = sealed_proposal(&keys[0], view, vec![]);
        let hash = proposal.block.hash();
        engine.handle(Event::MessageReceived { message: envelope });
        for key in [&keys[0], &keys[2]] {
            let (m, _) = signed_prevote(key, view, Some(hash));
            engine.handle(Event::MessageReceived { message: m });
        }
        for key in [&keys[0], &keys[2]] {
            let (m, _) = signed_precommit(key, view, Some(hash));
            engine.handle(Event::MessageReceived { message: m });
        }
        assert_eq!(engine.round_state().height(), 2);

        // Round 0 of height 2 belongs to the next validator in ring order
        assert!(engine.round_state().validators().is_proposer(keys[1].address()));
        assert!(!engine.round_state().validators().is_proposer(keys[0].address()));
    }

    #[traced_test]
    #[test]
    fn test_propose_timeout_prevotes_nil() {
        let (keys, validators) = test_committee(4);
        let mut engine = engine_at(&keys, 1, &validators);
        start_round_zero(&mut engine);

        let actions = engine.handle(Event::TimeoutFired {
            info: TimeoutInfo::new(Duration::ZERO, 1, 0, RoundStep::Propose, 0),
        });
        let sent = broadcasts(&actions);
        assert_eq!(sent.len(), 1);
        let vote: Vote = sent[0].decode().unwrap();
        assert!(vote.is_nil());
        assert_eq!(engine.round_state().step(), RoundStep::Prevote);
    }

    #[traced_test]
    #[test]
    fn test_nil_precommit_quorum_advances_round() {
        let (keys, validators) = test_committee(4);
        let mut engine = engine_at(&keys, 1, &validators);
        start_round_zero(&mut engine);

        // Propose window expires, we prevote nil
        engine.handle(Event::TimeoutFired {
            info: TimeoutInfo::new(Duration::ZERO, 1, 0, RoundStep::Propose, 0),
        });
        let view = View::new(1, 0);
        for key in [&keys[0], &keys[2]] {
            let (message, _) = signed_prevote(key, view, None);
            engine.handle(Event::MessageReceived { message });
        }
        assert_eq!(engine.round_state().step(), RoundStep::Precommit);

        for key in [&keys[0], &keys[2]] {
            let (message, _) = signed_precommit(key, view, None);
            engine.handle(Event::MessageReceived { message });
        }
        assert_eq!(engine.round_state().round(), 1);
        assert_eq!(engine.round_state().height(), 1);
    }

    #[traced_test]
    #[test]
    fn test_accepted_vote_is_relayed_to_ring_neighbors() {
        let (keys, validators) = test_committee(4);
        let mut engine = engine_at(&keys, 1, &validators);
        start_round_zero(&mut engine);

        let (message, _) = signed_prevote(&keys[3], View::new(1, 0), None);
        let actions = engine.handle(Event::MessageReceived { message });

        let relayed: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                Action::Gossip { neighbors, message } => Some((neighbors, message)),
                _ => None,
            })
            .collect();
        assert_eq!(relayed.len(), 1);
        let (neighbors, message) = relayed[0];
        assert_eq!(neighbors, &vec![keys[0].address(), keys[2].address()]);
        assert_eq!(message.code, MessageCode::Prevote);

        // The same vote again is a duplicate and is not relayed twice
        let (message, _) = signed_prevote(&keys[3], View::new(1, 0), None);
        let actions = engine.handle(Event::MessageReceived { message });
        assert!(actions.is_empty());
    }

    #[traced_test]
    #[test]
    fn test_conflicting_vote_yields_evidence() {
        let (keys, validators) = test_committee(4);
        let mut engine = engine_at(&keys, 1, &validators);
        start_round_zero(&mut engine);

        let view = View::new(1, 0);
        let (first, _) = signed_prevote(&keys[2], view, Some(Hash::from_bytes(b"one")));
        engine.handle(Event::MessageReceived { message: first });

        let (second, _) = signed_prevote(&keys[2], view, Some(Hash::from_bytes(b"two")));
        let actions = engine.handle(Event::MessageReceived { message: second });

        let evidence: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                Action::ReportEvidence { evidence } => Some(evidence),
                _ => None,
            })
            .collect();
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].offender, keys[2].address());
        assert_ne!(evidence[0].first.payload, evidence[0].second.payload);
    }

    #[traced_test]
    #[test]
    fn test_insufficient_precommits_do_not_commit() {
        let (keys, validators) = test_committee(4);
        let mut engine = engine_at(&keys, 1, &validators);
        start_round_zero(&mut engine);

        let view = View::new(1, 0);
        let (proposal, envelope) = sealed_proposal(&keys[0], view, vec![]);
        let hash = proposal.block.hash();
        engine.handle(Event::MessageReceived { message: envelope });

        // A single precommit is far below the 2f+1 = 3 quorum
        let (message, _) = signed_precommit(&keys[0], view, Some(hash));
        let actions = engine.handle(Event::MessageReceived { message });
        assert!(committed_blocks(&actions).is_empty());
        assert_eq!(engine.round_state().height(), 1);
    }

    #[traced_test]
    #[test]
    fn test_finalization_requires_a_seal_quorum() {
        let (keys, validators) = test_committee(4);
        let mut engine = engine_at(&keys, 1, &validators);
        start_round_zero(&mut engine);

        let view = View::new(1, 0);
        let (proposal, envelope) = sealed_proposal(&keys[0], view, vec![]);
        let hash = proposal.block.hash();
        engine.handle(Event::MessageReceived { message: envelope });

        // Three precommits for the hash, but one carries no commit seal:
        // the vote quorum exists, the seal quorum does not
        for key in [&keys[0], &keys[2]] {
            let (message, _) = signed_precommit(key, view, Some(hash));
            engine.handle(Event::MessageReceived { message });
        }
        let sealless = Vote {
            view,
            block_hash: Some(hash),
            seal: None,
        };
        let message = ConsensusMessage::sign(MessageCode::Precommit, &sealless, &keys[3]).unwrap();
        let actions = engine.handle(Event::MessageReceived { message });

        assert!(committed_blocks(&actions).is_empty());
        assert_eq!(engine.round_state().height(), 1);
    }

    #[traced_test]
    #[test]
    fn test_future_round_votes_trigger_round_skip() {
        let (keys, validators) = test_committee(4);
        let mut engine = engine_at(&keys, 1, &validators);
        start_round_zero(&mut engine);
        assert_eq!(engine.round_state().round(), 0);

        // f+1 = 2 distinct voters at round 2 prove the network moved on
        let future = View::new(1, 2);
        let (message, _) = signed_prevote(&keys[0], future, None);
        engine.handle(Event::MessageReceived { message });
        assert_eq!(engine.round_state().round(), 0);

        let (message, _) = signed_prevote(&keys[2], future, None);
        engine.handle(Event::MessageReceived { message });
        assert_eq!(engine.round_state().round(), 2);
    }

    #[traced_test]
    #[test]
    fn test_round_skip_needs_distinct_future_voters() {
        let (keys, validators) = test_committee(4);
        let mut engine = engine_at(&keys, 1, &validators);
        start_round_zero(&mut engine);

        // One validator's prevote plus precommit for a far round count once:
        // a single faulty node cannot drag everyone to an arbitrary round
        let future = View::new(1, 1000);
        let (message, _) = signed_prevote(&keys[0], future, None);
        engine.handle(Event::MessageReceived { message });
        let (message, _) = signed_precommit(&keys[0], future, None);
        engine.handle(Event::MessageReceived { message });
        assert_eq!(engine.round_state().round(), 0);

        // A second distinct voter crosses f+1 = 2 and the skip happens
        let (message, _) = signed_precommit(&keys[2], future, None);
        engine.handle(Event::MessageReceived { message });
        assert_eq!(engine.round_state().round(), 1000);
    }

    #[traced_test]
    #[test]
    fn test_future_height_vote_is_buffered_and_replayed() {
        let (keys, validators) = test_committee(4);
        let mut engine = engine_at(&keys, 1, &validators);
        start_round_zero(&mut engine);

        let (message, _) = signed_prevote(&keys[0], View::new(2, 0), None);
        let actions = engine.handle(Event::MessageReceived {
            message: message.clone(),
        });
        assert!(actions.is_empty());

        // Commit height 1 via a full quorum, the buffered vote replays
        let view = View::new(1, 0);
        let (proposal, envelope) = sealed_proposal(&keys[0], view, vec![]);
        let hash = proposal.block.hash();
        engine.handle(Event::MessageReceived { message: envelope });
        for key in [&keys[0], &keys[2]] {
            let (m, _) = signed_prevote(key, view, Some(hash));
            engine.handle(Event::MessageReceived { message: m });
        }
        let mut all = Vec::new();
        for key in [&keys[0], &keys[2]] {
            let (m, _) = signed_precommit(key, view, Some(hash));
            all.extend(engine.handle(Event::MessageReceived { message: m }));
        }
        assert_eq!(engine.round_state().height(), 2);
        let replayed: Vec<_> = all
            .iter()
            .filter_map(|a| match a {
                Action::EnqueueInternal { event } => Some(event),
                _ => None,
            })
            .collect();
        assert_eq!(replayed.len(), 1);
    }

    #[traced_test]
    #[test]
    fn test_stuck_prevote_escalates_to_catch_up() {
        let (keys, validators) = test_committee(4);
        let mut engine = engine_at(&keys, 1, &validators);
        start_round_zero(&mut engine);

        // Prevote nil via propose timeout, then stall
        engine.handle(Event::TimeoutFired {
            info: TimeoutInfo::new(Duration::ZERO, 1, 0, RoundStep::Propose, 0),
        });
        assert_eq!(engine.round_state().step(), RoundStep::Prevote);

        // First retry just reschedules
        let actions = engine.handle(Event::TimeoutFired {
            info: TimeoutInfo::new(Duration::ZERO, 1, 0, RoundStep::Prevote, 0),
        });
        assert!(actions
            .iter()
            .all(|a| matches!(a, Action::ScheduleTimeout { .. })));

        // Second retry crosses the threshold and multicasts a request
        let actions = engine.handle(Event::TimeoutFired {
            info: TimeoutInfo::new(Duration::ZERO, 1, 0, RoundStep::Prevote, 1),
        });
        let requests: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                Action::Multicast { targets, message } => Some((targets, message)),
                _ => None,
            })
            .collect();
        assert_eq!(requests.len(), 1);
        let (targets, message) = requests[0];
        assert_eq!(message.code, MessageCode::CatchUpRequest);
        // Everyone but us is missing
        assert_eq!(targets.len(), 3);
        assert!(!targets.contains(&keys[1].address()));
    }

    #[traced_test]
    #[test]
    fn test_catch_up_request_answered_with_held_votes() {
        let (keys, validators) = test_committee(4);
        let mut engine = engine_at(&keys, 1, &validators);
        start_round_zero(&mut engine);

        let view = View::new(1, 0);
        let (message, _) = signed_prevote(&keys[0], view, None);
        engine.handle(Event::MessageReceived { message });

        let request = CatchUpRequest {
            height: 1,
            round: 0,
            step: RoundStep::Prevote,
        };
        let envelope =
            ConsensusMessage::sign(MessageCode::CatchUpRequest, &request, &keys[2]).unwrap();
        let actions = engine.handle(Event::MessageReceived { message: envelope });

        let replies: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                Action::Multicast { targets, message } => Some((targets, message)),
                _ => None,
            })
            .collect();
        assert_eq!(replies.len(), 1);
        let (targets, message) = replies[0];
        assert_eq!(targets, &vec![keys[2].address()]);
        let reply: CatchUpReply = message.decode().unwrap();
        assert_eq!(reply.height, 1);
        assert_eq!(reply.messages.len(), 1);
    }

    #[traced_test]
    #[test]
    fn test_catch_up_reply_replays_payloads() {
        let (keys, validators) = test_committee(4);
        let mut engine = engine_at(&keys, 1, &validators);
        start_round_zero(&mut engine);

        let view = View::new(1, 0);
        let (vote_message, _) = signed_prevote(&keys[0], view, None);
        let reply = CatchUpReply {
            height: 1,
            messages: vec![vote_message],
        };
        let envelope = ConsensusMessage::sign(MessageCode::CatchUpReply, &reply, &keys[2]).unwrap();
        let actions = engine.handle(Event::MessageReceived { message: envelope });

        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], Action::EnqueueInternal { event }
            if matches!(event.as_ref(), Event::MessageReceived { .. })));
    }

    #[traced_test]
    #[test]
    fn test_invalid_proposal_advances_round() {
        let (keys, validators) = test_committee(4);
        let mut engine = ConsensusState::new(
            ConsensusConfig::default(),
            keys[1].clone(),
            Arc::new(MockVerifier::failing(VerifyError::InvalidBody(
                "tx root mismatch".into(),
            ))),
            Arc::new(FixedValidatorSource::new(validators.clone())),
            Arc::new(SentMessageStorage::new(Arc::new(MemoryStore::new()))),
            0,
        );
        start_round_zero(&mut engine);

        let (_, envelope) = sealed_proposal(&keys[0], View::new(1, 0), vec![]);
        engine.handle(Event::MessageReceived { message: envelope });
        assert_eq!(engine.round_state().round(), 1);
        assert!(engine.round_state().proposal().is_none());
    }

    #[traced_test]
    #[test]
    fn test_proposal_from_wrong_proposer_rejected() {
        let (keys, validators) = test_committee(4);
        let mut engine = engine_at(&keys, 1, &validators);
        start_round_zero(&mut engine);

        // keys[2] is not round 0's proposer
        let (_, envelope) = sealed_proposal(&keys[2], View::new(1, 0), vec![]);
        let actions = engine.handle(Event::MessageReceived { message: envelope });
        assert!(actions.is_empty());
        assert!(engine.round_state().proposal().is_none());
    }

    #[traced_test]
    #[test]
    fn test_verify_proposal_checks_sender_and_seal() {
        let (keys, validators) = test_committee(4);
        let mut engine = engine_at(&keys, 1, &validators);
        start_round_zero(&mut engine);
        let view = View::new(1, 0);

        // A well-formed proposal from round 0's proposer passes
        let (proposal, envelope) = sealed_proposal(&keys[0], view, vec![]);
        assert_eq!(engine.verify_proposal(&proposal, &envelope), Ok(()));

        // keys[2] is not round 0's proposer
        let (proposal, envelope) = sealed_proposal(&keys[2], view, vec![]);
        assert_eq!(
            engine.verify_proposal(&proposal, &envelope),
            Err(VerifyError::NotFromProposer)
        );

        // Right sender, forged header seal
        let (mut proposal, _) = sealed_proposal(&keys[0], view, vec![]);
        proposal.block.header.seal = keys[2].sign(&signing::header_seal_message(
            &proposal.block.header.hash(),
        ));
        let envelope =
            ConsensusMessage::sign(MessageCode::Propose, &proposal, &keys[0]).unwrap();
        assert!(matches!(
            engine.verify_proposal(&proposal, &envelope),
            Err(VerifyError::InvalidHeader(_))
        ));
    }

    #[traced_test]
    #[test]
    fn test_restart_replays_logged_prevote() {
        let (keys, validators) = test_committee(4);
        let store: Arc<dyn accord_storage::KeyValueStore> = Arc::new(MemoryStore::new());

        // First run: prevote nil at (1, 0), then crash
        let first_hash;
        {
            let sent = Arc::new(SentMessageStorage::new(Arc::clone(&store)));
            let mut engine = ConsensusState::new(
                ConsensusConfig::default(),
                keys[1].clone(),
                Arc::new(MockVerifier::ok()),
                Arc::new(FixedValidatorSource::new(validators.clone())),
                sent,
                0,
            );
            start_round_zero(&mut engine);
            let actions = engine.handle(Event::TimeoutFired {
                info: TimeoutInfo::new(Duration::ZERO, 1, 0, RoundStep::Propose, 0),
            });
            first_hash = broadcasts(&actions)[0].signature;
        }

        // Second run: a valid proposal is on hand, but the logged nil vote
        // is re-sent instead of a fresh conflicting one
        let sent = Arc::new(SentMessageStorage::new(store));
        let mut engine = ConsensusState::new(
            ConsensusConfig::default(),
            keys[1].clone(),
            Arc::new(MockVerifier::ok()),
            Arc::new(FixedValidatorSource::new(validators.clone())),
            sent,
            0,
        );
        start_round_zero(&mut engine);
        let (_, envelope) = sealed_proposal(&keys[0], View::new(1, 0), vec![]);
        let actions = engine.handle(Event::MessageReceived { message: envelope });
        let sent_votes = broadcasts(&actions);
        assert_eq!(sent_votes.len(), 1);
        assert_eq!(sent_votes[0].signature, first_hash);
        let vote: Vote = sent_votes[0].decode().unwrap();
        assert!(vote.is_nil());
    }

    #[traced_test]
    #[test]
    fn test_observer_does_not_vote() {
        let (keys, validators) = test_committee(4);
        let outsider = KeyPair::from_seed([0xEE; 32]);
        let mut engine = ConsensusState::new(
            ConsensusConfig::default(),
            outsider,
            Arc::new(MockVerifier::ok()),
            Arc::new(FixedValidatorSource::new(validators.clone())),
            Arc::new(SentMessageStorage::new(Arc::new(MemoryStore::new()))),
            0,
        );
        start_round_zero(&mut engine);

        let (_, envelope) = sealed_proposal(&keys[0], View::new(1, 0), vec![]);
        let actions = engine.handle(Event::MessageReceived { message: envelope });
        assert!(broadcasts(&actions).is_empty());
    }
}
