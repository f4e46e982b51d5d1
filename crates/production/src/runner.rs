//! The async runner: executes the engine's actions and feeds it events.

use crate::timers::TimeoutTicker;
use accord_consensus::{ConsensusError, ConsensusState};
use accord_core::{Action, Event, StateMachine};
use accord_messages::{ConflictingVoteEvidence, ConsensusMessage};
use accord_types::{Address, Block, TimeoutInfo};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Outbound message transport.
///
/// Implementations must not block; sends are fire-and-forget from the
/// runner's point of view.
pub trait Network: Send + Sync {
    /// Send to every validator in the active set.
    fn broadcast(&self, message: ConsensusMessage);

    /// Send to an explicit subset of validators.
    fn multicast(&self, targets: &[Address], message: ConsensusMessage);

    /// Send to the local node's ring neighbors only.
    fn gossip(&self, neighbors: &[Address], message: ConsensusMessage);
}

/// Finalized-block consumer: the external chain and evidence layers.
pub trait ChainSink: Send + Sync {
    /// Execute and store a finalized block (committed seals attached).
    fn commit(&self, block: Block);

    /// Receive provable conflicting-vote evidence.
    fn report_evidence(&self, evidence: ConflictingVoteEvidence);
}

/// Drives a [`ConsensusState`] engine from an async event loop.
///
/// The runner owns all I/O: it drains one event at a time (internal events
/// first, then fired timers, then external inputs), hands it to the engine,
/// and executes the returned actions. The engine itself stays synchronous and
/// single-threaded; nothing else ever touches its state.
pub struct Runner<N, C> {
    engine: ConsensusState,
    network: Arc<N>,
    chain: Arc<C>,
    ticker: TimeoutTicker,
    events_rx: mpsc::Receiver<Event>,
    fired_rx: mpsc::Receiver<TimeoutInfo>,
    internal: VecDeque<Event>,
    started_at: std::time::Instant,
}

impl<N: Network, C: ChainSink> Runner<N, C> {
    /// Wire a runner around an engine.
    ///
    /// External events (network messages, proposal requests) arrive through
    /// `events_rx`; the ticker is spawned here and owned by the runner.
    pub fn new(
        engine: ConsensusState,
        network: Arc<N>,
        chain: Arc<C>,
        events_rx: mpsc::Receiver<Event>,
    ) -> Self {
        let (fired_tx, fired_rx) = mpsc::channel(64);
        Self {
            engine,
            network,
            chain,
            ticker: TimeoutTicker::spawn(fired_tx),
            events_rx,
            fired_rx,
            internal: VecDeque::new(),
            started_at: std::time::Instant::now(),
        }
    }

    /// Start the engine and run until the event channel closes.
    pub async fn run(mut self) -> Result<(), ConsensusError> {
        let actions = self.engine.start()?;
        self.execute(actions);

        loop {
            // Internal events are consequences of prior processing and drain
            // before any new external input
            let event = if let Some(event) = self.internal.pop_front() {
                event
            } else {
                tokio::select! {
                    biased;
                    fired = self.fired_rx.recv() => match fired {
                        Some(info) => Event::TimeoutFired { info },
                        None => break,
                    },
                    external = self.events_rx.recv() => match external {
                        Some(event) => event,
                        None => break,
                    },
                }
            };

            debug!(event = event.type_name(), "processing event");
            self.engine.set_time(self.started_at.elapsed());
            let actions = self.engine.handle(event);
            self.execute(actions);
        }

        info!("event channel closed, shutting down");
        self.ticker.stop();
        self.engine.stop()?;
        Ok(())
    }

    fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Broadcast { message } => self.network.broadcast(message),
                Action::Multicast { targets, message } => {
                    self.network.multicast(&targets, message)
                }
                Action::Gossip { neighbors, message } => self.network.gossip(&neighbors, message),
                Action::ScheduleTimeout { info } => self.ticker.schedule(info),
                Action::CommitBlock { block } => self.chain.commit(block),
                Action::EnqueueInternal { event } => self.internal.push_back(*event),
                Action::ReportEvidence { evidence } => self.chain.report_evidence(evidence),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_consensus::{ConsensusConfig, SentMessageStorage};
    use accord_storage::MemoryStore;
    use accord_test_helpers::{test_block, test_committee, FixedValidatorSource, MockVerifier};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingNetwork {
        broadcasts: Mutex<Vec<ConsensusMessage>>,
    }

    impl Network for RecordingNetwork {
        fn broadcast(&self, message: ConsensusMessage) {
            self.broadcasts.lock().push(message);
        }
        fn multicast(&self, _targets: &[Address], message: ConsensusMessage) {
            self.broadcasts.lock().push(message);
        }
        fn gossip(&self, _neighbors: &[Address], message: ConsensusMessage) {
            self.broadcasts.lock().push(message);
        }
    }

    #[derive(Default)]
    struct RecordingChain {
        committed: Mutex<Vec<Block>>,
    }

    impl ChainSink for RecordingChain {
        fn commit(&self, block: Block) {
            self.committed.lock().push(block);
        }
        fn report_evidence(&self, _evidence: ConflictingVoteEvidence) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_validator_commits_through_runner() {
        let (keys, validators) = test_committee(1);
        let engine = ConsensusState::new(
            ConsensusConfig::default(),
            keys[0].clone(),
            Arc::new(MockVerifier::ok()),
            Arc::new(FixedValidatorSource::new(validators)),
            Arc::new(SentMessageStorage::new(Arc::new(MemoryStore::new()))),
            0,
        );

        let network = Arc::new(RecordingNetwork::default());
        let chain = Arc::new(RecordingChain::default());
        let (events_tx, events_rx) = mpsc::channel(16);
        let runner = Runner::new(engine, Arc::clone(&network), Arc::clone(&chain), events_rx);
        let handle = tokio::spawn(runner.run());

        let block = test_block(1, &keys[0].address());
        events_tx
            .send(Event::BlockProposalRequest { block })
            .await
            .unwrap();

        // Paused time auto-advances through the new-height delay
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(events_tx);
        handle.await.unwrap().unwrap();

        let committed = chain.committed.lock();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].header.committed_seals.len(), 1);
        // Proposal, prevote, and precommit all went out
        assert_eq!(network.broadcasts.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_drains_internal_events_first() {
        // A four-validator engine that cannot make progress alone: the run
        // loop must still start, process, and shut down cleanly
        let (keys, validators) = test_committee(4);
        let engine = ConsensusState::new(
            ConsensusConfig::default(),
            keys[1].clone(),
            Arc::new(MockVerifier::ok()),
            Arc::new(FixedValidatorSource::new(validators)),
            Arc::new(SentMessageStorage::new(Arc::new(MemoryStore::new()))),
            0,
        );

        let network = Arc::new(RecordingNetwork::default());
        let chain = Arc::new(RecordingChain::default());
        let (events_tx, events_rx) = mpsc::channel(16);
        let runner = Runner::new(engine, Arc::clone(&network), Arc::clone(&chain), events_rx);
        let handle = tokio::spawn(runner.run());

        // Propose window expires unanswered, the engine prevotes nil
        tokio::time::sleep(Duration::from_secs(6)).await;
        drop(events_tx);
        handle.await.unwrap().unwrap();

        let broadcasts = network.broadcasts.lock();
        assert!(!broadcasts.is_empty());
        assert!(chain.committed.lock().is_empty());
    }
}
