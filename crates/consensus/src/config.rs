//! Consensus engine configuration.

use accord_types::RoundStep;
use std::time::Duration;

/// Tuning knobs for the consensus engine.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Delay between committing a block and entering round 0 of the next
    /// height.
    pub new_height_timeout: Duration,

    /// Base time to wait for a proposal before prevoting nil.
    pub propose_timeout: Duration,

    /// Base time to wait in Prevote/Precommit before a stuck retry.
    pub vote_timeout: Duration,

    /// Time to wait in PrevoteWait/PrecommitWait for a majority to emerge
    /// after seeing 2/3 of any votes.
    pub wait_timeout: Duration,

    /// Extra wait added per round, so later rounds tolerate more latency.
    pub round_backoff: Duration,

    /// Extra wait added per stuck retry at the same (height, round, step).
    pub retry_backoff: Duration,

    /// Number of stuck retries at the same (height, round, step) before the
    /// catch-up protocol kicks in.
    pub catch_up_retries: u32,

    /// Maximum number of buffered future messages.
    pub max_backlog: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            new_height_timeout: Duration::from_millis(1000),
            propose_timeout: Duration::from_millis(3000),
            vote_timeout: Duration::from_millis(1000),
            wait_timeout: Duration::from_millis(500),
            round_backoff: Duration::from_millis(500),
            retry_backoff: Duration::from_millis(500),
            catch_up_retries: 2,
            max_backlog: 1024,
        }
    }
}

impl ConsensusConfig {
    /// Timeout duration for a step, backed off by round and retry.
    pub fn timeout_duration(&self, step: RoundStep, round: u64, retry: u32) -> Duration {
        let base = match step {
            RoundStep::NewHeight => self.new_height_timeout,
            RoundStep::NewRound | RoundStep::Propose => self.propose_timeout,
            RoundStep::Prevote | RoundStep::Precommit => self.vote_timeout,
            RoundStep::PrevoteWait | RoundStep::PrecommitWait => self.wait_timeout,
            RoundStep::Commit => self.new_height_timeout,
        };
        base + self.round_backoff * round.min(u32::MAX as u64) as u32
            + self.retry_backoff * retry
    }
}
