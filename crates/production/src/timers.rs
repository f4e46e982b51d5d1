//! The single-timeout ticker task.

use accord_types::TimeoutInfo;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Manages the engine's single outstanding timeout on its own task.
///
/// The engine schedules timeouts through [`TimeoutTicker::schedule`]; the
/// ticker keeps at most one armed and forwards the firing into the event
/// channel. A schedule request only takes effect when the armed timeout is at
/// or before it in the (height, round, step, retry) order — the protocol only
/// ever moves forward, so a request for an earlier position is stale and
/// silently dropped.
///
/// The ticker never touches engine state; it exists purely to own the OS
/// timer.
pub struct TimeoutTicker {
    schedule_tx: mpsc::Sender<TimeoutInfo>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimeoutTicker {
    /// Spawn the ticker task, forwarding fired timeouts into `fired_tx`.
    pub fn spawn(fired_tx: mpsc::Sender<TimeoutInfo>) -> Self {
        let (schedule_tx, schedule_rx) = mpsc::channel(64);
        let handle = tokio::spawn(run_ticker(schedule_rx, fired_tx));
        Self {
            schedule_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Request a timeout. Non-blocking; requests are dropped rather than
    /// awaited when the ticker is backlogged or stopped.
    pub fn schedule(&self, info: TimeoutInfo) {
        if let Err(error) = self.schedule_tx.try_send(info) {
            debug!(%error, "timeout request dropped");
        }
    }

    /// Stop the ticker task. Idempotent and safe to call concurrently with
    /// in-flight schedule requests.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for TimeoutTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_ticker(
    mut schedule_rx: mpsc::Receiver<TimeoutInfo>,
    fired_tx: mpsc::Sender<TimeoutInfo>,
) {
    let mut armed: Option<(TimeoutInfo, tokio::time::Instant)> = None;
    loop {
        match armed {
            None => match schedule_rx.recv().await {
                Some(info) => {
                    trace!(%info, "arming timeout");
                    let deadline = tokio::time::Instant::now() + info.duration;
                    armed = Some((info, deadline));
                }
                None => return,
            },
            Some((info, deadline)) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        armed = None;
                        trace!(%info, "timeout fired");
                        if fired_tx.send(info).await.is_err() {
                            // Consumer gone, nothing left to time
                            return;
                        }
                    }
                    request = schedule_rx.recv() => {
                        match request {
                            Some(new) if info.earlier_or_equal(&new) => {
                                trace!(old = %info, %new, "preempting armed timeout");
                                let deadline = tokio::time::Instant::now() + new.duration;
                                armed = Some((new, deadline));
                            }
                            Some(stale) => {
                                trace!(armed = %info, %stale, "dropping stale timeout request");
                            }
                            None => return,
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_types::RoundStep;
    use std::time::Duration;

    fn ti(round: u64, step: RoundStep, millis: u64) -> TimeoutInfo {
        TimeoutInfo::new(Duration::from_millis(millis), 1, round, step, 0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_timeout_preempts_armed_one() {
        let (fired_tx, mut fired_rx) = mpsc::channel(8);
        let ticker = TimeoutTicker::spawn(fired_tx);

        ticker.schedule(ti(0, RoundStep::Propose, 1000));
        ticker.schedule(ti(0, RoundStep::Prevote, 50));

        let fired = fired_rx.recv().await.unwrap();
        assert_eq!(fired.step, RoundStep::Prevote);
        ticker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_request_is_silently_dropped() {
        let (fired_tx, mut fired_rx) = mpsc::channel(8);
        let ticker = TimeoutTicker::spawn(fired_tx);

        ticker.schedule(ti(0, RoundStep::Prevote, 50));
        ticker.schedule(ti(0, RoundStep::Propose, 10));

        // The armed prevote timeout fires; the stale propose request never does
        let fired = fired_rx.recv().await.unwrap();
        assert_eq!(fired.step, RoundStep::Prevote);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(fired_rx.try_recv().is_err());
        ticker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_at_same_position_rearms() {
        let (fired_tx, mut fired_rx) = mpsc::channel(8);
        let ticker = TimeoutTicker::spawn(fired_tx);

        ticker.schedule(ti(0, RoundStep::Prevote, 50));
        let first = fired_rx.recv().await.unwrap();
        assert_eq!(first.retry, 0);

        let retry = TimeoutInfo::new(Duration::from_millis(50), 1, 0, RoundStep::Prevote, 1);
        ticker.schedule(retry);
        let second = fired_rx.recv().await.unwrap();
        assert_eq!(second.retry, 1);
        ticker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let (fired_tx, _fired_rx) = mpsc::channel(8);
        let ticker = TimeoutTicker::spawn(fired_tx);
        ticker.schedule(ti(0, RoundStep::Propose, 50));
        ticker.stop();
        ticker.stop();
        ticker.schedule(ti(0, RoundStep::Prevote, 50));
    }
}
