// Heartbeat/timeout sweeper
//
// Periodically asks the hub to evict sessions that stopped heart-beating.
// Sweeps travel through the hub's command queue like every other mutation,
// so one sweep never overlaps another.

use crate::hub::PresenceHandle;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct Sweeper;

impl Sweeper {
    /// Start sweeping every `period`. The first sweep happens one full
    /// period after the call.
    pub fn spawn(presence: PresenceHandle, period: Duration) -> SweeperHandle {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                match presence.sweep().await {
                    Ok(report) if !report.evicted.is_empty() => {
                        tracing::debug!("Sweep evicted {} session(s)", report.evicted.len());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Stopping sweeper: {}", e);
                        break;
                    }
                }
            }
        });

        SweeperHandle { task }
    }
}

/// Handle to a running sweeper
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the timer. A sweep already queued on the hub still completes.
    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
