//! StallSweeper - periodic liveness pass.
//!
//! Each tick:
//! 1. `sweep_stalled(cutoff)` settles entries whose confirmation never came
//! 2. `resume_backoff()` re-sends heads whose retry delay has elapsed

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::engine::QueueEngine;

/// Handle to a running sweeper task.
/// - `request_shutdown()` stops it after the current tick
/// - `shutdown_and_join()` also waits for it to finish
pub struct StallSweeper {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl StallSweeper {
    /// Spawn the sweeper on the current runtime. The first tick runs
    /// immediately.
    pub fn spawn(engine: QueueEngine, cutoff: Duration, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            sweep_loop(engine, cutoff, interval, &mut shutdown_rx).await;
        });

        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // receiver is gone once the loop has exited
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(err) = self.join.await {
            warn!(error = %err, "stall sweeper task ended abnormally");
        }
    }
}

async fn sweep_loop(
    engine: QueueEngine,
    cutoff: Duration,
    interval: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    info!(?cutoff, ?interval, "stall sweeper started");

    // interval() panics on a zero period
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender dropped counts as shutdown
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        match engine.sweep_stalled(cutoff).await {
            Ok(report) => debug!(examined = report.examined, "sweep tick"),
            Err(err) => warn!(error = %err, "stall sweep failed"),
        }
        if let Err(err) = engine.resume_backoff().await {
            warn!(error = %err, "resuming backed-off queues failed");
        }
    }

    info!("stall sweeper stopped");
}
