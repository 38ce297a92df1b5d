//! Progress Broadcaster - periodic image fetch snapshots for one creation call.

use crate::progress::{ImageFetchProgress, ProgressTracker};
use async_trait::async_trait;
use log::{debug, warn};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

/// Default cadence of periodic snapshots.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// Shortest cadence; tokio intervals need a non-zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Delivery of a snapshot failed.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ReportError(pub String);

/// Receiver of progress snapshots.
#[async_trait]
pub trait ProgressSink: Send {
    async fn report(&mut self, snapshot: Vec<ImageFetchProgress>) -> Result<(), ReportError>;
}

/// Counters of one broadcaster run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastSummary {
    /// Snapshots sent on the periodic timer.
    pub periodic: usize,
    /// Snapshots whose delivery failed, the final one included.
    pub failed: usize,
    /// Whether the final snapshot was delivered.
    pub final_delivered: bool,
}

pub struct ProgressBroadcaster<S> {
    tracker: ProgressTracker,
    sink: S,
    interval: Duration,
    operation_id: String,
}

impl<S: ProgressSink> ProgressBroadcaster<S> {
    pub fn new(
        tracker: ProgressTracker,
        sink: S,
        interval: Duration,
        operation_id: impl Into<String>,
    ) -> Self {
        Self {
            tracker,
            sink,
            interval: interval.max(MIN_INTERVAL),
            operation_id: operation_id.into(),
        }
    }

    /// Broadcast on every tick until `done` fires (or its sender is dropped),
    /// then broadcast exactly once more and return.
    pub async fn run(mut self, mut done: oneshot::Receiver<()>) -> BroadcastSummary {
        let mut summary = BroadcastSummary::default();
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    summary.periodic += 1;
                    if !self.broadcast().await {
                        summary.failed += 1;
                    }
                }
                _ = &mut done => {
                    summary.final_delivered = self.broadcast().await;
                    if !summary.final_delivered {
                        summary.failed += 1;
                    }
                    debug!(
                        "Broadcaster: Operation {} finished after {} periodic snapshots",
                        self.operation_id, summary.periodic
                    );
                    return summary;
                }
            }
        }
    }

    async fn broadcast(&mut self) -> bool {
        let snapshot = self.tracker.snapshot();
        match self.sink.report(snapshot).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Broadcaster: Failed to send progress for operation {}: {}",
                    self.operation_id, e
                );
                false
            }
        }
    }
}
