// src/core/tasks/reaper.rs

//! Implements the periodic cache index reaper.

use crate::core::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Counts of keys removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Keys whose expiration had passed.
    pub expired: usize,
    /// Keys removed to bring the index back under its size limits.
    pub evicted: usize,
}

/// A store whose index can be swept for expired and oversize entries.
pub trait Sweep: Send + Sync {
    fn name(&self) -> &str;
    fn sweep(&self) -> SweepReport;
}

/// `IndexReaper` is a background task owned by a cache's lifecycle. It is started
/// on connect and stopped through its shutdown channel on close.
pub struct IndexReaper<S: Sweep> {
    store: Arc<S>,
    interval: Duration,
}

impl<S: Sweep + 'static> IndexReaper<S> {
    pub fn new(store: Arc<S>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Runs the main loop for the reaper.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Index reaper for cache '{}' started (every {:?}).",
            self.store.name(),
            self.interval
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.reap();
                }
                _ = shutdown_rx.recv() => {
                    info!("Index reaper for cache '{}' shutting down.", self.store.name());
                    return;
                }
            }
        }
    }

    fn reap(&self) {
        let report = self.store.sweep();
        if report.expired == 0 && report.evicted == 0 {
            return;
        }
        let name = self.store.name();
        metrics::REAPER_REMOVALS_TOTAL
            .with_label_values(&[name, "expired"])
            .inc_by(report.expired as f64);
        metrics::REAPER_REMOVALS_TOTAL
            .with_label_values(&[name, "size"])
            .inc_by(report.evicted as f64);
        debug!(
            "Reaper for cache '{}' removed {} expired and {} oversize keys.",
            name, report.expired, report.evicted
        );
    }
}
