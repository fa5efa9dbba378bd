//! Expiry sweeper.
//!
//! A sweep pass has two phases:
//! 1. every story whose expiry index entry is at or before `now` is moved out
//!    of the active trees into the archive, one transaction per story;
//! 2. archived stories whose grace period has ended are hard-deleted together
//!    with their ledger entries.
//!
//! Both phases re-check the predicate on the stored record, so passes are
//! idempotent and never touch a story that is still active.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::StoryStore;
use crate::clock::Clock;
use crate::config::StoryPolicy;
use crate::error::StoryResult;

/// Outcome of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stories moved from active to archived
    pub expired: usize,
    /// Archived stories hard-deleted
    pub purged: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired == 0 && self.purged == 0
    }
}

pub struct ExpirySweeper {
    store: Arc<StoryStore>,
    clock: Arc<dyn Clock>,
    purge_grace: Duration,
    interval: StdDuration,
    shutdown_tx: broadcast::Sender<()>,
}

impl ExpirySweeper {
    pub fn new(store: Arc<StoryStore>, clock: Arc<dyn Clock>, policy: &StoryPolicy) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            clock,
            purge_grace: policy.purge_grace,
            interval: policy.sweep_interval,
            shutdown_tx,
        }
    }

    /// Run one pass at an explicit instant
    pub fn sweep(&self, now: DateTime<Utc>) -> StoryResult<SweepReport> {
        let mut report = SweepReport::default();

        for story_id in self.store.expired_candidates(now)? {
            match self.store.archive_if_expired(&story_id, now) {
                Ok(true) => {
                    debug!("Archived expired story {}", story_id);
                    report.expired += 1;
                }
                Ok(false) => {}
                Err(e) => error!("Failed to archive story {}: {}", story_id, e),
            }
        }

        for archived in self.store.archived()? {
            let doc = &archived.document;
            // A grace too large to represent never elapses
            match doc.expires_at.checked_add_signed(self.purge_grace) {
                Some(purge_at) if purge_at <= now => {}
                _ => continue,
            }
            match self.store.purge(&doc.id) {
                Ok(true) => {
                    debug!("Purged story {}", doc.id);
                    report.purged += 1;
                }
                Ok(false) => {}
                Err(e) => error!("Failed to purge story {}: {}", doc.id, e),
            }
        }

        Ok(report)
    }

    /// Run one pass at the clock's current time
    pub fn sweep_now(&self) -> StoryResult<SweepReport> {
        self.sweep(self.clock.now())
    }

    /// Get a shutdown receiver
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Stop the background loop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Start the recurring sweep on the tokio runtime
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let sweeper = self.clone();
        let mut shutdown = sweeper.shutdown_receiver();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweeper.interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match sweeper.sweep_now() {
                            Ok(report) if !report.is_empty() => {
                                info!("Sweep expired {} and purged {} stories", report.expired, report.purged);
                            }
                            Ok(_) => {}
                            Err(e) => error!("Sweep failed: {}", e),
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Expiry sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }
}
