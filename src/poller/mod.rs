//! Update poll cycle: fetch, dispatch, commit.
//!
//! The poller owns the cursor advancement policy. A cycle fetches the
//! pending batch from the update source, hands each actionable update to
//! the handler, and commits the new cursor once, after the whole batch.
//! Failures never move the cursor past unprocessed updates.

pub mod runner;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::channels::{SourceError, Update, UpdateSource};
use crate::commands::DispatchOutcome;
use crate::storage::OffsetStore;

pub use runner::{build_poll_config, poll_loop, PollConfig};

/// Handles one classified update. Infallible: failures are converted to
/// in-band outcomes so a bad update never stalls the cursor.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn handle(&self, update: &Update) -> DispatchOutcome;
}

/// Which advancement policy governed a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// No cursor has ever been committed; only the newest pending update
    /// is dispatched, the rest of the backlog is discarded.
    FirstRun,
    SteadyState,
}

/// Summary of one completed poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub mode: PollMode,
    pub fetched: usize,
    pub dispatched: usize,
    pub skipped: usize,
    /// The cursor value committed this cycle, when one was.
    pub committed: Option<i64>,
}

/// Errors that abort a poll cycle.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("update fetch failed: {0}")]
    Source(#[from] SourceError),
}

/// Drives the fetch, dispatch, commit loop against the offset store.
pub struct Poller {
    offsets: Arc<OffsetStore>,
    source: Arc<dyn UpdateSource>,
    handler: Arc<dyn UpdateHandler>,
}

impl Poller {
    pub fn new(
        offsets: Arc<OffsetStore>,
        source: Arc<dyn UpdateSource>,
        handler: Arc<dyn UpdateHandler>,
    ) -> Self {
        Self {
            offsets,
            source,
            handler,
        }
    }

    /// Run one poll cycle.
    ///
    /// A fetch failure aborts the cycle with the cursor untouched. Commit
    /// failures (a concurrent writer advanced the row) are logged and
    /// reported as an uncommitted cycle, never raised: the next cycle
    /// reloads the row and reconverges.
    pub async fn run_cycle(&self) -> Result<CycleReport, PollError> {
        let cursor = self.offsets.load();
        let updates = self.source.fetch_updates(cursor.value).await?;

        let report = if cursor.is_unset() {
            self.run_first_cycle(updates, cursor.version).await
        } else {
            self.run_steady_cycle(updates, cursor.value, cursor.version)
                .await
        };

        info!(
            target: "poller",
            mode = ?report.mode,
            fetched = report.fetched,
            dispatched = report.dispatched,
            skipped = report.skipped,
            committed = report.committed,
            "poll cycle complete"
        );
        Ok(report)
    }

    /// First run: dispatch only the newest pending update, discard the
    /// backlog. Prevents a fresh deployment from replaying history.
    async fn run_first_cycle(&self, updates: Vec<Update>, version: u64) -> CycleReport {
        let fetched = updates.len();

        let Some(latest) = updates.iter().max_by_key(|u| u.update_id) else {
            // Empty backlog: commit 1 so the next cycle runs steady-state.
            let committed = self.try_commit(1, version);
            return CycleReport {
                mode: PollMode::FirstRun,
                fetched: 0,
                dispatched: 0,
                skipped: 0,
                committed,
            };
        };

        let skipped = fetched - 1;
        if skipped > 0 {
            info!(
                target: "poller",
                skipped = skipped,
                latest = latest.update_id,
                "first run: discarding backlog, dispatching only the newest update"
            );
        }

        self.handler.handle(latest).await;
        let committed = self.try_commit(latest.update_id + 1, version);

        CycleReport {
            mode: PollMode::FirstRun,
            fetched,
            dispatched: 1,
            skipped,
            committed,
        }
    }

    /// Steady state: dispatch everything at or past the cursor; already-
    /// acknowledged updates are skipped but still count toward the new
    /// cursor, in case the source ignored the offset parameter.
    async fn run_steady_cycle(
        &self,
        updates: Vec<Update>,
        cursor_value: i64,
        version: u64,
    ) -> CycleReport {
        let fetched = updates.len();
        let mut dispatched = 0;
        let mut skipped = 0;
        let mut max_update_id: Option<i64> = None;

        for update in &updates {
            max_update_id = Some(max_update_id.map_or(update.update_id, |m| m.max(update.update_id)));
            if update.update_id < cursor_value {
                skipped += 1;
                continue;
            }
            self.handler.handle(update).await;
            dispatched += 1;
        }

        let committed = match max_update_id {
            Some(max_id) if max_id >= cursor_value => self.try_commit(max_id + 1, version),
            _ => None,
        };

        CycleReport {
            mode: PollMode::SteadyState,
            fetched,
            dispatched,
            skipped,
            committed,
        }
    }

    fn try_commit(&self, next: i64, version: u64) -> Option<i64> {
        match self.offsets.commit(next, version) {
            Ok(cursor) => Some(cursor.value),
            Err(e) => {
                warn!(target: "poller", next = next, error = %e, "cursor commit failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::UpdateKind;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    struct FakeSource {
        batch: Mutex<Result<Vec<Update>, String>>,
    }

    impl FakeSource {
        fn with_ids(ids: &[i64]) -> Self {
            let batch = ids
                .iter()
                .map(|&id| Update {
                    update_id: id,
                    kind: UpdateKind::Unrecognized,
                })
                .collect();
            Self {
                batch: Mutex::new(Ok(batch)),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                batch: Mutex::new(Err(message.to_string())),
            }
        }

        fn set_ids(&self, ids: &[i64]) {
            *self.batch.lock() = Ok(ids
                .iter()
                .map(|&id| Update {
                    update_id: id,
                    kind: UpdateKind::Unrecognized,
                })
                .collect());
        }
    }

    #[async_trait]
    impl UpdateSource for FakeSource {
        async fn fetch_updates(&self, _offset: i64) -> Result<Vec<Update>, SourceError> {
            match &*self.batch.lock() {
                Ok(batch) => Ok(batch.clone()),
                Err(message) => Err(SourceError::Transport(message.clone())),
            }
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        handled: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl UpdateHandler for RecordingHandler {
        async fn handle(&self, update: &Update) -> DispatchOutcome {
            self.handled.lock().push(update.update_id);
            DispatchOutcome::Ignored
        }
    }

    fn build_poller(
        source: FakeSource,
    ) -> (Poller, Arc<FakeSource>, Arc<RecordingHandler>, TempDir) {
        let dir = TempDir::new().unwrap();
        let offsets = Arc::new(OffsetStore::new(dir.path().to_path_buf()));
        let source = Arc::new(source);
        let handler = Arc::new(RecordingHandler::default());
        let poller = Poller::new(offsets, source.clone(), handler.clone());
        (poller, source, handler, dir)
    }

    #[tokio::test]
    async fn test_first_run_dispatches_only_latest() {
        let (poller, _source, handler, _dir) = build_poller(FakeSource::with_ids(&[5, 6, 7]));

        let report = poller.run_cycle().await.unwrap();

        assert_eq!(report.mode, PollMode::FirstRun);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.committed, Some(8));
        assert_eq!(*handler.handled.lock(), vec![7]);
    }

    #[tokio::test]
    async fn test_first_run_empty_batch_commits_one() {
        let (poller, _source, handler, _dir) = build_poller(FakeSource::with_ids(&[]));

        let report = poller.run_cycle().await.unwrap();

        assert_eq!(report.mode, PollMode::FirstRun);
        assert_eq!(report.committed, Some(1));
        assert!(handler.handled.lock().is_empty());
    }

    #[tokio::test]
    async fn test_steady_state_skips_acknowledged_updates() {
        let (poller, source, handler, _dir) = build_poller(FakeSource::with_ids(&[]));

        // Reach steady state with cursor 10.
        poller.offsets.commit(10, 0).unwrap();

        // Source ignores the offset and returns an already-seen update.
        source.set_ids(&[9, 10, 11]);

        let report = poller.run_cycle().await.unwrap();

        assert_eq!(report.mode, PollMode::SteadyState);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.committed, Some(12));
        assert_eq!(*handler.handled.lock(), vec![10, 11]);
    }

    #[tokio::test]
    async fn test_steady_state_empty_batch_commits_nothing() {
        let (poller, _source, _handler, _dir) = build_poller(FakeSource::with_ids(&[]));
        poller.offsets.commit(5, 0).unwrap();

        let report = poller.run_cycle().await.unwrap();

        assert_eq!(report.mode, PollMode::SteadyState);
        assert_eq!(report.committed, None);
        assert_eq!(poller.offsets.load().value, 5);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_cursor_untouched() {
        let (poller, _source, handler, _dir) = build_poller(FakeSource::failing("boom"));
        poller.offsets.commit(5, 0).unwrap();

        let result = poller.run_cycle().await;

        assert!(matches!(result, Err(PollError::Source(_))));
        assert!(handler.handled.lock().is_empty());
        assert_eq!(poller.offsets.load().value, 5);
    }

    #[tokio::test]
    async fn test_cursor_is_monotonic_across_cycles() {
        let (poller, _source, _handler, _dir) = build_poller(FakeSource::with_ids(&[3]));

        let first = poller.run_cycle().await.unwrap();
        assert_eq!(first.committed, Some(4));

        // Same batch again: ids below the cursor never move it backwards.
        let second = poller.run_cycle().await.unwrap();
        assert_eq!(second.mode, PollMode::SteadyState);
        assert_eq!(second.dispatched, 0);
        assert_eq!(second.committed, None);
        assert_eq!(poller.offsets.load().value, 4);
    }
}
