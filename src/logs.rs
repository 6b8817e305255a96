//! Log tailer: a bounded view of the backend's rotating event log.
//!
//! Each successful poll replaces the whole local view with the fetched
//! snapshot. Lines are never accumulated across polls. A snapshot fetched
//! before a confirmed clear is discarded rather than shown.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::backend::BackendClient;
use crate::error::Result;

/// Default bound on the local view.
pub const DEFAULT_MAX_LOG_ENTRIES: usize = 500;

/// One displayed log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Display id, fresh on every poll
    pub id: u64,
    /// Line text as the backend reported it
    pub message: String,
    /// When this client received the line
    pub timestamp: DateTime<Local>,
}

/// Polls and clears the backend event log.
#[derive(Debug)]
pub struct LogTailer {
    entries: RwLock<Vec<LogEntry>>,
    next_id: AtomicU64,
    clear_epoch: AtomicU64,
    max_entries: usize,
    backend: BackendClient,
}

impl LogTailer {
    /// Create a tailer whose view keeps at most `max_entries` lines.
    pub fn new(backend: BackendClient, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            clear_epoch: AtomicU64::new(0),
            max_entries: max_entries.max(1),
            backend,
        }
    }

    /// Fetch the backend snapshot and replace the local view with it.
    ///
    /// On failure the view is left as it was. A snapshot that was in flight
    /// while [`clear`](Self::clear) completed is dropped and `Ok(0)` returned.
    pub async fn poll_once(&self) -> Result<usize> {
        let epoch = self.clear_epoch.load(Ordering::Acquire);
        let lines = self.backend.fetch_logs().await?;
        let skip = lines.len().saturating_sub(self.max_entries);
        let now = Local::now();

        let view: Vec<LogEntry> = lines
            .into_iter()
            .skip(skip)
            .map(|message| LogEntry {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                message,
                timestamp: now,
            })
            .collect();
        let count = view.len();
        let mut entries = self.entries.write().await;
        if self.clear_epoch.load(Ordering::Acquire) != epoch {
            tracing::debug!("Dropped log snapshot fetched before clear");
            return Ok(0);
        }
        *entries = view;
        tracing::trace!(count, "Refreshed log view");
        Ok(count)
    }

    /// Ask the backend to clear its log; the local view is cleared only on
    /// confirmation.
    pub async fn clear(&self) -> Result<()> {
        if let Err(e) = self.backend.clear_logs().await {
            tracing::warn!(error = %e, "Failed to clear backend logs");
            return Err(e);
        }
        let mut entries = self.entries.write().await;
        self.clear_epoch.fetch_add(1, Ordering::AcqRel);
        entries.clear();
        tracing::info!("Cleared logs");
        Ok(())
    }

    /// Current view, oldest first.
    pub async fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::endpoints;
    use crate::backend::mock::{MockBackend, MockFault};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn fixture(max: usize) -> (Arc<MockBackend>, LogTailer) {
        let mock = Arc::new(MockBackend::new());
        let tailer = LogTailer::new(BackendClient::new(mock.clone()), max);
        (mock, tailer)
    }

    fn messages(entries: &[LogEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.message.as_str()).collect()
    }

    #[tokio::test]
    async fn poll_replaces_view_with_snapshot() {
        let (mock, tailer) = fixture(DEFAULT_MAX_LOG_ENTRIES);
        mock.set_logs(["stale one", "stale two", "stale three"]);
        tailer.poll_once().await.unwrap();
        let first_ids: HashSet<u64> = tailer.entries().await.iter().map(|e| e.id).collect();

        mock.inject(
            endpoints::LOGS,
            MockFault::Status(
                200,
                Some(json!({"status": "success", "logs": ["boot ok", "cmd received"]})),
            ),
        );
        tailer.poll_once().await.unwrap();

        let view = tailer.entries().await;
        assert_eq!(messages(&view), ["boot ok", "cmd received"]);
        assert_ne!(view[0].id, view[1].id);
        assert!(view.iter().all(|e| !first_ids.contains(&e.id)));
    }

    #[tokio::test]
    async fn failed_poll_keeps_previous_view() {
        let (mock, tailer) = fixture(DEFAULT_MAX_LOG_ENTRIES);
        mock.set_logs(["kept"]);
        tailer.poll_once().await.unwrap();

        mock.inject(endpoints::LOGS, MockFault::Transport("down".into()));
        assert!(tailer.poll_once().await.is_err());
        assert_eq!(messages(&tailer.entries().await), ["kept"]);
    }

    #[tokio::test]
    async fn view_keeps_newest_lines_up_to_bound() {
        let (mock, tailer) = fixture(2);
        mock.set_logs(["a", "b", "c"]);
        assert_eq!(tailer.poll_once().await.unwrap(), 2);
        assert_eq!(messages(&tailer.entries().await), ["b", "c"]);
    }

    #[tokio::test]
    async fn clear_only_after_backend_confirms() {
        let (mock, tailer) = fixture(DEFAULT_MAX_LOG_ENTRIES);
        mock.set_logs(["x", "y"]);
        tailer.poll_once().await.unwrap();

        mock.inject(endpoints::CLEAR_LOGS, MockFault::Status(500, None));
        let err = tailer.clear().await.unwrap_err();
        assert_eq!(err.to_string(), "HTTP error! status: 500");
        assert_eq!(tailer.entries().await.len(), 2);

        mock.inject(endpoints::CLEAR_LOGS, MockFault::SoftFailure("locked".into()));
        assert!(tailer.clear().await.is_err());
        assert_eq!(tailer.entries().await.len(), 2);

        tailer.clear().await.unwrap();
        assert!(tailer.entries().await.is_empty());
        assert!(mock.logs().is_empty());
    }

    #[tokio::test]
    async fn snapshot_from_before_clear_is_dropped() {
        let (mock, tailer) = fixture(DEFAULT_MAX_LOG_ENTRIES);
        let tailer = Arc::new(tailer);
        mock.inject(
            endpoints::LOGS,
            MockFault::Status(200, Some(json!({"status": "success", "logs": ["old"]}))),
        );
        let gate = mock.hold(endpoints::LOGS);

        let poll = tokio::spawn({
            let tailer = Arc::clone(&tailer);
            async move { tailer.poll_once().await }
        });
        while mock.requests_to(endpoints::LOGS).is_empty() {
            tokio::task::yield_now().await;
        }

        tailer.clear().await.unwrap();
        gate.release();
        assert_eq!(poll.await.unwrap().unwrap(), 0);
        assert!(tailer.entries().await.is_empty());

        mock.push_log("after clear");
        assert_eq!(tailer.poll_once().await.unwrap(), 1);
    }
}
