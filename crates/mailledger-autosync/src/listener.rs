//! Auto-sync event listeners.
//!
//! The manager reports its progress to any number of registered listeners.
//! Listeners are purely observational: nothing they do feeds back into
//! scheduling. Every method has a no-op default, so implementors only
//! override what they care about.

use std::sync::{Mutex, PoisonError};

use crate::model::FolderInfo;

/// The manager queue a folder entered or left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Download (priority) queue.
    Priority,
    /// Discovery queue.
    Discovery,
    /// Update queue.
    Update,
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Priority => write!(f, "priority"),
            Self::Discovery => write!(f, "discovery"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// Observer of auto-sync activity.
pub trait AutoSyncListener: Send + Sync {
    /// Auto-sync started (`true`) or stopped (`false`) running.
    fn on_state_changed(&self, running: bool) {
        let _ = running;
    }

    /// A folder was added to a queue.
    fn on_folder_added_into_q(&self, queue: QueueKind, folder: &FolderInfo) {
        let _ = (queue, folder);
    }

    /// A folder was removed from a queue.
    fn on_folder_removed_from_q(&self, queue: QueueKind, folder: &FolderInfo) {
        let _ = (queue, folder);
    }

    /// A discovery pass over existing headers finished.
    fn on_discovery_q_processed(&self, folder: &FolderInfo, processed: usize, remaining: usize) {
        let _ = (folder, processed, remaining);
    }

    /// A download batch was started.
    fn on_download_started(&self, folder: &FolderInfo, count: usize, total_pending: usize) {
        let _ = (folder, count, total_pending);
    }

    /// A download batch completed successfully.
    fn on_download_completed(&self, folder: &FolderInfo) {
        let _ = folder;
    }

    /// A download batch failed.
    fn on_download_error(&self, folder: &FolderInfo) {
        let _ = folder;
    }

    /// A folder refresh was initiated.
    fn on_auto_sync_initiated(&self, folder: &FolderInfo) {
        let _ = folder;
    }
}

/// A listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl AutoSyncListener for NoopListener {}

/// A listener that logs events using tracing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl AutoSyncListener for LoggingListener {
    fn on_state_changed(&self, running: bool) {
        tracing::info!(running, "auto-sync state changed");
    }

    fn on_folder_added_into_q(&self, queue: QueueKind, folder: &FolderInfo) {
        tracing::debug!(%queue, folder = %folder.path, "folder queued");
    }

    fn on_folder_removed_from_q(&self, queue: QueueKind, folder: &FolderInfo) {
        tracing::debug!(%queue, folder = %folder.path, "folder dequeued");
    }

    fn on_discovery_q_processed(&self, folder: &FolderInfo, processed: usize, remaining: usize) {
        tracing::debug!(folder = %folder.path, processed, remaining, "discovery pass");
    }

    fn on_download_started(&self, folder: &FolderInfo, count: usize, total_pending: usize) {
        tracing::info!(folder = %folder.path, count, total_pending, "download started");
    }

    fn on_download_completed(&self, folder: &FolderInfo) {
        tracing::info!(folder = %folder.path, "download completed");
    }

    fn on_download_error(&self, folder: &FolderInfo) {
        tracing::warn!(folder = %folder.path, "download failed");
    }

    fn on_auto_sync_initiated(&self, folder: &FolderInfo) {
        tracing::debug!(folder = %folder.path, "update initiated");
    }
}

/// An event recorded by [`CollectingListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// Running state changed.
    StateChanged(bool),
    /// Folder (by path) added to a queue.
    AddedIntoQ(QueueKind, String),
    /// Folder removed from a queue.
    RemovedFromQ(QueueKind, String),
    /// Discovery pass with processed and remaining header counts.
    DiscoveryProcessed(String, usize, usize),
    /// Download batch started with message count and total pending.
    DownloadStarted(String, usize, usize),
    /// Download batch completed.
    DownloadCompleted(String),
    /// Download batch failed.
    DownloadError(String),
    /// Update initiated.
    AutoSyncInitiated(String),
}

/// A listener that collects events for later inspection.
///
/// Useful for testing and for embedding applications that poll for progress.
#[derive(Debug, Default)]
pub struct CollectingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl CollectingListener {
    /// Creates a new collecting listener.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events collected so far.
    #[must_use]
    pub fn events(&self) -> Vec<ListenerEvent> {
        self.lock().clone()
    }

    /// Takes all collected events, leaving the listener empty.
    pub fn take(&self) -> Vec<ListenerEvent> {
        std::mem::take(&mut *self.lock())
    }

    fn push(&self, event: ListenerEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ListenerEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AutoSyncListener for CollectingListener {
    fn on_state_changed(&self, running: bool) {
        self.push(ListenerEvent::StateChanged(running));
    }

    fn on_folder_added_into_q(&self, queue: QueueKind, folder: &FolderInfo) {
        self.push(ListenerEvent::AddedIntoQ(queue, folder.path.clone()));
    }

    fn on_folder_removed_from_q(&self, queue: QueueKind, folder: &FolderInfo) {
        self.push(ListenerEvent::RemovedFromQ(queue, folder.path.clone()));
    }

    fn on_discovery_q_processed(&self, folder: &FolderInfo, processed: usize, remaining: usize) {
        self.push(ListenerEvent::DiscoveryProcessed(
            folder.path.clone(),
            processed,
            remaining,
        ));
    }

    fn on_download_started(&self, folder: &FolderInfo, count: usize, total_pending: usize) {
        self.push(ListenerEvent::DownloadStarted(
            folder.path.clone(),
            count,
            total_pending,
        ));
    }

    fn on_download_completed(&self, folder: &FolderInfo) {
        self.push(ListenerEvent::DownloadCompleted(folder.path.clone()));
    }

    fn on_download_error(&self, folder: &FolderInfo) {
        self.push(ListenerEvent::DownloadError(folder.path.clone()));
    }

    fn on_auto_sync_initiated(&self, folder: &FolderInfo) {
        self.push(ListenerEvent::AutoSyncInitiated(folder.path.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccountId, FolderId};

    #[test]
    fn test_noop_listener() {
        let listener = NoopListener;
        let folder = FolderInfo::new(FolderId(1), AccountId(1), "INBOX");
        // Should not panic
        listener.on_state_changed(true);
        listener.on_download_error(&folder);
    }

    #[test]
    fn test_collecting_listener() {
        let listener = CollectingListener::new();
        let folder = FolderInfo::new(FolderId(1), AccountId(1), "INBOX");

        listener.on_folder_added_into_q(QueueKind::Priority, &folder);
        listener.on_download_started(&folder, 5, 5);
        listener.on_download_completed(&folder);

        assert_eq!(
            listener.events(),
            vec![
                ListenerEvent::AddedIntoQ(QueueKind::Priority, "INBOX".to_string()),
                ListenerEvent::DownloadStarted("INBOX".to_string(), 5, 5),
                ListenerEvent::DownloadCompleted("INBOX".to_string()),
            ]
        );

        assert_eq!(listener.take().len(), 3);
        assert!(listener.events().is_empty());
    }
}
