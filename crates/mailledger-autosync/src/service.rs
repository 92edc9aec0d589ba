//! Async driver for [`AutoSyncManager`].
//!
//! The manager is single-threaded by construction: every mutation happens on
//! one tokio task. Everything else talks to it by sending [`AutoSyncEvent`]s
//! through an [`AutoSyncHandle`]. Mail fetchers report transfer outcomes the
//! same way.
//!
//! # Example
//!
//! ```ignore
//! let (handle, events) = AutoSyncHandle::channel();
//! let manager = AutoSyncManager::new(config, directory.clone());
//! let service = AutoSyncService::new(manager, directory, events);
//! tokio::spawn(service.run());
//!
//! handle.send(AutoSyncEvent::Idle(IdleNotification::AppIdle))?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::DownloadModel;
use crate::directory::AccountDirectory;
use crate::error::{DownloadError, Error, Result};
use crate::folder_state::SyncStateHandle;
use crate::idle::{IdleDetector, IdleNotification};
use crate::manager::AutoSyncManager;
use crate::model::{FolderId, MessageHeader};

/// How often the idle detector is polled.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// An input to the auto-sync service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoSyncEvent {
    /// Idle notification from the application or the system.
    Idle(IdleNotification),
    /// The user did something; feeds the built-in idle detector.
    UserActivity,
    /// The network went away.
    NetworkOffline,
    /// The network is back.
    NetworkOnline,
    /// The server reported new messages for a folder.
    NewMessages {
        /// Folder the messages belong to.
        folder: FolderId,
        /// Headers of the new messages.
        headers: Vec<MessageHeader>,
    },
    /// A transfer request was accepted or refused by the server.
    DownloadStarted {
        /// Folder being downloaded.
        folder: FolderId,
        /// Refusal reason, if any.
        result: std::result::Result<(), String>,
    },
    /// A transfer finished.
    DownloadCompleted {
        /// Folder being downloaded.
        folder: FolderId,
        /// Failure reason, if any.
        result: std::result::Result<(), String>,
    },
    /// A folder refresh finished.
    UpdateCompleted {
        /// Refreshed folder.
        folder: FolderId,
        /// New message headers, or the failure reason.
        result: std::result::Result<Vec<MessageHeader>, String>,
    },
    /// The server has messages for a folder that need a refresh.
    FolderHasPendingMessages {
        /// Folder with pending messages.
        folder: FolderId,
    },
    /// Switch the download model.
    SetDownloadModel(DownloadModel),
    /// Stop the service.
    Shutdown,
}

/// Sending side of the auto-sync service.
#[derive(Debug, Clone)]
pub struct AutoSyncHandle {
    tx: mpsc::UnboundedSender<AutoSyncEvent>,
}

impl AutoSyncHandle {
    /// Create a handle and the receiver to pass to [`AutoSyncService::new`].
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AutoSyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Send an event to the service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceStopped`] if the service is no longer running.
    pub fn send(&self, event: AutoSyncEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| Error::ServiceStopped)
    }

    /// Report the end of a transfer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceStopped`] if the service is no longer running.
    pub fn download_completed(
        &self,
        folder: FolderId,
        result: std::result::Result<(), String>,
    ) -> Result<()> {
        self.send(AutoSyncEvent::DownloadCompleted { folder, result })
    }

    /// Report the end of a folder refresh.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceStopped`] if the service is no longer running.
    pub fn update_completed(
        &self,
        folder: FolderId,
        result: std::result::Result<Vec<MessageHeader>, String>,
    ) -> Result<()> {
        self.send(AutoSyncEvent::UpdateCompleted { folder, result })
    }

    /// Ask the service to stop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceStopped`] if the service already stopped.
    pub fn shutdown(&self) -> Result<()> {
        self.send(AutoSyncEvent::Shutdown)
    }
}

/// Runs an [`AutoSyncManager`] on a tokio task.
pub struct AutoSyncService {
    manager: AutoSyncManager,
    directory: Arc<dyn AccountDirectory>,
    events: mpsc::UnboundedReceiver<AutoSyncEvent>,
    idle_detector: Option<IdleDetector>,
}

impl std::fmt::Debug for AutoSyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoSyncService")
            .field("manager", &self.manager)
            .field("idle_detector", &self.idle_detector)
            .finish_non_exhaustive()
    }
}

impl AutoSyncService {
    /// Create a service with the built-in idle detector enabled.
    #[must_use]
    pub fn new(
        manager: AutoSyncManager,
        directory: Arc<dyn AccountDirectory>,
        events: mpsc::UnboundedReceiver<AutoSyncEvent>,
    ) -> Self {
        let idle_detector = Some(IdleDetector::new(manager.config().idle_threshold()));
        Self {
            manager,
            directory,
            events,
            idle_detector,
        }
    }

    /// Disable the built-in idle detector, for embedders that send their own
    /// idle notifications.
    #[must_use]
    pub fn without_idle_detection(mut self) -> Self {
        self.idle_detector = None;
        self
    }

    /// The managed scheduler.
    #[must_use]
    pub const fn manager(&self) -> &AutoSyncManager {
        &self.manager
    }

    /// Mutable access to the scheduler, e.g. to register listeners before
    /// [`run`](Self::run).
    pub const fn manager_mut(&mut self) -> &mut AutoSyncManager {
        &mut self.manager
    }

    /// Process events until shutdown or until every handle is dropped.
    ///
    /// Returns the manager so callers can inspect its final state.
    pub async fn run(mut self) -> AutoSyncManager {
        let mut timer = tokio::time::interval(self.manager.config().timer_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut idle_poll = tokio::time::interval(IDLE_POLL_INTERVAL);
        idle_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let detect_idle = self.idle_detector.is_some();
        let mut timer_was_running = false;

        tracing::info!("Auto-sync service started");

        loop {
            let timer_running = self.manager.is_timer_running();
            if timer_running && !timer_was_running {
                // First tick one full period after the timer starts.
                timer.reset();
            }
            timer_was_running = timer_running;

            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else {
                        tracing::debug!("All auto-sync handles dropped");
                        break;
                    };
                    if event == AutoSyncEvent::Shutdown {
                        break;
                    }
                    if let Err(e) = self.handle_event(event) {
                        tracing::warn!(?e, "Failed to handle auto-sync event");
                    }
                }
                _ = timer.tick(), if timer_running => {
                    self.manager.on_timer_tick();
                }
                _ = idle_poll.tick(), if detect_idle => {
                    self.poll_idle();
                }
            }
        }

        tracing::info!("Auto-sync service stopped");
        self.manager
    }

    fn poll_idle(&mut self) {
        let notification = self
            .idle_detector
            .as_mut()
            .and_then(|d| d.poll(Instant::now()));
        if let Some(notification) = notification {
            self.manager.observe_idle(notification);
        }
    }

    fn state(&self, folder: FolderId) -> Result<SyncStateHandle> {
        self.directory
            .find_state(folder)
            .ok_or(Error::UnknownFolder(folder))
    }

    fn handle_event(&mut self, event: AutoSyncEvent) -> Result<()> {
        match event {
            AutoSyncEvent::Idle(notification) => self.manager.observe_idle(notification),
            AutoSyncEvent::UserActivity => {
                let notification = self
                    .idle_detector
                    .as_mut()
                    .and_then(|d| d.record_activity(Instant::now()));
                if let Some(notification) = notification {
                    self.manager.observe_idle(notification);
                }
            }
            AutoSyncEvent::NetworkOffline => self.manager.pause(),
            AutoSyncEvent::NetworkOnline => self.manager.resume(),
            AutoSyncEvent::NewMessages { folder, headers } => {
                let state = self.state(folder)?;
                self.manager.on_new_messages(&state, headers);
            }
            AutoSyncEvent::DownloadStarted { folder, result } => {
                let state = self.state(folder)?;
                self.manager
                    .on_download_started(&state, result.map_err(DownloadError::Transfer));
            }
            AutoSyncEvent::DownloadCompleted { folder, result } => {
                let state = self.state(folder)?;
                self.manager
                    .on_download_completed(&state, result.map_err(DownloadError::Transfer));
            }
            AutoSyncEvent::UpdateCompleted { folder, result } => {
                let state = self.state(folder)?;
                self.manager
                    .on_update_completed(&state, result.map_err(Error::Fetch));
            }
            AutoSyncEvent::FolderHasPendingMessages { folder } => {
                let state = self.state(folder)?;
                self.manager.on_folder_has_pending_msgs(&state);
            }
            AutoSyncEvent::SetDownloadModel(model) => self.manager.set_download_model(model),
            AutoSyncEvent::Shutdown => {}
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::config::AutoSyncConfig;
    use crate::directory::InMemoryDirectory;

    #[tokio::test]
    async fn test_send_after_shutdown_fails() {
        let (handle, events) = AutoSyncHandle::channel();
        let directory = Arc::new(InMemoryDirectory::new());
        let manager = AutoSyncManager::new(AutoSyncConfig::default(), directory.clone());
        let service = AutoSyncService::new(manager, directory, events).without_idle_detection();

        let task = tokio::spawn(service.run());
        assert_ok!(handle.send(AutoSyncEvent::NetworkOffline));
        assert_ok!(handle.shutdown());

        let manager = task.await.unwrap();
        assert!(manager.is_paused());
        assert_err!(handle.send(AutoSyncEvent::NetworkOnline));
    }

    #[tokio::test]
    async fn test_unknown_folder_does_not_stop_service() {
        let (handle, events) = AutoSyncHandle::channel();
        let directory = Arc::new(InMemoryDirectory::new());
        let manager = AutoSyncManager::new(AutoSyncConfig::default(), directory.clone());
        let service = AutoSyncService::new(manager, directory, events).without_idle_detection();

        let task = tokio::spawn(service.run());
        assert_ok!(handle.download_completed(FolderId(42), Ok(())));
        assert_ok!(handle.send(AutoSyncEvent::SetDownloadModel(DownloadModel::Parallel)));
        drop(handle);

        let manager = task.await.unwrap();
        assert_eq!(manager.download_model(), DownloadModel::Parallel);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_detector_drives_manager() {
        let (handle, events) = AutoSyncHandle::channel();
        let directory = Arc::new(InMemoryDirectory::new());
        let manager = AutoSyncManager::new(AutoSyncConfig::default(), directory.clone());
        let service = AutoSyncService::new(manager, directory, events);

        let task = tokio::spawn(service.run());
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_ok!(handle.shutdown());

        let manager = task.await.unwrap();
        assert_eq!(manager.idle_state(), crate::idle::IdleState::SystemIdle);
        assert_eq!(manager.idle_cycle(), 1);
    }
}
