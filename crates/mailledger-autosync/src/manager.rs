//! The auto-sync scheduler.
//!
//! [`AutoSyncManager`] decides which offline folders download what, and when.
//! It keeps three queues:
//!
//! - the **priority queue**: folders with messages waiting for download,
//!   ordered by the [`FolderStrategy`];
//! - the **discovery queue**: folders due for a scan of their local headers
//!   for messages without an offline copy;
//! - the **update queue**: folders due for a lightweight server refresh.
//!
//! The manager is a plain state machine driven by `&mut self` calls. It never
//! blocks: transfers and refreshes are handed to the folder states, and their
//! outcomes come back through the `on_*` callbacks. [`crate::AutoSyncService`]
//! runs it on a tokio task.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::{AutoSyncConfig, DEFAULT_GROUP_SIZE, DownloadModel};
use crate::directory::AccountDirectory;
use crate::error::{DownloadError, Result};
use crate::folder_state::{RetryOutcome, SyncState, SyncStateHandle};
use crate::idle::{self, IdleAction, IdleNotification, IdleState};
use crate::listener::{AutoSyncListener, QueueKind};
use crate::model::{FolderFlags, FolderId, MessageHeader};
use crate::queue;
use crate::strategy::{DefaultFolderStrategy, Decision, FolderStrategy};

/// Whether a folder refresh is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateState {
    Completed,
    Initiated,
}

/// Whether at least `minutes` have passed since `last`. No timestamp counts as elapsed.
fn interval_elapsed(last: Option<DateTime<Utc>>, minutes: u32, now: DateTime<Utc>) -> bool {
    last.is_none_or(|t| now - t >= Duration::minutes(i64::from(minutes)))
}

/// Background download scheduler for offline folders.
pub struct AutoSyncManager {
    config: AutoSyncConfig,
    directory: Arc<dyn AccountDirectory>,
    folder_strategy: Arc<dyn FolderStrategy>,
    priority_q: Vec<SyncStateHandle>,
    discovery_q: Vec<SyncStateHandle>,
    update_q: Vec<SyncStateHandle>,
    update_state: UpdateState,
    idle_state: IdleState,
    paused: bool,
    timer_running: bool,
    listeners: Vec<Arc<dyn AutoSyncListener>>,
    idle_cycle: u64,
    /// Quarantined folders and the idle cycle from which they may download again.
    quarantine: HashMap<FolderId, u64>,
    skipped_groups: HashMap<FolderId, u32>,
}

impl std::fmt::Debug for AutoSyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoSyncManager")
            .field("download_model", &self.config.download_model)
            .field("priority_q", &self.priority_q.len())
            .field("discovery_q", &self.discovery_q.len())
            .field("update_q", &self.update_q.len())
            .field("idle_state", &self.idle_state)
            .field("paused", &self.paused)
            .field("timer_running", &self.timer_running)
            .finish_non_exhaustive()
    }
}

impl AutoSyncManager {
    /// Creates a manager with the default folder strategy.
    #[must_use]
    pub fn new(config: AutoSyncConfig, directory: Arc<dyn AccountDirectory>) -> Self {
        Self {
            config: config.normalized(),
            directory,
            folder_strategy: Arc::new(DefaultFolderStrategy::default()),
            priority_q: Vec::new(),
            discovery_q: Vec::new(),
            update_q: Vec::new(),
            update_state: UpdateState::Completed,
            idle_state: IdleState::NotIdle,
            paused: false,
            timer_running: false,
            listeners: Vec::new(),
            idle_cycle: 0,
            quarantine: HashMap::new(),
            skipped_groups: HashMap::new(),
        }
    }

    // ========== Configuration ==========

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &AutoSyncConfig {
        &self.config
    }

    /// Replace the folder strategy.
    pub fn set_folder_strategy(&mut self, strategy: Arc<dyn FolderStrategy>) {
        self.folder_strategy = strategy;
    }

    /// Current download model.
    #[must_use]
    pub const fn download_model(&self) -> DownloadModel {
        self.config.download_model
    }

    /// Switch the download model. Takes effect with the next scheduling decision.
    pub fn set_download_model(&mut self, model: DownloadModel) {
        tracing::info!(?model, "Download model changed");
        self.config.download_model = model;
    }

    /// Download group size in bytes.
    #[must_use]
    pub const fn group_size(&self) -> u64 {
        self.config.group_size
    }

    /// Set the download group size. Zero restores the default.
    pub fn set_group_size(&mut self, bytes: u64) {
        self.config.group_size = if bytes == 0 {
            DEFAULT_GROUP_SIZE
        } else {
            bytes
        };
    }

    // ========== Listeners ==========

    /// Register a listener. Registering the same listener twice has no effect.
    pub fn add_listener(&mut self, listener: Arc<dyn AutoSyncListener>) {
        if !self.listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            self.listeners.push(listener);
        }
    }

    /// Unregister a listener.
    pub fn remove_listener(&mut self, listener: &Arc<dyn AutoSyncListener>) {
        self.listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn notify(&self, f: impl Fn(&dyn AutoSyncListener)) {
        for listener in &self.listeners {
            f(listener.as_ref());
        }
    }

    // ========== State accessors ==========

    /// The download queue, highest priority first.
    #[must_use]
    pub fn priority_queue(&self) -> &[SyncStateHandle] {
        &self.priority_q
    }

    /// The discovery queue.
    #[must_use]
    pub fn discovery_queue(&self) -> &[SyncStateHandle] {
        &self.discovery_q
    }

    /// The update queue.
    #[must_use]
    pub fn update_queue(&self) -> &[SyncStateHandle] {
        &self.update_q
    }

    /// Number of folders waiting for download.
    #[must_use]
    pub fn download_queue_len(&self) -> usize {
        self.priority_q.len()
    }

    /// Number of folders waiting for discovery.
    #[must_use]
    pub fn discovery_queue_len(&self) -> usize {
        self.discovery_q.len()
    }

    /// Number of folders waiting for an update.
    #[must_use]
    pub fn update_queue_len(&self) -> usize {
        self.update_q.len()
    }

    /// Current idle state.
    #[must_use]
    pub const fn idle_state(&self) -> IdleState {
        self.idle_state
    }

    /// Whether scheduling is paused.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether the discovery/update timer should be ticking.
    #[must_use]
    pub const fn is_timer_running(&self) -> bool {
        self.timer_running
    }

    /// Number of idle periods processed so far.
    #[must_use]
    pub const fn idle_cycle(&self) -> u64 {
        self.idle_cycle
    }

    /// Whether a folder refresh is in flight.
    #[must_use]
    pub fn is_update_in_progress(&self) -> bool {
        self.update_state == UpdateState::Initiated
    }

    /// Whether a folder is quarantined after repeated failures.
    #[must_use]
    pub fn is_quarantined(&self, folder: FolderId) -> bool {
        self.quarantine
            .get(&folder)
            .is_some_and(|&from| self.idle_cycle < from)
    }

    const fn is_idle(&self) -> bool {
        self.idle_state.is_idle()
    }

    /// Byte cap for the next batch: none while idle.
    const fn current_size_limit(&self) -> Option<u64> {
        if self.is_idle() {
            None
        } else {
            Some(self.config.first_group_size_limit)
        }
    }

    // ========== Timer ==========

    fn start_timer_if_needed(&mut self) {
        if (!self.discovery_q.is_empty() || !self.update_q.is_empty()) && !self.timer_running {
            self.timer_running = true;
            tracing::debug!("Auto-sync timer started");
        }
    }

    fn stop_timer(&mut self) {
        if self.timer_running {
            self.timer_running = false;
            tracing::debug!("Auto-sync timer stopped");
        }
    }

    // ========== Pause / resume ==========

    /// Stop scheduling, e.g. because the network went offline. Queues are kept.
    pub fn pause(&mut self) {
        self.stop_timer();
        self.paused = true;
        tracing::info!("Auto-sync paused");
    }

    /// Resume scheduling after [`pause`](Self::pause).
    pub fn resume(&mut self) {
        self.paused = false;
        self.start_timer_if_needed();
        tracing::info!("Auto-sync resumed");
    }

    // ========== Idle handling ==========

    /// Feed an idle notification from the application or the system.
    pub fn observe_idle(&mut self, notification: IdleNotification) {
        let (next, action) = idle::transition(self.idle_state, notification);
        if next != self.idle_state {
            tracing::debug!(from = ?self.idle_state, to = ?next, ?notification, "Idle state changed");
        }
        self.idle_state = next;

        match action {
            IdleAction::StartIdleProcessing => self.start_idle_processing(),
            IdleAction::Stopped => self.notify(|l| l.on_state_changed(false)),
            IdleAction::None => {}
        }
    }

    /// Start a round of idle work: kick off downloads and queue folders for
    /// discovery and updates.
    pub fn start_idle_processing(&mut self) {
        if self.paused {
            tracing::debug!("Paused, skipping idle processing");
            return;
        }

        self.idle_cycle += 1;
        let cycle = self.idle_cycle;
        self.quarantine.retain(|_, from| *from > cycle);
        tracing::debug!(cycle, "Starting idle processing");

        self.start_timer_if_needed();
        self.notify(|l| l.on_state_changed(true));

        // Quarantined folders give up their server slot before chaining.
        let eligible: Vec<SyncStateHandle> = self
            .priority_q
            .iter()
            .filter(|s| !self.is_quarantined(s.owner_folder().id))
            .cloned()
            .collect();
        let candidates = match self.config.download_model {
            DownloadModel::Chained => queue::chain_folders_in_q(&eligible),
            DownloadModel::Parallel => eligible,
        };

        let mut drained = Vec::new();
        for state in candidates {
            if state.state() != SyncState::ReadyToDownload {
                continue;
            }
            match self.download_messages_for_offline(&state, None) {
                Ok(()) => {}
                Err(DownloadError::NoMessagesAvailable) => drained.push(state),
                Err(e) => self.handle_download_error_for(&state, &e),
            }
        }

        for state in drained {
            self.notify(|l| l.on_download_completed(state.owner_folder()));
            self.drop_drained(&state);
        }

        self.auto_update_folders();
    }

    // ========== Download queue ==========

    /// A folder found messages to download.
    ///
    /// Queues the folder in priority order and, unless a sibling already
    /// holds the server's download slot in the chained model, starts its
    /// first batch right away. Outside idle time that batch is capped at
    /// `first_group_size_limit` bytes. While paused the folder is only
    /// queued; the next idle period after [`resume`](Self::resume) starts it.
    pub fn on_download_q_changed(&mut self, state: &SyncStateHandle) {
        let folder = state.owner_folder();
        if self.folder_strategy.is_excluded(folder) {
            tracing::debug!(folder = %folder.path, "Folder excluded from auto-sync");
            return;
        }

        if state.state() == SyncState::DownloadInProgress {
            self.schedule_folder_for_offline_download(state);
            return;
        }

        state.set_state(SyncState::ReadyToDownload);
        self.schedule_folder_for_offline_download(state);

        if self.paused {
            tracing::debug!(folder = %folder.path, "Paused, download deferred");
            return;
        }

        let slot_free = self.config.download_model == DownloadModel::Parallel
            || !queue::does_q_contain_any_sibling_of(
                &self.priority_q,
                state.as_ref(),
                Some(SyncState::DownloadInProgress),
            );
        if !slot_free || self.is_quarantined(folder.id) {
            return;
        }

        match self.download_messages_for_offline(state, self.current_size_limit()) {
            Ok(()) => {}
            Err(DownloadError::NoMessagesAvailable) => self.drop_drained(state),
            Err(DownloadError::SizeLimitExceeded { limit, total }) => {
                tracing::debug!(folder = %folder.path, limit, total, "First batch postponed until idle");
            }
            Err(DownloadError::Transfer(reason)) => {
                tracing::warn!(folder = %folder.path, %reason, "Failed to start download");
                self.record_failed_attempt(state);
            }
        }
    }

    /// Insert a folder into the priority queue unless it is already there.
    ///
    /// The folder goes before the first entry it outranks; among equals it
    /// goes last.
    fn schedule_folder_for_offline_download(&mut self, state: &SyncStateHandle) {
        if queue::contains(&self.priority_q, state.as_ref()) {
            return;
        }

        let folder = state.owner_folder();
        let idx = self
            .priority_q
            .iter()
            .position(|s| self.folder_strategy.sort(s.owner_folder(), folder) == Decision::Higher)
            .unwrap_or(self.priority_q.len());
        self.priority_q.insert(idx, state.clone());

        tracing::debug!(folder = %folder.path, position = idx, "Folder added to priority queue");
        self.notify(|l| l.on_folder_added_into_q(QueueKind::Priority, folder));
    }

    /// Take the next group of `state` and hand it to the folder for transfer.
    ///
    /// With a `size_limit`, a group larger than the limit is handed back and
    /// reported as [`DownloadError::SizeLimitExceeded`].
    fn download_messages_for_offline(
        &self,
        state: &SyncStateHandle,
        size_limit: Option<u64>,
    ) -> std::result::Result<(), DownloadError> {
        if state.pending_message_count() == 0 {
            return Err(DownloadError::NoMessagesAvailable);
        }

        let group = state.next_group_of_messages(self.config.group_size);
        if group.is_empty() {
            return Err(DownloadError::NoMessagesAvailable);
        }

        if let Some(limit) = size_limit
            && group.total_bytes > limit
        {
            state.postpone_current_group();
            return Err(DownloadError::SizeLimitExceeded {
                limit,
                total: group.total_bytes,
            });
        }

        if let Err(e) = state.download_messages_for_offline(&group) {
            state.set_state(SyncState::ReadyToDownload);
            return Err(DownloadError::Transfer(e.to_string()));
        }
        state.set_state(SyncState::DownloadInProgress);

        let folder = state.owner_folder();
        tracing::debug!(
            folder = %folder.path,
            count = group.len(),
            bytes = group.total_bytes,
            "Download batch started"
        );
        self.notify(|l| l.on_download_started(folder, group.len(), state.total_message_count()));
        Ok(())
    }

    /// The collaborator reports whether a transfer actually started.
    pub fn on_download_started(
        &mut self,
        state: &SyncStateHandle,
        result: std::result::Result<(), DownloadError>,
    ) {
        match result {
            Ok(()) => {
                tracing::trace!(folder = %state.owner_folder().path, "Download running");
            }
            Err(e) => {
                state.download_finished(false);
                state.set_state(SyncState::ReadyToDownload);
                self.handle_download_error_for(state, &e);
            }
        }
    }

    /// A transfer finished.
    ///
    /// On failure the same group is retried right away while idle. On
    /// success the folder keeps downloading as long as it has pending
    /// messages; once drained it leaves the queue and, in the chained model,
    /// the server slot moves to the highest-priority ready sibling.
    pub fn on_download_completed(
        &mut self,
        state: &SyncStateHandle,
        result: std::result::Result<(), DownloadError>,
    ) {
        let folder = state.owner_folder();
        state.download_finished(result.is_ok());

        if let Err(e) = result {
            tracing::warn!(folder = %folder.path, error = %e, "Download failed");
            self.record_failed_attempt(state);
            self.notify(|l| l.on_download_error(folder));
            state.set_state(SyncState::ReadyToDownload);

            if !self.is_idle() {
                return;
            }
            if self.is_quarantined(folder.id) {
                if self.config.download_model == DownloadModel::Chained {
                    self.advance_to_sibling(state);
                }
            } else {
                self.continue_download(state);
            }
            return;
        }

        state.reset_retry_counter();
        self.skipped_groups.remove(&folder.id);
        self.notify(|l| l.on_download_completed(folder));

        if state.pending_message_count() > 0 {
            state.set_state(SyncState::ReadyToDownload);
            if self.is_idle() {
                self.continue_download(state);
            }
        } else {
            self.drop_drained(state);
            if self.is_idle() && self.config.download_model == DownloadModel::Chained {
                self.advance_to_sibling(state);
            }
        }
    }

    /// Start the next batch of `state`, moving on if it has nothing left.
    fn continue_download(&mut self, state: &SyncStateHandle) {
        match self.download_messages_for_offline(state, self.current_size_limit()) {
            Ok(()) => {}
            Err(DownloadError::NoMessagesAvailable) => {
                self.drop_drained(state);
                if self.config.download_model == DownloadModel::Chained {
                    self.advance_to_sibling(state);
                }
            }
            Err(e) => self.handle_download_error_for(state, &e),
        }
    }

    /// Hand the server slot of `state` to its highest-priority ready sibling.
    fn advance_to_sibling(&mut self, state: &SyncStateHandle) {
        let next = queue::get_highest_prio_sibling(&self.priority_q, state.as_ref(), |s| {
            !self.is_quarantined(s.owner_folder().id)
        })
        .map(|idx| self.priority_q[idx].clone());

        if let Some(sibling) = next {
            tracing::debug!(
                from = %state.owner_folder().path,
                to = %sibling.owner_folder().path,
                "Switching to sibling folder"
            );
            self.continue_download(&sibling);
        }
    }

    /// Deal with a batch that failed to start or to finish.
    ///
    /// Benign errors are ignored. Transfer errors count against the folder's
    /// retry budget and, in the chained model, the remaining siblings of the
    /// server are tried in queue order until one starts.
    pub fn handle_download_error_for(&mut self, state: &SyncStateHandle, error: &DownloadError) {
        let folder = state.owner_folder();
        if !error.is_transient() {
            if let DownloadError::SizeLimitExceeded { limit, total } = error {
                tracing::debug!(folder = %folder.path, limit, total, "Batch postponed");
            }
            return;
        }
        tracing::warn!(folder = %folder.path, %error, "Download error");

        self.record_failed_attempt(state);
        self.notify(|l| l.on_download_error(folder));

        if self.config.download_model != DownloadModel::Chained {
            return;
        }

        let mut siblings = Vec::new();
        let mut cursor = state.clone();
        while let Some(idx) = queue::get_next_sibling(&self.priority_q, cursor.as_ref()) {
            cursor = self.priority_q[idx].clone();
            siblings.push(cursor.clone());
        }

        for sibling in siblings {
            let sibling_folder = sibling.owner_folder();
            if self.is_quarantined(sibling_folder.id) {
                continue;
            }
            match self.download_messages_for_offline(&sibling, self.current_size_limit()) {
                Ok(()) => break,
                Err(DownloadError::NoMessagesAvailable) => self.drop_drained(&sibling),
                Err(DownloadError::SizeLimitExceeded { .. }) => {}
                Err(DownloadError::Transfer(reason)) => {
                    tracing::warn!(folder = %sibling_folder.path, %reason, "Download error");
                    self.record_failed_attempt(&sibling);
                    self.notify(|l| l.on_download_error(sibling_folder));
                }
            }
        }
    }

    /// Count a failed attempt of the current group, quarantining the folder
    /// once too many groups in a row were given up.
    fn record_failed_attempt(&mut self, state: &SyncStateHandle) {
        let folder = state.owner_folder();
        match state.try_current_group_again(self.config.group_retry_count) {
            RetryOutcome::Retrying => {
                tracing::debug!(folder = %folder.path, "Retrying current group");
            }
            RetryOutcome::GroupSkipped => {
                let skipped = self.skipped_groups.entry(folder.id).or_insert(0);
                *skipped += 1;
                let skipped = *skipped;
                tracing::warn!(folder = %folder.path, skipped, "Retries exhausted, skipping group");

                let threshold = self.config.quarantine_after_skipped_groups;
                if threshold > 0 && skipped >= threshold {
                    self.skipped_groups.remove(&folder.id);
                    self.quarantine.insert(folder.id, self.idle_cycle + 2);
                    tracing::warn!(
                        folder = %folder.path,
                        cycle = self.idle_cycle,
                        "Folder quarantined until the idle period after next"
                    );
                }
            }
        }
    }

    /// A folder has nothing left to download: leave the priority queue.
    fn drop_drained(&mut self, state: &SyncStateHandle) {
        state.set_state(SyncState::CompletedIdle);
        if queue::remove(&mut self.priority_q, state.as_ref()) {
            tracing::debug!(folder = %state.owner_folder().path, "Folder drained");
            self.notify(|l| l.on_folder_removed_from_q(QueueKind::Priority, state.owner_folder()));
        }
    }

    /// The server reported new messages for a folder.
    ///
    /// Returns how many were queued for download.
    pub fn on_new_messages(&mut self, state: &SyncStateHandle, headers: Vec<MessageHeader>) -> usize {
        let queued = state.queue_new_messages(headers);
        if queued > 0 {
            self.on_download_q_changed(state);
        }
        queued
    }

    // ========== Discovery and update queues ==========

    /// Queue folders that are due for an update or a discovery pass.
    pub fn auto_update_folders(&mut self) {
        let now = Utc::now();
        for account in self.directory.accounts() {
            if !account.is_auto_sync_candidate() {
                continue;
            }
            let update_minutes = account
                .biff_minutes
                .unwrap_or(self.config.default_update_interval_minutes);

            for state in self.directory.sync_states(account.id) {
                let folder = state.owner_folder();
                if !folder.has(FolderFlags::OFFLINE)
                    || folder
                        .flags
                        .intersects(FolderFlags::VIRTUAL | FolderFlags::NO_SELECT)
                {
                    continue;
                }

                if state.state() == SyncState::CompletedIdle
                    && interval_elapsed(state.last_update_time(), update_minutes, now)
                    && !queue::contains(&self.update_q, state.as_ref())
                {
                    self.update_q.push(state.clone());
                    self.notify(|l| l.on_folder_added_into_q(QueueKind::Update, folder));
                }

                if interval_elapsed(
                    state.last_sync_time(),
                    self.config.discovery_interval_minutes,
                    now,
                ) && !queue::contains(&self.discovery_q, state.as_ref())
                {
                    self.discovery_q.push(state.clone());
                    self.notify(|l| l.on_folder_added_into_q(QueueKind::Discovery, folder));
                }
            }
        }

        tracing::debug!(
            discovery = self.discovery_q.len(),
            update = self.update_q.len(),
            "Folders queued for update"
        );
        self.start_timer_if_needed();
    }

    /// A folder wants a refresh because the server has messages for it.
    ///
    /// Trash is never refreshed this way. Sent and archive folders jump the
    /// queue.
    pub fn on_folder_has_pending_msgs(&mut self, state: &SyncStateHandle) {
        let folder = state.owner_folder();
        if queue::contains(&self.update_q, state.as_ref()) || folder.has(FolderFlags::TRASH) {
            return;
        }

        if folder
            .flags
            .intersects(FolderFlags::SENT | FolderFlags::ARCHIVE)
        {
            self.update_q.insert(0, state.clone());
        } else {
            self.update_q.push(state.clone());
        }
        state.set_state(SyncState::UpdateNeeded);
        self.notify(|l| l.on_folder_added_into_q(QueueKind::Update, folder));
    }

    /// One timer period elapsed.
    ///
    /// Processes one discovery batch of the head of the discovery queue and,
    /// if no refresh is in flight, initiates one for the head of the update
    /// queue. The timer stops itself once the user is back or both queues
    /// are empty.
    pub fn on_timer_tick(&mut self) {
        if !self.is_idle() || (self.discovery_q.is_empty() && self.update_q.is_empty()) {
            self.stop_timer();
        }

        if let Some(state) = self.discovery_q.first().cloned() {
            self.process_discovery_head(&state);
        }

        if self.update_state == UpdateState::Completed
            && let Some(state) = self.update_q.first().cloned()
        {
            let folder = state.owner_folder();
            if matches!(
                state.state(),
                SyncState::CompletedIdle | SyncState::UpdateNeeded
            ) {
                match state.initiate_update() {
                    Ok(()) => {
                        self.update_state = UpdateState::Initiated;
                        tracing::debug!(folder = %folder.path, "Update initiated");
                        self.notify(|l| l.on_auto_sync_initiated(folder));
                    }
                    Err(e) => {
                        tracing::warn!(folder = %folder.path, error = %e, "Failed to initiate update");
                    }
                }
            }

            if self.update_state != UpdateState::Initiated {
                self.update_q.remove(0);
                self.notify(|l| l.on_folder_removed_from_q(QueueKind::Update, folder));
            }
        }
    }

    fn process_discovery_head(&mut self, state: &SyncStateHandle) {
        let folder = state.owner_folder();
        let batch = self.config.headers_per_discovery_pass;
        let before = state.pending_message_count();

        let remaining = match state.process_existing_headers(batch) {
            Ok(progress) => {
                self.notify(|l| l.on_discovery_q_processed(folder, batch, progress.remaining));
                if progress.queued > 0 || (before == 0 && state.pending_message_count() > 0) {
                    self.on_download_q_changed(state);
                }
                progress.remaining
            }
            Err(e) => {
                tracing::warn!(folder = %folder.path, error = %e, "Discovery pass failed");
                0
            }
        };

        if remaining == 0 {
            self.discovery_q.remove(0);
            self.notify(|l| l.on_folder_removed_from_q(QueueKind::Discovery, folder));
        }
    }

    /// A refresh requested by the timer finished.
    ///
    /// Frees the update slot and removes the folder from the update queue.
    /// New headers reported by the refresh are queued for download.
    pub fn on_update_completed(
        &mut self,
        state: &SyncStateHandle,
        result: Result<Vec<MessageHeader>>,
    ) {
        self.update_state = UpdateState::Completed;
        let folder = state.owner_folder();

        let removed = if queue::remove(&mut self.update_q, state.as_ref()) {
            Some(state.clone())
        } else if self.update_q.is_empty() {
            None
        } else {
            Some(self.update_q.remove(0))
        };
        if let Some(removed) = removed {
            self.notify(|l| l.on_folder_removed_from_q(QueueKind::Update, removed.owner_folder()));
        }

        if state.state() == SyncState::UpdateNeeded {
            state.set_state(SyncState::CompletedIdle);
        }

        match result {
            Ok(headers) => {
                let queued = self.on_new_messages(state, headers);
                tracing::debug!(folder = %folder.path, queued, "Update completed");
            }
            Err(e) => {
                tracing::warn!(folder = %folder.path, error = %e, "Update failed");
            }
        }
    }
}
