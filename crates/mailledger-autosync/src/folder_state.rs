//! Per-folder sync bookkeeping.
//!
//! Every offline-enabled folder has one [`FolderSyncState`]. The manager only
//! ever talks to folders through this trait, holding them as shared
//! [`SyncStateHandle`]s; it never owns the underlying folder.
//!
//! [`AutoSyncState`] is the stock implementation. It keeps the folder's
//! download queue ordered by a [`MsgStrategy`], hands out message groups,
//! rolls groups back for retries and hands transfers to a [`MailFetcher`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{FolderInfo, MessageHeader, MessageKey};
use crate::strategy::MsgStrategy;

/// Shared handle to a folder's sync state.
pub type SyncStateHandle = Arc<dyn FolderSyncState>;

/// Sync state machine of a single folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Has queued messages waiting for a download slot.
    ReadyToDownload,
    /// A batch is being transferred.
    DownloadInProgress,
    /// Nothing to do until the next update or discovery pass.
    #[default]
    CompletedIdle,
    /// Waiting in the update queue for a refresh.
    UpdateNeeded,
}

/// What happened when a failed group was handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The same group will be handed out again.
    Retrying,
    /// The retry budget was exhausted; the next group will be handed out.
    GroupSkipped,
}

/// A group of messages to transfer in one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageGroup {
    /// Messages in download order.
    pub messages: Vec<MessageHeader>,
    /// Sum of the message sizes in bytes.
    pub total_bytes: u64,
}

impl MessageGroup {
    /// Number of messages in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the group is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Keys of the messages in the group.
    #[must_use]
    pub fn keys(&self) -> Vec<MessageKey> {
        self.messages.iter().map(|m| m.key).collect()
    }
}

/// Progress of one discovery pass over existing headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryProgress {
    /// Headers still waiting to be examined.
    pub remaining: usize,
    /// Messages newly added to the download queue by this pass.
    pub queued: usize,
}

/// Sync bookkeeping for one offline folder, as driven by the manager.
pub trait FolderSyncState: Send + Sync {
    /// The folder this state belongs to.
    fn owner_folder(&self) -> &FolderInfo;

    /// Current state.
    fn state(&self) -> SyncState;

    /// Move to a new state.
    fn set_state(&self, state: SyncState);

    /// Messages queued but not yet handed out.
    fn pending_message_count(&self) -> usize;

    /// All messages in the download queue, including handed-out ones.
    fn total_message_count(&self) -> usize;

    /// Take the next group of messages fitting into `byte_limit`.
    ///
    /// A single message larger than the limit is returned alone.
    fn next_group_of_messages(&self, byte_limit: u64) -> MessageGroup;

    /// Start an asynchronous transfer of `group`.
    ///
    /// The outcome is reported later through the manager's
    /// download-completed callback.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer could not be started.
    fn download_messages_for_offline(&self, group: &MessageGroup) -> Result<()>;

    /// Record the end of the in-flight transfer.
    fn download_finished(&self, succeeded: bool);

    /// Hand the current group back after a failure.
    ///
    /// The group is handed out again until `max_retries` retries were spent,
    /// after which the state drops the group from its queue and moves on.
    /// Dropped messages qualify for download again when reported later.
    fn try_current_group_again(&self, max_retries: u32) -> RetryOutcome;

    /// Hand the current group back without touching the retry counter.
    fn postpone_current_group(&self);

    /// Forget earlier failures.
    fn reset_retry_counter(&self);

    /// Examine up to `batch_size` locally known headers for messages without
    /// an offline copy and queue them.
    ///
    /// # Errors
    ///
    /// Returns an error if the local headers cannot be read.
    fn process_existing_headers(&self, batch_size: usize) -> Result<DiscoveryProgress>;

    /// Queue messages reported by the server. Returns how many were queued.
    fn queue_new_messages(&self, headers: Vec<MessageHeader>) -> usize;

    /// Ask the server for a lightweight refresh of the folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the refresh could not be started.
    fn initiate_update(&self) -> Result<()>;

    /// When the last full discovery pass finished.
    fn last_sync_time(&self) -> Option<DateTime<Utc>>;

    /// When the folder was last refreshed.
    fn last_update_time(&self) -> Option<DateTime<Utc>>;

    /// Whether `other` belongs to the same account, i.e. the same server.
    fn is_sibling(&self, other: &dyn FolderSyncState) -> bool {
        self.owner_folder().account_id == other.owner_folder().account_id
    }
}

/// Whether two handles refer to the same folder.
#[must_use]
pub fn same_folder(a: &dyn FolderSyncState, b: &dyn FolderSyncState) -> bool {
    a.owner_folder().id == b.owner_folder().id
}

/// Protocol-level collaborator that actually talks to the server.
///
/// Both calls are non-blocking hand-offs. Completion is reported back to the
/// auto-sync service as events.
pub trait MailFetcher: Send + Sync {
    /// Start downloading message bodies into the offline store.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be issued.
    fn fetch_bodies(&self, folder: &FolderInfo, keys: &[MessageKey]) -> Result<()>;

    /// Start a STATUS-style refresh of the folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be issued.
    fn refresh(&self, folder: &FolderInfo) -> Result<()>;
}

#[derive(Debug, Default)]
struct Inner {
    state: SyncState,
    download_queue: Vec<MessageHeader>,
    offset: usize,
    group_start: usize,
    retry_count: u32,
    in_flight: Vec<MessageKey>,
    offline: HashSet<MessageKey>,
    existing: Vec<MessageHeader>,
    discovery_cursor: usize,
    last_sync_time: Option<DateTime<Utc>>,
    last_update_time: Option<DateTime<Utc>>,
}

impl Inner {
    fn is_queued(&self, key: MessageKey) -> bool {
        self.download_queue.iter().any(|m| m.key == key)
    }
}

/// Stock [`FolderSyncState`] implementation.
pub struct AutoSyncState {
    folder: FolderInfo,
    fetcher: Arc<dyn MailFetcher>,
    strategy: Arc<dyn MsgStrategy>,
    inner: Mutex<Inner>,
}

impl AutoSyncState {
    /// Create the state for `folder`.
    #[must_use]
    pub fn new(
        folder: FolderInfo,
        fetcher: Arc<dyn MailFetcher>,
        strategy: Arc<dyn MsgStrategy>,
    ) -> Self {
        Self {
            folder,
            fetcher,
            strategy,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Seed the headers already stored locally, for discovery passes.
    #[must_use]
    pub fn with_existing_headers(self, headers: Vec<MessageHeader>) -> Self {
        self.lock().existing = headers;
        self
    }

    /// Mark messages as already available offline.
    pub fn mark_offline(&self, keys: impl IntoIterator<Item = MessageKey>) {
        self.lock().offline.extend(keys);
    }

    /// Whether a message body is stored offline.
    #[must_use]
    pub fn is_offline(&self, key: MessageKey) -> bool {
        self.lock().offline.contains(&key)
    }

    /// Record when the last discovery pass finished.
    pub fn set_last_sync_time(&self, time: Option<DateTime<Utc>>) {
        self.lock().last_sync_time = time;
    }

    /// Record when the folder was last refreshed.
    pub fn set_last_update_time(&self, time: Option<DateTime<Utc>>) {
        self.lock().last_update_time = time;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a message qualifies for an offline download.
    fn fits_download_criteria(&self, inner: &Inner, msg: &MessageHeader) -> bool {
        !msg.deleted
            && msg.size > 0
            && !inner.offline.contains(&msg.key)
            && !inner.is_queued(msg.key)
            && !self.strategy.is_excluded(&self.folder, msg)
    }

    fn enqueue(&self, inner: &mut Inner, headers: Vec<MessageHeader>) -> usize {
        let mut queued = 0;
        for msg in headers {
            if self.fits_download_criteria(inner, &msg) {
                inner.download_queue.push(msg);
                queued += 1;
            }
        }

        if queued > 0 {
            let offset = inner.offset;
            inner.download_queue[offset..]
                .sort_by(|a, b| self.strategy.sort(&self.folder, a, b).ordering());
        }
        queued
    }
}

impl std::fmt::Debug for AutoSyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoSyncState")
            .field("folder", &self.folder.path)
            .field("inner", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl FolderSyncState for AutoSyncState {
    fn owner_folder(&self) -> &FolderInfo {
        &self.folder
    }

    fn state(&self) -> SyncState {
        self.lock().state
    }

    fn set_state(&self, state: SyncState) {
        self.lock().state = state;
    }

    fn pending_message_count(&self) -> usize {
        let inner = self.lock();
        inner.download_queue.len().saturating_sub(inner.offset)
    }

    fn total_message_count(&self) -> usize {
        self.lock().download_queue.len()
    }

    fn next_group_of_messages(&self, byte_limit: u64) -> MessageGroup {
        let mut inner = self.lock();
        let mut group = MessageGroup::default();
        inner.group_start = inner.offset;

        let mut idx = inner.offset;
        while idx < inner.download_queue.len() {
            let msg = &inner.download_queue[idx];
            // Stored offline by some other path since it was queued.
            if inner.offline.contains(&msg.key) {
                idx += 1;
                continue;
            }
            if group.total_bytes + msg.size > byte_limit {
                if group.is_empty() {
                    group.total_bytes = msg.size;
                    group.messages.push(msg.clone());
                    idx += 1;
                }
                break;
            }
            group.total_bytes += msg.size;
            group.messages.push(msg.clone());
            idx += 1;
        }

        inner.offset = idx;
        group
    }

    fn download_messages_for_offline(&self, group: &MessageGroup) -> Result<()> {
        let keys = group.keys();
        {
            let mut inner = self.lock();
            inner.state = SyncState::DownloadInProgress;
            inner.in_flight.clone_from(&keys);
        }

        if let Err(e) = self.fetcher.fetch_bodies(&self.folder, &keys) {
            let mut inner = self.lock();
            inner.state = SyncState::ReadyToDownload;
            inner.in_flight.clear();
            return Err(e);
        }
        Ok(())
    }

    fn download_finished(&self, succeeded: bool) {
        let mut inner = self.lock();
        let keys = std::mem::take(&mut inner.in_flight);
        if !succeeded {
            return;
        }
        inner.offline.extend(keys);
        if inner.offset >= inner.download_queue.len() {
            inner.download_queue.clear();
            inner.offset = 0;
            inner.group_start = 0;
        }
    }

    fn try_current_group_again(&self, max_retries: u32) -> RetryOutcome {
        let mut inner = self.lock();
        if inner.retry_count < max_retries {
            inner.retry_count += 1;
            inner.offset = inner.group_start;
            RetryOutcome::Retrying
        } else {
            // Skipped messages leave the queue so a later report can queue them again.
            let (start, end) = (inner.group_start, inner.offset);
            inner.download_queue.drain(start..end);
            inner.offset = start;
            inner.retry_count = 0;
            RetryOutcome::GroupSkipped
        }
    }

    fn postpone_current_group(&self) {
        let mut inner = self.lock();
        inner.offset = inner.group_start;
    }

    fn reset_retry_counter(&self) {
        self.lock().retry_count = 0;
    }

    fn process_existing_headers(&self, batch_size: usize) -> Result<DiscoveryProgress> {
        let mut inner = self.lock();
        let start = inner.discovery_cursor.min(inner.existing.len());
        let end = start.saturating_add(batch_size).min(inner.existing.len());
        let batch = inner.existing[start..end].to_vec();
        inner.discovery_cursor = end;

        let queued = self.enqueue(&mut inner, batch);
        let remaining = inner.existing.len() - end;
        if remaining == 0 {
            inner.discovery_cursor = 0;
            inner.last_sync_time = Some(Utc::now());
        }

        Ok(DiscoveryProgress { remaining, queued })
    }

    fn queue_new_messages(&self, headers: Vec<MessageHeader>) -> usize {
        let mut inner = self.lock();
        for msg in &headers {
            if !inner.existing.iter().any(|m| m.key == msg.key) {
                inner.existing.push(msg.clone());
            }
        }
        self.enqueue(&mut inner, headers)
    }

    fn initiate_update(&self) -> Result<()> {
        self.fetcher.refresh(&self.folder)?;
        self.lock().last_update_time = Some(Utc::now());
        Ok(())
    }

    fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.lock().last_sync_time
    }

    fn last_update_time(&self) -> Option<DateTime<Utc>> {
        self.lock().last_update_time
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::error::Error;
    use crate::model::{AccountId, FolderId};
    use crate::strategy::DefaultMsgStrategy;

    #[derive(Default)]
    struct RecordingFetcher {
        fetched: Mutex<Vec<Vec<MessageKey>>>,
        fail: bool,
    }

    impl MailFetcher for RecordingFetcher {
        fn fetch_bodies(&self, _folder: &FolderInfo, keys: &[MessageKey]) -> Result<()> {
            if self.fail {
                return Err(Error::Fetch("connection refused".into()));
            }
            self.fetched.lock().unwrap().push(keys.to_vec());
            Ok(())
        }

        fn refresh(&self, _folder: &FolderInfo) -> Result<()> {
            Ok(())
        }
    }

    const KB: u64 = 1024;

    fn header(key: u32, size: u64) -> MessageHeader {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
            + chrono::Duration::minutes(i64::from(key));
        MessageHeader::new(key, size, date)
    }

    fn state_with(fetcher: Arc<RecordingFetcher>) -> AutoSyncState {
        AutoSyncState::new(
            FolderInfo::new(FolderId(1), AccountId(1), "INBOX"),
            fetcher,
            Arc::new(DefaultMsgStrategy),
        )
    }

    #[test]
    fn test_group_fills_up_to_limit() {
        let state = state_with(Arc::default());
        let queued = state.queue_new_messages((1..=5).map(|k| header(k, 10 * KB)).collect());
        assert_eq!(queued, 5);

        let group = state.next_group_of_messages(50 * KB);
        assert_eq!(group.len(), 5);
        assert_eq!(group.total_bytes, 50 * KB);
        assert_eq!(state.pending_message_count(), 0);
    }

    #[test]
    fn test_oversized_message_returned_alone() {
        let state = state_with(Arc::default());
        state.queue_new_messages(vec![header(1, 80 * KB)]);

        let group = state.next_group_of_messages(50 * KB);
        assert_eq!(group.keys(), vec![1]);
        assert_eq!(group.total_bytes, 80 * KB);
    }

    #[test]
    fn test_group_stops_before_overflow() {
        let state = state_with(Arc::default());
        state.queue_new_messages(vec![header(1, 30 * KB), header(2, 30 * KB), header(3, 5 * KB)]);

        let first = state.next_group_of_messages(50 * KB);
        assert_eq!(first.len(), 2);
        assert_eq!(state.pending_message_count(), 1);
    }

    #[test]
    fn test_download_criteria() {
        let state = state_with(Arc::default());
        state.mark_offline([2]);
        let mut deleted = header(3, KB);
        deleted.deleted = true;

        let queued = state.queue_new_messages(vec![
            header(1, KB),
            header(2, KB),
            deleted,
            header(4, 0),
            header(1, KB),
        ]);
        assert_eq!(queued, 1);
        assert_eq!(state.total_message_count(), 1);
    }

    #[test]
    fn test_retry_rolls_back_then_skips() {
        let state = state_with(Arc::default());
        state.queue_new_messages(vec![header(1, 40 * KB), header(2, 40 * KB)]);

        let group = state.next_group_of_messages(50 * KB);
        assert_eq!(group.keys().len(), 1);
        let first_key = group.keys()[0];

        for _ in 0..2 {
            assert_eq!(state.try_current_group_again(2), RetryOutcome::Retrying);
            assert_eq!(state.next_group_of_messages(50 * KB).keys(), vec![first_key]);
        }

        assert_eq!(state.try_current_group_again(2), RetryOutcome::GroupSkipped);
        let next = state.next_group_of_messages(50 * KB);
        assert_ne!(next.keys(), vec![first_key]);
    }

    #[test]
    fn test_skipped_group_can_be_queued_again() {
        let state = state_with(Arc::default());
        let skipped = header(1, 10 * KB);
        state.queue_new_messages(vec![skipped.clone()]);

        let group = state.next_group_of_messages(50 * KB);
        state.download_messages_for_offline(&group).unwrap();
        state.download_finished(false);
        assert_eq!(state.try_current_group_again(0), RetryOutcome::GroupSkipped);
        assert_eq!(state.pending_message_count(), 0);
        assert_eq!(state.total_message_count(), 0);

        assert_eq!(state.queue_new_messages(vec![skipped]), 1);
        assert_eq!(state.pending_message_count(), 1);
        assert_eq!(state.next_group_of_messages(50 * KB).keys(), vec![1]);
    }

    #[test]
    fn test_discovery_requeues_skipped_message() {
        let state = state_with(Arc::default()).with_existing_headers(vec![header(1, 10 * KB)]);
        assert_eq!(state.process_existing_headers(250).unwrap().queued, 1);

        state.next_group_of_messages(50 * KB);
        assert_eq!(state.try_current_group_again(0), RetryOutcome::GroupSkipped);

        let progress = state.process_existing_headers(250).unwrap();
        assert_eq!(progress.queued, 1);
        assert_eq!(state.pending_message_count(), 1);
    }

    #[test]
    fn test_postpone_does_not_count_as_retry() {
        let state = state_with(Arc::default());
        state.queue_new_messages(vec![header(1, 10 * KB)]);

        state.next_group_of_messages(50 * KB);
        state.postpone_current_group();
        assert_eq!(state.pending_message_count(), 1);
        assert_eq!(state.try_current_group_again(1), RetryOutcome::Retrying);
    }

    #[test]
    fn test_download_hands_off_and_completes() {
        let fetcher = Arc::new(RecordingFetcher::default());
        let state = state_with(fetcher.clone());
        state.queue_new_messages(vec![header(1, KB), header(2, KB)]);

        let group = state.next_group_of_messages(50 * KB);
        state.download_messages_for_offline(&group).unwrap();
        assert_eq!(state.state(), SyncState::DownloadInProgress);
        assert_eq!(fetcher.fetched.lock().unwrap().len(), 1);

        state.download_finished(true);
        assert!(state.is_offline(1));
        assert!(state.is_offline(2));
        assert_eq!(state.total_message_count(), 0);
    }

    #[test]
    fn test_download_start_failure_restores_state() {
        let fetcher = Arc::new(RecordingFetcher {
            fail: true,
            ..RecordingFetcher::default()
        });
        let state = state_with(fetcher);
        state.queue_new_messages(vec![header(1, KB)]);

        let group = state.next_group_of_messages(50 * KB);
        assert!(state.download_messages_for_offline(&group).is_err());
        assert_eq!(state.state(), SyncState::ReadyToDownload);
    }

    #[test]
    fn test_discovery_in_batches() {
        let state = state_with(Arc::default())
            .with_existing_headers((1..=5).map(|k| header(k, KB)).collect());
        state.mark_offline([1, 2]);

        let first = state.process_existing_headers(3).unwrap();
        assert_eq!(first, DiscoveryProgress { remaining: 2, queued: 1 });
        assert!(state.last_sync_time().is_none());

        let second = state.process_existing_headers(3).unwrap();
        assert_eq!(second, DiscoveryProgress { remaining: 0, queued: 2 });
        assert!(state.last_sync_time().is_some());
        assert_eq!(state.pending_message_count(), 3);
    }

    #[test]
    fn test_siblings_share_account() {
        let a = state_with(Arc::default());
        let b = AutoSyncState::new(
            FolderInfo::new(FolderId(2), AccountId(1), "Drafts"),
            Arc::new(RecordingFetcher::default()),
            Arc::new(DefaultMsgStrategy),
        );
        let c = AutoSyncState::new(
            FolderInfo::new(FolderId(3), AccountId(2), "INBOX"),
            Arc::new(RecordingFetcher::default()),
            Arc::new(DefaultMsgStrategy),
        );

        assert!(a.is_sibling(&b));
        assert!(!a.is_sibling(&c));
        assert!(!same_folder(&a, &b));
    }
}
