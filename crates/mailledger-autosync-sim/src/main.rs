//! `mailledger-autosync-sim` - drive the auto-sync scheduler against a fake server.
//!
//! Builds two accounts with a handful of offline folders, declares the user
//! idle and lets the scheduler download everything it can. Transfers and
//! refreshes complete after a simulated latency; one folder fails every other
//! transfer so retry and quarantine handling show up in the log.
//!
//! Usage: `mailledger-autosync-sim [SECONDS]` (default 10).

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailledger_autosync::{
    AccountDirectory, AccountId, AccountSettings, AutoSyncConfig, AutoSyncEvent, AutoSyncHandle,
    AutoSyncManager, AutoSyncService, AutoSyncState, DefaultMsgStrategy, FolderId, FolderInfo,
    FolderSyncState, IdleNotification, InMemoryDirectory, LoggingListener, MailFetcher,
    MessageHeader, MessageKey,
};

const DEFAULT_RUN_SECS: u64 = 10;

/// Round-trip time of every simulated server request.
const LATENCY: Duration = Duration::from_millis(150);

/// A mail server that answers after [`LATENCY`] through the service handle.
struct SimulatedServer {
    handle: AutoSyncHandle,
    /// Folders whose every other transfer fails.
    flaky: HashSet<FolderId>,
    attempts: Mutex<HashMap<FolderId, u32>>,
    /// Messages that arrive on the next refresh.
    arriving: Mutex<HashMap<FolderId, Vec<MessageHeader>>>,
    fetched_messages: AtomicU64,
    failed_transfers: AtomicU64,
}

impl SimulatedServer {
    fn new(handle: AutoSyncHandle, flaky: HashSet<FolderId>) -> Self {
        Self {
            handle,
            flaky,
            attempts: Mutex::new(HashMap::new()),
            arriving: Mutex::new(HashMap::new()),
            fetched_messages: AtomicU64::new(0),
            failed_transfers: AtomicU64::new(0),
        }
    }

    fn deliver_on_refresh(&self, folder: FolderId, headers: Vec<MessageHeader>) {
        self.arriving
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(folder, headers);
    }

    fn transfer_fails(&self, folder: FolderId) -> bool {
        if !self.flaky.contains(&folder) {
            return false;
        }
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let attempt = attempts.entry(folder).or_default();
        *attempt += 1;
        *attempt % 2 == 1
    }
}

impl MailFetcher for SimulatedServer {
    fn fetch_bodies(
        &self,
        folder: &FolderInfo,
        keys: &[MessageKey],
    ) -> mailledger_autosync::Result<()> {
        let result = if self.transfer_fails(folder.id) {
            self.failed_transfers.fetch_add(1, Ordering::Relaxed);
            Err("connection reset by peer".to_string())
        } else {
            self.fetched_messages
                .fetch_add(keys.len() as u64, Ordering::Relaxed);
            Ok(())
        };

        let handle = self.handle.clone();
        let folder = folder.id;
        tokio::spawn(async move {
            tokio::time::sleep(LATENCY).await;
            if let Err(e) = handle.download_completed(folder, result) {
                tracing::debug!(?e, "Service gone before transfer completed");
            }
        });
        Ok(())
    }

    fn refresh(&self, folder: &FolderInfo) -> mailledger_autosync::Result<()> {
        let headers = self
            .arriving
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&folder.id)
            .unwrap_or_default();

        let handle = self.handle.clone();
        let folder = folder.id;
        tokio::spawn(async move {
            tokio::time::sleep(LATENCY).await;
            if let Err(e) = handle.update_completed(folder, Ok(headers)) {
                tracing::debug!(?e, "Service gone before refresh completed");
            }
        });
        Ok(())
    }
}

/// Deterministic message sizes between 2 KB and 42 KB.
fn mailbox(first_key: MessageKey, count: u32) -> Vec<MessageHeader> {
    let now = Utc::now();
    (0..count)
        .map(|i| {
            let key = first_key + i;
            let size = 2_048 + u64::from(key.wrapping_mul(7_919) % 40_960);
            MessageHeader::new(key, size, now - chrono::Duration::minutes(i64::from(i) * 17))
        })
        .collect()
}

struct Mailboxes {
    /// Headers announced as new mail once the service is running.
    new_mail: Vec<(FolderId, Vec<MessageHeader>)>,
}

fn populate(directory: &InMemoryDirectory, server: &Arc<SimulatedServer>) -> Mailboxes {
    let fetcher: Arc<dyn MailFetcher> = server.clone();
    let add = |folder: FolderInfo, existing: Vec<MessageHeader>| {
        let state = AutoSyncState::new(folder, fetcher.clone(), Arc::new(DefaultMsgStrategy))
            .with_existing_headers(existing);
        directory.add_folder_state(Arc::new(state));
    };

    directory.add_account(AccountSettings::imap(AccountId(1)));
    let mut work = AccountSettings::imap(AccountId(2));
    work.biff_minutes = Some(5);
    directory.add_account(work);

    // Personal account: a large inbox that needs discovery and a flaky list folder.
    add(FolderInfo::new(FolderId(1), AccountId(1), "INBOX"), mailbox(1, 600));
    add(FolderInfo::new(FolderId(2), AccountId(1), "Drafts"), Vec::new());
    add(FolderInfo::new(FolderId(3), AccountId(1), "Lists/rust-users"), Vec::new());
    add(FolderInfo::new(FolderId(4), AccountId(1), "Trash"), mailbox(1, 20));

    // Work account.
    add(FolderInfo::new(FolderId(10), AccountId(2), "INBOX"), Vec::new());
    add(FolderInfo::new(FolderId(11), AccountId(2), "Archive"), mailbox(1, 40));

    server.deliver_on_refresh(FolderId(10), mailbox(500, 12));

    Mailboxes {
        new_mail: vec![
            (FolderId(2), mailbox(1, 3)),
            (FolderId(3), mailbox(1, 25)),
            (FolderId(10), mailbox(1, 8)),
        ],
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailledger_autosync=debug,mailledger_autosync_sim=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let run_for = std::env::args()
        .nth(1)
        .map(|arg| arg.parse::<u64>())
        .transpose()?
        .unwrap_or(DEFAULT_RUN_SECS);

    let config = AutoSyncConfig::load_or_default(&AutoSyncConfig::default_path()).await?;
    info!(?config, run_for, "Starting auto-sync simulation");

    let (handle, events) = AutoSyncHandle::channel();
    let server = Arc::new(SimulatedServer::new(handle.clone(), HashSet::from([FolderId(3)])));
    let directory = Arc::new(InMemoryDirectory::new());
    let mailboxes = populate(&directory, &server);

    let mut manager = AutoSyncManager::new(config, directory.clone());
    manager.add_listener(Arc::new(LoggingListener));
    let service = AutoSyncService::new(manager, directory.clone(), events).without_idle_detection();
    let task = tokio::spawn(service.run());

    for (folder, headers) in mailboxes.new_mail {
        handle.send(AutoSyncEvent::NewMessages { folder, headers })?;
    }
    handle.send(AutoSyncEvent::Idle(IdleNotification::SystemIdle))?;

    tokio::time::sleep(Duration::from_secs(run_for)).await;
    handle.shutdown()?;
    let manager = task.await?;

    for account in directory.accounts() {
        for state in directory.sync_states(account.id) {
            let folder = state.owner_folder();
            info!(
                account = account.id.0,
                folder = %folder.path,
                state = ?state.state(),
                pending = state.pending_message_count(),
                quarantined = manager.is_quarantined(folder.id),
                "Folder summary"
            );
        }
    }
    info!(
        fetched = server.fetched_messages.load(Ordering::Relaxed),
        failed = server.failed_transfers.load(Ordering::Relaxed),
        queued = manager.download_queue_len(),
        idle_cycles = manager.idle_cycle(),
        "Simulation finished"
    );

    Ok(())
}
