//! # mailledger-autosync
//!
//! Background auto-sync scheduler for `MailLedger` offline folders.
//!
//! While the user is away, the scheduler downloads the bodies of messages in
//! offline-enabled folders so they are readable without a connection. It
//! decides which folder goes first, how large each batch is, and how to
//! recover from failed transfers without starving other folders or accounts.
//!
//! This crate provides:
//! - **Scheduler** - [`AutoSyncManager`] with priority, discovery and update queues
//! - **Folder sync state** - per-folder download queue and retry bookkeeping
//! - **Strategies** - pluggable folder and message prioritization
//! - **Idle tracking** - app/system idle state machine and an idle detector
//! - **Listeners** - observation of scheduler progress
//! - **Service** - tokio driver feeding events and timer ticks to the manager
//!
//! The scheduler never talks to a server itself. Transfers and refreshes go
//! through a [`MailFetcher`], whose results are reported back as
//! [`AutoSyncEvent`]s.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod directory;
mod error;
pub mod folder_state;
pub mod idle;
pub mod listener;
pub mod manager;
pub mod model;
pub mod queue;
pub mod service;
pub mod strategy;

pub use config::{AutoSyncConfig, DownloadModel};
pub use directory::{AccountDirectory, InMemoryDirectory};
pub use error::{DownloadError, Error, Result};
pub use folder_state::{
    AutoSyncState, DiscoveryProgress, FolderSyncState, MailFetcher, MessageGroup, RetryOutcome,
    SyncState, SyncStateHandle,
};
pub use idle::{IdleDetector, IdleNotification, IdleState};
pub use listener::{
    AutoSyncListener, CollectingListener, ListenerEvent, LoggingListener, NoopListener, QueueKind,
};
pub use manager::AutoSyncManager;
pub use model::{
    AccountId, AccountSettings, FolderFlags, FolderId, FolderInfo, MessageHeader, MessageKey,
    ServerType,
};
pub use service::{AutoSyncEvent, AutoSyncHandle, AutoSyncService};
pub use strategy::{
    Decision, DefaultFolderStrategy, DefaultMsgStrategy, FolderStrategy, MsgStrategy,
    OpenFolderQuery, OpenFolders,
};
