//! Account and folder lookup.
//!
//! The scheduler does not persist accounts or folders. It asks an
//! [`AccountDirectory`] which accounts exist and which folder sync states
//! belong to them.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::folder_state::SyncStateHandle;
use crate::model::{AccountId, AccountSettings, FolderId};

/// Source of accounts and their folder sync states.
pub trait AccountDirectory: Send + Sync {
    /// All configured accounts.
    fn accounts(&self) -> Vec<AccountSettings>;

    /// Sync states of every folder of an account.
    fn sync_states(&self, account: AccountId) -> Vec<SyncStateHandle>;

    /// Sync state of a folder, if it exists.
    fn find_state(&self, folder: FolderId) -> Option<SyncStateHandle>;
}

#[derive(Default)]
struct Entries {
    accounts: Vec<AccountSettings>,
    states: Vec<SyncStateHandle>,
}

/// In-memory [`AccountDirectory`].
#[derive(Default)]
pub struct InMemoryDirectory {
    entries: Mutex<Entries>,
}

impl InMemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an account.
    pub fn add_account(&self, account: AccountSettings) {
        let mut entries = self.lock();
        entries.accounts.retain(|a| a.id != account.id);
        entries.accounts.push(account);
    }

    /// Add or replace a folder's sync state.
    pub fn add_folder_state(&self, state: SyncStateHandle) {
        let mut entries = self.lock();
        let id = state.owner_folder().id;
        entries.states.retain(|s| s.owner_folder().id != id);
        entries.states.push(state);
    }

    /// Remove a folder.
    pub fn remove_folder(&self, folder: FolderId) {
        self.lock().states.retain(|s| s.owner_folder().id != folder);
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for InMemoryDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.lock();
        f.debug_struct("InMemoryDirectory")
            .field("accounts", &entries.accounts.len())
            .field("folders", &entries.states.len())
            .finish()
    }
}

impl AccountDirectory for InMemoryDirectory {
    fn accounts(&self) -> Vec<AccountSettings> {
        self.lock().accounts.clone()
    }

    fn sync_states(&self, account: AccountId) -> Vec<SyncStateHandle> {
        self.lock()
            .states
            .iter()
            .filter(|s| s.owner_folder().account_id == account)
            .cloned()
            .collect()
    }

    fn find_state(&self, folder: FolderId) -> Option<SyncStateHandle> {
        self.lock()
            .states
            .iter()
            .find(|s| s.owner_folder().id == folder)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::folder_state::{AutoSyncState, MailFetcher};
    use crate::model::{FolderInfo, MessageKey};
    use crate::strategy::DefaultMsgStrategy;

    struct NullFetcher;

    impl MailFetcher for NullFetcher {
        fn fetch_bodies(&self, _: &FolderInfo, _: &[MessageKey]) -> crate::Result<()> {
            Ok(())
        }

        fn refresh(&self, _: &FolderInfo) -> crate::Result<()> {
            Ok(())
        }
    }

    fn state(id: i64, account: i64) -> SyncStateHandle {
        Arc::new(AutoSyncState::new(
            FolderInfo::new(FolderId(id), AccountId(account), "INBOX"),
            Arc::new(NullFetcher),
            Arc::new(DefaultMsgStrategy),
        ))
    }

    #[test]
    fn test_lookup() {
        let directory = InMemoryDirectory::new();
        directory.add_account(AccountSettings::imap(AccountId(1)));
        directory.add_account(AccountSettings::imap(AccountId(1)));
        directory.add_folder_state(state(10, 1));
        directory.add_folder_state(state(11, 1));
        directory.add_folder_state(state(20, 2));

        assert_eq!(directory.accounts().len(), 1);
        assert_eq!(directory.sync_states(AccountId(1)).len(), 2);
        assert!(directory.find_state(FolderId(20)).is_some());

        directory.remove_folder(FolderId(20));
        assert!(directory.find_state(FolderId(20)).is_none());
    }
}
