//! Folder, message and account model types.

use std::ops::{BitOr, BitOrAssign};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub i64);

impl AccountId {
    /// Create a new account ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderId(pub i64);

impl FolderId {
    /// Create a new folder ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for FolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Set of folder attributes relevant to scheduling.
///
/// A folder can carry several of these at once (an inbox that is also used
/// as the sent folder, for example).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FolderFlags(u32);

impl FolderFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// The account inbox.
    pub const INBOX: Self = Self(1);
    /// Drafts folder.
    pub const DRAFTS: Self = Self(1 << 1);
    /// Trash folder.
    pub const TRASH: Self = Self(1 << 2);
    /// Sent mail folder.
    pub const SENT: Self = Self(1 << 3);
    /// Archive folder.
    pub const ARCHIVE: Self = Self(1 << 4);
    /// Saved search (virtual folder).
    pub const VIRTUAL: Self = Self(1 << 5);
    /// Folder exists only as a hierarchy node and cannot be selected.
    pub const NO_SELECT: Self = Self(1 << 6);
    /// Folder is enabled for offline use.
    pub const OFFLINE: Self = Self(1 << 7);

    /// Returns the raw bit representation.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any flag in `other` is set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns a copy with the flags in `other` cleared.
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Detect special-use flags from a folder name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower == "inbox" {
            Self::INBOX
        } else if lower.contains("sent") {
            Self::SENT
        } else if lower.contains("draft") {
            Self::DRAFTS
        } else if lower.contains("trash") || lower.contains("deleted") {
            Self::TRASH
        } else if lower.contains("archive") {
            Self::ARCHIVE
        } else {
            Self::NONE
        }
    }
}

impl BitOr for FolderFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for FolderFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A mail folder as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderInfo {
    /// Unique identifier.
    pub id: FolderId,
    /// Account (and therefore server) owning the folder.
    pub account_id: AccountId,
    /// Full path (including hierarchy).
    pub path: String,
    /// Folder attributes.
    pub flags: FolderFlags,
    /// Parent folder, `None` for orphans.
    pub parent: Option<FolderId>,
    /// Messages older than this many days are not stored offline.
    pub max_age_days: Option<u32>,
}

impl FolderInfo {
    /// Create an offline-enabled folder, detecting special-use flags from its path.
    ///
    /// The folder is parented to the account root.
    #[must_use]
    pub fn new(id: FolderId, account_id: AccountId, path: &str) -> Self {
        let name = path.rsplit_once('/').map_or(path, |(_, n)| n);
        Self {
            id,
            account_id,
            path: path.to_string(),
            flags: FolderFlags::from_name(name) | FolderFlags::OFFLINE,
            parent: Some(FolderId::new(0)),
            max_age_days: None,
        }
    }

    /// Replace the folder flags.
    #[must_use]
    pub fn with_flags(mut self, flags: FolderFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the parent folder.
    #[must_use]
    pub fn with_parent(mut self, parent: Option<FolderId>) -> Self {
        self.parent = parent;
        self
    }

    /// Limit offline storage to messages younger than `days`.
    #[must_use]
    pub fn with_max_age_days(mut self, days: u32) -> Self {
        self.max_age_days = Some(days);
        self
    }

    /// Check a flag.
    #[must_use]
    pub const fn has(&self, flag: FolderFlags) -> bool {
        self.flags.contains(flag)
    }
}

/// Server-assigned message key (IMAP UID).
pub type MessageKey = u32;

/// Header of a message known locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Message key.
    pub key: MessageKey,
    /// Size of the full message in bytes.
    pub size: u64,
    /// Message date.
    pub date: DateTime<Utc>,
    /// Marked deleted on the server.
    pub deleted: bool,
}

impl MessageHeader {
    /// Create a header for a live (not deleted) message.
    #[must_use]
    pub const fn new(key: MessageKey, size: u64, date: DateTime<Utc>) -> Self {
        Self {
            key,
            size,
            date,
            deleted: false,
        }
    }
}

/// Incoming server protocol of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServerType {
    /// IMAP; the only protocol auto-sync works with.
    #[default]
    Imap,
    /// POP3.
    Pop3,
    /// Local folders, feeds and anything else.
    Other,
}

/// Per-account settings consulted by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSettings {
    /// Account identifier.
    pub id: AccountId,
    /// Incoming server protocol.
    pub server_type: ServerType,
    /// Whether offline folders of this account are auto-synced.
    pub auto_sync_offline_stores: bool,
    /// Set while the account still needs a password before it can check mail.
    pub requires_password: bool,
    /// Minutes between new-mail checks; `None` uses the scheduler default.
    pub biff_minutes: Option<u32>,
}

impl AccountSettings {
    /// Create settings for an auto-synced IMAP account.
    #[must_use]
    pub const fn imap(id: AccountId) -> Self {
        Self {
            id,
            server_type: ServerType::Imap,
            auto_sync_offline_stores: true,
            requires_password: false,
            biff_minutes: None,
        }
    }

    /// Whether periodic folder updates should consider this account at all.
    #[must_use]
    pub fn is_auto_sync_candidate(&self) -> bool {
        self.server_type == ServerType::Imap
            && !self.requires_password
            && self.auto_sync_offline_stores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_set_operations() {
        let flags = FolderFlags::INBOX | FolderFlags::SENT;
        assert!(flags.contains(FolderFlags::INBOX));
        assert!(flags.contains(FolderFlags::SENT));
        assert!(!flags.contains(FolderFlags::INBOX | FolderFlags::TRASH));
        assert!(flags.intersects(FolderFlags::TRASH | FolderFlags::SENT));
        assert_eq!(flags.without(FolderFlags::SENT), FolderFlags::INBOX);
    }

    #[test]
    fn test_flags_from_name() {
        assert_eq!(FolderFlags::from_name("INBOX"), FolderFlags::INBOX);
        assert_eq!(FolderFlags::from_name("Sent Items"), FolderFlags::SENT);
        assert_eq!(FolderFlags::from_name("Drafts"), FolderFlags::DRAFTS);
        assert_eq!(FolderFlags::from_name("Deleted Items"), FolderFlags::TRASH);
        assert_eq!(FolderFlags::from_name("Archive"), FolderFlags::ARCHIVE);
        assert_eq!(FolderFlags::from_name("Projects"), FolderFlags::NONE);
    }

    #[test]
    fn test_folder_info_new_uses_leaf_name() {
        let folder = FolderInfo::new(FolderId(3), AccountId(1), "Lists/Drafts");
        assert!(folder.has(FolderFlags::DRAFTS));
        assert!(folder.has(FolderFlags::OFFLINE));
        assert!(folder.parent.is_some());
    }

    #[test]
    fn test_account_candidate() {
        let mut account = AccountSettings::imap(AccountId(1));
        assert!(account.is_auto_sync_candidate());

        account.requires_password = true;
        assert!(!account.is_auto_sync_candidate());

        account.requires_password = false;
        account.server_type = ServerType::Pop3;
        assert!(!account.is_auto_sync_candidate());
    }
}
