//! Pluggable prioritization policies.
//!
//! Two policies shape what auto-sync downloads first:
//!
//! - A [`FolderStrategy`] orders folders competing for download bandwidth and
//!   filters out folders that must never be queued.
//! - A [`MsgStrategy`] orders messages inside a folder's download queue and
//!   filters out messages that should not be stored offline.
//!
//! Both are stateless comparators. The defaults implement the order
//! `INBOX > DRAFTS > other folders > TRASH` and "most recent and smallest
//! message first".

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use chrono::{Duration, Utc};

use crate::model::{FolderFlags, FolderId, FolderInfo, MessageHeader};

/// Messages above this size are downloaded after all smaller ones.
pub const LARGE_MESSAGE_THRESHOLD: u64 = 60 * 1024;

/// Relative priority of the second argument of a strategy `sort` call
/// compared to the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The second item should be processed before the first.
    Higher,
    /// No preference.
    Same,
    /// The second item should be processed after the first.
    Lower,
}

impl Decision {
    /// Ordering of the first argument relative to the second, suitable for
    /// `sort_by` where earlier means higher priority.
    #[must_use]
    pub const fn ordering(self) -> Ordering {
        match self {
            Self::Higher => Ordering::Greater,
            Self::Same => Ordering::Equal,
            Self::Lower => Ordering::Less,
        }
    }
}

/// Orders and filters folders in the download queue.
pub trait FolderStrategy: Send + Sync {
    /// Priority of `b` relative to `a`.
    fn sort(&self, a: &FolderInfo, b: &FolderInfo) -> Decision;

    /// Whether the folder must never enter the download queue.
    fn is_excluded(&self, folder: &FolderInfo) -> bool;
}

/// Orders and filters messages in a folder's download queue.
pub trait MsgStrategy: Send + Sync {
    /// Priority of `b` relative to `a`.
    fn sort(&self, folder: &FolderInfo, a: &MessageHeader, b: &MessageHeader) -> Decision;

    /// Whether the message should not be downloaded for offline use.
    fn is_excluded(&self, folder: &FolderInfo, msg: &MessageHeader) -> bool;
}

/// Answers whether a folder is currently open in a UI window.
pub trait OpenFolderQuery: Send + Sync {
    /// Whether the folder is displayed right now.
    fn is_folder_open(&self, folder: FolderId) -> bool;
}

/// Thread-safe set of folders the UI has open.
#[derive(Debug, Default)]
pub struct OpenFolders {
    open: Mutex<HashSet<FolderId>>,
}

impl OpenFolders {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a folder was opened.
    pub fn open(&self, folder: FolderId) {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(folder);
    }

    /// Record that a folder was closed.
    pub fn close(&self, folder: FolderId) {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&folder);
    }
}

impl OpenFolderQuery for OpenFolders {
    fn is_folder_open(&self, folder: FolderId) -> bool {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&folder)
    }
}

/// Rank of a folder kind, lower downloads first.
///
/// The inbox flag wins over any other special-use flag on the same folder.
const fn kind_rank(folder: &FolderInfo) -> u8 {
    if folder.has(FolderFlags::INBOX) {
        0
    } else if folder.has(FolderFlags::DRAFTS) {
        1
    } else if folder.has(FolderFlags::TRASH) {
        3
    } else {
        2
    }
}

/// Default folder ordering: open folders first, then
/// `INBOX > DRAFTS > other folders > TRASH`.
#[derive(Default)]
pub struct DefaultFolderStrategy {
    open_folders: Option<std::sync::Arc<dyn OpenFolderQuery>>,
}

impl DefaultFolderStrategy {
    /// Creates a strategy that ranks folders open in the UI first.
    #[must_use]
    pub fn new(open_folders: std::sync::Arc<dyn OpenFolderQuery>) -> Self {
        Self {
            open_folders: Some(open_folders),
        }
    }

    fn is_open(&self, folder: &FolderInfo) -> bool {
        self.open_folders
            .as_ref()
            .is_some_and(|q| q.is_folder_open(folder.id))
    }
}

impl std::fmt::Debug for DefaultFolderStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultFolderStrategy")
            .field("tracks_open_folders", &self.open_folders.is_some())
            .finish()
    }
}

impl FolderStrategy for DefaultFolderStrategy {
    fn sort(&self, a: &FolderInfo, b: &FolderInfo) -> Decision {
        let a_open = self.is_open(a);
        let b_open = self.is_open(b);
        if a_open != b_open {
            return if b_open {
                Decision::Higher
            } else {
                Decision::Lower
            };
        }

        match kind_rank(b).cmp(&kind_rank(a)) {
            Ordering::Less => Decision::Higher,
            Ordering::Greater => Decision::Lower,
            Ordering::Equal => Decision::Same,
        }
    }

    fn is_excluded(&self, folder: &FolderInfo) -> bool {
        folder.has(FolderFlags::VIRTUAL) || folder.parent.is_none()
    }
}

/// Default message ordering: messages up to 60 KiB first, most recent first,
/// smaller first on equal dates; larger messages afterwards, smallest first.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMsgStrategy;

impl MsgStrategy for DefaultMsgStrategy {
    fn sort(&self, _folder: &FolderInfo, a: &MessageHeader, b: &MessageHeader) -> Decision {
        let a_large = a.size > LARGE_MESSAGE_THRESHOLD;
        let b_large = b.size > LARGE_MESSAGE_THRESHOLD;

        match (a_large, b_large) {
            (true, true) => match b.size.cmp(&a.size) {
                Ordering::Greater => Decision::Lower,
                Ordering::Less => Decision::Higher,
                Ordering::Equal => Decision::Same,
            },
            (false, true) => Decision::Lower,
            (true, false) => Decision::Higher,
            (false, false) => match a.date.cmp(&b.date) {
                Ordering::Less => Decision::Higher,
                Ordering::Greater => Decision::Lower,
                Ordering::Equal => match a.size.cmp(&b.size) {
                    Ordering::Greater => Decision::Higher,
                    Ordering::Less => Decision::Lower,
                    Ordering::Equal => Decision::Same,
                },
            },
        }
    }

    fn is_excluded(&self, folder: &FolderInfo, msg: &MessageHeader) -> bool {
        folder.max_age_days.is_some_and(|days| {
            days > 0 && msg.date < Utc::now() - Duration::days(i64::from(days))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;
    use crate::model::AccountId;

    fn folder(id: i64, path: &str) -> FolderInfo {
        FolderInfo::new(FolderId(id), AccountId(1), path)
    }

    fn msg(key: u32, size: u64, day: u32) -> MessageHeader {
        let date = Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap();
        MessageHeader::new(key, size, date)
    }

    #[test]
    fn test_inbox_outranks_drafts() {
        let strategy = DefaultFolderStrategy::default();
        let inbox = folder(1, "INBOX");
        let drafts = folder(2, "Drafts");

        assert_eq!(strategy.sort(&drafts, &inbox), Decision::Higher);
        assert_eq!(strategy.sort(&inbox, &drafts), Decision::Lower);
    }

    #[test]
    fn test_folder_rank_order() {
        let strategy = DefaultFolderStrategy::default();
        let drafts = folder(2, "Drafts");
        let regular = folder(3, "Projects");
        let trash = folder(4, "Trash");

        assert_eq!(strategy.sort(&regular, &drafts), Decision::Higher);
        assert_eq!(strategy.sort(&trash, &regular), Decision::Higher);
        assert_eq!(strategy.sort(&regular, &trash), Decision::Lower);
        assert_eq!(
            strategy.sort(&regular, &folder(5, "Receipts")),
            Decision::Same
        );
        assert_eq!(strategy.sort(&trash, &folder(6, "Trash")), Decision::Same);
        assert_eq!(
            strategy.sort(&folder(1, "INBOX"), &folder(7, "INBOX")),
            Decision::Same
        );
    }

    #[test]
    fn test_inbox_that_is_also_sent_counts_as_inbox() {
        let strategy = DefaultFolderStrategy::default();
        let inbox_sent = folder(1, "INBOX")
            .with_flags(FolderFlags::INBOX | FolderFlags::SENT | FolderFlags::OFFLINE);
        let drafts = folder(2, "Drafts");

        assert_eq!(strategy.sort(&drafts, &inbox_sent), Decision::Higher);
    }

    #[test]
    fn test_open_folder_outranks_inbox() {
        let open = Arc::new(OpenFolders::new());
        let strategy = DefaultFolderStrategy::new(open.clone());
        let inbox = folder(1, "INBOX");
        let trash = folder(4, "Trash");

        open.open(trash.id);
        assert_eq!(strategy.sort(&inbox, &trash), Decision::Higher);

        open.close(trash.id);
        assert_eq!(strategy.sort(&inbox, &trash), Decision::Lower);
    }

    #[test]
    fn test_excludes_virtual_and_orphans() {
        let strategy = DefaultFolderStrategy::default();
        let saved_search = folder(7, "Unread").with_flags(FolderFlags::VIRTUAL);
        let orphan = folder(8, "Lost").with_parent(None);

        assert!(strategy.is_excluded(&saved_search));
        assert!(strategy.is_excluded(&orphan));
        assert!(!strategy.is_excluded(&folder(1, "INBOX")));
    }

    #[test]
    fn test_small_messages_before_large() {
        let strategy = DefaultMsgStrategy;
        let f = folder(1, "INBOX");
        let small = msg(1, 10 * 1024, 1);
        let large = msg(2, 80 * 1024, 5);

        assert_eq!(strategy.sort(&f, &large, &small), Decision::Higher);
        assert_eq!(strategy.sort(&f, &small, &large), Decision::Lower);
    }

    #[test]
    fn test_smallest_large_message_first() {
        let strategy = DefaultMsgStrategy;
        let f = folder(1, "INBOX");
        let big = msg(1, 200 * 1024, 1);
        let bigger = msg(2, 500 * 1024, 1);

        assert_eq!(strategy.sort(&f, &big, &bigger), Decision::Lower);
        assert_eq!(strategy.sort(&f, &bigger, &big), Decision::Higher);
    }

    #[test]
    fn test_recent_then_smaller_among_small() {
        let strategy = DefaultMsgStrategy;
        let f = folder(1, "INBOX");
        let old = msg(1, 1024, 1);
        let recent = msg(2, 4096, 9);
        let recent_smaller = msg(3, 2048, 9);

        assert_eq!(strategy.sort(&f, &old, &recent), Decision::Higher);
        assert_eq!(strategy.sort(&f, &recent, &recent_smaller), Decision::Higher);
        assert_eq!(strategy.sort(&f, &recent, &recent), Decision::Same);
    }

    #[test]
    fn test_sorting_with_decision_ordering() {
        let strategy = DefaultMsgStrategy;
        let f = folder(1, "INBOX");
        let mut queue = vec![
            msg(1, 300 * 1024, 9),
            msg(2, 1024, 1),
            msg(3, 90 * 1024, 9),
            msg(4, 2048, 9),
        ];
        queue.sort_by(|a, b| strategy.sort(&f, a, b).ordering());

        let keys: Vec<u32> = queue.iter().map(|m| m.key).collect();
        assert_eq!(keys, vec![4, 2, 3, 1]);
    }

    #[test]
    fn test_max_age_exclusion() {
        let strategy = DefaultMsgStrategy;
        let limited = folder(1, "INBOX").with_max_age_days(30);
        let unlimited = folder(2, "Projects");
        let ancient = msg(1, 1024, 1);
        let fresh = MessageHeader::new(2, 1024, Utc::now());

        assert!(strategy.is_excluded(&limited, &ancient));
        assert!(!strategy.is_excluded(&limited, &fresh));
        assert!(!strategy.is_excluded(&unlimited, &ancient));
    }
}
