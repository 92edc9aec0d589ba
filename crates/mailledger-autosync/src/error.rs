//! Error types for the auto-sync scheduler.

use thiserror::Error;

use crate::model::FolderId;

/// Why a download batch could not be started.
///
/// Every variant is scoped to a single folder. None of them stops the
/// scheduler from serving other folders or accounts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    /// The folder has no eligible messages left. Benign: the folder is
    /// dropped from the download queue without retry accounting.
    #[error("no messages available for download")]
    NoMessagesAvailable,

    /// The next group is larger than the cap applied outside idle time.
    /// The group is postponed until the next idle period.
    #[error("group of {total} bytes exceeds the {limit} byte limit")]
    SizeLimitExceeded {
        /// Byte cap that was in force.
        limit: u64,
        /// Size of the group that was rejected.
        total: u64,
    },

    /// The transfer could not be started or failed mid-way.
    #[error("transfer failed: {0}")]
    Transfer(String),
}

impl DownloadError {
    /// Whether this error counts against the folder's retry budget.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transfer(_))
    }
}

/// Errors that can occur in auto-sync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Download scheduling failed for a folder.
    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    /// The mail fetcher refused a request.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// An event referenced a folder the directory does not know.
    #[error("Unknown folder: {0}")]
    UnknownFolder(FolderId),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The service loop is no longer receiving events.
    #[error("Auto-sync service stopped")]
    ServiceStopped,
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transfer_errors_are_transient() {
        assert!(DownloadError::Transfer("reset".into()).is_transient());
        assert!(!DownloadError::NoMessagesAvailable.is_transient());
        assert!(
            !DownloadError::SizeLimitExceeded {
                limit: 10,
                total: 20
            }
            .is_transient()
        );
    }

    #[test]
    fn test_download_error_converts() {
        let err: Error = DownloadError::NoMessagesAvailable.into();
        assert!(matches!(
            err,
            Error::Download(DownloadError::NoMessagesAvailable)
        ));
        assert_eq!(
            err.to_string(),
            "Download error: no messages available for download"
        );
    }
}
