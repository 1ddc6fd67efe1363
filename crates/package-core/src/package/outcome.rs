//! Open/save results and the I/O error taxonomy.

use crate::archive::ArchiveError;
use crate::lock::{LockDescriptor, LockError};
use crate::upgrade::UpgradeError;
use crate::version::Version;
use serde::Serialize;
use std::io;
use thiserror::Error;

/// Closed set of open results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OpenOutcome {
    Success,
    FileNotFound,
    PermissionFailure,
    Locked,
    Corrupted,
    IncompatiblePackageVersion,
    IncompatibleApplication,
    IncompatibleVersion,
    UpgradeFailure,
    ReadingFailure,
    Cancelled,
    UnknownFailure,
}

impl OpenOutcome {
    pub fn of(result: &Result<(), OpenError>) -> Self {
        match result {
            Ok(()) => OpenOutcome::Success,
            Err(e) => e.outcome(),
        }
    }
}

/// Closed set of save results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SaveOutcome {
    Success,
    Locked,
    Failure,
}

impl SaveOutcome {
    pub fn of(result: &Result<(), SaveError>) -> Self {
        match result {
            Ok(()) => SaveOutcome::Success,
            Err(e) => e.outcome(),
        }
    }
}

fn holder(descriptor: &Option<LockDescriptor>) -> String {
    descriptor
        .as_ref()
        .map(|d| format!(" by {}", d))
        .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("Package file not found: {0}")]
    FileNotFound(#[source] io::Error),

    #[error("Permission denied opening package: {0}")]
    PermissionFailure(#[source] io::Error),

    #[error("Package is locked{}", holder(.descriptor))]
    Locked {
        descriptor: Option<LockDescriptor>,
        #[source]
        source: Option<io::Error>,
    },

    #[error("Package is corrupted: {reason}")]
    Corrupted {
        reason: String,
        #[source]
        source: Option<ArchiveError>,
    },

    #[error("Package format {found} is newer than the supported {supported}")]
    IncompatiblePackageVersion { found: Version, supported: Version },

    #[error("Package belongs to another application ({})", .found.join(", "))]
    IncompatibleApplication { found: Vec<String> },

    #[error("Package was written by application version {found}, newer than {supported}")]
    IncompatibleVersion { found: Version, supported: Version },

    #[error("Upgrade failed: {0}")]
    UpgradeFailure(#[from] UpgradeError),

    #[error("Content reader failed: {0}")]
    ReadingFailure(#[source] anyhow::Error),

    #[error("Open was cancelled")]
    Cancelled,

    #[error("Unexpected error opening package: {0}")]
    Unknown(#[source] io::Error),
}

impl OpenError {
    pub fn outcome(&self) -> OpenOutcome {
        match self {
            OpenError::FileNotFound(_) => OpenOutcome::FileNotFound,
            OpenError::PermissionFailure(_) => OpenOutcome::PermissionFailure,
            OpenError::Locked { .. } => OpenOutcome::Locked,
            OpenError::Corrupted { .. } => OpenOutcome::Corrupted,
            OpenError::IncompatiblePackageVersion { .. } => OpenOutcome::IncompatiblePackageVersion,
            OpenError::IncompatibleApplication { .. } => OpenOutcome::IncompatibleApplication,
            OpenError::IncompatibleVersion { .. } => OpenOutcome::IncompatibleVersion,
            OpenError::UpgradeFailure(_) => OpenOutcome::UpgradeFailure,
            OpenError::ReadingFailure(_) => OpenOutcome::ReadingFailure,
            OpenError::Cancelled => OpenOutcome::Cancelled,
            OpenError::Unknown(_) => OpenOutcome::UnknownFailure,
        }
    }

    /// Holder of the lock that blocked the open, when it could be read.
    pub fn lock_descriptor(&self) -> Option<&LockDescriptor> {
        match self {
            OpenError::Locked { descriptor, .. } => descriptor.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn corrupted(reason: impl Into<String>) -> Self {
        OpenError::Corrupted {
            reason: reason.into(),
            source: None,
        }
    }

    /// Sort a platform error into the open taxonomy.
    pub(crate) fn from_io(error: io::Error) -> Self {
        match classify_open_error(&error) {
            OpenOutcome::FileNotFound => OpenError::FileNotFound(error),
            OpenOutcome::PermissionFailure => OpenError::PermissionFailure(error),
            OpenOutcome::Locked => OpenError::Locked {
                descriptor: None,
                source: Some(error),
            },
            _ => {
                tracing::warn!(error = %error, kind = ?error.kind(), "Unclassified I/O error while opening package");
                OpenError::Unknown(error)
            }
        }
    }
}

impl From<LockError> for OpenError {
    fn from(error: LockError) -> Self {
        match error {
            LockError::AlreadyLocked(descriptor) => OpenError::Locked {
                descriptor,
                source: None,
            },
            LockError::Io(e) => OpenError::from_io(e),
        }
    }
}

impl From<ArchiveError> for OpenError {
    fn from(error: ArchiveError) -> Self {
        OpenError::Corrupted {
            reason: error.to_string(),
            source: Some(error),
        }
    }
}

/// Windows `ERROR_SHARING_VIOLATION` and `ERROR_LOCK_VIOLATION`.
const SHARING_VIOLATION: i32 = 32;
const LOCK_VIOLATION: i32 = 33;

/// Map a platform I/O error onto the open outcome it represents.
pub fn classify_open_error(error: &io::Error) -> OpenOutcome {
    match error.kind() {
        io::ErrorKind::NotFound => OpenOutcome::FileNotFound,
        io::ErrorKind::PermissionDenied => OpenOutcome::PermissionFailure,
        _ if cfg!(windows)
            && matches!(error.raw_os_error(), Some(SHARING_VIOLATION | LOCK_VIOLATION)) =>
        {
            OpenOutcome::Locked
        }
        _ => OpenOutcome::UnknownFailure,
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("Package is locked{}", holder(.0))]
    Locked(Option<LockDescriptor>),

    #[error("Content writer failed: {0}")]
    Writing(#[source] anyhow::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Changelog serialization failed: {0}")]
    Changelog(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl SaveError {
    pub fn outcome(&self) -> SaveOutcome {
        match self {
            SaveError::Locked(_) => SaveOutcome::Locked,
            _ => SaveOutcome::Failure,
        }
    }
}

impl From<LockError> for SaveError {
    fn from(error: LockError) -> Self {
        match error {
            LockError::AlreadyLocked(descriptor) => SaveError::Locked(descriptor),
            LockError::Io(e) => SaveError::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_common_kinds() {
        let missing = io::Error::new(io::ErrorKind::NotFound, "gone");
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "no");
        let other = io::Error::other("weird");

        assert_eq!(classify_open_error(&missing), OpenOutcome::FileNotFound);
        assert_eq!(classify_open_error(&denied), OpenOutcome::PermissionFailure);
        assert_eq!(classify_open_error(&other), OpenOutcome::UnknownFailure);
    }

    #[test]
    fn test_lock_error_conversion_keeps_descriptor() {
        let descriptor = LockDescriptor {
            username: "ada".into(),
            date_opened: chrono::Utc::now(),
        };
        let open: OpenError = LockError::AlreadyLocked(Some(descriptor.clone())).into();
        assert_eq!(open.outcome(), OpenOutcome::Locked);
        assert_eq!(open.lock_descriptor(), Some(&descriptor));
        assert!(open.to_string().contains("by ada"));

        let save: SaveError = LockError::AlreadyLocked(None).into();
        assert_eq!(save.outcome(), SaveOutcome::Locked);
    }

    #[test]
    fn test_outcome_of_result() {
        assert_eq!(OpenOutcome::of(&Ok(())), OpenOutcome::Success);
        assert_eq!(
            OpenOutcome::of(&Err(OpenError::corrupted("empty"))),
            OpenOutcome::Corrupted
        );
        assert_eq!(
            SaveOutcome::of(&Err(SaveError::Io(io::Error::other("disk")))),
            SaveOutcome::Failure
        );
    }
}
