//! Error taxonomy shared by the repository, the asset resolver and the migration tool.
//!
//! Local failures (`Io`, `Corrupt`) are always surfaced to the caller. Remote failures are
//! carried as `Remote` so callers can degrade to local-only behavior.

use std::path::PathBuf;

use crate::remote::RemoteError;

#[derive(Debug, thiserror::Error)]
pub enum StoryError {
    /// Repository or remote backend not initialised; retry later.
    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Ownership mismatch on a remote mutation. Nothing was changed.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Slot {index} is out of range (slot count {count})")]
    InvalidSlot { index: usize, count: usize },

    #[error("Slot {0} already holds a saved story")]
    SlotOccupied(usize),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Local storage failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt local data at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Remote failure: {0}")]
    Remote(#[from] RemoteError),
}

pub type StoryResult<T> = Result<T, StoryError>;

impl StoryError {
    /// Attach a path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// True for failures of the local durable store.
    pub fn is_local_failure(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Corrupt { .. })
    }
}
