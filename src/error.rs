//! Error types shared by the game engine and its storage.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::session::SessionId;

/// Errors surfaced to callers of the controller and tracker.
#[derive(Error, Debug)]
pub enum GameError {
    /// The id is not the active session, or that session is already finalized.
    #[error("session {0} is not the active session")]
    InvalidSession(SessionId),

    /// Goal and grace must both be strictly positive.
    #[error("invalid configuration: goal {goal:?}, grace {grace:?} (both must be > 0)")]
    InvalidConfiguration { goal: Duration, grace: Duration },

    /// Storage could not serve a read the operation depends on.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),
}

/// Errors raised by an [`EventLog`](crate::event_log::EventLog).
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to open event log at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    /// The backing store refused the write (e.g. disk full, locked, offline).
    #[error("event log offline")]
    Offline,
}

/// Raised by an [`AlarmScheduler`](crate::alarm::AlarmScheduler). Callers log
/// these and carry on.
#[derive(Error, Debug)]
pub enum AlarmError {
    #[error("alarm service rejected {id}: {message}")]
    Rejected { id: &'static str, message: String },
}
