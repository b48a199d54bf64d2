//! Outbox SQLite error

use std::fmt;

use tokio::task::JoinError;

/// Migration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationError {
    /// Database version is newer than supported one
    NewerVersion {
        /// Current database version
        current: i64,
        /// Supported database version
        supported: i64,
    },
}

impl std::error::Error for MigrationError {}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewerVersion { current, supported } => write!(
                f,
                "database version {current} is newer than supported version {supported}"
            ),
        }
    }
}

/// Outbox SQLite error
#[derive(Debug)]
pub enum Error {
    /// Rusqlite error
    Rusqlite(rusqlite::Error),
    /// Migration error
    Migration(MigrationError),
    /// JSON (de)serialization error
    Json(serde_json::Error),
    /// Thread error
    Thread(JoinError),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rusqlite(e) => e.fmt(f),
            Self::Migration(e) => e.fmt(f),
            Self::Json(e) => e.fmt(f),
            Self::Thread(e) => e.fmt(f),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Rusqlite(e)
    }
}

impl From<MigrationError> for Error {
    fn from(e: MigrationError) -> Self {
        Self::Migration(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<JoinError> for Error {
    fn from(e: JoinError) -> Self {
        Self::Thread(e)
    }
}
