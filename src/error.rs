//! Error types shared by the mapping registry, the applier and reconciliation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// An event or query referenced a table with no registered mapping.
    #[error("no mapping registered for table {0}")]
    UnknownTable(String),

    /// A required (non-ignored) source column was absent from a row image.
    #[error("row image for {table} is missing mapped column {column}")]
    MissingColumn { table: String, column: String },

    #[error("malformed change event: {0}")]
    MalformedEvent(String),

    /// Connection loss, pool exhaustion and other failures worth retrying.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store rejected the operation (constraint violation, bad cast, ...).
    #[error("store error: {0}")]
    Store(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }

    /// Errors that poison a single event but must not stop the stream.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Error::MalformedEvent(_) | Error::MissingColumn { .. })
    }
}

impl From<postgres::Error> for Error {
    /// Lost connections, socket errors, connection-class SQLSTATEs and
    /// serialization or deadlock aborts are retryable; the rest are not.
    fn from(err: postgres::Error) -> Self {
        use postgres::error::SqlState;
        use std::error::Error as _;
        let io = err.source().is_some_and(|s| s.is::<std::io::Error>());
        let retryable_state = err.code().is_some_and(|code| {
            code.code().starts_with("08")
                || *code == SqlState::T_R_SERIALIZATION_FAILURE
                || *code == SqlState::T_R_DEADLOCK_DETECTED
        });
        if err.is_closed() || io || retryable_state {
            Error::StoreUnavailable(err.to_string())
        } else {
            Error::Store(err.to_string())
        }
    }
}

impl From<r2d2::Error> for Error {
    fn from(err: r2d2::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}
