// src/error.rs
// Crate-wide error type and the taxonomy of kinds callers branch on.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HiveError>;

/// Storage/graph/transport error kinds, mirrored 1:1 onto HTTP status and
/// onto the `{code, kind, message, retryable}` body shape at the HTTP edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Busy,
    Locked,
    Constraint,
    Mismatch,
    Schema,
    Io,
    NotFound,
    Cycle,
    GraphTooDeep,
    Parse,
    Embedder,
    WalBloat,
    Conflict,
    ClientGone,
    Other,
}

impl ErrorKind {
    /// Whether the caller should retry the operation unchanged.
    pub fn retryable(self) -> bool {
        matches!(self, ErrorKind::Busy | ErrorKind::Locked)
    }
}

#[derive(Debug, Error)]
pub enum HiveError {
    #[error("database error ({kind}): {message}")]
    Db { kind: ErrorKind, message: String },

    #[error("dependency cycle detected: {0:?}")]
    Cycle(Vec<String>),

    #[error("dependency graph exceeded max depth")]
    GraphTooDeep,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("out of range: line must be within 1..={0}")]
    OutOfRange(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("embedding error: {0}")]
    Embedder(String),

    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("{0}")]
    Other(String),
}

impl From<rusqlite::Error> for HiveError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi;
        let kind = match &err {
            rusqlite::Error::SqliteFailure(
                ffi::Error {
                    code: ffi::ErrorCode::DatabaseBusy,
                    ..
                },
                _,
            ) => ErrorKind::Busy,
            rusqlite::Error::SqliteFailure(
                ffi::Error {
                    code: ffi::ErrorCode::DatabaseLocked,
                    ..
                },
                _,
            ) => ErrorKind::Locked,
            rusqlite::Error::SqliteFailure(
                ffi::Error {
                    code: ffi::ErrorCode::ConstraintViolation,
                    ..
                },
                _,
            ) => ErrorKind::Constraint,
            rusqlite::Error::QueryReturnedNoRows => ErrorKind::NotFound,
            _ => ErrorKind::Other,
        };
        HiveError::Db {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for HiveError {
    fn from(err: tokio::task::JoinError) -> Self {
        HiveError::Other(format!("task join error: {err}"))
    }
}

impl From<String> for HiveError {
    fn from(s: String) -> Self {
        HiveError::Other(s)
    }
}

impl HiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HiveError::Db { kind, .. } => *kind,
            HiveError::Cycle(_) => ErrorKind::Cycle,
            HiveError::GraphTooDeep => ErrorKind::GraphTooDeep,
            HiveError::NotFound(_) => ErrorKind::NotFound,
            HiveError::InvalidInput(_) => ErrorKind::Parse,
            HiveError::OutOfRange(_) => ErrorKind::Parse,
            HiveError::Io(_) => ErrorKind::Io,
            HiveError::Json(_) => ErrorKind::Parse,
            HiveError::Http(_) => ErrorKind::Embedder,
            HiveError::Embedder(_) => ErrorKind::Embedder,
            HiveError::Config(_) => ErrorKind::Other,
            HiveError::Anyhow(_) => ErrorKind::Other,
            HiveError::Other(_) => ErrorKind::Other,
        }
    }

    /// User-facing message with internal detail stripped where not useful.
    pub fn to_user_string(&self) -> String {
        self.to_string()
    }
}
