//! Crate-wide error taxonomy.
//!
//! Mirrors the error kinds described for the control and data plane: protocol
//! framing failures, access-control denials, not-found lookups, conflicts,
//! edit-bounds violations, storage I/O failures, replication failures (never
//! surfaced directly to a client), peer-unavailable conditions, and fatal
//! startup failures. Plain enum, no derive macro, matching the teacher's
//! `vfs::Error`/`mount::Error` style of hand-written error types.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Short read, unexpected message type, oversize payload.
    Protocol(String),
    /// Caller lacks the permission required for the operation.
    Access,
    /// File or session or SN not found.
    NotFound,
    /// Create-collision, checkpoint-tag-exists, sentence locked, write in progress.
    Conflict(String),
    /// Sentence or word index out of range.
    EditBounds(String),
    /// I/O error while touching on-disk state.
    Storage(std::io::Error),
    /// Replication I/O failed; never surfaced to a client, logged by the caller.
    Replication(std::io::Error),
    /// The responsible SN (primary, and backup where relevant) is offline.
    PeerUnavailable,
    /// Unrecoverable startup condition; the process should exit non-zero.
    Fatal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::Access => write!(f, "access denied"),
            Error::NotFound => write!(f, "not found"),
            Error::Conflict(msg) => write!(f, "conflict: {msg}"),
            Error::EditBounds(msg) => write!(f, "edit out of bounds: {msg}"),
            Error::Storage(err) => write!(f, "storage failure: {err}"),
            Error::Replication(err) => write!(f, "replication failure: {err}"),
            Error::PeerUnavailable => write!(f, "peer storage node unavailable, retry later"),
            Error::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Storage(err) | Error::Replication(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err)
    }
}

/// Maps a protocol-layer status back onto a wire error code (`proto::StatusCode`).
/// Kept separate from the `Display` impl above since the wire representation
/// is a closed, versioned set while the `Display` text is free-form and may
/// change without breaking compatibility.
impl Error {
    pub fn status_code(&self) -> crate::proto::StatusCode {
        use crate::proto::StatusCode;
        match self {
            Error::Protocol(_) => StatusCode::Protocol,
            Error::Access => StatusCode::Access,
            Error::NotFound => StatusCode::NotFound,
            Error::Conflict(_) => StatusCode::Conflict,
            Error::EditBounds(_) => StatusCode::EditBounds,
            Error::Storage(_) => StatusCode::Storage,
            Error::Replication(_) => StatusCode::Storage,
            Error::PeerUnavailable => StatusCode::PeerUnavailable,
            Error::Fatal(_) => StatusCode::Storage,
        }
    }
}
