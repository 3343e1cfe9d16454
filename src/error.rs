use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Fatal rewriter errors. A file that produces one is left untouched.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("{}:+{offset}: {reason}", .file.display())]
    Parse {
        file: PathBuf,
        /// Byte offset into the source file.
        offset: usize,
        reason: String,
    },

    #[error(
        "{}:+{offset}: conflicting mappings for `{symbol}`: `{first}` vs `{second}`",
        .file.display()
    )]
    AmbiguousMapping {
        file: PathBuf,
        offset: usize,
        symbol: String,
        first: String,
        second: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RewriteError {
    pub fn parse(file: &std::path::Path, offset: usize, reason: impl Into<String>) -> Self {
        RewriteError::Parse {
            file: file.to_path_buf(),
            offset,
            reason: reason.into(),
        }
    }
}

/// Failure reported by the underlying transport engine, propagated unchanged.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Runtime coupling errors.
#[derive(Debug, Error)]
pub enum CoupleError {
    /// Lock acquisition or step wait exceeded the caller timeout.
    /// Recoverable: retrying the same call is always safe.
    #[error("synchronization timed out after {waited:?} for group `{group}`")]
    SyncTimeout { group: String, waited: Duration },

    #[error("unknown group `{0}`")]
    UnknownGroup(String),

    #[error("group `{0}` has no open engine")]
    NotOpen(String),

    #[error("group `{0}` is already closed")]
    Closed(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
