//! Unified error type for renditiond.
//!
//! All crates funnel their failures into [`Error`]. Call-level errors
//! (bad input, authorization, store unavailability) propagate to callers;
//! task-level errors are absorbed into task state via [`Error::failure_kind`].

use std::fmt;
use std::time::Duration;

use crate::model::FailureKind;

/// Unified error type covering all failure modes in renditiond.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request was malformed; no state was created.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job", "asset").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The requester lacks rights to the resource.
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// The source media could not be read.
    #[error("Source unreadable: {0}")]
    Source(String),

    /// An external tool (ffmpeg, ffprobe) failed.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// The work was cancelled before it completed.
    #[error("Cancelled")]
    Cancelled,

    /// The work exceeded its deadline.
    #[error("Timed out after {0:?}")]
    TimedOut(Duration),

    /// The job store or its persistence backend failed.
    #[error("Store error: {source}")]
    Store {
        /// The underlying storage error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Configuration is invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for [`Error::InvalidInput`].
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::NotAuthorized`].
    pub fn not_authorized(msg: impl Into<String>) -> Self {
        Error::NotAuthorized(msg.into())
    }

    /// Convenience constructor for [`Error::Store`].
    pub fn store(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Store {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Classify this error as a task failure.
    ///
    /// Cancellation and timeouts are distinguished so callers can tell a
    /// user-initiated stop from a genuine encode failure.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Error::Cancelled => FailureKind::Cancelled,
            Error::TimedOut(_) => FailureKind::TimedOut,
            _ => FailureKind::Error,
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = Error::not_found("job", "abc-123");
        assert_eq!(err.to_string(), "job not found: abc-123");
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("ffmpeg", "exit code 1");
        assert_eq!(err.to_string(), "Tool error [ffmpeg]: exit code 1");
    }

    #[test]
    fn timed_out_display() {
        let err = Error::TimedOut(Duration::from_secs(5));
        assert_eq!(err.to_string(), "Timed out after 5s");
    }

    #[test]
    fn store_wraps_source() {
        let err = Error::store("disk full");
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        assert!(matches!(Error::from(io_err), Error::Io { .. }));
    }

    #[test]
    fn failure_kinds() {
        assert_eq!(Error::Cancelled.failure_kind(), FailureKind::Cancelled);
        assert_eq!(
            Error::TimedOut(Duration::from_secs(1)).failure_kind(),
            FailureKind::TimedOut
        );
        assert_eq!(Error::tool("ffmpeg", "boom").failure_kind(), FailureKind::Error);
        assert_eq!(Error::Source("gone".into()).failure_kind(), FailureKind::Error);
    }
}
