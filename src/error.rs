//! Error types for transports and the roll writer.
//!
//! Transport backends report [`TransportError`], categorized by [`ErrorKind`] so
//! callers can tell a bad password from a dropped connection. Everything the
//! writer, configuration, and job layers surface is a [`RollError`].

use std::fmt;
use thiserror::Error;

// ============================================================================
// Transport errors
// ============================================================================

/// Category of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Host name could not be resolved or the host did not answer.
    Unreachable,
    /// Nothing accepts connections on the configured port.
    InvalidPort,
    /// Login rejected.
    Authentication,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    /// The server answered with an unexpected reply code.
    Protocol,
    Io,
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unreachable => "unreachable",
            Self::InvalidPort => "invalid port",
            Self::Authentication => "authentication",
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::PermissionDenied => "permission denied",
            Self::Protocol => "protocol",
            Self::Io => "io",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Error raised by a [`Transport`](crate::transport::Transport) or a
/// [`RemoteSession`](crate::transport::RemoteSession).
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: ErrorKind,
    pub message: String,
    /// Path the operation was acting on, when there is one.
    pub path: Option<String>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl TransportError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: None,
            source: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Wrap an [`std::io::Error`], mapping its kind onto [`ErrorKind`].
    pub fn io(err: std::io::Error, message: impl Into<String>) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => ErrorKind::Timeout,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected => ErrorKind::Unreachable,
            _ => ErrorKind::Io,
        };
        Self::new(kind, message).with_source(err)
    }

    /// Whether retrying the same call might succeed.
    ///
    /// Only session establishment is ever retried; see [`crate::retry`].
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Unreachable | ErrorKind::Timeout | ErrorKind::Io
        )
    }
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

// ============================================================================
// Writer / job errors
// ============================================================================

/// Errors surfaced by configuration, setup, and the roll writer.
#[derive(Debug, Error)]
pub enum RollError {
    /// Invalid or missing settings. Never retryable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Could not establish or use the transport session.
    #[error("session error: {0}")]
    Session(#[source] TransportError),

    #[error("failed to open '{path}' for writing")]
    Open {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to write to '{path}'")]
    Write {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to close '{path}'")]
    Close {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to publish '{from}' as '{to}'")]
    Publish {
        from: String,
        to: String,
        #[source]
        source: TransportError,
    },

    /// A record could not be encoded with the configured charset or format.
    #[error("failed to encode record for '{path}': {message}")]
    Encode { path: String, message: String },

    /// An earlier write failed; the writer accepts no more data.
    #[error("writer aborted after an earlier failure")]
    Poisoned,

    /// `write_record` called after `close`.
    #[error("writer is closed")]
    Closed,

    /// `nonConflict` write mode found existing files with the prefix.
    #[error("directory '{dir}' already holds {count} entries with prefix '{prefix}', e.g. '{sample}'")]
    Conflict {
        dir: String,
        prefix: String,
        sample: String,
        count: usize,
    },

    /// Directory setup (mkdir, listing, truncation) failed before writing started.
    #[error("failed to prepare '{dir}'")]
    Prepare {
        dir: String,
        #[source]
        source: TransportError,
    },

    /// The upstream record source failed.
    #[error("record source failed: {0}")]
    Source(String),
}

impl RollError {
    /// Path of the output file the error relates to, if any.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Open { path, .. }
            | Self::Write { path, .. }
            | Self::Close { path, .. }
            | Self::Encode { path, .. } => Some(path),
            Self::Publish { from, .. } => Some(from),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RollError>;
