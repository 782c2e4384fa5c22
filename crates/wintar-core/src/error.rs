//! Error types for wintar core operations.
//!
//! Every component reports a typed `WintarError` up to the orchestrator,
//! which performs no local recovery: any error aborts the archive run.
//! Higher-level code (the CLI) wraps these with `anyhow` context.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias using WintarError
pub type Result<T> = std::result::Result<T, WintarError>;

/// Core error types for wintar operations.
#[derive(Error, Debug)]
pub enum WintarError {
    // === Access Errors ===
    /// Opening or querying a file failed (permissions, sharing, etc.)
    #[error("access error: {operation} on {} failed: {reason}", .path.display())]
    Access {
        path: PathBuf,
        operation: String,
        reason: String,
    },

    /// The entry vanished between discovery and open
    #[error("missing: {} disappeared during the walk", .path.display())]
    Missing { path: PathBuf },

    /// The directory walk itself failed
    #[error("walk error at {}: {reason}", .path.display())]
    Walk { path: PathBuf, reason: String },

    // === Backup Stream Errors ===
    /// The backup stream ended in the middle of a record
    #[error(
        "truncated backup stream for {}: {section} ended after {read} of {expected} bytes",
        .path.display()
    )]
    TruncatedStream {
        path: PathBuf,
        section: &'static str,
        expected: u64,
        read: u64,
    },

    /// A record is structurally invalid
    #[error("malformed backup stream for {}: {reason}", .path.display())]
    MalformedStream { path: PathBuf, reason: String },

    // === Privilege Errors ===
    /// A privilege could not be enabled for the calling thread
    #[error("cannot enable privilege {name}: {reason}")]
    Privilege { name: String, reason: String },

    // === Configuration Errors ===
    /// Configuration file parsing failed
    #[error("configuration error: {reason}")]
    Config { reason: String },

    // === I/O Errors ===
    /// Sink write failure or other I/O error
    #[error("I/O error: {0}")]
    Io(io::Error),

    // === Internal Errors ===
    /// Internal error that should not happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl WintarError {
    /// Create an access error
    pub fn access(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        WintarError::Access {
            path: path.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a truncation error; the path is attached later with `in_file`
    pub fn truncated(section: &'static str, expected: u64, read: u64) -> Self {
        WintarError::TruncatedStream {
            path: PathBuf::new(),
            section,
            expected,
            read,
        }
    }

    /// Create a malformed-stream error; the path is attached later with `in_file`
    pub fn malformed(reason: impl Into<String>) -> Self {
        WintarError::MalformedStream {
            path: PathBuf::new(),
            reason: reason.into(),
        }
    }

    /// Attach the file path to stream errors raised without one.
    pub fn in_file(mut self, file: &Path) -> Self {
        match &mut self {
            WintarError::TruncatedStream { path, .. } | WintarError::MalformedStream { path, .. }
                if path.as_os_str().is_empty() =>
            {
                *path = file.to_path_buf();
            }
            _ => {}
        }
        self
    }

    /// Returns true if this error means the captured data cannot be trusted
    pub fn is_corrupt_capture(&self) -> bool {
        matches!(
            self,
            WintarError::TruncatedStream { .. } | WintarError::MalformedStream { .. }
        )
    }

    /// Wrap this error so it can travel through `io::Read`/`io::Write`.
    pub fn into_io(self) -> io::Error {
        match self {
            WintarError::Io(err) => err,
            other => {
                let kind = match other {
                    WintarError::TruncatedStream { .. } => io::ErrorKind::UnexpectedEof,
                    _ => io::ErrorKind::InvalidData,
                };
                io::Error::new(kind, other)
            }
        }
    }
}

impl From<io::Error> for WintarError {
    /// Unwraps errors previously wrapped by `into_io`, keeping their type.
    fn from(err: io::Error) -> Self {
        let wrapped = err
            .get_ref()
            .map_or(false, |inner| inner.is::<WintarError>());
        if !wrapped {
            return WintarError::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<WintarError>()) {
            Some(Ok(inner)) => *inner,
            _ => WintarError::Internal("wrapped error lost its payload".to_string()),
        }
    }
}

impl From<toml::de::Error> for WintarError {
    fn from(err: toml::de::Error) -> Self {
        WintarError::Config {
            reason: format!("Failed to parse config: {}", err),
        }
    }
}
