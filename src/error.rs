//! Error types for drive-share
//!
//! This module defines the error hierarchy that covers:
//! - Remote API errors from the folder store (with rate-limit classification)
//! - Tabular store errors (reads, header detection, cell writes)
//! - Configuration and CLI errors
//! - Monitor errors (lock file, log directory)
//!
//! Per-record failures are not errors at this level: they are outcomes
//! recorded by the batch processor. Only setup failures abort a run.

use std::path::PathBuf;
use thiserror::Error;

/// Reason codes that mark an HTTP 403 as a rate-limit response
const RATE_LIMIT_REASONS: &[&str] = &["rateLimitExceeded", "userRateLimitExceeded"];

/// Top-level error type for the drive-share application
#[derive(Error, Debug)]
pub enum ShareError {
    /// Remote folder store errors
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Tabular store errors
    #[error("Sheet error: {0}")]
    Sheet(#[from] SheetError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Monitor errors
    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    /// I/O errors (log files, cache file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShareError {
    /// Whether this error must abort the whole run with exit code 1
    pub fn is_fatal_setup(&self) -> bool {
        matches!(
            self,
            ShareError::Config(_)
                | ShareError::Sheet(SheetError::MissingColumn { .. })
                | ShareError::Monitor(MonitorError::AlreadyRunning { .. })
        )
    }
}

/// Errors returned by the remote folder/permission API
#[derive(Error, Debug, Clone)]
pub enum RemoteError {
    /// Non-success HTTP response
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        reason: Option<String>,
        message: String,
    },

    /// Connection, TLS or timeout failure before a response arrived
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Shutdown was requested before or while waiting to retry
    #[error("Cancelled by shutdown")]
    Cancelled,

    /// Retry ceiling reached; wraps the last error unchanged
    #[error("{operation} failed after {attempts} attempts [{context}]: {source}")]
    Exhausted {
        operation: String,
        context: String,
        attempts: u32,
        #[source]
        source: Box<RemoteError>,
    },
}

impl RemoteError {
    /// Build an HTTP error
    pub fn http(status: u16, reason: Option<&str>, message: impl Into<String>) -> Self {
        RemoteError::Http {
            status,
            reason: reason.map(str::to_string),
            message: message.into(),
        }
    }

    /// Check if this error should be retried with backoff
    ///
    /// Retryable: HTTP 429, HTTP 403 carrying a rate-limit reason code,
    /// and transport failures (under a lower attempt ceiling, see
    /// [`crate::retry::TRANSPORT_MAX_ATTEMPTS`]).
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Http { status: 429, .. } => true,
            RemoteError::Http {
                status: 403,
                reason: Some(reason),
                ..
            } => RATE_LIMIT_REASONS.contains(&reason.as_str()),
            RemoteError::Transport(_) => true,
            _ => false,
        }
    }

    /// Whether the call was abandoned because of shutdown
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), RemoteError::Cancelled)
    }

    /// The innermost error, looking through `Exhausted`
    pub fn root(&self) -> &RemoteError {
        match self {
            RemoteError::Exhausted { source, .. } => source.root(),
            other => other,
        }
    }

    /// Translate into a short reason suitable for the sheet and console
    pub fn human_reason(&self) -> String {
        match self.root() {
            RemoteError::Http { status: 400, reason, message } => match reason.as_deref() {
                Some("invalidSharingRequest") => "recipient not eligible for sharing".to_string(),
                Some("badRequest") | None => format!("bad request: {}", message),
                Some(other) => format!("bad request ({}): {}", other, message),
            },
            RemoteError::Http { status: 401, .. } => "credentials rejected".to_string(),
            RemoteError::Http {
                status: 403,
                reason: Some(reason),
                ..
            } if RATE_LIMIT_REASONS.contains(&reason.as_str()) => {
                "rate limited, retries exhausted".to_string()
            }
            RemoteError::Http { status: 403, .. } => "access denied".to_string(),
            RemoteError::Http { status: 404, .. } => "folder not found or inaccessible".to_string(),
            RemoteError::Http { status: 429, .. } => "rate limited, retries exhausted".to_string(),
            RemoteError::Http { status, message, .. } => format!("HTTP {}: {}", status, message),
            RemoteError::Transport(msg) => format!("network failure: {}", msg),
            RemoteError::Decode(msg) => format!("unexpected response: {}", msg),
            RemoteError::Cancelled => "interrupted by shutdown".to_string(),
            RemoteError::Exhausted { .. } => self.to_string(),
        }
    }
}

/// Tabular store errors
#[derive(Error, Debug, Clone)]
pub enum SheetError {
    /// A mandatory column could not be found in the header row
    #[error("Missing required column '{column}' (accepted headers: {accepted})")]
    MissingColumn { column: String, accepted: String },

    /// The sheet has no header row
    #[error("Sheet '{sheet}' is empty - a header row is required")]
    EmptySheet { sheet: String },

    /// Reading the grid failed
    #[error("Failed to read sheet '{sheet}': {source}")]
    ReadFailed {
        sheet: String,
        #[source]
        source: RemoteError,
    },

    /// Writing a cell failed
    #[error("Failed to write {cell}: {source}")]
    WriteFailed {
        cell: String,
        #[source]
        source: RemoteError,
    },
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// Shard index outside of the shard total
    #[error("Invalid shard {index}/{total}: index must be below total")]
    InvalidShard { index: usize, total: usize },

    /// Unknown permission role
    #[error("Invalid role '{0}': expected reader, commenter, writer, fileOrganizer, organizer or owner")]
    InvalidRole(String),

    /// Settings file could not be read or parsed
    #[error("Invalid settings file '{path}': {reason}")]
    InvalidSettings { path: PathBuf, reason: String },

    /// Folder cache file could not be read or parsed
    #[error("Invalid folder cache '{path}': {reason}")]
    InvalidCache { path: PathBuf, reason: String },

    /// Value out of range
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

/// Monitor errors
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Another monitor instance holds the lock
    #[error("Another monitor is already running (pid {pid}, lock '{path}')")]
    AlreadyRunning { pid: u32, path: PathBuf },

    /// Lock file could not be created
    #[error("Failed to create lock file '{path}': {reason}")]
    LockFailed { path: PathBuf, reason: String },

    /// Log directory missing or unreadable
    #[error("Cannot read log directory '{path}': {reason}")]
    LogDir { path: PathBuf, reason: String },
}

/// Result type alias for ShareError
pub type Result<T> = std::result::Result<T, ShareError>;

/// Result type alias for RemoteError
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Result type alias for SheetError
pub type SheetResult<T> = std::result::Result<T, SheetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RemoteError::http(429, None, "slow down").is_retryable());
        assert!(RemoteError::http(403, Some("userRateLimitExceeded"), "quota").is_retryable());
        assert!(RemoteError::http(403, Some("rateLimitExceeded"), "quota").is_retryable());
        assert!(!RemoteError::http(403, Some("insufficientFilePermissions"), "no").is_retryable());
        assert!(!RemoteError::http(403, None, "no").is_retryable());
        assert!(!RemoteError::http(404, None, "gone").is_retryable());
        assert!(RemoteError::Transport("reset".into()).is_retryable());
        assert!(!RemoteError::Cancelled.is_retryable());
        assert!(RemoteError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_exhausted_is_not_retryable_and_keeps_root() {
        let err = RemoteError::Exhausted {
            operation: "permissions.create".into(),
            context: "folder=abc".into(),
            attempts: 5,
            source: Box::new(RemoteError::http(429, None, "slow down")),
        };
        assert!(!err.is_retryable());
        assert!(matches!(err.root(), RemoteError::Http { status: 429, .. }));
        assert_eq!(err.human_reason(), "rate limited, retries exhausted");
    }

    #[test]
    fn test_human_reason() {
        let err = RemoteError::http(400, Some("invalidSharingRequest"), "Bad Request");
        assert_eq!(err.human_reason(), "recipient not eligible for sharing");
        assert_eq!(RemoteError::http(403, None, "x").human_reason(), "access denied");
    }

    #[test]
    fn test_fatal_setup() {
        let missing: ShareError = SheetError::MissingColumn {
            column: "Email".into(),
            accepted: "email".into(),
        }
        .into();
        assert!(missing.is_fatal_setup());

        let write: ShareError = SheetError::WriteFailed {
            cell: "A1".into(),
            source: RemoteError::Transport("x".into()),
        }
        .into();
        assert!(!write.is_fatal_setup());
    }
}
