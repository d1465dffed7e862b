//! Error types for keyword research.
//!
//! Library crates use [`ResearchError`] and [`ProviderError`] via `thiserror`.
//! The CLI wraps these with `color-eyre` for rich diagnostics.
//!
//! Pipeline failures never surface as `Err` to the caller: they are turned into
//! [`FailureRecord`](crate::types::FailureRecord)s carrying an [`ErrorKind`].

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::Stage;

/// Top-level error type for operations outside the research pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP client error (e.g. building a client).
    #[error("network error: {0}")]
    Network(String),

    /// Response or document parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ResearchError>;

impl ResearchError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Failure taxonomy
// ---------------------------------------------------------------------------

/// Kind of failure recorded for a keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Stage-local validation failed; never retried.
    InvalidInput,
    /// Network, timeout or rate-limit failure; retried with backoff.
    Transient,
    /// Malformed or unsupported response; not retried.
    Permanent,
    /// The keyword exceeded its wall-clock deadline.
    Timeout,
    /// The session deadline passed before the keyword was dispatched.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ProviderError
// ---------------------------------------------------------------------------

/// Classification a provider attaches to its errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    InvalidInput,
    Transient,
    Permanent,
}

impl From<ProviderErrorKind> for ErrorKind {
    fn from(kind: ProviderErrorKind) -> Self {
        match kind {
            ProviderErrorKind::InvalidInput => Self::InvalidInput,
            ProviderErrorKind::Transient => Self::Transient,
            ProviderErrorKind::Permanent => Self::Permanent,
        }
    }
}

/// Error returned by a search, fetch or analysis provider.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    /// A failure worth retrying (network, timeout, rate limit, 5xx).
    pub fn transient(msg: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            message: msg.into(),
        }
    }

    /// A failure that will not go away on retry.
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Permanent,
            message: msg.into(),
        }
    }

    /// The request itself was unusable.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::InvalidInput,
            message: msg.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ProviderErrorKind::Transient
    }
}

// ---------------------------------------------------------------------------
// StageError
// ---------------------------------------------------------------------------

/// Terminal failure of one pipeline stage, after retries.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{stage} stage failed ({kind}) after {attempts} attempt(s): {message}")]
pub struct StageError {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
    /// Number of `execute` attempts made (0 when `prepare` rejected the input).
    pub attempts: u32,
}

impl StageError {
    pub fn new(stage: Stage, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: msg.into(),
            attempts: 0,
        }
    }

    /// Stage-local validation failure.
    pub fn invalid_input(stage: Stage, msg: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::InvalidInput, msg)
    }

    /// Post-processing failure.
    pub fn permanent(stage: Stage, msg: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Permanent, msg)
    }

    /// Convert a provider error observed on attempt `attempts`.
    pub fn from_provider(stage: Stage, err: ProviderError, attempts: u32) -> Self {
        Self {
            stage,
            kind: err.kind.into(),
            message: err.message,
            attempts,
        }
    }
}
