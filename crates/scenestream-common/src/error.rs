//! Unified error type for scenestream.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for API handlers to derive an HTTP status code via [`Error::http_status`].

use std::fmt;

/// Unified error type covering all failure modes in scenestream.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity does not exist and never will.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "session", "segment").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The requested entity is expected to exist shortly; the caller should retry.
    #[error("{what} not yet available")]
    NotYetAvailable {
        /// Description of what was requested.
        what: String,
        /// Suggested delay before retrying, in milliseconds.
        retry_after_ms: u64,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The caller is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg) or upstream service returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::NotYetAvailable { .. } => 503,
            Error::Validation(_) => 400,
            Error::Unauthorized(_) => 401,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Internal(_) => 500,
        }
    }

    /// Whether the caller should retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::NotYetAvailable { .. })
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::NotYetAvailable`].
    pub fn not_yet_available(what: impl Into<String>, retry_after_ms: u64) -> Self {
        Error::NotYetAvailable {
            what: what.into(),
            retry_after_ms,
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
