//! Error types for request dispatch failures.

use std::io;

use thiserror::Error;

/// Errors surfaced while reading, parsing or answering a request.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Request line could not be parsed as a known request.
    #[error("malformed request: {message}")]
    MalformedRequest {
        /// Parser diagnostic.
        message: String,
        /// Underlying JSON error, when there is one.
        #[source]
        source: Option<serde_json::Error>,
    },

    /// A required request field is missing or empty.
    #[error("{message}")]
    InvalidArguments {
        /// Client-facing description.
        message: String,
    },

    /// Request exceeds the maximum allowed size.
    #[error("request too large: {size} bytes exceeds {max_size} byte limit")]
    RequestTooLarge {
        /// Bytes read before giving up.
        size: usize,
        /// Configured ceiling.
        max_size: usize,
    },

    /// IO error during read or write.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Reply serialisation failed.
    #[error("failed to serialise reply: {0}")]
    SerializeReply(#[source] serde_json::Error),

    /// Internal error such as a worker panic.
    #[error("internal error: {message}")]
    Internal {
        /// Diagnostic message.
        message: String,
    },
}

impl DispatchError {
    /// Stable machine-readable code reported in `error` replies.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MalformedRequest { .. } => "malformed_request",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::RequestTooLarge { .. } => "request_too_large",
            Self::Io(_) | Self::SerializeReply(_) | Self::Internal { .. } => "internal",
        }
    }

    /// Creates a malformed request error from a serde error.
    #[must_use]
    pub fn from_json_error(source: serde_json::Error) -> Self {
        Self::MalformedRequest {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Creates a malformed request error with a custom message.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRequest {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an invalid arguments error.
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }

    /// Creates a request too large error.
    #[must_use]
    pub const fn request_too_large(size: usize, max_size: usize) -> Self {
        Self::RequestTooLarge { size, max_size }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
