//! Domain errors raised by session operations.
//!
//! [`SessionError`] covers hard failures: the request named something that
//! does not exist, or the host refused a filesystem or process operation.
//! Expected outcomes such as a rejected program or a timeout are not errors;
//! they are reported through [`crate::CompileResult`] and
//! [`crate::RunResult`]. Every failure maps onto one [`ErrorKind`] so the
//! transport can surface a stable code. I/O errors are wrapped in `Arc` to
//! keep the enum small and cloneable.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Errors arising from session operations.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The operation referenced a session id that is not in the store.
    #[error("unknown session '{id}'")]
    UnknownSession {
        /// Identifier supplied by the client.
        id: String,
    },

    /// A run was requested before any successful compile.
    #[error("session '{id}' has no compiled program")]
    NoArtifact {
        /// Session that lacks an artifact.
        id: String,
    },

    /// A workspace directory or file could not be created or written.
    #[error("storage failure at '{path}': {source}")]
    Storage {
        /// Path that could not be prepared.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The executable could not be launched at all.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        /// Program that failed to launch.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Waiting on or communicating with a running child failed.
    #[error("I/O error while supervising '{program}': {source}")]
    Supervision {
        /// Program being supervised.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A stream capture thread panicked.
    #[error("output capture for '{program}' panicked")]
    CaptureThread {
        /// Program whose output was being captured.
        program: String,
    },

    /// A toolchain with the same name is already registered.
    #[error("toolchain '{name}' is already registered")]
    DuplicateToolchain {
        /// Conflicting toolchain name.
        name: String,
    },
}

impl SessionError {
    pub(crate) fn unknown_session(id: impl Into<String>) -> Self {
        Self::UnknownSession { id: id.into() }
    }

    pub(crate) fn no_artifact(id: impl Into<String>) -> Self {
        Self::NoArtifact { id: id.into() }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn spawn(program: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn supervision(program: impl Into<String>, source: io::Error) -> Self {
        Self::Supervision {
            program: program.into(),
            source: Arc::new(source),
        }
    }

    /// Returns the taxonomy entry for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownSession { .. } => ErrorKind::UnknownSession,
            Self::NoArtifact { .. } => ErrorKind::NoArtifact,
            Self::Storage { .. } => ErrorKind::StorageError,
            Self::Spawn { .. } | Self::Supervision { .. } | Self::CaptureThread { .. } => {
                ErrorKind::ExecutionFailed
            }
            Self::DuplicateToolchain { .. } => ErrorKind::Internal,
        }
    }
}

/// Stable failure classification shared by errors and failed results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The session id is not known to the store.
    UnknownSession,
    /// No compiler candidate responded to its probe.
    NoToolchainAvailable,
    /// The compiler rejected the program.
    CompilationFailed,
    /// A run was requested without a compiled program.
    NoArtifact,
    /// A compile or run exceeded its wall-clock budget.
    Timeout,
    /// The program failed without producing diagnostics, or could not start.
    ExecutionFailed,
    /// The workspace could not be allocated or written.
    StorageError,
    /// An invariant of the service itself was violated.
    Internal,
}

impl ErrorKind {
    /// Snake-case code used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownSession => "unknown_session",
            Self::NoToolchainAvailable => "no_toolchain_available",
            Self::CompilationFailed => "compilation_failed",
            Self::NoArtifact => "no_artifact",
            Self::Timeout => "timeout",
            Self::ExecutionFailed => "execution_failed",
            Self::StorageError => "storage_error",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}
