//! Request deserialisation for the dispatch loop.

use serde::Deserialize;

use super::errors::DispatchError;
use super::response::Operation;

/// Request read from a client connection.
///
/// Text fields default to empty so a missing `code` or `sessionId` reaches
/// validation and is reported as `invalid_arguments` rather than as a parse
/// failure.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "operation", rename_all = "kebab-case")]
pub enum SessionRequest {
    /// Allocate a new session.
    CreateSession,
    /// Compile source into the session, replacing any earlier program.
    #[serde(rename_all = "camelCase")]
    Compile {
        /// Target session.
        #[serde(default)]
        session_id: String,
        /// C source text.
        #[serde(default)]
        code: String,
    },
    /// Run the session's compiled program.
    #[serde(rename_all = "camelCase")]
    Run {
        /// Target session.
        #[serde(default)]
        session_id: String,
        /// Bytes fed to the program's standard input.
        #[serde(default)]
        stdin: String,
    },
    /// Compile, then run only if compilation succeeded.
    #[serde(rename_all = "camelCase")]
    CompileRun {
        /// Target session.
        #[serde(default)]
        session_id: String,
        /// C source text.
        #[serde(default)]
        code: String,
        /// Bytes fed to the program's standard input.
        #[serde(default)]
        stdin: String,
    },
}

impl SessionRequest {
    /// Parses a JSONL line into a request.
    ///
    /// Trailing whitespace, including the newline delimiter, is ignored.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::MalformedRequest` when the line is empty, is
    /// not JSON or names an unknown operation.
    pub fn parse(line: &[u8]) -> Result<Self, DispatchError> {
        let trimmed = trim_trailing_whitespace(line);
        if trimmed.is_empty() {
            return Err(DispatchError::malformed("empty request line"));
        }

        serde_json::from_slice(trimmed).map_err(DispatchError::from_json_error)
    }

    /// Checks that the fields the operation needs are present.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidArguments` naming the first missing
    /// field. Whitespace-only source is passed on to the compiler.
    pub fn validate(&self) -> Result<(), DispatchError> {
        match self {
            Self::CreateSession => Ok(()),
            Self::Compile { session_id, code } | Self::CompileRun { session_id, code, .. } => {
                require_session(session_id)?;
                if code.is_empty() {
                    return Err(DispatchError::invalid_arguments("Missing code"));
                }
                Ok(())
            }
            Self::Run { session_id, .. } => require_session(session_id),
        }
    }

    /// Wire name of the operation, for logging.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::CreateSession => "create-session",
            Self::Compile { .. } => "compile",
            Self::Run { .. } => "run",
            Self::CompileRun { .. } => "compile-run",
        }
    }

    /// Shape of the reply this request is answered with.
    #[must_use]
    pub const fn reply_shape(&self) -> Operation {
        match self {
            Self::CreateSession => Operation::CreateSession,
            Self::Compile { .. } => Operation::Compile,
            Self::Run { .. } | Self::CompileRun { .. } => Operation::Run,
        }
    }
}

fn require_session(session_id: &str) -> Result<(), DispatchError> {
    if session_id.trim().is_empty() {
        return Err(DispatchError::invalid_arguments("Missing sessionId"));
    }
    Ok(())
}

fn trim_trailing_whitespace(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |pos| pos + 1);
    bytes.get(..end).unwrap_or_default()
}
