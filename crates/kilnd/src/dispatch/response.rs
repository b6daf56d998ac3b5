//! Reply serialisation for the dispatch loop.

use std::io::Write;

use serde::Serialize;

use kiln_session::{
    CompileResult, ErrorKind, OperationReply, RunResult, SessionError, SessionId,
};

use super::errors::DispatchError;

/// Reply shape a request is answered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `create-session`.
    CreateSession,
    /// `compile`.
    Compile,
    /// `run` and `compile-run`.
    Run,
}

/// Reply sent to the client as a single JSONL line.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DaemonReply {
    /// A session was allocated.
    Session {
        /// Identifier the client passes to later requests.
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// Outcome of a compile.
    Compile {
        /// Whether a program is now ready to run.
        succeeded: bool,
        /// `Compilation successful.` or the compiler diagnostics.
        message: String,
        /// Failure code when `succeeded` is false.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<&'static str>,
    },
    /// Outcome of a run.
    Run {
        /// False for timeouts and silent failures.
        succeeded: bool,
        /// Captured output, or an explanation when there was none.
        output: String,
        /// Failure code when `succeeded` is false.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<&'static str>,
    },
    /// The request could not be carried out.
    Error {
        /// Stable machine-readable code.
        error: &'static str,
        /// Human-readable description.
        message: String,
    },
}

impl DaemonReply {
    /// Reply for a freshly created session.
    #[must_use]
    pub fn session(id: &SessionId) -> Self {
        Self::Session {
            session_id: id.as_str().to_owned(),
        }
    }

    /// Reply describing a compile outcome.
    #[must_use]
    pub fn compiled(result: CompileResult) -> Self {
        let reply = OperationReply::from(result);
        Self::Compile {
            succeeded: reply.succeeded(),
            error: reply.error().map(ErrorKind::as_str),
            message: reply.message().to_owned(),
        }
    }

    /// Reply describing a run outcome.
    #[must_use]
    pub fn ran(result: RunResult) -> Self {
        Self::run_reply(&OperationReply::from(result))
    }

    /// Compile-and-run reply for a program that never got to run.
    ///
    /// The compiler's verdict is carried in `output` so clients of the
    /// combined operation only ever see the `run` shape.
    #[must_use]
    pub fn not_compiled(result: CompileResult) -> Self {
        Self::run_reply(&OperationReply::from(result))
    }

    /// Reply for a session-layer error such as an unknown session.
    ///
    /// Compile, run and compile-run keep their own reply shape so the
    /// `succeeded` flag and payload field are always present.
    #[must_use]
    pub fn session_error(operation: Operation, error: &SessionError) -> Self {
        let reply = OperationReply::from_error(error);
        match operation {
            Operation::Compile => Self::Compile {
                succeeded: false,
                message: reply.message().to_owned(),
                error: Some(error.kind().as_str()),
            },
            Operation::Run => Self::run_reply(&reply),
            Operation::CreateSession => Self::Error {
                error: error.kind().as_str(),
                message: reply.message().to_owned(),
            },
        }
    }

    fn run_reply(reply: &OperationReply) -> Self {
        Self::Run {
            succeeded: reply.succeeded(),
            error: reply.error().map(ErrorKind::as_str),
            output: reply.message().to_owned(),
        }
    }

    /// Reply for a protocol-level error.
    #[must_use]
    pub fn dispatch_error(error: &DispatchError) -> Self {
        Self::Error {
            error: error.code(),
            message: error.to_string(),
        }
    }
}

/// Writer that frames replies as JSONL.
pub struct ResponseWriter<W> {
    writer: W,
}

impl<W: Write> ResponseWriter<W> {
    /// Creates a new response writer wrapping the given output stream.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes `reply` followed by a newline and flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub fn write_reply(&mut self, reply: &DaemonReply) -> Result<(), DispatchError> {
        serde_json::to_writer(&mut self.writer, reply).map_err(DispatchError::SerializeReply)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Writes an `error` reply describing `error`.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_error(&mut self, error: &DispatchError) -> Result<(), DispatchError> {
        self.write_reply(&DaemonReply::dispatch_error(error))
    }
}
