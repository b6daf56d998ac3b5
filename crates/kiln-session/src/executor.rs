//! Running a session's compiled program.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::{ErrorKind, SessionError};
use crate::process::{CommandRunner, CommandSpec, ProcessOutcome};
use crate::session::Session;

const EXECUTOR_TARGET: &str = "kiln_session::executor";

/// How a program run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The program finished, or failed while still producing output.
    Succeeded,
    /// The program exceeded its budget and was killed.
    TimedOut,
    /// The program failed without writing anything.
    Failed,
}

/// Classified result of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    status: RunStatus,
    output: String,
    exit_code: Option<i32>,
    signal: Option<String>,
}

impl RunResult {
    /// Classifies a finished program.
    ///
    /// Output is standard output followed by standard error; the two are
    /// captured independently, so their interleaving is not preserved.
    #[must_use]
    pub fn from_outcome(outcome: &ProcessOutcome) -> Self {
        let stdout = outcome.stdout().render();
        let stderr = outcome.stderr().render();
        let (status, output) = if outcome.timed_out() {
            let output = format!("{stdout}{stderr}\nExecution timed out.")
                .trim()
                .to_owned();
            (RunStatus::TimedOut, output)
        } else if !outcome.success() && stdout.is_empty() && stderr.is_empty() {
            let output = outcome.terminating_signal().map_or_else(
                || String::from("Program exited with non-zero status."),
                |signal| format!("Program terminated by signal {signal}."),
            );
            (RunStatus::Failed, output)
        } else {
            (RunStatus::Succeeded, format!("{stdout}{stderr}"))
        };
        Self {
            status,
            output,
            exit_code: outcome.exit_code(),
            signal: outcome.terminating_signal().map(str::to_owned),
        }
    }

    /// Classification.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// `true` unless the run timed out or failed silently.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Text returned to the client.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Exit code of the program, if it exited normally.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Terminating signal, if any.
    #[must_use]
    pub fn signal(&self) -> Option<&str> {
        self.signal.as_deref()
    }

    /// Failure classification, absent on success.
    #[must_use]
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        match self.status {
            RunStatus::Succeeded => None,
            RunStatus::TimedOut => Some(ErrorKind::Timeout),
            RunStatus::Failed => Some(ErrorKind::ExecutionFailed),
        }
    }
}

/// Runs compiled programs inside their session workspace.
#[derive(Clone)]
pub struct ProgramExecutor {
    runner: Arc<dyn CommandRunner>,
    run_timeout: Duration,
}

impl ProgramExecutor {
    /// Creates an executor launching through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, run_timeout: Duration) -> Self {
        Self {
            runner,
            run_timeout,
        }
    }

    /// Runs the session's binary with `stdin` as its input.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoArtifact`] when the session has no binary,
    /// or the binary is no longer a regular file, without spawning anything.
    /// Launch and supervision failures are passed through.
    pub fn execute(&self, session: &Session, stdin: &str) -> Result<RunResult, SessionError> {
        let binary = session
            .built_binary()
            .filter(|path| path.is_file())
            .ok_or_else(|| SessionError::no_artifact(session.id().as_str()))?;

        let spec = CommandSpec::new(binary, self.run_timeout)
            .current_dir(session.workspace().path())
            .stdin_bytes(stdin);
        let outcome = self.runner.run(&spec)?;
        let result = RunResult::from_outcome(&outcome);

        info!(
            target: EXECUTOR_TARGET,
            session = %session.id(),
            status = ?result.status(),
            exit_code = ?result.exit_code(),
            signal = ?result.signal(),
            elapsed_ms = u64::try_from(outcome.elapsed().as_millis()).unwrap_or(u64::MAX),
            "program run finished"
        );
        Ok(result)
    }
}

impl std::fmt::Debug for ProgramExecutor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ProgramExecutor")
            .field("run_timeout", &self.run_timeout)
            .finish_non_exhaustive()
    }
}
