//! The session lifecycle: create, compile, run, and compile-and-run.
//!
//! [`SessionManager`] ties the store, the compiler invoker and the program
//! executor together. Each operation locks its session for its whole
//! duration, so requests for one session queue behind each other and a run
//! never observes a half-written binary. Two API layers are offered: the
//! `try_*` methods return typed results and errors, while [`compile`],
//! [`run`] and [`compile_and_run`] fold everything into an
//! [`OperationReply`] suitable for a client.
//!
//! [`compile`]: SessionManager::compile
//! [`run`]: SessionManager::run
//! [`compile_and_run`]: SessionManager::compile_and_run

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::compiler::{CompileResult, CompilerInvoker};
use crate::error::{ErrorKind, SessionError};
use crate::executor::{ProgramExecutor, RunResult};
use crate::process::{CommandRunner, SystemCommandRunner};
use crate::session::{Session, SessionId};
use crate::settings::SessionSettings;
use crate::store::{SessionStore, lock_session};
use crate::toolchain::ToolchainRegistry;
use crate::workspace::ScratchArea;

const LIFECYCLE_TARGET: &str = "kiln_session::lifecycle";

/// Client-facing summary of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationReply {
    succeeded: bool,
    message: String,
    error: Option<ErrorKind>,
}

impl OperationReply {
    /// A successful reply.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            message: message.into(),
            error: None,
        }
    }

    /// A failed reply carrying a classification.
    #[must_use]
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            message: message.into(),
            error: Some(kind),
        }
    }

    /// Folds a hard error into a reply.
    #[must_use]
    pub fn from_error(error: &SessionError) -> Self {
        let message = match error {
            SessionError::UnknownSession { .. } => String::from("Invalid sessionId"),
            SessionError::NoArtifact { .. } => {
                String::from("No compiled program found for this session.")
            }
            SessionError::Storage { source, .. } => {
                format!("Failed to prepare session workspace: {source}")
            }
            SessionError::Spawn { program, source } => format!("Failed to start {program}: {source}"),
            other => other.to_string(),
        };
        Self::failure(error.kind(), message)
    }

    /// Whether the operation succeeded.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.succeeded
    }

    /// Message or program output.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Failure classification, absent on success.
    #[must_use]
    pub const fn error(&self) -> Option<ErrorKind> {
        self.error
    }
}

impl From<CompileResult> for OperationReply {
    fn from(result: CompileResult) -> Self {
        match result.error_kind() {
            None => Self::success(result.message()),
            Some(kind) => Self::failure(kind, result.message()),
        }
    }
}

impl From<RunResult> for OperationReply {
    fn from(result: RunResult) -> Self {
        match result.error_kind() {
            None => Self::success(result.output()),
            Some(kind) => Self::failure(kind, result.output()),
        }
    }
}

/// Outcome of compile-and-run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileAndRun {
    /// The compile did not succeed, so nothing was run.
    NotCompiled(CompileResult),
    /// The program compiled and was run.
    Ran {
        /// Successful compile.
        compile: CompileResult,
        /// Result of the run that followed.
        run: RunResult,
    },
}

/// Owns all sessions and drives their lifecycle.
#[derive(Debug)]
pub struct SessionManager {
    store: SessionStore,
    compiler: CompilerInvoker,
    executor: ProgramExecutor,
}

impl SessionManager {
    /// Builds a manager using real processes and the default toolchains.
    #[must_use]
    pub fn new(settings: &SessionSettings) -> Self {
        let runner = Arc::new(SystemCommandRunner::new(settings.max_output_bytes));
        Self::with_components(settings, ToolchainRegistry::default(), runner)
    }

    /// Builds a manager over an explicit toolchain registry and runner.
    #[must_use]
    pub fn with_components(
        settings: &SessionSettings,
        registry: ToolchainRegistry,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let store = SessionStore::new(
            ScratchArea::new(settings.scratch_root.clone()),
            settings.reap_policy,
        );
        let compiler = CompilerInvoker::new(
            registry,
            Arc::clone(&runner),
            settings.compile_timeout,
            settings.probe_timeout,
        );
        let executor = ProgramExecutor::new(runner, settings.run_timeout);
        Self {
            store,
            compiler,
            executor,
        }
    }

    /// Session store.
    #[must_use]
    pub const fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Name of the toolchain a compile would use right now.
    #[must_use]
    pub fn detect_toolchain(&self) -> Option<String> {
        self.compiler.detect()
    }

    /// Creates a session with its own workspace.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] when the workspace cannot be
    /// allocated.
    pub fn create_session(&self) -> Result<SessionId, SessionError> {
        self.store.create()
    }

    /// Compiles `source` for the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownSession`] for unknown ids, and storage
    /// or process errors raised while compiling.
    pub fn try_compile(&self, id: &SessionId, source: &str) -> Result<CompileResult, SessionError> {
        self.with_session(id, |session| self.compiler.compile(session, source))
    }

    /// Runs the session's current binary with `stdin`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownSession`] for unknown ids and
    /// [`SessionError::NoArtifact`] when nothing has been compiled.
    pub fn try_run(&self, id: &SessionId, stdin: &str) -> Result<RunResult, SessionError> {
        self.with_session(id, |session| self.executor.execute(session, stdin))
    }

    /// Compiles `source` and, only if that succeeds, runs it with `stdin`.
    ///
    /// The session stays locked across both steps.
    ///
    /// # Errors
    ///
    /// As for [`Self::try_compile`] and [`Self::try_run`].
    pub fn try_compile_and_run(
        &self,
        id: &SessionId,
        source: &str,
        stdin: &str,
    ) -> Result<CompileAndRun, SessionError> {
        self.with_session(id, |session| {
            let compile = self.compiler.compile(session, source)?;
            if !compile.succeeded() {
                return Ok(CompileAndRun::NotCompiled(compile));
            }
            let run = self.executor.execute(session, stdin)?;
            Ok(CompileAndRun::Ran { compile, run })
        })
    }

    /// Compiles and folds the result into a reply.
    #[must_use]
    pub fn compile(&self, id: &SessionId, source: &str) -> OperationReply {
        fold(self.try_compile(id, source).map(OperationReply::from))
    }

    /// Runs and folds the result into a reply.
    #[must_use]
    pub fn run(&self, id: &SessionId, stdin: &str) -> OperationReply {
        fold(self.try_run(id, stdin).map(OperationReply::from))
    }

    /// Compiles, runs on success, and folds the result into a reply.
    #[must_use]
    pub fn compile_and_run(&self, id: &SessionId, source: &str, stdin: &str) -> OperationReply {
        fold(
            self.try_compile_and_run(id, source, stdin)
                .map(|outcome| match outcome {
                    CompileAndRun::NotCompiled(compile) => OperationReply::from(compile),
                    CompileAndRun::Ran { run, .. } => OperationReply::from(run),
                }),
        )
    }

    /// Reaps sessions idle beyond the configured policy.
    pub fn reap_idle(&self) -> Vec<SessionId> {
        self.store.reap_idle(Instant::now())
    }

    /// Removes every session and its workspace.
    pub fn shutdown(&self) -> usize {
        self.store.shutdown()
    }

    fn with_session<T>(
        &self,
        id: &SessionId,
        operation: impl FnOnce(&mut Session) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let slot = self.store.lookup(id.as_str())?;
        let mut session = lock_session(&slot);
        // The reaper or shutdown may have removed it while we waited.
        if !self.store.contains(id.as_str()) {
            return Err(SessionError::unknown_session(id.as_str()));
        }
        debug!(
            target: LIFECYCLE_TARGET,
            session = %id,
            state = ?session.state(),
            "session locked for operation"
        );
        session.touch();
        let result = operation(&mut *session);
        session.touch();
        result
    }
}

fn fold(result: Result<OperationReply, SessionError>) -> OperationReply {
    result.unwrap_or_else(|error| OperationReply::from_error(&error))
}

#[cfg(test)]
mod tests;
