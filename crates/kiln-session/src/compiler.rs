//! Turning submitted C source into a session's binary.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{ErrorKind, SessionError};
use crate::process::{CommandRunner, ProcessOutcome};
use crate::session::Session;
use crate::toolchain::ToolchainRegistry;

const COMPILER_TARGET: &str = "kiln_session::compiler";

/// Message used when no toolchain answers its probe.
pub const NO_TOOLCHAIN_MESSAGE: &str =
    "No C compiler found. Please install TinyCC (tcc) or GCC and ensure it is on PATH.";

const TIMED_OUT_NOTE: &str = "Compilation timed out.";

/// How a compile attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStatus {
    /// The compiler exited zero and the binary is ready.
    Succeeded,
    /// The compiler rejected the program or crashed.
    Failed,
    /// The compiler exceeded its budget and was killed.
    TimedOut,
    /// No toolchain was available; nothing was attempted.
    NoToolchain,
}

/// Classified result of one compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileResult {
    status: CompileStatus,
    toolchain: Option<String>,
    stdout: String,
    stderr: String,
}

impl CompileResult {
    /// Result for the no-toolchain case.
    #[must_use]
    pub const fn no_toolchain() -> Self {
        Self {
            status: CompileStatus::NoToolchain,
            toolchain: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Classifies a finished compiler process.
    #[must_use]
    pub fn from_outcome(toolchain: &str, outcome: &ProcessOutcome) -> Self {
        let stdout = outcome.stdout().render();
        let mut stderr = outcome.stderr().render();
        let status = if outcome.timed_out() {
            stderr = format!("{stderr}\n{TIMED_OUT_NOTE}").trim().to_owned();
            CompileStatus::TimedOut
        } else if outcome.success() {
            CompileStatus::Succeeded
        } else {
            CompileStatus::Failed
        };
        Self {
            status,
            toolchain: Some(toolchain.to_owned()),
            stdout,
            stderr,
        }
    }

    /// Classification.
    #[must_use]
    pub const fn status(&self) -> CompileStatus {
        self.status
    }

    /// `true` only when a fresh binary was produced.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == CompileStatus::Succeeded
    }

    /// Name of the toolchain that was used.
    #[must_use]
    pub fn toolchain(&self) -> Option<&str> {
        self.toolchain.as_deref()
    }

    /// Compiler standard output.
    #[must_use]
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Compiler standard error.
    #[must_use]
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Diagnostics: standard error, or standard output when that is empty.
    #[must_use]
    pub fn diagnostics(&self) -> &str {
        if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }

    /// Client-facing message.
    #[must_use]
    pub fn message(&self) -> String {
        match self.status {
            CompileStatus::Succeeded => String::from("Compilation successful."),
            CompileStatus::NoToolchain => String::from(NO_TOOLCHAIN_MESSAGE),
            CompileStatus::Failed | CompileStatus::TimedOut => {
                format!("Compilation error:\n{}", self.diagnostics())
            }
        }
    }

    /// Failure classification, absent on success.
    #[must_use]
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        match self.status {
            CompileStatus::Succeeded => None,
            CompileStatus::Failed => Some(ErrorKind::CompilationFailed),
            CompileStatus::TimedOut => Some(ErrorKind::Timeout),
            CompileStatus::NoToolchain => Some(ErrorKind::NoToolchainAvailable),
        }
    }
}

/// Detects a toolchain and compiles a session's source with it.
#[derive(Clone)]
pub struct CompilerInvoker {
    registry: ToolchainRegistry,
    runner: Arc<dyn CommandRunner>,
    compile_timeout: Duration,
    probe_timeout: Duration,
}

impl CompilerInvoker {
    /// Creates an invoker over `registry`, launching through `runner`.
    #[must_use]
    pub fn new(
        registry: ToolchainRegistry,
        runner: Arc<dyn CommandRunner>,
        compile_timeout: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            runner,
            compile_timeout,
            probe_timeout,
        }
    }

    /// Name of the toolchain a compile would use right now.
    #[must_use]
    pub fn detect(&self) -> Option<String> {
        self.registry
            .detect(self.runner.as_ref(), self.probe_timeout)
            .map(|toolchain| toolchain.name().to_owned())
    }

    /// Compiles `source` inside the session's workspace.
    ///
    /// The previous binary is discarded before the compiler starts. On
    /// success the session records the new binary; on any other compile
    /// outcome its artifact is cleared. When no toolchain is available the
    /// session and its workspace are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] when the workspace cannot be
    /// written, or a process error when the compiler cannot be supervised.
    pub fn compile(
        &self,
        session: &mut Session,
        source: &str,
    ) -> Result<CompileResult, SessionError> {
        let Some(toolchain) = self.registry.detect(self.runner.as_ref(), self.probe_timeout)
        else {
            warn!(
                target: COMPILER_TARGET,
                session = %session.id(),
                "no C toolchain available"
            );
            return Ok(CompileResult::no_toolchain());
        };

        let workspace = session.workspace().clone();
        let source_path = workspace.write_source(source)?;
        workspace.discard_binary()?;
        session.clear_artifact();

        let binary = workspace.binary_path();
        let spec = toolchain
            .compile_command(&source_path, &binary, self.compile_timeout)
            .current_dir(workspace.path());
        let outcome = self.runner.run(&spec)?;
        let result = CompileResult::from_outcome(toolchain.name(), &outcome);

        if result.succeeded() {
            session.record_artifact(binary);
        }
        info!(
            target: COMPILER_TARGET,
            session = %session.id(),
            toolchain = toolchain.name(),
            status = ?result.status(),
            elapsed_ms = u64::try_from(outcome.elapsed().as_millis()).unwrap_or(u64::MAX),
            "compile finished"
        );
        Ok(result)
    }
}

impl std::fmt::Debug for CompilerInvoker {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CompilerInvoker")
            .field("registry", &self.registry)
            .field("compile_timeout", &self.compile_timeout)
            .field("probe_timeout", &self.probe_timeout)
            .finish_non_exhaustive()
    }
}
