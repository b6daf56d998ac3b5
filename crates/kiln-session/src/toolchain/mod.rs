//! Compiler candidates and availability probing.
//!
//! A [`ToolchainRegistry`] holds an ordered list of
//! [`ToolchainDescriptor`]s. Detection walks the list and returns the first
//! candidate whose probe command responds. A candidate counts as available
//! when the probe exits with any status code or prints anything at all; many
//! compilers exit non-zero on `-v` yet are perfectly usable. Failure to
//! spawn, or being killed before saying anything, marks it unavailable.
//!
//! The default registry prefers TinyCC and falls back to GCC.

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::SessionError;
use crate::process::{CommandRunner, CommandSpec, ProcessOutcome};

const TOOLCHAIN_TARGET: &str = "kiln_session::toolchain";

/// One element of a compile command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileArg {
    /// Passed through verbatim.
    Literal(String),
    /// Replaced by the source file path.
    Source,
    /// Replaced by the output binary path.
    Output,
}

impl CompileArg {
    /// Convenience constructor for literal arguments.
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }
}

/// A compiler the service knows how to invoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainDescriptor {
    name: String,
    program: OsString,
    probe_args: Vec<String>,
    compile_args: Vec<CompileArg>,
}

impl ToolchainDescriptor {
    /// Describes a compiler invoked as `<program> <source> -o <output>` and
    /// probed with `-v`.
    #[must_use]
    pub fn new(name: impl Into<String>, program: impl Into<OsString>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            probe_args: vec![String::from("-v")],
            compile_args: vec![
                CompileArg::Source,
                CompileArg::literal("-o"),
                CompileArg::Output,
            ],
        }
    }

    /// Replaces the probe arguments.
    #[must_use]
    pub fn with_probe_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.probe_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the compile argument template.
    #[must_use]
    pub fn with_compile_args(mut self, args: impl IntoIterator<Item = CompileArg>) -> Self {
        self.compile_args = args.into_iter().collect();
        self
    }

    /// TinyCC: `tcc <source> -o <output>`.
    #[must_use]
    pub fn tcc() -> Self {
        Self::new("tcc", "tcc")
    }

    /// GCC with warnings silenced and optimisation disabled.
    #[must_use]
    pub fn gcc() -> Self {
        Self::new("gcc", "gcc").with_compile_args([
            CompileArg::Source,
            CompileArg::literal("-w"),
            CompileArg::literal("-O0"),
            CompileArg::literal("-o"),
            CompileArg::Output,
        ])
    }

    /// Human-readable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Program looked up on `PATH` (or an absolute path).
    #[must_use]
    pub fn program(&self) -> &OsString {
        &self.program
    }

    /// Compile argument template.
    #[must_use]
    pub fn compile_args(&self) -> &[CompileArg] {
        &self.compile_args
    }

    /// Builds the probe command.
    #[must_use]
    pub fn probe_command(&self, timeout: Duration) -> CommandSpec {
        CommandSpec::new(self.program.clone(), timeout).args(self.probe_args.iter().cloned())
    }

    /// Builds the compile command for the given source and output paths.
    #[must_use]
    pub fn compile_command(&self, source: &Path, output: &Path, timeout: Duration) -> CommandSpec {
        let args = self.compile_args.iter().map(|arg| match arg {
            CompileArg::Literal(value) => OsString::from(value),
            CompileArg::Source => source.as_os_str().to_owned(),
            CompileArg::Output => output.as_os_str().to_owned(),
        });
        CommandSpec::new(self.program.clone(), timeout).args(args)
    }
}

/// Ordered list of compiler candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainRegistry {
    candidates: Vec<ToolchainDescriptor>,
}

impl Default for ToolchainRegistry {
    fn default() -> Self {
        Self {
            candidates: vec![ToolchainDescriptor::tcc(), ToolchainDescriptor::gcc()],
        }
    }
}

impl ToolchainRegistry {
    /// Creates a registry with no candidates.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            candidates: Vec::new(),
        }
    }

    /// Appends a candidate with the lowest preference so far.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::DuplicateToolchain`] when a candidate with the
    /// same name is already registered.
    pub fn register(&mut self, descriptor: ToolchainDescriptor) -> Result<(), SessionError> {
        if self
            .candidates
            .iter()
            .any(|existing| existing.name == descriptor.name)
        {
            return Err(SessionError::DuplicateToolchain {
                name: descriptor.name,
            });
        }
        self.candidates.push(descriptor);
        Ok(())
    }

    /// Candidates in preference order.
    #[must_use]
    pub fn candidates(&self) -> &[ToolchainDescriptor] {
        &self.candidates
    }

    /// Returns the first candidate that answers its probe.
    ///
    /// Probes run on every call so that installing or removing a compiler
    /// takes effect without a restart.
    #[must_use]
    pub fn detect(
        &self,
        runner: &dyn CommandRunner,
        probe_timeout: Duration,
    ) -> Option<&ToolchainDescriptor> {
        self.candidates.iter().find(|candidate| {
            let available = runner
                .run(&candidate.probe_command(probe_timeout))
                .is_ok_and(|outcome| responded(&outcome));
            debug!(
                target: TOOLCHAIN_TARGET,
                toolchain = candidate.name(),
                available,
                "probed toolchain"
            );
            available
        })
    }
}

fn responded(outcome: &ProcessOutcome) -> bool {
    outcome.exit_code().is_some() || !outcome.stdout().is_empty() || !outcome.stderr().is_empty()
}
