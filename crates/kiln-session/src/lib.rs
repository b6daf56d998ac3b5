//! Session-scoped compilation and execution of C programs.
//!
//! A client creates a session, submits C source to compile, and runs the
//! resulting binary with supplied standard input, as often as it likes. Each
//! session owns a private scratch directory holding its source file and
//! binary. Compilers and user programs run as supervised child processes
//! with wall-clock budgets; on expiry their whole process group is killed.
//!
//! # Architecture
//!
//! - [`process`] launches and supervises children ([`CommandRunner`]).
//! - [`toolchain`] describes candidate compilers and probes for them.
//! - [`CompilerInvoker`] writes the source and invokes the first available
//!   toolchain; [`ProgramExecutor`] runs the binary.
//! - [`SessionStore`] maps ids to sessions and their [`Workspace`]s.
//! - [`SessionManager`] serialises operations per session and folds every
//!   result into an [`OperationReply`].
//!
//! This is not a sandbox. Programs run with the privileges of the service.
//!
//! # Example
//!
//! ```rust,no_run
//! use kiln_session::{SessionManager, SessionSettings};
//!
//! let manager = SessionManager::new(&SessionSettings::new("/tmp/kiln-sessions"));
//! let id = manager.create_session().expect("workspace allocated");
//! let reply = manager.compile_and_run(
//!     &id,
//!     "#include <stdio.h>\nint main(void) { puts(\"hello\"); return 0; }\n",
//!     "",
//! );
//! assert!(reply.message().contains("hello"));
//! manager.shutdown();
//! ```

pub mod compiler;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod process;
pub mod session;
pub mod settings;
pub mod store;
pub mod toolchain;
pub mod workspace;

#[cfg(test)]
mod tests;

pub use self::compiler::{CompileResult, CompileStatus, CompilerInvoker, NO_TOOLCHAIN_MESSAGE};
pub use self::error::{ErrorKind, SessionError};
pub use self::executor::{ProgramExecutor, RunResult, RunStatus};
pub use self::lifecycle::{CompileAndRun, OperationReply, SessionManager};
pub use self::process::{
    CapturedStream, CommandRunner, CommandSpec, ProcessOutcome, SystemCommandRunner, Termination,
};
pub use self::session::{Session, SessionId, SessionState};
pub use self::settings::SessionSettings;
pub use self::store::{ReapPolicy, SessionStore};
pub use self::toolchain::{CompileArg, ToolchainDescriptor, ToolchainRegistry};
pub use self::workspace::{BINARY_FILE_NAME, SOURCE_FILE_NAME, ScratchArea, Workspace};
