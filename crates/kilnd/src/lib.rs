//! The Kiln daemon.
//!
//! `kilnd` hosts a [`kiln_session::SessionManager`] behind a JSONL socket
//! transport configured through [`kiln_config`]. Each connection carries a
//! single request (`create-session`, `compile`, `run` or `compile-run`) and
//! receives a single reply line.
//!
//! Start-up follows a fixed sequence: load configuration, initialise
//! structured telemetry, prepare the socket filesystem, build the session
//! manager and report which toolchain was found, bind the listener and
//! start the optional idle reaper. The process then blocks until a
//! termination signal arrives, stops accepting connections and deletes
//! every session workspace before exiting.
//!
//! Programs compiled and run by the daemon execute with the daemon's own
//! privileges. Kiln bounds their wall-clock time and captured output but is
//! not a sandbox; only expose the socket to trusted clients.

mod bootstrap;
mod dispatch;
mod health;
mod process;
mod reaper;
mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
    session_settings,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, run_daemon};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
