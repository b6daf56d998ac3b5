//! Shared configuration for the Kiln daemon.
//!
//! [`Config`] is resolved by `ortho_config` from, in increasing precedence,
//! built-in defaults, a TOML file (`--config-path` or `KILN_CONFIG_PATH`),
//! `KILN_*` environment variables and command-line flags. The daemon reads
//! its listener endpoint, telemetry settings, scratch area and the process
//! budgets applied to every compile and run from here.

mod defaults;
mod logging;
mod socket;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_COMPILE_TIMEOUT_MS, DEFAULT_LOG_FILTER, DEFAULT_MAX_OUTPUT_BYTES,
    DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_REAP_INTERVAL_SECS, DEFAULT_RUN_TIMEOUT_MS,
    DEFAULT_SESSION_IDLE_SECS, DEFAULT_TCP_PORT, SCRATCH_DIR_NAME, default_log_filter,
    default_log_filter_string, default_log_format, default_scratch_root, default_socket_endpoint,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "KILN")]
pub struct Config {
    /// Endpoint the daemon listens on.
    #[ortho_config(default = default_socket_endpoint())]
    pub daemon_socket: SocketEndpoint,
    /// `tracing` filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Directory under which per-session workspaces are created.
    #[ortho_config(default = default_scratch_root())]
    pub scratch_root: Utf8PathBuf,
    /// Compiler wall-clock budget in milliseconds.
    #[ortho_config(default = DEFAULT_COMPILE_TIMEOUT_MS)]
    pub compile_timeout_ms: u64,
    /// Program wall-clock budget in milliseconds.
    #[ortho_config(default = DEFAULT_RUN_TIMEOUT_MS)]
    pub run_timeout_ms: u64,
    /// Toolchain probe budget in milliseconds.
    #[ortho_config(default = DEFAULT_PROBE_TIMEOUT_MS)]
    pub probe_timeout_ms: u64,
    /// Bytes kept per captured stream before truncation.
    #[ortho_config(default = DEFAULT_MAX_OUTPUT_BYTES)]
    pub max_output_bytes: u64,
    /// Seconds a session may sit idle before it is reaped (0 disables).
    #[ortho_config(default = DEFAULT_SESSION_IDLE_SECS)]
    pub session_idle_secs: u64,
    /// Seconds between idle-session sweeps.
    #[ortho_config(default = DEFAULT_REAP_INTERVAL_SECS)]
    pub reap_interval_secs: u64,
}

impl Config {
    /// Builds a configuration holding only the built-in defaults.
    ///
    /// Useful for tests and embedding where no layered sources apply.
    #[must_use]
    pub fn from_defaults() -> Self {
        Self {
            daemon_socket: default_socket_endpoint(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            scratch_root: default_scratch_root(),
            compile_timeout_ms: DEFAULT_COMPILE_TIMEOUT_MS,
            run_timeout_ms: DEFAULT_RUN_TIMEOUT_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            session_idle_secs: DEFAULT_SESSION_IDLE_SECS,
            reap_interval_secs: DEFAULT_REAP_INTERVAL_SECS,
        }
    }

    /// Endpoint the daemon listens on.
    #[must_use]
    pub const fn daemon_socket(&self) -> &SocketEndpoint {
        &self.daemon_socket
    }

    /// `tracing` filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Scratch directory for session workspaces.
    #[must_use]
    pub fn scratch_root(&self) -> &Utf8Path {
        &self.scratch_root
    }

    /// Compiler wall-clock budget.
    #[must_use]
    pub const fn compile_timeout(&self) -> Duration {
        Duration::from_millis(self.compile_timeout_ms)
    }

    /// Program wall-clock budget.
    #[must_use]
    pub const fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }

    /// Toolchain probe budget.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Per-stream capture cap, saturating on narrow targets.
    #[must_use]
    pub fn max_output_bytes(&self) -> usize {
        usize::try_from(self.max_output_bytes).unwrap_or(usize::MAX)
    }

    /// Idle threshold for session reaping; `None` when reaping is disabled.
    #[must_use]
    pub const fn session_idle_timeout(&self) -> Option<Duration> {
        if self.session_idle_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.session_idle_secs))
        }
    }

    /// Interval between idle sweeps, never shorter than one second.
    #[must_use]
    pub const fn reap_interval(&self) -> Duration {
        if self.reap_interval_secs == 0 {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(self.reap_interval_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_favour_longer_compile_budget() {
        let config = Config::from_defaults();
        assert!(config.compile_timeout() > config.run_timeout());
        assert_eq!(config.run_timeout(), Duration::from_millis(4_000));
    }

    #[test]
    fn reaping_is_disabled_by_default() {
        let config = Config::from_defaults();
        assert_eq!(config.session_idle_timeout(), None);
    }

    #[test]
    fn idle_timeout_is_reported_when_configured() {
        let config = Config {
            session_idle_secs: 90,
            ..Config::from_defaults()
        };
        assert_eq!(
            config.session_idle_timeout(),
            Some(Duration::from_secs(90))
        );
    }

    #[test]
    fn scratch_root_lives_under_temp_dir() {
        let config = Config::from_defaults();
        assert!(config.scratch_root().ends_with(SCRATCH_DIR_NAME));
    }
}
