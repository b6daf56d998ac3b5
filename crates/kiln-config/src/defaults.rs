use std::env;

use camino::Utf8PathBuf;

use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Default TCP port for the daemon listener.
pub const DEFAULT_TCP_PORT: u16 = 9780;

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Wall-clock budget for a single compiler invocation.
pub const DEFAULT_COMPILE_TIMEOUT_MS: u64 = 8_000;

/// Wall-clock budget for a single program execution.
pub const DEFAULT_RUN_TIMEOUT_MS: u64 = 4_000;

/// Wall-clock budget for a toolchain availability probe.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1_500;

/// Bytes retained per captured stream before truncation.
pub const DEFAULT_MAX_OUTPUT_BYTES: u64 = 64 * 1024;

/// Idle seconds before a session is reaped; zero disables reaping.
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 0;

/// Seconds between idle-session sweeps.
pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 60;

/// Directory name created under the system temp dir for session workspaces.
pub const SCRATCH_DIR_NAME: &str = "kiln-sessions";

/// Default log filter expression used by the daemon.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Loopback TCP endpoint on [`DEFAULT_TCP_PORT`].
#[must_use]
pub fn default_socket_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", DEFAULT_TCP_PORT)
}

/// Scratch area for session workspaces under the system temp directory.
#[must_use]
pub fn default_scratch_root() -> Utf8PathBuf {
    let base = Utf8PathBuf::from_path_buf(env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
    base.join(SCRATCH_DIR_NAME)
}
