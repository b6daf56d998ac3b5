//! Configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use kiln_config::{Config, SocketEndpoint};

use crate::bootstrap::ConfigLoader;

/// Loader that places the socket and scratch area under a temporary
/// directory.
pub struct TestConfigLoader {
    dir: TempDir,
    idle_secs: u64,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temporary directory");
        Self { dir, idle_secs: 0 }
    }

    /// Enables idle reaping with a one-second threshold.
    #[must_use]
    pub fn with_reaping(mut self) -> Self {
        self.idle_secs = 1;
        self
    }

    pub fn socket_path(&self) -> PathBuf {
        self.dir.path().join("run").join("kilnd.sock")
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.dir.path().join("sessions")
    }

    pub fn config(&self) -> Config {
        let socket = self
            .socket_path()
            .to_str()
            .expect("temporary socket path was not valid UTF-8")
            .to_owned();
        let scratch = self
            .scratch_root()
            .to_str()
            .expect("temporary scratch path was not valid UTF-8")
            .to_owned();
        Config {
            daemon_socket: SocketEndpoint::unix(socket),
            log_filter: String::from("warn"),
            scratch_root: scratch.into(),
            run_timeout_ms: 400,
            compile_timeout_ms: 5_000,
            session_idle_secs: self.idle_secs,
            reap_interval_secs: 1,
            ..Config::from_defaults()
        }
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config())
    }
}

/// Loader that intentionally fails by passing invalid CLI arguments.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("kilnd"),
            OsString::from("--daemon-socket"),
            OsString::from("invalid://socket"),
        ];
        Config::load_from_iter(args)
    }
}

/// Loader whose socket directory sits beneath a regular file.
pub struct BlockedSocketLoader {
    inner: TestConfigLoader,
}

impl BlockedSocketLoader {
    #[must_use]
    pub fn new() -> Self {
        let inner = TestConfigLoader::new();
        let blocker = inner.dir.path().join("run");
        fs::write(&blocker, b"not a directory").expect("write blocker file");
        Self { inner }
    }
}

impl ConfigLoader for BlockedSocketLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.inner.config())
    }
}
