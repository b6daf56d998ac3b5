//! BDD world for the bootstrap scenarios.

use std::cell::RefCell;
use std::sync::Arc;

use tempfile::TempDir;

use kiln_session::ToolchainRegistry;

use crate::bootstrap::{BootstrapError, ConfigLoader, Daemon, bootstrap_with};

use super::config_loader::{BlockedSocketLoader, FailingConfigLoader, TestConfigLoader};
use super::reporter::RecordingHealthReporter;
use super::toolchain::fake_toolchains;

/// Scenario world shared across bootstrap steps.
pub struct TestWorld {
    loader: Box<dyn ConfigLoader>,
    toolchain_dir: TempDir,
    with_toolchain: bool,
    pub reporter: Arc<RecordingHealthReporter>,
    daemon: Option<Daemon>,
    bootstrap_error: Option<BootstrapError>,
}

impl TestWorld {
    #[must_use]
    pub fn new() -> Self {
        Self {
            loader: Box::new(TestConfigLoader::new()),
            toolchain_dir: TempDir::new().expect("toolchain dir"),
            with_toolchain: true,
            reporter: Arc::new(RecordingHealthReporter::default()),
            daemon: None,
            bootstrap_error: None,
        }
    }

    pub fn use_successful_loader(&mut self) {
        self.loader = Box::new(TestConfigLoader::new());
    }

    pub fn use_failing_loader(&mut self) {
        self.loader = Box::new(FailingConfigLoader);
    }

    pub fn use_blocked_socket_loader(&mut self) {
        self.loader = Box::new(BlockedSocketLoader::new());
    }

    pub fn remove_toolchain(&mut self) {
        self.with_toolchain = false;
    }

    /// Runs the bootstrap sequence once.
    pub fn bootstrap(&mut self) {
        if self.daemon.is_some() || self.bootstrap_error.is_some() {
            return;
        }
        let toolchains = if self.with_toolchain {
            fake_toolchains(self.toolchain_dir.path())
        } else {
            ToolchainRegistry::empty()
        };
        match bootstrap_with(&*self.loader, self.reporter.clone(), toolchains) {
            Ok(daemon) => self.daemon = Some(daemon),
            Err(error) => self.bootstrap_error = Some(error),
        }
    }

    pub const fn bootstrap_error(&self) -> Option<&BootstrapError> {
        self.bootstrap_error.as_ref()
    }

    pub const fn daemon(&self) -> Option<&Daemon> {
        self.daemon.as_ref()
    }
}

impl Drop for TestWorld {
    fn drop(&mut self) {
        if let Some(daemon) = self.daemon.take() {
            daemon.shutdown();
        }
    }
}

pub fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}
