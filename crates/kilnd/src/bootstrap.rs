//! Daemon bootstrap orchestration.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use kiln_config::{Config, SocketPreparationError};
use kiln_session::{
    ReapPolicy, SessionManager, SessionSettings, SystemCommandRunner, ToolchainRegistry,
};

use crate::health::HealthReporter;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the daemon configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader's error when no valid configuration can be built.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that hands out an already-resolved configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config` so it can be passed where a loader is expected.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare daemon socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
}

/// Translates daemon configuration into session tunables.
#[must_use]
pub fn session_settings(config: &Config) -> SessionSettings {
    let reap_policy = config
        .session_idle_timeout()
        .map_or_else(ReapPolicy::never, ReapPolicy::after);
    SessionSettings {
        scratch_root: config.scratch_root().as_std_path().to_path_buf(),
        compile_timeout: config.compile_timeout(),
        run_timeout: config.run_timeout(),
        probe_timeout: config.probe_timeout(),
        max_output_bytes: config.max_output_bytes(),
        reap_policy,
    }
}

/// Result of a successful bootstrap invocation.
pub struct Daemon {
    config: Config,
    sessions: Arc<SessionManager>,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Daemon {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Shared session manager serving every connection.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Reporter the daemon publishes lifecycle events through.
    #[must_use]
    pub fn reporter(&self) -> Arc<dyn HealthReporter> {
        Arc::clone(&self.reporter)
    }

    /// Deletes every session workspace, returning how many were removed.
    pub fn shutdown(&self) -> usize {
        self.sessions.shutdown()
    }
}

/// Bootstraps the daemon using the supplied collaborators.
///
/// Toolchain detection runs once here purely to report availability; each
/// compile probes again so a compiler installed later is still found.
///
/// # Errors
///
/// Returns [`BootstrapError`] when configuration, telemetry or socket
/// preparation fails. The reporter sees the failure before it is returned.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    toolchains: ToolchainRegistry,
) -> Result<Daemon, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => {
            let error = BootstrapError::Configuration { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => {
            let error = BootstrapError::Telemetry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    if let Err(source) = config.daemon_socket().prepare_filesystem() {
        let error = BootstrapError::Socket { source };
        reporter.bootstrap_failed(&error);
        return Err(error);
    }

    let settings = session_settings(&config);
    let runner = Arc::new(SystemCommandRunner::new(settings.max_output_bytes));
    let sessions = SessionManager::with_components(&settings, toolchains, runner);
    match sessions.detect_toolchain() {
        Some(name) => reporter.toolchain_detected(&name),
        None => reporter.toolchain_missing(),
    }
    reporter.bootstrap_succeeded(&config);

    Ok(Daemon {
        config,
        sessions: Arc::new(sessions),
        telemetry,
        reporter,
    })
}
