//! Supervises daemon launch sequencing and runtime orchestration.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use kiln_session::ToolchainRegistry;

use crate::StructuredHealthReporter;
use crate::bootstrap::{ConfigLoader, StaticConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::dispatch::DispatchConnectionHandler;
use crate::health::HealthReporter;
use crate::reaper::IdleReaper;
use crate::transport::{ConnectionHandler, SocketListener};

use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};
use super::{PROCESS_TARGET, SHUTDOWN_TIMEOUT};

const DRAIN_POLL: Duration = Duration::from_millis(25);

/// Service dependencies required to construct the daemon runtime.
pub(crate) struct ServiceDeps<L> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn HealthReporter>,
    pub(crate) toolchains: ToolchainRegistry,
}

/// Collaborators required to launch the daemon runtime.
pub(crate) struct LaunchPlan<L, S> {
    pub(crate) shutdown: S,
    pub(crate) drain_timeout: Duration,
    pub(crate) services: ServiceDeps<L>,
}

/// Runs the daemon in the foreground using the production collaborators.
///
/// # Errors
///
/// Returns [`LaunchError`] when any start-up step fails or the shutdown
/// signal handlers cannot be installed.
pub fn run_daemon() -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        shutdown: SystemShutdownSignal::new(),
        drain_timeout: SHUTDOWN_TIMEOUT,
        services: ServiceDeps {
            loader: SystemConfigLoader,
            reporter: Arc::new(StructuredHealthReporter::new()),
            toolchains: ToolchainRegistry::default(),
        },
    };
    run_daemon_with(plan)
}

/// Runs the daemon with injected collaborators.
pub(crate) fn run_daemon_with<L, S>(plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal,
{
    let LaunchPlan {
        mut shutdown,
        drain_timeout,
        services,
    } = plan;
    let ServiceDeps {
        loader,
        reporter,
        toolchains,
    } = services;

    info!(target: PROCESS_TARGET, "starting daemon runtime");
    shutdown.arm()?;
    let config = loader.load()?;
    config.daemon_socket().prepare_filesystem()?;
    let listener = SocketListener::bind(config.daemon_socket())?;

    let static_loader = StaticConfigLoader::new(config.clone());
    let daemon = bootstrap_with(&static_loader, reporter, toolchains)?;

    let handler = Arc::new(DispatchConnectionHandler::new(Arc::clone(daemon.sessions())));
    let connections: Arc<dyn ConnectionHandler> = handler.clone();
    let listener_handle = listener.start(connections)?;

    let reaper = match config.session_idle_timeout() {
        Some(idle) => {
            info!(
                target: PROCESS_TARGET,
                idle_secs = idle.as_secs(),
                interval_secs = config.reap_interval().as_secs(),
                "idle session reaping enabled"
            );
            let spawned = IdleReaper::spawn(
                Arc::clone(daemon.sessions()),
                daemon.reporter(),
                config.reap_interval(),
            );
            match spawned {
                Ok(reaper) => Some(reaper),
                Err(source) => {
                    drop(listener_handle.stop());
                    daemon.shutdown();
                    return Err(LaunchError::Reaper { source });
                }
            }
        }
        None => None,
    };

    info!(
        target: PROCESS_TARGET,
        endpoint = %config.daemon_socket(),
        "daemon ready"
    );
    let waited = shutdown.wait();
    match &waited {
        Ok(reason) => info!(target: PROCESS_TARGET, %reason, "shutting down"),
        Err(error) => warn!(target: PROCESS_TARGET, %error, "shutting down after signal failure"),
    }

    let joined = listener_handle.stop();
    let reaper_ok = reaper.is_none_or(IdleReaper::stop);
    drain(&handler, drain_timeout);
    let removed = daemon.shutdown();
    info!(
        target: PROCESS_TARGET,
        sessions_removed = removed,
        "shutdown sequence completed"
    );

    waited?;
    joined?;
    if reaper_ok {
        Ok(())
    } else {
        Err(LaunchError::ReaperPanic)
    }
}

/// Waits for in-flight requests to finish, up to `timeout`.
fn drain(handler: &DispatchConnectionHandler, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while handler.in_flight() > 0 {
        if Instant::now() >= deadline {
            warn!(
                target: PROCESS_TARGET,
                in_flight = handler.in_flight(),
                "requests still running at shutdown; removing their workspaces anyway"
            );
            return;
        }
        thread::sleep(DRAIN_POLL);
    }
}
