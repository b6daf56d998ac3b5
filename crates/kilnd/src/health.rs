//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;

use kiln_config::Config;
use kiln_session::SessionId;

use crate::bootstrap::BootstrapError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
#[cfg_attr(test, mockall::automock)]
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked when start-up found a usable C toolchain.
    fn toolchain_detected(&self, name: &str);

    /// Invoked when start-up found no usable C toolchain.
    fn toolchain_missing(&self);

    /// Invoked after an idle sweep discarded one or more sessions.
    fn sessions_reaped(&self, sessions: &[SessionId]);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn toolchain_detected(&self, name: &str) {
        (**self).toolchain_detected(name);
    }

    fn toolchain_missing(&self) {
        (**self).toolchain_missing();
    }

    fn sessions_reaped(&self, sessions: &[SessionId]) {
        (**self).sessions_reaped(sessions);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            socket = %config.daemon_socket(),
            scratch_root = %config.scratch_root(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            compile_timeout_ms = config.compile_timeout_ms,
            run_timeout_ms = config.run_timeout_ms,
            "daemon bootstrap completed"
        );
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "unsandboxed_execution",
            "submitted programs run with daemon privileges; kiln is not a sandbox"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn toolchain_detected(&self, name: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "toolchain_detected",
            toolchain = name,
            "C toolchain available"
        );
    }

    fn toolchain_missing(&self) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "toolchain_missing",
            "no C toolchain found; compile requests will fail until one is installed"
        );
    }

    fn sessions_reaped(&self, sessions: &[SessionId]) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "sessions_reaped",
            count = sessions.len(),
            sessions = ?sessions,
            "idle sessions discarded"
        );
    }
}
