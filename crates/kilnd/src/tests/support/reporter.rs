//! Test double for [`HealthReporter`] that records structured events.

use std::sync::Mutex;

use kiln_config::Config;
use kiln_session::SessionId;

use crate::bootstrap::BootstrapError;
use crate::health::HealthReporter;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    ToolchainDetected(String),
    ToolchainMissing,
    SessionsReaped(Vec<SessionId>),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn toolchain_detected(&self, name: &str) {
        self.record(HealthEvent::ToolchainDetected(name.to_owned()));
    }

    fn toolchain_missing(&self) {
        self.record(HealthEvent::ToolchainMissing);
    }

    fn sessions_reaped(&self, sessions: &[SessionId]) {
        self.record(HealthEvent::SessionsReaped(sessions.to_vec()));
    }
}
