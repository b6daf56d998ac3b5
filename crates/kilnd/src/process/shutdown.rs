//! Termination signals that end the daemon's serving phase.

use std::fmt;
use std::io;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use signal_hook::low_level::signal_name;
use thiserror::Error;

/// Signals that request a graceful stop.
const TERMINATION_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Why the daemon left its serving phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShutdownReason {
    /// A termination signal arrived.
    Signal(&'static str),
    /// The embedding code asked for a stop.
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(name) => formatter.write_str(name),
            Self::Requested => formatter.write_str("requested"),
        }
    }
}

/// Source of the stop request the launch sequence blocks on.
///
/// `arm` runs before the endpoint opens so that a signal arriving while
/// clients are already being served is never handled by the default
/// disposition.
pub(crate) trait ShutdownSignal: Send {
    /// Starts listening for the stop request.
    ///
    /// # Errors
    ///
    /// Fails when the notification mechanism cannot be installed.
    fn arm(&mut self) -> Result<(), ShutdownError>;

    /// Blocks until shutdown should proceed.
    ///
    /// # Errors
    ///
    /// Fails when the notification mechanism cannot be installed.
    fn wait(&mut self) -> Result<ShutdownReason, ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Waits for SIGTERM, SIGINT, SIGQUIT or SIGHUP.
#[derive(Default)]
pub(crate) struct SystemShutdownSignal {
    signals: Option<Signals>,
}

impl SystemShutdownSignal {
    pub(crate) const fn new() -> Self {
        Self { signals: None }
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn arm(&mut self) -> Result<(), ShutdownError> {
        if self.signals.is_none() {
            let signals = Signals::new(TERMINATION_SIGNALS)
                .map_err(|source| ShutdownError::Install { source })?;
            self.signals = Some(signals);
        }
        Ok(())
    }

    fn wait(&mut self) -> Result<ShutdownReason, ShutdownError> {
        self.arm()?;
        let received = self
            .signals
            .as_mut()
            .and_then(|signals| signals.forever().next());
        Ok(received
            .and_then(signal_name)
            .map_or(ShutdownReason::Requested, ShutdownReason::Signal))
    }
}
