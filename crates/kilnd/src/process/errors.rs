//! Everything that can stop `kilnd` from starting or shutting down cleanly.

use std::io;
use std::sync::Arc;

use ortho_config::OrthoError;
use thiserror::Error;

use kiln_config::SocketPreparationError;

use crate::bootstrap::BootstrapError;
use crate::transport::ListenerError;

use super::shutdown::ShutdownError;

/// Failure while launching or supervising the daemon.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The configuration layers could not be merged.
    #[error("configuration rejected: {source}")]
    Config {
        /// Loader error.
        #[from]
        source: Arc<OrthoError>,
    },
    /// The socket directory could not be created or secured.
    #[error("daemon socket directory unusable: {source}")]
    Socket {
        /// Filesystem error.
        #[from]
        source: SocketPreparationError,
    },
    /// Installing or waiting on the termination signals failed.
    #[error("shutdown signal handling failed: {source}")]
    Shutdown {
        /// Signal error.
        #[from]
        source: ShutdownError,
    },
    /// Configuration, telemetry or socket preparation failed during bootstrap.
    #[error("bootstrap failed: {source}")]
    Bootstrap {
        /// Bootstrap error.
        #[from]
        source: BootstrapError,
    },
    /// Binding or running the listener failed.
    #[error("listener failed: {source}")]
    Listener {
        /// Listener error.
        #[from]
        source: ListenerError,
    },
    /// No thread was available for the idle sweep.
    #[error("could not start the idle reaper: {source}")]
    Reaper {
        /// Spawn error.
        #[source]
        source: io::Error,
    },
    /// The idle sweep panicked before shutdown.
    #[error("idle reaper panicked")]
    ReaperPanic,
}
