//! Background sweep that discards idle sessions.

use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use tracing::debug;

use kiln_session::SessionManager;

use crate::health::HealthReporter;

const REAPER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::reaper");

/// Handle to the running sweep thread.
///
/// Dropping the handle stops the sweep without waiting for it.
pub(crate) struct IdleReaper {
    stop: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl IdleReaper {
    /// Sweeps `sessions` every `interval`, reporting anything discarded.
    pub(crate) fn spawn(
        sessions: Arc<SessionManager>,
        reporter: Arc<dyn HealthReporter>,
        interval: Duration,
    ) -> io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name(String::from("kilnd-reaper"))
            .spawn(move || {
                debug!(
                    target: REAPER_TARGET,
                    interval_ms = interval.as_millis(),
                    "idle reaper started"
                );
                while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
                    let reaped = sessions.reap_idle();
                    if !reaped.is_empty() {
                        reporter.sessions_reaped(&reaped);
                    }
                }
                debug!(target: REAPER_TARGET, "idle reaper stopped");
            })?;
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Stops the sweep and waits for the thread to exit.
    ///
    /// Returns `false` if the sweep thread panicked.
    pub(crate) fn stop(mut self) -> bool {
        drop(self.stop.take());
        self.handle.take().is_none_or(|handle| handle.join().is_ok())
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        drop(self.stop.take());
    }
}
