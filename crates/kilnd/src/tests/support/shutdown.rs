//! Shutdown signal the test decides when to raise.

use std::sync::mpsc::{self, Receiver, Sender};

use crate::process::shutdown::{ShutdownError, ShutdownReason, ShutdownSignal};

/// Blocks `wait` until the paired sender fires or is dropped.
pub struct ManualShutdown {
    receiver: Receiver<()>,
    armed: bool,
}

impl ManualShutdown {
    pub fn new() -> (Sender<()>, Self) {
        let (sender, receiver) = mpsc::channel();
        let signal = Self {
            receiver,
            armed: false,
        };
        (sender, signal)
    }
}

impl ShutdownSignal for ManualShutdown {
    fn arm(&mut self) -> Result<(), ShutdownError> {
        self.armed = true;
        Ok(())
    }

    fn wait(&mut self) -> Result<ShutdownReason, ShutdownError> {
        assert!(self.armed, "shutdown must be armed before serving");
        self.receiver.recv().unwrap_or(());
        Ok(ShutdownReason::Requested)
    }
}
