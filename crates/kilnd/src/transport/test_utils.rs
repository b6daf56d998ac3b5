//! Connection handler double for listener tests.

use std::sync::{Arc, Mutex};

use super::{ConnectionHandler, ConnectionStream};

/// Shared log of the transports that delivered connections.
pub(crate) type ServedLog = Arc<Mutex<Vec<&'static str>>>;

/// Handler that records each connection's transport and closes it.
pub(crate) struct CountingHandler {
    served: ServedLog,
}

impl CountingHandler {
    pub(crate) fn new() -> (ServedLog, Arc<Self>) {
        let served = ServedLog::default();
        let handler = Arc::new(Self {
            served: Arc::clone(&served),
        });
        (served, handler)
    }
}

impl ConnectionHandler for CountingHandler {
    fn handle(&self, stream: ConnectionStream) {
        let transport = stream.transport();
        drop(stream);
        self.served
            .lock()
            .expect("served log poisoned")
            .push(transport);
    }
}
