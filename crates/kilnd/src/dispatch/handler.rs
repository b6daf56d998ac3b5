//! Connection handler that dispatches JSONL session requests.

use std::io::{self, Read};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, error, warn};

use kiln_session::SessionManager;

use crate::transport::{ConnectionHandler, ConnectionStream};

use super::errors::DispatchError;
use super::request::SessionRequest;
use super::response::{DaemonReply, ResponseWriter};
use super::router::{DISPATCH_TARGET, SessionRouter};

/// Maximum size of a single request line in bytes.
pub(crate) const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Connection handler that parses and dispatches one request per connection.
///
/// The handler blocks its connection thread for the whole compile or run;
/// other connections are served by their own threads.
#[derive(Debug)]
pub struct DispatchConnectionHandler {
    router: SessionRouter,
    in_flight: AtomicUsize,
}

impl DispatchConnectionHandler {
    /// Creates a handler serving `sessions`.
    pub const fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            router: SessionRouter::new(sessions),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Connections currently being served.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn dispatch(&self, mut stream: ConnectionStream) {
        let request_bytes = match read_request_line(&mut stream) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(target: DISPATCH_TARGET, "client disconnected without request");
                return;
            }
            Err(error) => {
                warn!(target: DISPATCH_TARGET, %error, "failed to read request");
                report(&mut ResponseWriter::new(&mut stream), &error);
                return;
            }
        };

        let mut writer = ResponseWriter::new(&mut stream);

        let request = match SessionRequest::parse(&request_bytes) {
            Ok(request) => request,
            Err(error) => {
                warn!(target: DISPATCH_TARGET, %error, "malformed request");
                report(&mut writer, &error);
                return;
            }
        };

        if let Err(error) = request.validate() {
            warn!(
                target: DISPATCH_TARGET,
                operation = request.operation(),
                %error,
                "invalid request"
            );
            report(&mut writer, &error);
            return;
        }

        debug!(
            target: DISPATCH_TARGET,
            operation = request.operation(),
            "dispatching request"
        );

        let reply = panic::catch_unwind(AssertUnwindSafe(|| self.router.route(&request)))
            .unwrap_or_else(|_| {
                error!(
                    target: DISPATCH_TARGET,
                    operation = request.operation(),
                    "operation panicked"
                );
                DaemonReply::dispatch_error(&DispatchError::internal("operation panicked"))
            });

        if let Err(error) = writer.write_reply(&reply) {
            warn!(target: DISPATCH_TARGET, %error, "failed to write reply");
        }
    }
}

impl ConnectionHandler for DispatchConnectionHandler {
    fn handle(&self, stream: ConnectionStream) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.dispatch(stream);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn report(writer: &mut ResponseWriter<&mut ConnectionStream>, error: &DispatchError) {
    if let Err(write_error) = writer.write_error(error) {
        debug!(target: DISPATCH_TARGET, error = %write_error, "failed to write error reply");
    }
}

/// Reads a bounded JSONL request line from the stream.
///
/// Returns `Ok(None)` if the client disconnects without sending data and
/// the partial line if it disconnects mid-line.
fn read_request_line(stream: &mut ConnectionStream) -> Result<Option<Vec<u8>>, DispatchError> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];

    loop {
        let bytes_read = read_with_retry(stream, &mut chunk)?;
        let Some(received) = chunk.get(..bytes_read).filter(|bytes| !bytes.is_empty()) else {
            return Ok((!buffer.is_empty()).then_some(buffer));
        };

        if let Some(newline) = received.iter().position(|b| *b == b'\n') {
            buffer.extend(received.iter().take(newline + 1));
            enforce_limit(buffer.len())?;
            return Ok(Some(buffer));
        }

        buffer.extend_from_slice(received);
        enforce_limit(buffer.len())?;
    }
}

fn read_with_retry(stream: &mut ConnectionStream, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match stream.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

fn enforce_limit(size: usize) -> Result<(), DispatchError> {
    if size > MAX_REQUEST_BYTES {
        return Err(DispatchError::request_too_large(size, MAX_REQUEST_BYTES));
    }
    Ok(())
}
