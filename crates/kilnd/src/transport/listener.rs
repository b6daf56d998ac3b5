//! Accept loop serving the daemon endpoint.
//!
//! The listening socket is polled in non-blocking mode so the loop notices a
//! shutdown request within [`ACCEPT_BACKOFF`]. Accepted streams are switched
//! back to blocking mode with a read deadline and served on their own named
//! thread.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use kiln_config::SocketEndpoint;

use super::{ConnectionHandler, ConnectionStream, LISTENER_TARGET, ListenerError};

#[cfg(unix)]
use std::os::unix::net::UnixListener;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// How long a connection may sit without sending its request line.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl ListenerKind {
    fn set_nonblocking(&self) -> io::Result<()> {
        match self {
            Self::Tcp(listener) => listener.set_nonblocking(true),
            #[cfg(unix)]
            Self::Unix(listener) => listener.set_nonblocking(true),
        }
    }

    /// Returns `Ok(None)` when no client is waiting.
    fn accept(&self) -> io::Result<Option<ConnectionStream>> {
        let accepted = match self {
            Self::Tcp(listener) => listener
                .accept()
                .map(|(stream, _)| ConnectionStream::Tcp(stream)),
            #[cfg(unix)]
            Self::Unix(listener) => listener
                .accept()
                .map(|(stream, _)| ConnectionStream::Unix(stream)),
        };
        match accepted {
            Ok(stream) => Ok(Some(stream)),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }
}

/// Listener bound to the daemon endpoint but not yet accepting.
#[derive(Debug)]
pub(crate) struct SocketListener {
    endpoint: SocketEndpoint,
    listener: ListenerKind,
    read_timeout: Duration,
}

impl SocketListener {
    /// Binds `endpoint`.
    ///
    /// A Unix socket file left behind by a dead daemon is replaced; one that
    /// still answers is reported as in use.
    pub(crate) fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let listener = match endpoint {
            SocketEndpoint::Tcp { host, port } => ListenerKind::Tcp(bind_tcp(host, *port)?),
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => {
                ListenerKind::Unix(unix::bind(path.as_std_path())?)
            }
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => {
                return Err(ListenerError::UnsupportedUnix {
                    endpoint: endpoint.to_string(),
                });
            }
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            listener,
            read_timeout: REQUEST_READ_TIMEOUT,
        })
    }

    /// Overrides the per-connection read deadline.
    #[cfg(test)]
    pub(crate) fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    #[cfg(test)]
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            ListenerKind::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            ListenerKind::Unix(_) => None,
        }
    }

    /// Starts accepting on a background thread.
    ///
    /// # Errors
    ///
    /// Fails when the socket cannot be made non-blocking or the accept
    /// thread cannot be spawned. A Unix socket file is removed in both cases.
    pub(crate) fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<ListenerHandle, ListenerError> {
        if let Err(source) = self.listener.set_nonblocking() {
            self.remove_socket_file();
            return Err(ListenerError::NonBlocking { source });
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let endpoint = self.endpoint.clone();
        let spawned = thread::Builder::new()
            .name(String::from("kilnd-listener"))
            .spawn(move || self.serve(&stop_flag, &handler));
        match spawned {
            Ok(thread) => Ok(ListenerHandle {
                stop,
                thread: Some(thread),
            }),
            Err(source) => {
                #[cfg(unix)]
                unix::remove_socket_file(&endpoint);
                #[cfg(not(unix))]
                drop(endpoint);
                Err(ListenerError::Spawn { source })
            }
        }
    }

    fn serve(&self, stop: &AtomicBool, handler: &Arc<dyn ConnectionHandler>) {
        info!(
            target: LISTENER_TARGET,
            endpoint = %self.endpoint,
            read_timeout_ms = self.read_timeout.as_millis(),
            "socket listener active"
        );
        let mut last_error = None::<io::ErrorKind>;
        while !stop.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok(Some(stream)) => {
                    last_error = None;
                    self.dispatch(stream, handler);
                }
                Ok(None) => thread::sleep(ACCEPT_BACKOFF),
                Err(error) => {
                    let kind = error.kind();
                    if last_error != Some(kind) {
                        warn!(target: LISTENER_TARGET, %error, "socket accept error");
                    }
                    last_error = Some(kind);
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }
        self.remove_socket_file();
        info!(target: LISTENER_TARGET, "socket listener stopped");
    }

    fn dispatch(&self, stream: ConnectionStream, handler: &Arc<dyn ConnectionHandler>) {
        if let Err(error) = stream.prepare(self.read_timeout) {
            warn!(target: LISTENER_TARGET, %error, "dropping connection that could not be configured");
            return;
        }
        debug!(
            target: LISTENER_TARGET,
            transport = stream.transport(),
            "connection accepted"
        );
        let handler = Arc::clone(handler);
        let spawned = thread::Builder::new()
            .name(String::from("kilnd-conn"))
            .spawn(move || handler.handle(stream));
        if let Err(error) = spawned {
            warn!(target: LISTENER_TARGET, %error, "dropping connection; no thread to serve it");
        }
    }

    fn remove_socket_file(&self) {
        #[cfg(unix)]
        unix::remove_socket_file(&self.endpoint);
    }
}

/// Handle to the running accept loop.
///
/// Dropping the handle asks the loop to stop without waiting for it.
pub(crate) struct ListenerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Stops accepting and waits for the loop to exit.
    ///
    /// Connections already accepted keep running on their own threads.
    pub(crate) fn stop(mut self) -> Result<(), ListenerError> {
        self.stop.store(true, Ordering::SeqCst);
        self.thread.take().map_or(Ok(()), |thread| {
            thread.join().map_err(|_| ListenerError::ThreadPanic)
        })
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let addr: SocketAddr = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?
        .next()
        .ok_or_else(|| ListenerError::ResolveEmpty {
            host: host.to_owned(),
            port,
        })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}

#[cfg(unix)]
mod unix {
    use std::fs;
    use std::io;
    use std::os::unix::fs::FileTypeExt;
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::Path;

    use tracing::{info, warn};

    use kiln_config::SocketEndpoint;

    use super::super::{LISTENER_TARGET, ListenerError};

    /// Binds `path`, clearing a stale socket file first.
    pub(super) fn bind(path: &Path) -> Result<UnixListener, ListenerError> {
        let shown = || path.display().to_string();
        match fs::symlink_metadata(path) {
            Ok(metadata) if !metadata.file_type().is_socket() => {
                return Err(ListenerError::UnixNotSocket { path: shown() });
            }
            Ok(_) => clear_stale(path)?,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ListenerError::UnixMetadata {
                    path: shown(),
                    source,
                });
            }
        }
        UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
            path: shown(),
            source,
        })
    }

    fn clear_stale(path: &Path) -> Result<(), ListenerError> {
        match UnixStream::connect(path) {
            Ok(_live) => Err(ListenerError::UnixInUse {
                path: path.display().to_string(),
            }),
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                info!(
                    target: LISTENER_TARGET,
                    path = %path.display(),
                    "replacing stale unix socket"
                );
                fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
                    path: path.display().to_string(),
                    source,
                })
            }
            Err(source) => Err(ListenerError::UnixConnect {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub(super) fn remove_socket_file(endpoint: &SocketEndpoint) {
        let Some(path) = endpoint.unix_path() else {
            return;
        };
        if let Err(error) = fs::remove_file(path.as_std_path())
            && error.kind() != io::ErrorKind::NotFound
        {
            warn!(
                target: LISTENER_TARGET,
                %error,
                %path,
                "failed to remove unix socket file"
            );
        }
    }
}
