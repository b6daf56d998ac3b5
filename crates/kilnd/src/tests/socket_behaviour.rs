//! Behavioural tests for the daemon endpoint listener.

use std::cell::RefCell;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use kiln_config::SocketEndpoint;

use crate::transport::{
    CountingHandler, ListenerError, ListenerHandle, ServedLog, SocketListener,
};

/// Where clients reach the listener under test.
enum Target {
    Tcp(Option<SocketAddr>),
    Unix(PathBuf),
}

struct EndpointWorld {
    dir: TempDir,
    endpoint: SocketEndpoint,
    target: Target,
    handle: Option<ListenerHandle>,
    served: ServedLog,
    failure: Option<ListenerError>,
    reserved: Option<TcpListener>,
}

impl EndpointWorld {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
            endpoint: SocketEndpoint::tcp("127.0.0.1", 0),
            target: Target::Tcp(None),
            handle: None,
            served: ServedLog::default(),
            failure: None,
            reserved: None,
        }
    }

    fn socket_path(&self) -> PathBuf {
        self.dir.path().join("kilnd.sock")
    }

    fn use_unix_socket(&mut self) {
        let path = self.socket_path();
        self.endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 socket path"));
        self.target = Target::Unix(path);
    }

    fn occupy_tcp_port(&mut self) {
        let reserved = TcpListener::bind(("127.0.0.1", 0)).expect("reserve port");
        let port = reserved.local_addr().expect("reserved addr").port();
        self.endpoint = SocketEndpoint::tcp("127.0.0.1", port);
        self.reserved = Some(reserved);
    }

    fn start(&mut self) {
        let (served, handler) = CountingHandler::new();
        self.served = served;
        let started = SocketListener::bind(&self.endpoint).and_then(|listener| {
            if let Target::Tcp(addr) = &mut self.target {
                *addr = listener.local_addr();
            }
            listener.start(handler)
        });
        match started {
            Ok(handle) => self.handle = Some(handle),
            Err(error) => self.failure = Some(error),
        }
    }

    fn connect(&self) {
        match &self.target {
            Target::Tcp(addr) => {
                let addr = addr.expect("listener address should be known");
                TcpStream::connect(addr).expect("connect tcp client");
            }
            Target::Unix(path) => {
                UnixStream::connect(path).expect("connect unix client");
            }
        }
    }

    fn wait_for_served(&self, expected: usize) -> Vec<&'static str> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let served = self.served.lock().expect("served log poisoned").clone();
            if served.len() >= expected || Instant::now() >= deadline {
                return served;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for EndpointWorld {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            drop(handle.stop());
        }
    }
}

#[fixture]
fn world() -> RefCell<EndpointWorld> {
    RefCell::new(EndpointWorld::new())
}

#[given("a loopback TCP endpoint")]
fn given_tcp_endpoint(world: &RefCell<EndpointWorld>) {
    assert!(matches!(world.borrow().target, Target::Tcp(_)));
}

#[given("a Unix socket endpoint")]
fn given_unix_endpoint(world: &RefCell<EndpointWorld>) {
    world.borrow_mut().use_unix_socket();
}

#[given("a socket file left behind by a crashed daemon")]
fn given_stale_socket(world: &RefCell<EndpointWorld>) {
    let path = world.borrow().socket_path();
    drop(UnixListener::bind(&path).expect("bind stale socket"));
    assert!(path.exists());
}

#[given("another process holds the TCP port")]
fn given_port_taken(world: &RefCell<EndpointWorld>) {
    world.borrow_mut().occupy_tcp_port();
}

#[when("the listener starts")]
fn when_listener_starts(world: &RefCell<EndpointWorld>) {
    world.borrow_mut().start();
}

#[when("{count} clients connect")]
fn when_clients_connect(world: &RefCell<EndpointWorld>, count: usize) {
    for _ in 0..count {
        world.borrow().connect();
    }
}

#[when("the listener stops")]
fn when_listener_stops(world: &RefCell<EndpointWorld>) {
    let handle = world.borrow_mut().handle.take().expect("listener running");
    handle.stop().expect("stop listener");
}

#[then("the listener is running")]
fn then_running(world: &RefCell<EndpointWorld>) {
    let world = world.borrow();
    assert!(
        world.handle.is_some(),
        "listener failed to start: {:?}",
        world.failure
    );
}

#[then(r#"{count} connections are served over "{transport}""#)]
fn then_connections_served(world: &RefCell<EndpointWorld>, count: usize, transport: String) {
    let served = world.borrow().wait_for_served(count);
    assert_eq!(served.len(), count, "served: {served:?}");
    assert!(served.iter().all(|kind| *kind == transport), "served: {served:?}");
}

#[then("the socket file is gone")]
fn then_socket_removed(world: &RefCell<EndpointWorld>) {
    assert!(!world.borrow().socket_path().exists());
}

#[then("starting fails with a bind error")]
fn then_bind_error(world: &RefCell<EndpointWorld>) {
    let world = world.borrow();
    assert!(
        matches!(world.failure, Some(ListenerError::BindTcp { .. })),
        "unexpected outcome: {:?}",
        world.failure
    );
}

#[scenario(path = "tests/features/daemon_socket.feature")]
fn daemon_socket(#[from(world)] world: RefCell<EndpointWorld>) {
    drop(world);
}
