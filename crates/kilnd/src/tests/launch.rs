//! End-to-end tests driving the full launch sequence over a Unix socket.

use std::io::{BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tempfile::TempDir;

use kiln_session::{SessionId, ToolchainRegistry};

use super::support::{
    BlockedSocketLoader, HealthEvent, ManualShutdown, RecordingHealthReporter, TestConfigLoader,
    fake_toolchains,
};
use crate::bootstrap::{ConfigLoader, StaticConfigLoader};
use crate::process::LaunchError;
use crate::process::launch::{LaunchPlan, ServiceDeps, run_daemon_with};

struct RunningDaemon {
    trigger: Sender<()>,
    handle: JoinHandle<Result<(), LaunchError>>,
}

impl RunningDaemon {
    fn stop(self) -> Result<(), LaunchError> {
        self.trigger.send(()).expect("signal shutdown");
        self.handle.join().expect("daemon thread panicked")
    }
}

fn launch(
    loader: StaticConfigLoader,
    reporter: Arc<RecordingHealthReporter>,
    toolchains: ToolchainRegistry,
) -> RunningDaemon {
    let (trigger, shutdown) = ManualShutdown::new();
    let plan = LaunchPlan {
        shutdown,
        drain_timeout: Duration::from_secs(2),
        services: ServiceDeps {
            loader,
            reporter,
            toolchains,
        },
    };
    let handle = thread::spawn(move || run_daemon_with(plan));
    RunningDaemon { trigger, handle }
}

fn connect(socket: &Path) -> UnixStream {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match UnixStream::connect(socket) {
            Ok(stream) => return stream,
            Err(error) => {
                assert!(
                    Instant::now() < deadline,
                    "daemon socket never accepted connections: {error}"
                );
                thread::sleep(Duration::from_millis(20));
            }
        }
    }
}

fn exchange(socket: &Path, request: &Value) -> Value {
    let mut stream = connect(socket);
    let mut line = serde_json::to_vec(request).expect("serialise request");
    line.push(b'\n');
    stream.write_all(&line).expect("write request");
    stream.shutdown(Shutdown::Write).expect("half close");

    let mut reply = String::new();
    BufReader::new(stream)
        .read_line(&mut reply)
        .expect("read reply");
    serde_json::from_str(&reply).expect("reply should be JSON")
}

fn create_session(socket: &Path) -> String {
    let reply = exchange(socket, &json!({ "operation": "create-session" }));
    reply["sessionId"]
        .as_str()
        .expect("session reply carries an id")
        .to_owned()
}

#[test]
fn daemon_serves_sessions_and_cleans_up_on_shutdown() {
    let loader = TestConfigLoader::new();
    let toolchain_dir = TempDir::new().expect("toolchain dir");
    let reporter = Arc::new(RecordingHealthReporter::default());
    let daemon = launch(
        StaticConfigLoader::new(loader.config()),
        Arc::clone(&reporter),
        fake_toolchains(toolchain_dir.path()),
    );

    let socket = loader.socket_path();
    let id = create_session(&socket);
    let compiled = exchange(
        &socket,
        &json!({ "operation": "compile", "sessionId": id, "code": "cat" }),
    );
    assert_eq!(compiled["succeeded"], true, "compile reply: {compiled:?}");

    let ran = exchange(
        &socket,
        &json!({ "operation": "run", "sessionId": id, "stdin": "echoed back" }),
    );
    assert_eq!(ran["kind"], "run");
    assert!(
        ran["output"]
            .as_str()
            .is_some_and(|output| output.contains("echoed back")),
        "run reply: {ran:?}"
    );
    assert!(loader.scratch_root().join(&id).is_dir());

    daemon.stop().expect("daemon should stop cleanly");

    assert!(!loader.scratch_root().join(&id).exists());
    assert!(!socket.exists(), "socket file should be removed on shutdown");
    assert!(
        reporter
            .events()
            .contains(&HealthEvent::ToolchainDetected(String::from("fakecc")))
    );
}

#[test]
fn idle_sessions_are_reaped_while_running() {
    let loader = TestConfigLoader::new().with_reaping();
    let toolchain_dir = TempDir::new().expect("toolchain dir");
    let reporter = Arc::new(RecordingHealthReporter::default());
    let daemon = launch(
        StaticConfigLoader::new(loader.config()),
        Arc::clone(&reporter),
        fake_toolchains(toolchain_dir.path()),
    );

    let socket = loader.socket_path();
    let id = create_session(&socket);
    let expected = HealthEvent::SessionsReaped(vec![SessionId::from(id.as_str())]);

    let deadline = Instant::now() + Duration::from_secs(10);
    while !reporter.events().contains(&expected) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
    assert!(
        reporter.events().contains(&expected),
        "events: {:?}",
        reporter.events()
    );
    assert!(!loader.scratch_root().join(&id).exists());

    let reply = exchange(
        &socket,
        &json!({ "operation": "run", "sessionId": id, "stdin": "" }),
    );
    assert_eq!(reply["error"], "unknown_session");

    daemon.stop().expect("daemon should stop cleanly");
}

/// A program that leaves a detached process holding its output pipes must
/// not keep the daemon from shutting down.
#[cfg(target_os = "linux")]
#[test]
fn shutdown_completes_while_a_run_is_in_flight() {
    let loader = TestConfigLoader::new();
    let toolchain_dir = TempDir::new().expect("toolchain dir");
    let marker = toolchain_dir.path().join("running");
    let daemon = launch(
        StaticConfigLoader::new(loader.config()),
        Arc::new(RecordingHealthReporter::default()),
        fake_toolchains(toolchain_dir.path()),
    );

    let socket = loader.socket_path();
    let id = create_session(&socket);
    let program = format!(
        "touch '{}'; setsid sleep 5 & echo started",
        marker.display()
    );
    let compiled = exchange(
        &socket,
        &json!({ "operation": "compile", "sessionId": id, "code": program }),
    );
    assert_eq!(compiled["succeeded"], true, "compile reply: {compiled:?}");

    let run_socket = socket.clone();
    let run_id = id.clone();
    let client = thread::spawn(move || {
        exchange(&run_socket, &json!({ "operation": "run", "sessionId": run_id }))
    });
    let deadline = Instant::now() + Duration::from_secs(5);
    while !marker.exists() {
        assert!(Instant::now() < deadline, "program never started");
        thread::sleep(Duration::from_millis(10));
    }

    let started = Instant::now();
    let (done, stopped) = mpsc::channel();
    thread::spawn(move || drop(done.send(daemon.stop())));
    stopped
        .recv_timeout(Duration::from_secs(10))
        .expect("shutdown should not hang on the in-flight run")
        .expect("daemon should stop cleanly");
    assert!(started.elapsed() < Duration::from_secs(5));

    let reply = client.join().expect("client thread");
    assert_eq!(reply["kind"], "run");
    assert_eq!(reply["succeeded"], false);
    assert_eq!(reply["error"], "timeout");
    assert!(
        reply["output"]
            .as_str()
            .is_some_and(|output| output.contains("started")),
        "run reply: {reply:?}"
    );
    assert!(!loader.scratch_root().join(&id).exists());
}

#[test]
fn launch_fails_when_socket_directory_is_blocked() {
    let loader = BlockedSocketLoader::new();
    let config = loader.load().expect("blocked loader still yields config");
    let (_trigger, shutdown) = ManualShutdown::new();
    let plan = LaunchPlan {
        shutdown,
        drain_timeout: Duration::from_millis(100),
        services: ServiceDeps {
            loader: StaticConfigLoader::new(config),
            reporter: Arc::new(RecordingHealthReporter::default()),
            toolchains: ToolchainRegistry::empty(),
        },
    };

    let error = run_daemon_with(plan).expect_err("launch should fail");
    assert!(matches!(error, LaunchError::Socket { .. }), "error: {error:?}");
}
