//! Supervised child processes with wall-clock budgets and capped capture.
//!
//! [`SystemCommandRunner`] is the single place where the service launches
//! other programs: compiler probes, compilations and user binaries all go
//! through [`CommandRunner::run`]. Each child is started in its own process
//! group so that a timeout, or the end of the run, can signal the whole
//! group with `SIGKILL` and leave no descendants behind. Standard output and
//! standard error are drained on helper threads into bounded buffers; input
//! is fed from a separate thread so a child that never reads cannot wedge
//! the supervisor. A descendant that leaves the group can keep the output
//! pipes open indefinitely, so collection is bounded too: past the budget
//! plus [`PIPE_GRACE`] the capture so far is returned as a timeout.

mod capture;

use std::ffi::{OsStr, OsString};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

pub use self::capture::CapturedStream;
use self::capture::{CaptureHandle, Collected, spawn_capture};
use crate::error::SessionError;

/// Tracing target for process supervision.
const PROCESS_TARGET: &str = "kiln_session::process";

/// Interval between `try_wait` polls while a child is running.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long output pipes may stay open past the budget before capture is
/// abandoned.
pub(crate) const PIPE_GRACE: Duration = Duration::from_millis(200);

/// Marker appended to a stream that hit the capture cap.
pub const TRUNCATION_MARKER: &str = "[output truncated]";

/// Launches programs and reports how they ended.
///
/// Implementations must never leave a child running past the returned
/// outcome.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion or until its budget expires.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Spawn`] when the program cannot be started and
    /// [`SessionError::Supervision`] when waiting on it fails.
    fn run(&self, spec: &CommandSpec) -> Result<ProcessOutcome, SessionError>;
}

/// Description of a single child process launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: OsString,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
}

impl CommandSpec {
    /// Starts a spec for `program` with the given wall-clock budget.
    #[must_use]
    pub fn new(program: impl Into<OsString>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            stdin: None,
            timeout,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory of the child.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Supplies bytes written to the child's standard input.
    ///
    /// Without this the child's standard input is `/dev/null`.
    #[must_use]
    pub fn stdin_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    /// Program to execute.
    #[must_use]
    pub fn program(&self) -> &OsStr {
        &self.program
    }

    /// Arguments passed to the program.
    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Working directory, when one was set.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// Input bytes, when any were supplied.
    #[must_use]
    pub fn input(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    /// Wall-clock budget.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    fn display_program(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

/// How a child process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The process exited with a status code.
    Exited(i32),
    /// The process was terminated by the named signal, e.g. `SIGKILL`.
    Signalled(String),
}

/// Captured result of a supervised child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    termination: Termination,
    stdout: CapturedStream,
    stderr: CapturedStream,
    timed_out: bool,
    elapsed: Duration,
}

impl ProcessOutcome {
    /// Assembles an outcome from its parts.
    #[must_use]
    pub const fn new(
        termination: Termination,
        stdout: CapturedStream,
        stderr: CapturedStream,
        timed_out: bool,
        elapsed: Duration,
    ) -> Self {
        Self {
            termination,
            stdout,
            stderr,
            timed_out,
            elapsed,
        }
    }

    /// How the process ended.
    #[must_use]
    pub const fn termination(&self) -> &Termination {
        &self.termination
    }

    /// Exit code, absent when the process was killed by a signal.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited(code) => Some(code),
            Termination::Signalled(_) => None,
        }
    }

    /// Terminating signal name, absent when the process exited normally.
    #[must_use]
    pub fn terminating_signal(&self) -> Option<&str> {
        match &self.termination {
            Termination::Exited(_) => None,
            Termination::Signalled(name) => Some(name),
        }
    }

    /// Captured standard output.
    #[must_use]
    pub const fn stdout(&self) -> &CapturedStream {
        &self.stdout
    }

    /// Captured standard error.
    #[must_use]
    pub const fn stderr(&self) -> &CapturedStream {
        &self.stderr
    }

    /// Whether the budget expired, either for the process itself or for
    /// output still arriving through pipes a detached process held open.
    #[must_use]
    pub const fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Wall-clock time between spawn and reap.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// `true` when the process exited with status zero within its budget.
    #[must_use]
    pub const fn success(&self) -> bool {
        !self.timed_out && matches!(self.termination, Termination::Exited(0))
    }
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy)]
pub struct SystemCommandRunner {
    max_output_bytes: usize,
}

impl SystemCommandRunner {
    /// Creates a runner that keeps at most `max_output_bytes` per stream.
    #[must_use]
    pub const fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<ProcessOutcome, SessionError> {
        let program = spec.display_program();
        let mut command = build_command(spec);

        debug!(
            target: PROCESS_TARGET,
            program = %program,
            args = spec.args.len(),
            timeout_ms = millis(spec.timeout),
            "spawning child process"
        );

        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|source| SessionError::spawn(program.as_str(), source))?;
        let pid = child.id();

        let stdout = spawn_capture(child.stdout.take(), self.max_output_bytes);
        let stderr = spawn_capture(child.stderr.take(), self.max_output_bytes);
        // The feeder is never joined: it may block on a pipe held by a
        // descendant that escaped the group.
        if let Some((pipe, bytes)) = child.stdin.take().zip(spec.stdin.clone()) {
            spawn_feeder(pipe, bytes);
        }

        let waited = wait_with_deadline(&mut child, pid, spec.timeout);
        let (status, budget_expired) = match waited {
            Ok(result) => result,
            Err(source) => {
                drop(child.kill());
                drop(child.wait());
                return Err(SessionError::supervision(program, source));
            }
        };

        let drain_deadline = (started + spec.timeout).max(Instant::now()) + PIPE_GRACE;
        let (stdout, stdout_open) = collect_capture(&program, stdout, drain_deadline)?;
        let (stderr, stderr_open) = collect_capture(&program, stderr, drain_deadline)?;
        let elapsed = started.elapsed();
        let pipes_held = stdout_open || stderr_open;
        if pipes_held {
            warn!(
                target: PROCESS_TARGET,
                program = %program,
                pid,
                elapsed_ms = millis(elapsed),
                "output pipes held open past the budget by a detached process; capture abandoned"
            );
        }
        let timed_out = budget_expired || pipes_held;
        let termination = termination_of(status);

        if budget_expired {
            warn!(
                target: PROCESS_TARGET,
                program = %program,
                pid,
                elapsed_ms = millis(elapsed),
                "child exceeded its budget; process group killed"
            );
        } else {
            debug!(
                target: PROCESS_TARGET,
                program = %program,
                pid,
                ?termination,
                elapsed_ms = millis(elapsed),
                stdout_bytes = stdout.len(),
                stderr_bytes = stderr.len(),
                "child process finished"
            );
        }

        Ok(ProcessOutcome::new(
            termination,
            stdout,
            stderr,
            timed_out,
            elapsed,
        ))
    }
}

fn build_command(spec: &CommandSpec) -> Command {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
    if let Some(dir) = &spec.current_dir {
        command.current_dir(dir);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command
}

/// Polls the child until it exits or the deadline passes.
///
/// Either way the process group is killed before the leader is reaped, so
/// the group id still belongs to this child when the signal is sent. The
/// returned flag is `true` exactly when the budget ran out.
fn wait_with_deadline(
    child: &mut Child,
    pid: u32,
    timeout: Duration,
) -> io::Result<(ExitStatus, bool)> {
    let started = Instant::now();
    loop {
        if let Some(status) = reap_if_exited(child, pid)? {
            return Ok((status, false));
        }
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            kill_group(pid);
            drop(child.kill());
            let status = child.wait()?;
            return Ok((status, true));
        }
        thread::sleep(POLL_INTERVAL.min(timeout.saturating_sub(elapsed)));
    }
}

/// Reaps the leader if it has exited, sweeping its group first.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn reap_if_exited(child: &mut Child, pid: u32) -> io::Result<Option<ExitStatus>> {
    if !leader_exited(pid)? {
        return Ok(None);
    }
    // The unreaped leader pins its pid, and with it the group id.
    kill_group(pid);
    child.wait().map(Some)
}

/// Without a non-reaping wait the group cannot be signalled safely after the
/// leader exits, so background descendants are left alone.
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn reap_if_exited(child: &mut Child, _pid: u32) -> io::Result<Option<ExitStatus>> {
    child.try_wait()
}

/// Reports whether `pid` has exited while leaving it a zombie.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn leader_exited(pid: u32) -> io::Result<bool> {
    use nix::errno::Errno;
    use nix::sys::wait::{Id, WaitPidFlag, WaitStatus, waitid};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(io::Error::other)?;
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
    match waitid(Id::Pid(Pid::from_raw(raw)), flags) {
        Ok(WaitStatus::StillAlive) | Err(Errno::EINTR) => Ok(false),
        Ok(_) => Ok(true),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

fn spawn_feeder(mut pipe: ChildStdin, bytes: Vec<u8>) {
    thread::spawn(move || {
        // A child that exits without reading closes the pipe; that is not a
        // supervision failure.
        if let Err(error) = pipe.write_all(&bytes).and_then(|()| pipe.flush()) {
            debug!(
                target: PROCESS_TARGET,
                %error,
                "child stopped accepting input"
            );
        }
    });
}

/// Collects one stream, reporting whether its pipe was still open.
fn collect_capture(
    program: &str,
    handle: Option<CaptureHandle>,
    deadline: Instant,
) -> Result<(CapturedStream, bool), SessionError> {
    let Some(handle) = handle else {
        return Ok((CapturedStream::default(), false));
    };
    match handle.collect(deadline) {
        Collected::Closed(stream) => Ok((stream, false)),
        Collected::StillOpen(stream) => Ok((stream, true)),
        Collected::Failed(source) => Err(SessionError::supervision(program, source)),
        Collected::Lost => Err(SessionError::CaptureThread {
            program: program.to_owned(),
        }),
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    // ESRCH means the group is already empty.
    drop(killpg(Pid::from_raw(raw), Signal::SIGKILL));
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

fn termination_of(status: ExitStatus) -> Termination {
    if let Some(code) = status.code() {
        return Termination::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Termination::Signalled(signal_name(signal));
        }
    }
    Termination::Signalled(String::from("unknown"))
}

#[cfg(unix)]
fn signal_name(raw: i32) -> String {
    nix::sys::signal::Signal::try_from(raw)
        .map_or_else(|_| format!("signal {raw}"), |signal| signal.as_str().to_owned())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
