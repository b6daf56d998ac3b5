//! Lifecycle tests against the fake toolchain and real child processes.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};

use super::*;
use crate::compiler::NO_TOOLCHAIN_MESSAGE;
use crate::session::SessionState;
use crate::tests::TestHarness;

#[fixture]
fn harness() -> TestHarness {
    TestHarness::new()
}

fn new_session(harness: &TestHarness) -> SessionId {
    harness.manager().create_session().expect("create session")
}

#[rstest]
fn compile_then_run_prints_greeting(harness: TestHarness) {
    let id = new_session(&harness);

    let compiled = harness.manager().compile(&id, "echo hello");
    assert!(compiled.succeeded(), "{}", compiled.message());
    assert_eq!(compiled.message(), "Compilation successful.");

    let ran = harness.manager().run(&id, "");
    assert!(ran.succeeded());
    assert_eq!(ran.message(), "hello\n");
}

#[rstest]
fn program_reads_supplied_input(harness: TestHarness) {
    let id = new_session(&harness);
    let reply = harness
        .manager()
        .compile_and_run(&id, "read line; echo \"$line\"", "ping\n");

    assert!(reply.succeeded());
    assert!(reply.message().contains("ping"));
}

#[rstest]
fn run_before_compile_reports_missing_program(harness: TestHarness) {
    let id = new_session(&harness);
    let reply = harness.manager().run(&id, "");

    assert!(!reply.succeeded());
    assert_eq!(reply.error(), Some(ErrorKind::NoArtifact));
    assert_eq!(reply.message(), "No compiled program found for this session.");
}

#[rstest]
#[case("not-a-session")]
#[case("../escape")]
fn unknown_sessions_are_rejected(harness: TestHarness, #[case] id: &str) {
    let reply = harness.manager().compile(&SessionId::from(id), "echo hi");
    assert_eq!(reply.error(), Some(ErrorKind::UnknownSession));
    assert_eq!(reply.message(), "Invalid sessionId");
}

#[rstest]
fn recompiling_replaces_the_program(harness: TestHarness) {
    let id = new_session(&harness);
    assert!(harness.manager().compile(&id, "echo A").succeeded());
    assert!(harness.manager().compile(&id, "echo B").succeeded());

    assert_eq!(harness.manager().run(&id, "").message(), "B\n");
}

#[rstest]
fn failed_compile_discards_previous_program(harness: TestHarness) {
    let id = new_session(&harness);
    assert!(harness.manager().compile(&id, "echo old").succeeded());

    let rejected = harness.manager().compile(&id, "#error nope");
    assert!(!rejected.succeeded());
    assert_eq!(rejected.error(), Some(ErrorKind::CompilationFailed));
    assert_eq!(
        rejected.message(),
        "Compilation error:\nmain.c:1: error: #error directive\n"
    );

    let slot = harness.manager().store().lookup(id.as_str()).expect("lookup");
    assert_eq!(lock_session(&slot).state(), SessionState::Created);
    assert_eq!(
        harness.manager().run(&id, "").error(),
        Some(ErrorKind::NoArtifact)
    );
}

#[rstest]
fn compile_and_run_skips_run_after_rejection(harness: TestHarness) {
    let id = new_session(&harness);
    let outcome = harness
        .manager()
        .try_compile_and_run(&id, "#error broken", "")
        .expect("operation");
    assert!(matches!(outcome, CompileAndRun::NotCompiled(_)));
}

#[rstest]
fn runaway_program_is_killed_within_budget(harness: TestHarness) {
    let id = new_session(&harness);
    assert!(harness.manager().compile(&id, "while :; do :; done").succeeded());

    let started = Instant::now();
    let reply = harness.manager().run(&id, "");

    assert!(!reply.succeeded());
    assert_eq!(reply.error(), Some(ErrorKind::Timeout));
    assert_eq!(reply.message(), "Execution timed out.");
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[test]
fn slow_compiler_is_killed_within_budget() {
    let harness = TestHarness::with_settings(|settings| {
        settings.compile_timeout = Duration::from_millis(300);
    });
    let id = new_session(&harness);

    let started = Instant::now();
    let reply = harness.manager().compile(&id, "# SLOW_COMPILE\necho never");

    assert_eq!(reply.error(), Some(ErrorKind::Timeout));
    assert_eq!(reply.message(), "Compilation error:\nCompilation timed out.");
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[rstest]
#[case("exit 3", "Program exited with non-zero status.")]
#[case("kill -SEGV $$", "Program terminated by signal SIGSEGV.")]
fn silent_failures_are_explained(
    harness: TestHarness,
    #[case] program: &str,
    #[case] message: &str,
) {
    let id = new_session(&harness);
    let reply = harness.manager().compile_and_run(&id, program, "");

    assert_eq!(reply.error(), Some(ErrorKind::ExecutionFailed));
    assert_eq!(reply.message(), message);
}

#[rstest]
fn failing_program_with_output_still_succeeds(harness: TestHarness) {
    let id = new_session(&harness);
    let reply = harness
        .manager()
        .compile_and_run(&id, "echo partial; echo oops >&2; exit 2", "");

    assert!(reply.succeeded());
    assert_eq!(reply.message(), "partial\noops\n");
}

#[test]
fn missing_toolchain_is_reported() {
    let harness = TestHarness::without_toolchain();
    let id = new_session(&harness);
    let reply = harness.manager().compile(&id, "echo hi");

    assert_eq!(reply.error(), Some(ErrorKind::NoToolchainAvailable));
    assert_eq!(reply.message(), NO_TOOLCHAIN_MESSAGE);
    assert!(harness.manager().detect_toolchain().is_none());
}

#[rstest]
fn detects_fake_toolchain(harness: TestHarness) {
    assert_eq!(harness.manager().detect_toolchain().as_deref(), Some("fakecc"));
}

#[rstest]
fn sessions_are_isolated(harness: TestHarness) {
    let first = new_session(&harness);
    let second = new_session(&harness);
    assert!(harness.manager().compile(&first, "echo first").succeeded());
    assert!(harness.manager().compile(&second, "echo second").succeeded());

    assert_eq!(harness.manager().run(&first, "").message(), "first\n");
    assert_eq!(harness.manager().run(&second, "").message(), "second\n");
}

#[test]
fn concurrent_operations_never_see_partial_programs() {
    let harness = Arc::new(TestHarness::new());
    let id = new_session(&harness);
    assert!(harness.manager().compile(&id, "echo A").succeeded());

    let compiler = {
        let harness = Arc::clone(&harness);
        let id = id.clone();
        thread::spawn(move || {
            for round in 0..6 {
                let program = if round % 2 == 0 { "echo B" } else { "echo A" };
                assert!(harness.manager().compile(&id, program).succeeded());
            }
        })
    };
    let runner = {
        let harness = Arc::clone(&harness);
        let id = id.clone();
        thread::spawn(move || {
            (0..6)
                .map(|_| harness.manager().run(&id, "").message().to_owned())
                .collect::<Vec<_>>()
        })
    };

    compiler.join().expect("compiler thread");
    let outputs = runner.join().expect("runner thread");
    assert!(
        outputs.iter().all(|out| out == "A\n" || out == "B\n"),
        "unexpected outputs: {outputs:?}"
    );
}

#[rstest]
fn shutdown_removes_every_workspace(harness: TestHarness) {
    for _ in 0..3 {
        let id = new_session(&harness);
        assert!(harness.manager().compile(&id, "echo hi").succeeded());
    }

    assert_eq!(harness.manager().shutdown(), 3);
    assert!(!harness.scratch_root().exists());
}

#[test]
fn idle_sessions_are_reaped_through_the_manager() {
    let harness = TestHarness::with_settings(|settings| {
        settings.reap_policy = crate::store::ReapPolicy::after(Duration::ZERO);
    });
    let id = new_session(&harness);
    thread::sleep(Duration::from_millis(20));

    assert_eq!(harness.manager().reap_idle(), vec![id.clone()]);
    assert_eq!(
        harness.manager().run(&id, "").error(),
        Some(ErrorKind::UnknownSession)
    );
}
