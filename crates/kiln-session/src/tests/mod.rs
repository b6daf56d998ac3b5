//! Crate-level test support and BDD scenarios.
//!
//! The fake toolchain is a shell script that "compiles" a shell-script
//! source by prefixing it with a shebang, so lifecycle tests exercise real
//! processes without needing a C compiler.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use crate::lifecycle::SessionManager;
use crate::process::SystemCommandRunner;
use crate::settings::SessionSettings;
use crate::toolchain::{CompileArg, ToolchainDescriptor, ToolchainRegistry};


const FAKE_COMPILER: &str = r#"
if [ "$1" = "-v" ]; then
  echo "fakecc 1.0" >&2
  exit 1
fi
src="$1"
out="$3"
if grep -q 'SLOW_COMPILE' "$src"; then
  sleep 30
fi
if grep -q '#error' "$src"; then
  echo "main.c:1: error: #error directive" >&2
  exit 1
fi
{ echo '#!/bin/sh'; cat "$src"; } > "$out.tmp" && chmod 700 "$out.tmp" && mv "$out.tmp" "$out"
"#;

/// A scratch root plus a manager wired to the fake toolchain.
pub(crate) struct TestHarness {
    _dir: TempDir,
    scratch_root: PathBuf,
    manager: SessionManager,
}

impl TestHarness {
    pub(crate) fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub(crate) fn with_settings(adjust: impl FnOnce(&mut SessionSettings)) -> Self {
        Self::build(adjust, true)
    }

    pub(crate) fn without_toolchain() -> Self {
        Self::build(|_| {}, false)
    }

    fn build(adjust: impl FnOnce(&mut SessionSettings), with_toolchain: bool) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let script = dir.path().join("fakecc.sh");
        fs::write(&script, FAKE_COMPILER).expect("write fake compiler");

        let scratch_root = dir.path().join("sessions");
        let mut settings = SessionSettings::new(&scratch_root);
        settings.run_timeout = Duration::from_millis(400);
        settings.compile_timeout = Duration::from_secs(5);
        adjust(&mut settings);

        let mut registry = ToolchainRegistry::empty();
        if with_toolchain {
            registry
                .register(fake_toolchain(&script))
                .expect("register fake toolchain");
        }
        let runner = std::sync::Arc::new(SystemCommandRunner::new(settings.max_output_bytes));
        let manager = SessionManager::with_components(&settings, registry, runner);
        Self {
            _dir: dir,
            scratch_root,
            manager,
        }
    }

    pub(crate) const fn manager(&self) -> &SessionManager {
        &self.manager
    }

    pub(crate) fn scratch_root(&self) -> &std::path::Path {
        &self.scratch_root
    }
}

/// Runs the script through `/bin/sh` so nothing freshly written is exec'd
/// directly by this multi-threaded test process.
fn fake_toolchain(script: &std::path::Path) -> ToolchainDescriptor {
    let script = script.display().to_string();
    ToolchainDescriptor::new("fakecc", "/bin/sh")
        .with_probe_args([script.clone(), String::from("-v")])
        .with_compile_args([
            CompileArg::Literal(script),
            CompileArg::Source,
            CompileArg::literal("-o"),
            CompileArg::Output,
        ])
}
