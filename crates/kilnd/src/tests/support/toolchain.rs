//! Stand-in C toolchain backed by `/bin/sh`.
//!
//! "Compiling" prefixes the shell-script source with a shebang, so daemon
//! tests exercise real processes without a C compiler installed.

use std::fs;
use std::path::Path;

use kiln_session::{CompileArg, ToolchainDescriptor, ToolchainRegistry};

const FAKE_COMPILER: &str = r#"
if [ "$1" = "-v" ]; then
  echo "fakecc 1.0" >&2
  exit 1
fi
src="$1"
out="$3"
if grep -q '#error' "$src"; then
  echo "main.c:1: error: #error directive" >&2
  exit 1
fi
{ echo '#!/bin/sh'; cat "$src"; } > "$out.tmp" && chmod 700 "$out.tmp" && mv "$out.tmp" "$out"
"#;

/// Writes the fake compiler under `dir` and returns a registry holding only it.
pub fn fake_toolchains(dir: &Path) -> ToolchainRegistry {
    let script = dir.join("fakecc.sh");
    fs::write(&script, FAKE_COMPILER).expect("write fake compiler");
    let script = script.display().to_string();

    let mut registry = ToolchainRegistry::empty();
    registry
        .register(
            ToolchainDescriptor::new("fakecc", "/bin/sh")
                .with_probe_args([script.clone(), String::from("-v")])
                .with_compile_args([
                    CompileArg::Literal(script),
                    CompileArg::Source,
                    CompileArg::literal("-o"),
                    CompileArg::Output,
                ]),
        )
        .expect("register fake toolchain");
    registry
}
