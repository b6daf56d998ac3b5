//! Entry point for the Kiln daemon.

use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match kilnd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            drop(writeln!(io::stderr().lock(), "kilnd: {error}"));
            ExitCode::FAILURE
        }
    }
}
