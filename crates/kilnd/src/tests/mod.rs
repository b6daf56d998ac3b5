//! Test suites for the Kiln daemon.

#[cfg(unix)]
mod launch;
#[cfg(unix)]
mod socket_behaviour;
mod support;
