//! Socket listener for the daemon's JSONL endpoint.
//!
//! The listener binds the configured TCP or Unix endpoint and accepts
//! connections on a background thread, handing each one to a
//! [`ConnectionHandler`] on its own thread. Each connection carries one
//! request line and must deliver it before a read deadline.

mod errors;
mod handler;
mod listener;
#[cfg(test)]
mod test_utils;

pub(crate) use self::errors::ListenerError;
pub(crate) use self::handler::{ConnectionHandler, ConnectionStream};
pub(crate) use self::listener::{ListenerHandle, SocketListener};
#[cfg(test)]
pub(crate) use self::test_utils::{CountingHandler, ServedLog};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
