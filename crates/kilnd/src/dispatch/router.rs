//! Routes parsed requests to the session manager.

use std::sync::Arc;

use tracing::{debug, info, warn};

use kiln_session::{CompileAndRun, SessionError, SessionId, SessionManager};

use super::request::SessionRequest;
use super::response::DaemonReply;

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Turns validated requests into replies.
#[derive(Debug)]
pub struct SessionRouter {
    sessions: Arc<SessionManager>,
}

impl SessionRouter {
    /// Creates a router over the shared session manager.
    pub const fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    /// Executes `request`, blocking until the operation finishes.
    ///
    /// Every outcome of compile, run and compile-run, including session-layer
    /// failures, is answered in that operation's own reply kind. Compile-run
    /// always answers as `run`.
    pub fn route(&self, request: &SessionRequest) -> DaemonReply {
        match request {
            SessionRequest::CreateSession => match self.sessions.create_session() {
                Ok(id) => {
                    info!(target: DISPATCH_TARGET, session = %id, "session created");
                    DaemonReply::session(&id)
                }
                Err(error) => rejected(request, &error),
            },
            SessionRequest::Compile { session_id, code } => {
                let id = SessionId::from(session_id.as_str());
                match self.sessions.try_compile(&id, code) {
                    Ok(result) => {
                        debug!(
                            target: DISPATCH_TARGET,
                            session = %id,
                            status = ?result.status(),
                            "compile finished"
                        );
                        DaemonReply::compiled(result)
                    }
                    Err(error) => rejected(request, &error),
                }
            }
            SessionRequest::Run { session_id, stdin } => {
                let id = SessionId::from(session_id.as_str());
                match self.sessions.try_run(&id, stdin) {
                    Ok(result) => {
                        debug!(
                            target: DISPATCH_TARGET,
                            session = %id,
                            status = ?result.status(),
                            "run finished"
                        );
                        DaemonReply::ran(result)
                    }
                    Err(error) => rejected(request, &error),
                }
            }
            SessionRequest::CompileRun {
                session_id,
                code,
                stdin,
            } => {
                let id = SessionId::from(session_id.as_str());
                match self.sessions.try_compile_and_run(&id, code, stdin) {
                    Ok(CompileAndRun::NotCompiled(result)) => DaemonReply::not_compiled(result),
                    Ok(CompileAndRun::Ran { run, .. }) => DaemonReply::ran(run),
                    Err(error) => rejected(request, &error),
                }
            }
        }
    }
}

fn rejected(request: &SessionRequest, error: &SessionError) -> DaemonReply {
    warn!(
        target: DISPATCH_TARGET,
        operation = request.operation(),
        code = error.kind().as_str(),
        %error,
        "operation rejected"
    );
    DaemonReply::session_error(request.reply_shape(), error)
}
