//! In-memory registry of live sessions.
//!
//! The store maps ids to sessions, each behind its own mutex. Callers lock a
//! single session for the whole of a compile or run, which serialises
//! operations on that session while leaving other sessions untouched. The
//! map lock itself is only held for insertion, lookup and removal, never
//! across a child process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::session::{Session, SessionId};
use crate::workspace::ScratchArea;

const STORE_TARGET: &str = "kiln_session::store";

/// Shared handle to one session.
pub type SessionSlot = Arc<Mutex<Session>>;

/// When idle sessions become eligible for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReapPolicy {
    idle_timeout: Option<Duration>,
}

impl ReapPolicy {
    /// Sessions live until shutdown.
    #[must_use]
    pub const fn never() -> Self {
        Self { idle_timeout: None }
    }

    /// Sessions idle for longer than `timeout` are reaped.
    #[must_use]
    pub const fn after(timeout: Duration) -> Self {
        Self {
            idle_timeout: Some(timeout),
        }
    }

    /// Idle threshold, if reaping is enabled.
    #[must_use]
    pub const fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }
}

/// Registry of live sessions and their workspaces.
#[derive(Debug)]
pub struct SessionStore {
    scratch: ScratchArea,
    policy: ReapPolicy,
    sessions: Mutex<HashMap<SessionId, SessionSlot>>,
}

impl SessionStore {
    /// Creates an empty store allocating workspaces under `scratch`.
    #[must_use]
    pub fn new(scratch: ScratchArea, policy: ReapPolicy) -> Self {
        Self {
            scratch,
            policy,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Scratch area backing the store.
    #[must_use]
    pub const fn scratch(&self) -> &ScratchArea {
        &self.scratch
    }

    /// Allocates a workspace and registers a new session in `Created` state.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] when the workspace cannot be
    /// created; nothing is registered in that case.
    pub fn create(&self) -> Result<SessionId, SessionError> {
        let id = SessionId::generate();
        let workspace = self.scratch.allocate(&id)?;
        let slot = Arc::new(Mutex::new(Session::new(id.clone(), workspace)));
        self.map().insert(id.clone(), slot);
        info!(
            target: STORE_TARGET,
            session = %id,
            "session created"
        );
        Ok(id)
    }

    /// Looks up a session by id.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownSession`] when the id is malformed or
    /// not registered.
    pub fn lookup(&self, id: &str) -> Result<SessionSlot, SessionError> {
        if !SessionId::is_well_formed(id) {
            return Err(SessionError::unknown_session(id));
        }
        self.map()
            .get(&SessionId::from(id))
            .cloned()
            .ok_or_else(|| SessionError::unknown_session(id))
    }

    /// Records `binary` as the session's current artifact.
    ///
    /// Must not be called while holding that session's lock.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownSession`] when the id is not registered.
    pub fn record_artifact(&self, id: &str, binary: PathBuf) -> Result<(), SessionError> {
        let slot = self.lookup(id)?;
        lock_session(&slot).record_artifact(binary);
        Ok(())
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map().len()
    }

    /// `true` when no sessions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Whether `id` names a live session.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.map().contains_key(&SessionId::from(id))
    }

    /// Removes sessions idle for longer than the policy allows.
    ///
    /// Sessions with an operation in flight are skipped; they are by
    /// definition not idle. Returns the ids that were reaped.
    pub fn reap_idle(&self, now: Instant) -> Vec<SessionId> {
        let Some(limit) = self.policy.idle_timeout else {
            return Vec::new();
        };

        let reaped: Vec<(SessionId, SessionSlot)> = {
            let mut sessions = self.map();
            let expired: Vec<SessionId> = sessions
                .iter()
                .filter(|(_, slot)| match slot.try_lock() {
                    Ok(session) => session.idle_for(now) > limit,
                    Err(TryLockError::Poisoned(poisoned)) => {
                        poisoned.into_inner().idle_for(now) > limit
                    }
                    Err(TryLockError::WouldBlock) => false,
                })
                .map(|(id, _)| id.clone())
                .collect();
            expired
                .into_iter()
                .filter_map(|id| sessions.remove(&id).map(|slot| (id, slot)))
                .collect()
        };

        for (id, slot) in &reaped {
            self.remove_workspace(id, slot);
            info!(
                target: STORE_TARGET,
                session = %id,
                idle_limit_secs = limit.as_secs(),
                "idle session reaped"
            );
        }
        reaped.into_iter().map(|(id, _)| id).collect()
    }

    /// Removes every session and its workspace, then the scratch root if it
    /// is left empty. Returns how many sessions were removed.
    ///
    /// Never waits on a session lock: the workspace of a session that is
    /// still busy is deleted from under its operation.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<(SessionId, SessionSlot)> = self.map().drain().collect();
        for (id, slot) in &drained {
            self.remove_workspace(id, slot);
        }
        // Only succeeds when empty; other daemons may share the root.
        if std::fs::remove_dir(self.scratch.root()).is_ok() {
            debug!(
                target: STORE_TARGET,
                path = %self.scratch.root().display(),
                "removed scratch root"
            );
        }
        info!(
            target: STORE_TARGET,
            sessions = drained.len(),
            "session store shut down"
        );
        drained.len()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<SessionId, SessionSlot>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_workspace(&self, id: &SessionId, slot: &SessionSlot) {
        let workspace = match slot.try_lock() {
            Ok(session) => session.workspace().clone(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().workspace().clone(),
            Err(TryLockError::WouldBlock) => {
                warn!(
                    target: STORE_TARGET,
                    session = %id,
                    "session busy during removal; deleting its workspace anyway"
                );
                self.scratch.workspace_for(id)
            }
        };
        if let Err(error) = workspace.remove() {
            warn!(
                target: STORE_TARGET,
                session = %id,
                path = %workspace.path().display(),
                %error,
                "failed to remove session workspace"
            );
        }
    }
}

/// Locks a session, recovering the guard if a previous holder panicked.
///
/// Session state is updated with single assignments, so a poisoned session
/// is still consistent.
pub fn lock_session(slot: &SessionSlot) -> MutexGuard<'_, Session> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
