//! Session identity and per-session state.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use time::OffsetDateTime;
use uuid::Uuid;

use crate::workspace::Workspace;

const RANDOM_SUFFIX_LEN: usize = 12;

/// Opaque session identifier.
///
/// Generated ids combine a base-36 millisecond timestamp with random hex
/// characters, so they are unique in practice and safe as a directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis());
        let random: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(RANDOM_SUFFIX_LEN)
            .collect();
        Self(format!("{}-{random}", base36(millis)))
    }

    /// Borrows the textual form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the text could have been produced by [`SessionId::generate`].
    ///
    /// Lookups reject anything else before touching the store, which also
    /// keeps path separators out of workspace names.
    #[must_use]
    pub fn is_well_formed(text: &str) -> bool {
        !text.is_empty()
            && text
                .chars()
                .all(|character| character.is_ascii_alphanumeric() || character == '-')
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn base36(mut value: u128) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return String::from("0");
    }
    let mut out = Vec::new();
    while value > 0 {
        let digit = usize::try_from(value % 36).unwrap_or_default();
        out.push(DIGITS.get(digit).copied().unwrap_or(b'0'));
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Coarse lifecycle state derived from a session's artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No successful compile yet, or the latest compile failed.
    Created,
    /// A binary from the most recent successful compile is available.
    Compiled,
}

/// A live session: its workspace plus the current build artifact.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    workspace: Workspace,
    built_binary: Option<PathBuf>,
    last_compiled_at: Option<OffsetDateTime>,
    last_used: Instant,
}

impl Session {
    pub(crate) fn new(id: SessionId, workspace: Workspace) -> Self {
        Self {
            id,
            workspace,
            built_binary: None,
            last_compiled_at: None,
            last_used: Instant::now(),
        }
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// Scratch directory owned by the session.
    #[must_use]
    pub const fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Path of the binary from the latest successful compile.
    #[must_use]
    pub fn built_binary(&self) -> Option<&Path> {
        self.built_binary.as_deref()
    }

    /// When the current artifact was produced.
    #[must_use]
    pub const fn last_compiled_at(&self) -> Option<OffsetDateTime> {
        self.last_compiled_at
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        if self.built_binary.is_some() {
            SessionState::Compiled
        } else {
            SessionState::Created
        }
    }

    /// Time since the session was last created or operated on.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    /// Records a freshly built binary.
    pub fn record_artifact(&mut self, binary: PathBuf) {
        self.built_binary = Some(binary);
        self.last_compiled_at = Some(OffsetDateTime::now_utc());
    }

    /// Forgets the current artifact after a failed compile.
    pub fn clear_artifact(&mut self) {
        self.built_binary = None;
        self.last_compiled_at = None;
    }

    /// Marks the session as used now.
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }
}
