//! Tunables for session management.

use std::path::PathBuf;
use std::time::Duration;

use crate::store::ReapPolicy;

/// Budgets, limits and locations used by [`crate::SessionManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Directory under which session workspaces are allocated.
    pub scratch_root: PathBuf,
    /// Wall-clock budget for one compiler invocation.
    pub compile_timeout: Duration,
    /// Wall-clock budget for one program run.
    pub run_timeout: Duration,
    /// Wall-clock budget for one toolchain probe.
    pub probe_timeout: Duration,
    /// Bytes kept per captured stream.
    pub max_output_bytes: usize,
    /// Idle-session policy.
    pub reap_policy: ReapPolicy,
}

impl SessionSettings {
    /// Settings with the stock budgets, rooted at `scratch_root`.
    #[must_use]
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            compile_timeout: Duration::from_millis(8_000),
            run_timeout: Duration::from_millis(4_000),
            probe_timeout: Duration::from_millis(1_500),
            max_output_bytes: 64 * 1024,
            reap_policy: ReapPolicy::never(),
        }
    }
}
