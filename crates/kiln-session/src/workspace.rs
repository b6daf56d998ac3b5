//! Per-session scratch directories.
//!
//! Every session owns exactly one directory below the scratch root, named
//! after its id. The directory holds the fixed-name source file and the
//! compiled binary; nothing else is written there by the service.

use std::fs::{self, DirBuilder};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::SessionError;
use crate::session::SessionId;

const WORKSPACE_TARGET: &str = "kiln_session::workspace";

/// File name the submitted source is written to.
pub const SOURCE_FILE_NAME: &str = "main.c";

/// File name compilers are asked to produce.
pub const BINARY_FILE_NAME: &str = "a.out";

/// Root directory under which session workspaces are allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchArea {
    root: PathBuf,
}

impl ScratchArea {
    /// Uses `root` as the scratch area; it is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Scratch root path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh, private directory for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] if the root cannot be created or a
    /// directory for `id` already exists.
    pub fn allocate(&self, id: &SessionId) -> Result<Workspace, SessionError> {
        private_dir_builder(true)
            .create(&self.root)
            .map_err(|source| SessionError::storage(&self.root, source))?;
        let workspace = self.workspace_for(id);
        private_dir_builder(false)
            .create(&workspace.dir)
            .map_err(|source| SessionError::storage(&workspace.dir, source))?;
        debug!(
            target: WORKSPACE_TARGET,
            session = %id,
            path = %workspace.dir.display(),
            "allocated workspace"
        );
        Ok(workspace)
    }

    /// Workspace location for `id`, whether or not it exists.
    #[must_use]
    pub fn workspace_for(&self, id: &SessionId) -> Workspace {
        Workspace {
            dir: self.root.join(id.as_str()),
        }
    }
}

/// A session's scratch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Location of the source file.
    #[must_use]
    pub fn source_path(&self) -> PathBuf {
        self.dir.join(SOURCE_FILE_NAME)
    }

    /// Location of the compiled binary.
    #[must_use]
    pub fn binary_path(&self) -> PathBuf {
        self.dir.join(BINARY_FILE_NAME)
    }

    /// Overwrites the source file with `source`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] when the file cannot be written.
    pub fn write_source(&self, source: &str) -> Result<PathBuf, SessionError> {
        let path = self.source_path();
        fs::write(&path, source).map_err(|error| SessionError::storage(&path, error))?;
        Ok(path)
    }

    /// Deletes any previously built binary so a failed compile cannot leave
    /// a stale one behind.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] for failures other than the binary
    /// being absent.
    pub fn discard_binary(&self) -> Result<(), SessionError> {
        let path = self.binary_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(SessionError::storage(&path, error)),
        }
    }

    /// Recursively deletes the directory. A directory that is already gone
    /// counts as removed.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error for any other failure.
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

fn private_dir_builder(recursive: bool) -> DirBuilder {
    let mut builder = DirBuilder::new();
    builder.recursive(recursive);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
}
