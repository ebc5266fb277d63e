//! Per-job scratch directories.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{MediaError, MediaResult};

/// Prefix shared by every workspace directory, used by the startup sweep.
const WORKSPACE_PREFIX: &str = "job-";

/// Isolated scratch directory for one pipeline invocation.
///
/// The directory is removed by [`TempWorkspace::cleanup`]. If the handle is
/// dropped without it (a panic, a cancelled task) removal is attempted
/// synchronously in `Drop`; a crash is covered by [`TempWorkspace::sweep_orphans`].
#[derive(Debug)]
pub struct TempWorkspace {
    path: PathBuf,
    removed: bool,
}

impl TempWorkspace {
    /// Create a fresh directory under `root` for `job_id`.
    ///
    /// A random suffix keeps two acquisitions for the same job apart.
    pub async fn acquire(root: impl AsRef<Path>, job_id: &str) -> MediaResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).await.map_err(|e| {
            MediaError::workspace(format!("cannot create {}: {e}", root.display()))
        })?;

        let name = format!(
            "{WORKSPACE_PREFIX}{}-{}",
            sanitize(job_id),
            Uuid::new_v4().simple()
        );
        let path = root.join(name);

        // create_dir (not create_dir_all) fails if the name is taken.
        fs::create_dir(&path).await.map_err(|e| {
            MediaError::workspace(format!("cannot create {}: {e}", path.display()))
        })?;

        debug!(path = %path.display(), "Acquired workspace");
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Remove the directory and everything in it. Calling it again is a no-op.
    pub async fn cleanup(&mut self) -> MediaResult<()> {
        if self.removed {
            return Ok(());
        }

        match fs::remove_dir_all(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(MediaError::workspace(format!(
                    "cannot remove {}: {e}",
                    self.path.display()
                )))
            }
        }

        self.removed = true;
        debug!(path = %self.path.display(), "Removed workspace");
        Ok(())
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Remove workspace directories left under `root` by a previous run.
    ///
    /// Must only run before any worker acquires a workspace. Returns the
    /// number of directories removed.
    pub async fn sweep_orphans(root: impl AsRef<Path>) -> MediaResult<usize> {
        let root = root.as_ref();
        let mut entries = match fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let is_workspace = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(WORKSPACE_PREFIX));
            if !is_workspace || !entry.file_type().await?.is_dir() {
                continue;
            }

            match fs::remove_dir_all(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(
                    path = %entry.path().display(),
                    error = %e,
                    "Failed to remove orphaned workspace"
                ),
            }
        }

        Ok(removed)
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove workspace on drop"
                );
            }
        }
    }
}

/// Keep job ids usable as a path component.
fn sanitize(job_id: &str) -> String {
    job_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect()
}
