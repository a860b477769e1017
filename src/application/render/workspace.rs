use std::{
    io,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use tracing::{debug, warn};

/// Private scratch directory owned by exactly one render request.
///
/// Dropping a workspace removes it as well; [`Workspace::release`] does the
/// same off the async runtime and logs failures.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh uniquely named directory under `root`, e.g. `manim-Xa83k`.
    pub async fn acquire(root: &Path, prefix: &str) -> io::Result<Self> {
        tokio::fs::create_dir_all(root).await?;
        let root = root.to_path_buf();
        let prefix = prefix.to_owned();
        let dir = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix(&prefix).tempdir_in(&root)
        })
        .await
        .map_err(io::Error::other)??;
        debug!(
            target = "application::render::workspace",
            path = %dir.path().display(),
            "Acquired render workspace"
        );
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `file_name` at the top of the workspace.
    pub async fn write_source(&self, file_name: &str, contents: &str) -> io::Result<PathBuf> {
        let path = self.dir.path().join(file_name);
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }

    /// Remove the directory tree. Failures are logged and never surface to callers.
    pub async fn release(self) {
        let path = self.dir.path().to_path_buf();
        let dir = self.dir;
        match tokio::task::spawn_blocking(move || dir.close()).await {
            Ok(Ok(())) => {
                debug!(
                    target = "application::render::workspace",
                    path = %path.display(),
                    "Released render workspace"
                );
            }
            Ok(Err(err)) => {
                warn!(
                    target = "application::render::workspace",
                    path = %path.display(),
                    error = %err,
                    "Failed to remove render workspace"
                );
            }
            Err(err) => {
                warn!(
                    target = "application::render::workspace",
                    path = %path.display(),
                    error = %err,
                    "Workspace cleanup task did not complete"
                );
            }
        }
    }
}
