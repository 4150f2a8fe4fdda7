use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DownloadError;

pub const SCRATCH_PREFIX: &str = "dl-";

/// Per-request working directory. Removed exactly once: either through
/// [`ScratchDir::release`] or when the guard is dropped.
#[derive(Debug)]
pub struct ScratchDir {
    inner: Option<TempDir>,
    path: PathBuf,
}

impl ScratchDir {
    pub fn create_in(root: &Path, request_id: Uuid) -> Result<Self, DownloadError> {
        let inner = tempfile::Builder::new()
            .prefix(&format!("{SCRATCH_PREFIX}{}-", request_id.simple()))
            .tempdir_in(root)
            .map_err(|error| {
                DownloadError::filesystem("could not create the scratch directory", root, error)
            })?;
        let path = inner.path().to_path_buf();
        debug!(path = %path.display(), "scratch directory created");

        Ok(Self {
            inner: Some(inner),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) {
        self.cleanup();
    }

    /// Like [`ScratchDir::release`], but the recursive delete runs on tokio's
    /// blocking pool. If the task never runs, dropping the guard removes the
    /// directory in place.
    pub async fn release_offloaded(self) {
        let path = self.path.clone();
        if let Err(error) = tokio::task::spawn_blocking(move || self.release()).await {
            warn!(path = %path.display(), "scratch cleanup task failed: {error}");
        }
    }

    fn cleanup(&mut self) {
        let Some(dir) = self.inner.take() else {
            return;
        };

        match dir.close() {
            Ok(()) => debug!(path = %self.path.display(), "scratch directory removed"),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!(
                path = %self.path.display(),
                "could not remove scratch directory: {error}"
            ),
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Removes scratch directories older than `max_age` left behind by a previous
/// process.
pub async fn sweep_stale(root: &Path, max_age: Duration) -> usize {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!("could not open scratch root for sweeping: {error}");
            }
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                warn!("could not iterate scratch root: {error}");
                break;
            }
        };

        let path = entry.path();
        let is_scratch = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(SCRATCH_PREFIX));
        if !is_scratch {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(metadata) if metadata.is_dir() => metadata,
            Ok(_) => continue,
            Err(error) => {
                warn!("could not read metadata of {:?}: {error}", path);
                continue;
            }
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified_at| now.duration_since(modified_at).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => removed += 1,
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("could not remove stale scratch directory {:?}: {error}", path),
        }
    }

    removed
}
