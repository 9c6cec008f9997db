//! Cleanup of per-request temporary files.
//!
//! Every artifact a request creates is registered with an [`ArtifactReclaimer`] as soon as its
//! path exists. The handler awaits [`ArtifactReclaimer::reclaim`] once the pipeline has produced
//! its result. If the request future is dropped before that point (host timeout, client
//! disconnect) the `Drop` impl schedules the same removals on the runtime instead, so a
//! cancelled request never leaks files.
//!
//! Removal is best-effort: a file that is already gone, or cannot be removed, is logged and
//! otherwise ignored.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct ArtifactReclaimer {
    request_id: Uuid,
    paths: Vec<PathBuf>,
}

impl ArtifactReclaimer {
    pub fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            paths: Vec::new(),
        }
    }

    /// Take ownership of a temporary path. Call this before the file is written.
    pub fn register(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        tracing::trace!(request_id = %self.request_id, path = %path.display(), "Registered artifact");
        self.paths.push(path);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Remove every registered artifact.
    pub async fn reclaim(mut self) {
        let paths = std::mem::take(&mut self.paths);
        for path in &paths {
            remove_artifact(self.request_id, path).await;
        }
    }
}

impl Drop for ArtifactReclaimer {
    fn drop(&mut self) {
        if self.paths.is_empty() {
            return;
        }

        let request_id = self.request_id;
        let paths = std::mem::take(&mut self.paths);
        tracing::debug!(
            request_id = %request_id,
            artifacts = paths.len(),
            "Request ended before cleanup, reclaiming artifacts in the background"
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for path in &paths {
                        remove_artifact(request_id, path).await;
                    }
                });
            }
            Err(_) => {
                for path in &paths {
                    if let Err(e) = std::fs::remove_file(path) {
                        log_removal_failure(request_id, path, &e);
                    }
                }
            }
        }
    }
}

async fn remove_artifact(request_id: Uuid, path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::trace!(request_id = %request_id, path = %path.display(), "Removed artifact"),
        Err(e) => log_removal_failure(request_id, path, &e),
    }
}

fn log_removal_failure(request_id: Uuid, path: &Path, err: &std::io::Error) {
    if err.kind() == ErrorKind::NotFound {
        tracing::debug!(request_id = %request_id, path = %path.display(), "Artifact already absent");
    } else {
        tracing::warn!(request_id = %request_id, path = %path.display(), error = %err, "Failed to remove artifact");
    }
}
