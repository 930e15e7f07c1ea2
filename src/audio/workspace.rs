//! # Per-Request Workspace
//!
//! Every request gets its own pair of temporary paths, derived from the
//! request id, so concurrent requests can never overwrite each other's
//! upload or converted audio.
//!
//! ## Cleanup Guarantee:
//! `cleanup` removes both files and is called by the handler before the
//! response is sent. If the request future is dropped first (client went
//! away), `Drop` performs the same cleanup. Removal failures are logged and
//! swallowed so they can never replace the request's real outcome.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

pub struct RequestWorkspace {
    request_id: Uuid,
    upload: PathBuf,
    canonical: PathBuf,
    cleaned: bool,
}

impl RequestWorkspace {
    /// Reserve the paths for `request_id` under `dir`. No file is created yet.
    pub fn new(dir: &Path, request_id: Uuid) -> Self {
        Self {
            request_id,
            upload: dir.join(format!("{}-upload", request_id)),
            canonical: dir.join(format!("{}-converted.wav", request_id)),
            cleaned: false,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Where the raw upload is written.
    pub fn upload_path(&self) -> &Path {
        &self.upload
    }

    /// Where the transcoder writes canonical audio.
    pub fn canonical_path(&self) -> &Path {
        &self.canonical
    }

    /// Remove both temporary files. Missing files are not an error.
    pub fn cleanup(&mut self) {
        for path in [&self.upload, &self.canonical] {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(request_id = %self.request_id, path = %path.display(), "Removed temp file"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(
                    request_id = %self.request_id,
                    path = %path.display(),
                    error = %err,
                    "Could not delete temp file"
                ),
            }
        }
        self.cleaned = true;
    }
}

impl Drop for RequestWorkspace {
    fn drop(&mut self) {
        if !self.cleaned {
            self.cleanup();
        }
    }
}
