//! Scratch directories for sandbox runs.
//!
//! Every run gets its own directory under the sandbox root, named from the
//! board, a millisecond timestamp, the process id and a sequence number.
//! The directory is removed by [`SandboxWorkspace::cleanup`] and again on
//! drop, unless the workspace was marked to be kept.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::codegen::slugify;

const METADATA_FILE: &str = ".workspace.json";

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Failed to create workspace {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove workspace {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A per-run scratch directory
#[derive(Debug)]
pub struct SandboxWorkspace {
    pub id: String,
    dir: PathBuf,
    keep: bool,
}

impl SandboxWorkspace {
    /// Create a fresh directory under `root` for a run of `board_name`
    pub fn create(root: &Path, board_name: &str) -> Result<Self, WorkspaceError> {
        let id = format!(
            "{}_{}_{}_{}",
            slugify(board_name),
            now_millis(),
            std::process::id(),
            SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );
        fs::create_dir_all(root).map_err(|source| WorkspaceError::Create {
            path: root.to_path_buf(),
            source,
        })?;
        // the runtime runs inside the workspace, so every path handed to it must be absolute
        let root = fs::canonicalize(root).map_err(|source| WorkspaceError::Create {
            path: root.to_path_buf(),
            source,
        })?;
        let dir = root.join(&id);
        fs::create_dir(&dir).map_err(|source| WorkspaceError::Create {
            path: dir.clone(),
            source,
        })?;

        let workspace = Self {
            id,
            dir,
            keep: false,
        };

        let metadata = serde_json::json!({
            "id": workspace.id,
            "board": board_name,
            "created": chrono::Utc::now().to_rfc3339(),
        });
        workspace.write_file(METADATA_FILE, &metadata.to_string())?;

        Ok(workspace)
    }

    /// Keep files after the run, for debugging
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Write the crawler module as `crawler_{millis}.mjs`
    pub fn write_module(&self, code: &str) -> Result<PathBuf, WorkspaceError> {
        self.write_file(&format!("crawler_{}.mjs", now_millis()), code)
    }

    pub fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf, WorkspaceError> {
        let path = self.dir.join(name);
        fs::write(&path, contents).map_err(|source| WorkspaceError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Remove the directory. Calling it again, or after the directory is
    /// already gone, is a no-op.
    pub fn cleanup(&self) -> Result<(), WorkspaceError> {
        if self.keep || !self.dir.exists() {
            return Ok(());
        }
        fs::remove_dir_all(&self.dir).map_err(|source| WorkspaceError::Remove {
            path: self.dir.clone(),
            source,
        })
    }
}

impl Drop for SandboxWorkspace {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Remove workspaces under `root` older than `max_age`.
///
/// Only directories carrying the workspace metadata file are touched.
/// Returns how many were removed.
pub fn cleanup_stale_workspaces(root: &Path, max_age: Duration) -> std::io::Result<usize> {
    if !root.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut cleaned = 0;

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() || !path.join(METADATA_FILE).exists() {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if let Some(age) = age {
            if age >= max_age && fs::remove_dir_all(&path).is_ok() {
                cleaned += 1;
            }
        }
    }

    Ok(cleaned)
}
