//! Seam to the host modeling session that owns live meshes and receives results.

use crate::error::JobError;
use crate::model::MeshFormat;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Mesh handed to the host session after a successful job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedMesh {
    pub name: String,
    pub location: PathBuf,
}

#[async_trait]
pub trait HostSession: Send + Sync {
    /// Write the live mesh `handle` as STL to `dest`.
    async fn export_surface(&self, handle: &str, dest: &Path) -> Result<(), JobError>;

    /// Import a canonical result under `name`.
    async fn import(&self, result: &Path, name: &str) -> Result<ImportedMesh, JobError>;
}

/// A session backed by a plain directory: live mesh `name` is `<dir>/<name>.stl`
/// and imports are copied in as `<dir>/<name>.<ext>`.
#[derive(Debug, Clone)]
pub struct DirectorySession {
    root: PathBuf,
}

impl DirectorySession {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Largest `n` among meshes named `<prefix>_<n>` in the directory, 0 if none.
    pub fn highest_index(&self, prefix: &str) -> u64 {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return 0;
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                let stem = path.file_stem()?.to_str()?.to_string();
                stem.strip_prefix(prefix)?.strip_prefix('_')?.parse::<u64>().ok()
            })
            .max()
            .unwrap_or(0)
    }

    fn live_path(&self, handle: &str) -> PathBuf {
        self.root.join(format!("{handle}.{}", MeshFormat::Stl.extension()))
    }
}

#[async_trait]
impl HostSession for DirectorySession {
    async fn export_surface(&self, handle: &str, dest: &Path) -> Result<(), JobError> {
        let source = self.live_path(handle);
        tokio::fs::copy(&source, dest).await.map_err(|e| {
            JobError::staging(format!("cannot export session mesh @{handle}: {e}"))
        })?;
        Ok(())
    }

    async fn import(&self, result: &Path, name: &str) -> Result<ImportedMesh, JobError> {
        let import_err = |reason: String| JobError::ImportFailed { reason };

        crate::engine::ensure_non_empty(result).await.map_err(import_err)?;
        let ext = result
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(MeshFormat::Med.extension());
        let location = self.root.join(format!("{name}.{ext}"));
        if tokio::fs::try_exists(&location).await.unwrap_or(false) {
            return Err(import_err(format!(
                "a mesh named {name} already exists in {}",
                self.root.display()
            )));
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| import_err(format!("cannot create {}: {e}", self.root.display())))?;
        tokio::fs::copy(result, &location)
            .await
            .map_err(|e| import_err(format!("cannot copy result: {e}")))?;

        tracing::info!(name, location = %location.display(), "imported result into session");
        Ok(ImportedMesh {
            name: name.to_string(),
            location,
        })
    }
}
