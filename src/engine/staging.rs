//! Brings operands into the exact file format an engine reads.

use crate::engine::{ensure_non_empty, CancelSignal, FormatConverter, HostSession};
use crate::error::JobError;
use crate::model::{MeshFormat, MeshReference};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Private scratch directory owned by one job. Removed when dropped.
#[derive(Debug)]
pub struct JobWorkspace {
    dir: tempfile::TempDir,
}

impl JobWorkspace {
    pub fn create() -> std::io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("BooleanMeshCompute")
            .tempdir()?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Delete the directory and everything staged in it.
    pub fn remove(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

pub struct MeshStagingPipeline {
    converter: Arc<dyn FormatConverter>,
    session: Arc<dyn HostSession>,
}

impl MeshStagingPipeline {
    pub fn new(converter: Arc<dyn FormatConverter>, session: Arc<dyn HostSession>) -> Self {
        Self { converter, session }
    }

    /// Produce a file in `required` format for `reference`.
    ///
    /// Files already in the right format are returned as-is. Every file this
    /// creates lives in `workdir` and is named after `stem`; the caller owns
    /// their cleanup.
    pub async fn stage(
        &self,
        reference: &MeshReference,
        required: MeshFormat,
        workdir: &Path,
        stem: &str,
        cancel: &mut CancelSignal,
    ) -> Result<PathBuf, JobError> {
        let (source, source_format) = match reference {
            MeshReference::FilePath { path, format_hint } => {
                let format = format_hint
                    .or_else(|| MeshFormat::from_path(path))
                    .ok_or_else(|| {
                        JobError::staging(format!(
                            "cannot determine mesh format of {}",
                            path.display()
                        ))
                    })?;
                if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                    return Err(JobError::staging(format!(
                        "input mesh {} does not exist",
                        path.display()
                    )));
                }
                (path.clone(), format)
            }
            MeshReference::LiveHandle(handle) => {
                let exported = workdir.join(format!("{stem}.export.{}", MeshFormat::Stl.extension()));
                self.session
                    .export_surface(handle, &exported)
                    .await
                    .map_err(|e| match e {
                        JobError::StagingFailed { .. } => e,
                        other => JobError::staging(other.to_string()),
                    })?;
                ensure_non_empty(&exported).await.map_err(JobError::staging)?;
                (exported, MeshFormat::Stl)
            }
        };

        if source_format == required {
            tracing::debug!(path = %source.display(), format = %required, "operand already staged");
            return Ok(source);
        }

        let target = workdir.join(format!("{stem}.{}", required.extension()));
        if source_format.is_surface() || required == MeshFormat::Stl {
            self.convert_step(&source, &target, cancel).await?;
        } else {
            // Volume and mixed-cell formats crash converters when written straight
            // to some surface formats; go through STL first.
            let intermediate =
                workdir.join(format!("{stem}.intermediate.{}", MeshFormat::Stl.extension()));
            self.convert_step(&source, &intermediate, cancel).await?;
            self.convert_step(&intermediate, &target, cancel).await?;
        }
        Ok(target)
    }

    async fn convert_step(
        &self,
        input: &Path,
        output: &Path,
        cancel: &mut CancelSignal,
    ) -> Result<(), JobError> {
        match self.converter.convert(input, output, cancel).await {
            Ok(()) => Ok(()),
            Err(JobError::Cancelled) => Err(JobError::Cancelled),
            Err(JobError::ConversionFailed { reason }) => Err(JobError::staging(reason)),
            Err(other) => Err(JobError::staging(other.to_string())),
        }
    }
}
