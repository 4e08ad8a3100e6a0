//! Turns a backend's raw output into a named result in the canonical format.

use crate::engine::{ensure_non_empty, CancelSignal, FormatConverter};
use crate::error::JobError;
use crate::model::{FinalizedResult, JobRequest, MeshFormat};
use crate::orchestrator::NamingCounters;
use crate::registry::{AlgorithmDescriptor, RawFixup};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{NamedTempFile, TempPath};
use time::format_description::well_known::Rfc3339;

pub struct ResultFinalizer {
    converter: Arc<dyn FormatConverter>,
    counters: Arc<NamingCounters>,
    canonical_format: MeshFormat,
}

impl ResultFinalizer {
    pub fn new(
        converter: Arc<dyn FormatConverter>,
        counters: Arc<NamingCounters>,
        canonical_format: MeshFormat,
    ) -> Self {
        Self {
            converter,
            counters,
            canonical_format,
        }
    }

    pub fn counters(&self) -> &Arc<NamingCounters> {
        &self.counters
    }

    pub fn canonical_format(&self) -> MeshFormat {
        self.canonical_format
    }

    /// Convert `raw` and name the result.
    ///
    /// The canonical file lands outside the job workspace so it survives
    /// cleanup. A naming counter is consumed only once the file is in place.
    pub async fn finalize(
        &self,
        request: &JobRequest,
        descriptor: &AlgorithmDescriptor,
        raw: &Path,
        backend_elapsed: Duration,
    ) -> Result<FinalizedResult, JobError> {
        ensure_non_empty(raw)
            .await
            .map_err(|reason| JobError::conversion(format!("backend produced no result: {reason}")))?;

        if descriptor.raw_fixup == RawFixup::DecimalCommas {
            fix_decimal_commas(raw).await?;
        }

        let (destination, format) = self.canonical_target(request)?;
        // Written beside the destination, renamed over it only on success.
        let scratch = scratch_file(destination.as_deref().and_then(Path::parent), format)?;
        tracing::debug!(raw = %raw.display(), scratch = %scratch.display(), "finalizing result");

        if descriptor.output_format == format {
            tokio::fs::copy(raw, &scratch)
                .await
                .map_err(|e| JobError::conversion(format!("cannot copy result: {e}")))?;
        } else {
            // The backend already succeeded; nothing may discard its result now.
            self.converter
                .convert(raw, &scratch, &mut CancelSignal::never())
                .await?;
        }

        let canonical = match destination {
            Some(destination) => {
                scratch.persist(&destination).map_err(|e| {
                    JobError::conversion(format!("cannot write {}: {}", destination.display(), e.error))
                })?;
                destination
            }
            None => scratch
                .keep()
                .map_err(|e| JobError::conversion(format!("cannot keep result file: {}", e.error)))?,
        };

        let name = match &request.result_name {
            Some(name) => name.clone(),
            None => self.counters.next_name(request.operator),
        };
        let finished_utc = time::OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();

        Ok(FinalizedResult {
            name,
            canonical_path: canonical,
            format,
            operator: request.operator,
            algorithm: request.algorithm,
            backend_elapsed,
            finished_utc,
        })
    }

    /// Where the result goes and in which format. `None` means a generated
    /// temporary file.
    fn canonical_target(&self, request: &JobRequest) -> Result<(Option<PathBuf>, MeshFormat), JobError> {
        let Some(hint) = &request.result_path_hint else {
            return Ok((None, self.canonical_format));
        };
        let format = MeshFormat::from_path(hint).unwrap_or(self.canonical_format);
        let path = if hint.is_absolute() {
            hint.clone()
        } else {
            std::env::current_dir()
                .map_err(|e| JobError::conversion(format!("cannot resolve {}: {e}", hint.display())))?
                .join(hint)
        };
        Ok((Some(path), format))
    }
}

/// An empty `BooleanMeshCompute*` file in `dir` (or the system temp dir),
/// removed again when dropped.
fn scratch_file(dir: Option<&Path>, format: MeshFormat) -> Result<TempPath, JobError> {
    let suffix = format!(".{}", format.extension());
    let mut builder = tempfile::Builder::new();
    builder.prefix("BooleanMeshCompute").suffix(&suffix);
    let file = match dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    };
    file.map(NamedTempFile::into_temp_path)
        .map_err(|e| JobError::conversion(format!("cannot create result file: {e}")))
}

/// Rewrite `1,5` as `1.5` in an ASCII mesh. Binary files are left untouched.
async fn fix_decimal_commas(path: &Path) -> Result<(), JobError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| JobError::conversion(format!("cannot read {}: {e}", path.display())))?;
    let Ok(text) = String::from_utf8(bytes) else {
        return Ok(());
    };
    if !text.contains(',') {
        return Ok(());
    }
    tracing::debug!(path = %path.display(), "replacing decimal commas");
    tokio::fs::write(path, text.replace(',', "."))
        .await
        .map_err(|e| JobError::conversion(format!("cannot rewrite {}: {e}", path.display())))
}
