//! Black-box mesh format conversion.

use crate::engine::{CancelSignal, ProcessExecutor, WaitOutcome};
use crate::error::JobError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;

/// meshio one-liner; runs in a separate interpreter so a crash cannot take us down.
pub const DEFAULT_CONVERTER: [&str; 3] = [
    "python3",
    "-c",
    "import meshio; m = meshio.read(\"{input}\"); m.write(\"{output}\")",
];

/// Converts a mesh file into the format implied by the output path.
///
/// Failures are reported as [`JobError::ConversionFailed`]; an observed
/// cancellation as [`JobError::Cancelled`].
#[async_trait]
pub trait FormatConverter: Send + Sync {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        cancel: &mut CancelSignal,
    ) -> Result<(), JobError>;
}

/// Runs an external converter from an argv template with `{input}` and
/// `{output}` placeholders.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    template: Vec<String>,
    executor: ProcessExecutor,
}

impl CommandConverter {
    pub fn new(template: Vec<String>, executor: ProcessExecutor) -> Self {
        Self { template, executor }
    }

    pub fn meshio(executor: ProcessExecutor) -> Self {
        Self::new(DEFAULT_CONVERTER.iter().map(|s| s.to_string()).collect(), executor)
    }

    fn argv(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.template
            .iter()
            .map(|arg| {
                OsString::from(
                    arg.replace("{input}", &input)
                        .replace("{output}", &output),
                )
            })
            .collect()
    }
}

#[async_trait]
impl FormatConverter for CommandConverter {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        cancel: &mut CancelSignal,
    ) -> Result<(), JobError> {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        let argv = self.argv(input, output);
        tracing::debug!(input = %input.display(), output = %output.display(), "converting mesh");

        let mut handle = self.executor.spawn(&argv).map_err(|e| {
            JobError::conversion(format!("converter could not start: {e}"))
        })?;
        match handle.wait_or_cancel(cancel).await? {
            WaitOutcome::Killed(_) => return Err(JobError::Cancelled),
            WaitOutcome::Exited(status) if !status.success() => {
                let code = status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".into());
                return Err(JobError::conversion(format!(
                    "converter failed on {} (exit {code})",
                    input.display()
                )));
            }
            WaitOutcome::Exited(_) => {}
        }

        // A zero exit code is not enough: the output must exist and hold data.
        ensure_non_empty(output).await.map_err(JobError::conversion)?;
        Ok(())
    }
}

/// Size of `path` in bytes, or a reason why it is not a usable mesh file.
pub async fn ensure_non_empty(path: &Path) -> Result<u64, String> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(meta.len()),
        Ok(_) => Err(format!("{} is empty", path.display())),
        Err(e) => Err(format!("{} was not written: {e}", path.display())),
    }
}
