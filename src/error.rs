//! Error kinds surfaced by the job pipeline.

use crate::model::AlgorithmId;

/// Every way a job can fail to produce a result.
///
/// All variants except [`JobError::Cancelled`] end a job in the `Failed`
/// state with the `Display` text as its reason. `Cancelled` only travels
/// inside the pipeline and always maps to the `Cancelled` terminal state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("staging failed: {reason}")]
    StagingFailed { reason: String },

    #[error("failed to launch {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("{reason}")]
    BackendExecutionFailed { reason: String },

    #[error("result conversion failed: {reason}")]
    ConversionFailed { reason: String },

    #[error("import failed: {reason}")]
    ImportFailed { reason: String },

    #[error("cancelled")]
    Cancelled,
}

impl JobError {
    pub(crate) fn staging(reason: impl Into<String>) -> Self {
        JobError::StagingFailed {
            reason: reason.into(),
        }
    }

    pub(crate) fn conversion(reason: impl Into<String>) -> Self {
        JobError::ConversionFailed {
            reason: reason.into(),
        }
    }

    pub(crate) fn missing_backend(id: AlgorithmId, markers: &[&str]) -> Self {
        JobError::SpawnFailed {
            program: id.to_string(),
            reason: format!(
                "executable not found (set {} or SMESH_ROOT_DIR)",
                markers.join(" or ")
            ),
        }
    }
}
