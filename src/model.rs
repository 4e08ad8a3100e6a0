use crate::error::JobError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Boolean set operation applied to the two operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Union,
    Intersection,
    Difference,
}

impl Operator {
    pub const ALL: [Operator; 3] = [
        Operator::Union,
        Operator::Intersection,
        Operator::Difference,
    ];

    /// Token understood by most backends.
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Union => "union",
            Operator::Intersection => "intersection",
            Operator::Difference => "difference",
        }
    }

    /// Prefix used for generated result names (`Union_3`).
    pub fn display_name(self) -> &'static str {
        match self {
            Operator::Union => "Union",
            Operator::Intersection => "Intersection",
            Operator::Difference => "Difference",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a built-in Boolean engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmId {
    Cgal,
    Igl,
    Vtk,
    Irmb,
    Cork,
    Mcut,
}

impl AlgorithmId {
    pub const ALL: [AlgorithmId; 6] = [
        AlgorithmId::Cgal,
        AlgorithmId::Igl,
        AlgorithmId::Vtk,
        AlgorithmId::Irmb,
        AlgorithmId::Cork,
        AlgorithmId::Mcut,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AlgorithmId::Cgal => "cgal",
            AlgorithmId::Igl => "igl",
            AlgorithmId::Vtk => "vtk",
            AlgorithmId::Irmb => "irmb",
            AlgorithmId::Cork => "cork",
            AlgorithmId::Mcut => "mcut",
        }
    }
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmId {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        AlgorithmId::ALL
            .into_iter()
            .find(|id| id.as_str() == wanted)
            .ok_or_else(|| JobError::UnknownAlgorithm(s.to_string()))
    }
}

/// Mesh file formats the pipeline knows how to name and route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshFormat {
    Stl,
    Obj,
    Off,
    Ply,
    Med,
    Unv,
    Cgns,
    Gmf,
    Vtk,
    Vtu,
}

impl MeshFormat {
    pub fn extension(self) -> &'static str {
        match self {
            MeshFormat::Stl => "stl",
            MeshFormat::Obj => "obj",
            MeshFormat::Off => "off",
            MeshFormat::Ply => "ply",
            MeshFormat::Med => "med",
            MeshFormat::Unv => "unv",
            MeshFormat::Cgns => "cgns",
            MeshFormat::Gmf => "mesh",
            MeshFormat::Vtk => "vtk",
            MeshFormat::Vtu => "vtu",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let fmt = match ext.to_ascii_lowercase().as_str() {
            "stl" => MeshFormat::Stl,
            "obj" => MeshFormat::Obj,
            "off" => MeshFormat::Off,
            "ply" => MeshFormat::Ply,
            "med" => MeshFormat::Med,
            "unv" => MeshFormat::Unv,
            "cgns" => MeshFormat::Cgns,
            "mesh" | "meshb" => MeshFormat::Gmf,
            "vtk" => MeshFormat::Vtk,
            "vtu" => MeshFormat::Vtu,
            _ => return None,
        };
        Some(fmt)
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Surface formats that hold only polygonal faces. Anything else may carry
    /// volume or mixed cells and is routed through an STL intermediate.
    pub fn is_surface(self) -> bool {
        matches!(
            self,
            MeshFormat::Stl | MeshFormat::Obj | MeshFormat::Off | MeshFormat::Ply
        )
    }
}

impl fmt::Display for MeshFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for MeshFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MeshFormat::from_extension(s.trim().trim_start_matches('.'))
            .ok_or_else(|| format!("unsupported mesh format: {s}"))
    }
}

/// An operand before staging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeshReference {
    FilePath {
        path: PathBuf,
        format_hint: Option<MeshFormat>,
    },
    /// Name of a mesh living in the host session.
    LiveHandle(String),
}

impl MeshReference {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        MeshReference::FilePath {
            path: path.into(),
            format_hint: None,
        }
    }

    pub fn live(name: impl Into<String>) -> Self {
        MeshReference::LiveHandle(name.into())
    }

    /// Parse a command-line operand: `@name` is a live handle, anything else a path.
    pub fn parse_operand(raw: &str) -> Self {
        match raw.strip_prefix('@') {
            Some(name) => MeshReference::live(name),
            None => MeshReference::file(raw),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MeshReference::FilePath { path, .. } => path.as_os_str().is_empty(),
            MeshReference::LiveHandle(name) => name.trim().is_empty(),
        }
    }
}

impl fmt::Display for MeshReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshReference::FilePath { path, .. } => write!(f, "{}", path.display()),
            MeshReference::LiveHandle(name) => write!(f, "@{name}"),
        }
    }
}

/// Which side of the operation an operand sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Left,
    Right,
}

impl Operand {
    pub fn as_str(self) -> &'static str {
        match self {
            Operand::Left => "left",
            Operand::Right => "right",
        }
    }
}

/// Everything needed to run one Boolean operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub operator: Operator,
    pub algorithm: AlgorithmId,
    pub left: MeshReference,
    pub right: MeshReference,
    #[serde(default)]
    pub result_path_hint: Option<PathBuf>,
    /// Explicit result name; bypasses the naming counters.
    #[serde(default)]
    pub result_name: Option<String>,
}

impl JobRequest {
    pub fn new(
        operator: Operator,
        algorithm: AlgorithmId,
        left: MeshReference,
        right: MeshReference,
    ) -> Self {
        Self {
            operator,
            algorithm,
            left,
            right,
            result_path_hint: None,
            result_name: None,
        }
    }

    pub fn with_result_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.result_path_hint = Some(path.into());
        self
    }

    pub fn with_result_name(mut self, name: impl Into<String>) -> Self {
        self.result_name = Some(name.into());
        self
    }

    pub fn validate(&self) -> Result<(), JobError> {
        if self.left.is_empty() {
            return Err(JobError::InvalidRequest("left operand is empty".into()));
        }
        if self.right.is_empty() {
            return Err(JobError::InvalidRequest("right operand is empty".into()));
        }
        if let Some(name) = &self.result_name {
            if name.trim().is_empty() {
                return Err(JobError::InvalidRequest("result name is empty".into()));
            }
        }
        Ok(())
    }
}

/// Opaque job identifier, unique per submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl JobId {
    pub fn generate() -> Self {
        JobId(rand::random())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Idle,
    Preparing,
    Running,
    Cancelling,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobState::Preparing | JobState::Running | JobState::Cancelling
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Idle => "idle",
            JobState::Preparing => "preparing",
            JobState::Running => "running",
            JobState::Cancelling => "cancelling",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A converted, named result ready for import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedResult {
    pub name: String,
    pub canonical_path: PathBuf,
    pub format: MeshFormat,
    pub operator: Operator,
    pub algorithm: AlgorithmId,
    #[serde(with = "humantime_serde")]
    pub backend_elapsed: Duration,
    pub finished_utc: String,
}

/// How a job ended. Cancellation is deliberately not a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobOutcome {
    Succeeded(FinalizedResult),
    Failed { reason: String },
    Cancelled,
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Succeeded(_) => JobState::Succeeded,
            JobOutcome::Failed { .. } => JobState::Failed,
            JobOutcome::Cancelled => JobState::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    StateChanged {
        job: JobId,
        state: JobState,
    },
    Info {
        job: JobId,
        info: InfoEvent,
    },
    Completed {
        job: JobId,
        // Box to keep JobEvent small; the result carries paths and strings.
        outcome: Box<JobOutcome>,
    },
}

/// Progress details emitted while a job runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    Staged { operand: Operand, path: PathBuf },
    Launched { pid: Option<u32>, command: String },
    BackendExited { code: Option<i32>, elapsed_ms: u64 },
}

impl InfoEvent {
    /// Render a human-readable message for CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::Staged { operand, path } => {
                format!("Staged {} operand: {}", operand.as_str(), path.display())
            }
            InfoEvent::Launched { pid, command } => match pid {
                Some(pid) => format!("Launched backend (pid {pid}): {command}"),
                None => format!("Launched backend: {command}"),
            },
            InfoEvent::BackendExited { code, elapsed_ms } => match code {
                Some(code) => format!("Backend exited with code {code} after {elapsed_ms} ms"),
                None => format!("Backend terminated by signal after {elapsed_ms} ms"),
            },
        }
    }
}

/// What happens to backend and converter stdout/stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputPolicy {
    #[default]
    Discard,
    /// Forward each line to the log.
    Stream,
}
