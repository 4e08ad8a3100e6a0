//! Job lifecycle controller.
//!
//! Owns the single in-flight job, drives it through staging, execution and
//! finalization on a background task, and emits events for presentation layers.

use crate::engine::{
    cancel_pair, describe_exit, CancelSignal, CancelTrigger, JobWorkspace, MeshStagingPipeline,
    ProcessExecutor, WaitOutcome,
};
use crate::error::JobError;
use crate::model::{
    FinalizedResult, InfoEvent, JobEvent, JobId, JobOutcome, JobRequest, JobState, Operand,
};
use crate::orchestrator::ResultFinalizer;
use crate::registry::{AlgorithmRegistry, CommandContext, EnvironmentProbe};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;

/// Collaborators a controller drives. Built once by the caller.
pub struct ControllerParts {
    pub registry: Arc<AlgorithmRegistry>,
    pub environment: Arc<dyn EnvironmentProbe>,
    pub staging: Arc<MeshStagingPipeline>,
    pub executor: ProcessExecutor,
    pub finalizer: Arc<ResultFinalizer>,
}

/// Snapshot of a job's runtime record.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub request: JobRequest,
    pub state: JobState,
    pub workspace: Option<PathBuf>,
    pub staged_left: Option<PathBuf>,
    pub staged_right: Option<PathBuf>,
    pub raw_result: Option<PathBuf>,
    pub canonical_result: Option<PathBuf>,
    /// Set only while the backend runs (`Running` or `Cancelling`).
    pub process_id: Option<u32>,
    pub exit_code: Option<i32>,
    pub failure_reason: Option<String>,
    pub result: Option<FinalizedResult>,
}

impl JobRecord {
    fn new(id: JobId, request: JobRequest) -> Self {
        Self {
            id,
            request,
            state: JobState::Preparing,
            workspace: None,
            staged_left: None,
            staged_right: None,
            raw_result: None,
            canonical_result: None,
            process_id: None,
            exit_code: None,
            failure_reason: None,
            result: None,
        }
    }
}

struct Job {
    record: JobRecord,
    workspace: Option<JobWorkspace>,
    cancel: CancelTrigger,
}

struct Slot {
    state: JobState,
    job: Option<Job>,
}

struct Shared {
    parts: ControllerParts,
    event_tx: UnboundedSender<JobEvent>,
    slot: Mutex<Slot>,
}

/// Runs at most one Boolean job at a time.
///
/// Every method returns immediately; progress and the final outcome arrive
/// as [`JobEvent`]s on the channel given to [`JobController::new`]. Must be
/// used from within a tokio runtime.
#[derive(Clone)]
pub struct JobController {
    shared: Arc<Shared>,
}

impl JobController {
    pub fn new(parts: ControllerParts, event_tx: UnboundedSender<JobEvent>) -> Self {
        Self {
            shared: Arc::new(Shared {
                parts,
                event_tx,
                slot: Mutex::new(Slot {
                    state: JobState::Idle,
                    job: None,
                }),
            }),
        }
    }

    pub fn registry(&self) -> &AlgorithmRegistry {
        &self.shared.parts.registry
    }

    pub fn state(&self) -> JobState {
        self.shared.lock().state
    }

    pub fn snapshot(&self) -> Option<JobRecord> {
        let slot = self.shared.lock();
        slot.job.as_ref().map(|job| {
            let mut record = job.record.clone();
            record.state = slot.state;
            record
        })
    }

    /// Start a job. Rejected unless the controller is idle.
    pub fn submit(&self, request: JobRequest) -> Result<JobId, JobError> {
        request.validate()?;
        self.shared.parts.registry.lookup(request.algorithm)?;

        let id = JobId::generate();
        let (trigger, signal) = cancel_pair();
        {
            let mut slot = self.shared.lock();
            if slot.state != JobState::Idle {
                return Err(JobError::InvalidRequest(format!(
                    "a job is already {}",
                    slot.state
                )));
            }
            slot.state = JobState::Preparing;
            slot.job = Some(Job {
                record: JobRecord::new(id, request.clone()),
                workspace: None,
                cancel: trigger,
            });
            self.shared.emit(JobEvent::StateChanged {
                job: id,
                state: JobState::Preparing,
            });
        }
        tracing::info!(
            job = %id,
            engine = %request.algorithm,
            operator = %request.operator,
            left = %request.left,
            right = %request.right,
            "job submitted"
        );

        let shared = self.shared.clone();
        tokio::spawn(async move { shared.drive(id, request, signal).await });
        Ok(id)
    }

    /// Request cancellation. A no-op unless a job is preparing or running.
    pub fn cancel(&self) {
        let mut slot = self.shared.lock();
        let current = slot.state;
        match current {
            JobState::Preparing | JobState::Running => {
                slot.state = JobState::Cancelling;
                if let Some(job) = &slot.job {
                    tracing::info!(job = %job.record.id, "cancelling job");
                    job.cancel.cancel();
                    self.shared.emit(JobEvent::StateChanged {
                        job: job.record.id,
                        state: JobState::Cancelling,
                    });
                }
            }
            state => tracing::debug!(%state, "cancel ignored"),
        }
    }

    /// Release a finished job and schedule removal of its workspace.
    ///
    /// Returns the final record; the canonical result it names now belongs to
    /// the caller. `None` when there was nothing to acknowledge.
    pub fn acknowledge(&self) -> Result<Option<JobRecord>, JobError> {
        let job = {
            let mut slot = self.shared.lock();
            let state = slot.state;
            if state == JobState::Idle {
                return Ok(None);
            }
            if !state.is_terminal() {
                return Err(JobError::InvalidRequest(format!(
                    "cannot acknowledge a job that is {state}"
                )));
            }
            slot.state = JobState::Idle;
            let job = slot.job.take().map(|mut job| {
                job.record.state = state;
                job
            });
            if let Some(job) = &job {
                self.shared.emit(JobEvent::StateChanged {
                    job: job.record.id,
                    state: JobState::Idle,
                });
            }
            job
        };

        let Some(job) = job else {
            return Ok(None);
        };
        if let Some(workspace) = job.workspace {
            remove_workspace(job.record.id, workspace);
        }
        Ok(Some(job.record))
    }
}

fn remove_workspace(id: JobId, workspace: JobWorkspace) {
    let remove = move || {
        let path = workspace.path().to_path_buf();
        match workspace.remove() {
            Ok(()) => tracing::debug!(job = %id, path = %path.display(), "workspace removed"),
            Err(e) => {
                tracing::warn!(job = %id, path = %path.display(), error = %e, "failed to remove workspace")
            }
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(rt) => {
            rt.spawn_blocking(remove);
        }
        Err(_) => remove(),
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: JobEvent) {
        let _ = self.event_tx.send(event);
    }

    fn info(&self, job: JobId, info: InfoEvent) {
        tracing::debug!(job = %job, "{}", info.to_message());
        self.emit(JobEvent::Info { job, info });
    }

    /// Run `f` on the job `id` if it is still the current one.
    fn with_job<R>(&self, id: JobId, f: impl FnOnce(&mut JobState, &mut Job) -> R) -> Option<R> {
        let mut guard = self.lock();
        let slot = &mut *guard;
        match slot.job.as_mut() {
            Some(job) if job.record.id == id => Some(f(&mut slot.state, job)),
            _ => None,
        }
    }

    async fn drive(self: Arc<Self>, id: JobId, request: JobRequest, mut cancel: CancelSignal) {
        let outcome = match self.execute(id, &request, &mut cancel).await {
            Ok(result) => JobOutcome::Succeeded(result),
            Err(JobError::Cancelled) => JobOutcome::Cancelled,
            Err(e) => JobOutcome::Failed {
                reason: e.to_string(),
            },
        };
        self.complete(id, outcome);
    }

    async fn execute(
        &self,
        id: JobId,
        request: &JobRequest,
        cancel: &mut CancelSignal,
    ) -> Result<FinalizedResult, JobError> {
        let parts = &self.parts;
        let descriptor = parts.registry.lookup(request.algorithm)?;

        let workspace = JobWorkspace::create()
            .map_err(|e| JobError::staging(format!("cannot create job workspace: {e}")))?;
        let workdir = workspace.path().to_path_buf();
        self.with_job(id, |_, job| {
            job.record.workspace = Some(workdir.clone());
            job.workspace = Some(workspace);
        });

        let mut staged = Vec::with_capacity(2);
        for (operand, reference) in [(Operand::Left, &request.left), (Operand::Right, &request.right)] {
            let path = parts
                .staging
                .stage(reference, descriptor.required_input_format, &workdir, operand.as_str(), cancel)
                .await?;
            self.with_job(id, |_, job| match operand {
                Operand::Left => job.record.staged_left = Some(path.clone()),
                Operand::Right => job.record.staged_right = Some(path.clone()),
            });
            self.info(id, InfoEvent::Staged { operand, path: path.clone() });
            staged.push(path);
        }
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let executable = descriptor
            .resolve_executable(parts.environment.as_ref())
            .ok_or_else(|| JobError::missing_backend(descriptor.id, descriptor.markers))?;
        // Script engines run through an interpreter that would start regardless.
        if !tokio::fs::try_exists(&executable).await.unwrap_or(false) {
            return Err(JobError::SpawnFailed {
                program: executable.display().to_string(),
                reason: "no such file".into(),
            });
        }
        let raw = workdir.join(format!("result.{}", descriptor.output_format.extension()));
        let argv = descriptor.command(&CommandContext {
            executable: &executable,
            operator: request.operator,
            left: &staged[0],
            right: &staged[1],
            output: &raw,
        });

        let mut handle = parts.executor.spawn(&argv)?;
        let started = Instant::now();
        let pid = handle.id();
        self.with_job(id, |state, job| {
            job.record.process_id = pid;
            job.record.raw_result = Some(raw.clone());
            // A cancel that landed during staging keeps the job in Cancelling.
            if *state == JobState::Preparing {
                *state = JobState::Running;
                self.emit(JobEvent::StateChanged {
                    job: id,
                    state: JobState::Running,
                });
            }
        });
        let command = argv
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(job = %id, pid = ?pid, engine = %descriptor.id, "backend started");
        self.info(id, InfoEvent::Launched { pid, command });

        let outcome = handle.wait_or_cancel(cancel).await?;
        let elapsed = started.elapsed();
        let (status, killed) = match outcome {
            WaitOutcome::Exited(status) => (status, false),
            WaitOutcome::Killed(status) => (status, true),
        };
        self.with_job(id, |_, job| {
            job.record.process_id = None;
            job.record.exit_code = status.code();
        });
        self.info(
            id,
            InfoEvent::BackendExited {
                code: status.code(),
                elapsed_ms: elapsed.as_millis() as u64,
            },
        );
        if killed {
            return Err(JobError::Cancelled);
        }
        if !status.success() {
            return Err(JobError::BackendExecutionFailed {
                reason: describe_exit(status),
            });
        }

        parts
            .finalizer
            .finalize(request, descriptor, &raw, elapsed)
            .await
    }

    fn complete(&self, id: JobId, outcome: JobOutcome) {
        match &outcome {
            JobOutcome::Succeeded(result) => tracing::info!(
                job = %id,
                name = %result.name,
                path = %result.canonical_path.display(),
                "job succeeded"
            ),
            JobOutcome::Failed { reason } => tracing::warn!(job = %id, %reason, "job failed"),
            JobOutcome::Cancelled => tracing::info!(job = %id, "job cancelled"),
        }

        let state = outcome.state();
        // Both events go out under the lock so an acknowledgement cannot slip in between.
        let applied = self.with_job(id, |slot_state, job| {
            *slot_state = state;
            job.record.process_id = None;
            match &outcome {
                JobOutcome::Succeeded(result) => {
                    job.record.canonical_result = Some(result.canonical_path.clone());
                    job.record.result = Some(result.clone());
                }
                JobOutcome::Failed { reason } => job.record.failure_reason = Some(reason.clone()),
                JobOutcome::Cancelled => {}
            }
            self.emit(JobEvent::StateChanged { job: id, state });
            self.emit(JobEvent::Completed {
                job: id,
                outcome: Box::new(outcome),
            });
        });
        if applied.is_none() {
            tracing::warn!(job = %id, "job vanished before completion");
        }
    }
}
