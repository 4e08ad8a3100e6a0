#![cfg(unix)]
//! End-to-end tests of the job controller against fake engines and
//! converters written as `sh` scripts.

use assert_matches::assert_matches;
use mesh_boolean::engine::{CommandConverter, DirectorySession, MeshStagingPipeline, ProcessExecutor};
use mesh_boolean::model::{
    AlgorithmId, InfoEvent, JobEvent, JobOutcome, JobRequest, JobState, MeshFormat,
    MeshReference, Operator,
};
use mesh_boolean::orchestrator::{ControllerParts, JobController, NamingCounters, ResultFinalizer};
use mesh_boolean::registry::{
    benchmarks, AlgorithmDescriptor, AlgorithmRegistry, CommandContext, RawFixup,
};
use mesh_boolean::JobError;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

const MARKER: &str = "FAKE_ENGINE_ROOT";
const COPY: &str = r#"cp "$0" "$1""#;
/// Copies, but takes a second whenever it writes the final result.
const SLOW_FINALIZE: &str = r#"case "$1" in *.med) sleep 1;; esac; cp "$0" "$1""#;
const CONCAT: &str = r#"grep -q FAIL "$2" && exit 3; cat "$2" "$3" > "$4""#;

/// Scripts are run through `sh` so they never need the executable bit.
fn sh_command(ctx: &CommandContext<'_>) -> Vec<OsString> {
    vec![
        "sh".into(),
        ctx.executable.into(),
        ctx.operator.as_str().into(),
        ctx.left.into(),
        ctx.right.into(),
        ctx.output.into(),
    ]
}

fn fake_descriptor(id: AlgorithmId) -> AlgorithmDescriptor {
    AlgorithmDescriptor {
        id,
        display_name: "Fake",
        license_label: "MIT",
        required_input_format: MeshFormat::Obj,
        output_format: MeshFormat::Off,
        command_builder: sh_command,
        benchmarks: &benchmarks::CGAL,
        markers: &[MARKER],
        binary: "engine.sh",
        plugin_dir: "fake",
        raw_fixup: RawFixup::None,
    }
}

struct Harness {
    dir: tempfile::TempDir,
    controller: JobController,
    events: UnboundedReceiver<JobEvent>,
}

impl Harness {
    /// `backend`: engine script body, or `None` for an engine that is not installed.
    fn new(backend: Option<&str>, converter: &str) -> Self {
        let dir = tempfile::Builder::new()
            .prefix("mesh-boolean-test")
            .tempdir()
            .expect("tempdir");
        std::fs::write(dir.path().join("box.stl"), "solid box\n").unwrap();
        std::fs::write(dir.path().join("sphere.stl"), "solid sphere\n").unwrap();
        std::fs::write(dir.path().join("bad.stl"), "FAIL\n").unwrap();

        let mut env = HashMap::new();
        if let Some(script) = backend {
            let bin = dir.path().join("engine").join("bin");
            std::fs::create_dir_all(&bin).unwrap();
            std::fs::write(bin.join("engine.sh"), script).unwrap();
            env.insert(
                MARKER.to_string(),
                dir.path().join("engine").to_string_lossy().into_owned(),
            );
        }

        let executor = ProcessExecutor::default();
        let converter = Arc::new(CommandConverter::new(
            vec![
                "sh".into(),
                "-c".into(),
                converter.into(),
                "{input}".into(),
                "{output}".into(),
            ],
            executor,
        ));
        let (tx, events) = tokio::sync::mpsc::unbounded_channel();
        let parts = ControllerParts {
            registry: Arc::new(AlgorithmRegistry::from_descriptors(vec![fake_descriptor(
                AlgorithmId::Cgal,
            )])),
            environment: Arc::new(env),
            staging: Arc::new(MeshStagingPipeline::new(
                converter.clone(),
                Arc::new(DirectorySession::new(dir.path())),
            )),
            executor,
            finalizer: Arc::new(ResultFinalizer::new(
                converter,
                Arc::new(NamingCounters::new()),
                MeshFormat::Med,
            )),
        };
        Self {
            dir,
            controller: JobController::new(parts, tx),
            events,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn request(&self, op: Operator, left: &str, right: &str) -> JobRequest {
        JobRequest::new(
            op,
            AlgorithmId::Cgal,
            MeshReference::file(self.path(left)),
            MeshReference::file(self.path(right)),
        )
    }

    /// Collect events up to and including the first one matching `stop`.
    async fn events_until(&mut self, stop: impl Fn(&JobEvent) -> bool) -> Vec<JobEvent> {
        let mut seen = Vec::new();
        loop {
            let ev = tokio::time::timeout(Duration::from_secs(20), self.events.recv())
                .await
                .expect("timed out waiting for a job event")
                .expect("event channel closed");
            let done = stop(&ev);
            seen.push(ev);
            if done {
                return seen;
            }
        }
    }

    async fn finish(&mut self) -> (Vec<JobEvent>, JobOutcome) {
        let events = self
            .events_until(|ev| matches!(ev, JobEvent::Completed { .. }))
            .await;
        let Some(JobEvent::Completed { outcome, .. }) = events.last() else {
            unreachable!()
        };
        let outcome = (**outcome).clone();
        (events, outcome)
    }
}

fn states(events: &[JobEvent]) -> Vec<JobState> {
    events
        .iter()
        .filter_map(|ev| match ev {
            JobEvent::StateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}

fn launched(events: &[JobEvent]) -> bool {
    events
        .iter()
        .any(|ev| matches!(ev, JobEvent::Info { info: InfoEvent::Launched { .. }, .. }))
}

#[tokio::test]
async fn intersection_runs_end_to_end() {
    let mut h = Harness::new(Some(CONCAT), COPY);
    let out = h.path("result.med");
    let id = h
        .controller
        .submit(h.request(Operator::Intersection, "box.stl", "sphere.stl").with_result_path(&out))
        .unwrap();

    let (events, outcome) = h.finish().await;
    let result = assert_matches!(outcome, JobOutcome::Succeeded(r) => r);
    assert_eq!(result.name, "Intersection_1");
    assert_eq!(result.canonical_path, out);
    assert_eq!(result.format, MeshFormat::Med);
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "solid box\nsolid sphere\n");
    assert_eq!(
        states(&events),
        [JobState::Preparing, JobState::Running, JobState::Succeeded]
    );
    assert!(events.iter().all(|ev| match ev {
        JobEvent::StateChanged { job, .. } | JobEvent::Info { job, .. } | JobEvent::Completed { job, .. } =>
            *job == id,
    }));

    let record = h.controller.snapshot().unwrap();
    assert_eq!(record.state, JobState::Succeeded);
    assert_eq!(record.canonical_result.as_deref(), Some(out.as_path()));
    assert_eq!(record.process_id, None);
    assert_eq!(record.exit_code, Some(0));
    let staged_left = record.staged_left.clone().unwrap();
    assert_eq!(staged_left.extension().unwrap(), "obj");

    let acked = h.controller.acknowledge().unwrap().unwrap();
    assert_eq!(acked.id, id);
    assert_eq!(acked.state, JobState::Succeeded);
    assert_eq!(h.controller.state(), JobState::Idle);
    assert!(h.controller.snapshot().is_none());

    // Workspace removal is scheduled in the background.
    let workspace = acked.workspace.unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while workspace.exists() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!workspace.exists());
    assert!(!staged_left.exists());
    // The canonical result now belongs to the caller.
    assert!(out.exists());
}

#[tokio::test]
async fn second_submit_is_rejected_while_a_job_runs() {
    let mut h = Harness::new(Some("exec sleep 30"), COPY);
    let first = h
        .controller
        .submit(h.request(Operator::Union, "box.stl", "sphere.stl"))
        .unwrap();
    h.events_until(|ev| matches!(ev, JobEvent::StateChanged { state: JobState::Running, .. }))
        .await;

    assert_matches!(
        h.controller.submit(h.request(Operator::Union, "box.stl", "sphere.stl")),
        Err(JobError::InvalidRequest(_))
    );
    assert_matches!(h.controller.acknowledge(), Err(JobError::InvalidRequest(_)));
    assert_eq!(h.controller.snapshot().unwrap().id, first);

    h.controller.cancel();
    let (_, outcome) = h.finish().await;
    assert_eq!(outcome, JobOutcome::Cancelled);

    // Still rejected until the terminal state is acknowledged.
    assert_matches!(
        h.controller.submit(h.request(Operator::Union, "box.stl", "sphere.stl")),
        Err(JobError::InvalidRequest(_))
    );
    h.controller.acknowledge().unwrap();
    assert!(h.controller.submit(h.request(Operator::Union, "box.stl", "sphere.stl")).is_ok());
    h.controller.cancel();
    h.finish().await;
}

#[tokio::test]
async fn cancel_during_staging_never_launches_the_engine() {
    let mut h = Harness::new(Some(CONCAT), r#"sleep 30; cp "$0" "$1""#);
    let started = Instant::now();
    h.controller
        .submit(h.request(Operator::Union, "box.stl", "sphere.stl"))
        .unwrap();
    h.controller.cancel();
    // A second cancel is harmless.
    h.controller.cancel();

    let (events, outcome) = h.finish().await;
    assert_eq!(outcome, JobOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(15));
    assert_eq!(
        states(&events),
        [JobState::Preparing, JobState::Cancelling, JobState::Cancelled]
    );
    assert!(!launched(&events));
    let record = h.controller.snapshot().unwrap();
    assert_eq!(record.process_id, None);
    assert_eq!(record.canonical_result, None);
}

#[tokio::test]
async fn cancel_while_running_kills_the_engine() {
    let mut h = Harness::new(Some("exec sleep 30"), COPY);
    h.controller
        .submit(h.request(Operator::Difference, "box.stl", "sphere.stl"))
        .unwrap();
    let events = h
        .events_until(|ev| matches!(ev, JobEvent::Info { info: InfoEvent::Launched { .. }, .. }))
        .await;
    assert!(states(&events).contains(&JobState::Running));
    assert!(h.controller.snapshot().unwrap().process_id.is_some());

    let started = Instant::now();
    h.controller.cancel();
    let (events, outcome) = h.finish().await;
    assert_eq!(outcome, JobOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(states(&events), [JobState::Cancelling, JobState::Cancelled]);

    let record = h.controller.snapshot().unwrap();
    assert_eq!(record.process_id, None);
    assert_eq!(record.failure_reason, None);
}

/// Zombies count as dead: nothing may be reaping orphans inside a container.
fn alive(pid: &str) -> bool {
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        let state = stat.rsplit(')').next().and_then(|rest| rest.trim().chars().next());
        return !matches!(state, Some('Z') | Some('X'));
    }
    if std::path::Path::new("/proc/self").exists() {
        return false;
    }
    std::process::Command::new("kill")
        .args(["-0", pid])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn cancel_kills_engines_behind_a_wrapper() {
    let wrapper = r#"sleep 30 & echo $! > "$(dirname "$0")/worker.pid"; wait; echo done > "$4""#;
    let mut h = Harness::new(Some(wrapper), COPY);
    h.controller
        .submit(h.request(Operator::Union, "box.stl", "sphere.stl"))
        .unwrap();
    h.events_until(|ev| matches!(ev, JobEvent::Info { info: InfoEvent::Launched { .. }, .. }))
        .await;

    let pid_file = h.path("engine/bin/worker.pid");
    let mut worker = String::new();
    for _ in 0..100 {
        worker = std::fs::read_to_string(&pid_file).unwrap_or_default().trim().to_string();
        if !worker.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!worker.is_empty(), "wrapper never started its worker");

    let started = Instant::now();
    h.controller.cancel();
    let (_, outcome) = h.finish().await;
    assert_eq!(outcome, JobOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10));
    for _ in 0..100 {
        if !alive(&worker) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!alive(&worker), "worker {worker} outlived the cancelled job");
}

#[tokio::test]
async fn cancel_after_engine_success_keeps_the_result() {
    let mut h = Harness::new(Some(CONCAT), SLOW_FINALIZE);
    let out = h.path("kept.med");
    h.controller
        .submit(h.request(Operator::Union, "box.stl", "sphere.stl").with_result_path(&out))
        .unwrap();
    h.events_until(|ev| {
        matches!(ev, JobEvent::Info { info: InfoEvent::BackendExited { code: Some(0), .. }, .. })
    })
    .await;

    h.controller.cancel();
    let (_, outcome) = h.finish().await;
    let result = assert_matches!(outcome, JobOutcome::Succeeded(r) => r);
    assert_eq!(result.name, "Union_1");
    assert!(out.exists());
    assert_eq!(h.controller.state(), JobState::Succeeded);
}

#[tokio::test]
async fn only_successful_jobs_consume_names() {
    let mut h = Harness::new(Some(CONCAT), COPY);
    let mut names = Vec::new();

    for left in ["box.stl", "bad.stl", "box.stl", "missing.stl", "box.stl"] {
        let out = h.path(&format!("out-{}.med", names.len()));
        h.controller
            .submit(h.request(Operator::Union, left, "sphere.stl").with_result_path(&out))
            .unwrap();
        match h.finish().await.1 {
            JobOutcome::Succeeded(r) => names.push(r.name),
            JobOutcome::Failed { reason } if left == "bad.stl" => {
                assert_eq!(reason, "backend exited with code 3");
            }
            JobOutcome::Failed { reason } => {
                assert!(reason.starts_with("staging failed"), "{reason}");
            }
            JobOutcome::Cancelled => panic!("unexpected cancellation"),
        }
        h.controller.acknowledge().unwrap();
    }
    assert_eq!(names, ["Union_1", "Union_2", "Union_3"]);

    // An explicit name bypasses the counter.
    h.controller
        .submit(
            h.request(Operator::Union, "box.stl", "sphere.stl")
                .with_result_path(h.path("named.med"))
                .with_result_name("Housing"),
        )
        .unwrap();
    let result = assert_matches!(h.finish().await.1, JobOutcome::Succeeded(r) => r);
    assert_eq!(result.name, "Housing");
}

#[tokio::test]
async fn staging_failure_spawns_nothing() {
    let mut h = Harness::new(Some(CONCAT), COPY);
    h.controller
        .submit(h.request(Operator::Union, "missing.stl", "sphere.stl"))
        .unwrap();
    let (events, outcome) = h.finish().await;
    assert_matches!(outcome, JobOutcome::Failed { reason } if reason.contains("missing.stl"));
    assert_eq!(states(&events), [JobState::Preparing, JobState::Failed]);
    assert!(!launched(&events));
}

#[tokio::test]
async fn uninstalled_engine_fails_after_submit() {
    let mut h = Harness::new(None, COPY);
    h.controller
        .submit(h.request(Operator::Union, "box.stl", "sphere.stl"))
        .unwrap();
    let (events, outcome) = h.finish().await;
    assert_matches!(outcome, JobOutcome::Failed { reason } if reason.contains(MARKER));
    assert!(!launched(&events));
}

#[tokio::test]
async fn missing_engine_file_is_a_spawn_failure() {
    let mut h = Harness::new(Some(CONCAT), COPY);
    std::fs::remove_file(h.path("engine/bin/engine.sh")).unwrap();
    h.controller
        .submit(h.request(Operator::Union, "box.stl", "sphere.stl"))
        .unwrap();
    let (events, outcome) = h.finish().await;
    assert_matches!(outcome, JobOutcome::Failed { reason } if reason.contains("engine.sh"));
    assert!(!launched(&events));
}

#[tokio::test]
async fn engine_outside_the_registry_is_rejected_synchronously() {
    let mut h = Harness::new(Some(CONCAT), COPY);
    let mut req = h.request(Operator::Union, "box.stl", "sphere.stl");
    req.algorithm = AlgorithmId::Mcut;
    assert_matches!(
        h.controller.submit(req),
        Err(JobError::UnknownAlgorithm(id)) if id == "mcut"
    );
    assert_eq!(h.controller.state(), JobState::Idle);
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn empty_engine_output_is_a_conversion_failure() {
    let mut h = Harness::new(Some(r#": > "$4""#), COPY);
    let out = h.path("never.med");
    h.controller
        .submit(h.request(Operator::Union, "box.stl", "sphere.stl").with_result_path(&out))
        .unwrap();
    let (_, outcome) = h.finish().await;
    assert_matches!(outcome, JobOutcome::Failed { reason } if reason.starts_with("result conversion failed"));
    assert!(!out.exists());

    let record = h.controller.snapshot().unwrap();
    assert_eq!(record.exit_code, Some(0));
    assert_eq!(record.canonical_result, None);
}

#[tokio::test]
async fn live_handles_are_exported_from_the_session() {
    let mut h = Harness::new(Some(CONCAT), COPY);
    std::fs::write(h.path("gear.stl"), "solid gear\n").unwrap();
    let out = h.path("gear-out.med");
    let req = JobRequest::new(
        Operator::Union,
        AlgorithmId::Cgal,
        MeshReference::live("gear"),
        MeshReference::file(h.path("box.stl")),
    )
    .with_result_path(&out);
    h.controller.submit(req).unwrap();
    let (_, outcome) = h.finish().await;
    assert_matches!(outcome, JobOutcome::Succeeded(_));
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "solid gear\nsolid box\n");
}
