use crate::config::Config;
use crate::engine::{
    CommandConverter, DirectorySession, FormatConverter, HostSession, ImportedMesh,
    MeshStagingPipeline, ProcessExecutor,
};
use crate::model::{
    AlgorithmId, FinalizedResult, JobEvent, JobOutcome, JobRequest, MeshFormat, MeshReference,
    Operator, OutputPolicy,
};
use crate::orchestrator::{ControllerParts, JobController, NamingCounters, ResultFinalizer};
use crate::registry::{AlgorithmRegistry, EnvironmentProbe, LayeredEnvironment};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Exit status after a user-requested cancellation (128 + SIGINT).
const EXIT_CANCELLED: u8 = 130;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "mesh-boolean",
    version,
    about = "Boolean operations on surface meshes through external engines"
)]
pub struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file [default: <config dir>/mesh-boolean/config.json]
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Union of LEFT and RIGHT
    Union(RunArgs),
    /// Intersection of LEFT and RIGHT
    Intersection(RunArgs),
    /// LEFT minus RIGHT
    Difference(RunArgs),
    /// List Boolean engines
    Engines {
        /// Include engines that are not installed
        #[arg(long)]
        all: bool,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Describe one engine and estimate its runtime
    Info {
        engine: AlgorithmId,
        /// Triangle count to estimate runtime for
        #[arg(long)]
        triangles: Option<u64>,
    },
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Engine to run (cgal, igl, vtk, irmb, cork, mcut)
    #[arg(short, long)]
    pub engine: AlgorithmId,

    /// Left operand: a mesh file, or @name for a mesh in the session directory
    pub left: String,

    /// Right operand
    pub right: String,

    /// Write the result here instead of a temporary file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Result name [default: <Operation>_<n>]
    #[arg(long)]
    pub name: Option<String>,

    /// Session directory holding @name meshes and imported results [default: .]
    #[arg(long)]
    pub session_dir: Option<PathBuf>,

    /// Do not import the result into the session directory
    #[arg(long)]
    pub no_import: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,

    /// Converter command, whitespace separated, with {input} and {output} placeholders
    #[arg(long)]
    pub converter: Option<String>,

    /// Format of the final result [default: med]
    #[arg(long)]
    pub canonical_format: Option<MeshFormat>,

    /// Forward engine and converter output to the log
    #[arg(long)]
    pub stream_output: bool,

    /// Cancel the job after this long (e.g. 30s, 10m)
    #[arg(long)]
    pub timeout: Option<humantime::Duration>,
}

pub async fn run(args: Cli) -> Result<ExitCode> {
    let cfg = Config::load(args.config.as_deref())?;
    match args.command {
        Command::Union(run) => run_job(cfg, Operator::Union, run).await,
        Command::Intersection(run) => run_job(cfg, Operator::Intersection, run).await,
        Command::Difference(run) => run_job(cfg, Operator::Difference, run).await,
        Command::Engines { all, json } => {
            list_engines(&cfg, all, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Info { engine, triangles } => {
            describe_engine(&cfg, engine, triangles)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Effective settings for one job: config file values overridden by flags.
#[derive(Debug, Clone)]
struct JobSettings {
    converter: Vec<String>,
    canonical_format: MeshFormat,
    output: OutputPolicy,
    timeout: Option<Duration>,
    session_dir: PathBuf,
}

impl JobSettings {
    fn resolve(cfg: &Config, args: &RunArgs) -> Result<Self> {
        let converter = match args.converter.as_deref() {
            Some(cmd) => {
                let argv: Vec<String> = cmd.split_whitespace().map(str::to_string).collect();
                if argv.is_empty() {
                    anyhow::bail!("--converter must not be empty");
                }
                argv
            }
            None => cfg.converter.clone(),
        };
        Ok(Self {
            converter,
            canonical_format: args.canonical_format.unwrap_or(cfg.canonical_format),
            output: if args.stream_output {
                OutputPolicy::Stream
            } else {
                cfg.output
            },
            timeout: args.timeout.map(Duration::from).or(cfg.timeout),
            session_dir: args
                .session_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(".")),
        })
    }
}

/// Wire up a controller for one CLI invocation.
fn build_controller(
    cfg: &Config,
    settings: &JobSettings,
    session: Arc<DirectorySession>,
    event_tx: mpsc::UnboundedSender<JobEvent>,
) -> JobController {
    let executor = ProcessExecutor::new(settings.output);
    let converter: Arc<dyn FormatConverter> =
        Arc::new(CommandConverter::new(settings.converter.clone(), executor));

    // Continue numbering after results already imported into the session.
    let counters = Arc::new(NamingCounters::new());
    for op in Operator::ALL {
        counters.skip_past(op, session.highest_index(op.display_name()));
    }

    let parts = ControllerParts {
        registry: Arc::new(AlgorithmRegistry::builtin()),
        environment: Arc::new(LayeredEnvironment::new(cfg.environment.clone())),
        staging: Arc::new(MeshStagingPipeline::new(converter.clone(), session)),
        executor,
        finalizer: Arc::new(ResultFinalizer::new(
            converter,
            counters,
            settings.canonical_format,
        )),
    };
    JobController::new(parts, event_tx)
}

#[derive(Serialize)]
struct JobReport<'a> {
    result: &'a FinalizedResult,
    imported: Option<&'a ImportedMesh>,
}

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    Cancel,
    Exit,
}

/// The first ctrl-c cancels the job; another one while it winds down exits at once.
fn interrupt_action(cancel_sent: bool) -> Interrupt {
    if cancel_sent {
        Interrupt::Exit
    } else {
        Interrupt::Cancel
    }
}

async fn run_job(cfg: Config, operator: Operator, args: RunArgs) -> Result<ExitCode> {
    let settings = JobSettings::resolve(&cfg, &args)?;
    let session = Arc::new(DirectorySession::new(&settings.session_dir));
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<JobEvent>();
    let controller = build_controller(&cfg, &settings, session.clone(), evt_tx);

    let mut request = JobRequest::new(
        operator,
        args.engine,
        MeshReference::parse_operand(&args.left),
        MeshReference::parse_operand(&args.right),
    );
    if let Some(path) = &args.output {
        request = request.with_result_path(path);
    }
    if let Some(name) = &args.name {
        request = request.with_result_name(name);
    }

    controller.submit(request).context("job rejected")?;
    let (out_tx, out_handle) = spawn_output_writer();

    let deadline = async {
        match settings.timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => futures::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let mut cancel_sent = false;
    let mut forced = false;

    let outcome = loop {
        tokio::select! {
            ev = evt_rx.recv() => {
                match ev {
                    Some(JobEvent::StateChanged { state, .. }) => {
                        let _ = out_tx.send(OutputLine::Stderr(format!("== {state} ==")));
                    }
                    Some(JobEvent::Info { info, .. }) => {
                        let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
                    }
                    Some(JobEvent::Completed { outcome, .. }) => break Some(*outcome),
                    None => break None,
                }
            }
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::warn!(error = %e, "failed to listen for ctrl-c");
                }
                match interrupt_action(cancel_sent) {
                    Interrupt::Cancel => {
                        cancel_sent = true;
                        let _ = out_tx.send(OutputLine::Stderr("Cancelling… (ctrl-c again to exit)".into()));
                        controller.cancel();
                    }
                    Interrupt::Exit => {
                        let _ = out_tx.send(OutputLine::Stderr("Interrupted, exiting".into()));
                        forced = true;
                        break None;
                    }
                }
            }
            _ = &mut deadline, if !cancel_sent => {
                cancel_sent = true;
                if let Some(d) = settings.timeout {
                    let _ = out_tx.send(OutputLine::Stderr(format!(
                        "Timed out after {}, cancelling…",
                        humantime::format_duration(d)
                    )));
                }
                controller.cancel();
            }
        }
    };

    let code = match outcome {
        Some(outcome) => {
            let code = report_outcome(&args, session.as_ref(), outcome, &out_tx).await;
            if let Err(e) = controller.acknowledge() {
                tracing::warn!(error = %e, "failed to release job");
            }
            code
        }
        // Runtime shutdown drops the job task, which kills the backend process group.
        None if forced => Ok(ExitCode::from(EXIT_CANCELLED)),
        None => Err(anyhow::anyhow!("job ended without an outcome")),
    };

    drop(out_tx);
    let _ = out_handle.await;
    code
}

async fn report_outcome(
    args: &RunArgs,
    session: &DirectorySession,
    outcome: JobOutcome,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Result<ExitCode> {
    let result = match outcome {
        JobOutcome::Succeeded(result) => result,
        JobOutcome::Failed { reason } => anyhow::bail!(reason),
        JobOutcome::Cancelled => {
            let _ = out_tx.send(OutputLine::Stderr("Cancelled".into()));
            return Ok(ExitCode::from(EXIT_CANCELLED));
        }
    };

    let imported = if args.no_import {
        None
    } else {
        // A generated temp file is only a hand-off to the session.
        Some(import_result(session, &result, args.output.is_none()).await?)
    };

    if args.json {
        let report = JobReport {
            result: &result,
            imported: imported.as_ref(),
        };
        let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&report)?));
    } else {
        let registry = AlgorithmRegistry::builtin();
        let descriptor = registry.lookup(result.algorithm)?;
        let summary =
            crate::text_summary::build_text_summary(&result, descriptor, imported.as_ref());
        for line in summary.lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Import `result` into the session. A hand-off file is deleted once imported
/// and kept, with its path in the error, when the import fails.
async fn import_result(
    session: &DirectorySession,
    result: &FinalizedResult,
    handoff: bool,
) -> Result<ImportedMesh> {
    let imported = session
        .import(&result.canonical_path, &result.name)
        .await
        .with_context(|| {
            format!(
                "failed to import result; it was kept at {}",
                result.canonical_path.display()
            )
        })?;
    if handoff {
        remove_handoff(&result.canonical_path).await;
    }
    Ok(imported)
}

async fn remove_handoff(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::debug!(path = %path.display(), error = %e, "failed to remove temporary result");
    }
}

#[derive(Serialize)]
struct EngineEntry<'a> {
    id: AlgorithmId,
    name: &'a str,
    license: &'a str,
    input: MeshFormat,
    output: MeshFormat,
    available: bool,
    executable: Option<PathBuf>,
}

fn list_engines(cfg: &Config, all: bool, json: bool) -> Result<()> {
    let env = LayeredEnvironment::new(cfg.environment.clone());
    let registry = AlgorithmRegistry::builtin();
    let engines: Vec<_> = if all {
        registry.all().iter().collect()
    } else {
        registry.available(&env)
    };

    let entries: Vec<EngineEntry<'_>> = engines
        .iter()
        .map(|d| EngineEntry {
            id: d.id,
            name: d.display_name,
            license: d.license_label,
            input: d.required_input_format,
            output: d.output_format,
            available: d.is_available(&env),
            executable: d.resolve_executable(&env),
        })
        .collect();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&entries)?)?;
        return Ok(());
    }
    if entries.is_empty() {
        eprintln!("No engines installed. Set an engine root variable (e.g. CORK_ROOT_DIR) or SMESH_ROOT_DIR; --all lists every engine.");
        return Ok(());
    }
    for e in &entries {
        writeln!(
            out,
            "{:<5} {:<38} {:>3} -> {:<3}  {}",
            e.id,
            e.name,
            e.input,
            e.output,
            if e.available { "available" } else { "not installed" }
        )?;
    }
    Ok(())
}

fn describe_engine(cfg: &Config, engine: AlgorithmId, triangles: Option<u64>) -> Result<()> {
    let env = LayeredEnvironment::new(cfg.environment.clone());
    let registry = AlgorithmRegistry::builtin();
    let descriptor = registry.lookup(engine)?;
    let summary = crate::text_summary::build_engine_summary(
        descriptor,
        &env as &dyn EnvironmentProbe,
        triangles,
    );
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in summary.lines {
        writeln!(out, "{line}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_subcommand() {
        let cli = Cli::try_parse_from([
            "mesh-boolean",
            "difference",
            "--engine",
            "CORK",
            "box.stl",
            "@sphere",
            "--timeout",
            "90s",
            "--no-import",
        ])
        .unwrap();
        let Command::Difference(run) = cli.command else {
            panic!("expected difference");
        };
        assert_eq!(run.engine, AlgorithmId::Cork);
        assert_eq!(MeshReference::parse_operand(&run.right), MeshReference::live("sphere"));
        assert!(run.no_import);

        let settings = JobSettings::resolve(&Config::default(), &run).unwrap();
        assert_eq!(settings.timeout, Some(Duration::from_secs(90)));
        assert_eq!(settings.canonical_format, MeshFormat::Med);
        assert_eq!(settings.output, OutputPolicy::Discard);
    }

    #[test]
    fn rejects_unknown_engine() {
        assert!(Cli::try_parse_from(["mesh-boolean", "union", "-e", "blender", "a.stl", "b.stl"]).is_err());
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "mesh-boolean",
            "union",
            "-e",
            "cgal",
            "a.stl",
            "b.stl",
            "--converter",
            "meshconv {input} {output}",
            "--canonical-format",
            "stl",
            "--stream-output",
        ])
        .unwrap();
        let Command::Union(run) = cli.command else {
            panic!("expected union");
        };
        let cfg = Config {
            timeout: Some(Duration::from_secs(5)),
            ..Config::default()
        };
        let settings = JobSettings::resolve(&cfg, &run).unwrap();
        assert_eq!(settings.converter, ["meshconv", "{input}", "{output}"]);
        assert_eq!(settings.canonical_format, MeshFormat::Stl);
        assert_eq!(settings.output, OutputPolicy::Stream);
        assert_eq!(settings.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn second_interrupt_exits() {
        assert_eq!(interrupt_action(false), Interrupt::Cancel);
        // Also after a timeout already requested cancellation.
        assert_eq!(interrupt_action(true), Interrupt::Exit);
    }

    fn handoff(dir: &Path, name: &str) -> FinalizedResult {
        let path = dir.join("BooleanMeshCompute_result.med");
        std::fs::write(&path, b"MED").unwrap();
        FinalizedResult {
            name: name.into(),
            canonical_path: path,
            format: MeshFormat::Med,
            operator: Operator::Union,
            algorithm: AlgorithmId::Cgal,
            backend_elapsed: Duration::ZERO,
            finished_utc: String::new(),
        }
    }

    #[tokio::test]
    async fn imported_handoff_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let session = DirectorySession::new(dir.path().join("session"));
        let result = handoff(dir.path(), "Housing");

        let mesh = import_result(&session, &result, true).await.unwrap();
        assert!(mesh.location.exists());
        assert!(!result.canonical_path.exists());
    }

    #[tokio::test]
    async fn failed_import_keeps_the_handoff() {
        let dir = tempfile::tempdir().unwrap();
        let session = DirectorySession::new(dir.path().join("session"));
        let first = handoff(dir.path(), "Housing");
        import_result(&session, &first, true).await.unwrap();

        let second = handoff(dir.path(), "Housing");
        let err = import_result(&session, &second, true).await.unwrap_err();
        assert!(second.canonical_path.exists());
        assert!(err
            .to_string()
            .contains(&second.canonical_path.display().to_string()));
    }
}
