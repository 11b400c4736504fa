//! `gate` CLI: verify a project, inspect readiness, manage the TDD baseline.
//!
//! `gate verify` prints the `GateResult` JSON on stdout. Diagnostics and the
//! agent feedback note go to stderr.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::warn;

use gate::core::readiness::DetectionMode;
use gate::core::types::Task;
use gate::detector::ProjectStateDetector;
use gate::error::GateError;
use gate::exit_codes;
use gate::feedback::render_feedback;
use gate::gate::{Gate, load_project_analysis};
use gate::io::baseline_store::{clear_baseline, load_baseline};
use gate::io::config::{GateConfig, config_path, load_config};
use gate::io::context::ExecContext;
use gate::io::process::OutputObserver;
use gate::logging;
use gate::timeout::SmartTimeout;

#[derive(Parser)]
#[command(
    name = "gate",
    version,
    about = "Verification gate for agent-made changes"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build, then test, and print the gate result as JSON.
    Verify(VerifyArgs),
    /// Print whether the project is ready to build and test.
    Detect(ProjectArgs),
    /// Inspect or reset the TDD baseline.
    Baseline(BaselineArgs),
}

#[derive(ValueEnum, Clone, Copy, PartialEq, Eq, Debug)]
enum BaselineAction {
    /// Print the stored baseline.
    Show,
    /// Delete the baseline so the next TDD run captures a new one.
    Clear,
}

#[derive(Args)]
struct ProjectArgs {
    /// Project root.
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Config file. Defaults to `<root>/.ralph/gate.toml`.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct BaselineArgs {
    #[arg(value_enum)]
    action: BaselineAction,
    #[command(flatten)]
    project: ProjectArgs,
}

#[derive(Args)]
struct VerifyArgs {
    #[command(flatten)]
    project: ProjectArgs,
    /// Task JSON (`description`, `metadata`) used for gate overrides.
    #[arg(long)]
    task: Option<PathBuf>,
    /// Session id for session-scoped baselines.
    #[arg(long)]
    session: Option<String>,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            if err.downcast_ref::<GateError>().is_some_and(GateError::is_config) {
                eprintln!("hint: check .ralph/gate.toml (or the file passed with --config)");
            }
            exit_codes::ERROR
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Verify(args) => cmd_verify(&args),
        Command::Detect(project) => cmd_detect(&project),
        Command::Baseline(args) => cmd_baseline(args.action, &args.project),
    }
}

fn cmd_verify(args: &VerifyArgs) -> Result<i32> {
    let (root, mut cfg) = load_project(&args.project)?;
    if let Some(session) = &args.session {
        cfg.tdd.session_id = Some(session.clone());
    }
    let task = match &args.task {
        Some(path) => read_task(path)?,
        None => Task::default(),
    };

    let analysis = load_project_analysis(&cfg, &root)?;
    let monitor = SmartTimeout::from_config(&cfg.timeout);
    let observer: Arc<dyn OutputObserver> = Arc::new(monitor.clone());
    let gate = Gate::from_config(&cfg, &root, analysis)?.with_output_observer(observer);

    let monitored = monitor.context_with_deadline(&ExecContext::background());
    let outcome = gate.verify(monitored.context(), &task);
    if let Some(err) = monitored.timeout_error() {
        warn!(%err, "verification cut short by smart timeout");
    }
    drop(monitored);
    let result = outcome?;

    print_json(&result)?;
    if let Some(note) = render_feedback(&result)? {
        eprintln!("{note}");
    }
    Ok(if result.status.is_blocking() {
        exit_codes::FAILED
    } else {
        exit_codes::PASSED
    })
}

fn cmd_detect(project: &ProjectArgs) -> Result<i32> {
    let (root, cfg) = load_project(project)?;
    let mut detector = ProjectStateDetector::from_config(&cfg, &root)?;
    if detector.mode() == DetectionMode::Auto
        && let Some(analysis) = load_project_analysis(&cfg, &root)?
    {
        detector.set_analysis(analysis);
    }
    let state = detector.detect(&ExecContext::background())?;
    print_json(&state)?;
    Ok(exit_codes::PASSED)
}

fn cmd_baseline(action: BaselineAction, project: &ProjectArgs) -> Result<i32> {
    let (root, cfg) = load_project(project)?;
    let path = root.join(&cfg.tdd.baseline_path);
    match action {
        BaselineAction::Show => match load_baseline(&path)? {
            Some(baseline) => print_json(&baseline)?,
            None => eprintln!("no baseline captured at {}", path.display()),
        },
        BaselineAction::Clear => {
            if clear_baseline(&path)? {
                eprintln!("removed {}", path.display());
            } else {
                eprintln!("no baseline at {}", path.display());
            }
        }
    }
    Ok(exit_codes::PASSED)
}

fn load_project(project: &ProjectArgs) -> Result<(PathBuf, GateConfig)> {
    let root = project.root.clone();
    let path = project
        .config
        .clone()
        .unwrap_or_else(|| config_path(&root));
    let cfg = load_config(&path)?;
    Ok((root, cfg))
}

fn read_task(path: &Path) -> Result<Task> {
    let raw = fs::read_to_string(path).with_context(|| format!("read task {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse task {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
