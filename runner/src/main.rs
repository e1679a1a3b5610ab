//! Hybrid MPI experiment runner.
//!
//! Reads an experiment matrix (`matrix.toml`) and settings
//! (`hybrid-runner.toml`), skips version pairs that already have a recorded
//! result, and runs the rest one after another.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use hybrid_runner::batch::{plan_batch, run_batch};
use hybrid_runner::exit_codes;
use hybrid_runner::io::analyzer::PatternAnalyzer;
use hybrid_runner::io::builder::BuilderRegistry;
use hybrid_runner::io::config::{SETTINGS_FILE, Settings, load_settings, write_settings};
use hybrid_runner::io::diagnostics::FileDiagnostics;
use hybrid_runner::io::jobmgr::EnvJobManagerDetector;
use hybrid_runner::io::launcher::MpiLauncher;
use hybrid_runner::io::matrix::{MATRIX_FILE, MatrixFile, sample_matrix, write_matrix};
use hybrid_runner::io::provision::RuntimePuller;
use hybrid_runner::logging;
use hybrid_runner::pipeline::Collaborators;

#[derive(Parser)]
#[command(
    name = "hybrid-runner",
    version,
    about = "Run host/container MPI compatibility experiments"
)]
struct Cli {
    /// Log progress at info level (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write default settings and a sample matrix if missing.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the experiments that still need to run.
    Plan(Inputs),
    /// Run every experiment without a recorded result.
    Run(Inputs),
}

#[derive(clap::Args)]
struct Inputs {
    /// Experiment matrix file.
    #[arg(long, default_value = MATRIX_FILE)]
    matrix: PathBuf,
    /// Settings file; defaults apply when it does not exist.
    #[arg(long, default_value = SETTINGS_FILE)]
    config: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(command: Command) -> Result<i32> {
    match command {
        Command::Init { force } => cmd_init(force),
        Command::Plan(inputs) => cmd_plan(&inputs),
        Command::Run(inputs) => cmd_run(&inputs),
    }
}

fn cmd_init(force: bool) -> Result<i32> {
    let settings_path = Path::new(SETTINGS_FILE);
    if force || !settings_path.exists() {
        write_settings(settings_path, &Settings::default())?;
    }
    let matrix_path = Path::new(MATRIX_FILE);
    if force || !matrix_path.exists() {
        write_matrix(matrix_path, &sample_matrix(Path::new("work")))?;
    }
    Ok(exit_codes::OK)
}

fn load_inputs(inputs: &Inputs) -> Result<(Settings, MatrixFile)> {
    let settings = load_settings(&inputs.config)?;
    let matrix = MatrixFile::load(&inputs.matrix)?;
    Ok((settings, matrix))
}

fn cmd_plan(inputs: &Inputs) -> Result<i32> {
    let (settings, matrix) = load_inputs(inputs)?;
    let specs = matrix.expand()?;
    let plan = plan_batch(&specs, &settings)?;
    println!("results: {}", plan.results_path.display());
    println!("pending: {} (skipped {})", plan.pending.len(), plan.skipped);
    for spec in &plan.pending {
        println!("{} -> {}", spec.host, spec.container_implem);
    }
    Ok(exit_codes::OK)
}

fn cmd_run(inputs: &Inputs) -> Result<i32> {
    let (settings, matrix) = load_inputs(inputs)?;
    let specs = matrix.expand()?;

    let builders = BuilderRegistry::from_settings(&settings);
    let collab = Collaborators {
        builders: &builders,
        job_managers: &EnvJobManagerDetector,
        launcher: &MpiLauncher,
        puller: &RuntimePuller,
        diagnostics: &FileDiagnostics,
        analyzer: &PatternAnalyzer,
    };
    let summary = run_batch(&specs, &settings, collab).context("run batch")?;

    for report in &summary.reports {
        let status = if report.success { "PASS" } else { "FAIL" };
        match report.error() {
            Some(err) => println!(
                "{status} {} -> {}: {err}",
                report.outcome.host, report.outcome.container
            ),
            None => println!(
                "{status} {} -> {}: {}",
                report.outcome.host, report.outcome.container, report.outcome.note
            ),
        }
    }
    println!(
        "passed {}, failed {}, skipped {}",
        summary.passed, summary.failed, summary.skipped
    );

    if let Some(fatal) = &summary.fatal {
        eprintln!("{fatal}");
        return Ok(exit_codes::FATAL);
    }
    if summary.failed > 0 {
        return Ok(exit_codes::FAILED);
    }
    Ok(exit_codes::OK)
}
