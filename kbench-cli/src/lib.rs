#![warn(missing_docs)]
//! kbench CLI Library
//!
//! Command-line driver of the harness. It loads the run configuration,
//! benchmarks and workloads, then performs one action:
//!
//! - `build`: fetch and build the selected benchmarks
//! - `run`: build what the planned workloads need, run them while
//!   sampling metrics, and write the result file
//! - `clean`: remove fetched sources and build output
//!
//! # Example
//!
//! ```ignore
//! fn main() {
//!     if let Err(e) = kbench_cli::run() {
//!         eprintln!("{e:#}");
//!         std::process::exit(1);
//!     }
//! }
//! ```

mod benchmark;
mod config;
mod context;
mod executor;
mod planner;
mod supervisor;

pub use benchmark::{Benchmark, BenchmarkRegistry, BuildError, SourceHandler};
pub use config::*;
pub use context::{ContextPaths, RunContext};
pub use executor::{
    IterationTimeline, RunError, RunResults, Uname, WorkloadExecutor, WorkloadOutcome,
    assemble_report, build_report, build_report_meta, format_human_output, host_identity,
    progress_bar, run_workloads, uname,
};
pub use planner::{ExecutionPlan, Workload, build_plan, load_workloads};
pub use supervisor::*;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use kbench_core::{AbortSignal, SystemHost};
use kbench_report::{OutputFormat, Report, generate_json_report, result_file_name};
use regex::Regex;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// kbench CLI arguments
#[derive(Parser, Debug)]
#[command(name = "kbench")]
#[command(author, version, about = "kbench - system benchmark harness")]
pub struct Cli {
    /// Action to perform
    #[arg(short, long, value_enum)]
    pub action: Action,

    /// Configuration file for the benchmark run (default: config/default.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long)]
    pub verbose: bool,

    /// Directory holding one sub-directory per benchmark
    #[arg(long, default_value = "benchmarks")]
    pub benchmarks_dir: PathBuf,

    /// Directory holding workload definitions
    #[arg(long, default_value = "workloads")]
    pub workloads_dir: PathBuf,

    /// Directory result files are written to (overrides the run configuration)
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Output format: json, human (overrides the run configuration)
    #[arg(long)]
    pub format: Option<String>,

    /// Filter workloads by regex pattern
    #[arg(default_value = ".*")]
    pub filter: String,
}

/// What the invocation does
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Fetch and build benchmarks
    Build,
    /// Run workloads and record results
    Run,
    /// Remove fetched sources and build output
    Clean,
}

/// Run the kbench CLI with the process arguments.
///
/// # Returns
/// Returns `Ok(())` on success, or an error if something goes wrong.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_with_cli(cli)
}

/// Run the kbench CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    init_logging(cli.verbose);

    let result = execute(&cli);
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

/// Initialize logging; `RUST_LOG` takes precedence.
fn init_logging(verbose: bool) {
    let default = if verbose { "kbench=debug" } else { "kbench=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber may already be installed when embedded.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn execute(cli: &Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(|| {
        info!("Configuration file not specified - falling back to default.toml");
        PathBuf::from(RunConfig::DEFAULT_PATH)
    });
    let config = RunConfig::load(&config_path)?;

    let filter = Regex::new(&cli.filter)
        .with_context(|| format!("invalid workload filter '{}'", cli.filter))?;
    let paths = ContextPaths {
        benchmarks_dir: cli.benchmarks_dir.clone(),
        workloads_dir: cli.workloads_dir.clone(),
    };
    let abort = match cli.action {
        Action::Run => AbortSignal::with_os_signals(),
        _ => AbortSignal::new(),
    };

    let mut ctx = RunContext::load(
        config,
        &paths,
        Some(&filter),
        Arc::new(SystemHost::new()),
        abort,
    )?;

    match cli.action {
        Action::Build => {
            ctx.build()?;
            info!("Build complete");
        }
        Action::Clean => {
            ctx.clean()?;
            info!("Clean complete");
        }
        Action::Run => run_action(cli, &mut ctx)?,
    }
    Ok(())
}

fn run_action(cli: &Cli, ctx: &mut RunContext) -> anyhow::Result<()> {
    let format = match &cli.format {
        Some(format) => format.parse::<OutputFormat>().map_err(anyhow::Error::msg)?,
        None => ctx.config.output_format().map_err(anyhow::Error::msg)?,
    };
    let results_dir = cli
        .results_dir
        .clone()
        .unwrap_or_else(|| ctx.config.output.directory.clone());

    ctx.load_metrics()?;
    if ctx.plan.is_empty() {
        println!("No workloads selected.");
        return Ok(());
    }
    ctx.build_targets()?;

    println!(
        "Running {} workload(s), {} iteration(s)...\n",
        ctx.plan.workloads.len(),
        ctx.plan.total_iterations()
    );

    let show_progress = !cli.verbose && std::io::stderr().is_terminal();
    let start_time = Instant::now();
    let (results, aborted) = match ctx.run(show_progress) {
        Ok(results) => (results, false),
        Err(RunError::Aborted { results }) => (results, true),
        Err(e) => return Err(e.into()),
    };
    let total_duration_ms = start_time.elapsed().as_secs_f64() * 1000.0;

    let report = build_report(results, &ctx.config.name, aborted, total_duration_ms);
    let path = write_report(&report, &results_dir, &ctx.config.file_stem())?;
    info!("Wrote benchmarking results to '{}'", path.display());

    if format == OutputFormat::Human {
        print!("{}", format_human_output(&report));
    }

    if report.summary.failed > 0 {
        warn!("{} iteration(s) failed", report.summary.failed);
    }
    if aborted {
        anyhow::bail!("run interrupted; partial results written to '{}'", path.display());
    }
    Ok(())
}

/// Write the JSON report into `dir`, creating it when missing.
pub fn write_report(report: &Report, dir: &Path, config_stem: &str) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create results directory '{}'", dir.display()))?;
    let path = dir.join(result_file_name(config_stem, &chrono::Local::now()));
    let json = generate_json_report(report)?;
    std::fs::write(&path, json)
        .with_context(|| format!("failed to write results to '{}'", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::try_parse_from(["kbench", "--action", "run", "-c", "nightly.toml", "^build"])
            .unwrap();
        assert_eq!(cli.action, Action::Run);
        assert_eq!(cli.config, Some(PathBuf::from("nightly.toml")));
        assert_eq!(cli.filter, "^build");
        assert_eq!(cli.benchmarks_dir, PathBuf::from("benchmarks"));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_requires_action() {
        assert!(Cli::try_parse_from(["kbench"]).is_err());
        assert!(Cli::try_parse_from(["kbench", "-a", "deploy"]).is_err());
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("results");
        let report = build_report(RunResults::new(), "default", false, 0.0);

        let path = write_report(&report, &target, "default").unwrap();
        assert!(path.starts_with(&target));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("default-") && name.ends_with(".json"));

        let written = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert!(value.get("uname").is_some());
    }
}
