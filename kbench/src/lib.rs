#![warn(missing_docs)]
//! # kbench
//!
//! Benchmark harness for system workloads. Each workload runs an external
//! program a fixed number of times while kernel counters and process stats
//! are sampled around and during every run.
//!
//! - **Gated start**: the measured process is spawned blocked and only
//!   released once the "before" samples are taken
//! - **Diff metrics**: counters read once before and once after each run
//! - **Continuous metrics**: counters and process stats read at a fixed
//!   rate while the process is alive, one thread per rate
//! - **Fail-soft iterations**: a failed run is recorded and the next one
//!   starts; only an unusable binary skips the rest of a workload
//!
//! ## Quick Start
//!
//! ```ignore
//! use kbench::prelude::*;
//! use std::sync::Arc;
//!
//! let mut metrics = MetricRegistry::load("config/metrics.toml", Arc::new(SystemHost::new()))?;
//! let runner = CommandRunner::new("sleep");
//! let workload = Workload {
//!     name: "sleep".into(),
//!     description: String::new(),
//!     benchmark: "sleep".into(),
//!     run_args: vec!["1".into()],
//!     iterations: 3,
//!     cmdname: None,
//!     exec_pre: None,
//!     exec_post: None,
//! };
//! let outcome = WorkloadExecutor::new(&mut metrics, AbortSignal::new())
//!     .run_workload(&workload, &runner, None)?;
//! ```

// Re-export the sampling runtime
pub use kbench_core::{
    AbortSignal, ConfigError, HostQuery, MetricCollector, MetricRegistry, MetricSeries,
    MetricSource, MetricValue, MetricsConfig, ProcessRecord, ProcessStat, StaticHost,
    SystemHost,
};

// Re-export the result model
pub use kbench_report::{
    IterationStatus, OutputFormat, Report, ReportMeta, ReportSummary, WorkloadResult,
    generate_json_report, parse_json_report, result_file_name,
};

// Re-export the driver
pub use kbench_cli::{
    Benchmark, BenchmarkRegistry, Cli, CommandRunner, ExecutionPlan, ProcessExit, ProcessHandle,
    ProcessRunner, RunContext, RunError, RunnerError, Workload, WorkloadExecutor, build_report,
    run, run_with_cli,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        AbortSignal, CommandRunner, MetricRegistry, MetricSource, ProcessRunner, StaticHost,
        SystemHost, Workload, WorkloadExecutor,
    };
}
