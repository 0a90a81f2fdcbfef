//! Run Context
//!
//! Everything one invocation works on, loaded once up front and handed to
//! each action by reference. Nothing here is global.

use crate::benchmark::{BenchmarkRegistry, BuildError};
use crate::config::RunConfig;
use crate::executor::{RunError, RunResults, run_workloads};
use crate::planner::{ExecutionPlan, build_plan, load_workloads};
use kbench_core::{AbortSignal, ConfigError, HostQuery, MetricRegistry};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Where benchmark and workload definitions live
#[derive(Debug, Clone)]
pub struct ContextPaths {
    /// One sub-directory per benchmark, each with a `config.toml`
    pub benchmarks_dir: PathBuf,
    /// Workload definitions, one `.toml` file each
    pub workloads_dir: PathBuf,
}

impl Default for ContextPaths {
    fn default() -> Self {
        Self {
            benchmarks_dir: PathBuf::from("benchmarks"),
            workloads_dir: PathBuf::from("workloads"),
        }
    }
}

/// State of one invocation
pub struct RunContext {
    /// Run configuration
    pub config: RunConfig,
    /// Every benchmark found on disk
    pub benchmarks: BenchmarkRegistry,
    /// Workloads selected for this invocation
    pub plan: ExecutionPlan,
    /// Metric registry; empty until [`RunContext::load_metrics`]
    pub metrics: MetricRegistry,
    /// Cooperative abort flag
    pub abort: AbortSignal,
    host: Arc<dyn HostQuery>,
}

impl RunContext {
    /// Load benchmarks and workloads and plan the run.
    ///
    /// The metric registry starts empty; see [`RunContext::load_metrics`].
    pub fn load(
        config: RunConfig,
        paths: &ContextPaths,
        filter: Option<&Regex>,
        host: Arc<dyn HostQuery>,
        abort: AbortSignal,
    ) -> Result<Self, ConfigError> {
        let benchmarks = BenchmarkRegistry::load(&paths.benchmarks_dir)?;
        let workloads = load_workloads(&paths.workloads_dir, &benchmarks)?;
        let plan = build_plan(workloads, filter, &config.benchmarks);
        info!(
            benchmarks = benchmarks.len(),
            workloads = plan.workloads.len(),
            "loaded run configuration '{}'",
            config.name
        );

        Ok(Self {
            config,
            benchmarks,
            plan,
            metrics: MetricRegistry::new(Arc::clone(&host)),
            abort,
            host,
        })
    }

    /// Load the metrics file named by the run configuration
    pub fn load_metrics(&mut self) -> Result<(), ConfigError> {
        self.metrics = MetricRegistry::load(&self.config.metrics, Arc::clone(&self.host))?;
        Ok(())
    }

    /// Benchmarks selected by the run configuration; `None` means all
    pub fn selected_benchmarks(&self) -> Option<BTreeSet<String>> {
        if self.config.benchmarks.is_all() {
            return None;
        }
        Some(
            self.benchmarks
                .names()
                .filter(|name| self.config.benchmarks.contains(name))
                .map(str::to_string)
                .collect(),
        )
    }

    /// `build` action
    pub fn build(&self) -> Result<(), BuildError> {
        self.benchmarks.build(self.selected_benchmarks().as_ref())
    }

    /// `clean` action
    pub fn clean(&self) -> Result<(), BuildError> {
        self.benchmarks.clean(self.selected_benchmarks().as_ref())
    }

    /// Build what the planned workloads need
    pub fn build_targets(&self) -> Result<(), BuildError> {
        self.benchmarks.build(Some(&self.plan.target_benchmarks))
    }

    /// Run every planned workload
    pub fn run(&mut self, show_progress: bool) -> Result<RunResults, RunError> {
        run_workloads(
            &self.plan,
            &self.benchmarks,
            &mut self.metrics,
            &self.abort,
            show_progress,
        )
    }
}
