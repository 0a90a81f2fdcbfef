//! Report Data Structures

use chrono::{DateTime, Utc};
use kbench_core::MetricSeries;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Complete result set of one `run` invocation
///
/// Serialises with one top-level key per workload name, each an ordered
/// list of iteration records, next to the `uname` host identity string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub meta: ReportMeta,
    /// Host identity string (kernel version banner)
    pub uname: String,
    #[serde(flatten)]
    pub workloads: BTreeMap<String, Vec<WorkloadResult>>,
    pub summary: ReportSummary,
}

impl Report {
    /// Top-level keys a workload may not be named after
    pub const RESERVED_KEYS: [&'static str; 3] = ["meta", "uname", "summary"];

    /// Iterations recorded for a workload
    pub fn iterations(&self, workload: &str) -> &[WorkloadResult] {
        self.workloads
            .get(workload)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMeta {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// Name of the run configuration that produced the report
    pub config_name: String,
    pub host: HostInfo,
}

/// Host information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
    pub os: String,
    pub os_release: String,
    pub arch: String,
    pub cpu_cores: u32,
}

/// Outcome of one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationStatus {
    Passed,
    Failed,
    Skipped,
}

/// One record per (workload, iteration)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadResult {
    /// Zero-based iteration index
    pub iteration: usize,
    /// Wall time between releasing the process and its completion, in seconds
    pub elapsed_time: f64,
    pub status: IterationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Sampled values keyed by metric identity
    pub metrics: MetricSeries,
}

impl WorkloadResult {
    /// Placeholder for an iteration that never ran
    pub fn skipped(iteration: usize, reason: impl Into<String>) -> Self {
        Self {
            iteration,
            elapsed_time: 0.0,
            status: IterationStatus::Skipped,
            error: Some(reason.into()),
            metrics: MetricSeries::new(),
        }
    }

    /// Whether the iteration completed successfully
    pub fn passed(&self) -> bool {
        self.status == IterationStatus::Passed
    }
}

/// Report summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_workloads: usize,
    pub total_iterations: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Run was interrupted before every workload finished
    pub aborted: bool,
    pub total_duration_ms: f64,
}
