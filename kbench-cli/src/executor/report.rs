//! Report Building
//!
//! Assembles per-workload, per-iteration results and host metadata into
//! the final report.
//!
//! ```text
//! RunResults (workload → [WorkloadResult])
//!              │
//!              ▼
//!   ┌─────────────────────┐
//!   │   ReportSummary     │  pass/fail/skip counts
//!   └──────────┬──────────┘
//!              │
//!              ▼
//!   ┌─────────────────────┐
//!   │      Report         │  + uname + ReportMeta
//!   └─────────────────────┘
//! ```

use super::execution::RunResults;
use super::metadata::{build_report_meta, host_identity};
use kbench_report::{IterationStatus, Report, ReportMeta, ReportSummary};

/// Build a complete Report for this host
///
/// # Arguments
/// * `results` - Iteration results by workload
/// * `config_name` - Run configuration name
/// * `aborted` - Whether the run was interrupted
/// * `total_duration_ms` - Total execution time in milliseconds
pub fn build_report(
    results: RunResults,
    config_name: &str,
    aborted: bool,
    total_duration_ms: f64,
) -> Report {
    assemble_report(
        results,
        build_report_meta(config_name),
        host_identity(),
        aborted,
        total_duration_ms,
    )
}

/// Aggregate results with explicit metadata
pub fn assemble_report(
    results: RunResults,
    meta: ReportMeta,
    uname: String,
    aborted: bool,
    total_duration_ms: f64,
) -> Report {
    let mut summary = ReportSummary {
        total_workloads: results.len(),
        aborted,
        total_duration_ms,
        ..Default::default()
    };

    for result in results.values().flatten() {
        summary.total_iterations += 1;
        match result.status {
            IterationStatus::Passed => summary.passed += 1,
            IterationStatus::Failed => summary.failed += 1,
            IterationStatus::Skipped => summary.skipped += 1,
        }
    }

    Report {
        meta,
        uname,
        workloads: results,
        summary,
    }
}
