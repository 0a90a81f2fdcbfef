//! Workload Executor
//!
//! Runs planned workloads against the metric registry and turns the
//! results into a report.
//!
//! ## Pipeline Overview
//!
//! ```text
//! ExecutionPlan (workloads sorted by name)
//!       │
//!       ▼
//! ┌─────────────┐
//! │  execution  │  Gate child, arm samplers, join, collect per iteration
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │   report    │  Aggregate results + host metadata into a Report
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │ formatting  │  Human-readable output
//! └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`execution`] - Iteration state machine and workload loop
//! - [`report`] - Result aggregation
//! - [`formatting`] - Human-readable output formatting
//! - [`metadata`] - Host metadata collection

mod execution;
mod formatting;
mod metadata;
mod report;

// Re-export public API
pub use execution::{
    IterationTimeline, RunError, RunResults, WorkloadExecutor, WorkloadOutcome, progress_bar,
    run_workloads,
};
pub use formatting::format_human_output;
pub use metadata::{Uname, build_report_meta, host_identity, uname};
pub use report::{assemble_report, build_report};
