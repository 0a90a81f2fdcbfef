#![warn(missing_docs)]
//! kbench Report - Result Model and Output
//!
//! Holds the per-workload, per-iteration result structure produced by a
//! run and renders it:
//! - JSON (machine-readable, one top-level key per workload)
//! - Human-readable terminal output is rendered by the CLI

mod json;
mod report;

pub use json::{generate_json_report, parse_json_report, result_file_name};
pub use report::{HostInfo, IterationStatus, Report, ReportMeta, ReportSummary, WorkloadResult};

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// JSON result file
    #[default]
    Json,
    /// Human-readable terminal output
    Human,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" | "text" => Ok(OutputFormat::Human),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}
