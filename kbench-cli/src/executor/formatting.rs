//! Output Formatting
//!
//! Human-readable output for run reports:
//! - One block per workload with a status icon per iteration (✓/✗/⊘)
//! - Elapsed time and sample count per metric
//! - Mean/min/max elapsed time over passed iterations

use kbench_report::{IterationStatus, Report, WorkloadResult};

/// Format a report for human-readable terminal display
pub fn format_human_output(report: &Report) -> String {
    let mut output = String::new();

    output.push('\n');
    output.push_str("kbench Results\n");
    output.push_str(&"=".repeat(60));
    output.push('\n');
    output.push_str(&format!("host: {}\n\n", report.uname));

    for (workload, results) in &report.workloads {
        output.push_str(&format!("Workload: {}\n", workload));
        output.push_str(&"-".repeat(60));
        output.push('\n');

        for result in results {
            output.push_str(&format_iteration(result));
        }

        if let Some((mean, min, max)) = elapsed_stats(results) {
            output.push_str(&format!(
                "  elapsed  mean: {:.3} s  min: {:.3} s  max: {:.3} s\n",
                mean, min, max
            ));
        }
        output.push('\n');
    }

    let summary = &report.summary;
    output.push_str(&format!(
        "Summary: {} workload(s), {} iteration(s): {} passed, {} failed, {} skipped",
        summary.total_workloads,
        summary.total_iterations,
        summary.passed,
        summary.failed,
        summary.skipped
    ));
    if summary.aborted {
        output.push_str(" (interrupted)");
    }
    output.push('\n');

    output
}

fn format_iteration(result: &WorkloadResult) -> String {
    let icon = match result.status {
        IterationStatus::Passed => "✓",
        IterationStatus::Failed => "✗",
        IterationStatus::Skipped => "⊘",
    };

    let mut line = format!(
        "  {} #{:<3} {:>10.3} s",
        icon,
        result.iteration + 1,
        result.elapsed_time
    );
    if !result.metrics.is_empty() {
        let counts: Vec<String> = result
            .metrics
            .iter()
            .map(|(name, values)| format!("{}: {}", name, values.len()))
            .collect();
        line.push_str(&format!("  [{}]", counts.join(", ")));
    }
    line.push('\n');

    if let Some(error) = &result.error {
        line.push_str(&format!("         {}\n", error));
    }
    line
}

/// Mean, min and max elapsed time over passed iterations
fn elapsed_stats(results: &[WorkloadResult]) -> Option<(f64, f64, f64)> {
    let times: Vec<f64> = results
        .iter()
        .filter(|r| r.passed())
        .map(|r| r.elapsed_time)
        .collect();
    if times.is_empty() {
        return None;
    }
    let mean = times.iter().sum::<f64>() / times.len() as f64;
    let min = times.iter().copied().fold(f64::INFINITY, f64::min);
    let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some((mean, min, max))
}
