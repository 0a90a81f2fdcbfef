//! JSON Output

use crate::report::Report;
use chrono::{DateTime, TimeZone};

/// Generate a prettified JSON report.
pub fn generate_json_report(report: &Report) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

/// Parse a report previously written by [`generate_json_report`].
pub fn parse_json_report(json: &str) -> Result<Report, serde_json::Error> {
    serde_json::from_str(json)
}

/// Result file name: `<config>-<ddmmYYYY-HHMM>.json`
pub fn result_file_name<Tz>(config_name: &str, at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("{}-{}.json", config_name, at.format("%d%m%Y-%H%M"))
}
