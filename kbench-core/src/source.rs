//! Metric Sources
//!
//! A [`MetricSource`] describes one way of obtaining measurements from the
//! host: a named kernel counter or a set of stats of a running process.
//! Sources are immutable and stateless; every call to [`MetricSource::read`]
//! is a fresh query against a [`HostQuery`].

use crate::host::HostQuery;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Exported sample history keyed by metric identity (sysctl OID or stat name).
pub type MetricSeries = BTreeMap<String, Vec<MetricValue>>;

/// A single sampled value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// Integer-valued counter or stat
    Integer(i64),
    /// Fractional stat (percent CPU, CPU seconds)
    Float(f64),
    /// String-valued counter
    Text(String),
}

impl MetricValue {
    /// Interpret raw counter text: integers stay integers, anything else is kept verbatim.
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        match trimmed.parse::<i64>() {
            Ok(value) => MetricValue::Integer(value),
            Err(_) => MetricValue::Text(trimmed.to_string()),
        }
    }

    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Integer(v) => Some(*v as f64),
            MetricValue::Float(v) => Some(*v),
            MetricValue::Text(_) => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Integer(v) => write!(f, "{}", v),
            MetricValue::Float(v) => write!(f, "{:.3}", v),
            MetricValue::Text(v) => f.write_str(v),
        }
    }
}

/// A metric source could not be read on this tick.
///
/// Never fatal: the sample is skipped and the run continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceUnavailable {
    #[error("counter '{key}' could not be read: {reason}")]
    Counter { key: String, reason: String },

    #[error("no running process matches '{0}'")]
    ProcessNotFound(String),

    #[error("process '{process}' does not report stat '{stat}'")]
    StatMissing { process: String, stat: ProcessStat },
}

/// Per-process statistics that can be sampled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStat {
    /// Percent CPU usage
    Pcpu,
    /// Accumulated CPU time in seconds
    Time,
    /// Resident set size in bytes
    Rss,
    /// Virtual memory size in bytes
    Vsz,
}

impl ProcessStat {
    /// All supported stats
    pub const ALL: [ProcessStat; 4] = [
        ProcessStat::Pcpu,
        ProcessStat::Time,
        ProcessStat::Rss,
        ProcessStat::Vsz,
    ];

    /// Configuration/export name of the stat
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessStat::Pcpu => "pcpu",
            ProcessStat::Time => "time",
            ProcessStat::Rss => "rss",
            ProcessStat::Vsz => "vsz",
        }
    }
}

impl fmt::Display for ProcessStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessStat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessStat::ALL
            .into_iter()
            .find(|stat| stat.as_str() == s)
            .ok_or_else(|| format!("sampling process stat '{}' is not supported", s))
    }
}

/// One way of measuring the host
#[derive(Debug, Clone, PartialEq)]
pub enum MetricSource {
    /// A single named kernel counter
    Sysctl {
        /// Counter OID, e.g. `hw.ncpu` or `kernel.ostype`
        key: String,
    },
    /// Stats of the first running process whose command name matches
    ProcessStat {
        /// Command name to look for
        matcher: String,
        /// Stats recorded on every sample, in this order
        stats: Vec<ProcessStat>,
    },
}

impl MetricSource {
    /// Export identities produced by this source, parallel to [`MetricSource::read`].
    pub fn identities(&self) -> Vec<String> {
        match self {
            MetricSource::Sysctl { key } => vec![key.clone()],
            MetricSource::ProcessStat { stats, .. } => {
                stats.iter().map(|s| s.as_str().to_string()).collect()
            }
        }
    }

    /// Query the host once.
    ///
    /// Returns one value per identity, in the same order as
    /// [`MetricSource::identities`]. A partially resolvable source is
    /// reported as unavailable so every series keeps the same length.
    pub fn read(&self, host: &dyn HostQuery) -> Result<Vec<MetricValue>, SourceUnavailable> {
        match self {
            MetricSource::Sysctl { key } => Ok(vec![host.read_counter(key)?]),
            MetricSource::ProcessStat { matcher, stats } => {
                let record = host
                    .find_process(matcher)
                    .ok_or_else(|| SourceUnavailable::ProcessNotFound(matcher.clone()))?;

                stats
                    .iter()
                    .map(|stat| {
                        record
                            .stats
                            .get(stat)
                            .cloned()
                            .ok_or_else(|| SourceUnavailable::StatMissing {
                                process: record.name.clone(),
                                stat: *stat,
                            })
                    })
                    .collect()
            }
        }
    }
}

impl fmt::Display for MetricSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricSource::Sysctl { key } => write!(f, "sysctl:{}", key),
            MetricSource::ProcessStat { matcher, stats } => {
                let names: Vec<&str> = stats.iter().map(|s| s.as_str()).collect();
                write!(f, "ps:{}[{}]", matcher, names.join(","))
            }
        }
    }
}
