//! Metrics Configuration
//!
//! Typed schema of the metrics TOML file.
//!
//! ```toml
//! [[sysctl]]
//! name = "scheduler"
//! oids = ["kern.sched.cpusetsize", "hw.ncpu"]
//!
//! [[sysctl]]
//! name = "context switches"
//! sampling_rate = "250ms"
//! oids = ["vm.stats.sys.v_swtch"]
//!
//! [[ps]]
//! command = "cc"
//! stats = ["pcpu", "time"]
//! sampling_rate = 100          # plain integers are milliseconds
//! ```
//!
//! Known classes are `sysctl` and `ps`. Any other top-level class (for
//! example the retired `dtrace` probes) is skipped and reported through
//! [`MetricsConfig::ignored`].

use crate::source::ProcessStat;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Invalid or unreadable configuration. Always fatal, raised before any run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid {origin}: {message}")]
    Invalid { origin: String, message: String },
}

impl ConfigError {
    /// Validation failure in `origin`
    pub fn invalid(origin: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            origin: origin.into(),
            message: message.into(),
        }
    }
}

/// Read a config file to a string
pub fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Sampling rate as written in the file: milliseconds or a duration string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SamplingRate {
    /// Legacy integer form, in milliseconds
    Millis(u64),
    /// Duration string such as `"100ms"` or `"2s"`
    Text(String),
}

impl SamplingRate {
    /// Resolve to a non-zero duration
    pub fn to_duration(&self) -> Result<Duration, String> {
        let rate = match self {
            SamplingRate::Millis(ms) => Duration::from_millis(*ms),
            SamplingRate::Text(s) => parse_duration(s)?,
        };
        if rate.is_zero() {
            return Err("sampling_rate must be greater than zero".to_string());
        }
        Ok(rate)
    }
}

/// A group of kernel counters sharing one sampling rate
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SysctlMetricConfig {
    /// Group name, used in logs
    pub name: String,
    /// Free-form mode tag carried over from older configs
    #[serde(default)]
    pub mode: Option<String>,
    /// Continuous sampling rate; absent for diff metrics
    #[serde(default)]
    pub sampling_rate: Option<SamplingRate>,
    /// Counter OIDs; one collector per OID
    pub oids: Vec<String>,
}

/// Stats of one process, looked up by command name
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PsMetricConfig {
    /// Command name to match
    pub command: String,
    /// Stat names (`pcpu`, `time`, `rss`, `vsz`)
    pub stats: Vec<String>,
    /// Continuous sampling rate; absent for diff metrics
    #[serde(default)]
    pub sampling_rate: Option<SamplingRate>,
}

impl PsMetricConfig {
    /// Parse the stat names against the supported set
    pub fn parsed_stats(&self) -> Result<Vec<ProcessStat>, String> {
        self.stats.iter().map(|s| s.parse::<ProcessStat>()).collect()
    }
}

/// Validated metrics configuration
#[derive(Debug, Clone, Default)]
pub struct MetricsConfig {
    /// Kernel counter groups, in file order
    pub sysctl: Vec<SysctlMetricConfig>,
    /// Process stat queries, in file order
    pub ps: Vec<PsMetricConfig>,
    /// Top-level classes that were skipped
    pub ignored: Vec<String>,
}

impl MetricsConfig {
    /// Load and validate a metrics file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = read_config_file(path)?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Parse and validate metrics TOML. `origin` names the source in errors.
    pub fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = toml::from_str(content).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })?;

        let mut config = MetricsConfig::default();
        for (class, value) in table {
            match class.as_str() {
                "sysctl" => {
                    config.sysctl = value
                        .try_into()
                        .map_err(|e: toml::de::Error| ConfigError::invalid(origin, format!("[[sysctl]]: {}", e.message())))?;
                }
                "ps" => {
                    config.ps = value
                        .try_into()
                        .map_err(|e: toml::de::Error| ConfigError::invalid(origin, format!("[[ps]]: {}", e.message())))?;
                }
                _ => config.ignored.push(class),
            }
        }

        config.validate(origin)?;
        Ok(config)
    }

    fn validate(&self, origin: &str) -> Result<(), ConfigError> {
        for group in &self.sysctl {
            if group.oids.is_empty() {
                return Err(ConfigError::invalid(
                    origin,
                    format!("sysctl group '{}' lists no oids", group.name),
                ));
            }
            if let Some(rate) = &group.sampling_rate {
                rate.to_duration().map_err(|e| {
                    ConfigError::invalid(origin, format!("sysctl group '{}': {}", group.name, e))
                })?;
            }
        }

        for query in &self.ps {
            if query.stats.is_empty() {
                return Err(ConfigError::invalid(
                    origin,
                    format!("ps metric '{}' lists no stats", query.command),
                ));
            }
            query
                .parsed_stats()
                .map_err(|e| ConfigError::invalid(origin, format!("ps metric '{}': {}", query.command, e)))?;
            if let Some(rate) = &query.sampling_rate {
                rate.to_duration().map_err(|e| {
                    ConfigError::invalid(origin, format!("ps metric '{}': {}", query.command, e))
                })?;
            }
        }

        Ok(())
    }
}

/// Parse duration string (e.g., "3s", "500ms", "2m")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find where the number ends and unit begins
    let (num_part, unit_part) = s
        .char_indices()
        .find(|(_, c)| c.is_alphabetic())
        .map(|(i, _)| s.split_at(i))
        .unwrap_or((s, "ms"));

    let value: f64 = num_part
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration number: {}", num_part))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("invalid duration: {}", s));
    }

    let nanos_per_unit: f64 = match unit_part.to_lowercase().as_str() {
        "ns" => 1.0,
        "us" | "µs" => 1_000.0,
        "ms" => 1_000_000.0,
        "s" => 1_000_000_000.0,
        "m" | "min" => 60_000_000_000.0,
        _ => return Err(format!("unknown duration unit: {}", unit_part)),
    };

    Ok(Duration::from_nanos((value * nanos_per_unit) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("100us").unwrap(), Duration::from_micros(100));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        // Bare numbers are milliseconds, like the integer form
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10 parsecs").is_err());
        assert!(parse_duration("-5ms").is_err());
    }

    #[test]
    fn test_parse_metrics() {
        let toml_str = r#"
            [[sysctl]]
            name = "cpu"
            oids = ["hw.ncpu"]

            [[sysctl]]
            name = "switches"
            mode = "delta"
            sampling_rate = "250ms"
            oids = ["vm.stats.sys.v_swtch", "vm.stats.sys.v_intr"]

            [[ps]]
            command = "sleep"
            stats = ["pcpu"]
            sampling_rate = 100
        "#;

        let config = MetricsConfig::parse(toml_str, "metrics.toml").unwrap();
        assert_eq!(config.sysctl.len(), 2);
        assert_eq!(config.ps.len(), 1);
        assert!(config.ignored.is_empty());
        assert_eq!(config.sysctl[0].sampling_rate, None);
        assert_eq!(
            config.sysctl[1].sampling_rate.as_ref().unwrap().to_duration().unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(
            config.ps[0].sampling_rate.as_ref().unwrap().to_duration().unwrap(),
            Duration::from_millis(100)
        );
        assert_eq!(config.ps[0].parsed_stats().unwrap(), vec![ProcessStat::Pcpu]);
    }

    #[test]
    fn test_unknown_class_ignored() {
        let toml_str = r#"
            [[dtrace]]
            name = "io"
            scripts = [{ name = "iosnoop" }]

            [[sysctl]]
            name = "cpu"
            oids = ["hw.ncpu"]
        "#;

        let config = MetricsConfig::parse(toml_str, "metrics.toml").unwrap();
        assert_eq!(config.ignored, vec!["dtrace".to_string()]);
        assert_eq!(config.sysctl.len(), 1);
    }

    #[test]
    fn test_schema_violations() {
        let cases = [
            // missing oids
            "[[sysctl]]\nname = \"cpu\"\n",
            // empty oids
            "[[sysctl]]\nname = \"cpu\"\noids = []\n",
            // unknown key
            "[[sysctl]]\nname = \"cpu\"\noids = [\"hw.ncpu\"]\ncolour = \"red\"\n",
            // unsupported stat
            "[[ps]]\ncommand = \"make\"\nstats = [\"majflt\"]\n",
            // zero rate
            "[[ps]]\ncommand = \"make\"\nstats = [\"pcpu\"]\nsampling_rate = 0\n",
            // wrong type
            "sysctl = \"hw.ncpu\"\n",
            // bad duration
            "[[ps]]\ncommand = \"make\"\nstats = [\"pcpu\"]\nsampling_rate = \"soon\"\n",
        ];

        for case in cases {
            let err = MetricsConfig::parse(case, "metrics.toml");
            assert!(
                matches!(err, Err(ConfigError::Invalid { .. })),
                "expected validation error for {:?}",
                case
            );
        }

        assert!(matches!(
            MetricsConfig::parse("[[sysctl]", "metrics.toml"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            MetricsConfig::load("/nonexistent/metrics.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
