//! Configuration loading
//!
//! Three kinds of TOML files drive a run:
//! - the run configuration (`config/default.toml` unless `--config` is given)
//! - one `config.toml` per benchmark directory
//! - one file per workload in the workloads directory
//!
//! The metrics file is owned by `kbench_core::MetricsConfig`.

use kbench_core::{ConfigError, read_config_file};
use kbench_report::{OutputFormat, Report};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Run configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Human-readable name of this run setup
    pub name: String,
    /// Benchmarks allowed to run: `"all"` or a list of names
    pub benchmarks: BenchmarkSelection,
    /// Metrics configuration file
    pub metrics: PathBuf,
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(skip)]
    source: PathBuf,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Directory result files are written to
    #[serde(default = "default_results_dir")]
    pub directory: PathBuf,
    /// Default output format: json or human
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_format() -> String {
    "json".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_results_dir(),
            format: default_format(),
        }
    }
}

/// Which benchmarks a run may touch
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum BenchmarkSelection {
    /// `"all"`, or a single benchmark name
    One(String),
    /// Explicit list of benchmark names
    Many(Vec<String>),
}

impl BenchmarkSelection {
    /// Whether every loaded benchmark is selected
    pub fn is_all(&self) -> bool {
        matches!(self, BenchmarkSelection::One(name) if name == "all")
    }

    /// Whether `benchmark` is selected
    pub fn contains(&self, benchmark: &str) -> bool {
        match self {
            BenchmarkSelection::One(name) => name == "all" || name == benchmark,
            BenchmarkSelection::Many(names) => names.iter().any(|n| n == benchmark),
        }
    }
}

impl RunConfig {
    /// Used when no `--config` is given
    pub const DEFAULT_PATH: &'static str = "config/default.toml";

    /// Load and validate a run configuration
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = read_config_file(path)?;
        let origin = path.display().to_string();
        let mut config: RunConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            origin: origin.clone(),
            source,
        })?;
        config.source = path.to_path_buf();
        config.validate(&origin)?;
        Ok(config)
    }

    fn validate(&self, origin: &str) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid(origin, "`name` must not be empty"));
        }
        if let BenchmarkSelection::Many(names) = &self.benchmarks {
            if names.is_empty() {
                return Err(ConfigError::invalid(origin, "`benchmarks` list is empty"));
            }
        }
        self.output_format()
            .map_err(|e| ConfigError::invalid(origin, e))?;
        Ok(())
    }

    /// Configured default output format
    pub fn output_format(&self) -> Result<OutputFormat, String> {
        self.output.format.parse()
    }

    /// File the configuration was loaded from
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Stem of the configuration file, used to name result files
    pub fn file_stem(&self) -> String {
        self.source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }
}

/// Benchmark configuration (`<benchmark dir>/config.toml`)
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkConfig {
    pub info: BenchmarkInfo,
    #[serde(default)]
    pub src: SourceConfig,
    #[serde(default)]
    pub setup: Option<SetupConfig>,
    pub run: RunBlock,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkInfo {
    pub name: String,
    pub description: String,
    /// Sources are already in place; `build` does nothing
    #[serde(default)]
    pub prebuilt: bool,
}

/// Where benchmark sources come from
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Archive downloaded and unpacked into `src/`
    pub fetch: Option<UrlConfig>,
    /// Repository cloned into `src/`
    pub git: Option<UrlConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UrlConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupConfig {
    #[serde(default)]
    pub builddir: Option<String>,
    /// Shell command run in the benchmark directory by `build`
    pub buildcmd: String,
}

/// How a workload launches the benchmark. Exactly one runner is set.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunBlock {
    pub make: Option<MakeConfig>,
    pub exec: Option<ExecConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MakeConfig {
    pub rootdir: String,
    #[serde(default = "default_ncpu")]
    pub ncpu: u32,
    #[serde(default)]
    pub builddir: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_ncpu() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecConfig {
    /// Program followed by its fixed arguments
    pub cmds: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Matches `{{ bench.<table>.<key> }}`
const PLACEHOLDER: &str = r"\{\{\s*bench\.([A-Za-z0-9_.\-]+)\s*\}\}";

/// Substitute `bench.*` placeholders from `values`; blank them without values.
fn render_placeholders(pattern: &Regex, content: &str, values: Option<&toml::Table>) -> String {
    pattern
        .replace_all(content, |caps: &regex::Captures<'_>| {
            values
                .and_then(|table| lookup(table, &caps[1]))
                .unwrap_or_default()
        })
        .into_owned()
}

fn lookup(table: &toml::Table, dotted: &str) -> Option<String> {
    let mut parts = dotted.split('.');
    let mut value = table.get(parts.next()?)?;
    for part in parts {
        value = value.as_table()?.get(part)?;
    }
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

impl BenchmarkConfig {
    /// Load a benchmark configuration, resolving self-referencing placeholders
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = read_config_file(path)?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Parse and validate benchmark configuration text
    pub fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let parse_error = |source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        };

        let pattern =
            Regex::new(PLACEHOLDER).map_err(|e| ConfigError::invalid(origin, e.to_string()))?;

        // First pass sees every placeholder blanked.
        let plain: toml::Table =
            toml::from_str(&render_placeholders(&pattern, content, None)).map_err(parse_error)?;
        let rendered = render_placeholders(&pattern, content, Some(&plain));
        let config: BenchmarkConfig = toml::from_str(&rendered).map_err(parse_error)?;
        config.validate(origin)?;
        Ok(config)
    }

    fn validate(&self, origin: &str) -> Result<(), ConfigError> {
        if self.info.name.trim().is_empty() {
            return Err(ConfigError::invalid(origin, "`info.name` must not be empty"));
        }
        match (&self.run.make, &self.run.exec) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::invalid(
                    origin,
                    "`run` must contain exactly one of `make` or `exec`, not both",
                ));
            }
            (None, None) => {
                return Err(ConfigError::invalid(
                    origin,
                    "`run` must contain one of `make` or `exec`",
                ));
            }
            (Some(make), None) if make.ncpu == 0 => {
                return Err(ConfigError::invalid(origin, "`run.make.ncpu` must be at least 1"));
            }
            (None, Some(exec)) if exec.cmds.is_empty() => {
                return Err(ConfigError::invalid(origin, "`run.exec.cmds` must not be empty"));
            }
            _ => {}
        }
        if self.src.fetch.is_some() && self.src.git.is_some() {
            return Err(ConfigError::invalid(
                origin,
                "`src` must contain at most one of `fetch` or `git`",
            ));
        }
        if let Some(fetch) = &self.src.fetch {
            if archive_name(&fetch.url).is_none() {
                return Err(ConfigError::invalid(
                    origin,
                    format!("unable to derive an archive name from '{}'", fetch.url),
                ));
            }
        }
        Ok(())
    }
}

/// Last path segment of a download URL
pub(crate) fn archive_name(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    path.rsplit('/').next().filter(|name| !name.is_empty())
}

/// Workload configuration (`<workloads dir>/*.toml`)
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadConfig {
    pub info: WorkloadInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadInfo {
    pub name: String,
    pub description: String,
    /// Name of the benchmark this workload runs
    pub benchmark: String,
    /// Command name of the measured process, for log context
    #[serde(default)]
    pub cmdname: Option<String>,
    /// Shell command run before every iteration
    #[serde(default)]
    pub exec_pre: Option<String>,
    /// Shell command run after every iteration
    #[serde(default)]
    pub exec_post: Option<String>,
    /// Extra arguments, split on whitespace
    pub run_args: String,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

fn default_iterations() -> u32 {
    1
}

impl WorkloadConfig {
    /// Load and validate a workload configuration
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = read_config_file(path)?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Parse and validate workload configuration text
    pub fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: WorkloadConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })?;
        let info = &config.info;
        if info.name.trim().is_empty() {
            return Err(ConfigError::invalid(origin, "`info.name` must not be empty"));
        }
        if Report::RESERVED_KEYS.contains(&info.name.as_str()) {
            return Err(ConfigError::invalid(
                origin,
                format!("workload name '{}' is reserved", info.name),
            ));
        }
        if info.iterations == 0 {
            return Err(ConfigError::invalid(origin, "`info.iterations` must be at least 1"));
        }
        Ok(config)
    }

    /// `run_args` split on whitespace
    pub fn run_args(&self) -> Vec<String> {
        self.info
            .run_args
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}
