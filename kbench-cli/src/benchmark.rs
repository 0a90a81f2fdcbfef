//! Benchmarks
//!
//! A benchmark is a directory holding a `config.toml` plus whatever the
//! build produces next to it:
//!
//! ```text
//! benchmarks/fbsd-build/
//! ├── config.toml
//! ├── src.txz        fetched archive
//! ├── src/           unpacked or cloned sources
//! └── obj/           build directory
//! ```
//!
//! The registry is populated explicitly from a directory scan; nothing
//! registers itself.

use crate::config::{BenchmarkConfig, archive_name};
use crate::supervisor::{CommandRunner, ProcessExit};
use kbench_core::ConfigError;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, info};

/// Failure of the build or clean actions
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{benchmark}: `{command}` {exit}")]
    CommandFailed {
        benchmark: String,
        command: String,
        exit: ProcessExit,
    },

    #[error("{benchmark}: failed to run `{command}`: {source}")]
    Spawn {
        benchmark: String,
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{benchmark}: {}: {source}", path.display())]
    Io {
        benchmark: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Source acquisition step of a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceHandler {
    /// Download an archive and unpack it into `src/`
    Fetch { url: String, archive: PathBuf },
    /// Shallow clone into `src/`
    Git { url: String },
}

/// A loaded benchmark
#[derive(Debug, Clone)]
pub struct Benchmark {
    dir: PathBuf,
    config: BenchmarkConfig,
}

impl Benchmark {
    /// Load `<dir>/config.toml`
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = std::path::absolute(dir.as_ref()).map_err(|source| ConfigError::Io {
            path: dir.as_ref().to_path_buf(),
            source,
        })?;
        let config = BenchmarkConfig::load(dir.join("config.toml"))?;
        Ok(Self::from_config(config, dir))
    }

    /// Wrap an already parsed configuration rooted at `dir`
    pub fn from_config(config: BenchmarkConfig, dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.info.name
    }

    pub fn description(&self) -> &str {
        &self.config.info.description
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    pub fn is_prebuilt(&self) -> bool {
        self.config.info.prebuilt
    }

    /// Directory sources are unpacked or cloned into
    pub fn src_dir(&self) -> PathBuf {
        self.dir.join("src")
    }

    pub fn source_handler(&self) -> Option<SourceHandler> {
        let src = &self.config.src;
        if let Some(fetch) = &src.fetch {
            let name = archive_name(&fetch.url)?;
            return Some(SourceHandler::Fetch {
                url: fetch.url.clone(),
                archive: self.dir.join(name),
            });
        }
        src.git.as_ref().map(|git| SourceHandler::Git {
            url: git.url.clone(),
        })
    }

    /// Build directories named by `[setup]` and `[run.make]`
    pub fn build_dirs(&self) -> Vec<PathBuf> {
        let setup = self
            .config
            .setup
            .as_ref()
            .and_then(|s| s.builddir.as_deref());
        let make = self
            .config
            .run
            .make
            .as_ref()
            .and_then(|m| m.builddir.as_deref());

        let mut dirs: Vec<PathBuf> = setup
            .into_iter()
            .chain(make)
            .filter(|d| !d.is_empty())
            .map(|d| self.dir.join(d))
            .collect();
        dirs.dedup();
        dirs
    }

    /// Runner that launches this benchmark for a workload
    pub fn runner(&self) -> CommandRunner {
        if let Some(make) = &self.config.run.make {
            let mut runner = CommandRunner::new("make")
                .arg(format!("-j{}", make.ncpu))
                .current_dir(self.dir.join(&make.rootdir))
                .envs(&make.env);
            if let Some(builddir) = make.builddir.as_deref().filter(|d| !d.is_empty()) {
                runner = runner.env(
                    "MAKEOBJDIRPREFIX",
                    self.dir.join(builddir).to_string_lossy(),
                );
            }
            return runner;
        }

        // Validation guarantees `exec` when `make` is absent.
        let (program, fixed, env) = match &self.config.run.exec {
            Some(exec) => match exec.cmds.split_first() {
                Some((program, fixed)) => (program.as_str(), fixed, &exec.env),
                None => ("true", &[][..], &exec.env),
            },
            None => return CommandRunner::new("true").current_dir(&self.dir),
        };
        CommandRunner::new(program)
            .args(fixed.iter().cloned())
            .current_dir(&self.dir)
            .envs(env)
    }

    /// Fetch sources, create build directories and run the build command.
    pub fn build(&self) -> Result<(), BuildError> {
        if self.is_prebuilt() {
            debug!(benchmark = %self.name(), "prebuilt, skipping build");
            return Ok(());
        }

        match self.source_handler() {
            Some(SourceHandler::Fetch { url, archive }) => self.fetch(&url, &archive)?,
            Some(SourceHandler::Git { url }) => self.clone_repo(&url)?,
            None => {}
        }

        for dir in self.build_dirs() {
            if !dir.is_dir() {
                info!(benchmark = %self.name(), "Creating build directory '{}'", dir.display());
                std::fs::create_dir_all(&dir).map_err(|source| self.io_error(&dir, source))?;
            }
        }

        if let Some(setup) = &self.config.setup {
            info!(benchmark = %self.name(), command = %setup.buildcmd, "Building");
            self.run_tool(
                Command::new("sh").arg("-c").arg(&setup.buildcmd),
                &setup.buildcmd,
            )?;
        }
        Ok(())
    }

    /// Remove the fetched archive, the sources and the build directories.
    pub fn clean(&self) -> Result<(), BuildError> {
        if self.is_prebuilt() {
            debug!(benchmark = %self.name(), "prebuilt, nothing to clean");
            return Ok(());
        }

        if let Some(SourceHandler::Fetch { archive, .. }) = self.source_handler() {
            if archive.is_file() {
                std::fs::remove_file(&archive).map_err(|source| self.io_error(&archive, source))?;
            }
        }

        let mut dirs = self.build_dirs();
        if self.source_handler().is_some() {
            dirs.push(self.src_dir());
        }
        for dir in dirs {
            if dir.is_dir() {
                info!(benchmark = %self.name(), "Removing '{}'", dir.display());
                std::fs::remove_dir_all(&dir).map_err(|source| self.io_error(&dir, source))?;
            }
        }
        Ok(())
    }

    fn fetch(&self, url: &str, archive: &Path) -> Result<(), BuildError> {
        if archive.is_file() {
            debug!(benchmark = %self.name(), "archive '{}' already present", archive.display());
        } else {
            info!(benchmark = %self.name(), "Downloading '{}'", url);
            self.run_tool(
                Command::new("curl").arg("-fL").arg("-o").arg(archive).arg(url),
                "curl",
            )?;
        }

        let src = self.src_dir();
        std::fs::create_dir_all(&src).map_err(|source| self.io_error(&src, source))?;
        info!(benchmark = %self.name(), "Unpacking '{}'", archive.display());
        self.run_tool(
            Command::new("tar").arg("-xf").arg(archive).arg("-C").arg(&src),
            "tar",
        )
    }

    fn clone_repo(&self, url: &str) -> Result<(), BuildError> {
        let src = self.src_dir();
        if src.is_dir() {
            debug!(benchmark = %self.name(), "sources already cloned");
            return Ok(());
        }
        info!(benchmark = %self.name(), "Cloning '{}'", url);
        self.run_tool(
            Command::new("git")
                .args(["clone", "--depth", "1", url])
                .arg(&src),
            "git",
        )
    }

    fn run_tool(&self, command: &mut Command, label: &str) -> Result<(), BuildError> {
        let status = command
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .status()
            .map_err(|source| BuildError::Spawn {
                benchmark: self.name().to_string(),
                command: label.to_string(),
                source,
            })?;
        let exit = ProcessExit::from(status);
        if exit.success() {
            Ok(())
        } else {
            Err(BuildError::CommandFailed {
                benchmark: self.name().to_string(),
                command: label.to_string(),
                exit,
            })
        }
    }

    fn io_error(&self, path: &Path, source: io::Error) -> BuildError {
        BuildError::Io {
            benchmark: self.name().to_string(),
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Benchmarks by name
#[derive(Debug, Clone, Default)]
pub struct BenchmarkRegistry {
    benchmarks: BTreeMap<String, Benchmark>,
}

impl BenchmarkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `<dir>/*/config.toml`
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let io_error = |source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut candidates = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.join("config.toml").is_file() {
                candidates.push(path);
            }
        }
        candidates.sort();

        let mut registry = Self::new();
        for path in candidates {
            let benchmark = Benchmark::load(&path)?;
            info!("Loaded benchmark info for '{}'", benchmark.name());
            registry.insert(benchmark).map_err(|name| {
                ConfigError::invalid(
                    path.join("config.toml").display().to_string(),
                    format!("duplicate benchmark name '{}'", name),
                )
            })?;
        }
        Ok(registry)
    }

    /// Register a benchmark; returns the name back when it is taken
    pub fn insert(&mut self, benchmark: Benchmark) -> Result<(), String> {
        let name = benchmark.name().to_string();
        if self.benchmarks.contains_key(&name) {
            return Err(name);
        }
        self.benchmarks.insert(name, benchmark);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Benchmark> {
        self.benchmarks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.benchmarks.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.benchmarks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.benchmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.benchmarks.is_empty()
    }

    /// Benchmarks in `set`, or all of them when `set` is `None`
    fn selected<'a>(
        &'a self,
        set: Option<&'a BTreeSet<String>>,
    ) -> impl Iterator<Item = &'a Benchmark> + 'a {
        self.benchmarks
            .values()
            .filter(move |b| set.is_none_or(|s| s.contains(b.name())))
    }

    /// Build the selected benchmarks, stopping at the first failure
    pub fn build(&self, set: Option<&BTreeSet<String>>) -> Result<(), BuildError> {
        for benchmark in self.selected(set) {
            benchmark.build()?;
        }
        Ok(())
    }

    /// Clean the selected benchmarks
    pub fn clean(&self, set: Option<&BTreeSet<String>>) -> Result<(), BuildError> {
        for benchmark in self.selected(set) {
            benchmark.clean()?;
        }
        Ok(())
    }
}
