//! Workload Planner
//!
//! Loads workload definitions and builds the execution plan.
//!
//! Filtering options:
//! - Regex pattern matching on workload name
//! - Benchmark selection from the run configuration
//!
//! Ordering: Workloads are sorted alphabetically by name for deterministic execution.

use crate::benchmark::BenchmarkRegistry;
use crate::config::{BenchmarkSelection, WorkloadConfig};
use kbench_core::ConfigError;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

/// A validated workload, immutable once loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    /// Unique workload name, also the key in the result file
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Benchmark the workload runs
    pub benchmark: String,
    /// Arguments appended to the benchmark's runner
    pub run_args: Vec<String>,
    /// Number of measured runs
    pub iterations: u32,
    /// Command name of the measured process, for log context
    pub cmdname: Option<String>,
    /// Shell command run before each iteration
    pub exec_pre: Option<String>,
    /// Shell command run after each iteration
    pub exec_post: Option<String>,
}

impl From<WorkloadConfig> for Workload {
    fn from(config: WorkloadConfig) -> Self {
        let run_args = config.run_args();
        let info = config.info;
        Self {
            name: info.name,
            description: info.description,
            benchmark: info.benchmark,
            run_args,
            iterations: info.iterations,
            cmdname: info.cmdname,
            exec_pre: info.exec_pre,
            exec_post: info.exec_post,
        }
    }
}

/// Load every `<dir>/*.toml` workload, checking each against the known benchmarks.
pub fn load_workloads(
    dir: impl AsRef<Path>,
    benchmarks: &BenchmarkRegistry,
) -> Result<Vec<Workload>, ConfigError> {
    let dir = dir.as_ref();
    let io_error = |source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
            files.push(path);
        }
    }
    files.sort();

    let mut workloads: BTreeMap<String, Workload> = BTreeMap::new();
    for path in files {
        let origin = path.display().to_string();
        let workload = Workload::from(WorkloadConfig::load(&path)?);

        if !benchmarks.contains(&workload.benchmark) {
            return Err(ConfigError::invalid(
                origin,
                format!(
                    "workload '{}' specified non-existent benchmark '{}'",
                    workload.name, workload.benchmark
                ),
            ));
        }
        if workloads.contains_key(&workload.name) {
            return Err(ConfigError::invalid(
                origin,
                format!("duplicate workload name '{}'", workload.name),
            ));
        }

        info!("Registered '{}' workload", workload.name);
        workloads.insert(workload.name.clone(), workload);
    }

    Ok(workloads.into_values().collect())
}

/// Execution plan for workloads
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    /// Ordered list of workloads to run
    pub workloads: Vec<Workload>,
    /// Benchmarks the selected workloads need built
    pub target_benchmarks: BTreeSet<String>,
}

impl ExecutionPlan {
    /// True when no workload was selected
    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }

    /// Iterations across all workloads
    pub fn total_iterations(&self) -> u64 {
        self.workloads.iter().map(|w| w.iterations as u64).sum()
    }
}

/// Build execution plan from loaded workloads
///
/// Filters workloads based on CLI options and returns them in deterministic order.
pub fn build_plan(
    workloads: impl IntoIterator<Item = Workload>,
    filter: Option<&regex::Regex>,
    selection: &BenchmarkSelection,
) -> ExecutionPlan {
    let mut selected: Vec<_> = workloads
        .into_iter()
        .filter(|w| filter.is_none_or(|re| re.is_match(&w.name)))
        .filter(|w| selection.contains(&w.benchmark))
        .collect();

    selected.sort_by(|a, b| a.name.cmp(&b.name));

    let target_benchmarks = selected.iter().map(|w| w.benchmark.clone()).collect();
    ExecutionPlan {
        workloads: selected,
        target_benchmarks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::Benchmark;
    use crate::config::BenchmarkConfig;

    fn make_workload(name: &str, benchmark: &str) -> Workload {
        Workload {
            name: name.to_string(),
            description: String::new(),
            benchmark: benchmark.to_string(),
            run_args: Vec::new(),
            iterations: 1,
            cmdname: None,
            exec_pre: None,
            exec_post: None,
        }
    }

    fn registry(names: &[&str]) -> BenchmarkRegistry {
        let mut registry = BenchmarkRegistry::new();
        for name in names {
            let config = BenchmarkConfig::parse(
                &format!(
                    "[info]\nname = \"{}\"\ndescription = \"\"\n[run.exec]\ncmds = [\"true\"]\n",
                    name
                ),
                name,
            )
            .unwrap();
            registry
                .insert(Benchmark::from_config(config, "/tmp"))
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_no_filter() {
        let workloads = vec![
            make_workload("c_load", "b1"),
            make_workload("a_load", "b1"),
            make_workload("b_load", "b2"),
        ];

        let plan = build_plan(workloads, None, &BenchmarkSelection::One("all".into()));

        // Should be sorted alphabetically
        assert_eq!(plan.workloads.len(), 3);
        assert_eq!(plan.workloads[0].name, "a_load");
        assert_eq!(plan.workloads[1].name, "b_load");
        assert_eq!(plan.workloads[2].name, "c_load");
        assert_eq!(
            plan.target_benchmarks,
            BTreeSet::from(["b1".to_string(), "b2".to_string()])
        );
    }

    #[test]
    fn test_regex_filter() {
        let workloads = vec![
            make_workload("buildkernel", "fbsd"),
            make_workload("buildworld", "fbsd"),
            make_workload("sqlite", "db"),
        ];
        let re = regex::Regex::new("^build").unwrap();

        let plan = build_plan(workloads, Some(&re), &BenchmarkSelection::One("all".into()));

        assert_eq!(plan.workloads.len(), 2);
        assert_eq!(plan.target_benchmarks, BTreeSet::from(["fbsd".to_string()]));
    }

    #[test]
    fn test_benchmark_selection() {
        let workloads = vec![make_workload("a", "fbsd"), make_workload("b", "db")];
        let plan = build_plan(workloads, None, &BenchmarkSelection::Many(vec!["db".into()]));

        assert_eq!(plan.workloads.len(), 1);
        assert_eq!(plan.workloads[0].name, "b");
        assert_eq!(plan.total_iterations(), 1);
    }

    #[test]
    fn test_load_workloads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("z.toml"),
            "[info]\nname = \"alpha\"\ndescription = \"\"\nbenchmark = \"b1\"\nrun_args = \"-x 1\"\niterations = 2\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.toml"),
            "[info]\nname = \"beta\"\ndescription = \"\"\nbenchmark = \"b2\"\nrun_args = \"\"\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "not a workload").unwrap();

        let workloads = load_workloads(dir.path(), &registry(&["b1", "b2"])).unwrap();
        assert_eq!(workloads.len(), 2);
        assert_eq!(workloads[0].name, "alpha");
        assert_eq!(workloads[0].run_args, vec!["-x", "1"]);
        assert_eq!(workloads[0].iterations, 2);
        assert_eq!(workloads[1].name, "beta");
    }

    #[test]
    fn test_load_workloads_unknown_benchmark() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("w.toml"),
            "[info]\nname = \"w\"\ndescription = \"\"\nbenchmark = \"missing\"\nrun_args = \"\"\n",
        )
        .unwrap();

        let err = load_workloads(dir.path(), &registry(&["b1"])).unwrap_err();
        assert!(err.to_string().contains("non-existent benchmark 'missing'"));
    }

    #[test]
    fn test_load_workloads_duplicate_name() {
        let dir = tempfile::tempdir().unwrap();
        for file in ["one.toml", "two.toml"] {
            std::fs::write(
                dir.path().join(file),
                "[info]\nname = \"w\"\ndescription = \"\"\nbenchmark = \"b1\"\nrun_args = \"\"\n",
            )
            .unwrap();
        }
        assert!(matches!(
            load_workloads(dir.path(), &registry(&["b1"])),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
