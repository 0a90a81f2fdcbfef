//! Integration tests for kbench
//!
//! These run real processes through the gate and sample metrics from a
//! scripted host, checking the end-to-end behavior of one workload.

use kbench::prelude::*;
use kbench::{
    IterationStatus, MetricValue, ProcessHandle, ProcessRecord, ProcessStat, RunnerError,
    parse_json_report,
};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn workload(name: &str, args: &[&str], iterations: u32) -> Workload {
    Workload {
        name: name.to_string(),
        description: String::new(),
        benchmark: name.to_string(),
        run_args: args.iter().map(|s| s.to_string()).collect(),
        iterations,
        cmdname: None,
        exec_pre: None,
        exec_post: None,
    }
}

fn sleeping_host() -> StaticHost {
    StaticHost::new()
        .with_counter("hw.ncpu", MetricValue::Integer(8))
        .with_process(
            ProcessRecord::new(4242, "sleep")
                .with_stats([(ProcessStat::Pcpu, MetricValue::Float(0.0))]),
        )
}

/// `sleep 1` twice: one diff counter and one 100ms process stat
#[test]
fn test_sleep_workload_samples_metrics() {
    let mut metrics = MetricRegistry::new(Arc::new(sleeping_host()));
    metrics
        .register(
            MetricSource::Sysctl {
                key: "hw.ncpu".into(),
            },
            None,
            "test",
        )
        .unwrap();
    metrics
        .register(
            MetricSource::ProcessStat {
                matcher: "sleep".into(),
                stats: vec![ProcessStat::Pcpu],
            },
            Some(Duration::from_millis(100)),
            "test",
        )
        .unwrap();

    let runner = CommandRunner::new("sleep");
    let outcome = WorkloadExecutor::new(&mut metrics, AbortSignal::new())
        .run_workload(&workload("sleep", &["1"], 2), &runner, None)
        .unwrap();

    assert!(!outcome.aborted);
    assert_eq!(outcome.results.len(), 2);
    for result in &outcome.results {
        assert_eq!(result.status, IterationStatus::Passed);
        assert!(result.elapsed_time >= 1.0);
        assert_eq!(result.metrics["hw.ncpu"].len(), 2);

        // First sample lands one period after arming; never more than ceil(D/R)+1.
        let pcpu = result.metrics["pcpu"].len();
        assert!((5..=12).contains(&pcpu), "pcpu samples: {pcpu}");
    }
    assert!(!metrics.is_sampling());
}

/// `pcpu` read from the real process table while the gated child runs
#[test]
fn test_system_host_samples_running_child() {
    // A uniquely named copy keeps other tests' `sleep` processes out of the match.
    let dir = tempfile::tempdir().unwrap();
    let sleeper = dir.path().join("kbench-sleeper");
    let source = ["/bin/sleep", "/usr/bin/sleep"]
        .into_iter()
        .find(|p| std::path::Path::new(p).is_file())
        .unwrap();
    std::fs::copy(source, &sleeper).unwrap();

    let rate = Duration::from_millis(100);
    let mut metrics = MetricRegistry::new(Arc::new(SystemHost::new()));
    metrics
        .register(
            MetricSource::ProcessStat {
                matcher: "kbench-sleeper".into(),
                stats: vec![ProcessStat::Pcpu],
            },
            Some(rate),
            "test",
        )
        .unwrap();

    let runner = CommandRunner::new(sleeper.to_string_lossy().into_owned());
    let outcome = WorkloadExecutor::new(&mut metrics, AbortSignal::new())
        .run_workload(&workload("sleeper", &["1"], 1), &runner, None)
        .unwrap();

    let result = &outcome.results[0];
    assert_eq!(result.status, IterationStatus::Passed);
    let pcpu = result.metrics.get("pcpu").map_or(0, Vec::len);
    // The sampling window is slightly wider than the measured run.
    let window = result.elapsed_time + 0.05;
    let bound = (window / rate.as_secs_f64()).ceil() as usize + 1;
    assert!(pcpu >= 1, "no pcpu samples from the running child");
    assert!(pcpu <= bound, "pcpu samples: {pcpu}, bound {bound}");
}

/// A process stat whose process never shows up yields an empty series
#[test]
fn test_unmatched_process_gives_empty_series() {
    let mut metrics = MetricRegistry::new(Arc::new(StaticHost::new()));
    metrics
        .register(
            MetricSource::ProcessStat {
                matcher: "no-such-process".into(),
                stats: vec![ProcessStat::Pcpu],
            },
            Some(Duration::from_millis(50)),
            "test",
        )
        .unwrap();

    let runner = CommandRunner::new("sleep");
    let outcome = WorkloadExecutor::new(&mut metrics, AbortSignal::new())
        .run_workload(&workload("sleep", &["0.3"], 1), &runner, None)
        .unwrap();

    assert!(outcome.results[0].passed());
    assert!(
        outcome.results[0]
            .metrics
            .get("pcpu")
            .is_none_or(|series| series.is_empty())
    );
}

/// Runner that fails to spawn on one chosen call
struct FlakyRunner {
    inner: CommandRunner,
    fail_on: usize,
    calls: AtomicUsize,
}

impl ProcessRunner for FlakyRunner {
    fn program(&self) -> &str {
        self.inner.program()
    }

    fn start(&self, args: &[String]) -> Result<Box<dyn ProcessHandle>, RunnerError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_on {
            return Err(RunnerError::SpawnFailed {
                program: "true".into(),
                source: io::Error::new(io::ErrorKind::WouldBlock, "fork: resource unavailable"),
            });
        }
        self.inner.start(args)
    }
}

#[test]
fn test_spawn_failure_only_fails_its_iteration() {
    let mut metrics = MetricRegistry::new(Arc::new(
        StaticHost::new().with_counter("hw.ncpu", MetricValue::Integer(8)),
    ));
    metrics
        .register(
            MetricSource::Sysctl {
                key: "hw.ncpu".into(),
            },
            None,
            "test",
        )
        .unwrap();
    let runner = FlakyRunner {
        inner: CommandRunner::new("true"),
        fail_on: 1,
        calls: AtomicUsize::new(0),
    };

    let outcome = WorkloadExecutor::new(&mut metrics, AbortSignal::new())
        .run_workload(&workload("true", &[], 3), &runner, None)
        .unwrap();

    let statuses: Vec<_> = outcome.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            IterationStatus::Passed,
            IterationStatus::Failed,
            IterationStatus::Passed
        ]
    );
    assert!(outcome.results[1].error.is_some());
    assert_eq!(outcome.results[2].metrics["hw.ncpu"].len(), 2);
}

#[test]
fn test_gate_orders_sampling_around_process() {
    let mut metrics = MetricRegistry::new(Arc::new(sleeping_host()));
    metrics
        .register(
            MetricSource::Sysctl {
                key: "hw.ncpu".into(),
            },
            None,
            "test",
        )
        .unwrap();

    let runner = CommandRunner::new("sleep");
    let outcome = WorkloadExecutor::new(&mut metrics, AbortSignal::new())
        .run_workload(&workload("sleep", &["0.1"], 2), &runner, None)
        .unwrap();

    for timeline in outcome.timelines.iter().flatten() {
        assert!(timeline.before_sampled <= timeline.started);
        assert!(timeline.started < timeline.ended);
        assert!(timeline.ended <= timeline.after_sampled);
        assert!(timeline.ended - timeline.started >= Duration::from_millis(100));
    }
    assert_eq!(outcome.timelines.iter().flatten().count(), 2);
}

#[test]
fn test_missing_binary_skips_workload() {
    let mut metrics = MetricRegistry::new(Arc::new(StaticHost::new()));
    let runner = CommandRunner::new("kbench-definitely-not-installed");

    let outcome = WorkloadExecutor::new(&mut metrics, AbortSignal::new())
        .run_workload(&workload("missing", &[], 3), &runner, None)
        .unwrap();

    assert_eq!(outcome.results.len(), 3);
    assert_eq!(outcome.results[0].status, IterationStatus::Failed);
    assert!(
        outcome.results[1..]
            .iter()
            .all(|r| r.status == IterationStatus::Skipped)
    );
}

#[test]
fn test_abort_stops_running_process() {
    let mut metrics = MetricRegistry::new(Arc::new(StaticHost::new()));
    let abort = AbortSignal::new();
    let trigger = abort.clone();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        trigger.abort();
    });

    let runner = CommandRunner::new("sleep");
    let result = WorkloadExecutor::new(&mut metrics, abort)
        .run_workload(&workload("sleep", &["30"], 1), &runner, None)
        .unwrap();
    stopper.join().unwrap();

    assert!(result.aborted);
    assert!(result.results.is_empty());
}

#[test]
fn test_report_file_layout() {
    let mut metrics = MetricRegistry::new(Arc::new(
        StaticHost::new().with_counter("hw.ncpu", MetricValue::Integer(8)),
    ));
    metrics
        .register(
            MetricSource::Sysctl {
                key: "hw.ncpu".into(),
            },
            None,
            "test",
        )
        .unwrap();
    let outcome = WorkloadExecutor::new(&mut metrics, AbortSignal::new())
        .run_workload(&workload("true", &[], 2), &CommandRunner::new("true"), None)
        .unwrap();

    let results = [(outcome.name, outcome.results)].into_iter().collect();
    let report = kbench::build_report(results, "default", false, 12.5);

    let dir = tempfile::tempdir().unwrap();
    let path = kbench_cli::write_report(&report, &dir.path().join("results"), "default").unwrap();
    let json = std::fs::read_to_string(&path).unwrap();
    let parsed = parse_json_report(&json).unwrap();

    assert_eq!(parsed.iterations("true").len(), 2);
    assert_eq!(parsed.summary.passed, 2);
    assert!(!parsed.uname.is_empty());
    assert_eq!(
        parsed.iterations("true")[0].metrics["hw.ncpu"],
        vec![MetricValue::Integer(8), MetricValue::Integer(8)]
    );
}
