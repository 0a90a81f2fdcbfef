//! Workload Execution
//!
//! Runs each workload's iterations against the metric registry.
//!
//! ## Iteration State Machine
//!
//! ```text
//!   Idle ──► Armed ──► Running ──► Draining ──► Collected ──► Idle
//!    │         │          │           │             │
//!    │         │          │           │             └─ append WorkloadResult
//!    │         │          │           └─ stop loops, diff "after", fetch + reset
//!    │         │          └─ join child, record end
//!    │         └─ release gate, record start
//!    └─ exec_pre, start child behind gate, start loops, diff "before"
//! ```
//!
//! A spawn failure classified as fatal ends the workload; the remaining
//! iterations are recorded as skipped. Any other failure marks only its
//! own iteration as failed. An operator abort discards the current
//! iteration and keeps everything completed before it.

use crate::benchmark::BenchmarkRegistry;
use crate::planner::{ExecutionPlan, Workload};
use crate::supervisor::{ProcessRunner, RunnerError, run_hook};
use indicatif::{ProgressBar, ProgressStyle};
use kbench_core::{AbortSignal, MetricRegistry, MetricSeries};
use kbench_report::{IterationStatus, WorkloadResult};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

/// Per-workload iteration results, keyed by workload name
pub type RunResults = BTreeMap<String, Vec<WorkloadResult>>;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to start sampling threads: {0}")]
    Sampling(#[source] std::io::Error),

    #[error("run interrupted after {} completed iteration(s)", count_iterations(.results))]
    Aborted { results: RunResults },
}

fn count_iterations(results: &RunResults) -> usize {
    results.values().map(Vec::len).sum()
}

/// Instants bounding the measured window of one iteration
#[derive(Debug, Clone, Copy)]
pub struct IterationTimeline {
    /// Diff "before" pass completed
    pub before_sampled: Instant,
    /// Gate released
    pub started: Instant,
    /// Child joined
    pub ended: Instant,
    /// Diff "after" pass began
    pub after_sampled: Instant,
}

/// Results of one workload
#[derive(Debug, Clone)]
pub struct WorkloadOutcome {
    pub name: String,
    /// One entry per iteration, in order
    pub results: Vec<WorkloadResult>,
    /// Timeline of each iteration that reached the gate
    pub timelines: Vec<Option<IterationTimeline>>,
    /// Stopped by an operator abort
    pub aborted: bool,
}

enum Iteration {
    Finished {
        result: WorkloadResult,
        timeline: Option<IterationTimeline>,
        fatal: bool,
    },
    Aborted,
}

/// Drives workloads through the iteration state machine
pub struct WorkloadExecutor<'a> {
    metrics: &'a mut MetricRegistry,
    abort: AbortSignal,
    progress: ProgressBar,
}

impl<'a> WorkloadExecutor<'a> {
    pub fn new(metrics: &'a mut MetricRegistry, abort: AbortSignal) -> Self {
        Self {
            metrics,
            abort,
            progress: ProgressBar::hidden(),
        }
    }

    /// Advance `progress` once per iteration
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Run every iteration of `workload` through `runner`.
    ///
    /// Hooks run in `hook_dir` when given.
    pub fn run_workload(
        &mut self,
        workload: &Workload,
        runner: &dyn ProcessRunner,
        hook_dir: Option<&Path>,
    ) -> Result<WorkloadOutcome, RunError> {
        let mut outcome = WorkloadOutcome {
            name: workload.name.clone(),
            results: Vec::with_capacity(workload.iterations as usize),
            timelines: Vec::with_capacity(workload.iterations as usize),
            aborted: false,
        };

        let iterations = workload.iterations as usize;
        for index in 0..iterations {
            self.progress
                .set_message(format!("{} #{}", workload.name, index + 1));
            info!(
                cmdname = workload.cmdname.as_deref().unwrap_or(runner.program()),
                "Running '{}', run #{}",
                workload.name,
                index + 1
            );

            match self.run_iteration(workload, runner, hook_dir, index)? {
                Iteration::Aborted => {
                    warn!(workload = %workload.name, iteration = index + 1, "interrupted, discarding iteration");
                    outcome.aborted = true;
                    return Ok(outcome);
                }
                Iteration::Finished {
                    result,
                    timeline,
                    fatal,
                } => {
                    self.progress.inc(1);
                    let reason = result.error.clone();
                    outcome.results.push(result);
                    outcome.timelines.push(timeline);

                    if fatal {
                        let reason = reason.unwrap_or_default();
                        warn!(
                            workload = %workload.name,
                            "cannot start process, skipping {} remaining iteration(s)",
                            iterations - index - 1
                        );
                        for skipped in index + 1..iterations {
                            outcome
                                .results
                                .push(WorkloadResult::skipped(skipped, reason.clone()));
                            outcome.timelines.push(None);
                            self.progress.inc(1);
                        }
                        break;
                    }
                }
            }
        }
        Ok(outcome)
    }

    fn run_iteration(
        &mut self,
        workload: &Workload,
        runner: &dyn ProcessRunner,
        hook_dir: Option<&Path>,
        index: usize,
    ) -> Result<Iteration, RunError> {
        if self.abort.is_aborted() {
            return Ok(Iteration::Aborted);
        }

        if let Some(pre) = &workload.exec_pre {
            if let Err(e) = run_hook(pre, hook_dir) {
                return Ok(failed_before_start(workload, index, e));
            }
        }

        // Idle → Armed
        let mut handle = match runner.start(&workload.run_args) {
            Ok(handle) => handle,
            Err(e) => return Ok(failed_before_start(workload, index, e)),
        };
        self.metrics
            .start_sampling_threads()
            .map_err(RunError::Sampling)?;
        let before_sampled = self.metrics.sample_diff_metrics();

        // Armed → Running
        handle.release();
        let started = Instant::now();

        // Running → Draining
        let joined = handle.join(&self.abort);
        let ended = Instant::now();

        // Draining → Collected
        self.metrics.stop_sampling_threads();
        // A terminal Ctrl-C also reaches the child, which may exit before join sees the flag.
        if matches!(joined, Err(RunnerError::Aborted)) || self.abort.is_aborted() {
            self.metrics.discard_results();
            return Ok(Iteration::Aborted);
        }
        let after_sampled = Instant::now();
        self.metrics.sample_diff_metrics();
        let metrics = self.metrics.fetch_results();

        let mut error = match joined {
            Ok(exit) => exit.into_result(runner.program()).err(),
            Err(e) => Some(e),
        };
        let fatal = error.as_ref().is_some_and(RunnerError::fatal);

        if let Some(post) = &workload.exec_post {
            if let Err(e) = run_hook(post, hook_dir) {
                error.get_or_insert(e);
            }
        }

        if let Some(e) = &error {
            warn!(workload = %workload.name, iteration = index + 1, "iteration failed: {}", e);
        }

        Ok(Iteration::Finished {
            result: WorkloadResult {
                iteration: index,
                elapsed_time: ended.duration_since(started).as_secs_f64(),
                status: if error.is_none() {
                    IterationStatus::Passed
                } else {
                    IterationStatus::Failed
                },
                error: error.map(|e| e.to_string()),
                metrics,
            },
            timeline: Some(IterationTimeline {
                before_sampled,
                started,
                ended,
                after_sampled,
            }),
            fatal,
        })
    }
}

fn failed_before_start(workload: &Workload, index: usize, error: RunnerError) -> Iteration {
    warn!(workload = %workload.name, iteration = index + 1, "iteration failed: {}", error);
    Iteration::Finished {
        fatal: error.fatal(),
        result: WorkloadResult {
            iteration: index,
            elapsed_time: 0.0,
            status: IterationStatus::Failed,
            error: Some(error.to_string()),
            metrics: MetricSeries::new(),
        },
        timeline: None,
    }
}

/// Progress bar over all planned iterations; hidden when not wanted
pub fn progress_bar(total: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Run every planned workload with its benchmark's runner.
///
/// Workloads run one after another. On abort, the results completed so far
/// are returned inside [`RunError::Aborted`].
pub fn run_workloads(
    plan: &ExecutionPlan,
    benchmarks: &BenchmarkRegistry,
    metrics: &mut MetricRegistry,
    abort: &AbortSignal,
    show_progress: bool,
) -> Result<RunResults, RunError> {
    let progress = progress_bar(plan.total_iterations(), show_progress);
    let mut executor =
        WorkloadExecutor::new(metrics, abort.clone()).with_progress(progress.clone());
    let mut results = RunResults::new();

    for workload in &plan.workloads {
        // Planning only admits workloads whose benchmark is registered.
        let Some(benchmark) = benchmarks.get(&workload.benchmark) else {
            warn!(workload = %workload.name, benchmark = %workload.benchmark, "benchmark not loaded, skipping");
            continue;
        };
        let runner = benchmark.runner();
        let outcome = executor.run_workload(workload, &runner, Some(benchmark.dir()))?;

        let aborted = outcome.aborted;
        if !outcome.results.is_empty() || !aborted {
            results.insert(outcome.name, outcome.results);
        }
        if aborted {
            progress.abandon_with_message("Interrupted");
            return Err(RunError::Aborted { results });
        }
    }

    progress.finish_with_message("Complete");
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::{ProcessExit, ProcessHandle};
    use kbench_core::{MetricSource, MetricValue, StaticHost};
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted runner: each `start` pops the next behavior
    struct ScriptedRunner {
        script: Vec<Step>,
        calls: AtomicUsize,
    }

    #[derive(Clone, Copy)]
    enum Step {
        Exit(i32),
        SpawnError(io::ErrorKind),
        Sleep(u64),
        /// Operator interrupt that also kills the child with SIGINT
        Interrupted,
    }

    struct ScriptedHandle {
        step: Step,
        released: bool,
    }

    impl ScriptedRunner {
        fn new(script: Vec<Step>) -> Self {
            Self {
                script,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ProcessRunner for ScriptedRunner {
        fn program(&self) -> &str {
            "scripted"
        }

        fn start(&self, _args: &[String]) -> Result<Box<dyn ProcessHandle>, RunnerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script[call.min(self.script.len() - 1)];
            if let Step::SpawnError(kind) = step {
                return Err(RunnerError::SpawnFailed {
                    program: "scripted".to_string(),
                    source: io::Error::new(kind, "scripted failure"),
                });
            }
            Ok(Box::new(ScriptedHandle {
                step,
                released: false,
            }))
        }
    }

    impl ProcessHandle for ScriptedHandle {
        fn release(&mut self) {
            self.released = true;
        }

        fn join(self: Box<Self>, abort: &AbortSignal) -> Result<ProcessExit, RunnerError> {
            assert!(self.released, "joined before release");
            match self.step {
                Step::Exit(code) => Ok(ProcessExit {
                    code: Some(code),
                    signal: None,
                }),
                Step::Sleep(ms) => {
                    let deadline = Instant::now() + Duration::from_millis(ms);
                    while Instant::now() < deadline {
                        if abort.is_aborted() {
                            return Err(RunnerError::Aborted);
                        }
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Ok(ProcessExit {
                        code: Some(0),
                        signal: None,
                    })
                }
                Step::Interrupted => {
                    abort.abort();
                    Ok(ProcessExit {
                        code: None,
                        signal: Some(libc::SIGINT),
                    })
                }
                Step::SpawnError(_) => unreachable!(),
            }
        }
    }

    fn workload(iterations: u32) -> Workload {
        Workload {
            name: "scripted".to_string(),
            description: String::new(),
            benchmark: "bench".to_string(),
            run_args: Vec::new(),
            iterations,
            cmdname: None,
            exec_pre: None,
            exec_post: None,
        }
    }

    fn registry() -> MetricRegistry {
        let host = Arc::new(StaticHost::new().with_counter("hw.ncpu", MetricValue::Integer(4)));
        let mut registry = MetricRegistry::new(host);
        registry
            .register(
                MetricSource::Sysctl {
                    key: "hw.ncpu".to_string(),
                },
                None,
                "test",
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_diff_metrics_sampled_twice() {
        let mut metrics = registry();
        let runner = ScriptedRunner::new(vec![Step::Exit(0)]);
        let mut executor = WorkloadExecutor::new(&mut metrics, AbortSignal::new());

        let outcome = executor.run_workload(&workload(2), &runner, None).unwrap();
        assert_eq!(outcome.results.len(), 2);
        for (index, result) in outcome.results.iter().enumerate() {
            assert_eq!(result.iteration, index);
            assert!(result.passed());
            assert_eq!(result.metrics["hw.ncpu"].len(), 2);
        }
    }

    #[test]
    fn test_gate_ordering() {
        let mut metrics = registry();
        let runner = ScriptedRunner::new(vec![Step::Sleep(20)]);
        let mut executor = WorkloadExecutor::new(&mut metrics, AbortSignal::new());

        let outcome = executor.run_workload(&workload(3), &runner, None).unwrap();
        for timeline in outcome.timelines.iter().flatten() {
            assert!(timeline.before_sampled <= timeline.started);
            assert!(timeline.started <= timeline.ended);
            assert!(timeline.ended <= timeline.after_sampled);
        }
        assert!(outcome.results.iter().all(|r| r.elapsed_time >= 0.02));
    }

    #[test]
    fn test_non_fatal_spawn_failure_keeps_going() {
        let mut metrics = registry();
        let runner = ScriptedRunner::new(vec![
            Step::Exit(0),
            Step::SpawnError(io::ErrorKind::WouldBlock),
            Step::Exit(0),
        ]);
        let mut executor = WorkloadExecutor::new(&mut metrics, AbortSignal::new());

        let outcome = executor.run_workload(&workload(3), &runner, None).unwrap();
        let statuses: Vec<_> = outcome.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                IterationStatus::Passed,
                IterationStatus::Failed,
                IterationStatus::Passed
            ]
        );
        assert!(outcome.results[1].metrics.is_empty());
        assert_eq!(outcome.results[2].metrics["hw.ncpu"].len(), 2);
    }

    #[test]
    fn test_fatal_spawn_failure_skips_rest() {
        let mut metrics = registry();
        let runner = ScriptedRunner::new(vec![Step::Exit(0), Step::SpawnError(io::ErrorKind::NotFound)]);
        let mut executor = WorkloadExecutor::new(&mut metrics, AbortSignal::new());

        let outcome = executor.run_workload(&workload(4), &runner, None).unwrap();
        let statuses: Vec<_> = outcome.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                IterationStatus::Passed,
                IterationStatus::Failed,
                IterationStatus::Skipped,
                IterationStatus::Skipped
            ]
        );
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_runtime_failure_keeps_metrics() {
        let mut metrics = registry();
        let runner = ScriptedRunner::new(vec![Step::Exit(2), Step::Exit(0)]);
        let mut executor = WorkloadExecutor::new(&mut metrics, AbortSignal::new());

        let outcome = executor.run_workload(&workload(2), &runner, None).unwrap();
        let first = &outcome.results[0];
        assert_eq!(first.status, IterationStatus::Failed);
        assert!(first.error.as_deref().unwrap().contains("status 2"));
        assert_eq!(first.metrics["hw.ncpu"].len(), 2);
        assert!(outcome.results[1].passed());
    }

    #[test]
    fn test_abort_discards_current_iteration() {
        let mut metrics = registry();
        let runner = ScriptedRunner::new(vec![Step::Exit(0), Step::Sleep(5_000)]);
        let abort = AbortSignal::new();
        let trigger = abort.clone();
        let mut executor = WorkloadExecutor::new(&mut metrics, abort);

        let timer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            trigger.abort();
        });
        let outcome = executor.run_workload(&workload(3), &runner, None).unwrap();
        timer.join().unwrap();

        assert!(outcome.aborted);
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].passed());
        assert!(!metrics.is_sampling());
        assert!(metrics.fetch_results().values().all(Vec::is_empty));
    }

    #[test]
    fn test_child_killed_by_interrupt_is_discarded() {
        let mut metrics = registry();
        let runner = ScriptedRunner::new(vec![Step::Exit(0), Step::Interrupted]);
        let mut executor = WorkloadExecutor::new(&mut metrics, AbortSignal::new());

        let outcome = executor.run_workload(&workload(3), &runner, None).unwrap();

        assert!(outcome.aborted);
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].passed());
        assert_eq!(outcome.timelines.len(), 1);
        assert!(metrics.fetch_results().values().all(Vec::is_empty));
    }

    #[test]
    fn test_failing_hooks_mark_iteration_failed() {
        let mut metrics = registry();
        let runner = ScriptedRunner::new(vec![Step::Exit(0)]);
        let mut executor = WorkloadExecutor::new(&mut metrics, AbortSignal::new());

        let mut pre = workload(1);
        pre.exec_pre = Some("exit 1".to_string());
        let outcome = executor.run_workload(&pre, &runner, None).unwrap();
        assert_eq!(outcome.results[0].status, IterationStatus::Failed);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);

        let mut post = workload(2);
        post.exec_post = Some("exit 1".to_string());
        let outcome = executor.run_workload(&post, &runner, None).unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results.iter().all(|r| r.status == IterationStatus::Failed));
        assert!(outcome.results.iter().all(|r| r.metrics["hw.ncpu"].len() == 2));
    }
}
