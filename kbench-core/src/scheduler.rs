//! Sampling Scheduler
//!
//! Runs one periodic sampling loop per distinct sampling rate.
//!
//! ```text
//!   start()                                   stop()
//!     │                                         │
//!     ├──► [kbench-sampler-100ms] ─tick─tick─tick─┤ join
//!     ├──► [kbench-sampler-1000ms] ──────tick────┤ join
//!     ▼                                         ▼
//! ```
//!
//! Each loop waits on its stop channel with a timeout, so a stop request
//! interrupts the wait but never an in-flight sample. Ticks are scheduled
//! against fixed deadlines; a tick that overruns the next deadline is not
//! replayed.

use crate::collector::MetricCollector;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Collectors grouped by sampling rate
pub type RateBuckets = BTreeMap<Duration, Vec<Arc<MetricCollector>>>;

struct SamplingLoop {
    rate: Duration,
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<usize>,
}

/// A set of running sampling loops, started and stopped as a unit
pub struct SamplingScheduler {
    loops: Vec<SamplingLoop>,
}

impl SamplingScheduler {
    /// Start one loop per bucket.
    ///
    /// If a thread cannot be spawned, loops started so far are stopped
    /// before the error is returned.
    pub fn start(buckets: &RateBuckets) -> std::io::Result<Self> {
        let mut scheduler = Self {
            loops: Vec::with_capacity(buckets.len()),
        };

        for (&rate, collectors) in buckets {
            let (stop_tx, stop_rx) = mpsc::channel();
            let collectors = collectors.clone();

            let spawned = thread::Builder::new()
                .name(format!("kbench-sampler-{}ms", rate.as_millis()))
                .spawn(move || sampling_loop(rate, &collectors, &stop_rx));

            match spawned {
                Ok(handle) => scheduler.loops.push(SamplingLoop {
                    rate,
                    stop_tx,
                    handle,
                }),
                Err(e) => {
                    scheduler.stop();
                    return Err(e);
                }
            }
        }

        debug!(loops = scheduler.loops.len(), "sampling loops started");
        Ok(scheduler)
    }

    /// Number of running loops
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// Whether no loop is running
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Signal every loop and join them all.
    ///
    /// Returns the total number of ticks the loops executed.
    pub fn stop(&mut self) -> usize {
        // Signal everyone first so the loops wind down in parallel.
        for l in &self.loops {
            let _ = l.stop_tx.send(());
        }

        let mut ticks = 0;
        for l in self.loops.drain(..) {
            match l.handle.join() {
                Ok(n) => {
                    debug!(rate_ms = l.rate.as_millis() as u64, ticks = n, "sampling loop stopped");
                    ticks += n;
                }
                Err(_) => warn!(
                    rate_ms = l.rate.as_millis() as u64,
                    "sampling loop panicked"
                ),
            }
        }
        ticks
    }
}

impl Drop for SamplingScheduler {
    fn drop(&mut self) {
        if !self.loops.is_empty() {
            self.stop();
        }
    }
}

fn sampling_loop(
    rate: Duration,
    collectors: &[Arc<MetricCollector>],
    stop_rx: &mpsc::Receiver<()>,
) -> usize {
    let mut ticks = 0;
    let mut deadline = Instant::now() + rate;

    loop {
        let wait = deadline.saturating_duration_since(Instant::now());
        match stop_rx.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            // Stop requested, or the scheduler is gone.
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        for collector in collectors {
            collector.sample();
        }
        ticks += 1;

        deadline += rate;
        let now = Instant::now();
        if deadline <= now {
            deadline = now + rate;
        }
    }

    ticks
}
