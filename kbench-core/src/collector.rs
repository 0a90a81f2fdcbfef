//! Metric Collector
//!
//! Owns the sample history of one configured metric instance.
//!
//! A collector is shared between the orchestrating thread and at most one
//! sampling loop. Appends and reads go through a per-collector lock so
//! concurrent `sample()` calls can never tear the history.

use crate::host::HostQuery;
use crate::source::{MetricSeries, MetricSource, MetricValue};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-identity sample history
#[derive(Debug, Default)]
struct History {
    samples: usize,
    // Parallel to the collector's identities.
    series: Vec<Vec<MetricValue>>,
}

/// One metric source plus its accumulated samples
pub struct MetricCollector {
    source: MetricSource,
    sampling_rate: Option<Duration>,
    identities: Vec<String>,
    host: Arc<dyn HostQuery>,
    history: Mutex<History>,
}

impl MetricCollector {
    /// Create a collector.
    ///
    /// `sampling_rate = None` makes a diff metric (sampled at run
    /// boundaries only); `Some(rate)` a continuous metric.
    pub fn new(
        source: MetricSource,
        sampling_rate: Option<Duration>,
        host: Arc<dyn HostQuery>,
    ) -> Self {
        let identities = source.identities();
        let history = History {
            samples: 0,
            series: vec![Vec::new(); identities.len()],
        };

        Self {
            source,
            sampling_rate,
            identities,
            host,
            history: Mutex::new(history),
        }
    }

    /// Source this collector samples
    pub fn source(&self) -> &MetricSource {
        &self.source
    }

    /// Sampling rate; `None` for diff metrics
    pub fn sampling_rate(&self) -> Option<Duration> {
        self.sampling_rate
    }

    /// Whether this is a diff metric
    pub fn is_diff(&self) -> bool {
        self.sampling_rate.is_none()
    }

    /// Export identities of this collector
    pub fn identities(&self) -> &[String] {
        &self.identities
    }

    /// Number of successful samples since the last reset
    pub fn len(&self) -> usize {
        self.history.lock().samples
    }

    /// Whether no sample landed since the last reset
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Query the source once and append the result.
    ///
    /// An unavailable source is logged and skipped; returns whether a
    /// sample was recorded.
    pub fn sample(&self) -> bool {
        match self.source.read(self.host.as_ref()) {
            Ok(values) => {
                let mut history = self.history.lock();
                for (series, value) in history.series.iter_mut().zip(values) {
                    series.push(value);
                }
                history.samples += 1;
                debug!(source = %self.source, samples = history.samples, "sampled metric");
                true
            }
            Err(e) => {
                warn!(source = %self.source, error = %e, "metric source unavailable, sample skipped");
                false
            }
        }
    }

    /// Drop all recorded samples
    pub fn reset(&self) {
        let mut history = self.history.lock();
        history.samples = 0;
        for series in &mut history.series {
            series.clear();
        }
    }

    /// Copy the history into `into`, keyed by identity
    pub fn export(&self, into: &mut MetricSeries) {
        let history = self.history.lock();
        for (identity, series) in self.identities.iter().zip(&history.series) {
            into.insert(identity.clone(), series.clone());
        }
    }
}

impl std::fmt::Debug for MetricCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricCollector")
            .field("source", &self.source)
            .field("sampling_rate", &self.sampling_rate)
            .field("samples", &self.len())
            .finish()
    }
}
