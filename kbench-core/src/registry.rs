//! Metric Registry
//!
//! Owns every configured [`MetricCollector`] for one run invocation and
//! manages the sampling lifecycle around each benchmark iteration.
//!
//! ```text
//!                  MetricRegistry
//!          ┌──────────────┴──────────────┐
//!   diff collectors               continuous buckets
//!   (sampled before/after)        rate → [collectors]
//!                                        │
//!                                 SamplingScheduler
//!                                 (one loop per rate)
//! ```
//!
//! Every collector lives in exactly one of the two partitions and keeps
//! the rate it was registered with. Export identities must be unique
//! across the registry because results are a flat identity → samples map.

use crate::collector::MetricCollector;
use crate::config::{ConfigError, MetricsConfig, SamplingRate};
use crate::host::HostQuery;
use crate::scheduler::{RateBuckets, SamplingScheduler};
use crate::source::{MetricSeries, MetricSource};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// All configured collectors, partitioned into diff and continuous metrics
pub struct MetricRegistry {
    host: Arc<dyn HostQuery>,
    diff: Vec<Arc<MetricCollector>>,
    continuous: RateBuckets,
    identities: BTreeSet<String>,
    active: Option<SamplingScheduler>,
}

impl MetricRegistry {
    /// Empty registry sampling through `host`
    pub fn new(host: Arc<dyn HostQuery>) -> Self {
        Self {
            host,
            diff: Vec::new(),
            continuous: RateBuckets::new(),
            identities: BTreeSet::new(),
            active: None,
        }
    }

    /// Load a metrics file and register everything it describes
    pub fn load(path: impl AsRef<Path>, host: Arc<dyn HostQuery>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = MetricsConfig::load(path)?;
        Self::from_config(&config, host, &path.display().to_string())
    }

    /// Build a registry from an already parsed metrics configuration
    pub fn from_config(
        config: &MetricsConfig,
        host: Arc<dyn HostQuery>,
        origin: &str,
    ) -> Result<Self, ConfigError> {
        let mut registry = Self::new(host);

        for class in &config.ignored {
            warn!(class = %class, "ignoring unsupported metric class");
        }

        for group in &config.sysctl {
            let rate = resolve_rate(group.sampling_rate.as_ref(), origin)?;
            for oid in &group.oids {
                registry.register(MetricSource::Sysctl { key: oid.clone() }, rate, origin)?;
            }
            debug!(group = %group.name, mode = ?group.mode, oids = group.oids.len(), "registered sysctl metric group");
        }

        for query in &config.ps {
            let rate = resolve_rate(query.sampling_rate.as_ref(), origin)?;
            let stats = query
                .parsed_stats()
                .map_err(|e| ConfigError::invalid(origin, e))?;
            registry.register(
                MetricSource::ProcessStat {
                    matcher: query.command.clone(),
                    stats,
                },
                rate,
                origin,
            )?;
            debug!(command = %query.command, stats = ?query.stats, "registered ps metric");
        }

        info!(
            diff = registry.diff.len(),
            continuous = registry.continuous_len(),
            buckets = registry.continuous.len(),
            "loaded metrics"
        );
        Ok(registry)
    }

    /// Register one collector.
    ///
    /// Fails if any of its export identities is already taken.
    pub fn register(
        &mut self,
        source: MetricSource,
        sampling_rate: Option<Duration>,
        origin: &str,
    ) -> Result<(), ConfigError> {
        let identities = source.identities();
        if let Some(dup) = identities.iter().find(|id| self.identities.contains(*id)) {
            return Err(ConfigError::invalid(
                origin,
                format!("metric '{}' is configured more than once", dup),
            ));
        }
        self.identities.extend(identities);

        let collector = Arc::new(MetricCollector::new(
            source,
            sampling_rate,
            Arc::clone(&self.host),
        ));
        match sampling_rate {
            None => self.diff.push(collector),
            Some(rate) => self.continuous.entry(rate).or_default().push(collector),
        }
        Ok(())
    }

    /// Diff collectors, in registration order
    pub fn diff_metrics(&self) -> &[Arc<MetricCollector>] {
        &self.diff
    }

    /// Continuous collectors grouped by rate
    pub fn continuous_metrics(&self) -> &RateBuckets {
        &self.continuous
    }

    fn continuous_len(&self) -> usize {
        self.continuous.values().map(Vec::len).sum()
    }

    /// Whether no collector is registered at all
    pub fn is_empty(&self) -> bool {
        self.diff.is_empty() && self.continuous.is_empty()
    }

    /// Whether sampling loops are currently running
    pub fn is_sampling(&self) -> bool {
        self.active.is_some()
    }

    /// Sample every diff collector once, in registration order.
    ///
    /// Returns the instant the pass completed.
    pub fn sample_diff_metrics(&self) -> Instant {
        for collector in &self.diff {
            collector.sample();
        }
        Instant::now()
    }

    /// Start one sampling loop per rate bucket.
    ///
    /// No-op without continuous metrics. Loops left over from a previous
    /// start are stopped first.
    pub fn start_sampling_threads(&mut self) -> std::io::Result<()> {
        if self.active.is_some() {
            warn!("sampling loops still running from a previous iteration, stopping them");
            self.stop_sampling_threads();
        }
        if self.continuous.is_empty() {
            return Ok(());
        }

        self.active = Some(SamplingScheduler::start(&self.continuous)?);
        Ok(())
    }

    /// Stop and join every sampling loop. No-op when none are running.
    pub fn stop_sampling_threads(&mut self) {
        if let Some(mut scheduler) = self.active.take() {
            let ticks = scheduler.stop();
            debug!(ticks, "sampling loops joined");
        }
    }

    /// Export every collector into a fresh map, then reset it.
    ///
    /// Loops still running are stopped first; reading while sampling would
    /// race the iteration boundary.
    pub fn fetch_results(&mut self) -> MetricSeries {
        if self.active.is_some() {
            warn!("fetching results while sampling, stopping loops first");
            self.stop_sampling_threads();
        }

        let mut results = MetricSeries::new();
        for collector in self.all_collectors() {
            collector.export(&mut results);
            collector.reset();
        }
        results
    }

    /// Drop every sample recorded since the last fetch
    pub fn discard_results(&mut self) {
        self.stop_sampling_threads();
        for collector in self.all_collectors() {
            collector.reset();
        }
    }

    fn all_collectors(&self) -> impl Iterator<Item = &Arc<MetricCollector>> {
        self.diff.iter().chain(self.continuous.values().flatten())
    }
}

impl Drop for MetricRegistry {
    fn drop(&mut self) {
        self.stop_sampling_threads();
    }
}

fn resolve_rate(rate: Option<&SamplingRate>, origin: &str) -> Result<Option<Duration>, ConfigError> {
    rate.map(|r| r.to_duration().map_err(|e| ConfigError::invalid(origin, e)))
        .transpose()
}
