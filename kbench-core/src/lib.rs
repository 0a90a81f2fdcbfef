#![warn(missing_docs)]
//! kbench Core - Metric Sampling Runtime
//!
//! This crate provides the measurement side of the harness:
//! - `MetricSource` variants (kernel counters, process stats) over a `HostQuery`
//! - `MetricCollector` holding the per-iteration sample history
//! - `MetricRegistry` partitioning collectors into diff and rate-bucketed
//!   continuous metrics, and driving the `SamplingScheduler`
//! - The typed metrics configuration schema
//! - `AbortSignal` for operator interrupts

mod abort;
mod collector;
mod config;
mod host;
mod registry;
mod scheduler;
mod source;

pub use abort::AbortSignal;
pub use collector::MetricCollector;
pub use config::{
    ConfigError, MetricsConfig, PsMetricConfig, SamplingRate, SysctlMetricConfig, parse_duration,
    read_config_file,
};
pub use host::{HostQuery, ProcessRecord, StaticHost, SystemHost};
pub use registry::MetricRegistry;
pub use scheduler::{RateBuckets, SamplingScheduler};
pub use source::{MetricSeries, MetricSource, MetricValue, ProcessStat, SourceUnavailable};
