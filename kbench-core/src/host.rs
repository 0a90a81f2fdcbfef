//! Host Query Primitives
//!
//! Synchronous reads of kernel counters and running-process stats.
//!
//! - [`SystemHost`] talks to the real machine: counters come from
//!   `/proc/sys` on Linux and `sysctl -n` elsewhere, processes are
//!   enumerated with `sysinfo`.
//! - [`StaticHost`] serves fixed, mutable-at-runtime answers and is used
//!   by tests and dry runs.

use crate::source::{MetricValue, ProcessStat, SourceUnavailable};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::Path;
use sysinfo::{ProcessesToUpdate, System};

/// Stat snapshot of one running process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRecord {
    /// Process id
    pub pid: u32,
    /// Command name
    pub name: String,
    /// Stats reported for the process
    pub stats: BTreeMap<ProcessStat, MetricValue>,
}

impl ProcessRecord {
    /// Record without any stats
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            stats: BTreeMap::new(),
        }
    }

    /// Attach stat values
    pub fn with_stats(mut self, stats: impl IntoIterator<Item = (ProcessStat, MetricValue)>) -> Self {
        self.stats.extend(stats);
        self
    }
}

/// Capability to query the host the harness runs on
pub trait HostQuery: Send + Sync {
    /// Read one named kernel counter
    fn read_counter(&self, key: &str) -> Result<MetricValue, SourceUnavailable>;

    /// Find the first running process whose command name matches `name`
    fn find_process(&self, name: &str) -> Option<ProcessRecord>;
}

/// The machine kbench is running on
pub struct SystemHost {
    // Kept between calls so per-process CPU usage is a delta since the last refresh.
    system: Mutex<System>,
}

impl SystemHost {
    /// Create a host handle
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostQuery for SystemHost {
    fn read_counter(&self, key: &str) -> Result<MetricValue, SourceUnavailable> {
        read_counter_text(key)
            .map(|text| MetricValue::from_text(&text))
            .map_err(|reason| SourceUnavailable::Counter {
                key: key.to_string(),
                reason,
            })
    }

    fn find_process(&self, name: &str) -> Option<ProcessRecord> {
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::All, true);

        // Lowest pid wins so repeated lookups settle on the same process.
        let (pid, process) = system
            .processes()
            .iter()
            .filter(|(_, p)| {
                p.name().to_string_lossy() == name
                    || p
                        .exe()
                        .and_then(Path::file_name)
                        .is_some_and(|exe| exe.to_string_lossy() == name)
            })
            .min_by_key(|(pid, _)| pid.as_u32())?;

        Some(
            ProcessRecord::new(pid.as_u32(), process.name().to_string_lossy()).with_stats([
                (ProcessStat::Pcpu, MetricValue::Float(process.cpu_usage() as f64)),
                (
                    ProcessStat::Time,
                    MetricValue::Float(process.accumulated_cpu_time() as f64 / 1000.0),
                ),
                (ProcessStat::Rss, MetricValue::Integer(process.memory() as i64)),
                (
                    ProcessStat::Vsz,
                    MetricValue::Integer(process.virtual_memory() as i64),
                ),
            ]),
        )
    }
}

/// Read a counter from procfs (`kernel.ostype` → `/proc/sys/kernel/ostype`)
#[cfg(target_os = "linux")]
fn read_counter_text(key: &str) -> Result<String, String> {
    if key.is_empty() || key.split('.').any(|part| part.is_empty() || part == "..") {
        return Err("malformed counter name".to_string());
    }
    let path = Path::new("/proc/sys").join(key.replace('.', "/"));
    std::fs::read_to_string(&path).map_err(|e| format!("{}: {}", path.display(), e))
}

/// Read a counter through the `sysctl` utility
#[cfg(not(target_os = "linux"))]
fn read_counter_text(key: &str) -> Result<String, String> {
    let output = std::process::Command::new("sysctl")
        .args(["-n", key])
        .stdin(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .output()
        .map_err(|e| e.to_string())?;

    if !output.status.success() {
        return Err(format!("sysctl exited with {}", output.status));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Host with fixed answers
#[derive(Default)]
pub struct StaticHost {
    counters: RwLock<BTreeMap<String, MetricValue>>,
    processes: RwLock<Vec<ProcessRecord>>,
}

impl StaticHost {
    /// Empty host: no counters, no processes
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`StaticHost::set_counter`]
    pub fn with_counter(self, key: impl Into<String>, value: MetricValue) -> Self {
        self.set_counter(key, value);
        self
    }

    /// Builder form of [`StaticHost::add_process`]
    pub fn with_process(self, record: ProcessRecord) -> Self {
        self.add_process(record);
        self
    }

    /// Set or replace a counter value
    pub fn set_counter(&self, key: impl Into<String>, value: MetricValue) {
        self.counters.write().insert(key.into(), value);
    }

    /// Make a process visible
    pub fn add_process(&self, record: ProcessRecord) {
        self.processes.write().push(record);
    }

    /// Remove every process with the given name
    pub fn remove_process(&self, name: &str) {
        self.processes.write().retain(|p| p.name != name);
    }
}

impl HostQuery for StaticHost {
    fn read_counter(&self, key: &str) -> Result<MetricValue, SourceUnavailable> {
        self.counters
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| SourceUnavailable::Counter {
                key: key.to_string(),
                reason: "unknown counter".to_string(),
            })
    }

    fn find_process(&self, name: &str) -> Option<ProcessRecord> {
        self.processes
            .read()
            .iter()
            .filter(|p| p.name == name)
            .min_by_key(|p| p.pid)
            .cloned()
    }
}
