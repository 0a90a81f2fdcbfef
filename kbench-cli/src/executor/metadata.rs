//! System Metadata Collection
//!
//! Collects host information for report metadata.
//!
//! ## Collected Data
//!
//! - **Identity**: kernel version banner (`uname -v`), stored as the
//!   top-level `uname` field of every result file
//! - **Host**: node name, OS name and release, architecture
//! - **CPU**: available core count
//! - **Timestamp**: UTC time of report generation

use chrono::Utc;
use kbench_report::{HostInfo, ReportMeta};

/// Fields of `uname(2)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Uname {
    pub sysname: String,
    pub nodename: String,
    pub release: String,
    pub version: String,
    pub machine: String,
}

/// Query `uname(2)`; `None` if the call fails
pub fn uname() -> Option<Uname> {
    let mut buf: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut buf) } != 0 {
        return None;
    }
    Some(Uname {
        sysname: c_field(&buf.sysname),
        nodename: c_field(&buf.nodename),
        release: c_field(&buf.release),
        version: c_field(&buf.version),
        machine: c_field(&buf.machine),
    })
}

fn c_field(raw: &[libc::c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).trim().to_string()
}

/// Host identity string recorded with every result set
pub fn host_identity() -> String {
    uname()
        .map(|u| u.version)
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Build report metadata including host info
pub fn build_report_meta(config_name: &str) -> ReportMeta {
    let uts = uname().unwrap_or_default();

    let host = HostInfo {
        hostname: non_empty(uts.nodename),
        os: std::env::consts::OS.to_string(),
        os_release: non_empty(uts.release),
        arch: std::env::consts::ARCH.to_string(),
        cpu_cores: num_cpus(),
    };

    ReportMeta {
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        config_name: config_name.to_string(),
        host,
    }
}

fn non_empty(value: String) -> String {
    if value.is_empty() {
        "Unknown".to_string()
    } else {
        value
    }
}

/// Get number of available CPU cores
fn num_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uname() {
        let uts = uname().unwrap();
        assert!(!uts.sysname.is_empty());
        assert!(!uts.version.is_empty());
        assert_eq!(host_identity(), uts.version);
    }

    #[test]
    fn test_report_meta() {
        let meta = build_report_meta("default");
        assert_eq!(meta.config_name, "default");
        assert_eq!(meta.host.os, std::env::consts::OS);
        assert!(meta.host.cpu_cores >= 1);
    }
}
