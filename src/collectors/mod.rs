pub mod gpu;
pub mod identity;
pub mod system;

#[cfg(test)]
pub mod fake;

use crate::error::ProbeError;
use crate::state::DiskInfo;
use std::time::Duration;

/// Mount points under these prefixes are pseudo or system filesystems.
pub const EXCLUDED_MOUNT_PREFIXES: &[&str] = &["/sys", "/proc", "/dev", "/run", "/snap", "/System"];

/// Volumes smaller than this are not reported.
pub const MIN_DISK_BYTES: u64 = 1_000_000_000;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostFacts {
    pub hostname: String,
    pub platform: String,
    pub platform_version: String,
    pub kernel_version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CpuModel {
    pub model: String,
    pub cores: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryReading {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MountReading {
    pub mount: String,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiskUsage {
    pub used_gb: f64,
    pub usage_percent: f64,
}

/// Source of OS and hardware facts. Calls may block; the probes run them on
/// the blocking pool.
pub trait HostProvider: Send + Sync + 'static {
    fn host(&self) -> Result<HostFacts, ProbeError>;
    /// One entry per logical CPU, in OS order.
    fn cpus(&self) -> Result<Vec<CpuModel>, ProbeError>;
    /// Per-logical-CPU usage in percent, measured across `window`.
    fn cpu_usage(&self, window: Duration) -> Result<Vec<f64>, ProbeError>;
    fn memory(&self) -> Result<MemoryReading, ProbeError>;
    fn mounts(&self) -> Result<Vec<MountReading>, ProbeError>;
    fn disk_usage(&self, mount: &str) -> Result<DiskUsage, ProbeError>;
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / 1e9
}

pub fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

/// Keeps real volumes of at least [`MIN_DISK_BYTES`] outside the excluded
/// prefixes, recording mount and capacity only.
pub fn select_disks(mounts: Vec<MountReading>) -> Vec<DiskInfo> {
    mounts
        .into_iter()
        .filter(|m| m.total_bytes >= MIN_DISK_BYTES)
        .filter(|m| {
            !EXCLUDED_MOUNT_PREFIXES
                .iter()
                .any(|prefix| m.mount.starts_with(prefix))
        })
        .map(|m| DiskInfo {
            mount: m.mount,
            total_gb: bytes_to_gb(m.total_bytes),
            used_gb: 0.0,
            usage_percent: 0.0,
        })
        .collect()
}
