use crate::collectors::{
    bytes_to_gb, percent, CpuModel, DiskUsage, HostFacts, HostProvider, MemoryReading,
    MountReading,
};
use crate::error::ProbeError;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use sysinfo::{CpuExt, DiskExt, System, SystemExt};
use tracing::debug;

/// [`HostProvider`] backed by `sysinfo`.
///
/// CPU, memory and disk state live in separate `System` values so a CPU
/// sampling window never holds up a memory or disk read.
pub struct SysinfoHost {
    cpu: Mutex<System>,
    memory: Mutex<System>,
    disks: Mutex<System>,
}

impl SysinfoHost {
    pub fn new() -> Self {
        Self {
            cpu: Mutex::new(System::new()),
            memory: Mutex::new(System::new()),
            disks: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoHost {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<'a>(probe: &'static str, m: &'a Mutex<System>) -> Result<MutexGuard<'a, System>, ProbeError> {
    m.lock()
        .map_err(|_| ProbeError::failed(probe, "system handle poisoned by an earlier panic"))
}

impl HostProvider for SysinfoHost {
    fn host(&self) -> Result<HostFacts, ProbeError> {
        let system = System::new();
        let platform = system
            .name()
            .ok_or_else(|| ProbeError::failed("host", "platform name unavailable"))?;
        Ok(HostFacts {
            hostname: system.host_name().unwrap_or_default(),
            platform,
            platform_version: system.os_version().unwrap_or_default(),
            kernel_version: system.kernel_version().unwrap_or_default(),
        })
    }

    fn cpus(&self) -> Result<Vec<CpuModel>, ProbeError> {
        let mut system = lock("cpu_static", &self.cpu)?;
        system.refresh_cpu();
        let cpus: Vec<CpuModel> = system
            .cpus()
            .iter()
            .map(|c| CpuModel {
                model: c.brand().trim().to_string(),
                cores: 1,
            })
            .collect();
        if cpus.is_empty() {
            return Err(ProbeError::failed("cpu_static", "no logical CPUs reported"));
        }
        Ok(cpus)
    }

    fn cpu_usage(&self, window: Duration) -> Result<Vec<f64>, ProbeError> {
        // Usage is the delta between two refreshes; sysinfo needs a minimum
        // gap between them to produce a meaningful value.
        let window = window.max(System::MINIMUM_CPU_UPDATE_INTERVAL);
        lock("cpu_usage", &self.cpu)?.refresh_cpu();
        thread::sleep(window);
        let mut system = lock("cpu_usage", &self.cpu)?;
        system.refresh_cpu();
        Ok(system
            .cpus()
            .iter()
            .map(|c| f64::from(c.cpu_usage()).clamp(0.0, 100.0))
            .collect())
    }

    fn memory(&self) -> Result<MemoryReading, ProbeError> {
        let mut system = lock("memory", &self.memory)?;
        system.refresh_memory();
        let total_bytes = system.total_memory();
        if total_bytes == 0 {
            return Err(ProbeError::failed("memory", "total memory reported as zero"));
        }
        Ok(MemoryReading {
            total_bytes,
            used_bytes: system.used_memory(),
        })
    }

    fn mounts(&self) -> Result<Vec<MountReading>, ProbeError> {
        let mut system = lock("disk_list", &self.disks)?;
        system.refresh_disks_list();
        let mounts: Vec<MountReading> = system
            .disks()
            .iter()
            .map(|d| MountReading {
                mount: d.mount_point().to_string_lossy().to_string(),
                total_bytes: d.total_space(),
            })
            .collect();
        debug!(count = mounts.len(), "enumerated mounted filesystems");
        Ok(mounts)
    }

    fn disk_usage(&self, mount: &str) -> Result<DiskUsage, ProbeError> {
        let mut system = lock("disk_usage", &self.disks)?;
        let disk = system
            .disks_mut()
            .iter_mut()
            .find(|d| d.mount_point().to_string_lossy() == mount)
            .ok_or_else(|| ProbeError::failed("disk_usage", format!("{mount} is no longer mounted")))?;
        if !disk.refresh() {
            return Err(ProbeError::failed(
                "disk_usage",
                format!("{mount} could not be read"),
            ));
        }
        let total = disk.total_space();
        let used = total.saturating_sub(disk.available_space());
        Ok(DiskUsage {
            used_gb: bytes_to_gb(used),
            usage_percent: percent(used as f64, total as f64),
        })
    }
}
