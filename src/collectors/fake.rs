use crate::collectors::{
    bytes_to_gb, percent, CpuModel, DiskUsage, HostFacts, HostProvider, MemoryReading,
    MountReading,
};
use crate::error::ProbeError;
use std::collections::HashSet;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Scripted host used to drive probes and the controller in tests.
pub struct FakeHost {
    pub cpu_count: usize,
    pub cpu_static_delay: Duration,
    pub cpu_usage_delay: Duration,
    pub memory_delay: Duration,
    pub disk_usage_delay: Duration,
    pub mounts_delay: Duration,
    pub mounts: Vec<MountReading>,
    usage: Mutex<f64>,
    unreadable: Mutex<HashSet<String>>,
}

impl FakeHost {
    pub fn new(cpu_count: usize) -> Self {
        Self {
            cpu_count,
            cpu_static_delay: Duration::ZERO,
            cpu_usage_delay: Duration::ZERO,
            memory_delay: Duration::ZERO,
            disk_usage_delay: Duration::ZERO,
            mounts_delay: Duration::ZERO,
            mounts: vec![
                MountReading {
                    mount: "/".to_string(),
                    total_bytes: 100_000_000_000,
                },
                MountReading {
                    mount: "/data".to_string(),
                    total_bytes: 500_000_000_000,
                },
                MountReading {
                    mount: "/proc".to_string(),
                    total_bytes: 100_000_000_000,
                },
                MountReading {
                    mount: "/boot".to_string(),
                    total_bytes: 500_000_000,
                },
            ],
            usage: Mutex::new(10.0),
            unreadable: Mutex::new(HashSet::new()),
        }
    }

    /// Sets the usage percent every source reports on its next read.
    pub fn set_usage(&self, pct: f64) {
        *self.usage.lock().unwrap() = pct;
    }

    pub fn make_unreadable(&self, mount: &str) {
        self.unreadable.lock().unwrap().insert(mount.to_string());
    }

    fn usage(&self) -> f64 {
        *self.usage.lock().unwrap()
    }

    fn used_of(&self, total_bytes: u64) -> u64 {
        total_bytes / 100 * self.usage().round() as u64
    }
}

impl HostProvider for FakeHost {
    fn host(&self) -> Result<HostFacts, ProbeError> {
        Ok(HostFacts {
            hostname: "fake-host".to_string(),
            platform: "fakeos".to_string(),
            platform_version: "1.0".to_string(),
            kernel_version: "6.1.0".to_string(),
        })
    }

    fn cpus(&self) -> Result<Vec<CpuModel>, ProbeError> {
        thread::sleep(self.cpu_static_delay);
        Ok((0..self.cpu_count)
            .map(|_| CpuModel {
                model: "Fake CPU @ 3.00GHz".to_string(),
                cores: 1,
            })
            .collect())
    }

    fn cpu_usage(&self, window: Duration) -> Result<Vec<f64>, ProbeError> {
        thread::sleep(window + self.cpu_usage_delay);
        Ok(vec![self.usage(); self.cpu_count])
    }

    fn memory(&self) -> Result<MemoryReading, ProbeError> {
        thread::sleep(self.memory_delay);
        let total_bytes = 16_000_000_000_u64;
        Ok(MemoryReading {
            total_bytes,
            used_bytes: self.used_of(total_bytes),
        })
    }

    fn mounts(&self) -> Result<Vec<MountReading>, ProbeError> {
        thread::sleep(self.mounts_delay);
        Ok(self.mounts.clone())
    }

    fn disk_usage(&self, mount: &str) -> Result<DiskUsage, ProbeError> {
        thread::sleep(self.disk_usage_delay);
        if self.unreadable.lock().unwrap().contains(mount) {
            return Err(ProbeError::failed("disk_usage", format!("{mount} unreadable")));
        }
        let total = self
            .mounts
            .iter()
            .find(|m| m.mount == mount)
            .map(|m| m.total_bytes)
            .ok_or_else(|| ProbeError::failed("disk_usage", format!("{mount} not mounted")))?;
        let used = self.used_of(total);
        Ok(DiskUsage {
            used_gb: bytes_to_gb(used),
            usage_percent: percent(used as f64, total as f64),
        })
    }
}
