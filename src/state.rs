use crate::collectors::gpu::GpuRow;
use crate::collectors::DiskUsage;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub id: String,
    pub hostname: String,
    pub os: OsInfo,
    pub cpus: Vec<CpuInfo>,
    pub memory: MemoryInfo,
    pub disks: Vec<DiskInfo>,
    pub gpus: Vec<GpuInfo>,
    #[serde(rename = "timestamp")]
    pub ts: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OsInfo {
    pub name: String,
    pub version: String,
    pub architecture: String,
    /// Hardware serial or system UUID, when the platform exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smbios: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CpuInfo {
    pub id: usize,
    pub model: String,
    pub cores: u32,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryInfo {
    pub total_gb: f64,
    pub used_gb: f64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiskInfo {
    pub mount: String,
    pub total_gb: f64,
    pub used_gb: f64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GpuInfo {
    pub id: usize,
    pub model: String,
    pub usage_percent: f64,
    pub memory_total_gb: f64,
    pub memory_used_gb: f64,
    pub memory_usage_percent: f64,
}

/// Shared handle to the one snapshot of this process.
///
/// Each method takes the lock for exactly one field group, so a reader never
/// sees a half-written group but may see one group from the current cycle
/// next to a sibling from the previous one.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    inner: Arc<RwLock<Snapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_identity(&self, id: String) {
        self.inner.write().await.id = id;
    }

    pub async fn set_host(&self, hostname: String, os: OsInfo) {
        let mut guard = self.inner.write().await;
        guard.hostname = hostname;
        guard.os = os;
    }

    pub async fn set_cpus(&self, cpus: Vec<CpuInfo>) {
        self.inner.write().await.cpus = cpus;
    }

    /// Writes per-CPU usage by position. Samples past the enumerated CPU
    /// count are dropped; CPUs without a sample keep their old value.
    pub async fn apply_cpu_usage(&self, usage: &[f64]) {
        let mut guard = self.inner.write().await;
        for (cpu, pct) in guard.cpus.iter_mut().zip(usage) {
            cpu.usage_percent = *pct;
        }
    }

    pub async fn set_memory_total(&self, total_gb: f64) {
        self.inner.write().await.memory.total_gb = total_gb;
    }

    pub async fn apply_memory_usage(&self, used_gb: f64, usage_percent: f64) {
        let mut guard = self.inner.write().await;
        guard.memory.used_gb = used_gb;
        guard.memory.usage_percent = usage_percent;
    }

    pub async fn set_disks(&self, disks: Vec<DiskInfo>) {
        self.inner.write().await.disks = disks;
    }

    pub async fn disk_mounts(&self) -> Vec<String> {
        let guard = self.inner.read().await;
        guard.disks.iter().map(|d| d.mount.clone()).collect()
    }

    /// Applies fresh usage to the mounts that answered. Mounts missing from
    /// `readings` keep their previous used/percent values.
    pub async fn apply_disk_usage(&self, readings: &[(String, DiskUsage)]) {
        let mut guard = self.inner.write().await;
        for disk in guard.disks.iter_mut() {
            if let Some((_, usage)) = readings.iter().find(|(mount, _)| *mount == disk.mount) {
                disk.used_gb = usage.used_gb;
                disk.usage_percent = usage.usage_percent;
            }
        }
    }

    /// Applies one GPU tool report. The initializing call rebuilds the list
    /// from the rows; any later call only updates existing positions.
    pub async fn apply_gpu_rows(&self, rows: &[GpuRow], initialize: bool) {
        let mut guard = self.inner.write().await;
        if initialize {
            guard.gpus = rows
                .iter()
                .enumerate()
                .map(|(id, row)| GpuInfo {
                    id,
                    model: row.model.clone(),
                    memory_total_gb: row.memory_total_gb,
                    ..GpuInfo::default()
                })
                .collect();
        }
        for (gpu, row) in guard.gpus.iter_mut().zip(rows) {
            gpu.usage_percent = row.usage_percent;
            gpu.memory_used_gb = row.memory_used_gb;
            gpu.memory_usage_percent = row.memory_usage_percent;
        }
    }

    pub async fn stamp(&self, now_unix: i64) {
        self.inner.write().await.ts = now_unix;
    }

    /// Deep copy for serialization; the lock is released before returning.
    pub async fn export(&self) -> Snapshot {
        self.inner.read().await.clone()
    }
}
