//! Individual data-source probes.
//!
//! Each probe queries one source through the bounded runner and, only when
//! the source answered in time, writes its field group into the store. A
//! failed or late probe leaves the store untouched.

use crate::collectors::gpu::GpuTool;
use crate::collectors::identity::hardware_serial;
use crate::collectors::{bytes_to_gb, percent, select_disks, DiskUsage, HostProvider};
use crate::error::ProbeError;
use crate::runner::{run_blocking_bounded, run_bounded, run_isolated_blocking, Abandon};
use crate::state::{CpuInfo, OsInfo, SnapshotStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeTimings {
    /// Deadline shared by every bounded probe.
    pub collect_timeout: Duration,
    pub cpu_sample_window: Duration,
    pub smbios_timeout: Duration,
}

#[derive(Clone)]
pub struct Probes {
    store: SnapshotStore,
    host: Arc<dyn HostProvider>,
    gpu: Option<GpuTool>,
    timings: ProbeTimings,
}

impl Probes {
    pub fn new(store: SnapshotStore, host: Arc<dyn HostProvider>, timings: ProbeTimings) -> Self {
        Self {
            store,
            host,
            gpu: None,
            timings,
        }
    }

    pub fn set_gpu_tool(&mut self, tool: Option<GpuTool>) {
        match &tool {
            Some(t) => debug!(path = %t.path().display(), "GPU query tool enabled"),
            None => debug!("GPU collection disabled"),
        }
        self.gpu = tool;
    }

    /// Hostname and OS descriptor, including the optional hardware serial.
    /// The descriptor read has no deadline; only the serial lookup is bounded.
    pub async fn host_descriptor(&self) -> Result<(), ProbeError> {
        let host = self.host.clone();
        let facts = run_isolated_blocking("host", move || host.host()).await;
        let smbios = run_bounded(
            "smbios",
            self.timings.smbios_timeout,
            Abandon::Abort,
            hardware_serial(),
        )
        .await
        .map_err(|err| debug!(error = %err, "hardware serial unavailable"))
        .ok();

        let (hostname, name, version, result) = match facts {
            Ok(f) => {
                let name = format!("{} {}", f.platform, f.platform_version).trim().to_string();
                (f.hostname, name, f.kernel_version, Ok(()))
            }
            Err(err) => (String::new(), String::new(), String::new(), Err(err)),
        };
        self.store
            .set_host(
                hostname,
                OsInfo {
                    name,
                    version,
                    architecture: std::env::consts::ARCH.to_string(),
                    smbios,
                },
            )
            .await;
        result
    }

    pub async fn cpu_static(&self) -> Result<(), ProbeError> {
        let host = self.host.clone();
        let models = run_blocking_bounded("cpu_static", self.timings.collect_timeout, move || {
            host.cpus()
        })
        .await?;
        let cpus = models
            .into_iter()
            .enumerate()
            .map(|(id, m)| CpuInfo {
                id,
                model: m.model,
                cores: m.cores,
                usage_percent: 0.0,
            })
            .collect();
        self.store.set_cpus(cpus).await;
        Ok(())
    }

    pub async fn cpu_usage(&self) -> Result<(), ProbeError> {
        let host = self.host.clone();
        let window = self.timings.cpu_sample_window;
        let usage = run_blocking_bounded("cpu_usage", self.timings.collect_timeout, move || {
            host.cpu_usage(window)
        })
        .await?;
        self.store.apply_cpu_usage(&usage).await;
        Ok(())
    }

    pub async fn memory_total(&self) -> Result<(), ProbeError> {
        let host = self.host.clone();
        let reading = run_isolated_blocking("memory", move || host.memory()).await?;
        self.store
            .set_memory_total(bytes_to_gb(reading.total_bytes))
            .await;
        Ok(())
    }

    pub async fn memory_usage(&self) -> Result<(), ProbeError> {
        let host = self.host.clone();
        let reading = run_isolated_blocking("memory", move || host.memory()).await?;
        self.store
            .apply_memory_usage(
                bytes_to_gb(reading.used_bytes),
                percent(reading.used_bytes as f64, reading.total_bytes as f64),
            )
            .await;
        Ok(())
    }

    pub async fn disk_list(&self) -> Result<(), ProbeError> {
        let host = self.host.clone();
        let mounts = run_blocking_bounded("disk_list", self.timings.collect_timeout, move || {
            host.mounts()
        })
        .await?;
        self.store.set_disks(select_disks(mounts)).await;
        Ok(())
    }

    /// Refreshes every enumerated mount. A mount that cannot be read keeps
    /// its previous values; the others are still updated.
    pub async fn disk_usage(&self) -> Result<(), ProbeError> {
        let mounts = self.store.disk_mounts().await;
        if mounts.is_empty() {
            return Ok(());
        }
        let total = mounts.len();
        let host = self.host.clone();
        let readings = run_isolated_blocking("disk_usage", move || {
            let mut readings: Vec<(String, DiskUsage)> = Vec::with_capacity(mounts.len());
            for mount in mounts {
                match host.disk_usage(&mount) {
                    Ok(usage) => readings.push((mount, usage)),
                    Err(err) => warn!(mount = %mount, error = %err, "disk usage unavailable, keeping previous values"),
                }
            }
            Ok(readings)
        })
        .await?;

        let failed = total - readings.len();
        self.store.apply_disk_usage(&readings).await;
        if failed > 0 {
            return Err(ProbeError::failed(
                "disk_usage",
                format!("{failed} of {total} mounts unreadable"),
            ));
        }
        Ok(())
    }

    /// Runs the GPU tool. With `initialize` the GPU list is rebuilt from the
    /// report; otherwise only existing entries are refreshed.
    pub async fn gpu(&self, initialize: bool) -> Result<(), ProbeError> {
        let Some(tool) = self.gpu.clone() else {
            return Ok(());
        };
        let rows = run_bounded(
            "gpu",
            self.timings.collect_timeout,
            Abandon::Abort,
            async move { tool.query().await },
        )
        .await?;
        self.store.apply_gpu_rows(&rows, initialize).await;
        Ok(())
    }
}
