use crate::error::ProbeError;
use crate::state::Snapshot;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at_unix: i64,
    pub agent_cpu_usage_percent: GaugeVec,
    pub agent_cpu_count: Gauge,
    pub agent_memory_used_gb: Gauge,
    pub agent_memory_total_gb: Gauge,
    pub agent_memory_usage_percent: Gauge,
    pub agent_disk_used_gb: GaugeVec,
    pub agent_disk_total_gb: GaugeVec,
    pub agent_disk_usage_percent: GaugeVec,
    pub agent_disk_count: Gauge,
    pub agent_gpu_utilization_percent: GaugeVec,
    pub agent_gpu_memory_used_gb: GaugeVec,
    pub agent_gpu_memory_total_gb: GaugeVec,
    pub agent_gpu_memory_usage_percent: GaugeVec,
    pub agent_gpu_count: Gauge,
    pub agent_uptime_seconds: Gauge,
    pub agent_scrape_count_total: Counter,
    pub agent_cycles_total: Counter,
    pub agent_cycle_duration_seconds: Gauge,
    pub agent_collect_errors_total: CounterVec,
    pub agent_reports_total: CounterVec,
    pub agent_last_collect_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let agent_cpu_usage_percent = GaugeVec::new(
            opts!("agent_cpu_usage_percent", "Usage of a logical CPU in percent (0..100)"),
            &["cpu"],
        )?;
        let agent_cpu_count =
            Gauge::with_opts(opts!("agent_cpu_count", "Number of enumerated logical CPUs"))?;
        let agent_memory_used_gb =
            Gauge::with_opts(opts!("agent_memory_used_gb", "Used memory in GB"))?;
        let agent_memory_total_gb =
            Gauge::with_opts(opts!("agent_memory_total_gb", "Total memory in GB"))?;
        let agent_memory_usage_percent =
            Gauge::with_opts(opts!("agent_memory_usage_percent", "Memory usage in percent"))?;
        let agent_disk_used_gb = GaugeVec::new(
            opts!("agent_disk_used_gb", "Disk used GB by mount"),
            &["mount"],
        )?;
        let agent_disk_total_gb = GaugeVec::new(
            opts!("agent_disk_total_gb", "Disk total GB by mount"),
            &["mount"],
        )?;
        let agent_disk_usage_percent = GaugeVec::new(
            opts!("agent_disk_usage_percent", "Disk usage in percent by mount"),
            &["mount"],
        )?;
        let agent_disk_count =
            Gauge::with_opts(opts!("agent_disk_count", "Number of reported disks"))?;
        let agent_gpu_utilization_percent = GaugeVec::new(
            opts!("agent_gpu_utilization_percent", "GPU utilization in percent"),
            &["gpu", "model"],
        )?;
        let agent_gpu_memory_used_gb = GaugeVec::new(
            opts!("agent_gpu_memory_used_gb", "GPU memory used in GB"),
            &["gpu", "model"],
        )?;
        let agent_gpu_memory_total_gb = GaugeVec::new(
            opts!("agent_gpu_memory_total_gb", "GPU memory total in GB"),
            &["gpu", "model"],
        )?;
        let agent_gpu_memory_usage_percent = GaugeVec::new(
            opts!("agent_gpu_memory_usage_percent", "GPU memory usage in percent"),
            &["gpu", "model"],
        )?;
        let agent_gpu_count = Gauge::with_opts(opts!("agent_gpu_count", "Number of GPUs"))?;
        let agent_uptime_seconds =
            Gauge::with_opts(opts!("agent_uptime_seconds", "Agent uptime in seconds"))?;
        let agent_scrape_count_total = Counter::with_opts(opts!(
            "agent_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let agent_cycles_total = Counter::with_opts(opts!(
            "agent_cycles_total",
            "Completed dynamic collection cycles"
        ))?;
        let agent_cycle_duration_seconds = Gauge::with_opts(opts!(
            "agent_cycle_duration_seconds",
            "Wall-clock duration of the last dynamic collection cycle"
        ))?;
        let agent_collect_errors_total = CounterVec::new(
            opts!(
                "agent_collect_errors_total",
                "Probe errors by probe and kind (timeout, failure, panic)"
            ),
            &["probe", "kind"],
        )?;
        let agent_reports_total = CounterVec::new(
            opts!("agent_reports_total", "Report attempts by result"),
            &["result"],
        )?;
        let agent_last_collect_timestamp_seconds = Gauge::with_opts(opts!(
            "agent_last_collect_timestamp_seconds",
            "Unix timestamp of the last collection"
        ))?;

        register(&registry, &agent_cpu_usage_percent)?;
        register(&registry, &agent_cpu_count)?;
        register(&registry, &agent_memory_used_gb)?;
        register(&registry, &agent_memory_total_gb)?;
        register(&registry, &agent_memory_usage_percent)?;
        register(&registry, &agent_disk_used_gb)?;
        register(&registry, &agent_disk_total_gb)?;
        register(&registry, &agent_disk_usage_percent)?;
        register(&registry, &agent_disk_count)?;
        register(&registry, &agent_gpu_utilization_percent)?;
        register(&registry, &agent_gpu_memory_used_gb)?;
        register(&registry, &agent_gpu_memory_total_gb)?;
        register(&registry, &agent_gpu_memory_usage_percent)?;
        register(&registry, &agent_gpu_count)?;
        register(&registry, &agent_uptime_seconds)?;
        register(&registry, &agent_scrape_count_total)?;
        register(&registry, &agent_cycles_total)?;
        register(&registry, &agent_cycle_duration_seconds)?;
        register(&registry, &agent_collect_errors_total)?;
        register(&registry, &agent_reports_total)?;
        register(&registry, &agent_last_collect_timestamp_seconds)?;

        Ok(Arc::new(Self {
            registry,
            started_at_unix: now_unix(),
            agent_cpu_usage_percent,
            agent_cpu_count,
            agent_memory_used_gb,
            agent_memory_total_gb,
            agent_memory_usage_percent,
            agent_disk_used_gb,
            agent_disk_total_gb,
            agent_disk_usage_percent,
            agent_disk_count,
            agent_gpu_utilization_percent,
            agent_gpu_memory_used_gb,
            agent_gpu_memory_total_gb,
            agent_gpu_memory_usage_percent,
            agent_gpu_count,
            agent_uptime_seconds,
            agent_scrape_count_total,
            agent_cycles_total,
            agent_cycle_duration_seconds,
            agent_collect_errors_total,
            agent_reports_total,
            agent_last_collect_timestamp_seconds,
        }))
    }

    pub fn update_from_snapshot(&self, snapshot: &Snapshot) {
        self.agent_cpu_usage_percent.reset();
        self.agent_disk_used_gb.reset();
        self.agent_disk_total_gb.reset();
        self.agent_disk_usage_percent.reset();
        self.agent_gpu_utilization_percent.reset();
        self.agent_gpu_memory_used_gb.reset();
        self.agent_gpu_memory_total_gb.reset();
        self.agent_gpu_memory_usage_percent.reset();

        for cpu in &snapshot.cpus {
            self.agent_cpu_usage_percent
                .with_label_values(&[&cpu.id.to_string()])
                .set(cpu.usage_percent);
        }
        self.agent_cpu_count.set(snapshot.cpus.len() as f64);

        self.agent_memory_used_gb.set(snapshot.memory.used_gb);
        self.agent_memory_total_gb.set(snapshot.memory.total_gb);
        self.agent_memory_usage_percent
            .set(snapshot.memory.usage_percent);

        for d in &snapshot.disks {
            self.agent_disk_used_gb
                .with_label_values(&[&d.mount])
                .set(d.used_gb);
            self.agent_disk_total_gb
                .with_label_values(&[&d.mount])
                .set(d.total_gb);
            self.agent_disk_usage_percent
                .with_label_values(&[&d.mount])
                .set(d.usage_percent);
        }
        self.agent_disk_count.set(snapshot.disks.len() as f64);

        for g in &snapshot.gpus {
            let id = g.id.to_string();
            let labels: [&str; 2] = [&id, &g.model];
            self.agent_gpu_utilization_percent
                .with_label_values(&labels)
                .set(g.usage_percent);
            self.agent_gpu_memory_used_gb
                .with_label_values(&labels)
                .set(g.memory_used_gb);
            self.agent_gpu_memory_total_gb
                .with_label_values(&labels)
                .set(g.memory_total_gb);
            self.agent_gpu_memory_usage_percent
                .with_label_values(&labels)
                .set(g.memory_usage_percent);
        }
        self.agent_gpu_count.set(snapshot.gpus.len() as f64);

        self.agent_last_collect_timestamp_seconds
            .set(snapshot.ts as f64);
        let uptime = now_unix().saturating_sub(self.started_at_unix) as f64;
        self.agent_uptime_seconds.set(uptime);
    }

    pub fn observe_cycle(&self, elapsed: Duration) {
        self.agent_cycles_total.inc();
        self.agent_cycle_duration_seconds.set(elapsed.as_secs_f64());
    }

    pub fn inc_scrape_count(&self) {
        self.agent_scrape_count_total.inc();
    }

    pub fn inc_collect_error(&self, err: &ProbeError) {
        self.agent_collect_errors_total
            .with_label_values(&[err.probe(), err.kind()])
            .inc();
    }

    pub fn inc_report(&self, result: &str) {
        self.agent_reports_total.with_label_values(&[result]).inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{DiskInfo, GpuInfo};

    #[test]
    fn exports_snapshot_gauges_and_error_counters() {
        let metrics = Metrics::new().expect("metrics init");
        let snapshot = Snapshot {
            disks: vec![DiskInfo {
                mount: "/".to_string(),
                total_gb: 100.0,
                used_gb: 40.0,
                usage_percent: 40.0,
            }],
            gpus: vec![GpuInfo {
                id: 0,
                model: "RTX X".to_string(),
                usage_percent: 10.0,
                memory_total_gb: 8.0,
                memory_used_gb: 4.0,
                memory_usage_percent: 50.0,
            }],
            ts: 1_700_000_000,
            ..Snapshot::default()
        };
        metrics.update_from_snapshot(&snapshot);
        metrics.inc_collect_error(&ProbeError::Timeout {
            probe: "cpu_usage",
            after: Duration::from_secs(5),
        });
        metrics.observe_cycle(Duration::from_millis(520));

        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains("agent_disk_usage_percent{mount=\"/\"} 40"));
        assert!(text.contains("agent_gpu_memory_usage_percent{gpu=\"0\",model=\"RTX X\"} 50"));
        assert!(text.contains("agent_collect_errors_total{kind=\"timeout\",probe=\"cpu_usage\"} 1"));
        assert!(text.contains("agent_cycles_total 1"));
    }
}
