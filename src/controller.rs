use crate::collectors::gpu::GpuTool;
use crate::collectors::identity::resolve_identity;
use crate::error::ProbeError;
use crate::metrics::Metrics;
use crate::probes::Probes;
use crate::report::Reporter;
use crate::state::{Snapshot, SnapshotStore};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    StaticCollection,
    Idle,
    DynamicCollection,
    Terminated,
}

/// How the GPU query tool is found during the static phase.
#[derive(Debug, Clone)]
pub enum GpuDiscovery {
    SearchPath,
    Fixed(Option<GpuTool>),
}

pub struct ControllerOptions {
    pub interval: Duration,
    pub custom_id: Option<String>,
    pub gpu: GpuDiscovery,
    pub print_snapshot: bool,
}

pub struct Controller {
    probes: Probes,
    store: SnapshotStore,
    metrics: Arc<Metrics>,
    reporter: Option<Reporter>,
    options: ControllerOptions,
    phase: Phase,
}

impl Controller {
    pub fn new(
        probes: Probes,
        store: SnapshotStore,
        metrics: Arc<Metrics>,
        reporter: Option<Reporter>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            probes,
            store,
            metrics,
            reporter,
            options,
            phase: Phase::Uninitialized,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// One-time collection of facts that do not change while the process
    /// runs. Every step is individually bounded, so the phase always ends.
    pub async fn run_static_phase(&mut self) {
        self.transition(Phase::StaticCollection);

        let id = resolve_identity(self.options.custom_id.as_deref());
        info!(id = %id, "agent identity assigned");
        self.store.set_identity(id).await;

        let outcome = self.probes.host_descriptor().await;
        self.settle(outcome);
        let outcome = self.probes.cpu_static().await;
        self.settle(outcome);
        let outcome = self.probes.memory_total().await;
        self.settle(outcome);
        let outcome = self.probes.disk_list().await;
        self.settle(outcome);

        let tool = match &self.options.gpu {
            GpuDiscovery::SearchPath => GpuTool::discover(),
            GpuDiscovery::Fixed(tool) => tool.clone(),
        };
        if tool.is_none() {
            info!("GPU query tool not found, GPU collection disabled");
        }
        self.probes.set_gpu_tool(tool);
        let outcome = self.probes.gpu(true).await;
        self.settle(outcome);

        self.transition(Phase::Idle);
    }

    /// Runs the four dynamic probes concurrently, then stamps the snapshot.
    /// The cycle lasts as long as its slowest probe, each of which is bounded
    /// on its own.
    pub async fn run_cycle(&mut self) -> Snapshot {
        self.transition(Phase::DynamicCollection);
        let started = Instant::now();

        let (cpu, memory, disks, gpu) = tokio::join!(
            self.probes.cpu_usage(),
            self.probes.memory_usage(),
            self.probes.disk_usage(),
            self.probes.gpu(false),
        );
        for outcome in [cpu, memory, disks, gpu] {
            self.settle(outcome);
        }

        self.store.stamp(now_unix()).await;
        let snapshot = self.store.export().await;
        let elapsed = started.elapsed();
        self.metrics.observe_cycle(elapsed);
        debug!(
            duration_ms = elapsed.as_millis() as u64,
            timestamp = snapshot.ts,
            "collection cycle finished"
        );

        self.transition(Phase::Idle);
        snapshot
    }

    /// Prints the snapshot and hands it to a detached report task.
    pub fn publish(&self, snapshot: Snapshot) {
        self.metrics.update_from_snapshot(&snapshot);
        if self.options.print_snapshot {
            match serde_json::to_string_pretty(&snapshot) {
                Ok(text) => println!("{text}"),
                Err(err) => warn!(error = %err, "failed to render snapshot"),
            }
        }
        if let Some(reporter) = &self.reporter {
            reporter.spawn(snapshot);
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("initializing system info");
        self.run_static_phase().await;

        let snapshot = self.run_cycle().await;
        self.publish(snapshot);

        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick completes immediately; the first cycle already ran
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown requested, stopping collection loop");
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = self.run_cycle().await;
                    self.publish(snapshot);
                }
            }
        }

        self.transition(Phase::Terminated);
    }

    fn settle(&self, outcome: Result<(), ProbeError>) {
        let Err(err) = outcome else {
            return;
        };
        self.metrics.inc_collect_error(&err);
        // timeouts were already reported by the runner
        if !err.is_timeout() {
            warn!(probe = err.probe(), error = %err, "probe failed, keeping previous values");
        }
    }

    fn transition(&mut self, next: Phase) {
        debug!(from = ?self.phase, to = ?next, "collection phase change");
        self.phase = next;
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
