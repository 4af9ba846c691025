use crate::metrics::MetricsSnapshot;
use crate::store::{ExecutionStore, SweepReport};
use crate::workflow::WorkflowEngine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Background heartbeat sweep and periodic metrics logging.
pub struct Supervisor {
    store: Arc<ExecutionStore>,
    workflows: Arc<WorkflowEngine>,
    sweep_interval: Duration,
    metrics_interval: Duration,
    missed_limit: u32,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    /// Supervisor over `store`; nothing runs until [`Supervisor::start`].
    pub fn new(
        store: Arc<ExecutionStore>,
        workflows: Arc<WorkflowEngine>,
        sweep_interval: Duration,
        metrics_interval: Duration,
        missed_limit: u32,
    ) -> Self {
        Self {
            store,
            workflows,
            sweep_interval,
            metrics_interval,
            missed_limit,
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the sweep and metrics loops. Calling it again while they run is a no-op.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() || self.shutdown.is_cancelled() {
            return;
        }

        let store = self.store.clone();
        let token = self.shutdown.clone();
        let every = self.sweep_interval;
        let limit = self.missed_limit;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = store.sweep(Utc::now(), limit);
                        if !report.reclaimed.is_empty() {
                            warn!(reclaimed = ?report.reclaimed, "Supervision sweep reclaimed executions");
                        }
                    }
                }
            }
            debug!("Supervision loop stopped");
        }));

        let store = self.store.clone();
        let workflows = self.workflows.clone();
        let token = self.shutdown.clone();
        let every = self.metrics_interval;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let (records, supervision) = store.snapshot();
                        let m = MetricsSnapshot::collect(&records, &supervision, &workflows.statuses());
                        info!(
                            agents_total = m.agents.total,
                            agents_active = m.agents.active,
                            agents_completed = m.agents.completed,
                            agents_failed = m.agents.failed,
                            workflows_running = m.workflows.running,
                            avg_duration_ms = m.performance.avg_duration_ms,
                            healthy = m.supervision.healthy,
                            degraded = m.supervision.degraded,
                            unhealthy = m.supervision.unhealthy,
                            "Orchestrator metrics"
                        );
                    }
                }
            }
            debug!("Metrics loop stopped");
        }));

        info!(
            sweep_interval_ms =
                u64::try_from(self.sweep_interval.as_millis()).unwrap_or(u64::MAX),
            metrics_interval_ms =
                u64::try_from(self.metrics_interval.as_millis()).unwrap_or(u64::MAX),
            "Supervision started"
        );
    }

    /// One deterministic sweep at `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        self.store.sweep(now, self.missed_limit)
    }

    /// Whether the loops are alive.
    pub fn is_running(&self) -> bool {
        !self.handles.lock().is_empty()
    }

    /// Stop both loops and wait for them to exit.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Supervision task ended abnormally");
            }
        }
    }
}
