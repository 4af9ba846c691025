//! Shared storage for execution records and their supervision entries.
//!
//! Every mutation happens under one write lock, and every terminal transition checks the
//! current status first: whichever transition reaches a terminal state first wins, and
//! later ones return `false` without touching the record.

use crate::types::{
    AgentStatus, ExecutionRecord, HealthStatus, StructuredResult, SupervisionMetrics,
};
use chrono::{DateTime, Utc};
use oliver_core::{OliverError, OliverResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Error text recorded on executions reclaimed by the supervision sweep.
pub const MISSED_HEARTBEATS: &str = "missed heartbeats";

struct Entry {
    record: ExecutionRecord,
    supervision: SupervisionMetrics,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Insertion order, for stable listings.
    order: Vec<String>,
}

/// Result of one supervision sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Running executions inspected.
    pub checked: usize,
    /// Executions that missed a heartbeat this sweep but were not reclaimed.
    pub degraded: Vec<String>,
    /// Executions force-failed this sweep.
    pub reclaimed: Vec<String>,
}

/// Execution records with their supervision entries and cancellation tokens.
pub struct ExecutionStore {
    inner: RwLock<Inner>,
}

impl ExecutionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Insert a `starting` record unless the admission ceiling is reached.
    ///
    /// The count and the insert happen under the same lock.
    pub fn admit(
        &self,
        record: ExecutionRecord,
        heartbeat_interval_secs: f64,
        limit: usize,
        cancel: CancellationToken,
    ) -> OliverResult<()> {
        let mut inner = self.inner.write();
        let active = inner
            .entries
            .values()
            .filter(|e| e.record.status.is_active())
            .count();
        if active >= limit {
            return Err(OliverError::CapacityExceeded { active, limit });
        }
        if inner.entries.contains_key(&record.id) {
            return Err(OliverError::Orchestrator(format!(
                "duplicate execution id {}",
                record.id
            )));
        }

        let id = record.id.clone();
        let supervision = SupervisionMetrics::new(id.clone(), heartbeat_interval_secs);
        inner.entries.insert(
            id.clone(),
            Entry {
                record,
                supervision,
                cancel,
            },
        );
        inner.order.push(id);
        Ok(())
    }

    /// `starting` → `running`, refreshing the heartbeat.
    pub fn mark_running(&self, id: &str) -> bool {
        self.update(id, |entry| {
            if entry.record.status != AgentStatus::Starting {
                return false;
            }
            entry.record.status = AgentStatus::Running;
            entry.supervision.status = AgentStatus::Running;
            entry.supervision.last_heartbeat = Utc::now();
            true
        })
    }

    /// Record which backend serves the execution.
    pub fn set_provider(&self, id: &str, provider: String) {
        self.update(id, |entry| {
            entry.record.model_provider_used = Some(provider);
            true
        });
    }

    /// Refresh the heartbeat of a non-terminal execution.
    pub fn heartbeat(&self, id: &str) -> bool {
        self.update(id, |entry| {
            if entry.record.status.is_terminal() {
                return false;
            }
            entry.supervision.last_heartbeat = Utc::now();
            true
        })
    }

    /// Any non-terminal state → `completed` with `result`.
    pub fn complete(&self, id: &str, result: StructuredResult) -> bool {
        self.update(id, |entry| {
            if entry.record.status.is_terminal() {
                return false;
            }
            let now = Utc::now();
            finish(&mut entry.record, AgentStatus::Completed, now);
            entry.record.result = Some(result);
            entry.supervision.status = AgentStatus::Completed;
            entry.supervision.last_heartbeat = now;
            entry.supervision.tasks_completed += 1;
            true
        })
    }

    /// Any non-terminal state → `failed` with `error`; marks the entry unhealthy.
    pub fn fail(&self, id: &str, error: impl Into<String>) -> bool {
        let error = error.into();
        self.update(id, |entry| {
            if entry.record.status.is_terminal() {
                return false;
            }
            fail_entry(entry, error, Utc::now());
            true
        })
    }

    /// `running` → `stopped`. Records in any other state are left alone.
    pub fn stop(&self, id: &str, reason: &str) -> bool {
        self.update(id, |entry| stop_entry(entry, reason, Utc::now()))
    }

    /// Stop every running execution and cancel its in-flight call.
    pub fn stop_all_running(&self, reason: &str) -> Vec<String> {
        let now = Utc::now();
        let mut inner = self.inner.write();
        let mut stopped = Vec::new();
        for (id, entry) in &mut inner.entries {
            if stop_entry(entry, reason, now) {
                entry.cancel.cancel();
                stopped.push(id.clone());
            }
        }
        stopped
    }

    /// Check every running execution against its heartbeat deadline at `now`.
    ///
    /// A heartbeat older than twice the interval counts as one miss and degrades the
    /// entry; more than `missed_limit` misses force-fail the execution and cancel its call.
    pub fn sweep(&self, now: DateTime<Utc>, missed_limit: u32) -> SweepReport {
        let mut report = SweepReport::default();
        let mut inner = self.inner.write();
        for (id, entry) in &mut inner.entries {
            if entry.record.status != AgentStatus::Running {
                continue;
            }
            report.checked += 1;

            let elapsed_ms = (now - entry.supervision.last_heartbeat).num_milliseconds();
            let deadline_ms = entry.supervision.heartbeat_interval_secs * 2.0 * 1000.0;
            if (elapsed_ms as f64) <= deadline_ms {
                continue;
            }

            entry.supervision.missed_heartbeats += 1;
            entry.supervision.health_status = HealthStatus::Degraded;
            if entry.supervision.missed_heartbeats > missed_limit {
                warn!(
                    execution_id = %id,
                    missed = entry.supervision.missed_heartbeats,
                    "Reclaiming execution after missed heartbeats"
                );
                fail_entry(entry, MISSED_HEARTBEATS.to_string(), now);
                entry.cancel.cancel();
                report.reclaimed.push(id.clone());
            } else {
                debug!(
                    execution_id = %id,
                    missed = entry.supervision.missed_heartbeats,
                    "Execution missed a heartbeat"
                );
                report.degraded.push(id.clone());
            }
        }
        report
    }

    /// Copy of the record for `id`.
    pub fn get(&self, id: &str) -> Option<ExecutionRecord> {
        self.inner.read().entries.get(id).map(|e| e.record.clone())
    }

    /// Copy of the supervision entry for `id`.
    pub fn supervision(&self, id: &str) -> Option<SupervisionMetrics> {
        self.inner
            .read()
            .entries
            .get(id)
            .map(|e| e.supervision.clone())
    }

    /// All records in spawn order.
    pub fn records(&self) -> Vec<ExecutionRecord> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .map(|e| e.record.clone())
            .collect()
    }

    /// All supervision entries in spawn order.
    pub fn supervision_all(&self) -> Vec<SupervisionMetrics> {
        self.snapshot().1
    }

    /// Records and supervision entries read under one lock.
    pub fn snapshot(&self) -> (Vec<ExecutionRecord>, Vec<SupervisionMetrics>) {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .map(|e| (e.record.clone(), e.supervision.clone()))
            .unzip()
    }

    /// Records in `starting` or `running`.
    pub fn active_count(&self) -> usize {
        self.inner
            .read()
            .entries
            .values()
            .filter(|e| e.record.status.is_active())
            .count()
    }

    /// Records stored, terminal ones included.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether no record was ever admitted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Entry) -> bool,
    {
        match self.inner.write().entries.get_mut(id) {
            Some(entry) => f(entry),
            None => false,
        }
    }
}

impl Default for ExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn finish(record: &mut ExecutionRecord, status: AgentStatus, now: DateTime<Utc>) {
    record.status = status;
    record.end_time = Some(now);
    let elapsed = (now - record.start_time).num_milliseconds().max(0);
    record.duration_ms = Some(u64::try_from(elapsed).unwrap_or_default());
}

fn fail_entry(entry: &mut Entry, error: String, now: DateTime<Utc>) {
    finish(&mut entry.record, AgentStatus::Failed, now);
    entry.record.error = Some(error);
    entry.supervision.status = AgentStatus::Failed;
    entry.supervision.tasks_failed += 1;
    entry.supervision.health_status = HealthStatus::Unhealthy;
}

fn stop_entry(entry: &mut Entry, reason: &str, now: DateTime<Utc>) -> bool {
    if entry.record.status != AgentStatus::Running {
        return false;
    }
    entry.record.status = AgentStatus::Stopped;
    entry.record.end_time = Some(now);
    entry.record.error = Some(reason.to_string());
    entry.supervision.status = AgentStatus::Stopped;
    entry.supervision.last_heartbeat = now;
    true
}
