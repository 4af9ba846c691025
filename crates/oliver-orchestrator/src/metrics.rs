use crate::types::{AgentStatus, ExecutionRecord, HealthStatus, SupervisionMetrics, WorkflowStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Execution records by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentCounts {
    /// Every record ever admitted.
    pub total: usize,
    /// `starting` + `running`.
    pub active: usize,
    /// Records that completed.
    pub completed: usize,
    /// Records that failed.
    pub failed: usize,
    /// Records that were stopped.
    pub stopped: usize,
}

/// Workflow definitions by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkflowCounts {
    /// Registered definitions.
    pub total: usize,
    /// Never run.
    pub idle: usize,
    /// Currently executing.
    pub running: usize,
    /// Last run completed.
    pub completed: usize,
    /// Last run failed.
    pub failed: usize,
}

/// Execution timing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    /// Mean over executions that recorded a duration.
    pub avg_duration_ms: f64,
    /// Sum over the same executions.
    pub total_duration_ms: u64,
}

/// Supervision entries by health.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SupervisionCounts {
    /// Entries tracked.
    pub agents_monitored: usize,
    /// Entries with no missed heartbeats.
    pub healthy: usize,
    /// Entries that missed a heartbeat.
    pub degraded: usize,
    /// Failed or reclaimed entries.
    pub unhealthy: usize,
}

/// Point-in-time aggregate over executions, workflows and supervision entries.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Execution counts.
    pub agents: AgentCounts,
    /// Workflow counts.
    pub workflows: WorkflowCounts,
    /// Execution timing.
    pub performance: PerformanceMetrics,
    /// Supervision health counts.
    pub supervision: SupervisionCounts,
}

impl MetricsSnapshot {
    /// Aggregate the given records, supervision entries and workflow statuses.
    pub fn collect(
        records: &[ExecutionRecord],
        supervision: &[SupervisionMetrics],
        workflows: &[WorkflowStatus],
    ) -> Self {
        let mut agents = AgentCounts {
            total: records.len(),
            ..AgentCounts::default()
        };
        let mut durations = Vec::new();
        for record in records {
            match record.status {
                AgentStatus::Completed => agents.completed += 1,
                AgentStatus::Failed => agents.failed += 1,
                AgentStatus::Stopped => agents.stopped += 1,
                status if status.is_active() => agents.active += 1,
                _ => {}
            }
            if let Some(ms) = record.duration_ms {
                durations.push(ms);
            }
        }

        let total_duration_ms: u64 = durations.iter().sum();
        let performance = PerformanceMetrics {
            avg_duration_ms: if durations.is_empty() {
                0.0
            } else {
                total_duration_ms as f64 / durations.len() as f64
            },
            total_duration_ms,
        };

        let mut workflow_counts = WorkflowCounts {
            total: workflows.len(),
            ..WorkflowCounts::default()
        };
        for status in workflows {
            match status {
                WorkflowStatus::Idle => workflow_counts.idle += 1,
                WorkflowStatus::Running => workflow_counts.running += 1,
                WorkflowStatus::Completed => workflow_counts.completed += 1,
                WorkflowStatus::Failed => workflow_counts.failed += 1,
            }
        }

        let mut health = SupervisionCounts {
            agents_monitored: supervision.len(),
            ..SupervisionCounts::default()
        };
        for entry in supervision {
            match entry.health_status {
                HealthStatus::Healthy => health.healthy += 1,
                HealthStatus::Degraded => health.degraded += 1,
                HealthStatus::Unhealthy => health.unhealthy += 1,
            }
        }

        Self {
            timestamp: Utc::now(),
            agents,
            workflows: workflow_counts,
            performance,
            supervision: health,
        }
    }
}
