//! Multi-agent orchestration engine with admission control, supervision, and workflows.
//!
//! Runs named agents against language-model providers, tracks every execution through its
//! lifecycle, sequences multi-step workflows that carry results forward, and fans requests
//! out in parallel under a shared cancellation scope.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Facade owning the registry, execution store, spawner, workflows, and supervisor.
//! - [`AgentSpawner`]: Admits, runs, and records a single agent execution.
//! - [`WorkflowEngine`]: Executes workflow steps in order with retries and timeouts.
//! - [`ExecutionStore`]: Authoritative table of execution records and heartbeats.
//! - [`Supervisor`]: Background heartbeat sweep and metrics logging.
//! - [`Catalog`]: Agent and workflow definitions loaded from TOML or the built-in set.

/// Orchestrator settings and the agent/workflow catalog.
pub mod config;
/// Decision log sinks for spawn and workflow traces.
pub mod decision_log;
/// Orchestrator facade.
pub mod engine;
/// Parallel spawn coordinator.
pub mod fanout;
/// Aggregate metrics snapshots.
pub mod metrics;
/// Per-agent response parsers.
pub mod parsers;
/// Built-in agent and workflow definitions.
pub mod profiles;
/// Agent definition registry.
pub mod registry;
/// Retry policy with exponential backoff.
pub mod retry;
/// Single-execution spawner.
pub mod spawner;
/// Execution record store.
pub mod store;
/// Supervision loops.
pub mod supervision;
/// Shared orchestration types (records, workflows, supervision metrics).
pub mod types;
/// Workflow execution.
pub mod workflow;

pub use config::{Catalog, OrchestratorSettings};
pub use decision_log::{DecisionEntry, DecisionSink, DecisionType, JsonlDecisionLog, NoopDecisionSink};
pub use engine::Orchestrator;
pub use fanout::{run_branches, spawn_multiple, BranchOutcome};
pub use metrics::MetricsSnapshot;
pub use registry::AgentRegistry;
pub use retry::RetryPolicy;
pub use spawner::{AgentSpawner, SpawnLimits, SpawnOptions};
pub use store::{ExecutionStore, SweepReport};
pub use supervision::Supervisor;
pub use types::{
    AgentDefinition, AgentStatus, ExecutionRecord, HealthStatus, SpawnRequest, StepResult,
    StructuredResult, SupervisionMetrics, WorkflowDefinition, WorkflowResult, WorkflowSettings,
    WorkflowStatus, WorkflowStep,
};
pub use workflow::WorkflowEngine;
