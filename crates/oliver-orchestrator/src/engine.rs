use crate::config::{Catalog, OrchestratorSettings};
use crate::decision_log::{DecisionSink, NoopDecisionSink};
use crate::fanout;
use crate::metrics::MetricsSnapshot;
use crate::registry::AgentRegistry;
use crate::retry::RetryPolicy;
use crate::spawner::{AgentSpawner, SpawnLimits, SpawnOptions};
use crate::store::ExecutionStore;
use crate::supervision::Supervisor;
use crate::types::{
    AgentDefinition, ExecutionRecord, SpawnRequest, SupervisionMetrics, WorkflowDefinition,
    WorkflowResult,
};
use crate::workflow::WorkflowEngine;
use oliver_core::{Metadata, OliverResult};
use oliver_llm::ModelRouter;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Owns the registry, execution store, spawner, workflow engine and supervisor of one
/// orchestration instance. Independent instances share nothing.
pub struct Orchestrator {
    settings: OrchestratorSettings,
    registry: Arc<AgentRegistry>,
    store: Arc<ExecutionStore>,
    spawner: Arc<AgentSpawner>,
    workflows: Arc<WorkflowEngine>,
    supervisor: Supervisor,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator that discards decision entries.
    pub fn new(settings: OrchestratorSettings, router: ModelRouter) -> Self {
        Self::with_components(settings, router, Arc::new(NoopDecisionSink))
    }

    /// Create an orchestrator with an explicit decision sink.
    pub fn with_components(
        settings: OrchestratorSettings,
        router: ModelRouter,
        sink: Arc<dyn DecisionSink>,
    ) -> Self {
        let router = Arc::new(router.with_fallback(settings.fallback_to_default_model));
        let registry = Arc::new(AgentRegistry::new());
        let store = Arc::new(ExecutionStore::new());
        let spawner = Arc::new(AgentSpawner::new(
            registry.clone(),
            store.clone(),
            router,
            sink,
            settings.llm_concurrency,
            SpawnLimits {
                max_active: settings.max_concurrent_agents,
                heartbeat_interval_secs: settings.heartbeat_interval_secs,
            },
        ));
        let backoff = RetryPolicy {
            max_retries: 0,
            backoff_base_ms: settings.retry_backoff_base_ms,
            backoff_max_ms: settings.retry_backoff_max_ms,
        };
        let shutdown = CancellationToken::new();
        let workflows = Arc::new(WorkflowEngine::new(
            spawner.clone(),
            backoff,
            shutdown.clone(),
        ));
        let supervisor = Supervisor::new(
            store.clone(),
            workflows.clone(),
            settings.supervision_interval(),
            settings.metrics_interval(),
            settings.missed_heartbeat_limit,
        );

        Self {
            settings,
            registry,
            store,
            spawner,
            workflows,
            supervisor,
            shutdown,
        }
    }

    /// Load the catalog at `catalog_path` (or the built-in set) and start supervision.
    pub fn initialize(&self, catalog_path: Option<&Path>) -> OliverResult<()> {
        self.initialize_with(Catalog::load_or_fallback(catalog_path))
    }

    /// Register `catalog` and start the background loops. Needs a Tokio runtime.
    pub fn initialize_with(&self, catalog: Catalog) -> OliverResult<()> {
        self.settings.validate()?;
        for agent in catalog.agents {
            self.registry.register(agent);
        }
        for workflow in catalog.workflows {
            self.workflows.register(workflow)?;
        }
        self.supervisor.start();
        info!(
            agents = self.registry.len(),
            workflows = self.workflows.definitions().len(),
            "Orchestrator initialized"
        );
        Ok(())
    }

    /// Register or replace an agent definition.
    pub fn register_agent(&self, definition: AgentDefinition) {
        self.registry.register(definition);
    }

    /// Validate and register or replace a workflow definition.
    pub fn register_workflow(&self, workflow: WorkflowDefinition) -> OliverResult<()> {
        self.workflows.register(workflow)
    }

    /// Run one execution. Only admission failures are errors.
    pub async fn spawn_agent(&self, request: SpawnRequest) -> OliverResult<ExecutionRecord> {
        let options = SpawnOptions {
            cancel: Some(self.shutdown.clone()),
            timeout: None,
        };
        self.spawner.spawn_with(request, options).await
    }

    /// Fan out one execution per request; returns the completed records.
    pub async fn spawn_multiple_agents(&self, requests: Vec<SpawnRequest>) -> Vec<ExecutionRecord> {
        let group = self.shutdown.child_token();
        fanout::spawn_multiple(self.spawner.clone(), requests, &group).await
    }

    /// Like [`spawn_multiple_agents`](Self::spawn_multiple_agents), cancelled by `group` as well.
    pub async fn spawn_multiple_agents_until(
        &self,
        requests: Vec<SpawnRequest>,
        group: CancellationToken,
    ) -> Vec<ExecutionRecord> {
        let fan = fanout::spawn_multiple(self.spawner.clone(), requests, &group);
        tokio::pin!(fan);
        tokio::select! {
            records = &mut fan => records,
            _ = self.shutdown.cancelled() => {
                group.cancel();
                fan.await
            }
        }
    }

    /// Registered agent definitions, sorted by id.
    pub fn get_agents(&self) -> Vec<AgentDefinition> {
        self.registry.definitions()
    }

    /// The record for `id`, in whatever state it is.
    pub fn get_spawned_agent(&self, id: &str) -> Option<ExecutionRecord> {
        self.store.get(id)
    }

    /// Every record, in spawn order.
    pub fn get_spawned_agents(&self) -> Vec<ExecutionRecord> {
        self.store.records()
    }

    /// Run a registered workflow. See [`WorkflowEngine::execute`].
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        initial_input: &str,
        metadata: Metadata,
    ) -> OliverResult<WorkflowResult> {
        self.workflows
            .execute(workflow_id, initial_input, metadata)
            .await
    }

    /// Registered workflow definitions with their last status.
    pub fn get_workflows(&self) -> Vec<WorkflowDefinition> {
        self.workflows.definitions()
    }

    /// Aggregate counts taken under one store lock.
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let (records, supervision) = self.store.snapshot();
        MetricsSnapshot::collect(&records, &supervision, &self.workflows.statuses())
    }

    /// Supervision entries, all of them or the one for `execution_id`.
    pub fn get_supervision_metrics(&self, execution_id: Option<&str>) -> Vec<SupervisionMetrics> {
        match execution_id {
            Some(id) => self.store.supervision(id).into_iter().collect(),
            None => self.store.supervision_all(),
        }
    }

    /// The background supervisor.
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Settings this instance was built with.
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Stop the background loops and mark every running execution `stopped`.
    pub async fn shutdown(&self) {
        info!("Shutting down orchestrator");
        self.supervisor.stop().await;
        let stopped = self.store.stop_all_running("orchestrator shutdown");
        self.shutdown.cancel();
        info!(stopped = stopped.len(), "Orchestrator shutdown complete");
    }
}
