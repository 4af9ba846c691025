use crate::decision_log::{DecisionEntry, DecisionSink, DecisionType};
use crate::registry::AgentRegistry;
use crate::store::ExecutionStore;
use crate::types::{ExecutionRecord, SpawnRequest};
use chrono::Utc;
use oliver_core::{OliverError, OliverResult};
use oliver_llm::ModelRouter;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Appended to every task prompt so responses stay parseable.
const RESPONSE_CONTRACT: &str = "\n\n\
Respond in plain text with short headed sections. Use '- ' bullet lines for insights, \
patterns and recommendations, numbered lines for ordered steps, and fenced code blocks \
tagged with a language for any code.";

/// Per-call options for [`AgentSpawner::spawn_with`].
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Parent token; the execution gets a child of it.
    pub cancel: Option<CancellationToken>,
    /// Deadline for the backend call, including the wait for a permit.
    pub timeout: Option<Duration>,
}

/// Limits applied by the spawner.
#[derive(Debug, Clone, Copy)]
pub struct SpawnLimits {
    /// Admission ceiling on active executions.
    pub max_active: usize,
    /// Heartbeat cadence recorded on each supervision entry.
    pub heartbeat_interval_secs: f64,
}

/// Error text recorded on executions that end through cancellation.
pub const CANCELLED: &str = "cancelled";

/// Error text recorded on executions whose task panicked.
pub const PANICKED: &str = "execution panicked";

enum CallOutcome {
    Response(String),
    Error(OliverError),
    TimedOut(Duration),
    Cancelled,
}

/// Runs single executions: admission, model resolution, the gated backend call,
/// parsing and the terminal transition.
pub struct AgentSpawner {
    registry: Arc<AgentRegistry>,
    store: Arc<ExecutionStore>,
    router: Arc<ModelRouter>,
    permits: Arc<Semaphore>,
    sink: Arc<dyn DecisionSink>,
    limits: SpawnLimits,
}

impl AgentSpawner {
    /// `llm_concurrency` sizes the permit pool for backend calls (at least one).
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<ExecutionStore>,
        router: Arc<ModelRouter>,
        sink: Arc<dyn DecisionSink>,
        llm_concurrency: usize,
        limits: SpawnLimits,
    ) -> Self {
        Self {
            registry,
            store,
            router,
            permits: Arc::new(Semaphore::new(llm_concurrency.max(1))),
            sink,
            limits,
        }
    }

    /// [`Self::spawn_with`] without a parent token or deadline.
    pub async fn spawn(&self, request: SpawnRequest) -> OliverResult<ExecutionRecord> {
        self.spawn_with(request, SpawnOptions::default()).await
    }

    /// Run one execution to a terminal state.
    ///
    /// Only admission errors (unknown agent type, capacity exceeded) are returned as `Err`;
    /// backend failures, timeouts and cancellation end up on the returned record.
    pub async fn spawn_with(
        &self,
        request: SpawnRequest,
        options: SpawnOptions,
    ) -> OliverResult<ExecutionRecord> {
        let agent = self
            .registry
            .get(&request.agent_type)
            .ok_or_else(|| OliverError::AgentNotFound(request.agent_type.clone()))?;
        let definition = agent.definition.clone();

        let id = execution_id(&request.agent_type, &request.prompt);
        let token = options
            .cancel
            .as_ref()
            .map_or_else(CancellationToken::new, CancellationToken::child_token);

        self.store.admit(
            ExecutionRecord::starting(id.clone(), &request),
            self.limits.heartbeat_interval_secs,
            self.limits.max_active,
            token.clone(),
        )?;
        let guard = ExecutionGuard::new(self.store.clone(), id.clone());
        info!(
            execution_id = %id,
            agent = %definition.id,
            display_name = %definition.display_name,
            "Spawning agent"
        );
        self.store.mark_running(&id);

        let Some(model) = self.router.resolve(&definition.model) else {
            let reason = format!("No language model available for {}", definition.model);
            error!(execution_id = %id, model = %definition.model, "{reason}");
            self.store.fail(&id, reason);
            guard.disarm();
            return self.finished(&id);
        };
        let provider = format!("{}/{}", model.name(), model.model());
        self.store.set_provider(&id, provider.clone());

        let full_prompt = format!(
            "{}\n\nTask: {}{}",
            definition.instructions_prompt, request.prompt, RESPONSE_CONTRACT
        );

        let call = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| OliverError::Orchestrator("model permit pool closed".into()))?;
            self.store.heartbeat(&id);
            debug!(execution_id = %id, provider = %provider, "Calling language model");
            model.generate(&full_prompt, None).await
        };
        let bounded = async {
            match options.timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(Ok(text)) => CallOutcome::Response(text),
                    Ok(Err(e)) => CallOutcome::Error(e),
                    Err(_) => CallOutcome::TimedOut(limit),
                },
                None => match call.await {
                    Ok(text) => CallOutcome::Response(text),
                    Err(e) => CallOutcome::Error(e),
                },
            }
        };
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => CallOutcome::Cancelled,
            outcome = bounded => outcome,
        };

        let response = match outcome {
            CallOutcome::Response(text) => {
                let mut result = (agent.parser)(&text);
                result.insert("agent_type".into(), definition.id.clone().into());
                result.insert("raw_response".into(), text.clone().into());
                if self.store.complete(&id, result) {
                    info!(execution_id = %id, agent = %definition.id, "Agent completed");
                } else {
                    warn!(execution_id = %id, "Late response ignored, execution already finished");
                }
                text
            }
            CallOutcome::Error(e) => {
                if self.store.fail(&id, e.to_string()) {
                    error!(execution_id = %id, agent = %definition.id, error = %e, "Agent failed");
                }
                String::new()
            }
            CallOutcome::TimedOut(limit) => {
                let reason = format!("timed out after {limit:?}");
                if self.store.fail(&id, reason.clone()) {
                    warn!(execution_id = %id, agent = %definition.id, "{reason}");
                }
                String::new()
            }
            CallOutcome::Cancelled => {
                if self.store.stop(&id, CANCELLED) {
                    info!(execution_id = %id, agent = %definition.id, "Agent cancelled");
                }
                String::new()
            }
        };
        guard.disarm();

        let record = self.finished(&id)?;
        let mut metadata = record.metadata.clone();
        metadata.insert("execution_id".into(), id.clone().into());
        metadata.insert("agent_type".into(), definition.id.clone().into());
        metadata.insert("status".into(), record.status.to_string().into());
        self.sink.record(DecisionEntry::new(
            DecisionType::AgentSpawn,
            provider,
            &request.prompt,
            &response,
            metadata,
        ));
        Ok(record)
    }

    /// Store shared with the orchestrator.
    pub fn store(&self) -> &Arc<ExecutionStore> {
        &self.store
    }

    /// Where decision entries go.
    pub fn sink(&self) -> &Arc<dyn DecisionSink> {
        &self.sink
    }

    fn finished(&self, id: &str) -> OliverResult<ExecutionRecord> {
        self.store
            .get(id)
            .ok_or_else(|| OliverError::Orchestrator(format!("execution {id} vanished")))
    }
}

/// Ends an admitted execution whose spawn future is dropped before its terminal transition.
struct ExecutionGuard {
    store: Arc<ExecutionStore>,
    id: String,
    armed: bool,
}

impl ExecutionGuard {
    fn new(store: Arc<ExecutionStore>, id: String) -> Self {
        Self {
            store,
            id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if std::thread::panicking() {
            if self.store.fail(&self.id, PANICKED) {
                error!(execution_id = %self.id, "Execution panicked");
            }
            return;
        }
        // `stop` only applies to running records; a starting one is failed instead.
        if self.store.stop(&self.id, CANCELLED) || self.store.fail(&self.id, CANCELLED) {
            warn!(
                execution_id = %self.id,
                "Spawn dropped before completion, execution cancelled"
            );
        }
    }
}

/// `"{agent_type}-{unix_millis}-{prompt discriminator}-{random suffix}"`.
pub fn execution_id(agent_type: &str, prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    let discriminator = digest
        .iter()
        .take(8)
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
        % 10_000;
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{agent_type}-{}-{discriminator:04}-{}",
        Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::decision_log::NoopDecisionSink;
    use crate::types::{AgentDefinition, AgentStatus};
    use async_trait::async_trait;
    use oliver_llm::LanguageModel;

    struct Echo;

    #[async_trait]
    impl LanguageModel for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn model(&self) -> &str {
            "echo-1"
        }
        async fn generate(&self, prompt: &str, _context: Option<&str>) -> OliverResult<String> {
            Ok(prompt.to_string())
        }
    }

    struct Hang;

    #[async_trait]
    impl LanguageModel for Hang {
        fn name(&self) -> &str {
            "hang"
        }
        fn model(&self) -> &str {
            "hang-1"
        }
        async fn generate(&self, _prompt: &str, _context: Option<&str>) -> OliverResult<String> {
            std::future::pending().await
        }
    }

    fn spawner(fallback: bool) -> AgentSpawner {
        let registry = Arc::new(AgentRegistry::new());
        registry.register(AgentDefinition::new("echo", "Echo", "echo/echo-1", "Repeat the task."));
        registry.register(AgentDefinition::new("hang", "Hang", "hang/x", "Never answer."));
        registry.register(AgentDefinition::new("ghost", "Ghost", "nowhere/x", "No backend."));
        let router = ModelRouter::new("echo", Arc::new(Echo))
            .with_provider("hang", Arc::new(Hang))
            .with_fallback(fallback);
        AgentSpawner::new(
            registry,
            Arc::new(ExecutionStore::new()),
            Arc::new(router),
            Arc::new(NoopDecisionSink),
            2,
            SpawnLimits {
                max_active: 4,
                heartbeat_interval_secs: 30.0,
            },
        )
    }

    #[test]
    fn test_execution_id_format() {
        let a = execution_id("echo", "same prompt");
        let b = execution_id("echo", "same prompt");
        assert_ne!(a, b);
        let parts: Vec<&str> = a.rsplitn(3, '-').collect();
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 4);
        assert!(a.starts_with("echo-"));
    }

    #[tokio::test]
    async fn test_spawn_builds_prompt_and_completes() {
        let spawner = spawner(true);
        let record = spawner.spawn(SpawnRequest::new("echo", "ping")).await.unwrap();
        assert_eq!(record.status, AgentStatus::Completed);
        let raw = record.raw_response().unwrap();
        assert!(raw.starts_with("Repeat the task.\n\nTask: ping"));
        assert!(raw.contains("fenced code blocks"));
        assert_eq!(record.result.as_ref().unwrap()["agent_type"], "echo");
        assert_eq!(record.model_provider_used.as_deref(), Some("echo/echo-1"));
        assert!(record.duration_ms.is_some());
    }

    #[tokio::test]
    async fn test_unknown_agent_creates_no_record() {
        let spawner = spawner(true);
        let err = spawner.spawn(SpawnRequest::new("nope", "x")).await.unwrap_err();
        assert!(matches!(err, OliverError::AgentNotFound(_)));
        assert!(spawner.store().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_model_fails_record() {
        let record = spawner(false)
            .spawn(SpawnRequest::new("ghost", "x"))
            .await
            .unwrap();
        assert_eq!(record.status, AgentStatus::Failed);
        assert!(record.error.unwrap().contains("No language model"));

        let substituted = spawner(true)
            .spawn(SpawnRequest::new("ghost", "x"))
            .await
            .unwrap();
        assert_eq!(substituted.status, AgentStatus::Completed);
        assert_eq!(substituted.model_provider_used.as_deref(), Some("echo/echo-1"));
    }

    #[tokio::test]
    async fn test_timeout_fails_record() {
        let spawner = spawner(true);
        let options = SpawnOptions {
            cancel: None,
            timeout: Some(Duration::from_millis(30)),
        };
        let record = spawner
            .spawn_with(SpawnRequest::new("hang", "x"), options)
            .await
            .unwrap();
        assert_eq!(record.status, AgentStatus::Failed);
        assert!(record.error.unwrap().starts_with("timed out after"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_record() {
        let spawner = Arc::new(spawner(true));
        let parent = CancellationToken::new();
        let options = SpawnOptions {
            cancel: Some(parent.clone()),
            timeout: None,
        };
        let task = {
            let spawner = spawner.clone();
            tokio::spawn(async move {
                spawner
                    .spawn_with(SpawnRequest::new("hang", "x"), options)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        parent.cancel();

        let record = task.await.unwrap().unwrap();
        assert_eq!(record.status, AgentStatus::Stopped);
        assert_eq!(record.error.as_deref(), Some("cancelled"));
        assert!(record.end_time.is_some());
        assert_eq!(spawner.store().active_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_spawn_stops_record() {
        let spawner = spawner(true);
        let dropped = tokio::time::timeout(
            Duration::from_millis(30),
            spawner.spawn(SpawnRequest::new("hang", "x")),
        )
        .await;
        assert!(dropped.is_err());

        let records = spawner.store().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AgentStatus::Stopped);
        assert_eq!(records[0].error.as_deref(), Some(CANCELLED));
        assert!(records[0].end_time.is_some());
        assert_eq!(spawner.store().active_count(), 0);
    }

    #[test]
    fn test_guard_fails_starting_record() {
        let store = Arc::new(ExecutionStore::new());
        let record = ExecutionRecord::starting("s-1".into(), &SpawnRequest::new("echo", "x"));
        store
            .admit(record, 1.0, 1, CancellationToken::new())
            .unwrap();
        drop(ExecutionGuard::new(store.clone(), "s-1".into()));

        let record = store.get("s-1").unwrap();
        assert_eq!(record.status, AgentStatus::Failed);
        assert_eq!(record.error.as_deref(), Some(CANCELLED));
        assert_eq!(store.active_count(), 0);
    }
}
