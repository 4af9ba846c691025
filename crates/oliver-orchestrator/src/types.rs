use chrono::{DateTime, Utc};
use oliver_core::{Metadata, OliverError, OliverResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Structured fields extracted from a model response.
pub type StructuredResult = serde_json::Map<String, serde_json::Value>;

/// Lifecycle of an execution record.
///
/// `Idle` and `Starting` are bookkeeping states; `Completed`, `Failed` and `Stopped`
/// are terminal and never left once entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Not yet admitted.
    #[default]
    Idle,
    /// Admitted, backend call not yet issued.
    Starting,
    /// Backend call in flight.
    Running,
    /// The model answered and the response was parsed.
    Completed,
    /// Backend error, timeout, missing model or missed heartbeats.
    Failed,
    /// Cancelled or drained at shutdown.
    Stopped,
}

impl AgentStatus {
    /// `Completed`, `Failed` or `Stopped`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AgentStatus::Completed | AgentStatus::Failed | AgentStatus::Stopped
        )
    }

    /// Counted against the admission ceiling.
    pub fn is_active(self) -> bool {
        matches!(self, AgentStatus::Starting | AgentStatus::Running)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Starting => write!(f, "starting"),
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Completed => write!(f, "completed"),
            AgentStatus::Failed => write!(f, "failed"),
            AgentStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Immutable description of an agent capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Agent type requested by callers.
    pub id: String,
    /// Human-readable name used in logs.
    pub display_name: String,
    /// `"provider/model"`; the provider part selects the backend.
    pub model: String,
    /// Tools the agent advertises. Informational only.
    #[serde(default)]
    pub tool_names: Vec<String>,
    /// Agent types this one may delegate to. Informational only.
    #[serde(default)]
    pub spawnable_agents: Vec<String>,
    /// Prepended to every task prompt.
    pub instructions_prompt: String,
    /// Always `Idle`; execution state lives on the records.
    #[serde(default)]
    pub status: AgentStatus,
}

impl AgentDefinition {
    /// Definition without tools or delegates.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        model: impl Into<String>,
        instructions_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            model: model.into(),
            tool_names: Vec::new(),
            spawnable_agents: Vec::new(),
            instructions_prompt: instructions_prompt.into(),
            status: AgentStatus::Idle,
        }
    }

    /// Replace the advertised tools.
    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tool_names = tools.iter().map(|t| (*t).to_string()).collect();
        self
    }

    /// Replace the delegate agent types.
    pub fn with_spawnable(mut self, agents: &[&str]) -> Self {
        self.spawnable_agents = agents.iter().map(|a| (*a).to_string()).collect();
        self
    }
}

/// Caller input for one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRequest {
    /// Registered agent id.
    pub agent_type: String,
    /// Task text.
    pub prompt: String,
    /// Copied onto the execution record untouched.
    #[serde(default)]
    pub metadata: Metadata,
}

impl SpawnRequest {
    /// Request with empty metadata.
    pub fn new(agent_type: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            prompt: prompt.into(),
            metadata: Metadata::new(),
        }
    }

    /// Add one metadata entry.
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One tracked execution of an agent against a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Unique execution id.
    pub id: String,
    /// Agent id from the request.
    pub agent_type: String,
    /// Task text from the request.
    pub prompt: String,
    /// Current lifecycle state.
    pub status: AgentStatus,
    /// Admission time.
    pub start_time: DateTime<Utc>,
    /// Set on every terminal transition.
    pub end_time: Option<DateTime<Utc>>,
    /// Set on `Completed` and `Failed` only.
    pub duration_ms: Option<u64>,
    /// Request metadata.
    #[serde(default)]
    pub metadata: Metadata,
    /// Parsed response, with `agent_type` and `raw_response` added. `Completed` only.
    pub result: Option<StructuredResult>,
    /// Why the execution failed or stopped.
    pub error: Option<String>,
    /// `"provider/model"` of the backend that actually served the call.
    pub model_provider_used: Option<String>,
}

impl ExecutionRecord {
    pub(crate) fn starting(id: String, request: &SpawnRequest) -> Self {
        Self {
            id,
            agent_type: request.agent_type.clone(),
            prompt: request.prompt.clone(),
            status: AgentStatus::Starting,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            metadata: request.metadata.clone(),
            result: None,
            error: None,
            model_provider_used: None,
        }
    }

    /// The raw model text of a completed execution.
    pub fn raw_response(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|r| r.get("raw_response"))
            .and_then(serde_json::Value::as_str)
    }
}

/// Health derived from the missed-heartbeat counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No missed heartbeats.
    Healthy,
    /// At least one missed heartbeat.
    Degraded,
    /// Failed or reclaimed.
    Unhealthy,
}

/// Per-execution supervision entry. `agent_id` is the execution id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisionMetrics {
    /// Execution id.
    pub agent_id: String,
    /// Mirrors the record status.
    pub status: AgentStatus,
    /// Last sign of life from the execution.
    pub last_heartbeat: DateTime<Utc>,
    /// Expected heartbeat cadence; twice this is the deadline.
    pub heartbeat_interval_secs: f64,
    /// Sweeps that found the heartbeat past its deadline.
    pub missed_heartbeats: u32,
    /// `1` once completed.
    pub tasks_completed: u32,
    /// `1` once failed.
    pub tasks_failed: u32,
    /// Derived health.
    pub health_status: HealthStatus,
}

impl SupervisionMetrics {
    pub(crate) fn new(agent_id: String, heartbeat_interval_secs: f64) -> Self {
        Self {
            agent_id,
            status: AgentStatus::Starting,
            last_heartbeat: Utc::now(),
            heartbeat_interval_secs,
            missed_heartbeats: 0,
            tasks_completed: 0,
            tasks_failed: 0,
            health_status: HealthStatus::Healthy,
        }
    }
}

/// Aggregate status of a workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Registered, never run.
    #[default]
    Idle,
    /// An execution is in progress.
    Running,
    /// The last execution ran every step.
    Completed,
    /// The last execution aborted.
    Failed,
}

/// Defaults applied to steps that do not override them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Per-attempt deadline in seconds; `None` means no deadline.
    #[serde(default)]
    pub default_timeout: Option<f64>,
    /// Extra attempts per step after the first.
    #[serde(default)]
    pub retry_attempts: u32,
}

/// One step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// `"{workflow_id}-step-{index}"`.
    pub id: String,
    /// Agent id to run.
    pub agent: String,
    /// Template; `{input}` is replaced by the initial request.
    pub prompt: String,
    /// Ids of earlier steps whose results must exist.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Seconds; overrides [`WorkflowSettings::default_timeout`].
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Overrides [`WorkflowSettings::retry_attempts`].
    #[serde(default)]
    pub retries: Option<u32>,
}

/// A static, ordered multi-step plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow id used by `execute_workflow`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free text.
    #[serde(default)]
    pub description: String,
    /// Steps in execution order.
    pub steps: Vec<WorkflowStep>,
    /// Step defaults.
    #[serde(default)]
    pub settings: WorkflowSettings,
    /// Outcome of the most recent execution.
    #[serde(default)]
    pub status: WorkflowStatus,
}

impl WorkflowDefinition {
    /// Build a definition from `(agent, prompt, dependency indices)` triples.
    ///
    /// Step ids are derived from the workflow id and the step position.
    pub fn from_steps(
        id: impl Into<String>,
        name: impl Into<String>,
        steps: Vec<(&str, &str, Vec<usize>)>,
    ) -> Self {
        let id = id.into();
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(index, (agent, prompt, deps))| WorkflowStep {
                id: step_id(&id, index),
                agent: agent.to_string(),
                prompt: prompt.to_string(),
                dependencies: deps.into_iter().map(|d| step_id(&id, d)).collect(),
                timeout: None,
                retries: None,
            })
            .collect();
        Self {
            id,
            name: name.into(),
            description: String::new(),
            steps,
            settings: WorkflowSettings::default(),
            status: WorkflowStatus::Idle,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Distinct agent ids referenced by the steps.
    pub fn agents(&self) -> BTreeSet<String> {
        self.steps.iter().map(|s| s.agent.clone()).collect()
    }

    /// Every dependency must name an earlier step of this workflow.
    pub fn validate(&self) -> OliverResult<()> {
        if self.steps.is_empty() {
            return Err(OliverError::Config(format!(
                "workflow {} has no steps",
                self.id
            )));
        }
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for step in &self.steps {
            for dep in &step.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(OliverError::Config(format!(
                        "workflow {}: step {} depends on {}, which is not an earlier step",
                        self.id, step.id, dep
                    )));
                }
            }
            if !seen.insert(step.id.as_str()) {
                return Err(OliverError::Config(format!(
                    "workflow {}: duplicate step id {}",
                    self.id, step.id
                )));
            }
        }
        Ok(())
    }
}

/// `"{workflow_id}-step-{index}"`.
pub fn step_id(workflow_id: &str, index: usize) -> String {
    format!("{workflow_id}-step-{index}")
}

/// Outcome of one workflow step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Step id.
    pub step_id: String,
    /// Agent id the step ran.
    pub agent: String,
    /// Execution id of the last attempt; `None` when no attempt was admitted.
    pub execution_id: Option<String>,
    /// Status of the last attempt, `Failed` when none was admitted.
    pub status: AgentStatus,
    /// Attempts started.
    pub attempts: u32,
    /// Duration of the last attempt.
    pub duration_ms: u64,
    /// Parsed result of the completed attempt.
    pub result: Option<StructuredResult>,
    /// Error of the last attempt.
    pub error: Option<String>,
}

/// Aggregate outcome of one `execute_workflow` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Workflow id.
    pub workflow_id: String,
    /// `Completed` or `Failed`.
    pub status: WorkflowStatus,
    /// Executed steps in declared order; partial when the workflow failed.
    pub results: Vec<StepResult>,
    /// Sum of the step durations.
    pub duration_ms: u64,
    /// Why the workflow aborted.
    pub error: Option<String>,
    /// When execution began.
    pub started_at: DateTime<Utc>,
    /// When execution ended.
    pub finished_at: DateTime<Utc>,
}

impl WorkflowResult {
    /// Result for `step_id`, if that step ran.
    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.results.iter().find(|r| r.step_id == step_id)
    }
}
