use crate::profiles::{fallback_agents, fallback_workflows, FALLBACK_MODEL};
use crate::types::{step_id, AgentDefinition, WorkflowDefinition, WorkflowSettings, WorkflowStep};
use oliver_core::{OliverError, OliverResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Runtime knobs of the orchestrator (`[orchestrator]` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// Admission ceiling on `starting` + `running` executions.
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,
    /// Permit pool gating outbound model calls.
    #[serde(default = "default_llm_concurrency")]
    pub llm_concurrency: usize,
    /// Expected heartbeat cadence of a running execution.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: f64,
    /// Period of the heartbeat sweep.
    #[serde(default = "default_supervision_interval_secs")]
    pub supervision_interval_secs: f64,
    /// Period of the metrics log line.
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: f64,
    /// A running execution is reclaimed once its missed-heartbeat count exceeds this.
    #[serde(default = "default_missed_heartbeat_limit")]
    pub missed_heartbeat_limit: u32,
    /// Substitute the default provider when a definition names an unconfigured one.
    #[serde(default = "default_true")]
    pub fallback_to_default_model: bool,
    /// First delay between workflow step attempts; doubles per retry.
    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,
    /// Cap on the delay between attempts.
    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,
}

fn default_max_concurrent_agents() -> usize {
    10
}
fn default_llm_concurrency() -> usize {
    3
}
fn default_heartbeat_interval_secs() -> f64 {
    30.0
}
fn default_supervision_interval_secs() -> f64 {
    30.0
}
fn default_metrics_interval_secs() -> f64 {
    60.0
}
fn default_missed_heartbeat_limit() -> u32 {
    3
}
fn default_true() -> bool {
    true
}
fn default_retry_backoff_base_ms() -> u64 {
    500
}
fn default_retry_backoff_max_ms() -> u64 {
    30_000
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_concurrent_agents(),
            llm_concurrency: default_llm_concurrency(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            supervision_interval_secs: default_supervision_interval_secs(),
            metrics_interval_secs: default_metrics_interval_secs(),
            missed_heartbeat_limit: default_missed_heartbeat_limit(),
            fallback_to_default_model: true,
            retry_backoff_base_ms: default_retry_backoff_base_ms(),
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
        }
    }
}

impl OrchestratorSettings {
    /// Reject zero limits and non-positive intervals.
    pub fn validate(&self) -> OliverResult<()> {
        if self.max_concurrent_agents == 0 {
            return Err(OliverError::Config(
                "max_concurrent_agents must be at least 1".into(),
            ));
        }
        if self.llm_concurrency == 0 {
            return Err(OliverError::Config("llm_concurrency must be at least 1".into()));
        }
        for (name, value) in [
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("supervision_interval_secs", self.supervision_interval_secs),
            ("metrics_interval_secs", self.metrics_interval_secs),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(OliverError::Config(format!("{name} must be positive")));
            }
        }
        if self.llm_concurrency >= self.max_concurrent_agents {
            warn!(
                llm_concurrency = self.llm_concurrency,
                max_concurrent_agents = self.max_concurrent_agents,
                "Permit pool is not smaller than the admission ceiling"
            );
        }
        Ok(())
    }

    /// [`Self::supervision_interval_secs`] as a `Duration`.
    pub fn supervision_interval(&self) -> Duration {
        secs(self.supervision_interval_secs)
    }

    /// [`Self::metrics_interval_secs`] as a `Duration`.
    pub fn metrics_interval(&self) -> Duration {
        secs(self.metrics_interval_secs)
    }
}

/// Convert fractional seconds, clamping nonsense to one millisecond.
pub(crate) fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.001)).unwrap_or(Duration::from_millis(1))
}

/// Agent and workflow definitions loaded from the catalog document.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// Agent definitions.
    pub agents: Vec<AgentDefinition>,
    /// Validated workflow definitions.
    pub workflows: Vec<WorkflowDefinition>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    agents: BTreeMap<String, AgentEntry>,
    #[serde(default)]
    workflows: BTreeMap<String, WorkflowEntry>,
}

#[derive(Debug, Deserialize)]
struct AgentEntry {
    display_name: Option<String>,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default)]
    tool_names: Vec<String>,
    #[serde(default)]
    spawnable_agents: Vec<String>,
    #[serde(default)]
    instructions_prompt: String,
}

fn default_model() -> String {
    FALLBACK_MODEL.to_string()
}

#[derive(Debug, Deserialize)]
struct WorkflowEntry {
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    settings: WorkflowSettings,
    #[serde(default)]
    steps: Vec<StepEntry>,
}

#[derive(Debug, Deserialize)]
struct StepEntry {
    agent: String,
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    dependencies: Vec<String>,
    timeout: Option<f64>,
    retries: Option<u32>,
}

impl Catalog {
    /// The built-in agents and workflows.
    pub fn fallback() -> Self {
        Self {
            agents: fallback_agents(),
            workflows: fallback_workflows(),
        }
    }

    /// Parse a TOML catalog. Workflow definitions are validated here.
    pub fn from_toml_str(content: &str) -> OliverResult<Self> {
        let file: CatalogFile = toml::from_str(content)
            .map_err(|e| OliverError::Config(format!("invalid catalog: {e}")))?;

        let agents = file
            .agents
            .into_iter()
            .map(|(id, entry)| AgentDefinition {
                display_name: entry.display_name.unwrap_or_else(|| id.clone()),
                id,
                model: entry.model,
                tool_names: entry.tool_names,
                spawnable_agents: entry.spawnable_agents,
                instructions_prompt: entry.instructions_prompt,
                status: Default::default(),
            })
            .collect();

        let mut workflows = Vec::new();
        for (id, entry) in file.workflows {
            let steps = entry
                .steps
                .into_iter()
                .enumerate()
                .map(|(index, step)| WorkflowStep {
                    id: step_id(&id, index),
                    agent: step.agent,
                    prompt: step.prompt,
                    dependencies: step.dependencies,
                    timeout: step.timeout,
                    retries: step.retries,
                })
                .collect();
            let workflow = WorkflowDefinition {
                name: entry.name.unwrap_or_else(|| id.clone()),
                id,
                description: entry.description,
                steps,
                settings: entry.settings,
                status: Default::default(),
            };
            workflow.validate()?;
            workflows.push(workflow);
        }

        Ok(Self { agents, workflows })
    }

    /// Read and parse the catalog file at `path`.
    pub fn load(path: &Path) -> OliverResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load the catalog, or fall back to the built-in set.
    ///
    /// A missing or invalid file, or one that defines no agents, is not fatal.
    pub fn load_or_fallback(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            info!("No agent catalog configured, using built-in agents");
            return Self::fallback();
        };
        match Self::load(path) {
            Ok(catalog) if !catalog.agents.is_empty() => {
                info!(
                    path = %path.display(),
                    agents = catalog.agents.len(),
                    workflows = catalog.workflows.len(),
                    "Loaded agent catalog"
                );
                catalog
            }
            Ok(_) => {
                warn!(path = %path.display(), "Agent catalog defines no agents, using built-in agents");
                Self::fallback()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load agent catalog, using built-in agents");
                Self::fallback()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    const CATALOG: &str = r#"
[agents.code-generator]
display_name = "Code Generator"
model = "minimax/MiniMax-M2"
tool_names = ["generate_code", "review_code"]
spawnable_agents = ["test-generator"]
instructions_prompt = "Generate high-quality, maintainable code."

[agents.reviewer]
instructions_prompt = "Review."

[workflows.code-generation]
name = "Code Generation"
description = "Plan, implement and review"
settings = { default_timeout = 300, retry_attempts = 1 }

[[workflows.code-generation.steps]]
agent = "code-generator"
prompt = "Write it: {input}"

[[workflows.code-generation.steps]]
agent = "reviewer"
prompt = "Review it."
dependencies = ["code-generation-step-0"]
timeout = 120
retries = 2
"#;

    #[test]
    fn test_settings_defaults() {
        let settings: OrchestratorSettings = toml::from_str("").unwrap();
        assert_eq!(settings.max_concurrent_agents, 10);
        assert_eq!(settings.llm_concurrency, 3);
        assert_eq!(settings.missed_heartbeat_limit, 3);
        assert!(settings.fallback_to_default_model);
        assert!(settings.validate().is_ok());
        assert_eq!(settings.supervision_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_settings_validation() {
        let zero = OrchestratorSettings {
            llm_concurrency: 0,
            ..OrchestratorSettings::default()
        };
        assert!(zero.validate().is_err());
        let negative = OrchestratorSettings {
            heartbeat_interval_secs: -1.0,
            ..OrchestratorSettings::default()
        };
        assert!(negative.validate().is_err());
        assert_eq!(secs(f64::NAN), Duration::from_millis(1));
    }

    #[test]
    fn test_parse_catalog() {
        let catalog = Catalog::from_toml_str(CATALOG).unwrap();
        assert_eq!(catalog.agents.len(), 2);
        let reviewer = catalog.agents.iter().find(|a| a.id == "reviewer").unwrap();
        assert_eq!(reviewer.display_name, "reviewer");
        assert_eq!(reviewer.model, FALLBACK_MODEL);

        let wf = &catalog.workflows[0];
        assert_eq!(wf.steps[1].id, "code-generation-step-1");
        assert_eq!(wf.steps[1].timeout, Some(120.0));
        assert_eq!(wf.steps[1].retries, Some(2));
        assert_eq!(wf.settings.retry_attempts, 1);
        assert_eq!(wf.settings.default_timeout, Some(300.0));
    }

    #[test]
    fn test_catalog_rejects_bad_dependency() {
        let bad = r#"
[agents.a]
instructions_prompt = "x"

[[workflows.w.steps]]
agent = "a"
prompt = "one"
dependencies = ["w-step-1"]

[[workflows.w.steps]]
agent = "a"
prompt = "two"
"#;
        let err = Catalog::from_toml_str(bad).unwrap_err();
        assert!(matches!(err, OliverError::Config(_)));
    }

    #[test]
    fn test_load_or_fallback() {
        let fallback = Catalog::load_or_fallback(None);
        assert_eq!(fallback.agents.len(), 6);

        let missing = Catalog::load_or_fallback(Some(Path::new("/nonexistent/agents.toml")));
        assert_eq!(missing.agents.len(), 6);

        let mut garbage = tempfile::NamedTempFile::new().unwrap();
        write!(garbage, "[agents\nnot toml").unwrap();
        assert_eq!(Catalog::load_or_fallback(Some(garbage.path())).agents.len(), 6);

        let mut good = tempfile::NamedTempFile::new().unwrap();
        write!(good, "{CATALOG}").unwrap();
        let loaded = Catalog::load_or_fallback(Some(good.path()));
        assert_eq!(loaded.agents.len(), 2);
        assert_eq!(loaded.workflows.len(), 1);
    }
}
