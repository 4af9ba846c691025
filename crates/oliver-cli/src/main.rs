//! `oliver` command-line driver for the agent orchestrator.

use anyhow::Context;
use clap::{Parser, Subcommand};
use oliver_core::Metadata;
use oliver_llm::{ModelRouter, Priority, ProviderSettings, TaskType};
use oliver_orchestrator::{
    DecisionSink, JsonlDecisionLog, Orchestrator, OrchestratorSettings, SpawnRequest,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "oliver", about = "Oliver: personal assistant agent orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "oliver.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered agent definitions
    Agents,
    /// List workflow definitions
    Workflows,
    /// Run one agent execution and print its record
    Spawn {
        /// Agent type to run
        #[arg(short, long)]
        agent: String,
        /// Task prompt
        prompt: String,
        /// Request metadata as key=value (repeatable)
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, serde_json::Value)>,
    },
    /// Run one execution per prompt in parallel and print the completed ones
    Parallel {
        /// Agent type to run for every prompt
        #[arg(short, long)]
        agent: String,
        /// Task prompts
        #[arg(required = true)]
        prompts: Vec<String>,
    },
    /// Execute a workflow and print its result
    Workflow {
        /// Workflow id
        id: String,
        /// Initial request substituted into the step prompts
        prompt: String,
    },
    /// Show which provider the router picks for a task
    Route {
        /// Task type (general, chat, reasoning, code, analysis, summary)
        #[arg(long, default_value = "general")]
        task: String,
        /// Priority (low, normal, high)
        #[arg(long, default_value = "normal")]
        priority: String,
    },
}

#[derive(Debug, Default, Deserialize)]
struct OliverConfig {
    #[serde(default)]
    llm: ProviderSettings,
    #[serde(default)]
    orchestrator: OrchestratorSettings,
    /// Agent/workflow catalog; the built-in set is used when absent.
    #[serde(default)]
    agents_path: Option<PathBuf>,
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Serialize)]
struct RouteChoice<'a> {
    task: TaskType,
    priority: Priority,
    provider: &'a str,
    model: &'a str,
}

/// Parse `key=value`; the value is read as JSON when it parses, as a string otherwise.
fn parse_meta(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty metadata key in '{raw}'"));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Read the config file; a missing file means all defaults.
async fn load_config(path: &Path) -> anyhow::Result<OliverConfig> {
    let mut config = match tokio::fs::read_to_string(path).await {
        Ok(content) => toml::from_str::<OliverConfig>(&content)
            .with_context(|| format!("Invalid config file '{}'", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "Config file not found, using defaults");
            OliverConfig {
                data_dir: default_data_dir(),
                ..OliverConfig::default()
            }
        }
        Err(e) => {
            return Err(anyhow::anyhow!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        }
    };

    // Relative catalog paths are resolved against the config file's directory.
    if let Some(agents_path) = &config.agents_path {
        if agents_path.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.agents_path = Some(base.join(agents_path));
        }
    }
    config.llm = config.llm.with_env_overrides();
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;
    let router = ModelRouter::from_settings(&config.llm)?;

    if let Commands::Route { task, priority } = &cli.command {
        let task: TaskType = task.parse()?;
        let priority: Priority = priority.parse()?;
        let model = router.select(task, priority);
        return print_json(&RouteChoice {
            task,
            priority,
            provider: model.name(),
            model: model.model(),
        });
    }

    let decisions = Arc::new(JsonlDecisionLog::new(config.data_dir.join("decisions")));
    let sink: Arc<dyn DecisionSink> = decisions.clone();
    let orchestrator = Orchestrator::with_components(config.orchestrator, router, sink);
    orchestrator.initialize(config.agents_path.as_deref())?;

    let outcome = run(&orchestrator, cli.command).await;

    let metrics = orchestrator.get_metrics();
    info!(
        agents_total = metrics.agents.total,
        agents_completed = metrics.agents.completed,
        agents_failed = metrics.agents.failed,
        agents_stopped = metrics.agents.stopped,
        workflows_completed = metrics.workflows.completed,
        workflows_failed = metrics.workflows.failed,
        avg_duration_ms = metrics.performance.avg_duration_ms,
        "Final metrics"
    );
    orchestrator.shutdown().await;
    decisions.flush().await;
    outcome
}

async fn run(orchestrator: &Orchestrator, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Agents => print_json(&orchestrator.get_agents()),
        Commands::Workflows => print_json(&orchestrator.get_workflows()),
        Commands::Spawn {
            agent,
            prompt,
            meta,
        } => {
            let request = SpawnRequest {
                agent_type: agent,
                prompt,
                metadata: meta.into_iter().collect(),
            };
            let record = orchestrator.spawn_agent(request).await?;
            print_json(&record)
        }
        Commands::Parallel { agent, prompts } => {
            let requests = prompts
                .into_iter()
                .map(|prompt| SpawnRequest::new(agent.as_str(), prompt))
                .collect();
            let records = orchestrator.spawn_multiple_agents(requests).await;
            print_json(&records)
        }
        Commands::Workflow { id, prompt } => {
            let result = orchestrator
                .execute_workflow(&id, &prompt, Metadata::new())
                .await?;
            print_json(&result)
        }
        // Handled before the orchestrator is built.
        Commands::Route { .. } => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meta_values() {
        assert_eq!(
            parse_meta("source=cli").unwrap(),
            ("source".to_string(), serde_json::json!("cli"))
        );
        assert_eq!(
            parse_meta("retries=3").unwrap(),
            ("retries".to_string(), serde_json::json!(3))
        );
        assert_eq!(
            parse_meta("query=a=b").unwrap(),
            ("query".to_string(), serde_json::json!("a=b"))
        );
        assert!(parse_meta("novalue").is_err());
        assert!(parse_meta("=x").is_err());
    }

    #[tokio::test]
    async fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(config.orchestrator.max_concurrent_agents, 10);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert!(config.agents_path.is_none());
    }

    #[tokio::test]
    async fn test_config_file_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oliver.toml");
        std::fs::write(
            &path,
            r#"
agents_path = "agents.toml"
data_dir = "/tmp/oliver"

[llm]
ollama_model = "qwen2.5:7b"
cache_ttl_secs = 0

[orchestrator]
max_concurrent_agents = 4
llm_concurrency = 2
"#,
        )
        .unwrap();

        let config = load_config(&path).await.unwrap();
        assert_eq!(config.llm.cache_ttl_secs, 0);
        assert_eq!(config.orchestrator.max_concurrent_agents, 4);
        assert_eq!(config.orchestrator.llm_concurrency, 2);
        assert_eq!(config.orchestrator.missed_heartbeat_limit, 3);
        assert_eq!(config.agents_path, Some(dir.path().join("agents.toml")));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/oliver"));
    }

    #[tokio::test]
    async fn test_invalid_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oliver.toml");
        std::fs::write(&path, "[orchestrator]\nmax_concurrent_agents = \"many\"\n").unwrap();
        assert!(load_config(&path).await.is_err());
    }
}
