/// Ollama generate backend.
pub mod ollama;
/// OpenAI-compatible chat backend.
pub mod openai;

use crate::config::{LlmProvider, ProviderSettings};
use async_trait::async_trait;
use oliver_core::{OliverError, OliverResult};
use std::sync::Arc;
use std::time::Duration;

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

/// Uniform interface over every language-model backend.
///
/// Implementations only have to provide [`generate`](LanguageModel::generate);
/// `reason` and `analyze_patterns` are prompt templates layered on top of it.
/// Connectivity failures and backend-reported errors are returned, never swallowed.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Short provider name (`local`, `openai`, `minimax`, …).
    fn name(&self) -> &str;

    /// Model identifier sent to the backend.
    fn model(&self) -> &str;

    /// Generate text for `prompt`, optionally preceded by `context`.
    async fn generate(&self, prompt: &str, context: Option<&str>) -> OliverResult<String>;

    /// Ask the model to reason about `task` in light of `context`.
    async fn reason(&self, context: &str, task: &str) -> OliverResult<String> {
        let prompt = format!(
            "Based on the following context, provide reasoning for this task:\n\n\
             Context: {context}\n\n\
             Task: {task}\n\n\
             Provide clear, structured reasoning that explains:\n\
             1. What the task requires\n\
             2. Relevant patterns or information from the context\n\
             3. Recommended approach based on the context\n"
        );
        self.generate(&prompt, None).await
    }

    /// Ask the model for patterns in `data`.
    ///
    /// Returns `{"analysis": <text>, "patterns": [<bullet lines>]}`.
    async fn analyze_patterns(&self, data: &serde_json::Value) -> OliverResult<serde_json::Value> {
        let prompt = format!(
            "Analyze the following data and identify patterns:\n\n\
             Data: {data}\n\n\
             Provide a structured analysis that includes:\n\
             - Key patterns identified\n\
             - Trends or correlations\n\
             - Recommendations based on the patterns\n"
        );
        let analysis = self.generate(&prompt, None).await?;
        let patterns: Vec<String> = analysis
            .lines()
            .map(str::trim)
            .filter_map(|l| l.strip_prefix("- ").or_else(|| l.strip_prefix("* ")))
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        Ok(serde_json::json!({
            "analysis": analysis,
            "patterns": patterns,
        }))
    }
}

/// Build a concrete provider from its name and the shared settings bag.
///
/// Accepts `local`/`ollama`, `hosted-openai-compatible`/`openai` and
/// `hosted-minimax-style`/`minimax`. Unknown names, and hosted providers
/// without an API key, fail immediately.
pub fn create_provider(
    name: &str,
    settings: &ProviderSettings,
) -> OliverResult<Arc<dyn LanguageModel>> {
    let provider: LlmProvider = name.parse()?;
    let config = settings.model_config(provider)?;
    let model: Arc<dyn LanguageModel> = match provider {
        LlmProvider::Local => Arc::new(OllamaBackend::new(config)),
        LlmProvider::OpenAi | LlmProvider::Minimax => Arc::new(OpenAiBackend::new(config)),
    };
    Ok(model)
}

pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Classify a transport error: unreachable backends are `Connection`, the rest `Http`.
pub(crate) fn map_transport_error(provider: &str, err: reqwest::Error) -> OliverError {
    if err.is_connect() || err.is_timeout() {
        OliverError::Connection(format!("{provider} not available: {err}"))
    } else {
        OliverError::Http(format!("{provider} request failed: {err}"))
    }
}
