use super::{http_client, map_transport_error, LanguageModel};
use crate::config::ModelConfig;
use async_trait::async_trait;
use oliver_core::{OliverError, OliverResult};
use tracing::{debug, warn};

/// Local inference backend speaking the Ollama `/api/generate` protocol.
pub struct OllamaBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OllamaBackend {
    /// Backend for the server at [`ModelConfig::base_url`].
    pub fn new(config: ModelConfig) -> Self {
        let http = http_client(config.timeout_secs);
        Self { config, http }
    }
}

#[async_trait]
impl LanguageModel for OllamaBackend {
    fn name(&self) -> &str {
        self.config.provider.as_str()
    }

    fn model(&self) -> &str {
        &self.config.model_id
    }

    async fn generate(&self, prompt: &str, context: Option<&str>) -> OliverResult<String> {
        let url = format!("{}/api/generate", self.config.base_url());
        let full_prompt = match context {
            Some(ctx) => format!("{ctx}\n\n{prompt}"),
            None => prompt.to_string(),
        };

        let body = serde_json::json!({
            "model": self.config.model_id,
            "prompt": full_prompt,
            "stream": false,
            "options": {
                "temperature": self.config.temperature,
                "num_predict": self.config.max_tokens,
            },
        });

        debug!(url = %url, model = %self.config.model_id, "Ollama generate");

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Ollama not available");
                map_transport_error("Ollama", e)
            })?;

        let status = resp.status();
        if !status.is_success() {
            let error_body = resp.text().await.unwrap_or_default();
            return Err(OliverError::Http(format!(
                "Ollama API error {status}: {error_body}"
            )));
        }

        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| OliverError::Provider(format!("Ollama returned invalid JSON: {e}")))?;

        resp_body["response"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                OliverError::Provider("Ollama response is missing the 'response' field".into())
            })
    }
}
