use super::{http_client, map_transport_error, LanguageModel};
use crate::config::ModelConfig;
use async_trait::async_trait;
use oliver_core::{OliverError, OliverResult};

/// OpenAI-compatible chat completions backend.
///
/// Serves both the `openai` and `minimax` providers; they differ only in base URL,
/// model and key.
pub struct OpenAiBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiBackend {
    /// Backend with its own HTTP client built from `config`.
    pub fn new(config: ModelConfig) -> Self {
        let http = http_client(config.timeout_secs);
        Self { config, http }
    }

    fn build_messages(&self, prompt: &str, context: Option<&str>) -> Vec<serde_json::Value> {
        let mut api_messages: Vec<serde_json::Value> = Vec::new();

        if let Some(sys) = context {
            api_messages.push(serde_json::json!({
                "role": "system",
                "content": sys
            }));
        }

        api_messages.push(serde_json::json!({
            "role": "user",
            "content": prompt
        }));

        api_messages
    }
}

#[async_trait]
impl LanguageModel for OpenAiBackend {
    fn name(&self) -> &str {
        self.config.provider.as_str()
    }

    fn model(&self) -> &str {
        &self.config.model_id
    }

    async fn generate(&self, prompt: &str, context: Option<&str>) -> OliverResult<String> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let provider = self.config.provider.as_str();

        let body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": self.build_messages(prompt, context),
        });

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(provider, e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| map_transport_error(provider, e))?;

        if !status.is_success() {
            return Err(OliverError::Http(format!(
                "{provider} API error {status}: {text}"
            )));
        }

        let resp_body: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            OliverError::Provider(format!("{provider} returned invalid JSON: {e}"))
        })?;

        parse_chat_response(provider, &resp_body)
    }
}

/// Extract `choices[0].message.content` from a chat completions payload.
pub fn parse_chat_response(provider: &str, body: &serde_json::Value) -> OliverResult<String> {
    if let Some(err) = body.get("error") {
        return Err(OliverError::Provider(format!("{provider} error payload: {err}")));
    }
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| OliverError::Provider(format!("{provider} response has no message content")))
}
