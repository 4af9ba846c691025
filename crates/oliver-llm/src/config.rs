use oliver_core::{OliverError, OliverResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The backend families the factory knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Local inference server (Ollama `/api/generate`).
    Local,
    /// Hosted OpenAI-compatible chat completions API.
    OpenAi,
    /// Hosted MiniMax endpoint, OpenAI-compatible wire format.
    Minimax,
}

impl LlmProvider {
    /// Canonical short name, also used as the router key.
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Local => "local",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Minimax => "minimax",
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = OliverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "ollama" => Ok(LlmProvider::Local),
            "openai" | "hosted-openai-compatible" => Ok(LlmProvider::OpenAi),
            "minimax" | "hosted-minimax-style" => Ok(LlmProvider::Minimax),
            other => Err(OliverError::Config(format!("Unknown provider: {other}"))),
        }
    }
}

/// Connection settings for one concrete backend instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Backend family.
    pub provider: LlmProvider,
    /// Model name sent on the wire.
    pub model_id: String,
    /// Bearer token; empty for the local backend.
    #[serde(default)]
    pub api_key: String,
    /// Overrides the family's default endpoint.
    pub api_base_url: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion length cap.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-request HTTP timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_timeout_secs() -> u64 {
    60
}

impl ModelConfig {
    /// Endpoint root without a trailing slash.
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url.trim_end_matches('/')
        } else {
            match self.provider {
                LlmProvider::Local => "http://localhost:11434",
                LlmProvider::OpenAi => "https://api.openai.com",
                LlmProvider::Minimax => "https://api.minimax.io",
            }
        }
    }
}

/// The config bag handed to [`crate::create_provider`] and [`crate::ModelRouter::from_settings`].
///
/// Every field has a default so an empty `[llm]` table is valid; hosted backends are only
/// usable once their API key is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Provider the router falls back to (`local`, `openai` or `minimax`).
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Local inference server root.
    #[serde(default = "default_ollama_base_url")]
    pub ollama_base_url: String,
    /// Local model name.
    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,
    /// Enables the OpenAI-compatible backend when set.
    #[serde(default)]
    pub openai_api_key: Option<String>,
    /// OpenAI-compatible model name.
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    /// OpenAI-compatible endpoint override.
    #[serde(default)]
    pub openai_base_url: Option<String>,
    /// Enables the MiniMax backend when set.
    #[serde(default)]
    pub minimax_api_key: Option<String>,
    /// MiniMax model name.
    #[serde(default = "default_minimax_model")]
    pub minimax_model: String,
    /// MiniMax endpoint override.
    #[serde(default)]
    pub minimax_base_url: Option<String>,
    /// HTTP timeout applied to every backend.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Sampling temperature for every backend.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion length cap for every backend.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Response cache lifetime; `0` disables caching.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Most responses the cache holds at once.
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}
fn default_openai_model() -> String {
    "gpt-4".to_string()
}
fn default_minimax_model() -> String {
    "MiniMax-M2".to_string()
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_cache_max_entries() -> usize {
    crate::cache::DEFAULT_MAX_ENTRIES
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            ollama_base_url: default_ollama_base_url(),
            ollama_model: default_ollama_model(),
            openai_api_key: None,
            openai_model: default_openai_model(),
            openai_base_url: None,
            minimax_api_key: None,
            minimax_model: default_minimax_model(),
            minimax_base_url: None,
            request_timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
        }
    }
}

impl ProviderSettings {
    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup; empty values are ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LLM_PROVIDER") {
            self.default_provider = v;
        }
        if let Some(v) = get("OLLAMA_BASE_URL") {
            self.ollama_base_url = v;
        }
        if let Some(v) = get("OLLAMA_MODEL") {
            self.ollama_model = v;
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.openai_api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_MODEL") {
            self.openai_model = v;
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.openai_base_url = Some(v);
        }
        if let Some(v) = get("MINIMAX_API_KEY") {
            self.minimax_api_key = Some(v);
        }
        if let Some(v) = get("MINIMAX_MODEL") {
            self.minimax_model = v;
        }
        if let Some(v) = get("MINIMAX_BASE_URL") {
            self.minimax_base_url = Some(v);
        }
        self
    }

    /// Build the [`ModelConfig`] for one provider family.
    ///
    /// Hosted providers without an API key are rejected here so the factory fails fast.
    pub fn model_config(&self, provider: LlmProvider) -> OliverResult<ModelConfig> {
        let (model_id, api_key, api_base_url) = match provider {
            LlmProvider::Local => (
                self.ollama_model.clone(),
                String::new(),
                Some(self.ollama_base_url.clone()),
            ),
            LlmProvider::OpenAi => (
                self.openai_model.clone(),
                require_key(provider, self.openai_api_key.as_deref())?,
                self.openai_base_url.clone(),
            ),
            LlmProvider::Minimax => (
                self.minimax_model.clone(),
                require_key(provider, self.minimax_api_key.as_deref())?,
                self.minimax_base_url.clone(),
            ),
        };

        Ok(ModelConfig {
            provider,
            model_id,
            api_key,
            api_base_url,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout_secs: self.request_timeout_secs,
        })
    }
}

fn require_key(provider: LlmProvider, key: Option<&str>) -> OliverResult<String> {
    match key {
        Some(k) if !k.trim().is_empty() => Ok(k.to_string()),
        _ => Err(OliverError::Config(format!(
            "Provider {provider} requires an API key"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_provider_aliases() {
        assert_eq!("local".parse::<LlmProvider>().unwrap(), LlmProvider::Local);
        assert_eq!("Ollama".parse::<LlmProvider>().unwrap(), LlmProvider::Local);
        assert_eq!(
            "hosted-openai-compatible".parse::<LlmProvider>().unwrap(),
            LlmProvider::OpenAi
        );
        assert_eq!(
            "hosted-minimax-style".parse::<LlmProvider>().unwrap(),
            LlmProvider::Minimax
        );
        let err = "anthropic".parse::<LlmProvider>().unwrap_err();
        assert!(err.to_string().contains("Unknown provider"));
    }

    #[test]
    fn test_base_url_defaults_and_override() {
        let settings = ProviderSettings {
            minimax_api_key: Some("k".into()),
            ..ProviderSettings::default()
        };
        let minimax = settings.model_config(LlmProvider::Minimax).unwrap();
        assert_eq!(minimax.base_url(), "https://api.minimax.io");
        assert_eq!(minimax.model_id, "MiniMax-M2");

        let local = settings.model_config(LlmProvider::Local).unwrap();
        assert_eq!(local.base_url(), "http://localhost:11434");

        let custom = ModelConfig {
            api_base_url: Some("http://127.0.0.1:9000/".into()),
            ..local
        };
        assert_eq!(custom.base_url(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_hosted_provider_requires_key() {
        let settings = ProviderSettings::default();
        assert!(settings.model_config(LlmProvider::OpenAi).is_err());
        assert!(settings.model_config(LlmProvider::Minimax).is_err());
        assert!(settings.model_config(LlmProvider::Local).is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-test"),
            ("OLLAMA_MODEL", "qwen2.5:7b"),
            ("MINIMAX_API_KEY", "  "),
        ]);
        let settings = ProviderSettings::default()
            .with_overrides(|k| env.get(k).map(|v| (*v).to_string()));
        assert_eq!(settings.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(settings.ollama_model, "qwen2.5:7b");
        assert!(settings.minimax_api_key.is_none());
    }

    #[test]
    fn test_settings_from_partial_toml() {
        let settings: ProviderSettings = toml::from_str(
            r#"
            default_provider = "minimax"
            minimax_api_key = "mm-key"
            cache_ttl_secs = 0
            "#,
        )
        .unwrap();
        assert_eq!(settings.default_provider, "minimax");
        assert_eq!(settings.ollama_model, "llama3.1:8b");
        assert_eq!(settings.cache_ttl_secs, 0);
        assert_eq!(settings.cache_max_entries, 1024);
        assert_eq!(settings.request_timeout_secs, 60);
    }
}
