use crate::backends::{create_provider, LanguageModel};
use crate::cache::{CachedModel, ResponseCache};
use crate::config::{LlmProvider, ProviderSettings};
use oliver_core::{OliverError, OliverResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Declared kind of work, used to pick a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Anything without a better match.
    General,
    /// Conversational replies.
    Chat,
    /// Multi-step reasoning.
    Reasoning,
    /// Writing or editing code.
    CodeGeneration,
    /// Spotting patterns in supplied data.
    PatternAnalysis,
    /// Condensing text.
    Summarization,
}

impl FromStr for TaskType {
    type Err = OliverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "general" => Ok(TaskType::General),
            "chat" => Ok(TaskType::Chat),
            "reasoning" => Ok(TaskType::Reasoning),
            "code" | "code_generation" => Ok(TaskType::CodeGeneration),
            "analysis" | "pattern_analysis" => Ok(TaskType::PatternAnalysis),
            "summary" | "summarization" => Ok(TaskType::Summarization),
            other => Err(OliverError::Config(format!("Unknown task type: {other}"))),
        }
    }
}

/// Declared urgency of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work.
    Low,
    /// The default.
    #[default]
    Normal,
    /// Prefer the strongest available backend.
    High,
}

impl FromStr for Priority {
    type Err = OliverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" | "medium" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(OliverError::Config(format!("Unknown priority: {other}"))),
        }
    }
}

/// Picks a [`LanguageModel`] by task type/priority or by a `"provider/model"` identifier.
///
/// There is always a default provider, so selection never fails outright; the system
/// degrades to the local backend when no hosted backend is configured.
pub struct ModelRouter {
    providers: HashMap<String, Arc<dyn LanguageModel>>,
    default: String,
    fallback_to_default: bool,
}

impl ModelRouter {
    /// Create a router whose default (and only) provider is `model`.
    pub fn new(name: impl Into<String>, model: Arc<dyn LanguageModel>) -> Self {
        let name = canonical(&name.into());
        let mut providers = HashMap::new();
        providers.insert(name.clone(), model);
        Self {
            providers,
            default: name,
            fallback_to_default: true,
        }
    }

    /// Register an additional provider under `name` (aliases are normalised).
    pub fn with_provider(mut self, name: impl Into<String>, model: Arc<dyn LanguageModel>) -> Self {
        self.providers.insert(canonical(&name.into()), model);
        self
    }

    /// Whether unknown providers in a model identifier resolve to the default.
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_to_default = enabled;
        self
    }

    /// Build the router from settings: the local backend is always registered,
    /// hosted backends only when their API key is present.
    pub fn from_settings(settings: &ProviderSettings) -> OliverResult<Self> {
        let cache = (settings.cache_ttl_secs > 0).then(|| {
            Arc::new(ResponseCache::with_max_entries(
                Duration::from_secs(settings.cache_ttl_secs),
                settings.cache_max_entries,
            ))
        });
        let wrap = |model: Arc<dyn LanguageModel>| -> Arc<dyn LanguageModel> {
            match &cache {
                Some(c) => Arc::new(CachedModel::new(model, c.clone())),
                None => model,
            }
        };

        let local = create_provider(LlmProvider::Local.as_str(), settings)?;
        let mut router = Self::new(LlmProvider::Local.as_str(), wrap(local));

        for provider in [LlmProvider::OpenAi, LlmProvider::Minimax] {
            match create_provider(provider.as_str(), settings) {
                Ok(model) => {
                    info!(provider = %provider, model = %model.model(), "Registered LLM provider");
                    router = router.with_provider(provider.as_str(), wrap(model));
                }
                Err(e) => info!(provider = %provider, reason = %e, "LLM provider not configured"),
            }
        }

        let wanted = canonical(&settings.default_provider);
        if router.providers.contains_key(&wanted) {
            router.default = wanted;
        } else {
            warn!(
                requested = %settings.default_provider,
                "Default provider unavailable, using local"
            );
        }
        Ok(router)
    }

    /// The provider used when nothing more specific matches.
    pub fn default_provider(&self) -> Arc<dyn LanguageModel> {
        // `default` is always a key of `providers`.
        self.providers[&self.default].clone()
    }

    /// Canonical name of the default provider.
    pub fn default_name(&self) -> &str {
        &self.default
    }

    /// Look up a provider by name or alias.
    pub fn get(&self, name: &str) -> Option<Arc<dyn LanguageModel>> {
        self.providers.get(&canonical(name)).cloned()
    }

    /// Registered provider names, sorted.
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Choose a provider for a declared task type and priority.
    pub fn select(&self, task: TaskType, priority: Priority) -> Arc<dyn LanguageModel> {
        let hosted_first = priority == Priority::High
            || matches!(task, TaskType::CodeGeneration | TaskType::Reasoning);

        if priority == Priority::Low {
            if let Some(local) = self.providers.get(LlmProvider::Local.as_str()) {
                return local.clone();
            }
        } else if hosted_first {
            for name in [LlmProvider::Minimax.as_str(), LlmProvider::OpenAi.as_str()] {
                if let Some(model) = self.providers.get(name) {
                    return model.clone();
                }
            }
        }
        self.default_provider()
    }

    /// Resolve a `"provider/model"` identifier to a registered provider.
    ///
    /// Returns the default provider when the named one is missing and fallback is
    /// enabled; callers can tell from [`LanguageModel::name`] that a substitution happened.
    pub fn resolve(&self, model_identifier: &str) -> Option<Arc<dyn LanguageModel>> {
        let provider = model_identifier
            .split_once('/')
            .map_or(model_identifier, |(p, _)| p)
            .trim();

        if provider.is_empty() {
            return Some(self.default_provider());
        }
        if let Some(model) = self.get(provider) {
            return Some(model);
        }
        if self.fallback_to_default {
            warn!(
                requested = %model_identifier,
                using = %self.default,
                "Provider not configured, falling back to default"
            );
            Some(self.default_provider())
        } else {
            None
        }
    }
}

fn canonical(name: &str) -> String {
    name.parse::<LlmProvider>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|_| name.trim().to_ascii_lowercase())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl LanguageModel for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn model(&self) -> &str {
            "test-model"
        }
        async fn generate(&self, _prompt: &str, _context: Option<&str>) -> OliverResult<String> {
            Ok(self.0.to_string())
        }
    }

    fn full_router() -> ModelRouter {
        ModelRouter::new("local", Arc::new(Named("local")))
            .with_provider("hosted-openai-compatible", Arc::new(Named("openai")))
            .with_provider("minimax", Arc::new(Named("minimax")))
    }

    #[test]
    fn test_select_by_task_and_priority() {
        let router = full_router();
        assert_eq!(router.select(TaskType::CodeGeneration, Priority::Normal).name(), "minimax");
        assert_eq!(router.select(TaskType::Chat, Priority::High).name(), "minimax");
        assert_eq!(router.select(TaskType::Reasoning, Priority::Low).name(), "local");
        assert_eq!(router.select(TaskType::Chat, Priority::Normal).name(), "local");
    }

    #[test]
    fn test_select_degrades_to_local() {
        let router = ModelRouter::new("local", Arc::new(Named("local")));
        assert_eq!(router.select(TaskType::CodeGeneration, Priority::High).name(), "local");
    }

    #[test]
    fn test_resolve_identifier() {
        let router = full_router();
        assert_eq!(router.resolve("openai/gpt-4").unwrap().name(), "openai");
        assert_eq!(router.resolve("hosted-minimax-style/MiniMax-M2").unwrap().name(), "minimax");
        assert_eq!(router.resolve("ollama").unwrap().name(), "local");
        assert_eq!(router.resolve("").unwrap().name(), "local");
    }

    #[test]
    fn test_resolve_unknown_provider() {
        let router = full_router();
        assert_eq!(router.resolve("anthropic/claude").unwrap().name(), "local");

        let strict = full_router().with_fallback(false);
        assert!(strict.resolve("anthropic/claude").is_none());
    }

    #[test]
    fn test_from_settings_registers_configured_providers() {
        let settings = ProviderSettings {
            default_provider: "minimax".into(),
            minimax_api_key: Some("mm".into()),
            ..ProviderSettings::default()
        };
        let router = ModelRouter::from_settings(&settings).unwrap();
        assert_eq!(router.provider_names(), vec!["local", "minimax"]);
        assert_eq!(router.default_name(), "minimax");
        assert_eq!(router.default_provider().model(), "MiniMax-M2");
    }

    #[test]
    fn test_from_settings_unavailable_default_uses_local() {
        let settings = ProviderSettings {
            default_provider: "openai".into(),
            cache_ttl_secs: 0,
            ..ProviderSettings::default()
        };
        let router = ModelRouter::from_settings(&settings).unwrap();
        assert_eq!(router.default_name(), "local");
        assert_eq!(router.provider_names(), vec!["local"]);
    }

    #[test]
    fn test_parse_task_and_priority() {
        assert_eq!("code".parse::<TaskType>().unwrap(), TaskType::CodeGeneration);
        assert_eq!("pattern-analysis".parse::<TaskType>().unwrap(), TaskType::PatternAnalysis);
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }
}
