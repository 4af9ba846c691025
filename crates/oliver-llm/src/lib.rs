//! Language-model provider layer.
//!
//! Everything the orchestrator needs from a model is `text in → text out, or an error`.
//! This crate supplies that contract ([`LanguageModel`]), the concrete HTTP backends,
//! a name-based factory, a task-aware [`ModelRouter`] and a TTL response cache.

/// Provider contract and HTTP backends.
pub mod backends;
/// TTL response cache.
pub mod cache;
/// Provider settings.
pub mod config;
/// Task-aware provider selection.
pub mod router;

pub use backends::{create_provider, LanguageModel};
pub use cache::{CachedModel, ResponseCache};
pub use config::{LlmProvider, ModelConfig, ProviderSettings};
pub use router::{ModelRouter, Priority, TaskType};
