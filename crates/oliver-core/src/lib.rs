//! Core error definitions shared by every Oliver crate.
//!
//! # Main types
//!
//! - [`OliverError`]: Unified error enum for the provider layer and the orchestrator.
//! - [`OliverResult`]: Convenience alias for `Result<T, OliverError>`.
//! - [`Metadata`]: Open key/value bag carried on requests and executions.

use std::collections::HashMap;

/// Top-level error type.
///
/// Variants are grouped by the layer that raises them: admission control,
/// language-model backends, workflows, and configuration.
#[derive(Debug, thiserror::Error)]
pub enum OliverError {
    /// The requested agent type is not registered.
    #[error("Agent type {0} not found")]
    AgentNotFound(String),

    /// The admission ceiling on concurrently active executions was reached.
    #[error("Capacity exceeded: {active} agents active (limit {limit})")]
    CapacityExceeded {
        /// Executions active when the request was rejected.
        active: usize,
        /// Configured admission ceiling.
        limit: usize,
    },

    /// The backend could not be reached (connection refused, DNS, timeout).
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend answered with a non-success status.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The backend answered successfully but the payload was unusable.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The requested workflow is not registered.
    #[error("Workflow {0} not found")]
    WorkflowNotFound(String),

    /// A workflow step ran before its dependencies produced results.
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// Invalid configuration or definition.
    #[error("Config error: {0}")]
    Config(String),

    /// An internal orchestrator invariant was violated.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OliverError {
    /// Whether this error was raised by admission control rather than by a backend.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            OliverError::AgentNotFound(_) | OliverError::CapacityExceeded { .. }
        )
    }
}

/// A convenience `Result` alias using [`OliverError`].
pub type OliverResult<T> = Result<T, OliverError>;

/// Opaque key/value metadata attached to requests and execution records.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Truncate `text` to at most `max_chars` characters, on a char boundary.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_error_message() {
        let err = OliverError::CapacityExceeded {
            active: 10,
            limit: 10,
        };
        assert_eq!(
            err.to_string(),
            "Capacity exceeded: 10 agents active (limit 10)"
        );
        assert!(err.is_admission());
    }

    #[test]
    fn test_backend_errors_are_not_admission() {
        assert!(!OliverError::Connection("refused".into()).is_admission());
        assert!(!OliverError::Http("500".into()).is_admission());
        assert!(OliverError::AgentNotFound("x".into()).is_admission());
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: OliverError = parse.unwrap_err().into();
        assert!(err.to_string().starts_with("JSON error"));
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        assert_eq!(preview("héllo wörld", 4), "héll");
        assert_eq!(preview("short", 200), "short");
        assert_eq!(preview("", 3), "");
    }
}
