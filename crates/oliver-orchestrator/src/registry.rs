use crate::parsers::{parser_for, ResponseParser};
use crate::types::AgentDefinition;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A definition together with the parser chosen for it at registration time.
#[derive(Clone)]
pub struct RegisteredAgent {
    /// The definition as registered.
    pub definition: Arc<AgentDefinition>,
    /// Turns raw model text into structured fields.
    pub parser: ResponseParser,
}

/// Holds the agent definitions an orchestrator can spawn.
///
/// `register` is the only mutator and is last-write-wins by id.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, RegisteredAgent>>,
}

impl AgentRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Register a definition with the parser matching its id.
    pub fn register(&self, definition: AgentDefinition) {
        let parser = parser_for(&definition.id);
        self.register_with_parser(definition, parser);
    }

    /// Register a definition with an explicit response parser.
    pub fn register_with_parser(&self, definition: AgentDefinition, parser: ResponseParser) {
        info!(
            agent = %definition.id,
            display_name = %definition.display_name,
            model = %definition.model,
            "Registered agent"
        );
        let id = definition.id.clone();
        self.agents.write().insert(
            id,
            RegisteredAgent {
                definition: Arc::new(definition),
                parser,
            },
        );
    }

    /// Look up an agent by id.
    pub fn get(&self, id: &str) -> Option<RegisteredAgent> {
        self.agents.read().get(id).cloned()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.agents.read().contains_key(id)
    }

    /// All definitions, sorted by id.
    pub fn definitions(&self) -> Vec<AgentDefinition> {
        let mut defs: Vec<AgentDefinition> = self
            .agents
            .read()
            .values()
            .map(|a| a.definition.as_ref().clone())
            .collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    /// Whether no agent is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
