use crate::types::{AgentDefinition, WorkflowDefinition};

/// Model identifier used by the built-in agents; resolves to the default provider.
pub const FALLBACK_MODEL: &str = "local/default";

/// The built-in agent set registered when no catalog can be loaded.
pub fn fallback_agents() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition::new(
            "thought-processor",
            "Thought Processor",
            FALLBACK_MODEL,
            THOUGHT_PROCESSOR_PROMPT,
        )
        .with_tools(&["analyze_thought", "extract_insights", "generate_summary"])
        .with_spawnable(&["pattern-recognizer", "knowledge-extractor"]),
        AgentDefinition::new(
            "pattern-recognizer",
            "Pattern Recognizer",
            FALLBACK_MODEL,
            PATTERN_RECOGNIZER_PROMPT,
        )
        .with_tools(&["recognize_patterns", "identify_trends", "analyze_correlations"])
        .with_spawnable(&["insight-generator"]),
        AgentDefinition::new(
            "knowledge-extractor",
            "Knowledge Extractor",
            FALLBACK_MODEL,
            KNOWLEDGE_EXTRACTOR_PROMPT,
        )
        .with_tools(&["extract_knowledge", "build_graph", "update_database"]),
        AgentDefinition::new(
            "collaboration-coordinator",
            "Collaboration Coordinator",
            FALLBACK_MODEL,
            COLLABORATION_COORDINATOR_PROMPT,
        )
        .with_tools(&["coordinate_agents", "manage_workflows", "resolve_conflicts"])
        .with_spawnable(&["workflow-optimizer", "conflict-resolver"]),
        AgentDefinition::new(
            "bureaucracy-disruptor",
            "Bureaucracy Disruptor",
            FALLBACK_MODEL,
            BUREAUCRACY_DISRUPTOR_PROMPT,
        )
        .with_tools(&["analyze_processes", "identify_inefficiencies", "propose_solutions"])
        .with_spawnable(&["process-optimizer", "automation-specialist"]),
        AgentDefinition::new(
            "code-generator",
            "Code Generator",
            FALLBACK_MODEL,
            CODE_GENERATOR_PROMPT,
        )
        .with_tools(&["generate_code", "review_code", "optimize_code"])
        .with_spawnable(&["test-generator", "documentation-generator"]),
    ]
}

/// Workflows that only reference [`fallback_agents`].
pub fn fallback_workflows() -> Vec<WorkflowDefinition> {
    vec![WorkflowDefinition::from_steps(
        "code-generation",
        "Code Generation",
        vec![
            (
                "thought-processor",
                "Break the following request into requirements, constraints and open questions: {input}",
                vec![],
            ),
            (
                "code-generator",
                "Implement the request using the requirements above.",
                vec![0],
            ),
            (
                "bureaucracy-disruptor",
                "Review the generated code for unnecessary complexity and propose simplifications.",
                vec![1],
            ),
        ],
    )
    .with_description("Plan, implement and review code for a request")]
}

const THOUGHT_PROCESSOR_PROMPT: &str = "\
You process raw thoughts and notes. Extract the key insights, the concepts they touch, \
and any action items. Finish with a line 'Related topics:' followed by a comma-separated list.";

const PATTERN_RECOGNIZER_PROMPT: &str = "\
You recognize patterns and trends in data and thoughts. Name each pattern explicitly, \
say whether it is increasing, decreasing, stable or recurring, and recommend what to do about it.";

const KNOWLEDGE_EXTRACTOR_PROMPT: &str = "\
You extract and structure knowledge. List the entities involved, define the concepts, \
and write relationships as 'A -> B' lines.";

const COLLABORATION_COORDINATOR_PROMPT: &str = "\
You coordinate multiple agents and manage collaborative workflows. Produce a numbered plan, \
assign an owner to each step and call out conflicts or blockers.";

const BUREAUCRACY_DISRUPTOR_PROMPT: &str = "\
You identify and eliminate bureaucratic inefficiencies in processes and workflows. \
Point out redundant or manual steps, bottlenecks and delays, and propose what to automate.";

const CODE_GENERATOR_PROMPT: &str = "\
You generate high-quality, maintainable code. Put every file in a fenced code block tagged \
with its language, and add short notes about assumptions and tests.";
