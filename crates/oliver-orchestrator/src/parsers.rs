//! Best-effort structuring of free model text, one pure function per agent type.
//!
//! Parsers never fail: text without the expected cues yields sparser fields.

use crate::types::StructuredResult;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Turns raw model text into agent-specific structured fields.
pub type ResponseParser = fn(&str) -> StructuredResult;

const MAX_ITEMS: usize = 10;

static CODE_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```([A-Za-z0-9_+#.-]*)[^\n]*\n(.*?)```").ok());

static NUMBERED_ITEM: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*\d+[.)]\s+(.+)$").ok());

static PROPER_NOUN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-zA-Z0-9]+(?:\s+[A-Z][a-zA-Z0-9]+)*\b").ok());

/// Select the parser for an agent id; unknown ids get [`parse_generic`].
pub fn parser_for(agent_id: &str) -> ResponseParser {
    match agent_id {
        "thought-processor" => parse_thought_processor,
        "pattern-recognizer" => parse_pattern_recognizer,
        "knowledge-extractor" => parse_knowledge_extractor,
        "collaboration-coordinator" => parse_collaboration_coordinator,
        "bureaucracy-disruptor" => parse_bureaucracy_disruptor,
        "code-generator" => parse_code_generator,
        _ => parse_generic,
    }
}

/// `insights`, `related_topics`, `summary`.
pub fn parse_thought_processor(text: &str) -> StructuredResult {
    let mut out = StructuredResult::new();
    out.insert(
        "insights".into(),
        json!(lines_containing(text, &["insight", "key", "concept", "important"])),
    );
    out.insert("related_topics".into(), json!(related_topics(text)));
    out.insert("summary".into(), json!(summary(text)));
    out
}

/// `patterns`, `trends`, `recommendations`.
pub fn parse_pattern_recognizer(text: &str) -> StructuredResult {
    let mut out = StructuredResult::new();
    out.insert("patterns".into(), json!(lines_containing(text, &["pattern"])));
    out.insert(
        "trends".into(),
        json!(keyword_counts(
            text,
            &["increasing", "decreasing", "stable", "recurring", "seasonal"]
        )),
    );
    out.insert(
        "recommendations".into(),
        json!(lines_containing(text, &["recommend", "suggest"])),
    );
    out
}

/// `entities`, `concepts`, `relationships`.
pub fn parse_knowledge_extractor(text: &str) -> StructuredResult {
    let entities: Vec<String> = match PROPER_NOUN.as_ref() {
        Some(re) => {
            let mut seen = Vec::new();
            for m in re.find_iter(text) {
                let entity = m.as_str().to_string();
                if !seen.contains(&entity) {
                    seen.push(entity);
                }
                if seen.len() == MAX_ITEMS * 2 {
                    break;
                }
            }
            seen
        }
        None => Vec::new(),
    };

    let mut out = StructuredResult::new();
    out.insert("entities".into(), json!(entities));
    out.insert(
        "concepts".into(),
        json!(lines_containing(text, &["concept", "definition", "means"])),
    );
    out.insert(
        "relationships".into(),
        json!(lines_containing(text, &["->", "relates to", "depends on", "part of"])),
    );
    out
}

/// Numbered `steps`, `assignments`, `conflicts`.
pub fn parse_collaboration_coordinator(text: &str) -> StructuredResult {
    let mut out = StructuredResult::new();
    out.insert("steps".into(), json!(numbered_items(text)));
    out.insert(
        "assignments".into(),
        json!(lines_containing(text, &["assign", "delegate", "owner", "responsible"])),
    );
    out.insert(
        "conflicts".into(),
        json!(lines_containing(text, &["conflict", "blocker", "risk"])),
    );
    out
}

/// `inefficiencies_identified`, `automation_opportunities`, `recommendations`.
pub fn parse_bureaucracy_disruptor(text: &str) -> StructuredResult {
    let mut out = StructuredResult::new();
    out.insert(
        "inefficiencies_identified".into(),
        json!(lines_containing(
            text,
            &["inefficien", "redundan", "bottleneck", "manual", "delay", "duplicate"]
        )),
    );
    out.insert(
        "automation_opportunities".into(),
        json!(lines_containing(text, &["automat", "streamline", "eliminate"])),
    );
    out.insert(
        "recommendations".into(),
        json!(lines_containing(text, &["recommend", "should", "propose"])),
    );
    out
}

/// Fenced blocks as `generated_code`, plus `notes`.
pub fn parse_code_generator(text: &str) -> StructuredResult {
    let mut blocks = Vec::new();
    let mut languages = Vec::new();
    if let Some(re) = CODE_BLOCK.as_ref() {
        for cap in re.captures_iter(text) {
            let lang = cap.get(1).map_or("", |m| m.as_str());
            let body = cap.get(2).map_or("", |m| m.as_str());
            if !lang.is_empty() && !languages.iter().any(|l: &String| l == lang) {
                languages.push(lang.to_string());
            }
            blocks.push(body.trim_end().to_string());
        }
    }
    let total_lines: usize = blocks.iter().map(|b| b.lines().count()).sum();

    let mut out = StructuredResult::new();
    out.insert(
        "generated_code".into(),
        json!({
            "count": blocks.len(),
            "total_lines": total_lines,
            "languages": languages,
            "blocks": blocks,
        }),
    );
    out.insert(
        "notes".into(),
        json!(lines_containing(strip_code(text).as_str(), &["note", "test", "todo", "assum"])),
    );
    out
}

/// `summary` and `line_count` only.
pub fn parse_generic(text: &str) -> StructuredResult {
    let mut out = StructuredResult::new();
    out.insert("summary".into(), json!(summary(text)));
    out.insert("line_count".into(), json!(text.lines().count()));
    out
}

/// Non-empty lines with list markers and markdown emphasis removed.
fn cleaned_lines(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .map(|line| {
            let line = line.trim();
            let line = line.trim_start_matches('#').trim_start();
            let line = line
                .strip_prefix("- ")
                .or_else(|| line.strip_prefix("* "))
                .or_else(|| line.strip_prefix("• "))
                .unwrap_or(line);
            line.replace("**", "").trim().to_string()
        })
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
}

fn lines_containing(text: &str, needles: &[&str]) -> Vec<String> {
    cleaned_lines(text)
        .filter(|line| {
            let lower = line.to_lowercase();
            needles.iter().any(|n| lower.contains(n))
        })
        .take(MAX_ITEMS)
        .collect()
}

fn numbered_items(text: &str) -> Vec<String> {
    let Some(re) = NUMBERED_ITEM.as_ref() else {
        return Vec::new();
    };
    text.lines()
        .filter_map(|line| re.captures(line))
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().trim().to_string()))
        .take(MAX_ITEMS)
        .collect()
}

fn related_topics(text: &str) -> Vec<String> {
    cleaned_lines(text)
        .filter(|line| line.to_lowercase().contains("topic"))
        .filter_map(|line| line.split_once(':').map(|(_, rest)| rest.to_string()))
        .flat_map(|rest| {
            rest.split(',')
                .map(|t| t.trim().trim_end_matches('.').to_string())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
        })
        .take(MAX_ITEMS)
        .collect()
}

fn keyword_counts(text: &str, keywords: &[&str]) -> BTreeMap<String, usize> {
    let lower = text.to_lowercase();
    keywords
        .iter()
        .map(|k| ((*k).to_string(), lower.matches(k).count()))
        .filter(|(_, n)| *n > 0)
        .collect()
}

fn summary(text: &str) -> Value {
    cleaned_lines(text).next().map_or(Value::Null, Value::String)
}

fn strip_code(text: &str) -> String {
    match CODE_BLOCK.as_ref() {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_thought_processor_fields() {
        let text = "## Analysis\n- Key insight: people batch email in the morning\n\
                    - Mood is calm\nRelated topics: productivity, email, habits.";
        let out = parse_thought_processor(text);
        assert_eq!(out["insights"].as_array().unwrap().len(), 1);
        assert_eq!(out["related_topics"], json!(["productivity", "email", "habits"]));
        assert_eq!(out["summary"], "Analysis");
    }

    #[test]
    fn test_pattern_recognizer_counts_trends() {
        let text = "A recurring pattern appears weekly.\nUsage is increasing, then increasing again.\n\
                    We recommend a digest.";
        let out = parse_pattern_recognizer(text);
        assert_eq!(out["trends"]["increasing"], 2);
        assert_eq!(out["trends"]["recurring"], 1);
        assert!(out["trends"].get("stable").is_none());
        assert_eq!(out["recommendations"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_code_generator_extracts_blocks() {
        let text = "Here you go:\n```python\ndef fib(n):\n    return n\n```\nNote: add tests.\n\
                    ```rust\nfn main() {}\n```";
        let out = parse_code_generator(text);
        let code = &out["generated_code"];
        assert_eq!(code["count"], 2);
        assert_eq!(code["total_lines"], 3);
        assert_eq!(code["languages"], json!(["python", "rust"]));
        assert!(code["blocks"][0].as_str().unwrap().starts_with("def fib"));
        assert_eq!(out["notes"], json!(["Note: add tests."]));
    }

    #[test]
    fn test_collaboration_numbered_steps() {
        let text = "Plan:\n1. Gather requirements\n2) Assign owners to each task\nDone";
        let out = parse_collaboration_coordinator(text);
        assert_eq!(
            out["steps"],
            json!(["Gather requirements", "Assign owners to each task"])
        );
        assert_eq!(out["assignments"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_knowledge_entities_deduplicated() {
        let out = parse_knowledge_extractor("Rust Foundation funds Rust. Rust Foundation -> Cargo");
        let entities = out["entities"].as_array().unwrap();
        assert_eq!(entities[0], "Rust Foundation");
        assert_eq!(entities.iter().filter(|e| *e == "Rust Foundation").count(), 1);
        assert_eq!(out["relationships"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_text_yields_sparse_fields() {
        for id in [
            "thought-processor",
            "pattern-recognizer",
            "knowledge-extractor",
            "collaboration-coordinator",
            "bureaucracy-disruptor",
            "code-generator",
            "unknown",
        ] {
            let parse = parser_for(id);
            let empty = parse("");
            let junk = parse("```\n\u{0}\u{feff}***");
            assert!(!empty.is_empty());
            assert!(!junk.is_empty());
        }
        assert_eq!(parse_generic("")["summary"], Value::Null);
        assert_eq!(parse_code_generator("no code")["generated_code"]["count"], 0);
    }
}
