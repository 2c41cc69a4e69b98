//! Text-embedded tool calls.
//!
//! Some configured models do not honor native tool schemas: the schemas go
//! into the system prompt as text and the model answers with JSON objects of
//! the form `{"name": "...", "parameters": {...}}` inline in its content.
//! This module renders the prompt block and scans responses for such calls.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use hermes_domain::chat::{ToolCall, ToolDefinition};

fn call_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?s)\{[^{}]*"name"\s*:\s*"[^"]+"\s*,\s*"parameters"\s*:\s*\{[^{}]*\}[^{}]*\}"#,
        )
        .expect("tool-call pattern is a valid regex")
    })
}

/// Render the textual schema block appended to the system prompt for models
/// without native function calling.
pub fn render_schema_block(tools: &[ToolDefinition]) -> String {
    let mut block = String::from(
        "\n\nFerramentas disponíveis. Para invocar uma ferramenta, responda \
         com um objeto JSON no formato \
         {\"name\": \"nome_da_ferramenta\", \"parameters\": {...}}:\n",
    );
    for tool in tools {
        block.push_str(&format!(
            "- {}: {}\n  parameters: {}\n",
            tool.name, tool.description, tool.parameters
        ));
    }
    block
}

/// Scan response content for embedded tool calls.
///
/// Matches are taken in document order; only names present in `registered`
/// become calls. Returns the content with the matched JSON stripped, plus
/// the synthesized calls.
pub fn extract_tool_calls(
    content: &str,
    registered: &HashSet<String>,
) -> (String, Vec<ToolCall>) {
    let mut calls = Vec::new();
    let mut cleaned = content.to_string();

    for m in call_pattern().find_iter(content) {
        let Ok(parsed) = serde_json::from_str::<serde_json::Value>(m.as_str()) else {
            continue;
        };
        let Some(name) = parsed.get("name").and_then(|v| v.as_str()) else {
            continue;
        };
        if !registered.contains(name) {
            continue;
        }
        let arguments = parsed
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        calls.push(ToolCall {
            id: synth_call_id(),
            name: name.to_string(),
            arguments,
        });
        cleaned = cleaned.replace(m.as_str(), "");
    }

    (cleaned.trim().to_string(), calls)
}

fn synth_call_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("call_{}", &hex[..8])
}
