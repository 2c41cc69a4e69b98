use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in a conversation (provider-agnostic).
///
/// `tool_calls` is set on assistant messages that requested tools;
/// `tool_call_id` correlates a tool-role message back to the call it answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "new_message_id")]
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_files: Option<Vec<String>>,
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: None,
            tool_call_id: None,
            attached_files: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant message carrying tool calls.
    pub fn assistant_with_tools(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(Role::Assistant, content);
        msg.tool_calls = Some(calls);
        msg
    }

    /// Tool-role message answering a prior tool call.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(call_id.into());
        msg
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool calls and definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Internal tool call format. Provider adapters convert their wire shapes
/// to/from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A single declared parameter of a tool.
#[derive(Debug, Clone)]
pub struct ToolParameter {
    pub name: &'static str,
    pub kind: &'static str,
    pub description: &'static str,
    pub required: bool,
    pub allowed: Option<&'static [&'static str]>,
}

impl ToolParameter {
    pub fn required(name: &'static str, kind: &'static str, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
            allowed: None,
        }
    }

    pub fn optional(name: &'static str, kind: &'static str, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: false,
            allowed: None,
        }
    }

    pub fn with_allowed(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = Some(allowed);
        self
    }
}

/// Tool definition exposed to the model, in the function-calling shape the
/// providers expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Build a definition from a declared parameter list.
    pub fn from_parameters(
        name: &str,
        description: &str,
        params: &[ToolParameter],
    ) -> Self {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for p in params {
            let mut prop = serde_json::Map::new();
            prop.insert("type".into(), serde_json::json!(p.kind));
            prop.insert("description".into(), serde_json::json!(p.description));
            if let Some(allowed) = p.allowed {
                prop.insert("enum".into(), serde_json::json!(allowed));
            }
            // The OpenAI schema requires `items` for arrays.
            if p.kind == "array" {
                prop.insert("items".into(), serde_json::json!({ "type": "string" }));
            }
            properties.insert(p.name.to_string(), serde_json::Value::Object(prop));
            if p.required {
                required.push(p.name);
            }
        }

        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    /// Render as the provider wire shape (`{"type":"function","function":{...}}`).
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Three-tier model selection tried in order by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub primary: String,
    pub secondary: String,
    pub tertiary: String,
}

impl ModelSelection {
    /// Merge a partial per-request selection over the configured defaults.
    pub fn resolve(
        defaults: &ModelSelection,
        overrides: &std::collections::HashMap<String, String>,
    ) -> Self {
        let pick = |key: &str, fallback: &str| {
            overrides
                .get(key)
                .filter(|m| !m.is_empty())
                .cloned()
                .unwrap_or_else(|| fallback.to_string())
        };
        Self {
            primary: pick("primary", &defaults.primary),
            secondary: pick("secondary", &defaults.secondary),
            tertiary: pick("tertiary", &defaults.tertiary),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Progress step types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Classification of a progress entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Info,
    ToolStart,
    ToolEnd,
    Error,
}

impl StepType {
    pub fn as_str(self) -> &'static str {
        match self {
            StepType::Info => "info",
            StepType::ToolStart => "tool_start",
            StepType::ToolEnd => "tool_end",
            StepType::Error => "error",
        }
    }
}

impl std::str::FromStr for StepType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "info" => Ok(StepType::Info),
            "tool_start" => Ok(StepType::ToolStart),
            "tool_end" => Ok(StepType::ToolEnd),
            "error" => Ok(StepType::Error),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_correlation_fields() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "execute_shell".into(),
            arguments: serde_json::json!({ "command": "ls" }),
        };
        let assistant = Message::assistant_with_tools("", vec![call]);
        assert_eq!(assistant.role, Role::Assistant);
        assert_eq!(assistant.tool_calls.as_ref().unwrap().len(), 1);

        let tool = Message::tool_result("call_1", "output");
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn tool_definition_schema_shape() {
        let def = ToolDefinition::from_parameters(
            "read_file",
            "Reads a file",
            &[
                ToolParameter::required("path", "string", "File path"),
                ToolParameter::optional("max_lines", "integer", "Line cap"),
            ],
        );
        let schema = &def.parameters;
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["path"]["type"], "string");
        assert_eq!(schema["required"], serde_json::json!(["path"]));

        let wire = def.to_wire();
        assert_eq!(wire["type"], "function");
        assert_eq!(wire["function"]["name"], "read_file");
    }

    #[test]
    fn tool_definition_array_parameter_gets_items() {
        let def = ToolDefinition::from_parameters(
            "t",
            "d",
            &[ToolParameter::required("names", "array", "List of names")],
        );
        assert_eq!(
            def.parameters["properties"]["names"]["items"]["type"],
            "string"
        );
    }

    #[test]
    fn model_selection_resolve_merges_overrides() {
        let defaults = ModelSelection {
            primary: "openai/gpt-5-nano".into(),
            secondary: "openai/gpt-4.1-nano".into(),
            tertiary: "openai/gpt-4.1-nano".into(),
        };
        let mut overrides = std::collections::HashMap::new();
        overrides.insert("primary".to_string(), "google/gemma-3-27b".to_string());
        overrides.insert("secondary".to_string(), String::new());

        let resolved = ModelSelection::resolve(&defaults, &overrides);
        assert_eq!(resolved.primary, "google/gemma-3-27b");
        assert_eq!(resolved.secondary, "openai/gpt-4.1-nano");
        assert_eq!(resolved.tertiary, "openai/gpt-4.1-nano");
    }

    #[test]
    fn step_type_round_trip() {
        for step in [
            StepType::Info,
            StepType::ToolStart,
            StepType::ToolEnd,
            StepType::Error,
        ] {
            assert_eq!(step.as_str().parse::<StepType>().unwrap(), step);
        }
        assert!("bogus".parse::<StepType>().is_err());
    }

    #[test]
    fn message_serde_skips_absent_options() {
        let msg = Message::user("Oi");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_call_id"));
        assert!(!json.contains("attached_files"));
    }
}
