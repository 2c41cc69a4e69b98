//! OpenRouter-style chat-completion client.
//!
//! A single `POST {base_url}/chat/completions` wire shape covers every
//! configured tier. Attribution headers (`HTTP-Referer`, `X-Title`) and the
//! bearer token are opaque pass-through configuration.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::Value;

use hermes_domain::chat::{Message, Role, ToolCall, ToolDefinition};
use hermes_domain::config::LlmConfig;

use crate::{sanitize, textcall};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error taxonomy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Failure modes the orchestrator's tiered fallback reacts to.
#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Provider returned neither content nor tool calls.
    #[error("empty response from provider")]
    Empty,

    /// Tool calls present but their arguments could not be decoded.
    #[error("malformed tool calls: {0}")]
    Malformed(String),

    #[error("transport: {0}")]
    Transport(String),
}

/// A decoded chat completion.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ModelClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    referer: Option<String>,
    title: Option<String>,
    /// Model-id markers for providers without native function calling.
    text_tool_markers: Vec<String>,
    temperature: f32,
    max_tokens: u32,
}

impl ModelClient {
    pub fn from_config(cfg: &LlmConfig) -> Self {
        let api_key = std::env::var(&cfg.api_key_env).unwrap_or_default();

        // Per-tier deadlines are enforced by the caller-supplied timeout;
        // the transport only bounds connection establishment.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            referer: cfg.referer.clone(),
            title: cfg.title.clone(),
            text_tool_markers: cfg.text_tool_markers.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        }
    }

    /// Whether this model id belongs to a provider that cannot honor native
    /// tool schemas (calls are embedded in the response text instead).
    pub fn is_text_tool_model(&self, model: &str) -> bool {
        let lower = model.to_lowercase();
        self.text_tool_markers
            .iter()
            .any(|marker| lower.contains(&marker.to_lowercase()))
    }

    /// One chat completion with the given deadline.
    pub async fn chat(
        &self,
        messages: &[Message],
        model: &str,
        tools: Option<&[ToolDefinition]>,
        timeout: Duration,
    ) -> Result<ChatOutcome, ModelError> {
        let text_mode = self.is_text_tool_model(model);
        let body = self.build_body(messages, model, tools, text_mode);

        tracing::debug!(
            model,
            messages = messages.len(),
            tools = tools.map(|t| t.len()).unwrap_or(0),
            text_mode,
            "sending chat completion"
        );

        let response = tokio::time::timeout(timeout, self.post_completions(&body))
            .await
            .map_err(|_| ModelError::Timeout(timeout))??;

        let outcome = parse_response(&response)?;

        // For text-tool providers, recover calls embedded in the content.
        // When calls are found the visible content is dropped (the JSON was
        // the whole point of the message); otherwise it passes through.
        let outcome = match (text_mode, tools) {
            (true, Some(tools)) if !tools.is_empty() => {
                let registered: HashSet<String> =
                    tools.iter().map(|t| t.name.clone()).collect();
                let (_cleaned, calls) =
                    textcall::extract_tool_calls(&outcome.content, &registered);
                if calls.is_empty() {
                    outcome
                } else {
                    ChatOutcome {
                        content: String::new(),
                        tool_calls: calls,
                    }
                }
            }
            _ => outcome,
        };

        if outcome.content.trim().is_empty() && outcome.tool_calls.is_empty() {
            return Err(ModelError::Empty);
        }

        tracing::debug!(
            model,
            content_len = outcome.content.len(),
            tool_calls = outcome.tool_calls.len(),
            "chat completion received"
        );
        Ok(outcome)
    }

    /// Cheap availability probe: 5-token ping with a 10 s deadline.
    pub async fn health(&self, model: &str) -> bool {
        let body = serde_json::json!({
            "model": model,
            "messages": [{ "role": "user", "content": "ping" }],
            "max_tokens": 5,
        });
        matches!(
            tokio::time::timeout(Duration::from_secs(10), self.post_completions(&body)).await,
            Ok(Ok(_))
        )
    }

    // ── Internal ──────────────────────────────────────────────────

    fn build_body(
        &self,
        messages: &[Message],
        model: &str,
        tools: Option<&[ToolDefinition]>,
        text_mode: bool,
    ) -> Value {
        let wire_messages: Vec<Value> = match (text_mode, tools) {
            // Text mode: schemas travel inside the system prompt instead of
            // the `tools` field.
            (true, Some(tools)) if !tools.is_empty() => {
                let block = textcall::render_schema_block(tools);
                let mut appended = false;
                let mut out = Vec::with_capacity(messages.len());
                for msg in messages {
                    if !appended && msg.role == Role::System {
                        let mut sys = msg.clone();
                        sys.content.push_str(&block);
                        out.push(msg_to_wire(&sys));
                        appended = true;
                    } else {
                        out.push(msg_to_wire(msg));
                    }
                }
                if !appended {
                    out.insert(0, serde_json::json!({ "role": "system", "content": block }));
                }
                out
            }
            _ => messages.iter().map(msg_to_wire).collect(),
        };

        let mut body = serde_json::json!({
            "model": model,
            "messages": wire_messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        if !text_mode {
            if let Some(tools) = tools {
                if !tools.is_empty() {
                    let wire: Vec<Value> = tools.iter().map(|t| t.to_wire()).collect();
                    body["tools"] = Value::Array(wire);
                    body["tool_choice"] = Value::String("auto".into());
                }
            }
        }
        body
    }

    async fn post_completions(&self, body: &Value) -> Result<Value, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if let Some(referer) = &self.referer {
            req = req.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.title {
            req = req.header("X-Title", title);
        }

        let resp = req
            .json(body)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ModelError::Transport(format!(
                "HTTP {} - {}",
                status.as_u16(),
                truncate(&text, 300)
            )));
        }

        serde_json::from_str(&text)
            .map_err(|e| ModelError::Transport(format!("invalid response body: {e}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.as_deref().unwrap_or(""),
            "content": msg.content,
        }),
        Role::Assistant => {
            let mut obj = serde_json::json!({
                "role": "assistant",
                "content": msg.content,
            });
            if let Some(calls) = &msg.tool_calls {
                if !calls.is_empty() {
                    let wire: Vec<Value> = calls
                        .iter()
                        .map(|tc| {
                            serde_json::json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                    obj["tool_calls"] = Value::Array(wire);
                }
            }
            obj
        }
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content,
        }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_response(body: &Value) -> Result<ChatOutcome, ModelError> {
    let message = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|c| c.get("message"))
        .ok_or(ModelError::Empty)?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let tool_calls = parse_wire_tool_calls(message)?;

    Ok(ChatOutcome {
        content,
        tool_calls,
    })
}

fn parse_wire_tool_calls(message: &Value) -> Result<Vec<ToolCall>, ModelError> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Ok(Vec::new()),
    };

    let mut calls = Vec::with_capacity(arr.len());
    for tc in arr {
        let id = tc
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let func = tc
            .get("function")
            .ok_or_else(|| ModelError::Malformed("tool call without function".into()))?;
        let name = func
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ModelError::Malformed("tool call without name".into()))?
            .to_string();
        let raw_args = func
            .get("arguments")
            .and_then(|v| v.as_str())
            .unwrap_or("{}");
        let arguments = sanitize::decode_arguments(raw_args).ok_or_else(|| {
            ModelError::Malformed(format!(
                "unparseable arguments for '{name}': {}",
                truncate(raw_args, 120)
            ))
        })?;
        calls.push(ToolCall {
            id,
            name,
            arguments,
        });
    }
    Ok(calls)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while end < s.len() && !s.is_char_boundary(end) {
            end += 1;
        }
        format!("{}…", &s[..end])
    }
}
