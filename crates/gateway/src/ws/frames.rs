//! WebSocket frame vocabulary — every frame is a JSON object with a
//! mandatory `type` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound (observer → server)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Message {
        #[serde(default)]
        content: String,
        #[serde(default)]
        attached_files: Vec<String>,
        /// Partial model selection: keys primary/secondary/tertiary.
        #[serde(default)]
        models: HashMap<String, String>,
        #[serde(default)]
        background: bool,
    },
    Cancel,
    Ping,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound (server → observer)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Status {
        status: &'static str,
    },
    Message {
        role: &'static str,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<Value>>,
    },
    ToolStart {
        tool: String,
        tool_id: String,
    },
    ToolResult {
        tool: String,
        tool_id: String,
        result: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    /// Streamed sandbox output.
    ToolLog {
        tool: String,
        output: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    /// Orchestrator narration.
    BackendLog {
        message: String,
    },
    TaskCreated {
        task_id: String,
        conversation_id: String,
    },
    TaskProgress {
        task_id: String,
        conversation_id: String,
        message: String,
        step_type: String,
    },
    TaskStatus {
        task_id: String,
        conversation_id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<Value>>,
    },
    ConversationCreated {
        conversation_id: String,
    },
    Cancelled,
    Error {
        content: String,
    },
    Pong,
}

impl Frame {
    pub fn processing() -> Self {
        Frame::Status {
            status: "processing",
        }
    }

    pub fn idle() -> Self {
        Frame::Status { status: "idle" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_message_parses_with_defaults() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type": "message", "content": "Oi"}"#).unwrap();
        match frame {
            ClientFrame::Message {
                content,
                attached_files,
                models,
                background,
            } => {
                assert_eq!(content, "Oi");
                assert!(attached_files.is_empty());
                assert!(models.is_empty());
                assert!(!background);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn inbound_cancel_and_ping_parse() {
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"type": "cancel"}"#).unwrap(),
            ClientFrame::Cancel
        ));
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"type": "ping"}"#).unwrap(),
            ClientFrame::Ping
        ));
    }

    #[test]
    fn unknown_inbound_type_is_an_error() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type": "mystery"}"#).is_err());
    }

    #[test]
    fn outbound_frames_are_type_tagged() {
        let json = serde_json::to_value(Frame::processing()).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["status"], "processing");

        let json = serde_json::to_value(Frame::TaskProgress {
            task_id: "t1".into(),
            conversation_id: "c1".into(),
            message: "Iteração 1".into(),
            step_type: "info".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "task_progress");
        assert_eq!(json["conversation_id"], "c1");
    }

    #[test]
    fn optional_fields_are_omitted() {
        let json = serde_json::to_string(&Frame::Message {
            role: "assistant",
            content: "Olá.".into(),
            message_id: None,
            tool_calls: None,
        })
        .unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("message_id"));

        let json = serde_json::to_string(&Frame::ToolResult {
            tool: "execute_shell".into(),
            tool_id: "call_1".into(),
            result: "ok".into(),
            is_error: false,
        })
        .unwrap();
        assert!(!json.contains("is_error"));
    }
}
