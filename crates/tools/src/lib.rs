//! Tool registry and the built-in tool set of the Hermes agent.
//!
//! Tools receive already-decoded arguments plus a [`ToolContext`] carrying
//! the session id, the cancellation flag, the progress sink and handles to
//! the collaborators they delegate to (sandbox, model client, retrieval
//! store).

pub mod delegate;
pub mod files;
pub mod finish;
pub mod media;
pub mod memory;
pub mod registry;
pub mod script;
pub mod security;
pub mod shell;
pub mod web_search;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use hermes_domain::chat::{ToolDefinition, ToolParameter};
use hermes_domain::config::{LlmConfig, ToolsConfig};
use hermes_domain::progress::{CancelToken, ProgressSink};
use hermes_memory::RetrievalStore;
use hermes_providers::ChatProvider;
use hermes_sandbox::{OutputChunk, SandboxManager};

pub use registry::ToolRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of one tool invocation. Failures are data, not errors: they are
/// surfaced to the model so it can self-correct.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    /// Set by `finish_task` to signal the orchestrator its work is done.
    pub task_completed: bool,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            task_completed: false,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            task_completed: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-invocation context injected by the orchestrator before dispatch.
#[derive(Clone)]
pub struct ToolContext {
    /// Conversation id; also the sandbox session key.
    pub session_id: String,
    pub cancel: CancelToken,
    pub progress: Arc<dyn ProgressSink>,
    pub sandbox: Arc<SandboxManager>,
    pub model: Arc<dyn ChatProvider>,
    pub retrieval: Arc<dyn RetrievalStore>,
    pub tools: ToolsConfig,
    pub llm: LlmConfig,
    /// Directories file tools are allowed to touch.
    pub allowed_roots: Vec<PathBuf>,
}

impl ToolContext {
    /// Bounded chunk queue whose consumer forwards sandbox output to the
    /// progress sink. The producer side goes to the sandbox manager; the
    /// returned handle ends when the channel closes.
    pub fn log_forwarder(
        &self,
        tool: &'static str,
    ) -> (mpsc::Sender<OutputChunk>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<OutputChunk>(64);
        let progress = self.progress.clone();
        let handle = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                progress.log(tool, &chunk.text, chunk.is_error).await;
            }
        });
        (tx, handle)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> Vec<ToolParameter>;

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutcome;

    /// Provider-facing schema, rendered from the declared parameters.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::from_parameters(self.name(), self.description(), &self.parameters())
    }
}

// ── Argument helpers shared by the tool impls ─────────────────────

pub(crate) fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

pub(crate) fn arg_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(|v| v.as_u64())
}

pub(crate) fn arg_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(|v| v.as_bool())
}
