//! Name→implementation map and dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use hermes_domain::chat::ToolDefinition;

use crate::{Tool, ToolContext, ToolOutcome};

pub struct ToolRegistry {
    by_name: HashMap<&'static str, Arc<dyn Tool>>,
    /// Registration order, kept for stable schema listings.
    order: Vec<&'static str>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Registry with the full built-in tool set.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::script::ExecutePythonTool));
        registry.register(Arc::new(crate::shell::ExecuteShellTool));
        registry.register(Arc::new(crate::files::ReadFileTool));
        registry.register(Arc::new(crate::files::WriteFileTool));
        registry.register(Arc::new(crate::media::DownloadMediaTool));
        registry.register(Arc::new(crate::media::TranscribeMediaTool));
        registry.register(Arc::new(crate::memory::SearchProceduresTool));
        registry.register(Arc::new(crate::memory::ManageMemoryTool));
        registry.register(Arc::new(crate::web_search::WebSearchTool));
        registry.register(Arc::new(crate::delegate::CallExternalModelTool));
        registry.register(Arc::new(crate::finish::FinishTaskTool));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        if self.by_name.insert(name, tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// All tool definitions, in registration order.
    pub fn schemas(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.by_name.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    /// Dispatch an invocation. Unknown names come back as a soft failure
    /// the model can recover from, never a fatal error.
    pub async fn invoke(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(tool) = self.by_name.get(name) else {
            tracing::error!(name, "tool not found");
            return ToolOutcome::err(format!("Ferramenta não encontrada: {name}"));
        };
        tool.execute(args, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use async_trait::async_trait;
    use hermes_domain::chat::ToolParameter;
    use hermes_domain::config::{LlmConfig, PathsConfig, SandboxConfig, ToolsConfig};
    use hermes_domain::progress::{CancelToken, NullSink};
    use hermes_memory::NoopRetrievalStore;
    use hermes_providers::ModelClient;
    use hermes_sandbox::SandboxManager;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn description(&self) -> &'static str {
            "echoes"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![ToolParameter::required("text", "string", "text")]
        }
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolOutcome {
            ToolOutcome::ok(args["text"].as_str().unwrap_or("").to_string())
        }
    }

    fn context() -> ToolContext {
        let paths = PathsConfig::default();
        ToolContext {
            session_id: "test".into(),
            cancel: CancelToken::new(),
            progress: std::sync::Arc::new(NullSink),
            sandbox: std::sync::Arc::new(SandboxManager::new(
                SandboxConfig::default(),
                &paths,
            )),
            model: std::sync::Arc::new(ModelClient::from_config(&LlmConfig::default())),
            retrieval: std::sync::Arc::new(NoopRetrievalStore),
            tools: ToolsConfig::default(),
            llm: LlmConfig::default(),
            allowed_roots: vec![PathBuf::from("/app/data")],
        }
    }

    #[tokio::test]
    async fn invoke_dispatches_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let outcome = registry
            .invoke("echo", serde_json::json!({ "text": "oi" }), &context())
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.output, "oi");
    }

    #[tokio::test]
    async fn unknown_tool_is_a_soft_failure() {
        let registry = ToolRegistry::new();
        let outcome = registry
            .invoke("ghost", serde_json::json!({}), &context())
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("Ferramenta não encontrada"));
        assert!(!outcome.task_completed);
    }

    #[test]
    fn builtin_set_is_complete() {
        let registry = ToolRegistry::builtin();
        for name in [
            "execute_python",
            "execute_shell",
            "read_file",
            "write_file",
            "download_media",
            "transcribe_media",
            "search_procedures",
            "manage_memory",
            "web_search",
            "call_external_model",
            "finish_task",
        ] {
            assert!(registry.contains(name), "missing {name}");
        }
        assert_eq!(registry.schemas().len(), registry.len());
    }

    #[test]
    fn re_registration_replaces_without_duplicating() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.schemas().len(), 1);
    }
}
