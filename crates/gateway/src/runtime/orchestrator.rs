//! Agent orchestrator — the model → tool → model loop.
//!
//! Each iteration calls the model through a three-tier fallback (one retry
//! per tier, 1 s apart), dispatches any requested tools, and loops until a
//! terminal: explicit `finish_task`, a natural stop without tool calls
//! (unless completion mode requires the tool), all tiers exhausted, user
//! cancellation, or the iteration cap. Every terminal path releases the
//! conversation's sandbox session exactly once.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;

use hermes_conversations::Conversation;
use hermes_domain::chat::{Message, ModelSelection, StepType, ToolDefinition};
use hermes_domain::config::{LlmConfig, ToolsConfig, WorkerConfig};
use hermes_domain::progress::{CancelToken, ProgressSink};
use hermes_memory::{Procedure, RetrievalStore};
use hermes_providers::{ChatOutcome, ChatProvider};
use hermes_sandbox::SandboxManager;
use hermes_tools::{ToolContext, ToolRegistry};

use crate::prompts;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const TIER_RETRY_DELAY: Duration = Duration::from_secs(1);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Terminal result of one orchestrator invocation.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub content: String,
    /// Tool calls executed during the run, as persisted on the task.
    pub tool_calls: Vec<serde_json::Value>,
    /// Messages generated during the run (assistant tool requests and
    /// tool results), in order. The conversation itself only receives the
    /// final assistant reply, appended by the caller.
    pub transcript: Vec<Message>,
    pub cancelled: bool,
}

impl RunOutcome {
    fn cancelled(tool_calls: Vec<serde_json::Value>, transcript: Vec<Message>) -> Self {
        Self {
            content: "Processamento cancelado pelo usuário.".into(),
            tool_calls,
            transcript,
            cancelled: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    client: Arc<dyn ChatProvider>,
    registry: Arc<ToolRegistry>,
    sandbox: Arc<SandboxManager>,
    retrieval: Arc<dyn RetrievalStore>,
    llm: LlmConfig,
    tools: ToolsConfig,
    allowed_roots: Vec<PathBuf>,
    max_iterations: usize,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ChatProvider>,
        registry: Arc<ToolRegistry>,
        sandbox: Arc<SandboxManager>,
        retrieval: Arc<dyn RetrievalStore>,
        llm: LlmConfig,
        tools: ToolsConfig,
        allowed_roots: Vec<PathBuf>,
        worker: &WorkerConfig,
    ) -> Self {
        Self {
            client,
            registry,
            sandbox,
            retrieval,
            llm,
            tools,
            allowed_roots,
            max_iterations: worker.clamped().max_iterations,
        }
    }

    /// Drive the loop for the latest user message of `conversation`.
    ///
    /// `effective_user_content`, when present, replaces the latest user
    /// message's text in what the model sees (attachment expansion); the
    /// conversation keeps the original. Assistant tool requests and tool
    /// results accumulate in the run's working transcript (returned in the
    /// outcome); the caller appends the final assistant reply.
    pub async fn process_message(
        &self,
        conversation: &Conversation,
        models: &ModelSelection,
        cancel: CancelToken,
        progress: Arc<dyn ProgressSink>,
        require_completion_tool: bool,
        effective_user_content: Option<String>,
    ) -> RunOutcome {
        let span = tracing::info_span!(
            "orchestrator",
            conversation_id = %conversation.id,
            primary = %models.primary,
        );
        self.run_loop(
            conversation,
            models,
            cancel,
            progress,
            require_completion_tool,
            effective_user_content,
        )
        .instrument(span)
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_loop(
        &self,
        conversation: &Conversation,
        models: &ModelSelection,
        cancel: CancelToken,
        progress: Arc<dyn ProgressSink>,
        require_completion_tool: bool,
        effective_user_content: Option<String>,
    ) -> RunOutcome {
        let (t1, t2, t3) = self.llm.tier_timeouts();
        let schemas = self.registry.schemas();

        // ── Working message list ──────────────────────────────────
        // The conversation persists the original user text; the model sees
        // the attachment-expanded form when one was supplied.
        let mut history: Vec<Message> = conversation.messages.to_vec();
        if let Some(effective) = effective_user_content {
            if let Some(last_user) = history
                .iter_mut()
                .rev()
                .find(|m| m.role == hermes_domain::chat::Role::User)
            {
                last_user.content = effective;
            }
        }
        let last_user = history
            .iter()
            .rev()
            .find(|m| m.role == hermes_domain::chat::Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        // ── Context augmentation ──────────────────────────────────
        let mut system = prompts::SYSTEM_PROMPT.to_string();
        if !last_user.is_empty() {
            match self.retrieval.retrieve_context(&last_user).await {
                Ok(context) if !context.is_empty() => {
                    tracing::debug!(len = context.len(), "retrieval context attached");
                    system.push_str(&prompts::rag_context_block(&context));
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "retrieval context lookup failed"),
            }
        }

        let mut messages: Vec<Message> = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(system));
        messages.extend(history);

        let mut transcript: Vec<Message> = Vec::new();
        let mut executed_calls: Vec<serde_json::Value> = Vec::new();
        let mut procedures: Vec<Procedure> = Vec::new();

        // ── Iterations ────────────────────────────────────────────
        for iteration in 1..=self.max_iterations {
            if cancel.is_cancelled() {
                return self
                    .exit_cancelled(conversation, &progress, executed_calls, transcript)
                    .await;
            }

            progress
                .emit(&format!("Iteração do agente ({iteration})"), StepType::Info)
                .await;

            let Some(response) = self
                .call_with_fallback(&messages, models, &schemas, (t1, t2, t3), &progress)
                .await
            else {
                // All tiers exhausted.
                progress
                    .emit("Erro: Falha em todas as instâncias", StepType::Error)
                    .await;
                self.release_session(&conversation.id).await;
                return RunOutcome {
                    content: format!(
                        "Erro: Todos os modelos falharam (1ª: {}, 2ª: {}, 3ª: {})",
                        models.primary, models.secondary, models.tertiary
                    ),
                    tool_calls: executed_calls,
                    transcript,
                    cancelled: false,
                };
            };

            progress.emit("Resposta recebida", StepType::Info).await;

            // ── No tool calls: natural stop or completion nudge ────
            if response.tool_calls.is_empty() {
                if !require_completion_tool {
                    progress.emit("Resposta final gerada", StepType::Info).await;
                    self.record_procedures(procedures).await;
                    self.release_session(&conversation.id).await;
                    return RunOutcome {
                        content: response.content,
                        tool_calls: executed_calls,
                        transcript,
                        cancelled: false,
                    };
                }
                // Background mode: force an explicit finish_task. The nudge
                // stays in the working list only; it is steering, not
                // conversation history.
                tracing::debug!("response without tool calls in completion mode, nudging");
                messages.push(Message::assistant(response.content));
                messages.push(Message::tool_result(
                    "",
                    "Você ainda não finalizou a tarefa. Continue o trabalho e, \
                     quando TUDO estiver concluído, chame a ferramenta \
                     `finish_task` com o resultado final.",
                ));
                continue;
            }

            // ── Tool step ─────────────────────────────────────────
            progress
                .emit(
                    &format!("Executando {} ferramenta(s)", response.tool_calls.len()),
                    StepType::Info,
                )
                .await;

            let assistant = Message::assistant_with_tools(
                response.content.clone(),
                response.tool_calls.clone(),
            );
            messages.push(assistant.clone());
            transcript.push(assistant);

            let mut finished: Option<String> = None;

            for call in &response.tool_calls {
                if cancel.is_cancelled() {
                    return self
                        .exit_cancelled(conversation, &progress, executed_calls, transcript)
                        .await;
                }

                progress
                    .emit(&format!("Executando: {}", call.name), StepType::ToolStart)
                    .await;
                progress.tool_started(&call.name, &call.id).await;

                let ctx = ToolContext {
                    session_id: conversation.id.clone(),
                    cancel: cancel.clone(),
                    progress: progress.clone(),
                    sandbox: self.sandbox.clone(),
                    model: self.client.clone(),
                    retrieval: self.retrieval.clone(),
                    tools: self.tools.clone(),
                    llm: self.llm.clone(),
                    allowed_roots: self.allowed_roots.clone(),
                };

                // Observers get a liveness ping while the tool runs.
                let heartbeat = spawn_heartbeat(progress.clone());
                let tool_span = tracing::info_span!("tool.call", tool = %call.name);
                let outcome = self
                    .registry
                    .invoke(&call.name, call.arguments.clone(), &ctx)
                    .instrument(tool_span)
                    .await;
                heartbeat.abort();

                let tool_result = if outcome.success {
                    if outcome.output.is_empty() {
                        "Executado com sucesso".to_string()
                    } else {
                        outcome.output.clone()
                    }
                } else {
                    format!(
                        "Erro: {}",
                        outcome.error.as_deref().unwrap_or("Erro desconhecido")
                    )
                };

                if outcome.success {
                    progress
                        .emit(
                            &format!("Tool {} executada com sucesso", call.name),
                            StepType::ToolEnd,
                        )
                        .await;
                } else {
                    progress
                        .emit(&format!("Erro na tool {}", call.name), StepType::Error)
                        .await;
                }
                progress
                    .tool_finished(
                        &call.name,
                        &call.id,
                        &truncate(&tool_result, self.tools.broadcast_max_chars),
                        !outcome.success,
                    )
                    .await;

                let tool_msg = Message::tool_result(call.id.clone(), tool_result.clone());
                messages.push(tool_msg.clone());
                transcript.push(tool_msg);

                executed_calls.push(serde_json::json!({
                    "id": call.id,
                    "name": call.name,
                    "arguments": call.arguments,
                    "success": outcome.success,
                }));

                if outcome.success {
                    let arg_names: Vec<String> = call
                        .arguments
                        .as_object()
                        .map(|o| o.keys().cloned().collect())
                        .unwrap_or_default();
                    procedures.push(Procedure {
                        description: format!(
                            "Executou {} com argumentos: {:?}",
                            call.name, arg_names
                        ),
                        solution: truncate(&tool_result, 500),
                        tool_used: call.name.clone(),
                    });
                }

                if outcome.task_completed {
                    let summary = call
                        .arguments
                        .get("result")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| outcome.output.clone());
                    finished = Some(summary);
                }
            }

            if let Some(content) = finished {
                progress.emit("Resposta final gerada", StepType::Info).await;
                self.record_procedures(procedures).await;
                self.release_session(&conversation.id).await;
                return RunOutcome {
                    content,
                    tool_calls: executed_calls,
                    transcript,
                    cancelled: false,
                };
            }
        }

        // ── Iteration cap ─────────────────────────────────────────
        tracing::warn!(
            max_iterations = self.max_iterations,
            "iteration cap reached"
        );
        self.release_session(&conversation.id).await;
        RunOutcome {
            content: "Desculpe, a operação excedeu o limite de iterações. \
                      Por favor, tente novamente com uma tarefa mais simples."
                .into(),
            tool_calls: executed_calls,
            transcript,
            cancelled: false,
        }
    }

    // ── Tier cascade ──────────────────────────────────────────────

    /// Primary → secondary → tertiary, each tried twice with a short pause
    /// between attempts. `None` means every tier failed.
    async fn call_with_fallback(
        &self,
        messages: &[Message],
        models: &ModelSelection,
        schemas: &[ToolDefinition],
        timeouts: (u64, u64, u64),
        progress: &Arc<dyn ProgressSink>,
    ) -> Option<ChatOutcome> {
        progress
            .emit(
                &format!("Enviando para 1ª Instância ({})", models.primary),
                StepType::Info,
            )
            .await;
        if let Some(response) = self
            .call_tier(messages, &models.primary, schemas, timeouts.0)
            .await
        {
            return Some(response);
        }

        progress
            .emit(
                &format!(
                    "Erro em {}, tentando 2ª Instância ({})",
                    models.primary, models.secondary
                ),
                StepType::Info,
            )
            .await;
        if let Some(response) = self
            .call_tier(messages, &models.secondary, schemas, timeouts.1)
            .await
        {
            return Some(response);
        }

        progress
            .emit(
                &format!(
                    "Erro em {}, tentando 3ª Instância ({})",
                    models.secondary, models.tertiary
                ),
                StepType::Info,
            )
            .await;
        self.call_tier(messages, &models.tertiary, schemas, timeouts.2)
            .await
    }

    /// One tier: the provider call with its timeout, retried once after a
    /// short delay on any transient failure (timeout, empty, malformed,
    /// transport).
    async fn call_tier(
        &self,
        messages: &[Message],
        model: &str,
        schemas: &[ToolDefinition],
        timeout_sec: u64,
    ) -> Option<ChatOutcome> {
        let timeout = Duration::from_secs(timeout_sec);
        for attempt in 0..2u8 {
            match self
                .client
                .chat(messages, model, Some(schemas), timeout)
                .await
            {
                Ok(response) => return Some(response),
                Err(e) => {
                    tracing::warn!(model, attempt, error = %e, "model call failed");
                    if attempt == 0 {
                        tokio::time::sleep(TIER_RETRY_DELAY).await;
                    }
                }
            }
        }
        None
    }

    // ── Terminal helpers ──────────────────────────────────────────

    async fn exit_cancelled(
        &self,
        conversation: &Conversation,
        progress: &Arc<dyn ProgressSink>,
        executed_calls: Vec<serde_json::Value>,
        transcript: Vec<Message>,
    ) -> RunOutcome {
        tracing::info!(conversation_id = %conversation.id, "run cancelled by user");
        progress
            .emit("Processamento cancelado pelo usuário", StepType::Info)
            .await;
        self.release_session(&conversation.id).await;
        RunOutcome::cancelled(executed_calls, transcript)
    }

    /// The single guaranteed teardown point for the conversation's sandbox.
    async fn release_session(&self, conversation_id: &str) {
        if let Err(e) = self.sandbox.release(conversation_id).await {
            tracing::error!(conversation_id, error = %e, "sandbox release failed");
        }
    }

    /// Successful terminals push the run's procedures into the retrieval
    /// store. Cancelled runs never reach this.
    async fn record_procedures(&self, procedures: Vec<Procedure>) {
        for procedure in procedures {
            if let Err(e) = self.retrieval.record_procedure(procedure).await {
                tracing::warn!(error = %e, "failed to record procedure");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Periodic "still alive" narration while a tool runs; aborted on tool
/// completion.
fn spawn_heartbeat(progress: Arc<dyn ProgressSink>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let phrases = [
            "Ainda processando sua solicitação...",
            "O processo continua em execução, aguarde...",
            "Executando tarefa complexa...",
            "Trabalhando nisso...",
        ];
        let mut index = 0usize;
        loop {
            tokio::time::sleep(HEARTBEAT_INTERVAL).await;
            progress
                .emit(phrases[index % phrases.len()], StepType::Info)
                .await;
            index += 1;
        }
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end < s.len() && !s.is_char_boundary(end) {
        end += 1;
    }
    format!("{}…", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use hermes_domain::chat::{Role, ToolCall, ToolParameter};
    use hermes_domain::config::{PathsConfig, SandboxConfig};
    use hermes_memory::NoopRetrievalStore;
    use hermes_providers::ModelError;
    use hermes_tools::{Tool, ToolOutcome};

    // ── Scripted provider ───────────────────────────────────────────

    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<ChatOutcome, ModelError>>>,
        /// Models actually contacted, in order.
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<ChatOutcome, ModelError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn contacted(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn chat(
            &self,
            _messages: &[Message],
            model: &str,
            _tools: Option<&[ToolDefinition]>,
            _timeout: Duration,
        ) -> Result<ChatOutcome, ModelError> {
            self.calls.lock().push(model.to_string());
            self.script
                .lock()
                .pop_front()
                .unwrap_or(Err(ModelError::Empty))
        }

        async fn health(&self, _model: &str) -> bool {
            true
        }
    }

    // ── Recording sink ──────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(String, StepType)>>,
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn emit(&self, message: &str, step: StepType) {
            self.events.lock().push((message.to_string(), step));
        }
    }

    impl RecordingSink {
        fn messages(&self) -> Vec<String> {
            self.events.lock().iter().map(|(m, _)| m.clone()).collect()
        }
    }

    // ── Test tools ──────────────────────────────────────────────────

    /// Sets the run's cancel flag when executed.
    struct TripCancelTool;

    #[async_trait]
    impl Tool for TripCancelTool {
        fn name(&self) -> &'static str {
            "trip_cancel"
        }
        fn description(&self) -> &'static str {
            "cancels"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            Vec::new()
        }
        async fn execute(&self, _args: serde_json::Value, ctx: &ToolContext) -> ToolOutcome {
            ctx.cancel.cancel();
            ToolOutcome::ok("tripped")
        }
    }

    struct NoopTool;

    #[async_trait]
    impl Tool for NoopTool {
        fn name(&self) -> &'static str {
            "noop"
        }
        fn description(&self) -> &'static str {
            "does nothing"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            Vec::new()
        }
        async fn execute(&self, _args: serde_json::Value, _ctx: &ToolContext) -> ToolOutcome {
            ToolOutcome::ok("ok")
        }
    }

    // ── Fixtures ────────────────────────────────────────────────────

    fn selection() -> ModelSelection {
        ModelSelection {
            primary: "tier/one".into(),
            secondary: "tier/two".into(),
            tertiary: "tier/three".into(),
        }
    }

    fn orchestrator(
        provider: Arc<ScriptedProvider>,
        registry: ToolRegistry,
        max_iterations: usize,
    ) -> Orchestrator {
        let paths = PathsConfig::default();
        let worker = WorkerConfig {
            max_iterations,
            ..Default::default()
        };
        Orchestrator::new(
            provider,
            Arc::new(registry),
            Arc::new(SandboxManager::new(SandboxConfig::default(), &paths)),
            Arc::new(NoopRetrievalStore),
            LlmConfig::default(),
            ToolsConfig::default(),
            paths.allowed_roots(),
            &worker,
        )
    }

    fn content(text: &str) -> Result<ChatOutcome, ModelError> {
        Ok(ChatOutcome {
            content: text.into(),
            tool_calls: Vec::new(),
        })
    }

    fn tool_calls(
        calls: Vec<(String, &str, serde_json::Value)>,
    ) -> Result<ChatOutcome, ModelError> {
        Ok(ChatOutcome {
            content: String::new(),
            tool_calls: calls
                .into_iter()
                .map(|(id, name, arguments)| ToolCall {
                    id,
                    name: name.into(),
                    arguments,
                })
                .collect(),
        })
    }

    fn conversation_with(user: &str) -> Conversation {
        let mut conv = Conversation::new(Some("conv-test".into()));
        conv.messages.push(Message::user(user));
        conv
    }

    // ── Scenarios ───────────────────────────────────────────────────

    #[tokio::test]
    async fn natural_stop_returns_content() {
        let provider = ScriptedProvider::new(vec![content("Olá.")]);
        let orch = orchestrator(provider.clone(), ToolRegistry::new(), 10);
        let conv = conversation_with("Oi");
        let sink = Arc::new(RecordingSink::default());

        let outcome = orch
            .process_message(
                &conv,
                &selection(),
                CancelToken::new(),
                sink.clone(),
                false,
                None,
            )
            .await;

        assert!(!outcome.cancelled);
        assert_eq!(outcome.content, "Olá.");
        assert!(outcome.tool_calls.is_empty());
        // The conversation was not polluted with intermediate messages.
        assert_eq!(conv.messages.len(), 1);
        assert!(sink
            .messages()
            .iter()
            .any(|m| m.contains("Iteração do agente (1)")));
    }

    #[tokio::test(start_paused = true)]
    async fn tier_one_retries_once_then_tier_two() {
        let provider = ScriptedProvider::new(vec![
            Err(ModelError::Timeout(Duration::from_secs(180))),
            Err(ModelError::Empty),
            content("Feito."),
        ]);
        let orch = orchestrator(provider.clone(), ToolRegistry::new(), 10);
        let conv = conversation_with("faz algo");
        let sink = Arc::new(RecordingSink::default());

        let outcome = orch
            .process_message(
                &conv,
                &selection(),
                CancelToken::new(),
                sink.clone(),
                false,
                None,
            )
            .await;

        assert_eq!(outcome.content, "Feito.");
        // Exactly one retry on tier 1, then one call on tier 2; tier 3
        // never contacted.
        assert_eq!(
            provider.contacted(),
            vec!["tier/one", "tier/one", "tier/two"]
        );
        assert!(sink
            .messages()
            .iter()
            .any(|m| m.contains("tentando 2ª Instância")));
    }

    #[tokio::test(start_paused = true)]
    async fn all_tiers_exhausted_names_the_models() {
        let provider = ScriptedProvider::new(
            (0..6)
                .map(|_| Err(ModelError::Transport("boom".into())))
                .collect(),
        );
        let orch = orchestrator(provider.clone(), ToolRegistry::new(), 10);
        let conv = conversation_with("oi");
        let sink = Arc::new(RecordingSink::default());

        let outcome = orch
            .process_message(
                &conv,
                &selection(),
                CancelToken::new(),
                sink.clone(),
                false,
                None,
            )
            .await;

        assert!(!outcome.cancelled);
        assert!(outcome.content.contains("Todos os modelos falharam"));
        assert!(outcome.content.contains("tier/one"));
        assert!(outcome.content.contains("tier/three"));
        assert_eq!(provider.contacted().len(), 6);
    }

    #[tokio::test]
    async fn finish_task_terminates_with_its_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(hermes_tools::finish::FinishTaskTool));

        let provider = ScriptedProvider::new(vec![tool_calls(vec![(
            "call_1".to_string(),
            "finish_task",
            serde_json::json!({ "result": "Relatório gerado." }),
        )])]);
        let orch = orchestrator(provider, registry, 10);
        let conv = conversation_with("gera o relatório");

        let outcome = orch
            .process_message(
                &conv,
                &selection(),
                CancelToken::new(),
                Arc::new(RecordingSink::default()),
                true,
                None,
            )
            .await;

        assert_eq!(outcome.content, "Relatório gerado.");
        assert_eq!(outcome.tool_calls.len(), 1);
        // The run transcript holds the assistant tool request and the tool
        // result; the conversation itself is untouched.
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(outcome.transcript.len(), 2);
        assert_eq!(outcome.transcript[0].role, Role::Assistant);
        assert_eq!(outcome.transcript[1].role, Role::Tool);
        assert_eq!(outcome.transcript[1].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn iteration_cap_terminates_with_message() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NoopTool));

        // Every iteration emits another non-terminating tool call.
        let provider = ScriptedProvider::new(
            (0..3)
                .map(|i| {
                    tool_calls(vec![(
                        format!("call_{i}"),
                        "noop",
                        serde_json::json!({}),
                    )])
                })
                .collect(),
        );
        let orch = orchestrator(provider.clone(), registry, 3);
        let conv = conversation_with("loop para sempre");

        let outcome = orch
            .process_message(
                &conv,
                &selection(),
                CancelToken::new(),
                Arc::new(RecordingSink::default()),
                false,
                None,
            )
            .await;

        assert!(outcome.content.contains("limite de iterações"));
        assert_eq!(provider.contacted().len(), 3);
        // 3 × (assistant + tool result) in the transcript.
        assert_eq!(outcome.transcript.len(), 6);
        assert_eq!(conv.messages.len(), 1);
    }

    #[tokio::test]
    async fn cancellation_between_tool_calls_skips_the_second() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(TripCancelTool));
        registry.register(Arc::new(NoopTool));

        let provider = ScriptedProvider::new(vec![tool_calls(vec![
            ("call_a".to_string(), "trip_cancel", serde_json::json!({})),
            ("call_b".to_string(), "noop", serde_json::json!({})),
        ])]);
        let orch = orchestrator(provider, registry, 10);
        let conv = conversation_with("cancela no meio");

        let outcome = orch
            .process_message(
                &conv,
                &selection(),
                CancelToken::new(),
                Arc::new(RecordingSink::default()),
                false,
                None,
            )
            .await;

        assert!(outcome.cancelled);
        // First tool's result is in the transcript; the second was never
        // dispatched. The conversation's last message stays the user's.
        let tool_ids: Vec<_> = outcome
            .transcript
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.clone())
            .collect();
        assert_eq!(tool_ids, vec!["call_a".to_string()]);
        assert_eq!(conv.messages.last().unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn completion_mode_nudges_until_finish_task() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(hermes_tools::finish::FinishTaskTool));

        let provider = ScriptedProvider::new(vec![
            content("acho que terminei"),
            tool_calls(vec![(
                "call_f".to_string(),
                "finish_task",
                serde_json::json!({ "result": "agora sim" }),
            )]),
        ]);
        let orch = orchestrator(provider.clone(), registry, 10);
        let conv = conversation_with("tarefa em background");

        let outcome = orch
            .process_message(
                &conv,
                &selection(),
                CancelToken::new(),
                Arc::new(RecordingSink::default()),
                true,
                None,
            )
            .await;

        assert_eq!(outcome.content, "agora sim");
        assert_eq!(provider.contacted().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_before_first_iteration_appends_nothing() {
        let provider = ScriptedProvider::new(vec![content("nunca chega aqui")]);
        let orch = orchestrator(provider.clone(), ToolRegistry::new(), 10);
        let conv = conversation_with("oi");
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = orch
            .process_message(
                &conv,
                &selection(),
                cancel,
                Arc::new(RecordingSink::default()),
                false,
                None,
            )
            .await;

        assert!(outcome.cancelled);
        assert!(provider.contacted().is_empty());
        assert!(outcome.transcript.is_empty());
        // Last message is still the user message.
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.messages[0].role, Role::User);
    }

    // ── Helpers ─────────────────────────────────────────────────────

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("abc", 10), "abc");
        let truncated = truncate("ação muito longa", 3);
        assert!(truncated.ends_with('…'));
        // Never panics on multi-byte boundaries.
        truncate("çççç", 1);
    }

    #[test]
    fn cancelled_outcome_shape() {
        let outcome = RunOutcome::cancelled(vec![serde_json::json!({"name": "x"})], Vec::new());
        assert!(outcome.cancelled);
        assert_eq!(outcome.tool_calls.len(), 1);
        assert!(outcome.content.contains("cancelado"));
    }
}
