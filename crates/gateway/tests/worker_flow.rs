//! End-to-end background worker flows against a scripted model provider:
//! enqueue → claim → orchestrate → persist → terminal status, plus the
//! crash-recovery path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use hermes_conversations::{Conversation, ConversationStore};
use hermes_domain::chat::{Message, ModelSelection, Role, ToolDefinition};
use hermes_domain::config::{LlmConfig, PathsConfig, SandboxConfig, ToolsConfig, WorkerConfig};
use hermes_gateway::runtime::orchestrator::Orchestrator;
use hermes_gateway::runtime::queue::{TaskQueue, TaskStatus};
use hermes_gateway::runtime::worker::Worker;
use hermes_gateway::uploads::FileStore;
use hermes_gateway::ws::manager::ConnectionManager;
use hermes_memory::NoopRetrievalStore;
use hermes_providers::{ChatOutcome, ChatProvider, ModelError};
use hermes_sandbox::SandboxManager;
use hermes_tools::ToolRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ScriptedProvider {
    script: Mutex<Vec<Result<ChatOutcome, ModelError>>>,
}

impl ScriptedProvider {
    fn finishing_with(result: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(vec![Ok(ChatOutcome {
                content: String::new(),
                tool_calls: vec![hermes_domain::chat::ToolCall {
                    id: "call_done".into(),
                    name: "finish_task".into(),
                    arguments: serde_json::json!({ "result": result }),
                }],
            })]),
        })
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn chat(
        &self,
        _messages: &[Message],
        _model: &str,
        _tools: Option<&[ToolDefinition]>,
        _timeout: Duration,
    ) -> Result<ChatOutcome, ModelError> {
        let mut script = self.script.lock();
        if script.is_empty() {
            Err(ModelError::Empty)
        } else {
            script.remove(0)
        }
    }

    async fn health(&self, _model: &str) -> bool {
        true
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixture
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Fixture {
    _dir: tempfile::TempDir,
    queue: Arc<TaskQueue>,
    conversations: Arc<ConversationStore>,
    worker: Arc<Worker>,
}

async fn fixture(provider: Arc<ScriptedProvider>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let paths = PathsConfig {
        data_dir: dir.path().join("data"),
        uploads_dir: dir.path().join("data/uploads"),
        outputs_dir: dir.path().join("data/outputs"),
        conversations_dir: dir.path().join("data/conversations"),
        tasks_db: dir.path().join("data/tasks.db"),
    };

    let queue = Arc::new(TaskQueue::open(&paths.tasks_db).await.unwrap());
    let conversations = Arc::new(ConversationStore::new(&paths.conversations_dir).unwrap());
    let uploads = Arc::new(FileStore::new(&paths.uploads_dir).unwrap());
    let conns = Arc::new(ConnectionManager::new());

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(hermes_tools::finish::FinishTaskTool));

    let worker_config = WorkerConfig {
        max_concurrent_tasks: 2,
        poll_interval_ms: 100,
        ..Default::default()
    };

    let orchestrator = Arc::new(Orchestrator::new(
        provider,
        Arc::new(registry),
        Arc::new(SandboxManager::new(SandboxConfig::default(), &paths)),
        Arc::new(NoopRetrievalStore),
        LlmConfig::default(),
        ToolsConfig::default(),
        paths.allowed_roots(),
        &worker_config,
    ));

    let worker = Worker::new(
        queue.clone(),
        conns,
        conversations.clone(),
        orchestrator,
        uploads,
        ModelSelection {
            primary: "tier/one".into(),
            secondary: "tier/two".into(),
            tertiary: "tier/two".into(),
        },
        worker_config,
    );

    Fixture {
        _dir: dir,
        queue,
        conversations,
        worker,
    }
}

async fn wait_for_terminal(
    queue: &TaskQueue,
    task_id: uuid::Uuid,
) -> hermes_gateway::runtime::queue::Task {
    for _ in 0..100 {
        let task = queue.get(task_id).await.unwrap().unwrap();
        if task.status.is_terminal() {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("task never reached a terminal status");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn background_task_runs_to_completion() {
    let fixture = fixture(ScriptedProvider::finishing_with("Relatório pronto.")).await;

    let conversation = Conversation::new(Some("conv-bg".into()));
    fixture.conversations.save(&conversation).unwrap();

    let task = fixture
        .queue
        .create("conv-bg", "gera o relatório", HashMap::new(), Vec::new())
        .await
        .unwrap();

    fixture.worker.start().await;
    let finished = wait_for_terminal(&fixture.queue, task.id).await;
    fixture.worker.stop().await;

    assert_eq!(finished.status, TaskStatus::Completed);
    assert_eq!(finished.result.as_deref(), Some("Relatório pronto."));
    assert!(finished.started_at.is_some());
    assert!(finished.completed_at.unwrap() >= finished.started_at.unwrap());
    assert!(!finished.progress.is_empty());
    assert_eq!(finished.tool_calls.as_ref().unwrap().len(), 1);

    // The conversation gained the user message and the assistant reply.
    let saved = fixture.conversations.load("conv-bg").unwrap();
    assert_eq!(saved.messages.len(), 2);
    assert_eq!(saved.messages[0].role, Role::User);
    assert_eq!(saved.messages[0].content, "gera o relatório");
    assert_eq!(saved.messages[1].role, Role::Assistant);
    assert_eq!(saved.messages[1].content, "Relatório pronto.");
}

#[tokio::test]
async fn startup_recovers_tasks_stuck_in_processing() {
    let fixture = fixture(ScriptedProvider::finishing_with("irrelevante")).await;

    // Simulate a task claimed by a previous process that died.
    let task = fixture
        .queue
        .create("conv-crash", "trabalho perdido", HashMap::new(), Vec::new())
        .await
        .unwrap();
    assert!(fixture.queue.claim(task.id).await.unwrap());

    fixture.worker.start().await;
    let recovered = wait_for_terminal(&fixture.queue, task.id).await;
    fixture.worker.stop().await;

    assert_eq!(recovered.status, TaskStatus::Failed);
    assert_eq!(recovered.error.as_deref(), Some("interrupted by restart"));
    assert!(recovered.completed_at.is_some());

    // The recovered row still shows up in conversation history.
    let listed = fixture
        .queue
        .list_by_conversation("conv-crash", 10)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, TaskStatus::Failed);
}

#[tokio::test]
async fn missing_conversation_fails_the_task() {
    let fixture = fixture(ScriptedProvider::finishing_with("irrelevante")).await;

    let task = fixture
        .queue
        .create("conv-ghost", "oi", HashMap::new(), Vec::new())
        .await
        .unwrap();

    fixture.worker.start().await;
    let failed = wait_for_terminal(&fixture.queue, task.id).await;
    fixture.worker.stop().await;

    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed
        .error
        .as_deref()
        .unwrap()
        .contains("Conversa não encontrada"));
}
