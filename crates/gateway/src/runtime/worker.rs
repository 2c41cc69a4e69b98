//! Background worker pool — drains the task queue without touching
//! interactive traffic.
//!
//! One poll loop claims up to `max_concurrent_tasks` pending tasks and
//! spawns a processing unit per claim; a second loop deletes old terminal
//! tasks. Startup runs crash recovery (`reset_stuck`); shutdown waits a
//! grace period for active units before aborting them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use hermes_conversations::ConversationStore;
use hermes_domain::chat::{Message, ModelSelection, StepType};
use hermes_domain::config::WorkerConfig;
use hermes_domain::progress::{CancelToken, ProgressSink};

use crate::runtime::orchestrator::Orchestrator;
use crate::runtime::queue::{Task, TaskQueue, TaskStatus};
use crate::uploads::FileStore;
use crate::ws::manager::ConnectionManager;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task progress sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fans orchestrator progress into the task's durable log and out to every
/// connected observer.
struct TaskSink {
    queue: Arc<TaskQueue>,
    conns: Arc<ConnectionManager>,
    conversation_id: String,
    task_id: Uuid,
}

#[async_trait]
impl ProgressSink for TaskSink {
    async fn emit(&self, message: &str, step: StepType) {
        if let Err(e) = self
            .queue
            .append_progress(self.task_id, message, step)
            .await
        {
            tracing::warn!(task_id = %self.task_id, error = %e, "progress append failed");
        }
        self.conns
            .send_task_progress(&self.conversation_id, self.task_id, message, step.as_str())
            .await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Worker {
    queue: Arc<TaskQueue>,
    conns: Arc<ConnectionManager>,
    conversations: Arc<ConversationStore>,
    orchestrator: Arc<Orchestrator>,
    uploads: Arc<FileStore>,
    default_models: ModelSelection,
    config: WorkerConfig,

    running: Arc<AtomicBool>,
    active: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(
        queue: Arc<TaskQueue>,
        conns: Arc<ConnectionManager>,
        conversations: Arc<ConversationStore>,
        orchestrator: Arc<Orchestrator>,
        uploads: Arc<FileStore>,
        default_models: ModelSelection,
        config: WorkerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            conns,
            conversations,
            orchestrator,
            uploads,
            default_models,
            config: config.clamped(),
            running: Arc::new(AtomicBool::new(false)),
            active: Arc::new(Mutex::new(HashMap::new())),
            loops: Mutex::new(Vec::new()),
        })
    }

    /// Crash-recover the queue and start the poll + cleanup loops.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("worker already running");
            return;
        }

        match self.queue.reset_stuck().await {
            Ok(0) => {}
            Ok(reset) => tracing::warn!(reset, "recovered tasks interrupted by restart"),
            Err(e) => tracing::error!(error = %e, "reset_stuck failed"),
        }

        let poller = {
            let worker = self.clone();
            tokio::spawn(async move { worker.poll_loop().await })
        };
        let cleaner = {
            let worker = self.clone();
            tokio::spawn(async move { worker.cleanup_loop().await })
        };
        self.loops.lock().extend([poller, cleaner]);

        tracing::info!(
            max_concurrent = self.config.max_concurrent_tasks,
            poll_interval_ms = self.config.poll_interval_ms,
            "background worker started"
        );
    }

    /// Stop claiming, wait up to the grace period for active units, then
    /// abort whatever is left.
    pub async fn stop(self: &Arc<Self>) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.loops.lock().drain(..) {
            handle.abort();
        }

        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.shutdown_grace_sec);
        loop {
            {
                let mut active = self.active.lock();
                active.retain(|_, handle| !handle.is_finished());
                if active.is_empty() {
                    break;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                let mut active = self.active.lock();
                tracing::warn!(remaining = active.len(), "grace period over, aborting tasks");
                for (_, handle) in active.drain() {
                    handle.abort();
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tracing::info!("background worker stopped");
    }

    pub fn active_count(&self) -> usize {
        let mut active = self.active.lock();
        active.retain(|_, handle| !handle.is_finished());
        active.len()
    }

    // ── Loops ─────────────────────────────────────────────────────

    async fn poll_loop(self: Arc<Self>) {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        while self.running.load(Ordering::SeqCst) {
            let free_slots = self
                .config
                .max_concurrent_tasks
                .saturating_sub(self.active_count());

            if free_slots > 0 {
                match self.queue.list_pending(free_slots as i64).await {
                    Ok(pending) => {
                        for task in pending {
                            // The claim CAS settles races with other pollers.
                            match self.queue.claim(task.id).await {
                                Ok(true) => self.spawn_unit(task),
                                Ok(false) => {}
                                Err(e) => {
                                    tracing::error!(task_id = %task.id, error = %e, "claim failed")
                                }
                            }
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "listing pending tasks failed"),
                }
            }

            tokio::time::sleep(interval).await;
        }
    }

    async fn cleanup_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.cleanup_interval_sec);
        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(interval).await;
            match self.queue.cleanup_old(self.config.retention_hours).await {
                Ok(0) => {}
                Ok(deleted) => tracing::info!(deleted, "old tasks removed"),
                Err(e) => tracing::error!(error = %e, "task cleanup failed"),
            }
        }
    }

    fn spawn_unit(self: &Arc<Self>, task: Task) {
        let task_id = task.id;
        let worker = self.clone();
        let span = tracing::info_span!(
            "task_unit",
            %task_id,
            conversation_id = %task.conversation_id,
        );
        let handle = tokio::spawn(
            async move {
                worker.process_task(task).await;
            }
            .instrument(span),
        );
        self.active.lock().insert(task_id, handle);
    }

    // ── Per-task processing unit ──────────────────────────────────

    async fn process_task(self: &Arc<Self>, task: Task) {
        tracing::info!("task processing started");
        let conversation_id = task.conversation_id.clone();
        let task_id = task.id;

        self.conns
            .send_task_status(
                &conversation_id,
                task_id,
                TaskStatus::Processing.as_str(),
                None,
                None,
                None,
            )
            .await;

        match self.run_task(&task).await {
            Ok((result, tool_calls)) => {
                self.conns
                    .send_task_status(
                        &conversation_id,
                        task_id,
                        TaskStatus::Completed.as_str(),
                        Some(result),
                        None,
                        Some(tool_calls),
                    )
                    .await;
                tracing::info!("task completed");
            }
            Err(error) => {
                tracing::error!(error = %error, "task failed");
                if let Err(e) = self
                    .queue
                    .update_status(task_id, TaskStatus::Failed, None, Some(&error), None)
                    .await
                {
                    tracing::error!(error = %e, "failed to mark task as failed");
                }
                self.conns
                    .send_task_status(
                        &conversation_id,
                        task_id,
                        TaskStatus::Failed.as_str(),
                        None,
                        Some(error),
                        None,
                    )
                    .await;
            }
        }
    }

    /// The fallible body of a processing unit. `Err` carries the
    /// user-facing failure description.
    async fn run_task(
        self: &Arc<Self>,
        task: &Task,
    ) -> std::result::Result<(String, Vec<serde_json::Value>), String> {
        let mut conversation = self
            .conversations
            .load(&task.conversation_id)
            .ok_or_else(|| format!("Conversa não encontrada: {}", task.conversation_id))?;

        // Persist the original text; the orchestrator sees the expanded form.
        let mut user_message = Message::user(task.user_message.clone());
        if !task.attached_files.is_empty() {
            user_message.attached_files = Some(task.attached_files.clone());
        }
        conversation.messages.push(user_message);

        let effective = if task.attached_files.is_empty() {
            None
        } else {
            Some(
                self.uploads
                    .expand_message(&task.user_message, &task.attached_files),
            )
        };

        let sink: Arc<dyn ProgressSink> = Arc::new(TaskSink {
            queue: self.queue.clone(),
            conns: self.conns.clone(),
            conversation_id: task.conversation_id.clone(),
            task_id: task.id,
        });

        let models = ModelSelection::resolve(&self.default_models, &task.models);

        let outcome = self
            .orchestrator
            .process_message(
                &conversation,
                &models,
                CancelToken::new(),
                sink,
                true,
                effective,
            )
            .await;

        conversation
            .messages
            .push(Message::assistant(outcome.content.clone()));
        conversation.updated_at = Utc::now();
        self.conversations
            .save(&conversation)
            .map_err(|e| format!("Erro ao salvar conversa: {e}"))?;

        let terminal = if outcome.cancelled {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Completed
        };
        self.queue
            .update_status(
                task.id,
                terminal,
                Some(&outcome.content),
                None,
                Some(outcome.tool_calls.as_slice()),
            )
            .await
            .map_err(|e| format!("Erro ao atualizar tarefa: {e}"))?;

        Ok((outcome.content, outcome.tool_calls))
    }
}
