//! Durable task queue — FIFO of background requests on an embedded sqlite
//! file.
//!
//! The `pending → processing` claim is a conditional UPDATE whose
//! affected-row count decides the race; everything else is plain row-level
//! CRUD. The progress log is a JSON array column grown atomically with
//! `json_insert`, so it only ever appends.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use hermes_domain::chat::StepType;
use hermes_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::Storage(format!("unknown task status: {other}"))),
        }
    }
}

/// One progress-log entry. Entries are never edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub step_type: StepType,
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: Uuid,
    pub conversation_id: String,
    pub user_message: String,
    pub status: TaskStatus,
    pub models: HashMap<String, String>,
    pub attached_files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub tool_calls: Option<Vec<serde_json::Value>>,
    pub progress: Vec<TaskProgress>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TaskQueue {
    pool: SqlitePool,
}

impl TaskQueue {
    /// Open (creating if missing) the queue database and its indices.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                user_message TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                models TEXT,
                attached_files TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                result TEXT,
                error TEXT,
                tool_calls TEXT,
                progress TEXT NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(db_err)?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_tasks_conversation ON tasks(conversation_id)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks(created_at)",
        ] {
            sqlx::query(index).execute(&pool).await.map_err(db_err)?;
        }

        tracing::info!(db = %path.display(), "task queue ready");
        Ok(Self { pool })
    }

    /// Insert a new task with status `pending`.
    pub async fn create(
        &self,
        conversation_id: &str,
        user_message: &str,
        models: HashMap<String, String>,
        attached_files: Vec<String>,
    ) -> Result<Task> {
        let task = Task {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.to_string(),
            user_message: user_message.to_string(),
            status: TaskStatus::Pending,
            models,
            attached_files,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            tool_calls: None,
            progress: Vec::new(),
        };

        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, conversation_id, user_message, status, models,
                attached_files, created_at, progress
            ) VALUES (?, ?, ?, ?, ?, ?, ?, '[]')
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.conversation_id)
        .bind(&task.user_message)
        .bind(task.status.as_str())
        .bind(serde_json::to_string(&task.models)?)
        .bind(serde_json::to_string(&task.attached_files)?)
        .bind(task.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        tracing::info!(task_id = %task.id, conversation_id, "task created");
        Ok(task)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| row_to_task(&r)).transpose()
    }

    /// Tasks of one conversation, newest first.
    pub async fn list_by_conversation(
        &self,
        conversation_id: &str,
        limit: i64,
    ) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE conversation_id = ? \
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_task).collect()
    }

    /// Pending tasks, oldest first (the FIFO order workers drain in).
    pub async fn list_pending(&self, limit: i64) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE status = 'pending' \
             ORDER BY created_at ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_task).collect()
    }

    /// Compare-and-set `pending → processing`, writing `started_at`.
    /// Exactly one of any set of concurrent callers sees `true`.
    pub async fn claim(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'processing', started_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        let claimed = result.rows_affected() > 0;
        if claimed {
            tracing::info!(task_id = %id, "task claimed");
        }
        Ok(claimed)
    }

    /// Update status and result fields. Terminal statuses set
    /// `completed_at` once; repeating an identical update leaves the row
    /// unchanged.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        result: Option<&str>,
        error: Option<&str>,
        tool_calls: Option<&[serde_json::Value]>,
    ) -> Result<bool> {
        let mut sets = vec!["status = ?".to_string()];
        if status.is_terminal() {
            sets.push("completed_at = COALESCE(completed_at, ?)".to_string());
        }
        if result.is_some() {
            sets.push("result = ?".to_string());
        }
        if error.is_some() {
            sets.push("error = ?".to_string());
        }
        if tool_calls.is_some() {
            sets.push("tool_calls = ?".to_string());
        }
        let sql = format!("UPDATE tasks SET {} WHERE id = ?", sets.join(", "));

        let mut query = sqlx::query(&sql).bind(status.as_str());
        if status.is_terminal() {
            query = query.bind(Utc::now());
        }
        if let Some(result) = result {
            query = query.bind(result.to_string());
        }
        if let Some(error) = error {
            query = query.bind(error.to_string());
        }
        if let Some(tool_calls) = tool_calls {
            query = query.bind(serde_json::to_string(tool_calls)?);
        }
        let outcome = query
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        let updated = outcome.rows_affected() > 0;
        if updated {
            tracing::info!(task_id = %id, status = status.as_str(), "task status updated");
        }
        Ok(updated)
    }

    /// Append one progress entry. The JSON array column grows in place;
    /// entries are never rewritten.
    pub async fn append_progress(
        &self,
        id: Uuid,
        message: &str,
        step_type: StepType,
    ) -> Result<bool> {
        let entry = TaskProgress {
            timestamp: Utc::now(),
            message: message.to_string(),
            step_type,
        };
        let result = sqlx::query(
            "UPDATE tasks SET progress = json_insert(progress, '$[#]', json(?)) \
             WHERE id = ?",
        )
        .bind(serde_json::to_string(&entry)?)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    /// Pending ∪ processing, oldest first.
    pub async fn list_active(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE status IN ('pending', 'processing') \
             ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_task).collect()
    }

    /// Cancel a task only while it is still pending. Processing tasks are
    /// not interrupted by this version.
    pub async fn cancel_if_pending(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'cancelled', error = ?, \
             completed_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind("Cancelada pelo usuário")
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete terminal tasks completed more than `hours` ago. Returns the
    /// number removed.
    pub async fn cleanup_old(&self, hours: i64) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        let result = sqlx::query(
            "DELETE FROM tasks WHERE status IN ('completed', 'failed', 'cancelled') \
             AND completed_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::info!(deleted, "old tasks cleaned up");
        }
        Ok(deleted)
    }

    /// Crash recovery: any task left in `processing` by a previous run is
    /// rewritten to `failed`. Called once at worker startup.
    pub async fn reset_stuck(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'failed', error = ?, completed_at = ? \
             WHERE status = 'processing'",
        )
        .bind("interrupted by restart")
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        let reset = result.rows_affected();
        if reset > 0 {
            tracing::warn!(reset, "stuck processing tasks reset to failed");
        }
        Ok(reset)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let id: String = row.try_get("id").map_err(db_err)?;
    let status: String = row.try_get("status").map_err(db_err)?;
    let models: Option<String> = row.try_get("models").map_err(db_err)?;
    let attached_files: Option<String> = row.try_get("attached_files").map_err(db_err)?;
    let tool_calls: Option<String> = row.try_get("tool_calls").map_err(db_err)?;
    let progress: Option<String> = row.try_get("progress").map_err(db_err)?;

    Ok(Task {
        id: Uuid::parse_str(&id).map_err(|e| Error::Storage(e.to_string()))?,
        conversation_id: row.try_get("conversation_id").map_err(db_err)?,
        user_message: row.try_get("user_message").map_err(db_err)?,
        status: TaskStatus::parse(&status)?,
        models: models
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default(),
        attached_files: attached_files
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default(),
        created_at: row.try_get("created_at").map_err(db_err)?,
        started_at: row.try_get("started_at").map_err(db_err)?,
        completed_at: row.try_get("completed_at").map_err(db_err)?,
        result: row.try_get("result").map_err(db_err)?,
        error: row.try_get("error").map_err(db_err)?,
        tool_calls: tool_calls.as_deref().map(serde_json::from_str).transpose()?,
        progress: progress
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?
            .unwrap_or_default(),
    })
}

fn db_err(e: impl std::fmt::Display) -> Error {
    Error::Storage(e.to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    async fn queue() -> (tempfile::TempDir, TaskQueue) {
        let dir = tempfile::tempdir().unwrap();
        let queue = TaskQueue::open(&dir.path().join("tasks.db")).await.unwrap();
        (dir, queue)
    }

    async fn create_one(queue: &TaskQueue, conversation: &str) -> Task {
        queue
            .create(conversation, "faça algo", HashMap::new(), Vec::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (_dir, queue) = queue().await;
        let mut models = HashMap::new();
        models.insert("primary".to_string(), "openai/gpt-5-nano".to_string());

        let task = queue
            .create("conv-1", "Oi", models.clone(), vec!["file-1".into()])
            .await
            .unwrap();
        let fetched = queue.get(task.id).await.unwrap().unwrap();

        assert_eq!(fetched.id, task.id);
        assert_eq!(fetched.conversation_id, "conv-1");
        assert_eq!(fetched.user_message, "Oi");
        assert_eq!(fetched.status, TaskStatus::Pending);
        assert_eq!(fetched.models, models);
        assert_eq!(fetched.attached_files, vec!["file-1".to_string()]);
        assert!(fetched.started_at.is_none());
        assert!(fetched.progress.is_empty());
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let (_dir, queue) = queue().await;
        assert!(queue.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let (_dir, queue) = queue().await;
        let task = create_one(&queue, "conv").await;

        assert!(queue.claim(task.id).await.unwrap());
        assert!(!queue.claim(task.id).await.unwrap());

        let claimed = queue.get(task.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, TaskStatus::Processing);
        assert!(claimed.started_at.is_some());
    }

    #[tokio::test]
    async fn claim_race_has_exactly_one_winner() {
        let (_dir, queue) = queue().await;
        let queue = std::sync::Arc::new(queue);
        let task = create_one(&queue, "conv").await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move { queue.claim(task.id).await.unwrap() }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        // The loser's next pending listing no longer contains the task.
        let pending = queue.list_pending(10).await.unwrap();
        assert!(pending.iter().all(|t| t.id != task.id));
    }

    #[tokio::test]
    async fn pending_listing_is_oldest_first() {
        let (_dir, queue) = queue().await;
        let first = create_one(&queue, "conv").await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = create_one(&queue, "conv").await;

        let pending = queue.list_pending(10).await.unwrap();
        assert_eq!(pending[0].id, first.id);
        assert_eq!(pending[1].id, second.id);

        // Conversation listing is the opposite order.
        let by_conv = queue.list_by_conversation("conv", 10).await.unwrap();
        assert_eq!(by_conv[0].id, second.id);
    }

    #[tokio::test]
    async fn terminal_status_sets_completed_at_once() {
        let (_dir, queue) = queue().await;
        let task = create_one(&queue, "conv").await;
        queue.claim(task.id).await.unwrap();

        queue
            .update_status(task.id, TaskStatus::Completed, Some("pronto"), None, None)
            .await
            .unwrap();
        let after_first = queue.get(task.id).await.unwrap().unwrap();
        let first_completed = after_first.completed_at.unwrap();
        assert!(first_completed >= after_first.started_at.unwrap());
        assert!(after_first.started_at.unwrap() >= after_first.created_at);

        // Idempotent: the identical update does not move completed_at.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        queue
            .update_status(task.id, TaskStatus::Completed, Some("pronto"), None, None)
            .await
            .unwrap();
        let after_second = queue.get(task.id).await.unwrap().unwrap();
        assert_eq!(after_second.completed_at.unwrap(), first_completed);
        assert_eq!(after_second.result.as_deref(), Some("pronto"));
    }

    #[tokio::test]
    async fn progress_log_only_grows() {
        let (_dir, queue) = queue().await;
        let task = create_one(&queue, "conv").await;

        assert!(queue
            .append_progress(task.id, "Iteração do agente (1)", StepType::Info)
            .await
            .unwrap());
        assert!(queue
            .append_progress(task.id, "Executando: execute_shell", StepType::ToolStart)
            .await
            .unwrap());

        let fetched = queue.get(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.progress.len(), 2);
        assert_eq!(fetched.progress[0].message, "Iteração do agente (1)");
        assert_eq!(fetched.progress[1].step_type, StepType::ToolStart);

        assert!(!queue
            .append_progress(Uuid::new_v4(), "ghost", StepType::Info)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn reset_stuck_fails_processing_tasks() {
        let (_dir, queue) = queue().await;
        let stuck = create_one(&queue, "conv").await;
        queue.claim(stuck.id).await.unwrap();
        let untouched = create_one(&queue, "conv").await;

        assert_eq!(queue.reset_stuck().await.unwrap(), 1);

        let recovered = queue.get(stuck.id).await.unwrap().unwrap();
        assert_eq!(recovered.status, TaskStatus::Failed);
        assert_eq!(recovered.error.as_deref(), Some("interrupted by restart"));
        assert!(recovered.completed_at.is_some());

        // No row remains in processing; pending is untouched.
        assert_eq!(
            queue.get(untouched.id).await.unwrap().unwrap().status,
            TaskStatus::Pending
        );
        let active = queue.list_active().await.unwrap();
        assert!(active.iter().all(|t| t.status != TaskStatus::Processing));
    }

    #[tokio::test]
    async fn cancel_only_touches_pending() {
        let (_dir, queue) = queue().await;
        let pending = create_one(&queue, "conv").await;
        let processing = create_one(&queue, "conv").await;
        queue.claim(processing.id).await.unwrap();

        assert!(queue.cancel_if_pending(pending.id).await.unwrap());
        assert!(!queue.cancel_if_pending(processing.id).await.unwrap());

        let cancelled = queue.get(pending.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_terminal_tasks() {
        let (_dir, queue) = queue().await;
        let old = create_one(&queue, "conv").await;
        queue.claim(old.id).await.unwrap();
        queue
            .update_status(old.id, TaskStatus::Completed, None, None, None)
            .await
            .unwrap();
        // Backdate completed_at past the retention window.
        sqlx::query("UPDATE tasks SET completed_at = ? WHERE id = ?")
            .bind(Utc::now() - chrono::Duration::hours(48))
            .bind(old.id.to_string())
            .execute(&queue.pool)
            .await
            .unwrap();

        let fresh = create_one(&queue, "conv").await;

        assert_eq!(queue.cleanup_old(24).await.unwrap(), 1);
        assert!(queue.get(old.id).await.unwrap().is_none());
        assert!(queue.get(fresh.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_active_is_pending_union_processing() {
        let (_dir, queue) = queue().await;
        let a = create_one(&queue, "conv").await;
        let b = create_one(&queue, "conv").await;
        queue.claim(b.id).await.unwrap();
        let c = create_one(&queue, "conv").await;
        queue.claim(c.id).await.unwrap();
        queue
            .update_status(c.id, TaskStatus::Failed, None, Some("boom"), None)
            .await
            .unwrap();

        let active = queue.list_active().await.unwrap();
        let ids: Vec<Uuid> = active.iter().map(|t| t.id).collect();
        assert!(ids.contains(&a.id));
        assert!(ids.contains(&b.id));
        assert!(!ids.contains(&c.id));
    }
}
