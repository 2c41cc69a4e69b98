//! Task REST surface — observers polling for background work.
//!
//! - `GET    /v1/tasks/active/all`            — all active tasks
//! - `GET    /v1/tasks/:conversation_id`      — tasks of a conversation
//! - `GET    /v1/tasks/:conversation_id/:id`  — one task with progress
//! - `DELETE /v1/tasks/:conversation_id/:id`  — cancel a pending task

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::runtime::queue::{Task, TaskProgress, TaskStatus};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: Uuid,
    pub conversation_id: String,
    pub user_message: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub tool_calls: Option<Vec<serde_json::Value>>,
    pub progress: Vec<TaskProgress>,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct ActiveTasksResponse {
    pub pending: usize,
    pub processing: usize,
    pub tasks: Vec<TaskResponse>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

fn task_to_response(task: Task) -> TaskResponse {
    let mut user_message = task.user_message;
    if user_message.len() > 200 {
        let mut end = 200;
        while end < user_message.len() && !user_message.is_char_boundary(end) {
            end += 1;
        }
        user_message.truncate(end);
    }
    TaskResponse {
        id: task.id,
        conversation_id: task.conversation_id,
        user_message,
        status: task.status,
        created_at: task.created_at,
        started_at: task.started_at,
        completed_at: task.completed_at,
        result: task.result,
        error: task.error,
        tool_calls: task.tool_calls,
        progress: task.progress,
    }
}

fn error_response(status: StatusCode, detail: &str) -> axum::response::Response {
    (status, Json(serde_json::json!({ "detail": detail }))).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_conversation_tasks(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    match state
        .queue
        .list_by_conversation(&conversation_id, query.limit)
        .await
    {
        Ok(tasks) => {
            let tasks: Vec<TaskResponse> = tasks.into_iter().map(task_to_response).collect();
            let total = tasks.len();
            Json(TaskListResponse { tasks, total }).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "task listing failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "erro ao listar tarefas")
        }
    }
}

pub async fn get_task(
    State(state): State<AppState>,
    Path((conversation_id, task_id)): Path<(String, Uuid)>,
) -> impl IntoResponse {
    match state.queue.get(task_id).await {
        Ok(Some(task)) => {
            if task.conversation_id != conversation_id {
                return error_response(
                    StatusCode::FORBIDDEN,
                    "Tarefa não pertence a esta conversa",
                );
            }
            Json(task_to_response(task)).into_response()
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Tarefa não encontrada"),
        Err(e) => {
            tracing::error!(error = %e, "task lookup failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "erro ao buscar tarefa")
        }
    }
}

/// Only pending tasks can be cancelled here; in-flight interruption of
/// processing tasks is not supported in this version.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path((conversation_id, task_id)): Path<(String, Uuid)>,
) -> impl IntoResponse {
    let task = match state.queue.get(task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Tarefa não encontrada"),
        Err(e) => {
            tracing::error!(error = %e, "task lookup failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "erro ao buscar tarefa");
        }
    };
    if task.conversation_id != conversation_id {
        return error_response(StatusCode::FORBIDDEN, "Tarefa não pertence a esta conversa");
    }
    if task.status != TaskStatus::Pending {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!(
                "Não é possível cancelar tarefa com status '{}'",
                task.status.as_str()
            ),
        );
    }

    match state.queue.cancel_if_pending(task_id).await {
        Ok(true) => {
            tracing::info!(%task_id, "task cancelled via REST");
            state
                .conns
                .send_task_status(
                    &conversation_id,
                    task_id,
                    TaskStatus::Cancelled.as_str(),
                    None,
                    Some("Cancelada pelo usuário".into()),
                    None,
                )
                .await;
            Json(serde_json::json!({ "message": "Tarefa cancelada com sucesso" }))
                .into_response()
        }
        // A worker claimed it between the check and the update.
        Ok(false) => error_response(
            StatusCode::BAD_REQUEST,
            "Tarefa já não está mais pendente",
        ),
        Err(e) => {
            tracing::error!(error = %e, "task cancel failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "erro ao cancelar tarefa")
        }
    }
}

pub async fn get_active_tasks(State(state): State<AppState>) -> impl IntoResponse {
    match state.queue.list_active().await {
        Ok(tasks) => {
            let pending = tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .count();
            let processing = tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Processing)
                .count();
            Json(ActiveTasksResponse {
                pending,
                processing,
                tasks: tasks.into_iter().map(task_to_response).collect(),
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "active task listing failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "erro ao listar tarefas")
        }
    }
}
