pub mod tasks;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get};
use axum::Router;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Build the API router: a public health probe, the WebSocket chat
/// endpoint (which authenticates via its own query token), and the
/// bearer-protected task surface.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/v1/health", get(health))
        .route("/v1/models/health", get(models_health))
        .route("/ws/chat", get(crate::ws::chat::chat_ws));

    let protected = Router::new()
        .route("/v1/tasks/active/all", get(tasks::get_active_tasks))
        .route("/v1/tasks/:conversation_id", get(tasks::list_conversation_tasks))
        .route(
            "/v1/tasks/:conversation_id/:task_id",
            get(tasks::get_task),
        )
        .route(
            "/v1/tasks/:conversation_id/:task_id",
            delete(tasks::cancel_task),
        )
        .layer(middleware::from_fn_with_state(state, require_bearer));

    public.merge(protected)
}

/// GET /v1/health — liveness plus a cheap snapshot of the runtime.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.conns.connection_count(),
        "active_tasks": state.worker.active_count(),
    }))
}

/// GET /v1/models/health — pings the primary tier (used by readiness
/// probes; may take up to 10 s).
async fn models_health(State(state): State<AppState>) -> impl IntoResponse {
    let model = &state.config.llm.primary_model;
    let available = state.client.health(model).await;
    let status = if available {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({ "model": model, "available": available })),
    )
}

/// Bearer-token middleware for the REST surface. Dev mode (no configured
/// token) leaves it open.
async fn require_bearer(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: Next,
) -> axum::response::Response {
    let Some(expected) = &state.api_token_hash else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    let provided_hash = Sha256::digest(provided.as_bytes());
    let authorized: bool = provided_hash.as_slice().ct_eq(expected.as_slice()).into();

    if authorized {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "detail": "token inválido ou ausente" })),
        )
            .into_response()
    }
}
