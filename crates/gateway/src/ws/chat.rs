//! WebSocket chat endpoint — the per-observer bidirectional channel.
//!
//! Flow:
//! 1. Observer connects to `/ws/chat?token=<bearer>&conversation_id=<id>`
//! 2. The conversation is loaded or created (`conversation_created` frame)
//! 3. Recent active tasks of the conversation are replayed
//! 4. Inbound loop: `message` runs the orchestrator (or enqueues a
//!    background task), `cancel` flags the running turn, `ping` → `pong`

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;
use uuid::Uuid;

use hermes_conversations::Conversation;
use hermes_domain::chat::{Message, ModelSelection, StepType};
use hermes_domain::progress::ProgressSink;

use super::frames::{ClientFrame, Frame};
use crate::state::AppState;

/// Constant-time token comparison against the startup-computed hash.
fn token_matches(expected_hash: &[u8], provided: &str) -> bool {
    let provided_hash = Sha256::digest(provided.as_bytes());
    provided_hash.as_slice().ct_eq(expected_hash).into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query params
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
    pub conversation_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /ws/chat — upgrade to WebSocket.
///
/// When a token hash is configured the `token` query param must match;
/// without one the endpoint runs open (dev mode).
pub async fn chat_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    if let Some(expected) = &state.api_token_hash {
        let provided = query.token.as_deref().unwrap_or("");
        if !token_matches(expected, provided) {
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                "token inválido ou ausente",
            )
                .into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.conversation_id))
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: AppState, conversation_id: Option<String>) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Writer task: one consumer of the outbound channel keeps per-peer
    // frame ordering.
    let (tx, mut rx) = mpsc::channel::<Frame>(64);
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&frame) else {
                continue;
            };
            if ws_sink.send(WsMessage::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // ── Conversation load/create ──────────────────────────────────
    // New conversations are not persisted until the first message, so
    // abandoned connections leave nothing behind.
    let (conversation, created) = match conversation_id {
        Some(id) => match state.conversations.load(&id) {
            Some(conv) => (conv, false),
            None => (Conversation::new(Some(id)), true),
        },
        None => (Conversation::new(None), true),
    };
    if created {
        let _ = tx
            .send(Frame::ConversationCreated {
                conversation_id: conversation.id.clone(),
            })
            .await;
    }

    let conn_id = Uuid::new_v4();
    state.conns.attach(conn_id, &conversation.id, tx.clone());
    tracing::info!(
        %conn_id,
        conversation_id = %conversation.id,
        "observer connected"
    );

    // ── Replay recent active tasks ────────────────────────────────
    match state.queue.list_by_conversation(&conversation.id, 10).await {
        Ok(tasks) => {
            for task in tasks.iter().filter(|t| !t.status.is_terminal()) {
                let _ = tx
                    .send(Frame::TaskStatus {
                        task_id: task.id.to_string(),
                        conversation_id: task.conversation_id.clone(),
                        status: task.status.as_str().to_string(),
                        result: task.result.clone(),
                        error: task.error.clone(),
                        tool_calls: task.tool_calls.clone(),
                    })
                    .await;
            }
        }
        Err(e) => tracing::warn!(error = %e, "active-task replay failed"),
    }

    let conversation_id = conversation.id.clone();
    let conversation = Arc::new(tokio::sync::Mutex::new(conversation));
    // Rate limiting is per observer connection; user identity belongs to
    // the external auth collaborator.
    let user_key = conn_id.to_string();

    // ── Inbound loop ──────────────────────────────────────────────
    while let Some(Ok(msg)) = ws_stream.next().await {
        let text = match msg {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };

        let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
            let _ = tx
                .send(Frame::Error {
                    content: "Formato de mensagem inválido".into(),
                })
                .await;
            continue;
        };
        let frame = match serde_json::from_value::<ClientFrame>(value) {
            Ok(frame) => frame,
            Err(_) => {
                tracing::debug!(%conn_id, "ignoring unknown inbound frame type");
                continue;
            }
        };

        match frame {
            ClientFrame::Ping => {
                let _ = tx.send(Frame::Pong).await;
            }

            ClientFrame::Cancel => {
                // Never takes the conversation lock — the running turn
                // holds it; the flag is the whole signal.
                if !state.cancel_map.cancel(&conversation_id) {
                    tracing::debug!(%conversation_id, "cancel with no active run");
                }
            }

            ClientFrame::Message {
                content,
                attached_files,
                models,
                background,
            } => {
                let content = content.trim().to_string();
                if content.is_empty() {
                    continue;
                }

                if let Err(refusal) = state.rate_limiter.check_request(&user_key) {
                    let _ = tx
                        .send(Frame::Error {
                            content: format!("⏱️ {refusal}"),
                        })
                        .await;
                    continue;
                }

                // Attachment ids must resolve before anything is enqueued.
                if let Err(e) = state.uploads.check_resolvable(&attached_files) {
                    let _ = tx.send(Frame::Error { content: e.to_string() }).await;
                    continue;
                }

                // One synchronous run at a time per connection; the mutex
                // doubles as the busy flag.
                let Ok(mut guard) = conversation.clone().try_lock_owned() else {
                    let _ = tx
                        .send(Frame::Error {
                            content: "Ainda processando a mensagem anterior".into(),
                        })
                        .await;
                    continue;
                };

                // Persist the original text; the orchestrator receives the
                // attachment-expanded form.
                let mut user_message = Message::user(content.clone());
                if !attached_files.is_empty() {
                    user_message.attached_files = Some(attached_files.clone());
                }
                guard.messages.push(user_message);
                if guard.messages.len() == 1 {
                    guard.title = Conversation::title_from(&content);
                }
                guard.updated_at = Utc::now();

                if background {
                    // The worker appends the user message itself when it
                    // processes the task; here the conversation only has to
                    // exist on disk so the worker can find it.
                    guard.messages.pop();
                    if let Err(e) = state.conversations.save(&guard) {
                        let _ = tx
                            .send(Frame::Error {
                                content: format!("Erro ao salvar conversa: {e}"),
                            })
                            .await;
                        continue;
                    }
                    match state
                        .queue
                        .create(&guard.id, &content, models, attached_files)
                        .await
                    {
                        Ok(task) => {
                            let _ = tx
                                .send(Frame::TaskCreated {
                                    task_id: task.id.to_string(),
                                    conversation_id: guard.id.clone(),
                                })
                                .await;
                        }
                        Err(e) => {
                            let _ = tx
                                .send(Frame::Error {
                                    content: format!("Erro ao criar tarefa: {e}"),
                                })
                                .await;
                        }
                    }
                    continue;
                }

                let effective = (!attached_files.is_empty())
                    .then(|| state.uploads.expand_message(&content, &attached_files));
                let selection =
                    ModelSelection::resolve(&state.config.llm.default_selection(), &models);

                let run_state = state.clone();
                let run_tx = tx.clone();
                tokio::spawn(async move {
                    run_synchronous(run_state, guard, run_tx, selection, effective).await;
                });
            }
        }
    }

    // ── Disconnect ────────────────────────────────────────────────
    // Background tasks keep running; a synchronous run stops at its next
    // cancellation check only if the user cancelled it.
    state.conns.detach(conn_id);
    writer.abort();
    tracing::info!(%conn_id, "observer disconnected");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Synchronous run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Progress sink backed by the submitting connection.
struct ConnectionSink {
    tx: mpsc::Sender<Frame>,
}

#[async_trait]
impl ProgressSink for ConnectionSink {
    async fn emit(&self, message: &str, _step: StepType) {
        let _ = self
            .tx
            .send(Frame::BackendLog {
                message: message.to_string(),
            })
            .await;
    }

    async fn log(&self, tool: &str, chunk: &str, is_error: bool) {
        let _ = self
            .tx
            .send(Frame::ToolLog {
                tool: tool.to_string(),
                output: chunk.to_string(),
                is_error,
            })
            .await;
    }

    async fn tool_started(&self, tool: &str, call_id: &str) {
        let _ = self
            .tx
            .send(Frame::ToolStart {
                tool: tool.to_string(),
                tool_id: call_id.to_string(),
            })
            .await;
    }

    async fn tool_finished(&self, tool: &str, call_id: &str, result_preview: &str, is_error: bool) {
        let _ = self
            .tx
            .send(Frame::ToolResult {
                tool: tool.to_string(),
                tool_id: call_id.to_string(),
                result: result_preview.to_string(),
                is_error,
            })
            .await;
    }
}

/// Drive the orchestrator for one user message with the live connection as
/// progress sink. Every send tolerates a closed peer.
async fn run_synchronous(
    state: AppState,
    mut conversation: tokio::sync::OwnedMutexGuard<Conversation>,
    tx: mpsc::Sender<Frame>,
    models: ModelSelection,
    effective_content: Option<String>,
) {
    let conv_id = conversation.id.clone();

    state.conns.broadcast_to(&conv_id, Frame::processing()).await;
    let cancel = state.cancel_map.register(&conv_id);
    let sink: Arc<dyn ProgressSink> = Arc::new(ConnectionSink { tx: tx.clone() });

    let outcome = state
        .orchestrator
        .process_message(
            &conversation,
            &models,
            cancel,
            sink,
            false,
            effective_content,
        )
        .await;

    state.cancel_map.remove(&conv_id);

    if outcome.cancelled {
        // The conversation keeps the user message as its last entry.
        let _ = tx.send(Frame::Cancelled).await;
        state.conns.broadcast_to(&conv_id, Frame::idle()).await;
        return;
    }

    let assistant = Message::assistant(outcome.content.clone());
    let message_id = assistant.id.clone();
    conversation.messages.push(assistant);
    conversation.updated_at = Utc::now();
    if let Err(e) = state.conversations.save(&conversation) {
        tracing::error!(conversation_id = %conv_id, error = %e, "conversation save failed");
        let _ = tx
            .send(Frame::Error {
                content: format!("Erro ao salvar conversa: {e}"),
            })
            .await;
    }

    let tool_calls = (!outcome.tool_calls.is_empty()).then_some(outcome.tool_calls);
    let _ = tx
        .send(Frame::Message {
            role: "assistant",
            content: outcome.content,
            message_id: Some(message_id),
            tool_calls,
        })
        .await;

    state.conns.broadcast_to(&conv_id, Frame::idle()).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison_is_exact() {
        let hash = Sha256::digest(b"segredo").to_vec();
        assert!(token_matches(&hash, "segredo"));
        assert!(!token_matches(&hash, "errado"));
        assert!(!token_matches(&hash, ""));
    }
}
