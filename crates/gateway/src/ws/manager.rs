//! Connection manager — routes real-time frames to observer connections.
//!
//! Each connection registers an outbound channel sender; a per-connection
//! writer task drains it into the socket, so frames to a single peer keep
//! their dispatch order. The two indices are mutated under one mutex held
//! only across map updates, never across sends. Fan-out is parallel and a
//! dead peer never stalls the others: failures are collected and pruned
//! asynchronously after the broadcast.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::frames::Frame;

/// Identifies one observer connection for the lifetime of its socket.
pub type ConnId = Uuid;

#[derive(Default)]
struct Indices {
    /// conversation id → observing connections.
    by_conversation: HashMap<String, HashSet<ConnId>>,
    /// connection → its current conversation.
    conversation_of: HashMap<ConnId, String>,
    /// every live connection, for global broadcast.
    senders: HashMap<ConnId, mpsc::Sender<Frame>>,
}

pub struct ConnectionManager {
    indices: Mutex<Indices>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            indices: Mutex::new(Indices::default()),
        }
    }

    /// Register a connection's outbound sender and bind it to a
    /// conversation. Re-attaching moves the connection atomically; a
    /// connection observes at most one conversation at a time.
    pub fn attach(
        &self,
        conn: ConnId,
        conversation_id: &str,
        sender: mpsc::Sender<Frame>,
    ) {
        let mut indices = self.indices.lock();
        if let Some(previous) = indices.conversation_of.remove(&conn) {
            if let Some(set) = indices.by_conversation.get_mut(&previous) {
                set.remove(&conn);
                if set.is_empty() {
                    indices.by_conversation.remove(&previous);
                }
            }
        }
        indices
            .by_conversation
            .entry(conversation_id.to_string())
            .or_default()
            .insert(conn);
        indices
            .conversation_of
            .insert(conn, conversation_id.to_string());
        indices.senders.insert(conn, sender);
        tracing::debug!(%conn, conversation_id, "connection attached");
    }

    /// Remove a connection from every index. Idempotent.
    pub fn detach(&self, conn: ConnId) {
        let mut indices = self.indices.lock();
        if let Some(conversation) = indices.conversation_of.remove(&conn) {
            if let Some(set) = indices.by_conversation.get_mut(&conversation) {
                set.remove(&conn);
                if set.is_empty() {
                    indices.by_conversation.remove(&conversation);
                }
            }
        }
        indices.senders.remove(&conn);
        tracing::debug!(%conn, "connection detached");
    }

    pub fn connection_count(&self) -> usize {
        self.indices.lock().senders.len()
    }

    pub fn observers_of(&self, conversation_id: &str) -> usize {
        self.indices
            .lock()
            .by_conversation
            .get(conversation_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// Send a frame to every observer of one conversation. Returns the
    /// number of successful deliveries.
    pub async fn broadcast_to(self: &Arc<Self>, conversation_id: &str, frame: Frame) -> usize {
        let targets: Vec<(ConnId, mpsc::Sender<Frame>)> = {
            let indices = self.indices.lock();
            match indices.by_conversation.get(conversation_id) {
                Some(set) => set
                    .iter()
                    .filter_map(|conn| {
                        indices.senders.get(conn).map(|tx| (*conn, tx.clone()))
                    })
                    .collect(),
                None => return 0,
            }
        };
        self.fan_out(targets, frame).await
    }

    /// Send a frame to every live connection. Returns the number of
    /// successful deliveries.
    pub async fn broadcast_all(self: &Arc<Self>, frame: Frame) -> usize {
        let targets: Vec<(ConnId, mpsc::Sender<Frame>)> = {
            let indices = self.indices.lock();
            indices
                .senders
                .iter()
                .map(|(conn, tx)| (*conn, tx.clone()))
                .collect()
        };
        self.fan_out(targets, frame).await
    }

    async fn fan_out(
        self: &Arc<Self>,
        targets: Vec<(ConnId, mpsc::Sender<Frame>)>,
        frame: Frame,
    ) -> usize {
        if targets.is_empty() {
            return 0;
        }

        let sends = targets.into_iter().map(|(conn, tx)| {
            let frame = frame.clone();
            async move { (conn, tx.send(frame).await.is_ok()) }
        });
        let results = futures_util::future::join_all(sends).await;

        let mut sent = 0;
        let mut failed: Vec<ConnId> = Vec::new();
        for (conn, ok) in results {
            if ok {
                sent += 1;
            } else {
                failed.push(conn);
            }
        }

        // Dead peers are removed after the broadcast completes so a single
        // closed channel never delays the healthy ones.
        if !failed.is_empty() {
            tracing::debug!(failed = failed.len(), "pruning dead connections");
            let manager = self.clone();
            tokio::spawn(async move {
                for conn in failed {
                    manager.detach(conn);
                }
            });
        }

        sent
    }

    // ── Task convenience wrappers ─────────────────────────────────
    //
    // Task progress and status go to every live connection, not only the
    // task's conversation: a user viewing another conversation still sees
    // activity in their sidebar. Each frame carries the conversation id
    // for client-side demultiplexing.

    pub async fn send_task_progress(
        self: &Arc<Self>,
        conversation_id: &str,
        task_id: Uuid,
        message: &str,
        step_type: &str,
    ) -> usize {
        self.broadcast_all(Frame::TaskProgress {
            task_id: task_id.to_string(),
            conversation_id: conversation_id.to_string(),
            message: message.to_string(),
            step_type: step_type.to_string(),
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn send_task_status(
        self: &Arc<Self>,
        conversation_id: &str,
        task_id: Uuid,
        status: &str,
        result: Option<String>,
        error: Option<String>,
        tool_calls: Option<Vec<serde_json::Value>>,
    ) -> usize {
        self.broadcast_all(Frame::TaskStatus {
            task_id: task_id.to_string(),
            conversation_id: conversation_id.to_string(),
            status: status.to_string(),
            result,
            error,
            tool_calls,
        })
        .await
    }
}
