//! Cancellation flag and the abstract progress sink.
//!
//! Both the WebSocket handler and the background worker construct a sink;
//! the orchestrator and long-running tools depend only on these
//! abstractions, passed explicitly through the call stack.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::chat::StepType;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cancellation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared cancellation flag, polled by the orchestrator loop and by
/// long-running tools. Setting it is enough; no join is required.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Progress sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Receives orchestrator narration for persistence and broadcast.
///
/// Sinks must never fail the caller: delivery problems are the sink's to
/// swallow.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// A narration step (persisted to the progress log and/or broadcast).
    async fn emit(&self, message: &str, step: StepType);

    /// Raw streamed output from a running tool. Default: dropped.
    async fn log(&self, tool: &str, chunk: &str, is_error: bool) {
        let _ = (tool, chunk, is_error);
    }

    /// Structured tool-lifecycle notification, for sinks that render
    /// dedicated frames. Default: dropped (the narration `emit` already
    /// carries the start/end steps).
    async fn tool_started(&self, tool: &str, call_id: &str) {
        let _ = (tool, call_id);
    }

    /// Completion counterpart of [`ProgressSink::tool_started`];
    /// `result_preview` is pre-truncated to the broadcast-safe size.
    async fn tool_finished(&self, tool: &str, call_id: &str, result_preview: &str, is_error: bool) {
        let _ = (tool, call_id, result_preview, is_error);
    }
}

/// Sink used when nobody is observing.
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn emit(&self, _message: &str, _step: StepType) {}
}
