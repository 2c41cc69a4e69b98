use std::sync::Arc;

use hermes_conversations::ConversationStore;
use hermes_domain::config::Config;
use hermes_memory::RetrievalStore;
use hermes_providers::ModelClient;
use hermes_sandbox::SandboxManager;
use hermes_tools::ToolRegistry;

use crate::runtime::cancel::CancelMap;
use crate::runtime::orchestrator::Orchestrator;
use crate::runtime::queue::TaskQueue;
use crate::runtime::rate_limit::RateLimiter;
use crate::runtime::worker::Worker;
use crate::uploads::FileStore;
use crate::ws::manager::ConnectionManager;

/// Shared application state passed to all handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, model client, tool registry, sandbox,
///   retrieval store
/// - **Persistence** — conversations, uploads, task queue
/// - **Runtime** — orchestrator, worker, connection manager, cancel map,
///   rate limiter
/// - **Security** — startup-hashed observer token
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────
    pub config: Arc<Config>,
    pub client: Arc<ModelClient>,
    pub registry: Arc<ToolRegistry>,
    pub sandbox: Arc<SandboxManager>,
    pub retrieval: Arc<dyn RetrievalStore>,

    // ── Persistence ───────────────────────────────────────────────
    pub conversations: Arc<ConversationStore>,
    pub uploads: Arc<FileStore>,
    pub queue: Arc<TaskQueue>,

    // ── Runtime ───────────────────────────────────────────────────
    pub orchestrator: Arc<Orchestrator>,
    pub worker: Arc<Worker>,
    pub conns: Arc<ConnectionManager>,
    pub cancel_map: Arc<CancelMap>,
    pub rate_limiter: Arc<RateLimiter>,

    // ── Security (startup-computed) ───────────────────────────────
    /// SHA-256 hash of the observer bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
}
