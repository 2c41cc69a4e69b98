//! AppState construction — every subsystem wired explicitly at startup,
//! acquired by handlers through the state rather than implicit globals.

use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};

use hermes_conversations::ConversationStore;
use hermes_domain::config::{Config, ConfigSeverity};
use hermes_memory::create_store;
use hermes_providers::ModelClient;
use hermes_sandbox::SandboxManager;
use hermes_tools::ToolRegistry;

use crate::runtime::cancel::CancelMap;
use crate::runtime::orchestrator::Orchestrator;
use crate::runtime::queue::TaskQueue;
use crate::runtime::rate_limit::RateLimiter;
use crate::runtime::worker::Worker;
use crate::state::AppState;
use crate::uploads::FileStore;
use crate::ws::manager::ConnectionManager;

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ─────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Data roots ────────────────────────────────────────────────
    for dir in [
        &config.paths.data_dir,
        &config.paths.uploads_dir,
        &config.paths.outputs_dir,
    ] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating data root {}", dir.display()))?;
    }

    // ── Model client ──────────────────────────────────────────────
    let client = Arc::new(ModelClient::from_config(&config.llm));
    tracing::info!(
        base_url = %config.llm.base_url,
        primary = %config.llm.primary_model,
        secondary = %config.llm.secondary_model,
        "model client ready"
    );

    // ── Retrieval store ───────────────────────────────────────────
    let retrieval = create_store(&config.retrieval);
    tracing::info!("retrieval store client ready");

    // ── Sandbox manager ───────────────────────────────────────────
    let sandbox = Arc::new(SandboxManager::new(config.sandbox.clone(), &config.paths));
    tracing::info!(image = %config.sandbox.image, "sandbox manager ready");

    // ── Tool registry ─────────────────────────────────────────────
    let registry = Arc::new(ToolRegistry::builtin());
    tracing::info!(tools = registry.len(), "tool registry ready");

    // ── Conversations + uploads ───────────────────────────────────
    let conversations = Arc::new(
        ConversationStore::new(&config.paths.conversations_dir)
            .context("initializing conversation store")?,
    );
    let uploads = Arc::new(
        FileStore::new(&config.paths.uploads_dir).context("initializing upload store")?,
    );
    tracing::info!(
        conversations_dir = %config.paths.conversations_dir.display(),
        "conversation + upload stores ready"
    );

    // ── Task queue ────────────────────────────────────────────────
    let queue = Arc::new(
        TaskQueue::open(&config.paths.tasks_db)
            .await
            .context("opening task queue database")?,
    );

    // ── Connection manager + cancel map + rate limiter ────────────
    let conns = Arc::new(ConnectionManager::new());
    let cancel_map = Arc::new(CancelMap::new());
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    tracing::info!("connection manager ready");

    // ── Orchestrator ──────────────────────────────────────────────
    let orchestrator = Arc::new(Orchestrator::new(
        client.clone(),
        registry.clone(),
        sandbox.clone(),
        retrieval.clone(),
        config.llm.clone(),
        config.tools.clone(),
        config.paths.allowed_roots(),
        &config.worker,
    ));
    tracing::info!(
        max_iterations = config.worker.clamped().max_iterations,
        "orchestrator ready"
    );

    // ── Background worker ─────────────────────────────────────────
    let worker = Worker::new(
        queue.clone(),
        conns.clone(),
        conversations.clone(),
        orchestrator.clone(),
        uploads.clone(),
        config.llm.default_selection(),
        config.worker.clone(),
    );

    // ── Observer token (read once, hash for constant-time compare) ─
    let api_token_hash = {
        let env_var = &config.server.api_token_env;
        match std::env::var(env_var) {
            Ok(token) if !token.is_empty() => {
                tracing::info!(env_var = %env_var, "observer token auth enabled");
                Some(Sha256::digest(token.as_bytes()).to_vec())
            }
            _ => {
                tracing::warn!(
                    env_var = %env_var,
                    "observer token auth DISABLED — set {env_var} to enable"
                );
                None
            }
        }
    };

    Ok(AppState {
        config,
        client,
        registry,
        sandbox,
        retrieval,
        conversations,
        uploads,
        queue,
        orchestrator,
        worker,
        conns,
        cancel_map,
        rate_limiter,
        api_token_hash,
    })
}

/// Spawn the long-running background tasks: the worker pool (queue drain +
/// cleanup) and periodic rate-limiter pruning.
pub async fn start_background(state: &AppState) {
    state.worker.start().await;

    let rate_limiter = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rate_limiter.prune_idle();
        }
    });
}
