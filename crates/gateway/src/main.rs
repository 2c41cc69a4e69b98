use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::{Parser, Subcommand};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use hermes_domain::config::Config;
use hermes_gateway::{api, bootstrap};

#[derive(Parser)]
#[command(name = "hermes", about = "Background AI agent server")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "hermes.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server (default).
    Serve,
    /// Config inspection.
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(clap::Args)]
struct ConfigCommand {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate the config file and report issues.
    Validate,
    /// Print the effective config (defaults applied).
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config(&cli.config)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand { action })) => {
            let config = load_config(&cli.config)?;
            match action {
                ConfigAction::Validate => {
                    let issues = config.validate();
                    for issue in &issues {
                        println!("{:?}: {issue}", issue.severity);
                    }
                    if issues
                        .iter()
                        .any(|i| i.severity == hermes_domain::config::ConfigSeverity::Error)
                    {
                        std::process::exit(1);
                    }
                    println!("config OK");
                }
                ConfigAction::Show => {
                    println!("{}", toml::to_string_pretty(&config)?);
                }
            }
            Ok(())
        }
        Some(Command::Version) => {
            println!("hermes {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the serve path.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hermes_gateway=debug")),
        )
        .json()
        .init();
}

/// Load the config file; a missing file yields the defaults.
fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    } else {
        Ok(Config::default())
    }
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Hermes starting");

    let state = bootstrap::build_app_state(config.clone()).await?;
    bootstrap::start_background(&state).await;

    let cors_layer = build_cors_layer(&config.server.allowed_origins);
    let app = api::router(state.clone())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(256))
        .with_state(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "Hermes listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("axum server error")?;

    // Give active background units their grace period before exiting.
    state.worker.stop().await;
    Ok(())
}

/// CORS from the configured origins; a lone `"*"` is fully permissive.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    use axum::http::header;

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if allowed_origins.len() == 1 && allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return layer.allow_origin(tower_http::cors::Any);
    }

    let exact: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(hv) => Some(hv),
            Err(_) => {
                tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(exact))
}
