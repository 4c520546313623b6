use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use backport_bot::backport::BackportRunner;
use backport_bot::config::{BackportConfig, ConfigError};
use backport_bot::git::RepoCredentials;
use backport_bot::github::OctocrabClient;
use backport_bot::server::build_router;
use backport_bot::types::{InvalidSlug, RepoSlug};

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0} must be set")]
    MissingVar(&'static str),

    #[error(transparent)]
    Repository(#[from] InvalidSlug),

    #[error("invalid listen address: {0}")]
    ListenAddr(#[from] AddrParseError),

    #[error("failed to build GitHub client: {0}")]
    GitHub(#[from] octocrab::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn required(var: &'static str) -> Result<String, StartupError> {
    std::env::var(var).map_err(|_| StartupError::MissingVar(var))
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backport_bot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = BackportConfig::from_env()?;
    let slug: RepoSlug = required("BACKPORT_REPOSITORY")?.parse()?;
    let token = required("GITHUB_TOKEN")?;
    let addr: SocketAddr = std::env::var("BACKPORT_LISTEN_ADDR")
        .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string())
        .parse()?;

    let github = Arc::new(OctocrabClient::from_token(token.clone(), slug.clone())?);
    let runner = BackportRunner::new(github, config, slug, RepoCredentials::token(token));
    info!(?runner, "Backport runner ready");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            shutdown.cancel();
        }
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", addr);
    axum::serve(listener, build_router())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!(
        active = runner.queue().active_count(),
        queued = runner.queue().queued_count(),
        "Shutting down, waiting for backport jobs"
    );
    runner.queue().wait_idle().await;
    Ok(())
}
