//! Agent gateway HTTP server.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gateway::config::{Config, GitHubAuth, LogFormat};
use gateway::github_client::GitHubClient;
use gateway::server::{run_server, AppState};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gateway=info,tower_http=info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    init_tracing(config.as_ref().map_or(LogFormat::Text, |c| c.log_format));

    let config = config.inspect_err(|e| error!("Invalid configuration: {e}"))?;

    let mode = match &config.github_auth {
        GitHubAuth::Token(_) => "PAT",
        GitHubAuth::App { .. } => "APP",
    };
    info!(
        port = config.port,
        github_mode = mode,
        repos = config.allowlist.len(),
        rate_limit = config.rate_limit.max_requests,
        rate_window_secs = config.rate_limit.window.num_seconds(),
        webhooks = config.webhook_secret.is_some(),
        jwt = config.jwt_secret.is_some(),
        "Starting agent gateway"
    );

    let client = GitHubClient::new(
        &config.github_api_url,
        config.github_auth.clone(),
        config.author.clone(),
    )
    .context("Failed to create GitHub client")?;

    let addr = format!("0.0.0.0:{}", config.port);
    let state = Arc::new(AppState::new(config, Arc::new(client)));

    run_server(state, &addr)
        .await
        .with_context(|| format!("Server on {addr} failed"))
}
