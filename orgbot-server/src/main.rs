use anyhow::{Context, Result};
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use orgbot_core::{Assigner, Cursors, GitHubClient, TeamRegistry};
use orgbot_server::config::Config;
use orgbot_server::metrics::MetricsRecorder;
use orgbot_server::metrics_store::SqliteMetricsStore;
use orgbot_server::scheduler::{metrics_loop, stargazer_loop, sweep_loop};
use orgbot_server::slack::SlackNotifier;
use orgbot_server::stargazers::StargazerWatcher;
use orgbot_server::status::status_handler;
use orgbot_server::webhook::webhook_router;
use orgbot_server::AppState;

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "orgbot"
    })))
}

async fn help_handler() -> Json<serde_json::Value> {
    Json(json!({
        "service": "orgbot",
        "version": orgbot_server::get_bot_version(),
        "description": "Round-robin reviewer assignment for a GitHub organization",
        "endpoints": [
            {
                "path": "/health",
                "method": "GET",
                "description": "Health check endpoint",
                "authentication": "None"
            },
            {
                "path": "/webhook",
                "method": "POST",
                "description": "GitHub webhook receiver; pull request and review events trigger a sweep",
                "authentication": "GitHub webhook signature (X-Hub-Signature-256)"
            },
            {
                "path": "/help",
                "method": "GET",
                "description": "API documentation and service information",
                "authentication": "None"
            },
            {
                "path": "/status",
                "method": "GET",
                "description": "Cached teams, rotation cursors and the last sweep report",
                "authentication": "Bearer token (STATUS_AUTH_TOKEN)"
            }
        ],
        "features": [
            "Requests a first reviewer from the reviewer team for unreviewed pull requests",
            "Escalates to a committer once a non-committer has approved",
            "Periodic sweeps of every open pull request in the organization",
            "Stargazer change notifications to Slack",
            "Daily traffic and repository statistics in SQLite"
        ],
        "configuration": {
            "required_env_vars": [
                "GITHUB_TOKEN",
                "GITHUB_ORG",
                "GITHUB_WEBHOOK_SECRET"
            ],
            "optional_env_vars": [
                "REVIEWER_TEAM (default: Reviewers)",
                "COMMITTER_TEAM (default: Committers)",
                "ASSIGN_AS_ASSIGNEE (default: false)",
                "PORT (default: 3000)",
                "SWEEP_INTERVAL_SECS (default: 600)",
                "TEAM_REFRESH_SECS (default: 3600)",
                "HTTP_TIMEOUT_SECS (default: 5)",
                "SLACK_WEBHOOK_URL (default: notifications disabled)",
                "SLACK_CHANNEL (default: #github)",
                "STARGAZER_REPOS (comma-separated)",
                "STARGAZER_INTERVAL_SECS (default: 600)",
                "METRICS_REPOS (comma-separated)",
                "METRICS_INTERVAL_SECS (default: 86400)",
                "STATE_DIR (default: current directory)",
                "STATUS_AUTH_TOKEN (default: /status disabled)"
            ]
        }
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting orgbot {}", orgbot_server::get_bot_version());

    let config = Config::from_env().context("Failed to load configuration from environment variables")?;

    let github = Arc::new(GitHubClient::new(config.github_token.clone(), config.http_timeout)?);

    let registry = Arc::new(TeamRegistry::new(
        github.clone(),
        config.github_org.clone(),
        config.team_roles.clone(),
        config.team_refresh_interval,
    ));

    let cursors = Cursors::seeded();
    info!(
        "Rotation cursors start at {} (members) and {} (committers)",
        cursors.members, cursors.committers
    );
    let assigner = Arc::new(Assigner::new(
        github.clone(),
        registry.clone(),
        config.github_org.clone(),
        config.assign_as_assignee,
        cursors,
    ));

    let app_state = Arc::new(AppState::new(
        assigner,
        registry,
        config.github_webhook_secret.clone(),
        config.status_auth_token.clone(),
    ));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/help", get(help_handler))
        .route("/status", get(status_handler))
        .merge(webhook_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state.clone());

    tokio::spawn(sweep_loop(app_state.clone(), config.sweep_interval));

    if !config.stargazer_repos.is_empty() {
        match &config.slack_webhook_url {
            Some(url) => {
                let slack = Arc::new(SlackNotifier::new(
                    url.clone(),
                    config.slack_channel.clone(),
                    config.http_timeout,
                )?);
                let watcher = Arc::new(StargazerWatcher::new(
                    github.clone(),
                    slack,
                    config.github_org.clone(),
                ));
                info!(
                    "Watching stargazers of {}",
                    config.stargazer_repos.join(", ")
                );
                tokio::spawn(stargazer_loop(
                    watcher,
                    config.stargazer_repos.clone(),
                    config.stargazer_interval,
                ));
            }
            None => warn!("STARGAZER_REPOS is set but SLACK_WEBHOOK_URL is not; stargazer notifications disabled"),
        }
    }

    if !config.metrics_repos.is_empty() {
        let store = Arc::new(
            SqliteMetricsStore::open_in(&config.state_dir)
                .context("Failed to initialize metrics database")?,
        );
        let recorder = Arc::new(MetricsRecorder::new(
            github.clone(),
            store,
            config.github_org.clone(),
        ));
        tokio::spawn(metrics_loop(
            recorder,
            config.metrics_repos.clone(),
            config.metrics_interval,
        ));
    }

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
