use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use orgbot_core::team::{DEFAULT_COMMITTER_TEAM, DEFAULT_REVIEWER_TEAM};
use orgbot_core::TeamRoles;

#[derive(Clone)]
pub struct Config {
    pub github_token: String,
    pub github_org: String,
    pub github_webhook_secret: String,
    pub team_roles: TeamRoles,
    /// Also add the chosen reviewer as an issue assignee.
    pub assign_as_assignee: bool,
    pub port: u16,
    pub sweep_interval: Duration,
    pub team_refresh_interval: Duration,
    /// Timeout applied to every outbound HTTP request.
    pub http_timeout: Duration,
    /// Incoming webhook URL for chat notifications. Notifications are
    /// disabled when unset.
    pub slack_webhook_url: Option<String>,
    pub slack_channel: String,
    pub stargazer_repos: Vec<String>,
    pub stargazer_interval: Duration,
    pub metrics_repos: Vec<String>,
    pub metrics_interval: Duration,
    /// Directory for the metrics database. Defaults to the current directory.
    pub state_dir: PathBuf,
    /// Bearer token for `/status`. If not set, `/status` returns 403.
    pub status_auth_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |name: &str| parse_optional(lookup(name));

        let github_token =
            optional("GITHUB_TOKEN").context("GITHUB_TOKEN environment variable is required")?;

        let github_org =
            optional("GITHUB_ORG").context("GITHUB_ORG environment variable is required")?;

        let github_webhook_secret = optional("GITHUB_WEBHOOK_SECRET")
            .context("GITHUB_WEBHOOK_SECRET environment variable is required")?;

        let team_roles = TeamRoles {
            reviewers: optional("REVIEWER_TEAM").unwrap_or_else(|| DEFAULT_REVIEWER_TEAM.to_string()),
            committers: optional("COMMITTER_TEAM")
                .unwrap_or_else(|| DEFAULT_COMMITTER_TEAM.to_string()),
        };

        let assign_as_assignee = parse_or("ASSIGN_AS_ASSIGNEE", optional("ASSIGN_AS_ASSIGNEE"), false)?;

        let port = parse_or("PORT", optional("PORT"), 3000u16)?;

        let sweep_interval = parse_secs("SWEEP_INTERVAL_SECS", optional("SWEEP_INTERVAL_SECS"), 600)?;
        let team_refresh_interval =
            parse_secs("TEAM_REFRESH_SECS", optional("TEAM_REFRESH_SECS"), 3600)?;
        let http_timeout = parse_secs("HTTP_TIMEOUT_SECS", optional("HTTP_TIMEOUT_SECS"), 5)?;

        let slack_webhook_url = optional("SLACK_WEBHOOK_URL");
        let slack_channel = optional("SLACK_CHANNEL").unwrap_or_else(|| "#github".to_string());

        let stargazer_repos = parse_list(optional("STARGAZER_REPOS"));
        let stargazer_interval =
            parse_secs("STARGAZER_INTERVAL_SECS", optional("STARGAZER_INTERVAL_SECS"), 600)?;

        let metrics_repos = parse_list(optional("METRICS_REPOS"));
        let metrics_interval =
            parse_secs("METRICS_INTERVAL_SECS", optional("METRICS_INTERVAL_SECS"), 86400)?;

        let state_dir = optional("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let status_auth_token = optional("STATUS_AUTH_TOKEN");

        Ok(Config {
            github_token,
            github_org,
            github_webhook_secret,
            team_roles,
            assign_as_assignee,
            port,
            sweep_interval,
            team_refresh_interval,
            http_timeout,
            slack_webhook_url,
            slack_channel,
            stargazer_repos,
            stargazer_interval,
            metrics_repos,
            metrics_interval,
            state_dir,
            status_auth_token,
        })
    }
}

/// Treat missing, empty, and whitespace-only values alike as unset.
///
/// An empty `STATUS_AUTH_TOKEN` must not turn into a token that matches an
/// empty bearer header.
pub fn parse_optional(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn parse_or<T: FromStr>(name: &str, value: Option<String>, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(v) => v
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: {}", name, v)),
        None => Ok(default),
    }
}

fn parse_secs(name: &str, value: Option<String>, default: u64) -> Result<Duration> {
    let secs = parse_or(name, value, default)?;
    anyhow::ensure!(secs > 0, "{} must be greater than zero", name);
    Ok(Duration::from_secs(secs))
}

/// Comma-separated list, ignoring blanks.
fn parse_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
