//! Capabilities the bot consumes from the outside world.
//!
//! The assignment engine only talks to GitHub and Slack through these traits.
//! [`crate::github::GitHubClient`] implements the GitHub-facing ones; tests
//! use the in-memory implementations in [`crate::testing`].

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::metrics::{DailyCount, RepositoryTotals, SummaryRow, TrafficKind};
use crate::review::{PullRequest, Review};

/// A team within an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: u64,
    pub name: String,
    pub slug: String,
}

/// Pull request reads and writes.
#[async_trait]
pub trait PullRequestSource: Send + Sync {
    /// Names of the organization's repositories.
    async fn list_repositories(&self, org: &str) -> Result<Vec<String>>;

    async fn list_open_pull_requests(&self, org: &str, repo: &str) -> Result<Vec<PullRequest>>;

    /// Logins of users currently requested to review. Team review requests
    /// are not included.
    async fn requested_reviewers(&self, org: &str, pr: &PullRequest) -> Result<Vec<String>>;

    /// Reviews in the order they were submitted.
    async fn reviews(&self, org: &str, pr: &PullRequest) -> Result<Vec<Review>>;

    async fn request_reviewer(&self, org: &str, pr: &PullRequest, login: &str) -> Result<()>;

    async fn add_assignee(&self, org: &str, pr: &PullRequest, login: &str) -> Result<()>;
}

#[async_trait]
pub trait TeamSource: Send + Sync {
    async fn list_teams(&self, org: &str) -> Result<Vec<Team>>;

    async fn list_team_members(&self, org: &str, team: &Team) -> Result<Vec<String>>;
}

#[async_trait]
pub trait StargazerSource: Send + Sync {
    async fn list_stargazers(&self, owner: &str, repo: &str) -> Result<Vec<String>>;
}

/// Repository engagement statistics.
#[async_trait]
pub trait EngagementSource: Send + Sync {
    /// Daily counts for the last two weeks, oldest first. The final entry is
    /// usually today and still accumulating.
    async fn daily_traffic(
        &self,
        owner: &str,
        repo: &str,
        kind: TrafficKind,
    ) -> Result<Vec<DailyCount>>;

    async fn repository_totals(&self, owner: &str, repo: &str) -> Result<RepositoryTotals>;

    async fn release_downloads(&self, owner: &str, repo: &str) -> Result<i64>;

    async fn contributor_count(&self, owner: &str, repo: &str) -> Result<i64>;

    async fn commit_count(&self, owner: &str, repo: &str) -> Result<i64>;
}

/// A field in a chat notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationField {
    pub title: String,
    pub value: String,
    pub short: bool,
}

/// A chat message with a colored sidebar, an icon and a title line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub color: String,
    pub icon_emoji: String,
    pub fields: Vec<NotificationField>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Row-oriented storage for engagement metrics keyed by date.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// The most recent date stored for this repository and traffic series.
    async fn last_traffic_date(
        &self,
        repo: &str,
        kind: TrafficKind,
    ) -> Result<Option<chrono::NaiveDate>>;

    async fn append_traffic(&self, repo: &str, kind: TrafficKind, rows: &[DailyCount])
        -> Result<()>;

    /// Insert the summary row, replacing one already stored for the same date.
    async fn upsert_summary(&self, row: &SummaryRow) -> Result<()>;
}
