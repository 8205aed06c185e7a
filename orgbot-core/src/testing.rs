//! In-memory implementations of the source traits.
//!
//! `FakeGitHub` behaves like the parts of GitHub the bot touches: requesting
//! a review adds the login to the requested list, and submitting a review
//! removes it. Individual operations can be made to fail by name.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::{Mutex, MutexGuard};

use crate::metrics::{DailyCount, RepositoryTotals, TrafficKind};
use crate::review::{PullRequest, Review};
use crate::source::{
    EngagementSource, Notification, NotificationSink, PullRequestSource, StargazerSource, Team,
    TeamSource,
};

type PrKey = (String, u64);

fn key(pr: &PullRequest) -> PrKey {
    (pr.repo.clone(), pr.number)
}

#[derive(Default)]
struct FakeState {
    repos: Vec<String>,
    prs: Vec<PullRequest>,
    requested: HashMap<PrKey, Vec<String>>,
    reviews: HashMap<PrKey, Vec<Review>>,
    teams: Vec<(Team, Vec<String>)>,
    stargazers: HashMap<String, Vec<String>>,
    traffic: HashMap<(String, TrafficKind), Vec<DailyCount>>,
    totals: HashMap<String, RepositoryTotals>,
    release_downloads: HashMap<String, i64>,
    contributors: HashMap<String, i64>,
    commits: HashMap<String, i64>,
    failing: HashSet<String>,
    failing_repos: HashSet<String>,
    calls: HashMap<String, usize>,
    review_requests: Vec<(PullRequest, String)>,
    assignees: Vec<(PullRequest, String)>,
}

#[derive(Default)]
pub struct FakeGitHub {
    state: Mutex<FakeState>,
}

impl FakeGitHub {
    pub fn new() -> Self {
        Self::default()
    }

    async fn enter(&self, op: &str) -> Result<MutexGuard<'_, FakeState>> {
        let mut state = self.state.lock().await;
        *state.calls.entry(op.to_string()).or_default() += 1;
        if state.failing.contains(op) {
            return Err(anyhow!("{} failed", op));
        }
        Ok(state)
    }

    /// Make every call to `op` fail until [`FakeGitHub::recover`].
    pub async fn fail(&self, op: &str) {
        self.state.lock().await.failing.insert(op.to_string());
    }

    pub async fn recover(&self, op: &str) {
        self.state.lock().await.failing.remove(op);
    }

    /// Make listing pull requests of `repo` fail.
    pub async fn fail_repository(&self, repo: &str) {
        self.state.lock().await.failing_repos.insert(repo.to_string());
    }

    pub async fn calls(&self, op: &str) -> usize {
        self.state.lock().await.calls.get(op).copied().unwrap_or(0)
    }

    /// Create a team, or replace the members of an existing one.
    pub async fn add_team(&self, name: &str, members: &[&str]) {
        let mut state = self.state.lock().await;
        let members: Vec<String> = members.iter().map(|m| m.to_string()).collect();
        if let Some((_, existing)) = state.teams.iter_mut().find(|(t, _)| t.name == name) {
            *existing = members;
            return;
        }
        let id = state.teams.len() as u64 + 1;
        state.teams.push((
            Team {
                id,
                name: name.to_string(),
                slug: name.to_lowercase(),
            },
            members,
        ));
    }

    pub async fn add_pull_request(&self, pr: PullRequest) {
        let mut state = self.state.lock().await;
        if !state.repos.contains(&pr.repo) {
            state.repos.push(pr.repo.clone());
        }
        state.prs.push(pr);
    }

    /// Submit a review. Like GitHub, this clears the reviewer's pending
    /// review request.
    pub async fn add_review(&self, pr: &PullRequest, review: Review) {
        let mut state = self.state.lock().await;
        if let Some(requested) = state.requested.get_mut(&key(pr)) {
            requested.retain(|login| *login != review.reviewer);
        }
        state.reviews.entry(key(pr)).or_default().push(review);
    }

    pub async fn set_requested(&self, pr: &PullRequest, logins: &[&str]) {
        let mut state = self.state.lock().await;
        state
            .requested
            .insert(key(pr), logins.iter().map(|l| l.to_string()).collect());
    }

    pub async fn set_stargazers(&self, repo: &str, logins: &[&str]) {
        let mut state = self.state.lock().await;
        state.stargazers.insert(
            repo.to_string(),
            logins.iter().map(|l| l.to_string()).collect(),
        );
    }

    pub async fn set_traffic(&self, repo: &str, kind: TrafficKind, data: Vec<DailyCount>) {
        let mut state = self.state.lock().await;
        state.traffic.insert((repo.to_string(), kind), data);
    }

    pub async fn set_totals(
        &self,
        repo: &str,
        totals: RepositoryTotals,
        release_downloads: i64,
        contributors: i64,
        commits: i64,
    ) {
        let mut state = self.state.lock().await;
        state.totals.insert(repo.to_string(), totals);
        state
            .release_downloads
            .insert(repo.to_string(), release_downloads);
        state.contributors.insert(repo.to_string(), contributors);
        state.commits.insert(repo.to_string(), commits);
    }

    pub async fn review_requests(&self) -> Vec<(PullRequest, String)> {
        self.state.lock().await.review_requests.clone()
    }

    pub async fn assignees(&self) -> Vec<(PullRequest, String)> {
        self.state.lock().await.assignees.clone()
    }
}

#[async_trait]
impl PullRequestSource for FakeGitHub {
    async fn list_repositories(&self, _org: &str) -> Result<Vec<String>> {
        Ok(self.enter("list_repositories").await?.repos.clone())
    }

    async fn list_open_pull_requests(&self, _org: &str, repo: &str) -> Result<Vec<PullRequest>> {
        let state = self.enter("list_open_pull_requests").await?;
        if state.failing_repos.contains(repo) {
            return Err(anyhow!("listing pull requests of {} failed", repo));
        }
        Ok(state.prs.iter().filter(|pr| pr.repo == repo).cloned().collect())
    }

    async fn requested_reviewers(&self, _org: &str, pr: &PullRequest) -> Result<Vec<String>> {
        let state = self.enter("requested_reviewers").await?;
        Ok(state.requested.get(&key(pr)).cloned().unwrap_or_default())
    }

    async fn reviews(&self, _org: &str, pr: &PullRequest) -> Result<Vec<Review>> {
        let state = self.enter("reviews").await?;
        Ok(state.reviews.get(&key(pr)).cloned().unwrap_or_default())
    }

    async fn request_reviewer(&self, _org: &str, pr: &PullRequest, login: &str) -> Result<()> {
        let mut state = self.enter("request_reviewer").await?;
        state
            .requested
            .entry(key(pr))
            .or_default()
            .push(login.to_string());
        state.review_requests.push((pr.clone(), login.to_string()));
        Ok(())
    }

    async fn add_assignee(&self, _org: &str, pr: &PullRequest, login: &str) -> Result<()> {
        let mut state = self.enter("add_assignee").await?;
        state.assignees.push((pr.clone(), login.to_string()));
        Ok(())
    }
}

#[async_trait]
impl TeamSource for FakeGitHub {
    async fn list_teams(&self, _org: &str) -> Result<Vec<Team>> {
        let state = self.enter("list_teams").await?;
        Ok(state.teams.iter().map(|(t, _)| t.clone()).collect())
    }

    async fn list_team_members(&self, _org: &str, team: &Team) -> Result<Vec<String>> {
        let state = self.enter("list_team_members").await?;
        state
            .teams
            .iter()
            .find(|(t, _)| t.id == team.id)
            .map(|(_, members)| members.clone())
            .ok_or_else(|| anyhow!("no team with id {}", team.id))
    }
}

#[async_trait]
impl StargazerSource for FakeGitHub {
    async fn list_stargazers(&self, _owner: &str, repo: &str) -> Result<Vec<String>> {
        let state = self.enter("list_stargazers").await?;
        Ok(state.stargazers.get(repo).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl EngagementSource for FakeGitHub {
    async fn daily_traffic(
        &self,
        _owner: &str,
        repo: &str,
        kind: TrafficKind,
    ) -> Result<Vec<DailyCount>> {
        let state = self.enter("daily_traffic").await?;
        Ok(state
            .traffic
            .get(&(repo.to_string(), kind))
            .cloned()
            .unwrap_or_default())
    }

    async fn repository_totals(&self, _owner: &str, repo: &str) -> Result<RepositoryTotals> {
        let state = self.enter("repository_totals").await?;
        state
            .totals
            .get(repo)
            .copied()
            .ok_or_else(|| anyhow!("unknown repository {}", repo))
    }

    async fn release_downloads(&self, _owner: &str, repo: &str) -> Result<i64> {
        let state = self.enter("release_downloads").await?;
        Ok(state.release_downloads.get(repo).copied().unwrap_or(0))
    }

    async fn contributor_count(&self, _owner: &str, repo: &str) -> Result<i64> {
        let state = self.enter("contributor_count").await?;
        Ok(state.contributors.get(repo).copied().unwrap_or(0))
    }

    async fn commit_count(&self, _owner: &str, repo: &str) -> Result<i64> {
        let state = self.enter("commit_count").await?;
        Ok(state.commits.get(repo).copied().unwrap_or(0))
    }
}

/// Notification sink that keeps every message it is given.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Notification>>,
    failing: Mutex<bool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }

    pub async fn set_failing(&self, failing: bool) {
        *self.failing.lock().await = failing;
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        if *self.failing.lock().await {
            return Err(anyhow!("notification sink unavailable"));
        }
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }
}
