//! GitHub REST client backing the pull request, team, stargazer and
//! engagement sources.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, LINK};
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info};

use crate::metrics::{DailyCount, RepositoryTotals, TrafficKind};
use crate::middleware::create_http_client;
use crate::review::{PullRequest, Review, ReviewState};
use crate::source::{EngagementSource, PullRequestSource, StargazerSource, Team, TeamSource};

pub const GITHUB_API_URL: &str = "https://api.github.com";

/// Login GitHub reports for reviews whose author account was deleted.
const GHOST_LOGIN: &str = "ghost";

const PER_PAGE: u32 = 100;

/// GitHub REST client authenticated with a static token.
#[derive(Clone)]
pub struct GitHubClient {
    client: ClientWithMiddleware,
    token: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryResponse {
    name: String,
    #[serde(default)]
    archived: bool,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    number: u64,
    #[serde(default)]
    title: String,
    user: Option<UserResponse>,
    base: PullRequestBaseResponse,
}

#[derive(Debug, Deserialize)]
struct PullRequestBaseResponse {
    repo: RepositoryResponse,
}

#[derive(Debug, Deserialize)]
struct RequestedReviewersResponse {
    users: Vec<UserResponse>,
}

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    user: Option<UserResponse>,
    state: ReviewState,
}

#[derive(Debug, Deserialize)]
struct TeamResponse {
    id: u64,
    name: String,
    slug: String,
}

#[derive(Debug, Deserialize)]
struct TrafficResponse {
    #[serde(default)]
    views: Vec<TrafficPoint>,
    #[serde(default)]
    clones: Vec<TrafficPoint>,
}

#[derive(Debug, Deserialize)]
struct TrafficPoint {
    timestamp: DateTime<Utc>,
    count: i64,
    uniques: i64,
}

#[derive(Debug, Deserialize)]
struct RepositoryStatsResponse {
    stargazers_count: i64,
    forks_count: i64,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    #[serde(default)]
    assets: Vec<ReleaseAssetResponse>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAssetResponse {
    download_count: i64,
}

#[derive(Debug, Serialize)]
struct RequestReviewersRequest<'a> {
    reviewers: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct AddAssigneesRequest<'a> {
    assignees: [&'a str; 1],
}

impl GitHubClient {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: create_http_client("github", timeout)?,
            token: token.into(),
            api_base: GITHUB_API_URL.to_string(),
        })
    }

    /// Point the client at a different API root, e.g. GitHub Enterprise.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.api_base, path)
        }
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", path))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("GitHub API error: {} - {}", status, error_text);
            return Err(anyhow!("GitHub API error: {} - {}", status, error_text));
        }

        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get(path)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", path))
    }

    /// GET every page of a list endpoint, following `Link: rel="next"`.
    async fn get_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(with_query(path, &format!("per_page={}", PER_PAGE)));

        while let Some(page) = next {
            let response = self.get(&page).await?;
            next = parse_link_header(response.headers()).remove("next");
            let batch: Vec<T> = response
                .json()
                .await
                .with_context(|| format!("Failed to parse response from {}", page))?;
            items.extend(batch);
        }

        Ok(items)
    }

    /// Count the items of a list endpoint without fetching them all: with
    /// one item per page, the last page number is the total.
    async fn count_items(&self, path: &str) -> Result<i64> {
        let response = self.get(&with_query(path, "per_page=1")).await?;
        if let Some(last) = parse_link_header(response.headers()).get("last") {
            return page_number(last)
                .ok_or_else(|| anyhow!("No page number in last link {}", last));
        }
        let items: Vec<serde_json::Value> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", path))?;
        Ok(items.len() as i64)
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let response = self
            .client
            .post(self.url(path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github.v3+json")
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", path))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("GitHub API error: {} - {}", status, error_text);
            return Err(anyhow!("GitHub API error: {} - {}", status, error_text));
        }

        Ok(())
    }
}

#[async_trait]
impl PullRequestSource for GitHubClient {
    async fn list_repositories(&self, org: &str) -> Result<Vec<String>> {
        let repos: Vec<RepositoryResponse> =
            self.get_all(&format!("/orgs/{}/repos", org)).await?;
        Ok(repos
            .into_iter()
            .filter(|r| !r.archived)
            .map(|r| r.name)
            .collect())
    }

    async fn list_open_pull_requests(&self, org: &str, repo: &str) -> Result<Vec<PullRequest>> {
        let prs: Vec<PullRequestResponse> = self
            .get_all(&format!("/repos/{}/{}/pulls?state=open", org, repo))
            .await?;
        Ok(prs
            .into_iter()
            .map(|pr| PullRequest {
                repo: pr.base.repo.name,
                number: pr.number,
                author: pr
                    .user
                    .map(|u| u.login)
                    .unwrap_or_else(|| GHOST_LOGIN.to_string()),
                title: pr.title,
            })
            .collect())
    }

    async fn requested_reviewers(&self, org: &str, pr: &PullRequest) -> Result<Vec<String>> {
        let response: RequestedReviewersResponse = self
            .get_json(&format!(
                "/repos/{}/{}/pulls/{}/requested_reviewers",
                org, pr.repo, pr.number
            ))
            .await?;
        Ok(response.users.into_iter().map(|u| u.login).collect())
    }

    async fn reviews(&self, org: &str, pr: &PullRequest) -> Result<Vec<Review>> {
        let reviews: Vec<ReviewResponse> = self
            .get_all(&format!(
                "/repos/{}/{}/pulls/{}/reviews",
                org, pr.repo, pr.number
            ))
            .await?;
        Ok(reviews
            .into_iter()
            .map(|r| Review {
                reviewer: r
                    .user
                    .map(|u| u.login)
                    .unwrap_or_else(|| GHOST_LOGIN.to_string()),
                state: r.state,
            })
            .collect())
    }

    async fn request_reviewer(&self, org: &str, pr: &PullRequest, login: &str) -> Result<()> {
        self.post_json(
            &format!(
                "/repos/{}/{}/pulls/{}/requested_reviewers",
                org, pr.repo, pr.number
            ),
            &RequestReviewersRequest { reviewers: [login] },
        )
        .await?;
        info!("Requested review from {} on {}", login, pr);
        Ok(())
    }

    async fn add_assignee(&self, org: &str, pr: &PullRequest, login: &str) -> Result<()> {
        self.post_json(
            &format!("/repos/{}/{}/issues/{}/assignees", org, pr.repo, pr.number),
            &AddAssigneesRequest { assignees: [login] },
        )
        .await?;
        info!("Added {} as assignee on {}", login, pr);
        Ok(())
    }
}

#[async_trait]
impl TeamSource for GitHubClient {
    async fn list_teams(&self, org: &str) -> Result<Vec<Team>> {
        let teams: Vec<TeamResponse> = self.get_all(&format!("/orgs/{}/teams", org)).await?;
        Ok(teams
            .into_iter()
            .map(|t| Team {
                id: t.id,
                name: t.name,
                slug: t.slug,
            })
            .collect())
    }

    async fn list_team_members(&self, org: &str, team: &Team) -> Result<Vec<String>> {
        let members: Vec<UserResponse> = self
            .get_all(&format!("/orgs/{}/teams/{}/members", org, team.slug))
            .await?;
        Ok(members.into_iter().map(|m| m.login).collect())
    }
}

#[async_trait]
impl StargazerSource for GitHubClient {
    async fn list_stargazers(&self, owner: &str, repo: &str) -> Result<Vec<String>> {
        let users: Vec<UserResponse> = self
            .get_all(&format!("/repos/{}/{}/stargazers", owner, repo))
            .await?;
        Ok(users.into_iter().map(|u| u.login).collect())
    }
}

#[async_trait]
impl EngagementSource for GitHubClient {
    async fn daily_traffic(
        &self,
        owner: &str,
        repo: &str,
        kind: TrafficKind,
    ) -> Result<Vec<DailyCount>> {
        let response: TrafficResponse = self
            .get_json(&format!(
                "/repos/{}/{}/traffic/{}?per=day",
                owner,
                repo,
                kind.as_str()
            ))
            .await?;
        let points = match kind {
            TrafficKind::Views => response.views,
            TrafficKind::Clones => response.clones,
        };
        Ok(points
            .into_iter()
            .map(|p| DailyCount {
                date: p.timestamp.date_naive(),
                count: p.count,
                uniques: p.uniques,
            })
            .collect())
    }

    async fn repository_totals(&self, owner: &str, repo: &str) -> Result<RepositoryTotals> {
        let stats: RepositoryStatsResponse = self
            .get_json(&format!("/repos/{}/{}", owner, repo))
            .await?;
        Ok(RepositoryTotals {
            stars: stats.stargazers_count,
            forks: stats.forks_count,
        })
    }

    async fn release_downloads(&self, owner: &str, repo: &str) -> Result<i64> {
        let releases: Vec<ReleaseResponse> = self
            .get_all(&format!("/repos/{}/{}/releases", owner, repo))
            .await?;
        Ok(releases
            .iter()
            .flat_map(|r| r.assets.iter())
            .map(|a| a.download_count)
            .sum())
    }

    async fn contributor_count(&self, owner: &str, repo: &str) -> Result<i64> {
        self.count_items(&format!("/repos/{}/{}/contributors?anon=true", owner, repo))
            .await
    }

    async fn commit_count(&self, owner: &str, repo: &str) -> Result<i64> {
        self.count_items(&format!("/repos/{}/{}/commits", owner, repo))
            .await
    }
}

fn with_query(path: &str, param: &str) -> String {
    if path.contains('?') {
        format!("{}&{}", path, param)
    } else {
        format!("{}?{}", path, param)
    }
}

/// Parse an RFC 8288 `Link` header into a map of `rel` to URL.
fn parse_link_header(headers: &HeaderMap) -> HashMap<String, String> {
    let mut links = HashMap::new();
    let Some(value) = headers.get(LINK).and_then(|v| v.to_str().ok()) else {
        return links;
    };

    for part in value.split(',') {
        let mut segments = part.split(';');
        let Some(url) = segments
            .next()
            .map(str::trim)
            .and_then(|u| u.strip_prefix('<'))
            .and_then(|u| u.strip_suffix('>'))
        else {
            continue;
        };
        for segment in segments {
            if let Some(rel) = segment.trim().strip_prefix("rel=") {
                for name in rel.trim_matches('"').split_whitespace() {
                    links.insert(name.to_string(), url.to_string());
                }
            }
        }
    }

    links
}

/// The `page` query parameter of a pagination URL.
fn page_number(url: &str) -> Option<i64> {
    let query = url.split_once('?')?.1;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == "page")
        .and_then(|(_, v)| v.parse().ok())
}
