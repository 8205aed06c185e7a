//! Team membership with rate-limited caching.
//!
//! Reviewer and committer lists change rarely, and listing teams costs API
//! quota on every sweep, so [`TeamRegistry`] refetches at most once per
//! refresh interval and otherwise serves the cached snapshot.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::selector::PoolKind;
use crate::source::TeamSource;

pub const DEFAULT_REVIEWER_TEAM: &str = "Reviewers";
pub const DEFAULT_COMMITTER_TEAM: &str = "Committers";
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Names of the GitHub teams that back each role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamRoles {
    pub reviewers: String,
    pub committers: String,
}

impl Default for TeamRoles {
    fn default() -> Self {
        Self {
            reviewers: DEFAULT_REVIEWER_TEAM.to_string(),
            committers: DEFAULT_COMMITTER_TEAM.to_string(),
        }
    }
}

/// Members and committers of the organization at one point in time.
///
/// Committers are always a subset of members: a committer missing from the
/// reviewer team is appended to the member list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamSnapshot {
    members: Vec<String>,
    committers: Vec<String>,
}

impl TeamSnapshot {
    pub fn new(reviewers: Vec<String>, committers: Vec<String>) -> Self {
        let mut deduped_committers: Vec<String> = Vec::with_capacity(committers.len());
        for login in committers {
            if !deduped_committers.contains(&login) {
                deduped_committers.push(login);
            }
        }

        let mut members: Vec<String> = Vec::with_capacity(reviewers.len());
        for login in reviewers.into_iter().chain(deduped_committers.iter().cloned()) {
            if !members.contains(&login) {
                members.push(login);
            }
        }

        Self {
            members,
            committers: deduped_committers,
        }
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn committers(&self) -> &[String] {
        &self.committers
    }

    pub fn is_committer(&self, login: &str) -> bool {
        self.committers.iter().any(|c| c == login)
    }

    /// Candidates for the given rotation. The member rotation leaves
    /// committers out so the first review always goes to a non-committer.
    pub fn pool(&self, kind: PoolKind) -> Vec<String> {
        match kind {
            PoolKind::Members => self
                .members
                .iter()
                .filter(|m| !self.is_committer(m))
                .cloned()
                .collect(),
            PoolKind::Committers => self.committers.clone(),
        }
    }
}

/// Result of asking the registry for the current teams.
#[derive(Debug)]
pub struct TeamLookup {
    /// Most recent successfully fetched snapshot, if there ever was one.
    pub snapshot: Option<Arc<TeamSnapshot>>,
    /// Set when a refresh was attempted and failed. The snapshot (if any) is
    /// then stale but still usable.
    pub refresh_error: Option<anyhow::Error>,
}

#[derive(Default)]
struct CacheState {
    snapshot: Option<Arc<TeamSnapshot>>,
    last_attempt: Option<Instant>,
}

pub struct TeamRegistry {
    source: Arc<dyn TeamSource>,
    org: String,
    roles: TeamRoles,
    refresh_interval: Duration,
    cache: RwLock<CacheState>,
    /// Held for the duration of a refresh so only one fetch runs at a time.
    refresh_lock: Mutex<()>,
}

impl TeamRegistry {
    pub fn new(
        source: Arc<dyn TeamSource>,
        org: impl Into<String>,
        roles: TeamRoles,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            source,
            org: org.into(),
            roles,
            refresh_interval,
            cache: RwLock::new(CacheState::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// The cached snapshot without triggering a refresh.
    pub async fn cached(&self) -> Option<Arc<TeamSnapshot>> {
        self.cache.read().await.snapshot.clone()
    }

    fn is_fresh(&self, state: &CacheState) -> bool {
        state.snapshot.is_some()
            && state
                .last_attempt
                .is_some_and(|at| at.elapsed() < self.refresh_interval)
    }

    /// Current reviewer and committer lists.
    ///
    /// Within the refresh interval the cached snapshot is returned as is.
    /// Otherwise both teams are refetched and swapped in together. When the
    /// refetch fails the previous snapshot is returned alongside the error.
    /// A failed attempt still counts against the interval once a snapshot
    /// exists; with nothing cached every call retries.
    pub async fn team_members(&self) -> TeamLookup {
        {
            let state = self.cache.read().await;
            if self.is_fresh(&state) {
                return TeamLookup {
                    snapshot: state.snapshot.clone(),
                    refresh_error: None,
                };
            }
        }

        let _refreshing = self.refresh_lock.lock().await;
        {
            // Another caller may have refreshed while we waited for the lock.
            let state = self.cache.read().await;
            if self.is_fresh(&state) {
                return TeamLookup {
                    snapshot: state.snapshot.clone(),
                    refresh_error: None,
                };
            }
        }

        // No cache lock is held across the fetch.
        let attempted = Instant::now();
        let fetched = self.fetch().await;

        let mut state = self.cache.write().await;
        state.last_attempt = Some(attempted);
        match fetched {
            Ok(snapshot) => {
                info!(
                    "Refreshed teams for {}: {} members, {} committers",
                    self.org,
                    snapshot.members().len(),
                    snapshot.committers().len()
                );
                let snapshot = Arc::new(snapshot);
                state.snapshot = Some(snapshot.clone());
                TeamLookup {
                    snapshot: Some(snapshot),
                    refresh_error: None,
                }
            }
            Err(e) => {
                warn!("Failed to refresh teams for {}: {:#}", self.org, e);
                TeamLookup {
                    snapshot: state.snapshot.clone(),
                    refresh_error: Some(e),
                }
            }
        }
    }

    async fn fetch(&self) -> Result<TeamSnapshot> {
        let teams = self
            .source
            .list_teams(&self.org)
            .await
            .context("Failed to list teams")?;

        let find = |name: &str| {
            teams
                .iter()
                .find(|t| t.name == name)
                .ok_or_else(|| anyhow!("Team '{}' not found in organization {}", name, self.org))
        };
        let reviewer_team = find(&self.roles.reviewers)?;
        let committer_team = find(&self.roles.committers)?;

        let reviewers = self
            .source
            .list_team_members(&self.org, reviewer_team)
            .await
            .context("Failed to list team members")?;
        let committers = self
            .source
            .list_team_members(&self.org, committer_team)
            .await
            .context("Failed to list committers")?;

        Ok(TeamSnapshot::new(reviewers, committers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeGitHub;

    fn logins(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn registry(fake: &Arc<FakeGitHub>) -> TeamRegistry {
        TeamRegistry::new(
            fake.clone(),
            "kelda",
            TeamRoles::default(),
            DEFAULT_REFRESH_INTERVAL,
        )
    }

    async fn seeded_fake() -> Arc<FakeGitHub> {
        let fake = Arc::new(FakeGitHub::new());
        fake.add_team("Reviewers", &["alice", "bob", "carol"]).await;
        fake.add_team("Committers", &["carol"]).await;
        fake
    }

    #[test]
    fn test_snapshot_committers_are_members() {
        let snapshot = TeamSnapshot::new(logins(&["alice", "bob"]), logins(&["carol", "bob"]));
        assert_eq!(snapshot.members(), logins(&["alice", "bob", "carol"]).as_slice());
        assert_eq!(snapshot.committers(), logins(&["carol", "bob"]).as_slice());
    }

    #[test]
    fn test_snapshot_dedupes() {
        let snapshot = TeamSnapshot::new(logins(&["alice", "alice"]), logins(&["bob", "bob"]));
        assert_eq!(snapshot.members(), logins(&["alice", "bob"]).as_slice());
        assert_eq!(snapshot.committers(), logins(&["bob"]).as_slice());
    }

    #[test]
    fn test_member_pool_excludes_committers() {
        let snapshot = TeamSnapshot::new(logins(&["alice", "bob", "carol"]), logins(&["carol"]));
        assert_eq!(snapshot.pool(PoolKind::Members), logins(&["alice", "bob"]));
        assert_eq!(snapshot.pool(PoolKind::Committers), logins(&["carol"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_within_interval() {
        let fake = seeded_fake().await;
        let registry = registry(&fake);

        let first = registry.team_members().await;
        assert!(first.refresh_error.is_none());
        let first = first.snapshot.unwrap();

        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        let second = registry.team_members().await.snapshot.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fake.calls("list_teams").await, 1);
        assert_eq!(fake.calls("list_team_members").await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_after_interval() {
        let fake = seeded_fake().await;
        let registry = registry(&fake);

        let first = registry.team_members().await.snapshot.unwrap();
        fake.add_team("Committers", &["carol", "alice"]).await;

        tokio::time::advance(DEFAULT_REFRESH_INTERVAL).await;
        let second = registry.team_members().await.snapshot.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(fake.calls("list_teams").await, 2);
        assert_eq!(fake.calls("list_team_members").await, 4);
        assert_eq!(second.committers(), logins(&["carol", "alice"]).as_slice());
        assert_eq!(second.pool(PoolKind::Members), logins(&["bob"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let fake = seeded_fake().await;
        let registry = registry(&fake);

        let first = registry.team_members().await.snapshot.unwrap();

        fake.fail("list_team_members").await;
        tokio::time::advance(DEFAULT_REFRESH_INTERVAL).await;
        let lookup = registry.team_members().await;

        assert!(lookup.refresh_error.is_some());
        assert!(Arc::ptr_eq(&first, &lookup.snapshot.unwrap()));

        // The failed attempt used up this interval's refresh.
        let again = registry.team_members().await;
        assert!(again.refresh_error.is_none());
        assert_eq!(fake.calls("list_teams").await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fetch_failure_returns_nothing_and_retries() {
        let fake = seeded_fake().await;
        fake.fail("list_teams").await;
        let registry = registry(&fake);

        let lookup = registry.team_members().await;
        assert!(lookup.snapshot.is_none());
        assert!(lookup.refresh_error.is_some());

        fake.recover("list_teams").await;
        let lookup = registry.team_members().await;
        assert!(lookup.snapshot.is_some());
        assert_eq!(fake.calls("list_teams").await, 2);
    }

    /// Team source whose `list_teams` waits for a permit before answering.
    struct GatedSource {
        inner: Arc<FakeGitHub>,
        gate: tokio::sync::Semaphore,
    }

    #[async_trait::async_trait]
    impl TeamSource for GatedSource {
        async fn list_teams(&self, org: &str) -> Result<Vec<crate::source::Team>> {
            self.gate.acquire().await?.forget();
            self.inner.list_teams(org).await
        }

        async fn list_team_members(
            &self,
            org: &str,
            team: &crate::source::Team,
        ) -> Result<Vec<String>> {
            self.inner.list_team_members(org, team).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_not_blocked_by_refresh() {
        let fake = seeded_fake().await;
        let source = Arc::new(GatedSource {
            inner: fake.clone(),
            gate: tokio::sync::Semaphore::new(1),
        });
        let registry = Arc::new(TeamRegistry::new(
            source.clone(),
            "kelda",
            TeamRoles::default(),
            DEFAULT_REFRESH_INTERVAL,
        ));
        let first = registry.team_members().await.snapshot.unwrap();

        tokio::time::advance(DEFAULT_REFRESH_INTERVAL).await;
        let refreshing = tokio::spawn({
            let registry = registry.clone();
            async move { registry.team_members().await }
        });
        tokio::task::yield_now().await;

        let cached = tokio::time::timeout(Duration::from_secs(1), registry.cached())
            .await
            .expect("cached() waited on the refresh");
        assert!(Arc::ptr_eq(&first, &cached.unwrap()));

        source.gate.add_permits(1);
        let lookup = refreshing.await.unwrap();
        assert!(lookup.refresh_error.is_none());
        assert!(!Arc::ptr_eq(&first, &lookup.snapshot.unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refreshes_fetch_once() {
        let fake = seeded_fake().await;
        let source = Arc::new(GatedSource {
            inner: fake.clone(),
            gate: tokio::sync::Semaphore::new(0),
        });
        let registry = Arc::new(TeamRegistry::new(
            source.clone(),
            "kelda",
            TeamRoles::default(),
            DEFAULT_REFRESH_INTERVAL,
        ));

        let callers: Vec<_> = (0..3)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.team_members().await })
            })
            .collect();
        tokio::task::yield_now().await;
        source.gate.add_permits(1);

        let mut snapshots = Vec::new();
        for caller in callers {
            snapshots.push(caller.await.unwrap().snapshot.unwrap());
        }
        assert!(snapshots.iter().all(|s| Arc::ptr_eq(s, &snapshots[0])));
        assert_eq!(fake.calls("list_teams").await, 1);
    }

    #[tokio::test]
    async fn test_missing_team_is_an_error() {
        let fake = Arc::new(FakeGitHub::new());
        fake.add_team("Reviewers", &["alice"]).await;
        let registry = registry(&fake);

        let lookup = registry.team_members().await;
        assert!(lookup.snapshot.is_none());
        let message = format!("{:#}", lookup.refresh_error.unwrap());
        assert!(message.contains("Committers"), "{}", message);
    }

    #[tokio::test]
    async fn test_custom_role_names() {
        let fake = Arc::new(FakeGitHub::new());
        fake.add_team("core-reviewers", &["alice", "bob"]).await;
        fake.add_team("maintainers", &["bob"]).await;
        let registry = TeamRegistry::new(
            fake.clone(),
            "kelda",
            TeamRoles {
                reviewers: "core-reviewers".to_string(),
                committers: "maintainers".to_string(),
            },
            DEFAULT_REFRESH_INTERVAL,
        );

        let snapshot = registry.team_members().await.snapshot.unwrap();
        assert_eq!(snapshot.pool(PoolKind::Members), logins(&["alice"]));
        assert!(snapshot.is_committer("bob"));
    }
}
