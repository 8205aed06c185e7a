//! Watches repositories for stargazer changes and posts them to chat.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info};

use orgbot_core::stargazers::{diff, notification};
use orgbot_core::{NotificationSink, StargazerSource};

pub struct StargazerWatcher {
    source: Arc<dyn StargazerSource>,
    sink: Arc<dyn NotificationSink>,
    owner: String,
    seen: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl StargazerWatcher {
    pub fn new(
        source: Arc<dyn StargazerSource>,
        sink: Arc<dyn NotificationSink>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            source,
            sink,
            owner: owner.into(),
            seen: RwLock::new(HashMap::new()),
        }
    }

    /// Check every repository once.
    pub async fn check_all(&self, repos: &[String]) {
        for repo in repos {
            self.check(repo).await;
        }
    }

    /// Compare the current stargazers of `repo` against the last observation.
    ///
    /// The first observation only records the set. On a fetch or post error
    /// the previous set is kept so the change is reported on the next success.
    pub async fn check(&self, repo: &str) {
        let current: BTreeSet<String> = match self.source.list_stargazers(&self.owner, repo).await {
            Ok(logins) => logins.into_iter().collect(),
            Err(e) => {
                error!("Failed to list stargazers for {}: {:#}", repo, e);
                return;
            }
        };

        let previous = self.seen.read().await.get(repo).cloned();

        let Some(previous) = previous else {
            info!("Tracking {} stargazers of {}", current.len(), repo);
            self.remember(repo, current).await;
            return;
        };

        let change = diff(&previous, &current);
        if change.is_empty() {
            return;
        }

        info!(
            "Stargazers of {} changed: +{} -{}",
            repo,
            change.gained.len(),
            change.lost.len()
        );
        let message = notification(repo, current.len(), &change);
        if let Err(e) = self.sink.notify(&message).await {
            // Keep the old set so the change is announced on the next check.
            error!("Failed to post stargazer notification for {}: {:#}", repo, e);
            return;
        }
        self.remember(repo, current).await;
    }

    async fn remember(&self, repo: &str, stargazers: BTreeSet<String>) {
        self.seen.write().await.insert(repo.to_string(), stargazers);
    }
}
