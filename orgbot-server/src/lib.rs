pub mod config;
pub mod metrics;
pub mod metrics_store;
pub mod scheduler;
pub mod slack;
pub mod stargazers;
pub mod status;
pub mod webhook;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};

use orgbot_core::{Assigner, SweepReport, TeamRegistry};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub fn get_bot_version() -> String {
    let hash = option_env!("ORGBOT_GIT_HASH").or(built_info::GIT_COMMIT_HASH);
    match hash {
        Some(hash) if hash.len() >= 8 => hash[..8].to_string(),
        Some(hash) => hash.to_string(),
        None => built_info::PKG_VERSION.to_string(),
    }
}

/// Outcome of the most recent sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepRecord {
    pub finished_at: DateTime<Utc>,
    pub report: Option<SweepReport>,
    pub error: Option<String>,
}

pub struct AppState {
    pub assigner: Arc<Assigner>,
    pub registry: Arc<TeamRegistry>,
    pub webhook_secret: String,
    pub status_auth_token: Option<String>,
    pub last_sweep: RwLock<Option<SweepRecord>>,
    /// Wakes the sweep loop early. Requests made while a sweep is pending
    /// collapse into one.
    pub sweep_requested: Notify,
}

impl AppState {
    pub fn new(
        assigner: Arc<Assigner>,
        registry: Arc<TeamRegistry>,
        webhook_secret: String,
        status_auth_token: Option<String>,
    ) -> Self {
        Self {
            assigner,
            registry,
            webhook_secret,
            status_auth_token,
            last_sweep: RwLock::new(None),
            sweep_requested: Notify::new(),
        }
    }

    pub fn request_sweep(&self) {
        self.sweep_requested.notify_one();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use orgbot_core::testing::FakeGitHub;
    use orgbot_core::{Cursors, TeamRoles};
    use std::time::Duration;

    pub const WEBHOOK_SECRET: &str = "It's a Secret to Everybody";
    pub const STATUS_TOKEN: &str = "status-token";

    pub async fn app_state() -> (Arc<FakeGitHub>, Arc<AppState>) {
        let fake = Arc::new(FakeGitHub::new());
        fake.add_team("Reviewers", &["alice", "bob", "carol"]).await;
        fake.add_team("Committers", &["carol"]).await;

        let registry = Arc::new(TeamRegistry::new(
            fake.clone(),
            "kelda",
            TeamRoles::default(),
            Duration::from_secs(3600),
        ));
        let assigner = Arc::new(Assigner::new(
            fake.clone(),
            registry.clone(),
            "kelda",
            false,
            Cursors::new(0, 0),
        ));
        let state = Arc::new(AppState::new(
            assigner,
            registry,
            WEBHOOK_SECRET.to_string(),
            Some(STATUS_TOKEN.to_string()),
        ));
        (fake, state)
    }
}
