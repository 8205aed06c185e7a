//! Background loops: organization sweeps, stargazer checks and metrics
//! collection.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use orgbot_core::SweepMode;

use crate::metrics::MetricsRecorder;
use crate::stargazers::StargazerWatcher;
use crate::{AppState, SweepRecord};

/// Run one sweep and remember its outcome for `/status`.
pub async fn run_sweep(state: &AppState) -> SweepRecord {
    let record = match state.assigner.process_organization(SweepMode::Apply).await {
        Ok(report) => SweepRecord {
            finished_at: Utc::now(),
            report: Some(report),
            error: None,
        },
        Err(e) => {
            error!("Sweep of {} failed: {:#}", state.assigner.org(), e);
            SweepRecord {
                finished_at: Utc::now(),
                report: None,
                error: Some(format!("{:#}", e)),
            }
        }
    };

    *state.last_sweep.write().await = Some(record.clone());
    record
}

/// Sweep on every tick, and early whenever a webhook asks for it.
pub async fn sweep_loop(state: Arc<AppState>, period: Duration) {
    let mut interval = interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = state.sweep_requested.notified() => {
                info!("Sweep requested by webhook");
            }
        }

        run_sweep(&state).await;
    }
}

pub async fn stargazer_loop(watcher: Arc<StargazerWatcher>, repos: Vec<String>, period: Duration) {
    let mut interval = interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        watcher.check_all(&repos).await;
    }
}

pub async fn metrics_loop(recorder: Arc<MetricsRecorder>, repos: Vec<String>, period: Duration) {
    let mut interval = interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let today = Utc::now().date_naive();
        info!("Recording metrics for {} repositories", repos.len());
        recorder.record_all(&repos, today).await;
    }
}
