//! Periodic collection of repository engagement metrics.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{error, info, warn};

use orgbot_core::metrics::{new_daily_rows, SummaryRow, TrafficKind, ERROR_VALUE};
use orgbot_core::{EngagementSource, MetricsSink};

pub struct MetricsRecorder {
    source: Arc<dyn EngagementSource>,
    sink: Arc<dyn MetricsSink>,
    owner: String,
}

impl MetricsRecorder {
    pub fn new(
        source: Arc<dyn EngagementSource>,
        sink: Arc<dyn MetricsSink>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            source,
            sink,
            owner: owner.into(),
        }
    }

    /// Record traffic and a summary for each repository. A failure on one
    /// repository does not stop the others.
    pub async fn record_all(&self, repos: &[String], today: NaiveDate) {
        for repo in repos {
            if let Err(e) = self.record(repo, today).await {
                error!("Failed to record metrics for {}: {:#}", repo, e);
            }
        }
    }

    /// Each traffic series and the summary are recorded independently. Only
    /// a failure to store the summary is returned.
    pub async fn record(&self, repo: &str, today: NaiveDate) -> Result<()> {
        for kind in [TrafficKind::Views, TrafficKind::Clones] {
            if let Err(e) = self.record_traffic(repo, kind).await {
                error!("Failed to store {} traffic for {}: {:#}", kind, repo, e);
            }
        }
        self.record_summary(repo, today).await
    }

    async fn record_traffic(&self, repo: &str, kind: TrafficKind) -> Result<()> {
        let data = match self.source.daily_traffic(&self.owner, repo, kind).await {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to fetch {} traffic for {}: {:#}", kind, repo, e);
                return Ok(());
            }
        };

        let last = self.sink.last_traffic_date(repo, kind).await?;
        let rows = new_daily_rows(last, &data);
        if rows.is_empty() {
            return Ok(());
        }

        self.sink.append_traffic(repo, kind, &rows).await?;
        info!("Stored {} day(s) of {} for {}", rows.len(), kind, repo);
        Ok(())
    }

    async fn record_summary(&self, repo: &str, today: NaiveDate) -> Result<()> {
        let owner = self.owner.as_str();
        let (stars, forks) = match self.source.repository_totals(owner, repo).await {
            Ok(totals) => (totals.stars, totals.forks),
            Err(e) => {
                warn!("Failed to fetch stars and forks for {}: {:#}", repo, e);
                (ERROR_VALUE, ERROR_VALUE)
            }
        };

        let row = SummaryRow {
            repo: repo.to_string(),
            date: today,
            stars,
            forks,
            contributors: or_error_value(
                repo,
                "contributors",
                self.source.contributor_count(owner, repo),
            )
            .await,
            commits: or_error_value(repo, "commits", self.source.commit_count(owner, repo)).await,
            release_downloads: or_error_value(
                repo,
                "release downloads",
                self.source.release_downloads(owner, repo),
            )
            .await,
        };

        self.sink.upsert_summary(&row).await
    }
}

async fn or_error_value(repo: &str, stat: &str, fetch: impl Future<Output = Result<i64>>) -> i64 {
    match fetch.await {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to fetch {} for {}: {:#}", stat, repo, e);
            ERROR_VALUE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics_store::{SqliteMetricsStore, TrafficTotals};
    use orgbot_core::metrics::{DailyCount, RepositoryTotals};
    use orgbot_core::testing::FakeGitHub;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn series(days: &[u32]) -> Vec<DailyCount> {
        days.iter()
            .map(|&d| DailyCount {
                date: day(d),
                count: 10,
                uniques: 2,
            })
            .collect()
    }

    fn setup() -> (Arc<FakeGitHub>, Arc<SqliteMetricsStore>, MetricsRecorder) {
        let fake = Arc::new(FakeGitHub::new());
        let store = Arc::new(SqliteMetricsStore::new_in_memory().unwrap());
        let recorder = MetricsRecorder::new(fake.clone(), store.clone(), "kelda");
        (fake, store, recorder)
    }

    #[tokio::test]
    async fn test_records_complete_days_and_summary() {
        let (fake, store, recorder) = setup();
        fake.set_traffic("kelda", TrafficKind::Views, series(&[1, 2, 3])).await;
        fake.set_traffic("kelda", TrafficKind::Clones, series(&[2, 3])).await;
        fake.set_totals("kelda", RepositoryTotals { stars: 120, forks: 9 }, 55, 14, 1300)
            .await;

        recorder.record("kelda", day(3)).await.unwrap();

        assert_eq!(
            store.last_traffic_date("kelda", TrafficKind::Views).await.unwrap(),
            Some(day(2))
        );
        assert_eq!(
            store
                .cumulative_traffic("kelda", TrafficKind::Clones, day(3))
                .await
                .unwrap(),
            TrafficTotals { count: 10, uniques: 2 }
        );
        let row = store.summary("kelda", day(3)).await.unwrap().unwrap();
        assert_eq!(row.stars, 120);
        assert_eq!(row.forks, 9);
        assert_eq!(row.release_downloads, 55);
        assert_eq!(row.contributors, 14);
        assert_eq!(row.commits, 1300);
    }

    #[tokio::test]
    async fn test_overlapping_windows_do_not_duplicate() {
        let (fake, store, recorder) = setup();
        fake.set_totals("kelda", RepositoryTotals { stars: 1, forks: 1 }, 0, 1, 1)
            .await;
        fake.set_traffic("kelda", TrafficKind::Views, series(&[1, 2, 3])).await;
        recorder.record("kelda", day(3)).await.unwrap();

        fake.set_traffic("kelda", TrafficKind::Views, series(&[2, 3, 4, 5])).await;
        recorder.record("kelda", day(5)).await.unwrap();

        let dates: Vec<_> = store
            .traffic("kelda", TrafficKind::Views)
            .await
            .unwrap()
            .iter()
            .map(|r| r.date)
            .collect();
        assert_eq!(dates, vec![day(1), day(2), day(3), day(4)]);
    }

    #[tokio::test]
    async fn test_failed_statistics_are_recorded_as_error_value() {
        let (fake, store, recorder) = setup();
        fake.set_totals("kelda", RepositoryTotals { stars: 7, forks: 2 }, 3, 4, 5)
            .await;
        fake.fail("commit_count").await;
        fake.fail("repository_totals").await;

        recorder.record("kelda", day(3)).await.unwrap();

        let row = store.summary("kelda", day(3)).await.unwrap().unwrap();
        assert_eq!(row.stars, ERROR_VALUE);
        assert_eq!(row.forks, ERROR_VALUE);
        assert_eq!(row.commits, ERROR_VALUE);
        assert_eq!(row.contributors, 4);
    }

    #[tokio::test]
    async fn test_traffic_failure_still_records_summary() {
        let (fake, store, recorder) = setup();
        fake.set_totals("kelda", RepositoryTotals { stars: 7, forks: 2 }, 3, 4, 5)
            .await;
        fake.fail("daily_traffic").await;

        recorder.record("kelda", day(3)).await.unwrap();

        assert_eq!(
            store.last_traffic_date("kelda", TrafficKind::Views).await.unwrap(),
            None
        );
        assert!(store.summary("kelda", day(3)).await.unwrap().is_some());
    }

    /// Traffic storage that is always locked; summaries go to a real store.
    struct LockedTrafficSink {
        inner: SqliteMetricsStore,
    }

    #[async_trait::async_trait]
    impl MetricsSink for LockedTrafficSink {
        async fn last_traffic_date(
            &self,
            _repo: &str,
            _kind: TrafficKind,
        ) -> Result<Option<NaiveDate>> {
            Err(anyhow::anyhow!("database is locked"))
        }

        async fn append_traffic(
            &self,
            _repo: &str,
            _kind: TrafficKind,
            _rows: &[DailyCount],
        ) -> Result<()> {
            Err(anyhow::anyhow!("database is locked"))
        }

        async fn upsert_summary(&self, row: &SummaryRow) -> Result<()> {
            self.inner.upsert_summary(row).await
        }
    }

    #[tokio::test]
    async fn test_traffic_store_failure_still_records_summary() {
        let fake = Arc::new(FakeGitHub::new());
        let sink = Arc::new(LockedTrafficSink {
            inner: SqliteMetricsStore::new_in_memory().unwrap(),
        });
        let recorder = MetricsRecorder::new(fake.clone(), sink.clone(), "kelda");
        fake.set_traffic("kelda", TrafficKind::Views, series(&[1, 2, 3])).await;
        fake.set_totals("kelda", RepositoryTotals { stars: 7, forks: 2 }, 3, 4, 5)
            .await;

        recorder.record("kelda", day(3)).await.unwrap();

        let row = sink.inner.summary("kelda", day(3)).await.unwrap().unwrap();
        assert_eq!(row.stars, 7);
        assert_eq!(row.commits, 5);
    }

    #[tokio::test]
    async fn test_second_run_same_day_overwrites_summary() {
        let (fake, store, recorder) = setup();
        fake.set_totals("kelda", RepositoryTotals { stars: 7, forks: 2 }, 3, 4, 5)
            .await;
        recorder.record("kelda", day(3)).await.unwrap();

        fake.set_totals("kelda", RepositoryTotals { stars: 8, forks: 2 }, 3, 4, 5)
            .await;
        recorder.record("kelda", day(3)).await.unwrap();

        let row = store.summary("kelda", day(3)).await.unwrap().unwrap();
        assert_eq!(row.stars, 8);
    }
}
