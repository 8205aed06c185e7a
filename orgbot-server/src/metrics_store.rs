//! SQLite storage for engagement metrics.
//!
//! Daily traffic is stored one row per (repo, series, date); summaries one row
//! per (repo, date). The schema version lives in SQLite's `user_version`
//! pragma.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use orgbot_core::metrics::{DailyCount, SummaryRow, TrafficKind};
use orgbot_core::MetricsSink;

pub const DATABASE_FILE: &str = "orgbot-metrics.db";

const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricsStoreError {
    /// SQLite or the filesystem rejected an operation.
    Storage { operation: String, message: String },
    /// The database was written by a newer version of the bot.
    SchemaTooNew { found: i64, supported: i64 },
    /// A stored value could not be read back.
    Corruption(String),
}

impl MetricsStoreError {
    fn storage(operation: &str, message: impl ToString) -> Self {
        MetricsStoreError::Storage {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for MetricsStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricsStoreError::Storage { operation, message } => {
                write!(f, "metrics store failed to {}: {}", operation, message)
            }
            MetricsStoreError::SchemaTooNew { found, supported } => write!(
                f,
                "metrics database schema version {} is newer than supported version {}",
                found, supported
            ),
            MetricsStoreError::Corruption(what) => write!(f, "corrupt value in metrics store: {}", what),
        }
    }
}

impl std::error::Error for MetricsStoreError {}

/// Cumulative traffic up to and including a date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficTotals {
    pub count: i64,
    pub uniques: i64,
}

pub struct SqliteMetricsStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetricsStore {
    /// Open the database `orgbot-metrics.db` inside `state_dir`, creating the
    /// directory if needed.
    pub fn open_in(state_dir: &Path) -> Result<Self, MetricsStoreError> {
        std::fs::create_dir_all(state_dir).map_err(|e| {
            MetricsStoreError::storage(
                "create state directory",
                format!("{}: {}", state_dir.display(), e),
            )
        })?;
        Self::new(state_dir.join(DATABASE_FILE))
    }

    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, MetricsStoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| MetricsStoreError::storage("open database", e))?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| MetricsStoreError::storage("set journal_mode", e))?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            warn!(
                "SQLite kept journal_mode '{}' for {}; continuing without WAL",
                journal_mode,
                path.display()
            );
        }

        conn.execute_batch("PRAGMA busy_timeout = 5000;")
            .map_err(|e| MetricsStoreError::storage("configure pragmas", e))?;

        init_schema(&conn)?;
        info!("Opened metrics database at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn new_in_memory() -> Result<Self, MetricsStoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| MetricsStoreError::storage("open database", e))?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, MetricsStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, MetricsStoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| MetricsStoreError::storage(operation, "connection mutex poisoned"))?;
            f(&conn)
        })
        .await
        .map_err(|e| MetricsStoreError::storage(operation, e))?
    }

    /// Sum of a traffic series for `repo` up to and including `through`.
    pub async fn cumulative_traffic(
        &self,
        repo: &str,
        kind: TrafficKind,
        through: NaiveDate,
    ) -> Result<TrafficTotals, MetricsStoreError> {
        let repo = repo.to_string();
        self.with_conn("sum traffic", move |conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(count), 0), COALESCE(SUM(uniques), 0) FROM traffic
                 WHERE repo = ?1 AND kind = ?2 AND date <= ?3",
                params![repo, kind.as_str(), through],
                |row| {
                    Ok(TrafficTotals {
                        count: row.get(0)?,
                        uniques: row.get(1)?,
                    })
                },
            )
            .map_err(|e| MetricsStoreError::storage("sum traffic", e))
        })
        .await
    }

    pub async fn summary(
        &self,
        repo: &str,
        date: NaiveDate,
    ) -> Result<Option<SummaryRow>, MetricsStoreError> {
        let repo = repo.to_string();
        self.with_conn("read summary", move |conn| {
            conn.query_row(
                "SELECT stars, forks, contributors, commits, release_downloads FROM summaries
                 WHERE repo = ?1 AND date = ?2",
                params![repo, date],
                |row| {
                    Ok(SummaryRow {
                        repo: repo.clone(),
                        date,
                        stars: row.get(0)?,
                        forks: row.get(1)?,
                        contributors: row.get(2)?,
                        commits: row.get(3)?,
                        release_downloads: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(|e| MetricsStoreError::storage("read summary", e))
        })
        .await
    }

    /// Every stored day of a traffic series, oldest first.
    pub async fn traffic(
        &self,
        repo: &str,
        kind: TrafficKind,
    ) -> Result<Vec<DailyCount>, MetricsStoreError> {
        let repo = repo.to_string();
        self.with_conn("read traffic", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT date, count, uniques FROM traffic
                     WHERE repo = ?1 AND kind = ?2 ORDER BY date",
                )
                .map_err(|e| MetricsStoreError::storage("read traffic", e))?;
            let rows = stmt
                .query_map(params![repo, kind.as_str()], |row| {
                    Ok(DailyCount {
                        date: row.get(0)?,
                        count: row.get(1)?,
                        uniques: row.get(2)?,
                    })
                })
                .map_err(|e| MetricsStoreError::storage("read traffic", e))?;
            let counts = rows
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| MetricsStoreError::Corruption(format!("traffic row: {}", e)))?;
            Ok(counts)
        })
        .await
    }
}

fn init_schema(conn: &Connection) -> Result<(), MetricsStoreError> {
    let current: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| MetricsStoreError::storage("get schema version", e))?;

    if current > SCHEMA_VERSION {
        return Err(MetricsStoreError::SchemaTooNew {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }

    if current < 1 {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS traffic (
                repo TEXT NOT NULL,
                kind TEXT NOT NULL CHECK(kind IN ('views', 'clones')),
                date TEXT NOT NULL,
                count INTEGER NOT NULL,
                uniques INTEGER NOT NULL,
                PRIMARY KEY (repo, kind, date)
            );

            CREATE TABLE IF NOT EXISTS summaries (
                repo TEXT NOT NULL,
                date TEXT NOT NULL,
                stars INTEGER NOT NULL,
                forks INTEGER NOT NULL,
                contributors INTEGER NOT NULL,
                commits INTEGER NOT NULL,
                release_downloads INTEGER NOT NULL,
                PRIMARY KEY (repo, date)
            );
            "#,
        )
        .map_err(|e| MetricsStoreError::storage("create schema", e))?;
    }

    if current < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(|e| MetricsStoreError::storage("set schema version", e))?;
    }

    Ok(())
}

#[async_trait]
impl MetricsSink for SqliteMetricsStore {
    async fn last_traffic_date(
        &self,
        repo: &str,
        kind: TrafficKind,
    ) -> anyhow::Result<Option<NaiveDate>> {
        let repo = repo.to_string();
        let last = self
            .with_conn("read last traffic date", move |conn| {
                conn.query_row(
                    "SELECT MAX(date) FROM traffic WHERE repo = ?1 AND kind = ?2",
                    params![repo, kind.as_str()],
                    |row| row.get::<_, Option<NaiveDate>>(0),
                )
                .map_err(|e| MetricsStoreError::storage("read last traffic date", e))
            })
            .await?;
        Ok(last)
    }

    async fn append_traffic(
        &self,
        repo: &str,
        kind: TrafficKind,
        rows: &[DailyCount],
    ) -> anyhow::Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let repo = repo.to_string();
        let rows = rows.to_vec();
        self.with_conn("append traffic", move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| MetricsStoreError::storage("begin transaction", e))?;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT OR IGNORE INTO traffic (repo, kind, date, count, uniques)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )
                    .map_err(|e| MetricsStoreError::storage("append traffic", e))?;
                for row in &rows {
                    stmt.execute(params![repo, kind.as_str(), row.date, row.count, row.uniques])
                        .map_err(|e| MetricsStoreError::storage("append traffic", e))?;
                }
            }
            tx.commit()
                .map_err(|e| MetricsStoreError::storage("commit traffic", e))
        })
        .await?;
        Ok(())
    }

    async fn upsert_summary(&self, row: &SummaryRow) -> anyhow::Result<()> {
        let row = row.clone();
        self.with_conn("upsert summary", move |conn| {
            conn.execute(
                "INSERT INTO summaries
                     (repo, date, stars, forks, contributors, commits, release_downloads)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(repo, date) DO UPDATE SET
                     stars = excluded.stars,
                     forks = excluded.forks,
                     contributors = excluded.contributors,
                     commits = excluded.commits,
                     release_downloads = excluded.release_downloads",
                params![
                    row.repo,
                    row.date,
                    row.stars,
                    row.forks,
                    row.contributors,
                    row.commits,
                    row.release_downloads
                ],
            )
            .map(|_| ())
            .map_err(|e| MetricsStoreError::storage("upsert summary", e))
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn count(d: u32, count: i64) -> DailyCount {
        DailyCount {
            date: day(d),
            count,
            uniques: count / 2,
        }
    }

    fn summary(d: u32, stars: i64) -> SummaryRow {
        SummaryRow {
            repo: "kelda".to_string(),
            date: day(d),
            stars,
            forks: 3,
            contributors: 12,
            commits: 900,
            release_downloads: 40,
        }
    }

    #[tokio::test]
    async fn test_empty_store_has_no_last_date() {
        let store = SqliteMetricsStore::new_in_memory().unwrap();
        let last = store.last_traffic_date("kelda", TrafficKind::Views).await.unwrap();
        assert_eq!(last, None);
    }

    #[tokio::test]
    async fn test_last_date_per_series() {
        let store = SqliteMetricsStore::new_in_memory().unwrap();
        store
            .append_traffic("kelda", TrafficKind::Views, &[count(1, 10), count(2, 20)])
            .await
            .unwrap();
        store
            .append_traffic("kelda", TrafficKind::Clones, &[count(1, 4)])
            .await
            .unwrap();

        assert_eq!(
            store.last_traffic_date("kelda", TrafficKind::Views).await.unwrap(),
            Some(day(2))
        );
        assert_eq!(
            store.last_traffic_date("kelda", TrafficKind::Clones).await.unwrap(),
            Some(day(1))
        );
        assert_eq!(
            store.last_traffic_date("install", TrafficKind::Views).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_duplicate_days_are_ignored() {
        let store = SqliteMetricsStore::new_in_memory().unwrap();
        store
            .append_traffic("kelda", TrafficKind::Views, &[count(1, 10)])
            .await
            .unwrap();
        store
            .append_traffic("kelda", TrafficKind::Views, &[count(1, 99), count(2, 20)])
            .await
            .unwrap();

        let rows = store.traffic("kelda", TrafficKind::Views).await.unwrap();
        assert_eq!(rows, vec![count(1, 10), count(2, 20)]);
    }

    #[tokio::test]
    async fn test_summary_overwrites_same_date() {
        let store = SqliteMetricsStore::new_in_memory().unwrap();
        store.upsert_summary(&summary(5, 100)).await.unwrap();
        store.upsert_summary(&summary(5, 101)).await.unwrap();
        store.upsert_summary(&summary(6, 102)).await.unwrap();

        assert_eq!(
            store.summary("kelda", day(5)).await.unwrap().map(|r| r.stars),
            Some(101)
        );
        assert_eq!(
            store.summary("kelda", day(6)).await.unwrap().map(|r| r.stars),
            Some(102)
        );
    }

    #[tokio::test]
    async fn test_cumulative_traffic_includes_through_date() {
        let store = SqliteMetricsStore::new_in_memory().unwrap();
        store
            .append_traffic(
                "kelda",
                TrafficKind::Views,
                &[count(1, 10), count(2, 20), count(3, 30)],
            )
            .await
            .unwrap();

        let totals = store
            .cumulative_traffic("kelda", TrafficKind::Views, day(2))
            .await
            .unwrap();
        assert_eq!(totals, TrafficTotals { count: 30, uniques: 15 });

        let none = store
            .cumulative_traffic("kelda", TrafficKind::Clones, day(2))
            .await
            .unwrap();
        assert_eq!(none, TrafficTotals::default());
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = SqliteMetricsStore::open_in(dir.path()).unwrap();
            store
                .append_traffic("kelda", TrafficKind::Clones, &[count(7, 3)])
                .await
                .unwrap();
        }

        let store = SqliteMetricsStore::open_in(dir.path()).unwrap();
        assert_eq!(
            store.last_traffic_date("kelda", TrafficKind::Clones).await.unwrap(),
            Some(day(7))
        );
        assert!(dir.path().join(DATABASE_FILE).exists());
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DATABASE_FILE);
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
                .unwrap();
        }

        let err = SqliteMetricsStore::new(&path).err().unwrap();
        assert_eq!(
            err,
            MetricsStoreError::SchemaTooNew {
                found: SCHEMA_VERSION + 1,
                supported: SCHEMA_VERSION
            }
        );
    }
}
