//! Engagement metrics rows and the rules for deduplicating them by date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value recorded for a statistic that could not be fetched.
pub const ERROR_VALUE: i64 = -1;

/// The two daily traffic series GitHub exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficKind {
    Views,
    Clones,
}

impl TrafficKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficKind::Views => "views",
            TrafficKind::Clones => "clones",
        }
    }
}

impl fmt::Display for TrafficKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: i64,
    pub uniques: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryTotals {
    pub stars: i64,
    pub forks: i64,
}

/// One day's snapshot of cumulative repository statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub repo: String,
    pub date: NaiveDate,
    pub stars: i64,
    pub forks: i64,
    pub contributors: i64,
    pub commits: i64,
    pub release_downloads: i64,
}

/// Select the daily entries that still need to be stored.
///
/// The final entry of `data` is dropped because it covers today and is not a
/// complete count yet. Of the rest, only days strictly after `last_stored`
/// are returned, so re-running on overlapping windows never writes a day
/// twice.
pub fn new_daily_rows(last_stored: Option<NaiveDate>, data: &[DailyCount]) -> Vec<DailyCount> {
    let Some((_today, complete)) = data.split_last() else {
        return Vec::new();
    };

    complete
        .iter()
        .filter(|entry| last_stored.map_or(true, |last| entry.date > last))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn series(days: &[u32]) -> Vec<DailyCount> {
        days.iter()
            .map(|&d| DailyCount {
                date: day(d),
                count: d as i64 * 10,
                uniques: d as i64,
            })
            .collect()
    }

    #[test]
    fn test_empty_series_writes_nothing() {
        assert!(new_daily_rows(None, &[]).is_empty());
        assert!(new_daily_rows(Some(day(1)), &[]).is_empty());
    }

    #[test]
    fn test_first_run_writes_everything_but_today() {
        let rows = new_daily_rows(None, &series(&[1, 2, 3]));
        let dates: Vec<_> = rows.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(1), day(2)]);
    }

    #[test]
    fn test_resumes_after_last_stored_date() {
        let rows = new_daily_rows(Some(day(2)), &series(&[1, 2, 3, 4, 5]));
        let dates: Vec<_> = rows.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(3), day(4)]);
    }

    #[test]
    fn test_up_to_date_store_writes_nothing() {
        assert!(new_daily_rows(Some(day(4)), &series(&[1, 2, 3, 4, 5])).is_empty());
    }

    #[test]
    fn test_last_stored_date_older_than_window() {
        let rows = new_daily_rows(Some(day(1)), &series(&[10, 11, 12]));
        let dates: Vec<_> = rows.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![day(10), day(11)]);
    }

    #[test]
    fn test_traffic_kind_names() {
        assert_eq!(TrafficKind::Views.to_string(), "views");
        assert_eq!(TrafficKind::Clones.as_str(), "clones");
    }
}
