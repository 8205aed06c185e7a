//! Stargazer change detection.

use std::collections::BTreeSet;

use crate::source::{Notification, NotificationField};

pub const GAINED_COLOR: &str = "#36a64f";
pub const LOST_COLOR: &str = "#d50200";
pub const STAR_ICON: &str = ":star:";

/// Logins that starred or unstarred a repository between two observations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StargazerDiff {
    pub gained: Vec<String>,
    pub lost: Vec<String>,
}

impl StargazerDiff {
    pub fn is_empty(&self) -> bool {
        self.gained.is_empty() && self.lost.is_empty()
    }
}

pub fn diff(previous: &BTreeSet<String>, current: &BTreeSet<String>) -> StargazerDiff {
    StargazerDiff {
        gained: current.difference(previous).cloned().collect(),
        lost: previous.difference(current).cloned().collect(),
    }
}

/// Render a change as a chat notification. Green if anyone new starred the
/// repository, red if it only lost stars.
pub fn notification(repo: &str, total: usize, change: &StargazerDiff) -> Notification {
    let mut fields = Vec::new();
    if !change.gained.is_empty() {
        fields.push(NotificationField {
            title: "New stargazers".to_string(),
            value: change.gained.join(", "),
            short: false,
        });
    }
    if !change.lost.is_empty() {
        fields.push(NotificationField {
            title: "Lost stargazers".to_string(),
            value: change.lost.join(", "),
            short: false,
        });
    }
    fields.push(NotificationField {
        title: "Total".to_string(),
        value: total.to_string(),
        short: true,
    });

    let color = if change.gained.is_empty() {
        LOST_COLOR
    } else {
        GAINED_COLOR
    };

    Notification {
        title: format!(
            "{}: +{} / -{} stars",
            repo,
            change.gained.len(),
            change.lost.len()
        ),
        color: color.to_string(),
        icon_emoji: STAR_ICON.to_string(),
        fields,
    }
}
