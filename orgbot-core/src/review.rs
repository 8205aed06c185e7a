//! Pull request review data and the review-state classifier.
//!
//! The classifier reduces a pull request's requested reviewers and its
//! chronological review list to a handful of facts that the decision engine
//! consumes. Nothing here performs I/O.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// State of a single submitted (or draft) review, as reported by GitHub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Pending,
    Commented,
    ChangesRequested,
    Approved,
    Dismissed,
}

/// One review on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub reviewer: String,
    pub state: ReviewState,
}

impl Review {
    pub fn new(reviewer: impl Into<String>, state: ReviewState) -> Self {
        Self {
            reviewer: reviewer.into(),
            state,
        }
    }
}

/// An open pull request in one of the organization's repositories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PullRequest {
    pub repo: String,
    pub number: u64,
    pub author: String,
    #[serde(default)]
    pub title: String,
}

impl PullRequest {
    pub fn new(repo: impl Into<String>, number: u64, author: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            number,
            author: author.into(),
            title: String::new(),
        }
    }
}

impl fmt::Display for PullRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repo, self.number)
    }
}

/// What the decision engine needs to know about a pull request's reviews.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReviewFacts {
    /// At least one user is currently requested as a reviewer.
    pub has_requested_reviewers: bool,
    /// Requested reviewers who have not submitted any review yet.
    pub outstanding_reviewers: Vec<String>,
    /// Everyone who has submitted a review of any state.
    pub reviewed_logins: BTreeSet<String>,
    pub review_count: usize,
    /// A non-committer has approved at some point.
    pub non_committer_approved: bool,
    /// A committer reviewed (in any state) strictly after the first
    /// non-committer approval.
    pub committer_reviewed_after_approval: bool,
    pub author_is_committer: bool,
}

impl ReviewFacts {
    pub fn has_outstanding_reviewers(&self) -> bool {
        !self.outstanding_reviewers.is_empty()
    }
}

/// Reduce a pull request's review history to [`ReviewFacts`].
///
/// `reviews` must be in the order GitHub returns them (chronological). A
/// committer review only counts as having looked at the change if it comes
/// after the first non-committer approval: committers who commented early
/// still get pinged to merge once someone else has approved.
pub fn classify<R: AsRef<str>, C: AsRef<str>>(
    author: &str,
    requested: &[R],
    reviews: &[Review],
    committers: &[C],
) -> ReviewFacts {
    let is_committer = |login: &str| committers.iter().any(|c| c.as_ref() == login);

    let reviewed_logins: BTreeSet<String> = reviews.iter().map(|r| r.reviewer.clone()).collect();

    let mut outstanding_reviewers = Vec::new();
    for login in requested {
        let login = login.as_ref();
        if !reviewed_logins.contains(login) && !outstanding_reviewers.iter().any(|o| o == login) {
            outstanding_reviewers.push(login.to_string());
        }
    }

    let mut non_committer_approved = false;
    let mut committer_reviewed_after_approval = false;
    for review in reviews {
        let reviewer_is_committer = is_committer(&review.reviewer);
        if non_committer_approved && reviewer_is_committer {
            committer_reviewed_after_approval = true;
        }
        if review.state == ReviewState::Approved && !reviewer_is_committer {
            non_committer_approved = true;
        }
    }

    ReviewFacts {
        has_requested_reviewers: !requested.is_empty(),
        outstanding_reviewers,
        reviewed_logins,
        review_count: reviews.len(),
        non_committer_approved,
        committer_reviewed_after_approval,
        author_is_committer: is_committer(author),
    }
}
