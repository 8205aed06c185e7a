//! Reviewer assignment decisions.
//!
//! There is no stored per-PR state: every sweep rebuilds [`ReviewFacts`] from
//! GitHub and runs them through [`decide`]. Once a committer is engaged the
//! result converges to a no-op, which is the only terminal condition.
//!
//! Deciding happens in two steps. [`decide`] is a pure function of the facts
//! and says which pool (if any) to draw from. [`resolve`] then consults the
//! rotation cursors and picks a concrete login.

use serde::Serialize;
use std::fmt;

use crate::review::ReviewFacts;
use crate::selector::{choose_reviewer, Cursors, PoolKind};
use crate::team::TeamSnapshot;

/// Why nothing needs to happen for a pull request right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoOpReason {
    /// A committer reviewed after the non-committer approval.
    CommitterEngaged,
    /// Approved by a non-committer, but the author can merge it themselves.
    AuthorIsCommitter,
    /// Reviewed, but nobody outside the committers has approved yet.
    AwaitingApproval,
}

impl fmt::Display for NoOpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoOpReason::CommitterEngaged => f.write_str("a committer has already reviewed"),
            NoOpReason::AuthorIsCommitter => f.write_str("the author is a committer"),
            NoOpReason::AwaitingApproval => f.write_str("review in progress without approval"),
        }
    }
}

/// Pool-level outcome of [`decide`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Requested reviewers haven't responded yet.
    Wait { outstanding: Vec<String> },
    /// Request a review from the next person in this pool.
    Assign { pool: PoolKind },
    NoOp { reason: NoOpReason },
}

/// Final outcome for one pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    Wait { outstanding: Vec<String> },
    Assign { login: String, pool: PoolKind },
    /// The pool was empty or held only the author.
    NoCandidate { pool: PoolKind },
    NoOp { reason: NoOpReason },
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Wait { outstanding } => {
                write!(f, "wait for {}", outstanding.join(", "))
            }
            Decision::Assign { login, pool } => write!(f, "assign {} ({})", login, pool),
            Decision::NoCandidate { pool } => write!(f, "no candidate in {} pool", pool),
            Decision::NoOp { reason } => write!(f, "nothing to do: {}", reason),
        }
    }
}

/// Decide what a pull request needs, from its review facts alone.
pub fn decide(facts: &ReviewFacts) -> Action {
    if facts.has_outstanding_reviewers() {
        return Action::Wait {
            outstanding: facts.outstanding_reviewers.clone(),
        };
    }

    if facts.review_count == 0 {
        return Action::Assign {
            pool: PoolKind::Members,
        };
    }

    if !facts.non_committer_approved {
        return Action::NoOp {
            reason: NoOpReason::AwaitingApproval,
        };
    }

    if facts.committer_reviewed_after_approval {
        return Action::NoOp {
            reason: NoOpReason::CommitterEngaged,
        };
    }

    if facts.author_is_committer {
        return Action::NoOp {
            reason: NoOpReason::AuthorIsCommitter,
        };
    }

    Action::Assign {
        pool: PoolKind::Committers,
    }
}

/// Turn an [`Action`] into a concrete [`Decision`], advancing the matching
/// rotation cursor when a reviewer is needed.
pub fn resolve(action: Action, team: &TeamSnapshot, author: &str, cursors: &mut Cursors) -> Decision {
    match action {
        Action::Wait { outstanding } => Decision::Wait { outstanding },
        Action::NoOp { reason } => Decision::NoOp { reason },
        Action::Assign { pool } => {
            let candidates = team.pool(pool);
            match choose_reviewer(&candidates, cursors.get_mut(pool), author) {
                Some(login) => Decision::Assign { login, pool },
                None => Decision::NoCandidate { pool },
            }
        }
    }
}
