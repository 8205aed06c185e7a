//! Core of orgbot: reviewer assignment for a GitHub organization.
//!
//! Each sweep rebuilds every open pull request's review state from GitHub,
//! decides whether it needs a first reviewer, an escalation to a committer,
//! or nothing, and applies that decision.

pub mod decision;
pub mod executor;
pub mod github;
pub mod metrics;
pub mod middleware;
pub mod review;
pub mod selector;
pub mod source;
pub mod stargazers;
pub mod sweep;
pub mod team;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use decision::{decide, resolve, Action, Decision, NoOpReason};
pub use github::GitHubClient;
pub use review::{classify, PullRequest, Review, ReviewFacts, ReviewState};
pub use selector::{choose_reviewer, Cursors, PoolKind};
pub use source::*;
pub use sweep::{Assigner, PrOutcome, SweepMode, SweepReport};
pub use team::{TeamLookup, TeamRegistry, TeamRoles, TeamSnapshot};
