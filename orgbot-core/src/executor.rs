//! Applies assignment decisions to GitHub.

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::review::PullRequest;
use crate::source::PullRequestSource;

/// Request a review from `login`, and optionally make them an assignee.
///
/// Failures are logged with the pull request and login and returned. There is
/// no retry: the next sweep re-derives the same decision and tries again.
pub async fn assign(
    source: &dyn PullRequestSource,
    org: &str,
    pr: &PullRequest,
    login: &str,
    also_assignee: bool,
) -> Result<()> {
    info!("Assigning pull request {} review to {}", pr, login);

    if let Err(e) = source.request_reviewer(org, pr, login).await {
        error!("Failed to assign {} to PR {}: {:#}", login, pr, e);
        return Err(e).with_context(|| format!("Failed to request review from {} on {}", login, pr));
    }

    if also_assignee {
        if let Err(e) = source.add_assignee(org, pr, login).await {
            error!("Failed to add {} as assignee of PR {}: {:#}", login, pr, e);
            return Err(e).with_context(|| format!("Failed to add assignee {} on {}", login, pr));
        }
    }

    Ok(())
}
