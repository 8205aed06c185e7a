//! Organization sweeps: run every open pull request through the decision
//! engine.
//!
//! A sweep is triggered by the periodic ticker or by a webhook. Both may fire
//! at once, so sweeps are serialized behind a lock and the rotation cursors
//! sit behind their own mutex.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::decision::{decide, resolve, Decision};
use crate::executor::assign;
use crate::review::{classify, PullRequest};
use crate::selector::Cursors;
use crate::source::PullRequestSource;
use crate::team::{TeamRegistry, TeamSnapshot};

/// Whether a sweep writes to GitHub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMode {
    Apply,
    /// Compute decisions without assigning anyone. Rotation cursors are left
    /// untouched.
    DryRun,
}

/// What happened to one pull request during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrOutcome {
    pub pr: PullRequest,
    pub decision: Option<Decision>,
    /// Fetch or assignment error, if any.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub repositories: usize,
    pub skipped_repositories: Vec<String>,
    pub pull_requests: usize,
    pub assigned: usize,
    pub waiting: usize,
    pub no_op: usize,
    pub no_candidate: usize,
    pub failed: usize,
    /// Team data came from a cache whose refresh just failed.
    pub stale_teams: bool,
    pub outcomes: Vec<PrOutcome>,
}

impl SweepReport {
    fn record(&mut self, outcome: PrOutcome) {
        self.pull_requests += 1;
        if outcome.error.is_some() {
            self.failed += 1;
        } else {
            match &outcome.decision {
                Some(Decision::Assign { .. }) => self.assigned += 1,
                Some(Decision::Wait { .. }) => self.waiting += 1,
                Some(Decision::NoOp { .. }) => self.no_op += 1,
                Some(Decision::NoCandidate { .. }) => self.no_candidate += 1,
                None => {}
            }
        }
        self.outcomes.push(outcome);
    }
}

/// Long-lived assignment service for one organization.
pub struct Assigner {
    source: Arc<dyn PullRequestSource>,
    registry: Arc<TeamRegistry>,
    org: String,
    assign_as_assignee: bool,
    cursors: Mutex<Cursors>,
    sweep_lock: Mutex<()>,
}

impl Assigner {
    pub fn new(
        source: Arc<dyn PullRequestSource>,
        registry: Arc<TeamRegistry>,
        org: impl Into<String>,
        assign_as_assignee: bool,
        cursors: Cursors,
    ) -> Self {
        Self {
            source,
            registry,
            org: org.into(),
            assign_as_assignee,
            cursors: Mutex::new(cursors),
            sweep_lock: Mutex::new(()),
        }
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub async fn cursors(&self) -> Cursors {
        *self.cursors.lock().await
    }

    /// Process every open pull request in every repository of the
    /// organization.
    ///
    /// Fails only when there is no team data at all or the repository list
    /// can't be fetched. A repository whose pull requests can't be listed is
    /// skipped; per-PR failures are recorded in the report.
    pub async fn process_organization(&self, mode: SweepMode) -> Result<SweepReport> {
        let _guard = self.sweep_lock.lock().await;

        let lookup = self.registry.team_members().await;
        let stale_teams = lookup.refresh_error.is_some();
        let team = match (lookup.snapshot, lookup.refresh_error) {
            (Some(team), Some(e)) => {
                warn!("Using stale team data: {:#}", e);
                team
            }
            (Some(team), None) => team,
            (None, Some(e)) => return Err(e.context("No team data available")),
            (None, None) => return Err(anyhow!("No team data available")),
        };

        let repos = self
            .source
            .list_repositories(&self.org)
            .await
            .with_context(|| format!("Failed to list repos of {}", self.org))?;

        // Dry runs rotate a private copy of the cursors.
        let mut dry_cursors = self.cursors().await;

        let mut report = SweepReport {
            repositories: repos.len(),
            stale_teams,
            ..SweepReport::default()
        };

        for repo in repos {
            let prs = match self.source.list_open_pull_requests(&self.org, &repo).await {
                Ok(prs) => prs,
                Err(e) => {
                    error!("Failed to list pull requests for {}: {:#}", repo, e);
                    report.skipped_repositories.push(repo);
                    continue;
                }
            };

            for pr in prs {
                let outcome = match mode {
                    SweepMode::Apply => self.process_pull_request(&pr, &team).await,
                    SweepMode::DryRun => self.plan_pull_request(&pr, &team, &mut dry_cursors).await,
                };
                report.record(outcome);
            }
        }

        info!(
            "Sweep of {} finished: {} PRs, {} assigned, {} waiting, {} no-op, {} without candidate, {} failed",
            self.org,
            report.pull_requests,
            report.assigned,
            report.waiting,
            report.no_op,
            report.no_candidate,
            report.failed
        );

        Ok(report)
    }

    /// Decide for one pull request and apply the decision.
    pub async fn process_pull_request(&self, pr: &PullRequest, team: &TeamSnapshot) -> PrOutcome {
        info!("Processing PR {}", pr);

        let action = match self.review_action(pr, team).await {
            Ok(action) => action,
            Err(e) => return failed(pr, None, e),
        };

        let decision = {
            let mut cursors = self.cursors.lock().await;
            resolve(action, team, &pr.author, &mut cursors)
        };

        match &decision {
            Decision::Assign { login, .. } => {
                if let Err(e) =
                    assign(self.source.as_ref(), &self.org, pr, login, self.assign_as_assignee)
                        .await
                {
                    return failed(pr, Some(decision), e);
                }
            }
            Decision::Wait { outstanding } => {
                info!(
                    "PR {} has {} outstanding reviewers",
                    pr,
                    outstanding.len()
                );
            }
            Decision::NoCandidate { pool } => {
                info!("No potential reviewers in {} pool for PR {}", pool, pr);
            }
            Decision::NoOp { reason } => {
                info!("Nothing to do for PR {}: {}", pr, reason);
            }
        }

        PrOutcome {
            pr: pr.clone(),
            decision: Some(decision),
            error: None,
        }
    }

    async fn plan_pull_request(
        &self,
        pr: &PullRequest,
        team: &TeamSnapshot,
        cursors: &mut Cursors,
    ) -> PrOutcome {
        match self.review_action(pr, team).await {
            Ok(action) => PrOutcome {
                pr: pr.clone(),
                decision: Some(resolve(action, team, &pr.author, cursors)),
                error: None,
            },
            Err(e) => failed(pr, None, e),
        }
    }

    async fn review_action(
        &self,
        pr: &PullRequest,
        team: &TeamSnapshot,
    ) -> Result<crate::decision::Action> {
        let requested = self
            .source
            .requested_reviewers(&self.org, pr)
            .await
            .context("Failed to list requested reviewers")?;
        let reviews = self
            .source
            .reviews(&self.org, pr)
            .await
            .context("Failed to list reviews")?;

        let facts = classify(&pr.author, &requested, &reviews, team.committers());
        Ok(decide(&facts))
    }
}

fn failed(pr: &PullRequest, decision: Option<Decision>, e: anyhow::Error) -> PrOutcome {
    error!("Failed to process PR {}: {:#}", pr, e);
    PrOutcome {
        pr: pr.clone(),
        decision,
        error: Some(format!("{:#}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::{Review, ReviewState};
    use crate::selector::PoolKind;
    use crate::team::{TeamRoles, DEFAULT_REFRESH_INTERVAL};
    use crate::testing::FakeGitHub;

    const ORG: &str = "kelda";

    async fn setup(cursors: Cursors) -> (Arc<FakeGitHub>, Assigner) {
        let fake = Arc::new(FakeGitHub::new());
        fake.add_team("Reviewers", &["alice", "bob", "carol"]).await;
        fake.add_team("Committers", &["carol"]).await;
        let registry = Arc::new(TeamRegistry::new(
            fake.clone(),
            ORG,
            TeamRoles::default(),
            DEFAULT_REFRESH_INTERVAL,
        ));
        let assigner = Assigner::new(fake.clone(), registry, ORG, false, cursors);
        (fake, assigner)
    }

    #[tokio::test]
    async fn test_new_pr_assigned_round_robin() {
        let (fake, assigner) = setup(Cursors::new(5, 0)).await;
        let pr = PullRequest::new("kelda", 42, "dave");
        fake.add_pull_request(pr.clone()).await;

        let report = assigner.process_organization(SweepMode::Apply).await.unwrap();

        assert_eq!(report.assigned, 1);
        assert_eq!(fake.review_requests().await, vec![(pr, "alice".to_string())]);
        assert_eq!(assigner.cursors().await, Cursors::new(6, 0));
    }

    #[tokio::test]
    async fn test_second_sweep_waits_for_requested_reviewer() {
        let (fake, assigner) = setup(Cursors::new(0, 0)).await;
        fake.add_pull_request(PullRequest::new("kelda", 1, "dave")).await;

        assigner.process_organization(SweepMode::Apply).await.unwrap();
        let report = assigner.process_organization(SweepMode::Apply).await.unwrap();

        assert_eq!(report.waiting, 1);
        assert_eq!(fake.review_requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_approval_escalates_then_converges() {
        let (fake, assigner) = setup(Cursors::new(0, 0)).await;
        let pr = PullRequest::new("kelda", 7, "dave");
        fake.add_pull_request(pr.clone()).await;
        fake.add_review(&pr, Review::new("bob", ReviewState::Approved)).await;

        let report = assigner.process_organization(SweepMode::Apply).await.unwrap();
        assert_eq!(report.assigned, 1);
        assert_eq!(
            report.outcomes[0].decision,
            Some(Decision::Assign {
                login: "carol".to_string(),
                pool: PoolKind::Committers
            })
        );

        // carol reviews: GitHub drops her from the requested list.
        fake.add_review(&pr, Review::new("carol", ReviewState::Approved)).await;
        let report = assigner.process_organization(SweepMode::Apply).await.unwrap();
        assert_eq!(report.no_op, 1);
        assert_eq!(fake.review_requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_does_not_write_or_rotate() {
        let (fake, assigner) = setup(Cursors::new(0, 0)).await;
        fake.add_pull_request(PullRequest::new("kelda", 1, "dave")).await;
        fake.add_pull_request(PullRequest::new("kelda", 2, "erin")).await;

        let report = assigner.process_organization(SweepMode::DryRun).await.unwrap();

        assert_eq!(report.assigned, 2);
        assert!(fake.review_requests().await.is_empty());
        assert_eq!(assigner.cursors().await, Cursors::new(0, 0));
        let logins: Vec<_> = report
            .outcomes
            .iter()
            .filter_map(|o| match &o.decision {
                Some(Decision::Assign { login, .. }) => Some(login.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(logins, vec!["bob".to_string(), "alice".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_repository_is_skipped() {
        let (fake, assigner) = setup(Cursors::new(0, 0)).await;
        fake.add_pull_request(PullRequest::new("kelda", 1, "dave")).await;
        fake.add_pull_request(PullRequest::new("broken", 2, "dave")).await;
        fake.fail_repository("broken").await;

        let report = assigner.process_organization(SweepMode::Apply).await.unwrap();

        assert_eq!(report.skipped_repositories, vec!["broken".to_string()]);
        assert_eq!(report.assigned, 1);
    }

    #[tokio::test]
    async fn test_review_fetch_failure_skips_pr() {
        let (fake, assigner) = setup(Cursors::new(0, 0)).await;
        fake.add_pull_request(PullRequest::new("kelda", 1, "dave")).await;
        fake.fail("reviews").await;

        let report = assigner.process_organization(SweepMode::Apply).await.unwrap();

        assert_eq!(report.failed, 1);
        assert!(report.outcomes[0].decision.is_none());
        assert_eq!(assigner.cursors().await, Cursors::new(0, 0));
    }

    #[tokio::test]
    async fn test_assignment_failure_recorded() {
        let (fake, assigner) = setup(Cursors::new(0, 0)).await;
        fake.add_pull_request(PullRequest::new("kelda", 1, "dave")).await;
        fake.fail("request_reviewer").await;

        let report = assigner.process_organization(SweepMode::Apply).await.unwrap();

        assert_eq!(report.failed, 1);
        assert!(matches!(
            report.outcomes[0].decision,
            Some(Decision::Assign { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_team_data_fails_sweep() {
        let (fake, assigner) = setup(Cursors::new(0, 0)).await;
        fake.fail("list_teams").await;

        let err = assigner.process_organization(SweepMode::Apply).await.unwrap_err();
        assert!(format!("{:#}", err).contains("No team data"));
    }

    #[tokio::test]
    async fn test_repository_list_failure_fails_sweep() {
        let (fake, assigner) = setup(Cursors::new(0, 0)).await;
        fake.fail("list_repositories").await;

        assert!(assigner.process_organization(SweepMode::Apply).await.is_err());
    }

    #[tokio::test]
    async fn test_author_only_candidate_is_not_an_error() {
        let fake = Arc::new(FakeGitHub::new());
        fake.add_team("Reviewers", &["dave"]).await;
        fake.add_team("Committers", &[]).await;
        let registry = Arc::new(TeamRegistry::new(
            fake.clone(),
            ORG,
            TeamRoles::default(),
            DEFAULT_REFRESH_INTERVAL,
        ));
        let assigner = Assigner::new(fake.clone(), registry, ORG, false, Cursors::new(0, 0));
        fake.add_pull_request(PullRequest::new("kelda", 1, "dave")).await;

        let report = assigner.process_organization(SweepMode::Apply).await.unwrap();

        assert_eq!(report.no_candidate, 1);
        assert_eq!(report.failed, 0);
    }
}
