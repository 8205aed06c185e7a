use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use orgbot_core::team::{DEFAULT_COMMITTER_TEAM, DEFAULT_REVIEWER_TEAM};
use orgbot_core::{
    Assigner, Cursors, GitHubClient, StargazerSource, SweepMode, SweepReport, TeamRegistry,
    TeamRoles,
};

/// orgbot: reviewer assignment for a GitHub organization
#[derive(Parser, Debug)]
#[command(name = "orgbot")]
#[command(about = "Inspect what orgbot would do in a GitHub organization", long_about = None)]
struct Cli {
    #[command(flatten)]
    github: GitHubArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the decision for every open pull request without assigning anyone
    Plan(PlanArgs),
    /// Print the resolved reviewer and committer lists
    Teams(TeamArgs),
    /// Print the stargazers of a repository
    Stargazers(StargazerArgs),
}

#[derive(Args, Debug)]
struct GitHubArgs {
    /// GitHub token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Organization to inspect
    #[arg(long, env = "GITHUB_ORG", global = true)]
    org: Option<String>,

    /// Timeout for each GitHub request, in seconds
    #[arg(long, default_value_t = 5, global = true)]
    timeout_secs: u64,
}

#[derive(Args, Debug)]
struct TeamArgs {
    /// Team whose members receive first reviews
    #[arg(long, env = "REVIEWER_TEAM", default_value = DEFAULT_REVIEWER_TEAM)]
    reviewer_team: String,

    /// Team whose members receive escalations
    #[arg(long, env = "COMMITTER_TEAM", default_value = DEFAULT_COMMITTER_TEAM)]
    committer_team: String,
}

impl TeamArgs {
    fn roles(&self) -> TeamRoles {
        TeamRoles {
            reviewers: self.reviewer_team.clone(),
            committers: self.committer_team.clone(),
        }
    }
}

#[derive(Args, Debug)]
struct PlanArgs {
    #[command(flatten)]
    teams: TeamArgs,

    /// Starting position of the member rotation
    #[arg(long, default_value_t = 0)]
    member_cursor: usize,

    /// Starting position of the committer rotation
    #[arg(long, default_value_t = 0)]
    committer_cursor: usize,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct StargazerArgs {
    /// Repository name within the organization
    repo: String,
}

struct Session {
    client: Arc<GitHubClient>,
    org: String,
}

impl Session {
    fn new(args: GitHubArgs) -> Result<Self> {
        let token = args
            .token
            .context("A GitHub token must be provided via --token or the GITHUB_TOKEN environment variable")?;
        let org = args
            .org
            .context("An organization must be provided via --org or the GITHUB_ORG environment variable")?;
        let client = GitHubClient::new(token, Duration::from_secs(args.timeout_secs))?;
        Ok(Self {
            client: Arc::new(client),
            org,
        })
    }

    fn registry(&self, teams: &TeamArgs) -> Arc<TeamRegistry> {
        Arc::new(TeamRegistry::new(
            self.client.clone(),
            self.org.clone(),
            teams.roles(),
            Duration::from_secs(3600),
        ))
    }
}

async fn run_plan(session: &Session, args: PlanArgs) -> Result<()> {
    let assigner = Assigner::new(
        session.client.clone(),
        session.registry(&args.teams),
        session.org.clone(),
        false,
        Cursors::new(args.member_cursor, args.committer_cursor),
    );

    let report = assigner.process_organization(SweepMode::DryRun).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
    }
    Ok(())
}

async fn run_teams(session: &Session, args: TeamArgs) -> Result<()> {
    let lookup = session.registry(&args).team_members().await;
    if let Some(e) = lookup.refresh_error {
        return Err(e);
    }
    let team = lookup
        .snapshot
        .context("No team data returned")?;

    println!("members ({}): {}", team.members().len(), team.members().join(", "));
    println!(
        "committers ({}): {}",
        team.committers().len(),
        team.committers().join(", ")
    );
    Ok(())
}

async fn run_stargazers(session: &Session, args: StargazerArgs) -> Result<()> {
    let logins = session
        .client
        .list_stargazers(&session.org, &args.repo)
        .await?;
    for login in &logins {
        println!("{}", login);
    }
    eprintln!("{} stargazers", logins.len());
    Ok(())
}

fn render_report(report: &SweepReport) -> String {
    let mut out = String::new();
    for outcome in &report.outcomes {
        let line = match (&outcome.decision, &outcome.error) {
            (_, Some(error)) => format!("error: {}", error),
            (Some(decision), None) => decision.to_string(),
            (None, None) => "no decision".to_string(),
        };
        out.push_str(&format!("{} by {}: {}\n", outcome.pr, outcome.pr.author, line));
    }
    for repo in &report.skipped_repositories {
        out.push_str(&format!("{}: skipped\n", repo));
    }
    out.push_str(&format!(
        "{} repositories, {} pull requests: {} to assign, {} waiting, {} no-op, {} without candidate, {} failed\n",
        report.repositories,
        report.pull_requests,
        report.assigned,
        report.waiting,
        report.no_op,
        report.no_candidate,
        report.failed
    ));
    if report.stale_teams {
        out.push_str("warning: team refresh failed, used cached teams\n");
    }
    out
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let session = Session::new(cli.github)?;

    match cli.command {
        Commands::Plan(args) => run_plan(&session, args).await,
        Commands::Teams(args) => run_teams(&session, args).await,
        Commands::Stargazers(args) => run_stargazers(&session, args).await,
    }
}
