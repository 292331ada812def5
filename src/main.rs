use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sheriff::{
    clock::SystemClock,
    driver::{DriverRegistry, GithubDriver, GitlabDriver, RepositoryDriver},
    model::{Platform, Target},
    patrol::{join_warnings, Patrol},
    publish::{console, issue::IssuePublisher, slack::SlackClient, slack::SlackPublisher},
    runner::ShellRunner,
    scan::OsvScanner,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Exit codes for CI integration
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const ERROR: u8 = 1;
}

#[derive(Parser)]
#[command(name = "sheriff")]
#[command(
    author,
    version,
    about = "Patrol repositories for dependency vulnerabilities and publish reports"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan every repository reachable from the given targets
    Patrol {
        /// Targets to patrol, e.g. gitlab://group/subgroup or github://owner
        #[arg(required = true)]
        targets: Vec<String>,

        /// Where to publish reports (repeatable)
        #[arg(short, long, value_enum, default_value = "console")]
        report: Vec<ReportFormat>,

        /// Slack channels for the fleet-wide summary (repeatable)
        #[arg(long = "slack-channel")]
        slack_channels: Vec<String>,

        /// GitLab instance URL
        #[arg(long, default_value = "https://gitlab.com")]
        gitlab_url: String,

        /// Number of repositories to scan concurrently (default: CPU count)
        #[arg(short, long)]
        jobs: Option<usize>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Issue,
    Slack,
    Console,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let patrol = async {
        match run(cli).await {
            Ok(code) => code,
            Err(e) => {
                eprintln!("Error: {e:#}");
                exit_codes::ERROR
            }
        }
    };

    // Ctrl-C drops the patrol future: in-flight scanners are reaped
    // (kill_on_drop) and the temp root is removed on drop.
    tokio::select! {
        code = patrol => ExitCode::from(code),
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted.");
            ExitCode::from(exit_codes::ERROR)
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<u8> {
    match cli.command {
        Commands::Patrol {
            targets,
            report,
            slack_channels,
            gitlab_url,
            jobs,
        } => run_patrol(targets, report, slack_channels, gitlab_url, jobs).await,
    }
}

async fn run_patrol(
    target_args: Vec<String>,
    formats: Vec<ReportFormat>,
    slack_channels: Vec<String>,
    gitlab_url: String,
    jobs: Option<usize>,
) -> Result<u8> {
    let targets = target_args
        .iter()
        .map(|t| Target::parse(t))
        .collect::<Result<Vec<_>>>()?;

    let runner = Arc::new(ShellRunner);
    let clock = Arc::new(SystemClock);

    let mut drivers: Vec<Arc<dyn RepositoryDriver>> = Vec::new();
    if targets.iter().any(|t| t.platform == Platform::Gitlab) {
        let token = std::env::var("GITLAB_TOKEN")
            .context("GITLAB_TOKEN must be set for gitlab:// targets")?;
        drivers.push(Arc::new(GitlabDriver::new(
            gitlab_url,
            token,
            runner.clone(),
        )));
    }
    if targets.iter().any(|t| t.platform == Platform::Github) {
        let token = std::env::var("GITHUB_TOKEN")
            .context("GITHUB_TOKEN must be set for github:// targets")?;
        drivers.push(Arc::new(GithubDriver::new(token, runner.clone())));
    }

    // Credentials are resolved before any scan starts; a missing one is a
    // setup failure.
    let slack_token = if formats.contains(&ReportFormat::Slack) {
        Some(std::env::var("SLACK_TOKEN").context("SLACK_TOKEN must be set for slack reports")?)
    } else {
        None
    };

    let registry = Arc::new(DriverRegistry::new(drivers));
    let scanner = Arc::new(OsvScanner::new(runner));

    let mut patrol = Patrol::new(registry.clone(), scanner);
    if let Some(jobs) = jobs {
        if jobs == 0 {
            bail!("--jobs must be at least 1");
        }
        patrol = patrol.with_jobs(jobs);
    }

    let outcome = patrol.run(&targets).await?;
    let mut reports = outcome.reports;
    let mut warnings = outcome.warnings;

    // Issue publication runs first so chat messages can link the issues.
    if formats.contains(&ReportFormat::Issue) {
        let publisher = IssuePublisher::new(registry.clone(), clock.clone());
        warnings.extend(publisher.publish(&mut reports).await);
    }

    if let Some(token) = slack_token {
        let publisher = SlackPublisher::new(Arc::new(SlackClient::new(token)), clock);
        warnings.extend(
            publisher
                .publish_summary(&targets, &reports, &slack_channels)
                .await,
        );
        warnings.extend(publisher.publish_per_project(&reports).await);
    }

    if formats.contains(&ReportFormat::Console) {
        console::publish(&reports);
    }

    if let Some(warning) = join_warnings(&warnings) {
        warn!("patrol finished with warnings: {warning:#}");
    }

    Ok(exit_codes::SUCCESS)
}
