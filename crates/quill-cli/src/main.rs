use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quill_github::models::{ProjectLocator, RepoRef};
use quill_github::{GithubClient, GithubClientConfig};
use quill_oracle::{GeminiConfig, GeminiOracle};
use quill_reconciler::{
    GithubWorkSurface, MutationLog, ReconcileOutcome, Reconciler, ReconcilerConfig, TaskRequest,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_i64(value: &str) -> Result<i64, String> {
    let parsed = value
        .parse::<i64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed <= 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_similarity_threshold(value: &str) -> Result<f64, String> {
    let parsed = value
        .parse::<f64>()
        .map_err(|error| format!("failed to parse float: {error}"))?;
    if !parsed.is_finite() || parsed <= 0.0 || parsed > 1.0 {
        return Err("value must be in range (0, 1]".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "quill",
    about = "Reconciles natural-language task requests against GitHub Issues and Projects",
    version
)]
struct Cli {
    #[arg(
        long,
        env = "GITHUB_TOKEN",
        hide_env_values = true,
        help = "GitHub token with repo and project scopes."
    )]
    github_token: String,

    #[arg(
        long,
        env = "GEMINI_API_KEY",
        hide_env_values = true,
        default_value = "",
        help = "Gemini API key; only required by the reconcile command."
    )]
    gemini_api_key: String,

    #[arg(
        long,
        env = "QUILL_GEMINI_MODEL",
        default_value = "gemini-2.0-flash",
        help = "Gemini model used for task decomposition."
    )]
    gemini_model: String,

    #[arg(
        long,
        env = "QUILL_MUTATION_LOG",
        default_value = "quill-mutations.jsonl",
        help = "Path to the append-only mutation log used for idempotent retry."
    )]
    mutation_log: PathBuf,

    #[arg(
        long,
        value_parser = parse_similarity_threshold,
        default_value_t = 0.6,
        help = "Similarity at or above which a request is treated as already implemented."
    )]
    similarity_threshold: f64,

    #[arg(
        long,
        value_parser = parse_positive_usize,
        default_value_t = 10,
        help = "Maximum number of work items one request may decompose into."
    )]
    max_items: usize,

    #[arg(
        long,
        value_parser = parse_positive_usize,
        default_value_t = 2,
        help = "Maximum number of items committed concurrently."
    )]
    commit_concurrency: usize,

    #[arg(
        long,
        default_value = "Todo",
        help = "Project status assigned to freshly created items."
    )]
    initial_status: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reconcile one task description against a repository's project board.
    Reconcile {
        #[arg(long, help = "Target repository in owner/name form.")]
        repo: String,
        #[arg(long, value_parser = parse_positive_i64, help = "Projects v2 board number.")]
        project_number: i64,
        #[arg(long, help = "Who asked for this work; recorded in issue bodies.")]
        requester: String,
        #[arg(long, help = "GitHub login to assign created issues to.")]
        assignee: Option<String>,
        #[arg(
            long,
            help = "File holding a repository summary passed to the decomposition model."
        )]
        repo_context_file: Option<PathBuf>,
        #[arg(help = "Natural-language description of the requested work.")]
        description: String,
    },
    /// List open (not closed, not done) work on a project board.
    ListOpen {
        #[arg(long, help = "Target repository in owner/name form.")]
        repo: String,
        #[arg(long, value_parser = parse_positive_i64, help = "Projects v2 board number.")]
        project_number: i64,
    },
    /// List open work assigned to a GitHub user, across repositories.
    ListUser {
        #[arg(help = "GitHub login to look up.")]
        login: String,
    },
    /// Print the remaining GitHub API quota.
    Quota,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn locator(repo: &str, project_number: i64) -> Result<ProjectLocator> {
    let repo = RepoRef::parse(repo).context("invalid --repo")?;
    Ok(ProjectLocator {
        repo,
        project_number,
    })
}

/// Flips the returned receiver to true on the first Ctrl-C.
fn cancellation_receiver() -> tokio::sync::watch::Receiver<bool> {
    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });
    rx
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(value).context("failed to encode output as json")?;
    println!("{rendered}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let client = GithubClient::new(GithubClientConfig {
        token: cli.github_token.clone(),
        ..GithubClientConfig::default()
    })
    .context("failed to construct github client")?;

    let config = ReconcilerConfig {
        similarity_threshold: cli.similarity_threshold,
        max_items: cli.max_items,
        commit_concurrency: cli.commit_concurrency,
        initial_status: cli.initial_status.clone(),
        ..ReconcilerConfig::default()
    };
    let mutation_log = cli.mutation_log.clone();
    let gemini_api_key = cli.gemini_api_key.clone();
    let gemini_model = cli.gemini_model.clone();

    match cli.command {
        Command::Reconcile {
            repo,
            project_number,
            requester,
            assignee,
            repo_context_file,
            description,
        } => {
            let oracle = GeminiOracle::new(GeminiConfig {
                api_key: gemini_api_key,
                model: gemini_model,
                ..GeminiConfig::default()
            })
            .context("failed to construct decomposition oracle")?;
            let log = MutationLog::open(&mutation_log)?;
            let reconciler = Reconciler::new(
                Arc::new(GithubWorkSurface::new(client)),
                Arc::new(oracle),
                log,
                config,
            )?;

            let repo_context = match repo_context_file {
                Some(path) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?,
                ),
                None => None,
            };
            let request = TaskRequest {
                description,
                requester,
                assignee_login: assignee,
                target: locator(&repo, project_number)?,
                repo_context,
            };

            let outcome = reconciler
                .reconcile(&request, Some(cancellation_receiver()))
                .await;
            print_json(&outcome)?;
            if matches!(outcome, ReconcileOutcome::Failed { .. }) {
                std::process::exit(1);
            }
        }
        Command::ListOpen {
            repo,
            project_number,
        } => {
            let log = MutationLog::open(&mutation_log)?;
            let reconciler = Reconciler::new(
                Arc::new(GithubWorkSurface::new(client)),
                Arc::new(OfflineOracle),
                log,
                config,
            )?;
            let items = reconciler
                .list_open_work(&locator(&repo, project_number)?)
                .await
                .context("failed to list open work")?;
            print_json(&items)?;
        }
        Command::ListUser { login } => {
            let log = MutationLog::open(&mutation_log)?;
            let reconciler = Reconciler::new(
                Arc::new(GithubWorkSurface::new(client)),
                Arc::new(OfflineOracle),
                log,
                config,
            )?;
            let items = reconciler
                .list_work_for_user(&login)
                .await
                .context("failed to list user work")?;
            print_json(&items)?;
        }
        Command::Quota => {
            let info = client
                .rate_limit()
                .await
                .context("failed to probe rate limit")?;
            print_json(&serde_json::json!({
                "limit": info.limit,
                "remaining": info.remaining,
                "reset_at": info.reset_at,
            }))?;
        }
    }
    Ok(())
}

/// The list commands never decompose; a stub keeps construction uniform.
struct OfflineOracle;

#[async_trait::async_trait]
impl quill_oracle::DecompositionOracle for OfflineOracle {
    async fn decompose(
        &self,
        _description: &str,
        _repo_context: &str,
        _max_items: usize,
    ) -> Result<quill_oracle::DecompositionResult, quill_oracle::OracleError> {
        Err(quill_oracle::OracleError::MissingApiKey)
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_positive_i64, parse_positive_usize, parse_similarity_threshold};

    #[test]
    fn unit_positive_parsers_reject_zero_and_garbage() {
        assert!(parse_positive_usize("0").is_err());
        assert!(parse_positive_usize("abc").is_err());
        assert_eq!(parse_positive_usize("3"), Ok(3));
        assert!(parse_positive_i64("-1").is_err());
        assert_eq!(parse_positive_i64("7"), Ok(7));
    }

    #[test]
    fn unit_similarity_threshold_stays_in_unit_interval() {
        assert!(parse_similarity_threshold("0").is_err());
        assert!(parse_similarity_threshold("1.1").is_err());
        assert_eq!(parse_similarity_threshold("0.6"), Ok(0.6));
    }
}
