use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use bench_controller::config::{ControllerConfig, DEFAULT_REPOSITORY, DEFAULT_SNAPSHOT_URL};
use bench_controller::controller::{Controller, Directives};
use bench_controller::shutdown::install_shutdown_handler;
use bench_controller::upstream::{GitHubClient, HttpSnapshotSource};
use bench_controller::worker::SshExecutor;

#[derive(Parser, Debug)]
#[command(name = "bench-controller")]
#[command(version)]
#[command(about = "Schedules upstream commits for benchmarking on a pool of remote workers")]
struct Args {
    /// Commit to benchmark before anything else (repeatable)
    #[arg(short = 'c', long = "schedule-commit", value_name = "HASH")]
    schedule_commit: Vec<String>,

    /// Set a worker back to idle without waiting for its job (repeatable)
    #[arg(short = 'i', long = "idle", value_name = "ID")]
    idle: Vec<u32>,

    /// Re-run the commit of a running worker (repeatable)
    #[arg(short = 'r', long = "restart", value_name = "ID")]
    restart: Vec<u32>,

    /// GitHub API token
    #[arg(short = 't', long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Directory holding controller.json and the worker documents
    #[arg(long, default_value = ".")]
    state_dir: PathBuf,

    /// Upstream repository in owner/name form
    #[arg(long, default_value = DEFAULT_REPOSITORY)]
    repo: String,

    /// Zip archive with the published measurement index
    #[arg(long, default_value = DEFAULT_SNAPSHOT_URL)]
    snapshot_url: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ControllerConfig::new(args.state_dir)
        .with_repository(args.repo)
        .with_snapshot_url(args.snapshot_url);

    tracing::info!(
        state_dir = %config.state_dir.display(),
        repository = %config.repository,
        authenticated = args.token.is_some(),
        "Starting bench controller"
    );

    let executor = Arc::new(SshExecutor::new(config.remote.program.clone()));
    let commits = Arc::new(GitHubClient::new(args.token)?);
    let snapshots = Arc::new(HttpSnapshotSource::new()?);
    let controller = Controller::new(config, executor, commits, snapshots)?;

    let directives = Directives {
        idle: args.idle,
        restart: args.restart,
        commits: args.schedule_commit,
    };

    let shutdown = install_shutdown_handler();
    tokio::select! {
        result = controller.run(directives) => {
            if let Err(e) = &result {
                tracing::error!(error = %e, "Controller stopped");
            }
            result?;
        }
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown complete");
        }
    }

    Ok(())
}
