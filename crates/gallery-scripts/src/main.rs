//! Gallery maintenance CLI.
//!
//! Runs scripts through the job manager in the foreground, streaming the job
//! log to stdout. Ctrl-C asks the job to stop after the current item;
//! progress is kept, so the next run resumes.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

use gallery_jobs::{init_tracing, JobManager, JobsConfig};
use gallery_models::{JobParams, JobStatus};
use gallery_scripts::{rebuild_previews, script_registry, ScriptsConfig};
use gallery_store::{JobTableFile, ProgressStore};

#[derive(Parser)]
#[command(name = "gallery-scripts", version, about = "Run gallery maintenance scripts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild derived images for one category or all of them
    RebuildPreviews(RebuildArgs),
    /// Show recorded jobs, newest first
    List,
    /// Print the registered scripts and their parameters as JSON
    Scripts,
    /// Forget the processed items under a progress key
    Reset {
        /// Progress key, e.g. `rebuild_previews:all`
        key: String,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct RebuildArgs {
    /// Single category name to rebuild
    #[arg(long)]
    category: Option<String>,
    /// Rebuild every category
    #[arg(long)]
    all: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let jobs_config = JobsConfig::from_env();

    match cli.command {
        Commands::RebuildPreviews(args) => {
            let scripts_config = ScriptsConfig::from_env();
            info!("Scripts config: {:?}", scripts_config);
            let registry = script_registry(&scripts_config)?;
            let manager = JobManager::new(&jobs_config, Arc::new(registry))?;
            let category = if args.all { None } else { args.category };
            rebuild(&manager, category, jobs_config.log_poll_interval).await
        }
        // Read-only: a manager here would mark another process's running job stopped.
        Commands::List => {
            let mut jobs: Vec<_> = JobTableFile::new(jobs_config.jobs_file())
                .load()?
                .into_values()
                .collect();
            jobs.sort_by_key(|job| std::cmp::Reverse(job.sort_timestamp()));

            for job in jobs {
                println!(
                    "{}  {:<10} {:<18} {}  failures={}  key={}",
                    job.id,
                    job.status.as_str(),
                    job.script,
                    job.sort_timestamp().format("%Y-%m-%d %H:%M:%S"),
                    job.item_failures,
                    job.progress_key
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Scripts => {
            let registry = script_registry(&ScriptsConfig::from_env())?;
            println!("{}", serde_json::to_string_pretty(&registry.infos())?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Reset { key } => {
            let progress = ProgressStore::open(jobs_config.progress_file())?;
            let count = progress.count(&key);
            progress.reset(&key)?;
            println!("Cleared {} processed items under '{}'", count, key);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn rebuild(
    manager: &JobManager,
    category: Option<String>,
    poll_interval: Duration,
) -> anyhow::Result<ExitCode> {
    let mut params = JobParams::new();
    if let Some(category) = category {
        params.insert("category".to_string(), category);
    }

    let job = manager.start_job(rebuild_previews::SCRIPT_NAME, params)?;
    info!(
        job_id = %job.id,
        progress_key = %job.progress_key,
        log = %job.log_path.display(),
        "Rebuild started"
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interval = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
    let mut interrupted = false;
    let mut stop_sent = false;
    let mut offset = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut ctrl_c, if !interrupted => {
                warn!("Interrupted; stopping after the current item");
                interrupted = true;
            }
        }

        // A job still queued cannot be stopped yet; retry on the next tick.
        if interrupted && !stop_sent {
            stop_sent = manager.stop_job(&job.id);
        }

        let chunk = manager.read_log(&job.id, offset)?;
        if !chunk.data.is_empty() {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(chunk.data.as_bytes())?;
            stdout.flush()?;
        }
        offset = chunk.offset;

        if chunk.status.is_terminal() {
            let summary = manager.job_status(&job.id)?;
            info!(
                job_id = %job.id,
                status = %summary.job.status,
                processed = summary.processed_count,
                item_failures = summary.job.item_failures,
                "Rebuild finished"
            );
            return Ok(if summary.job.status == JobStatus::Failed {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            });
        }
    }
}
