// crates/cli/src/main.rs
//! `docjobs` binary: submit documents to the job service and follow them.
//!
//! Settings come from an optional TOML file, then `DOCJOBS_*` environment
//! variables, then flags. Logging is configured via `DOCJOBS_LOG`,
//! `DOCJOBS_LOG_FORMAT` and `DOCJOBS_LOG_DIR`.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docjobs_core::{Document, JobTracker, TrackerConfig};
use docjobs_observability::{init_tracing, LogConfig};
use docjobs_types::{Job, JobStatus};

#[derive(Debug, Parser)]
#[command(name = "docjobs", version, about = "Track asynchronous document processing jobs")]
struct Cli {
    /// TOML config file.
    #[arg(long, env = "DOCJOBS_CONFIG")]
    config: Option<PathBuf>,

    /// Job service base URL.
    #[arg(long)]
    api_url: Option<String>,

    /// Job registry file.
    #[arg(long)]
    store: Option<PathBuf>,

    /// Print records as JSON lines.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upload documents and follow them until they finish.
    Submit {
        files: Vec<PathBuf>,
        /// Answer password prompts with this instead of asking.
        #[arg(long)]
        password: Option<String>,
        /// Return once the uploads are classified.
        #[arg(long)]
        no_follow: bool,
    },
    /// Align persisted jobs with the server.
    Reconcile {
        /// Keep following jobs that are still running.
        #[arg(long)]
        watch: bool,
    },
    /// Show the job registry.
    List,
    /// Drop finished jobs from the registry.
    Clear,
    /// Drop one job by its local id.
    Remove { id: String },
}

impl Cli {
    fn tracker_config(&self) -> Result<TrackerConfig> {
        let mut config = match &self.config {
            Some(path) => TrackerConfig::load(path)?,
            None => TrackerConfig::from_env(),
        };
        if let Some(url) = &self.api_url {
            config.api_url = url.clone();
        }
        if let Some(store) = &self.store {
            config.store_path = Some(store.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_tracing(&LogConfig::from_env())?;
    let cli = Cli::parse();
    let config = cli.tracker_config().context("loading configuration")?;
    let tracker = JobTracker::from_config(config).context("starting job tracker")?;

    let result = run(&cli, &tracker).await;
    tracker.shutdown().await;
    result
}

async fn run(cli: &Cli, tracker: &JobTracker) -> Result<()> {
    match &cli.command {
        Commands::Submit {
            files,
            password,
            no_follow,
        } => {
            anyhow::ensure!(!files.is_empty(), "no files given");
            let mut ids = Vec::with_capacity(files.len());
            for path in files {
                let document = Document::from_path(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let job = tracker.submit(document).await?;
                print_job(&job, cli.json)?;
                ids.push(job.id);
                answer_prompts(tracker, password.as_deref(), cli.json).await?;
            }
            if !no_follow {
                follow(tracker, &ids, cli.json).await?;
            }
        }
        Commands::Reconcile { watch } => {
            let report = tracker.reconcile().await;
            if cli.json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!(
                    "{} loaded, {} finished, {} resumed, {} not found, {} interrupted",
                    report.loaded, report.finished, report.resumed, report.not_found, report.interrupted
                );
            }
            if *watch {
                let ids: Vec<String> = tracker.jobs().into_iter().map(|j| j.id).collect();
                follow(tracker, &ids, cli.json).await?;
            }
        }
        Commands::List => {
            for job in tracker.jobs() {
                print_job(&job, cli.json)?;
            }
        }
        Commands::Clear => println!("removed {} finished jobs", tracker.clear_completed()),
        Commands::Remove { id } => {
            anyhow::ensure!(tracker.remove(id), "no job with id {id}");
        }
    }
    Ok(())
}

/// Resolve prompts until none is pending: the given password, else stdin.
/// An empty answer dismisses the prompt.
async fn answer_prompts(tracker: &JobTracker, password: Option<&str>, json: bool) -> Result<()> {
    let mut tried_given = false;
    while let Some(prompt) = tracker.pending_prompt() {
        let answer = match password {
            Some(p) if !tried_given => {
                tried_given = true;
                p.to_string()
            }
            _ => ask_password(&prompt.filename, prompt.error.as_deref())?,
        };
        let job = if answer.is_empty() {
            tracker.dismiss_password_prompt()?
        } else {
            tracker.submit_password(&answer).await?
        };
        print_job(&job, json)?;
    }
    Ok(())
}

fn ask_password(filename: &str, error: Option<&str>) -> Result<String> {
    let mut stderr = std::io::stderr();
    if let Some(error) = error {
        writeln!(stderr, "{error}")?;
    }
    write!(stderr, "Password for {filename} (empty to skip): ")?;
    stderr.flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Print updates for `ids` until each is finished, paused on a password, or
/// no longer followed by any channel.
async fn follow(tracker: &JobTracker, ids: &[String], json: bool) -> Result<()> {
    let mut rx = tracker.subscribe();
    loop {
        let open = ids
            .iter()
            .filter_map(|id| tracker.job(id))
            .any(|job| !settled(tracker, &job));
        if !open {
            return Ok(());
        }
        tokio::select! {
            update = rx.recv() => {
                if let Ok(job) = update {
                    if ids.contains(&job.id) {
                        print_job(&job, json)?;
                    }
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted; jobs resume on the next reconcile");
                return Ok(());
            }
        }
    }
}

fn settled(tracker: &JobTracker, job: &Job) -> bool {
    match (&job.job_id, job.status) {
        (_, status) if status.is_terminal() => true,
        (_, JobStatus::PasswordRequired) => true,
        (Some(job_id), _) => tracker.active_channel(job_id).is_none(),
        (None, _) => false,
    }
}

fn print_job(job: &Job, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(job)?);
        return Ok(());
    }
    let job_id = job.job_id.as_deref().unwrap_or("-");
    match &job.error {
        Some(error) => println!(
            "{}  {:<28} {:<18} {:>3}%  {}  ({error})",
            job.id, job.filename, job.status.as_str(), job.progress, job_id
        ),
        None => println!(
            "{}  {:<28} {:<18} {:>3}%  {}",
            job.id, job.filename, job.status.as_str(), job.progress, job_id
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_args() {
        let cli = Cli::parse_from([
            "docjobs",
            "--api-url",
            "http://jobs.internal:9000",
            "submit",
            "a.pdf",
            "b.pdf",
            "--password",
            "hunter2",
        ]);
        match &cli.command {
            Commands::Submit {
                files,
                password,
                no_follow,
            } => {
                assert_eq!(files.len(), 2);
                assert_eq!(password.as_deref(), Some("hunter2"));
                assert!(!no_follow);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        let config = cli.tracker_config().unwrap();
        assert_eq!(config.api_url, "http://jobs.internal:9000");
    }

    #[test]
    fn test_store_flag_overrides() {
        let cli = Cli::parse_from(["docjobs", "--store", "/tmp/jobs.json", "list"]);
        let config = cli.tracker_config().unwrap();
        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/jobs.json")));
    }

    #[test]
    fn test_empty_api_url_rejected() {
        let cli = Cli::parse_from(["docjobs", "--api-url", "", "list"]);
        assert!(cli.tracker_config().is_err());
    }
}
