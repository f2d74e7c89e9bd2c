// crates/cli/src/main.rs
//! `jobwatch`: start face-processing jobs on the backend and follow them.

mod render;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use jobwatch_core::{JobOutcome, JobProgress, ProgressView};
use jobwatch_observability::{init_logging, LogConfig};
use jobwatch_tracker::{
    start_feature_job, BackendClient, ChannelNotifier, FeatureJob, JobRegistry, Notification,
    NotificationKind, Subscription, TrackRequest, TrackerConfig,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::render::{completion_line, ProgressRenderer};

#[derive(Debug, Parser)]
#[command(name = "jobwatch", version, about = "Start backend jobs and follow their progress")]
struct Cli {
    /// Backend base URL.
    #[arg(long, global = true, env = "JOBWATCH_BASE_URL")]
    base_url: Option<String>,

    /// Give up on a progress stream after this many silent seconds (0 = never).
    #[arg(long, global = true, env = "JOBWATCH_IDLE_TIMEOUT_SECS")]
    idle_timeout: Option<u64>,

    /// Log as JSON lines on stderr.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Also write daily-rotated logs to this directory.
    #[arg(long, global = true, env = "JOBWATCH_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Find more face suggestions for a person.
    FindMore {
        #[arg(long)]
        person_id: String,
        #[arg(long, default_value = "")]
        person_name: String,
        #[arg(long)]
        limit: Option<u32>,
        /// Stop showing progress right away; report only when the job ends.
        #[arg(long)]
        detach: bool,
    },
    /// Run face detection over a directory.
    DetectFaces {
        directory: String,
        #[arg(long)]
        recursive: bool,
        #[arg(long)]
        detach: bool,
    },
    /// Recompute a person's match centroids.
    Centroids {
        #[arg(long)]
        person_id: String,
        #[arg(long, default_value = "")]
        person_name: String,
        #[arg(long)]
        detach: bool,
    },
    /// Follow a job that was started elsewhere.
    Watch {
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        progress_key: String,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Read a job's current state once, without opening a stream.
    Status {
        job_id: String,
        /// Print the record as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// How following a job's progress ended.
enum Follow {
    Ended,
    Interrupted,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _log_guard = init_logging(&LogConfig {
        json: cli.json_logs,
        log_dir: cli.log_dir.clone(),
        ..LogConfig::default()
    })?;
    jobwatch_tracker::metrics::describe_metrics();

    let mut config = TrackerConfig::from_env();
    if let Some(url) = &cli.base_url {
        config = config.with_base_url(url.clone());
    }
    if let Some(secs) = cli.idle_timeout {
        config = config.with_idle_timeout((secs > 0).then(|| Duration::from_secs(secs)));
    }
    debug!(base_url = %config.base_url, "configuration loaded");

    let client = BackendClient::new(config.clone()).context("failed to build HTTP client")?;
    let (notifier, notifications) = ChannelNotifier::new();
    let registry = JobRegistry::http(config, Arc::new(notifier)).context("failed to build progress transport")?;

    match cli.command {
        Command::FindMore {
            person_id,
            person_name,
            limit,
            detach,
        } => {
            let job = FeatureJob::FindMore {
                person_id,
                person_name,
                limit,
            };
            run_feature(&client, &registry, notifications, job, detach).await
        }
        Command::DetectFaces {
            directory,
            recursive,
            detach,
        } => {
            let job = FeatureJob::FaceDetection { directory, recursive };
            run_feature(&client, &registry, notifications, job, detach).await
        }
        Command::Centroids {
            person_id,
            person_name,
            detach,
        } => {
            let job = FeatureJob::Centroids {
                person_id,
                person_name,
            };
            run_feature(&client, &registry, notifications, job, detach).await
        }
        Command::Watch {
            job_id,
            progress_key,
            name,
        } => watch(&registry, TrackRequest::new(job_id.clone(), progress_key).with_context(job_id, name)).await,
        Command::Status { job_id, json } => status(&client, &job_id, json).await,
    }
}

async fn run_feature(
    client: &BackendClient,
    registry: &JobRegistry,
    notifications: mpsc::UnboundedReceiver<Notification>,
    job: FeatureJob,
    detach: bool,
) -> anyhow::Result<()> {
    let mut handle = start_feature_job(client, registry, &job)
        .await
        .with_context(|| format!("failed to start {} job", job.label()))?;
    eprintln!("  Started job {}", handle.job_id());

    if detach {
        let job_id = handle.detach();
        eprintln!("  Job {job_id} continues in the background; you will be told when it ends.");
        return await_notification(notifications, &job_id).await;
    }

    let mut renderer = ProgressRenderer::new(job.label())?;
    let how = follow(handle.subscription_mut(), &mut renderer).await?;
    renderer.clear();
    match how {
        Follow::Ended => {
            let done = handle.wait().await?;
            eprintln!("  {}", completion_line(&done));
        }
        Follow::Interrupted => {
            let job_id = handle.detach();
            eprintln!("  Stopped watching {job_id}; the job keeps running on the server.");
        }
    }
    Ok(())
}

async fn watch(registry: &JobRegistry, request: TrackRequest) -> anyhow::Result<()> {
    let label = request.job_id.clone();
    let (mut subscription, outcome) = registry.track_job_awaitable(request)?;

    let mut renderer = ProgressRenderer::new(&label)?;
    let how = follow(&mut subscription, &mut renderer).await?;
    renderer.clear();

    match how {
        Follow::Interrupted => {
            subscription.dispose();
            eprintln!("  Stopped watching {label}; the job keeps running on the server.");
            Ok(())
        }
        Follow::Ended => {
            let outcome = outcome.await.context("job tracking was abandoned")?;
            match outcome {
                JobOutcome::Completed(done) => {
                    eprintln!("  {}", completion_line(&done));
                    Ok(())
                }
                JobOutcome::Failed(reason) => Err(reason.into()),
            }
        }
    }
}

/// Redraw on every change until the job ends or the user presses Ctrl-C.
async fn follow(subscription: &mut Subscription, renderer: &mut ProgressRenderer) -> anyhow::Result<Follow> {
    loop {
        let progress = subscription.progress();
        renderer.update(&progress)?;
        if progress.status.is_terminal() {
            return Ok(Follow::Ended);
        }
        tokio::select! {
            changed = subscription.changed() => {
                if !changed {
                    return Ok(Follow::Ended);
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(Follow::Interrupted),
        }
    }
}

/// Wait for the toast-style notice that a backgrounded job ended.
async fn await_notification(mut notifications: mpsc::UnboundedReceiver<Notification>, job_id: &str) -> anyhow::Result<()> {
    while let Some(notification) = notifications.recv().await {
        if notification.job_id != job_id {
            continue;
        }
        match notification.kind {
            NotificationKind::Started => {}
            NotificationKind::Succeeded => {
                eprintln!("  \u{2713} {}: {}", notification.context_name, notification.summary);
                return Ok(());
            }
            NotificationKind::Failed => {
                anyhow::bail!("{}: {}", notification.context_name, notification.summary);
            }
        }
    }
    anyhow::bail!("job {job_id} ended without a notification")
}

async fn status(client: &BackendClient, job_id: &str, json: bool) -> anyhow::Result<()> {
    let frame = client
        .fetch_job(job_id)
        .await
        .with_context(|| format!("failed to read job {job_id}"))?;
    let now = Utc::now();
    let mut progress = JobProgress::new(job_id, "", "", "", now);
    progress.apply(&frame, now);
    info!(%job_id, status = %progress.status, "fetched job status");

    if json {
        println!("{}", serde_json::to_string_pretty(&progress)?);
        return Ok(());
    }

    let view = ProgressView::from_progress(&progress, now);
    if view.indeterminate {
        println!("{job_id}: {} - {}", view.status, view.message);
    } else {
        println!("{job_id}: {} {}% - {}", view.status, view.percent, view.message);
    }
    if let Some(error) = view.error_message {
        println!("  error: {error}");
    }
    Ok(())
}
