//! `mediaferry` - resumable media uploads from the command line.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use mediaferry_engine::{UploadEngine, UploadHandle};
use mediaferry_ingest::HttpIngestClient;
use mediaferry_protocol::{UploadMetadata, UploadSnapshot, UploadStatus};
use mediaferry_session_store::JsonFileStore;
use mediaferry_transfer::ChunkReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::UploaderConfig;

/// Upload media files to a resumable-upload server.
#[derive(Parser)]
#[command(name = "mediaferry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new upload
    Upload {
        /// File to upload
        file: PathBuf,

        /// Metadata entry (can be specified multiple times)
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },

    /// Continue an interrupted upload
    Resume {
        /// Session ID
        id: String,

        /// The same file that was being uploaded
        file: PathBuf,
    },

    /// List persisted sessions
    List,

    /// Abandon a persisted session and release its server resource
    Discard {
        /// Session ID
        id: String,
    },

    /// Remove sessions untouched for a while
    Evict {
        #[arg(long, default_value_t = 24 * 7)]
        older_than_hours: u64,
    },
}

fn parse_meta(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    if key.is_empty() {
        return Err("metadata key must not be empty".into());
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = UploaderConfig::load(cli.config.as_deref())?;
    let engine = build_engine(&cfg)?;

    match cli.command {
        Commands::Upload { file, meta } => {
            let source = open_source(&file)?;
            let metadata = build_metadata(&file, meta);
            let handle = engine.start(source, metadata)?;
            println!("session {}", handle.id());
            drive(&engine, handle).await
        }
        Commands::Resume { id, file } => {
            let source = open_source(&file)?;
            let handle = engine.resume(&id, source).await?;
            drive(&engine, handle).await
        }
        Commands::List => {
            let sessions = engine.sessions().await?;
            if sessions.is_empty() {
                println!("no sessions");
            }
            for session in sessions {
                let error = session
                    .last_error()
                    .map(|e| format!("  ({}: {})", e.reason, e.message))
                    .unwrap_or_default();
                println!(
                    "{}  {:<9}  {}/{} bytes  updated {}{}",
                    session.id(),
                    session.status(),
                    session.committed_bytes(),
                    session.total_bytes(),
                    session.updated_at().format("%Y-%m-%d %H:%M"),
                    error
                );
            }
            Ok(())
        }
        Commands::Discard { id } => {
            engine.discard(&id).await?;
            println!("discarded {id}");
            Ok(())
        }
        Commands::Evict { older_than_hours } => {
            let max_age = Duration::from_secs(older_than_hours * 3600);
            let evicted = engine.evict_stale(max_age).await?;
            println!("evicted {} session(s)", evicted.len());
            Ok(())
        }
    }
}

fn build_engine(cfg: &UploaderConfig) -> anyhow::Result<UploadEngine> {
    let endpoint = HttpIngestClient::new(cfg.ingest_config()).context("ingest client")?;
    let dir = cfg.session_dir()?;
    let store = JsonFileStore::open(dir.clone())
        .with_context(|| format!("opening session store at {}", dir.display()))?;
    Ok(UploadEngine::new(
        Arc::new(endpoint),
        Arc::new(store),
        cfg.engine_config()?,
    ))
}

fn open_source(path: &Path) -> anyhow::Result<Box<ChunkReader>> {
    let reader = ChunkReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Box::new(reader))
}

/// Adds `filename` from the path unless given explicitly.
fn build_metadata(path: &Path, entries: Vec<(String, String)>) -> UploadMetadata {
    let mut metadata = UploadMetadata::new();
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        metadata.insert("filename", name);
    }
    for (key, value) in entries {
        metadata.insert(key, value);
    }
    metadata
}

/// Follows an upload to its end and reports the outcome.
async fn drive(engine: &UploadEngine, handle: UploadHandle) -> anyhow::Result<()> {
    let snapshot = settle(handle, log_progress).await;
    if let Err(e) = engine.flush().await {
        warn!(error = %e, "failed to flush session store");
    }

    match snapshot.status {
        UploadStatus::Completed => {
            println!("{} completed ({} bytes)", snapshot.session_id, snapshot.total_bytes);
            Ok(())
        }
        UploadStatus::Paused => {
            println!(
                "{} paused at {:.1}%; continue with `mediaferry resume {} <file>`",
                snapshot.session_id,
                snapshot.percentage(),
                snapshot.session_id
            );
            Ok(())
        }
        UploadStatus::Cancelled => {
            println!(
                "{} cancelled before the upload resource was created",
                snapshot.session_id
            );
            Ok(())
        }
        status => {
            let detail = snapshot
                .last_error
                .map(|e| format!("{}: {}", e.reason, e.message))
                .unwrap_or_else(|| "no error recorded".into());
            bail!("upload {} ended {status} ({detail})", snapshot.session_id)
        }
    }
}

/// Waits for the session to settle, feeding every snapshot to `on_event`.
/// Ctrl-C pauses the upload, leaving the session resumable; before the
/// server resource exists it cancels instead.
async fn settle<F>(handle: UploadHandle, mut on_event: F) -> UploadSnapshot
where
    F: FnMut(&UploadSnapshot) + Send + 'static,
{
    let progress = handle.take_events().map(|mut events| {
        tokio::spawn(async move {
            while let Some(snapshot) = events.recv().await {
                on_event(&snapshot);
            }
        })
    });

    let snapshot = tokio::select! {
        snapshot = handle.wait() => snapshot,
        _ = tokio::signal::ctrl_c() => interrupt(&handle).await,
    };

    // Dropping the handle ends the event stream once the transfer task is
    // gone, so every final snapshot is delivered.
    drop(handle);
    if let Some(task) = progress {
        if let Err(e) = task.await {
            warn!(error = %e, "progress logger failed");
        }
    }
    snapshot
}

/// Settles the session after Ctrl-C and returns its final snapshot.
async fn interrupt(handle: &UploadHandle) -> UploadSnapshot {
    let result = match handle.status() {
        UploadStatus::Idle => {
            info!("interrupted while creating the upload, cancelling");
            handle.cancel().await
        }
        _ => {
            info!("interrupted, pausing upload");
            handle.pause().await
        }
    };
    match result {
        Ok(()) => handle.snapshot(),
        // The transfer settled on its own in the meantime.
        Err(e) => {
            warn!(error = %e, "could not stop the upload");
            handle.wait().await
        }
    }
}

fn log_progress(snapshot: &UploadSnapshot) {
    match &snapshot.last_error {
        Some(error) if snapshot.status == UploadStatus::Uploading => {
            warn!(
                session = %snapshot.session_id,
                reason = %error.reason,
                "{}",
                error.message
            );
        }
        _ => info!(
            session = %snapshot.session_id,
            status = %snapshot.status,
            percent = format_args!("{:.1}", snapshot.percentage()),
            speed = format_args!("{}/s", format_bytes(snapshot.speed_bytes_per_second as u64)),
            eta_secs = snapshot.estimated_seconds_remaining.map(|s| s.round() as u64),
            "progress"
        ),
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
