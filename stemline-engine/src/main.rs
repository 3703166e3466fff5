//! Stemline processing engine: CLI entry point.
//!
//! Startup failures are unified through `anyhow` into one of the exit
//! codes spec §6.5 enumerates; library code below `main` always returns
//! the crate's typed `Result`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stemline_common::lock::ProcessLock;
use stemline_common::store::Store;
use stemline_common::EventLog;
use stemline_engine::config::ConfigOverrides;
use stemline_engine::media::{MediaToolkit, Separator};
use stemline_engine::processor::Processor;
use stemline_engine::queue::Queue;
use stemline_engine::sync::SyncRouter;
use stemline_engine::EngineConfig;
use tracing_subscriber::EnvFilter;

const EXIT_CONFIG_INVALID: i32 = 2;
const EXIT_ALREADY_RUNNING: i32 = 3;
const EXIT_FATAL_FS: i32 = 4;
const EXIT_INTERNAL: i32 = 64;

#[derive(Parser, Debug)]
#[command(name = "stemline-engine", version, about = "CPU-bound media separation pipeline engine")]
struct Cli {
    /// Path to the TOML config file (overrides STEMLINE_CONFIG and the
    /// platform default).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Plan and extract chunks but stop before invoking the separator.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the Processor loop (default).
    Run,
    /// Claim and process the single oldest job, then exit.
    RunOnce,
    /// Run the Sync Router loop.
    SyncDaemon,
    /// Sync the artifacts of one manifest.
    SyncOnce { manifest_path: PathBuf },
    /// Validate configured paths and tool availability; read-only.
    Doctor,
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<stemline_common::Error>() {
        return match e {
            stemline_common::Error::AlreadyRunning { .. } => EXIT_ALREADY_RUNNING,
            stemline_common::Error::Config(_) | stemline_common::Error::TomlDe(_) => EXIT_CONFIG_INVALID,
            stemline_common::Error::Io(_) => EXIT_FATAL_FS,
            _ => EXIT_INTERNAL,
        };
    }
    EXIT_INTERNAL
}

#[tokio::main(flavor = "multi_thread")]
async fn run(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let overrides = ConfigOverrides { config_path: cli.config.clone() };
    let config = EngineConfig::load(&overrides).context("loading configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Doctor => doctor(&config).await,
        Command::Run => run_processor_loop(&config, false, cli.dry_run).await,
        Command::RunOnce => run_processor_loop(&config, true, cli.dry_run).await,
        Command::SyncDaemon => sync_daemon(&config).await,
        Command::SyncOnce { manifest_path } => sync_once(&config, &manifest_path).await,
    }
}

async fn run_processor_loop(config: &EngineConfig, once: bool, dry_run: bool) -> Result<()> {
    let _lock = ProcessLock::acquire(&config.paths.working.join("stemline.lock")).context("acquiring singleton lock")?;

    let events = EventLog::open(config.paths.log_dir.join("pipeline.jsonl")).context("opening event log")?;
    let store = Store::open(&config.paths.db_path).await.context("opening state store")?;
    let timeout = std::time::Duration::from_secs(config.processing.timeout_sec);
    let toolkit = MediaToolkit::new("ffmpeg", timeout);
    let separator = Separator::new("demucs", config.processing.model.clone());
    let queue = Queue::new(config.queues.clone(), config.paths.working.clone());
    let processor =
        Processor { config, toolkit: &toolkit, separator: &separator, queue: &queue, events: &events, store: &store, dry_run };

    let mut active_album: Option<String> = None;
    loop {
        let jobs = queue.discover().context("discovering queued jobs")?;
        let Some(next) = Queue::select_next(&jobs, active_album.as_deref()) else {
            if once {
                return Ok(());
            }
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            continue;
        };
        active_album = next.bundle.album.clone();
        let claimed = queue.claim(next.clone()).context("claiming job")?;
        processor.run(claimed).await.context("running job")?;

        if once {
            return Ok(());
        }
    }
}

async fn sync_daemon(config: &EngineConfig) -> Result<()> {
    let events = EventLog::open(config.paths.log_dir.join("pipeline.jsonl")).context("opening event log")?;
    let store = Store::open(&config.paths.db_path).await.context("opening state store")?;
    let router = SyncRouter { config, events: &events, store: &store };
    loop {
        router.poll_once().await.context("sync poll")?;
        tokio::time::sleep(std::time::Duration::from_secs(config.sync.poll_interval_sec)).await;
    }
}

async fn sync_once(config: &EngineConfig, manifest_path: &std::path::Path) -> Result<()> {
    let events = EventLog::open(config.paths.log_dir.join("pipeline.jsonl")).context("opening event log")?;
    let store = Store::open(&config.paths.db_path).await.context("opening state store")?;
    let router = SyncRouter { config, events: &events, store: &store };
    router.sync_manifest(manifest_path).await.context("syncing manifest")?;
    Ok(())
}

async fn doctor(config: &EngineConfig) -> Result<()> {
    println!("stemline-engine doctor");
    println!();
    println!("paths:");
    for (label, path) in [
        ("incoming", &config.paths.incoming),
        ("working", &config.paths.working),
        ("outputs_dir", &config.paths.outputs_dir),
        ("music_library", &config.paths.music_library),
        ("archive_dir", &config.paths.archive_dir),
        ("quarantine_dir", &config.paths.quarantine_dir),
        ("log_dir", &config.paths.log_dir),
    ] {
        let writable = path_is_writable(path);
        println!("  {label:<14} {} ({})", path.display(), if writable { "ok" } else { "missing/unwritable" });
    }

    println!();
    println!("tools:");
    let toolkit = MediaToolkit::new("ffmpeg", std::time::Duration::from_secs(config.processing.timeout_sec));
    println!("  ffmpeg          {}", if toolkit.is_available() { "ok" } else { "not found on PATH" });
    let separator = Separator::new("demucs", config.processing.model.clone());
    println!("  demucs          {}", if separator.is_available().await { "ok" } else { "not found on PATH" });

    println!();
    println!("queues: {}", config.queues.len());
    for q in &config.queues {
        println!("  {:<14} {}", q.name, q.root.display());
    }
    Ok(())
}

/// Read-only check: an existing directory is writable if its permissions
/// say so; a missing one is reported as such without creating it (`doctor`
/// makes no filesystem changes).
fn path_is_writable(path: &std::path::Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_dir() && !meta.permissions().readonly(),
        Err(_) => match path.parent() {
            Some(parent) => std::fs::metadata(parent).map(|m| !m.permissions().readonly()).unwrap_or(false),
            None => false,
        },
    }
}
