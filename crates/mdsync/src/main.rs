//! `mdsync` — follower/leader metadata reconciliation.
//!
//! # Usage
//!
//! ```text
//! mdsync diff --database /data/0/storeDb --output diff.json --bucketd 10.0.0.1:9000
//! DATABASES="/data/0/storeDb /data/1/storeDb" mdsync diff -o diff.json
//! mdsync repair --input diff.json --bucketd 10.0.0.1:9000 --sproxyd 10.0.0.2:81
//! mdsync -c mdsync.toml repair < diff.json
//! ```

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use mdsync_db::{FollowerDb, is_system_database};
use mdsync_diff::{DiffConfig, DiffEngine, DiffProgress, spawn_db_reader};
use mdsync_net::{BucketdClient, MetadataService, SproxydClient};
use mdsync_repair::{RepairConfig, RepairCounters, RepairError, RepairRunner};
use mdsync_types::DiffEntry;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use config::CliConfig;

/// Difference records buffered between the scans and the file writer.
const DIFF_CHANNEL_CAPACITY: usize = 1024;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "mdsync",
    version,
    about = "Compare follower metadata databases against the leader and repair divergence"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan follower databases and write the differences with the leader.
    Diff {
        /// Follower database directory to scan; can be repeated.
        #[arg(short, long = "database", env = "DATABASES", value_delimiter = ' ')]
        databases: Vec<PathBuf>,

        /// Difference file to create (must not exist).
        #[arg(short, long, env = "DIFF_OUTPUT_FILE")]
        output: Option<PathBuf>,

        /// `host:port` of the leader metadata service.
        #[arg(long, env = "BUCKETD_HOSTPORT")]
        bucketd: Option<String>,

        /// Number of databases scanned concurrently.
        #[arg(long, env = "PARALLEL_SCANS")]
        parallel_scans: Option<usize>,

        /// Seconds between progress log lines.
        #[arg(long, env = "LOG_PROGRESS_INTERVAL")]
        progress_interval: Option<u64>,
    },

    /// Repair the differences listed in a difference file.
    Repair {
        /// Difference file to read; standard input when omitted.
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// `host:port` of the leader metadata service.
        #[arg(long, env = "BUCKETD_HOSTPORT")]
        bucketd: Option<String>,

        /// `host:port` of the blob store.
        #[arg(long, env = "SPROXYD_HOSTPORT")]
        sproxyd: Option<String>,

        /// Only repair objects last modified before this RFC 3339 date.
        ///
        /// Defaults to one week ago.
        #[arg(long, env = "OLDER_THAN")]
        older_than: Option<String>,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Diff {
            databases,
            output,
            bucketd,
            parallel_scans,
            progress_interval,
        } => {
            // CLI args override config file values.
            if !databases.is_empty() {
                config.diff.databases = databases;
            }
            if output.is_some() {
                config.diff.output = output;
            }
            if bucketd.is_some() {
                config.bucketd.endpoint = bucketd;
            }
            if parallel_scans.is_some() {
                config.diff.parallel_scans = parallel_scans;
            }
            if progress_interval.is_some() {
                config.diff.progress_interval_secs = progress_interval;
            }
            cmd_diff(config).await
        }
        Commands::Repair {
            input,
            bucketd,
            sproxyd,
            older_than,
        } => {
            if bucketd.is_some() {
                config.bucketd.endpoint = bucketd;
            }
            if sproxyd.is_some() {
                config.sproxyd.endpoint = sproxyd;
            }
            if older_than.is_some() {
                config.repair.older_than = older_than;
            }
            cmd_repair(config, input).await
        }
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// -----------------------------------------------------------------------
// mdsync diff
// -----------------------------------------------------------------------

async fn cmd_diff(config: CliConfig) -> Result<()> {
    let bucketd = config
        .bucketd
        .endpoint
        .clone()
        .context("no bucketd endpoint (--bucketd or BUCKETD_HOSTPORT)")?;
    let output = config
        .diff
        .output
        .clone()
        .context("no output file (--output or DIFF_OUTPUT_FILE)")?;
    let databases = scanned_databases(&config.diff.databases);
    if databases.is_empty() {
        bail!("no database to scan (--database or DATABASES)");
    }

    let file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&output)
        .with_context(|| format!("failed to create {}", output.display()))?;

    let diff_config = config.diff_config();
    info!(
        databases = databases.len(),
        output = %output.display(),
        bucketd = %bucketd,
        max_buffer_size = diff_config.max_buffer_size,
        parallel_scans = config.parallel_scans(),
        "starting scan"
    );

    let leader: Arc<dyn MetadataService> = Arc::new(
        BucketdClient::with_http_config(&bucketd, config.retry_policy(), &config.http_config())
            .context("invalid bucketd endpoint")?,
    );
    let progress = Arc::new(DiffProgress::default());
    let (tx, rx) = mpsc::channel(DIFF_CHANNEL_CAPACITY);
    let writer = tokio::spawn(write_diffs(file, rx));
    let reporter = spawn_progress_reporter(Arc::clone(&progress), config.progress_interval());

    let mut signals = ShutdownSignals::install()?;
    let outcome = tokio::select! {
        result = run_scans(
            databases,
            leader,
            diff_config,
            Arc::clone(&progress),
            config.parallel_scans(),
            tx,
        ) => Some(result),
        signal = signals.recv() => {
            info!(signal, "stopping execution");
            None
        }
    };
    reporter.abort();

    match outcome {
        None => {
            progress.log("scan interrupted");
            std::process::exit(0);
        }
        Some(Err(e)) => {
            error!(error = %format!("{e:#}"), "an error occurred during scan");
            progress.log("scan failed");
            return Err(e);
        }
        Some(Ok(())) => {}
    }

    let written = writer.await.context("diff writer panicked")??;
    info!(written, output = %output.display(), "difference file complete");
    progress.log("completed scan");
    Ok(())
}

/// Drop system databases from the scan list.
fn scanned_databases(databases: &[PathBuf]) -> Vec<PathBuf> {
    databases
        .iter()
        .filter(|path| {
            let system = is_system_database(path);
            if system {
                info!(db = %path.display(), "skipping system database");
            }
            !system
        })
        .cloned()
        .collect()
}

/// Scan every database, at most `parallel` at a time, all feeding `tx`.
///
/// The first failing scan aborts the others.
async fn run_scans(
    databases: Vec<PathBuf>,
    leader: Arc<dyn MetadataService>,
    config: DiffConfig,
    progress: Arc<DiffProgress>,
    parallel: usize,
    tx: mpsc::Sender<DiffEntry>,
) -> Result<()> {
    let semaphore = Arc::new(Semaphore::new(parallel.max(1)));
    let mut scans = JoinSet::new();
    for path in databases {
        let semaphore = Arc::clone(&semaphore);
        let leader = Arc::clone(&leader);
        let progress = Arc::clone(&progress);
        let config = config.clone();
        let tx = tx.clone();
        scans.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .context("scan semaphore closed")?;
            scan_database(&path, leader, config, progress, &tx)
                .await
                .with_context(|| format!("scan of {} failed", path.display()))
        });
    }
    drop(tx);

    while let Some(joined) = scans.join_next().await {
        joined.context("scan task panicked")??;
    }
    Ok(())
}

async fn scan_database(
    path: &Path,
    leader: Arc<dyn MetadataService>,
    config: DiffConfig,
    progress: Arc<DiffProgress>,
    tx: &mpsc::Sender<DiffEntry>,
) -> Result<()> {
    info!(db = %path.display(), "scanning follower database");
    let db_path = path.to_path_buf();
    let db = tokio::task::spawn_blocking(move || FollowerDb::open(db_path))
        .await
        .context("database open task panicked")?
        .context("failed to open follower database")?;

    let source = spawn_db_reader(db, config.max_buffer_size);
    DiffEngine::new(leader, config)
        .with_progress(progress)
        .run(source, tx)
        .await?;
    info!(db = %path.display(), "completed database scan");
    Ok(())
}

/// Append every received record to `file` as one JSON line.
async fn write_diffs(file: std::fs::File, mut rx: mpsc::Receiver<DiffEntry>) -> Result<u64> {
    let mut out = BufWriter::new(tokio::fs::File::from_std(file));
    let mut written = 0_u64;
    while let Some(entry) = rx.recv().await {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        out.write_all(&line).await.context("failed to write difference")?;
        written += 1;
    }
    out.flush().await.context("failed to flush difference file")?;
    Ok(written)
}

fn spawn_progress_reporter(
    progress: Arc<DiffProgress>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            progress.log("progress update");
        }
    })
}

// -----------------------------------------------------------------------
// mdsync repair
// -----------------------------------------------------------------------

async fn cmd_repair(config: CliConfig, input: Option<PathBuf>) -> Result<()> {
    let bucketd = config
        .bucketd
        .endpoint
        .clone()
        .context("no bucketd endpoint (--bucketd or BUCKETD_HOSTPORT)")?;
    let sproxyd = config
        .sproxyd
        .endpoint
        .clone()
        .context("no sproxyd endpoint (--sproxyd or SPROXYD_HOSTPORT)")?;
    let older_than = config.older_than(Utc::now())?;
    let retry = config.retry_policy();
    let http = config.http_config();

    let leader = BucketdClient::with_http_config(&bucketd, retry.clone(), &http)
        .context("invalid bucketd endpoint")?;
    let blobs = SproxydClient::connect_with(&sproxyd, retry, &http)
        .await
        .context("failed to get sproxyd alias")?;
    info!(
        bucketd = %bucketd,
        sproxyd = %sproxyd,
        alias = blobs.alias(),
        older_than = %older_than.to_rfc3339(),
        "starting repair"
    );

    let runner = RepairRunner::new(
        Arc::new(leader),
        Arc::new(blobs),
        RepairConfig {
            older_than: Some(older_than),
        },
    );

    let mut signals = ShutdownSignals::install()?;
    let outcome = tokio::select! {
        result = repair_input(&runner, input.as_deref()) => Some(result),
        signal = signals.recv() => {
            info!(signal, "stopping execution");
            None
        }
    };

    match outcome {
        None => {
            runner.log_counters("repair interrupted");
            std::process::exit(0);
        }
        Some(Err(e)) => {
            error!(error = %e, "an error occurred during repair");
            runner.log_counters("repair aborted");
            Err(e).context("repair failed")
        }
        Some(Ok(counters)) => {
            if counters.auto_repair_error > 0 || counters.lookup_error > 0 {
                warn!(
                    auto_repair_error = counters.auto_repair_error,
                    lookup_error = counters.lookup_error,
                    "some entries could not be processed"
                );
            }
            runner.log_counters("completed repair");
            Ok(())
        }
    }
}

async fn repair_input(
    runner: &RepairRunner,
    input: Option<&Path>,
) -> Result<RepairCounters, RepairError> {
    match input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            runner.run(BufReader::new(file)).await
        }
        None => runner.run(BufReader::new(tokio::io::stdin())).await,
    }
}

// -----------------------------------------------------------------------
// Signals
// -----------------------------------------------------------------------

/// Termination signals that stop a run after logging its counters.
#[cfg(unix)]
struct ShutdownSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?,
            terminate: signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?,
            hangup: signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?,
            quit: signal(SignalKind::quit()).context("failed to install SIGQUIT handler")?,
        })
    }

    /// Wait for the next signal and return its name.
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.hangup.recv() => "SIGHUP",
            _ = self.quit.recv() => "SIGQUIT",
        }
    }
}

#[cfg(not(unix))]
struct ShutdownSignals;

#[cfg(not(unix))]
impl ShutdownSignals {
    fn install() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> &'static str {
        let _ = tokio::signal::ctrl_c().await;
        "ctrl-c"
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
