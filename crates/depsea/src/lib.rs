#![forbid(unsafe_code)]

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use depsea_auth::{AUTH_BACKEND_VAR, AuthBackend};
use depsea_core::env::parse_concurrency;
use depsea_core::{Artifact, DownloadConfig, Downloader, VerificationSummary, parse_lockfile};
use tokio::task;
use tracing_subscriber::EnvFilter;

/// Folder created inside the chosen output directory.
pub const OUTPUT_FOLDER: &str = "package-lock-tgzs";

#[derive(Debug, Parser)]
#[command(
    name = "depsea",
    version,
    about = "Download npm lockfile dependencies for air-gapped environments"
)]
pub struct Cli {
    /// Log at debug level regardless of RUST_LOG
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Download dependencies from package-lock.json into a local directory
    Download(DownloadArgs),
    /// Check previously downloaded tarballs against package-lock.json
    Verify(VerifyArgs),
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Path to package-lock.json
    pub lockfile: PathBuf,

    /// Parent directory for the package-lock-tgzs folder (defaults to the current directory)
    pub output_dir: Option<PathBuf>,

    /// Maximum concurrent downloads (default 10, or DEPSEA_CONCURRENCY)
    #[arg(short, long, value_parser = parse_concurrency_arg)]
    pub concurrency: Option<usize>,

    /// Per-request timeout such as `30s` (or DEPSEA_HTTP_TIMEOUT)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Where registry tokens come from: npmrc, env or none (or DEPSEA_AUTH)
    #[arg(long, value_name = "BACKEND")]
    pub auth: Option<AuthBackend>,

    /// Skip the integrity pass after downloading
    #[arg(long)]
    pub no_verify: bool,
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Path to package-lock.json
    pub lockfile: PathBuf,

    /// Directory holding the tarballs (defaults to ./package-lock-tgzs)
    pub dir: Option<PathBuf>,
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Clean,
    IntegrityFailures(usize),
}

impl RunStatus {
    fn from_summary(summary: &VerificationSummary) -> Self {
        if summary.is_clean() {
            Self::Clean
        } else {
            Self::IntegrityFailures(summary.failed.len())
        }
    }
}

pub fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub async fn run(cli: Cli) -> Result<RunStatus> {
    match cli.command {
        Command::Download(args) => download(args).await,
        Command::Verify(args) => verify(args).await,
    }
}

async fn download(args: DownloadArgs) -> Result<RunStatus> {
    let mut config = DownloadConfig::from_env()?;
    if let Some(concurrency) = args.concurrency {
        config = config.with_concurrency(concurrency);
    }
    if args.timeout.is_some() {
        config = config.with_timeout(args.timeout);
    }

    let cwd = env::current_dir().context("failed to resolve working directory")?;
    let backend = match args.auth {
        Some(backend) => backend,
        None => AuthBackend::from_env(env::var(AUTH_BACKEND_VAR).ok())?,
    };
    let tokens = backend.resolve(&cwd)?;

    let artifacts = load_artifacts(&args.lockfile)?;
    let output_dir = args.output_dir.unwrap_or(cwd).join(OUTPUT_FOLDER);

    tracing::info!(
        output_dir = %output_dir.display(),
        concurrency = config.concurrency,
        timeout = ?config.timeout,
        "downloading artifacts"
    );
    let downloader = Downloader::new(&config)
        .context("failed to build HTTP client")?
        .with_tokens(tokens);
    let report = downloader
        .download_all_with_progress(&artifacts, &output_dir, |completed, total| {
            tracing::debug!(completed, total, "download progress");
        })
        .await
        .context("download failed")?;
    tracing::info!(
        written = report.written,
        skipped = report.skipped,
        collisions = report.collisions,
        "download complete"
    );
    if report.collisions > 0 {
        tracing::warn!(
            collisions = report.collisions,
            "some artifacts share a filename with another artifact and were not downloaded"
        );
    }

    if args.no_verify {
        return Ok(RunStatus::Clean);
    }
    verify_dir(artifacts, output_dir).await
}

async fn verify(args: VerifyArgs) -> Result<RunStatus> {
    let dir = match args.dir {
        Some(dir) => dir,
        None => env::current_dir()
            .context("failed to resolve working directory")?
            .join(OUTPUT_FOLDER),
    };
    let artifacts = load_artifacts(&args.lockfile)?;
    verify_dir(artifacts, dir).await
}

fn load_artifacts(lockfile: &Path) -> Result<Vec<Artifact>> {
    let artifacts = parse_lockfile(lockfile)
        .with_context(|| format!("failed to parse {}", lockfile.display()))?;
    tracing::info!(
        lockfile = %lockfile.display(),
        artifacts = artifacts.len(),
        "found unique artifacts"
    );
    Ok(artifacts)
}

async fn verify_dir(artifacts: Vec<Artifact>, dir: PathBuf) -> Result<RunStatus> {
    let summary = task::spawn_blocking(move || depsea_core::verify_all(&artifacts, &dir))
        .await
        .context("verification task failed")?;

    let status = RunStatus::from_summary(&summary);
    match status {
        RunStatus::Clean => {
            tracing::info!(passed = summary.passed, failed = 0, "verification complete");
        }
        RunStatus::IntegrityFailures(failed) => {
            for artifact in &summary.failed {
                tracing::error!(filename = %artifact.filename, "integrity check failed");
            }
            tracing::error!(passed = summary.passed, failed, "verification complete");
        }
    }
    Ok(status)
}

fn parse_concurrency_arg(raw: &str) -> Result<usize, String> {
    parse_concurrency(raw).map_err(|_| format!("`{raw}` is not a positive integer"))
}
