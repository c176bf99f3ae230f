//! Bounded-concurrency artifact downloads.
//!
//! Every artifact becomes one task: `Pending -> Skipped` when its file is
//! already present, otherwise `Pending -> Fetching -> Written | Failed`.
//! At most `concurrency` tasks run at once and artifacts start in list order.
//! A failed task never cancels its siblings; the first failure (in completion
//! order) is returned once every task has settled, so files written by the
//! other tasks stay on disk and a rerun picks up where this one stopped.

use std::collections::HashSet;
use std::error::Error as _;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::fs;
use tokio::task::{JoinError, JoinSet};

use crate::artifact::Artifact;
use crate::env::DownloadConfig;
use crate::fetch::{FetchError, Fetcher, HttpFetcher, NoAuth, TokenLookup};

pub const DEFAULT_CONCURRENCY: usize = 10;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to create output directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to download {filename}")]
    Fetch {
        filename: String,
        #[source]
        source: FetchError,
    },

    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("download task aborted")]
    Task(#[from] JoinError),
}

/// Counts for a download run that finished without failures.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadReport {
    pub written: usize,
    /// Already present on disk.
    pub skipped: usize,
    /// Not scheduled because an earlier artifact targets the same file.
    pub collisions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Skipped,
    Written,
    Collision,
}

#[derive(Clone)]
pub struct Downloader {
    fetcher: Arc<dyn Fetcher>,
    tokens: Arc<dyn TokenLookup>,
    concurrency: usize,
}

impl Downloader {
    /// HTTP downloader without credentials.
    pub fn new(config: &DownloadConfig) -> Result<Self, reqwest::Error> {
        let fetcher = HttpFetcher::new(config.timeout)?;
        Ok(Self::with_fetcher(Arc::new(fetcher), config.concurrency))
    }

    /// `concurrency` below 1 is treated as 1.
    pub fn with_fetcher(fetcher: Arc<dyn Fetcher>, concurrency: usize) -> Self {
        Self {
            fetcher,
            tokens: Arc::new(NoAuth),
            concurrency: concurrency.max(1),
        }
    }

    pub fn with_tokens(mut self, tokens: Arc<dyn TokenLookup>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn download_all(
        &self,
        artifacts: &[Artifact],
        output_dir: &Path,
    ) -> Result<DownloadReport, DownloadError> {
        self.download_all_with_progress(artifacts, output_dir, |_, _| {})
            .await
    }

    /// Download every artifact missing from `output_dir`.
    ///
    /// `on_progress` receives `(completed, total)` once per settled task,
    /// successful or not. It is only ever called from this future.
    pub async fn download_all_with_progress<P>(
        &self,
        artifacts: &[Artifact],
        output_dir: &Path,
        mut on_progress: P,
    ) -> Result<DownloadReport, DownloadError>
    where
        P: FnMut(usize, usize),
    {
        fs::create_dir_all(output_dir)
            .await
            .map_err(|source| DownloadError::CreateDir {
                path: output_dir.to_path_buf(),
                source,
            })?;

        let mut tally = Tally::new(artifacts.len());
        let mut claimed = HashSet::new();
        let mut tasks = JoinSet::new();

        for artifact in artifacts {
            let dest = output_dir.join(&artifact.filename);
            if !claimed.insert(dest.clone()) {
                tracing::warn!(
                    filename = %artifact.filename,
                    integrity = %artifact.integrity,
                    "another artifact already targets this file; not scheduling"
                );
                tally.settle(Ok(TaskOutcome::Collision), &mut on_progress);
                continue;
            }

            while tasks.len() >= self.concurrency {
                if let Some(joined) = tasks.join_next().await {
                    tally.settle(flatten(joined), &mut on_progress);
                }
            }

            let fetcher = Arc::clone(&self.fetcher);
            let tokens = Arc::clone(&self.tokens);
            let artifact = artifact.clone();
            tasks.spawn(async move {
                download_one(fetcher.as_ref(), tokens.as_ref(), &artifact, dest).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            tally.settle(flatten(joined), &mut on_progress);
        }

        tally.finish()
    }
}

struct Tally {
    total: usize,
    completed: usize,
    report: DownloadReport,
    first_error: Option<DownloadError>,
}

impl Tally {
    fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            report: DownloadReport::default(),
            first_error: None,
        }
    }

    fn settle<P: FnMut(usize, usize)>(
        &mut self,
        outcome: Result<TaskOutcome, DownloadError>,
        on_progress: &mut P,
    ) {
        self.completed += 1;
        match outcome {
            Ok(TaskOutcome::Written) => self.report.written += 1,
            Ok(TaskOutcome::Skipped) => self.report.skipped += 1,
            Ok(TaskOutcome::Collision) => self.report.collisions += 1,
            Err(err) => {
                let cause = err.source().map(ToString::to_string).unwrap_or_default();
                tracing::error!(error = %err, cause = %cause, "artifact download failed");
                self.first_error.get_or_insert(err);
            }
        }
        on_progress(self.completed, self.total);
    }

    fn finish(self) -> Result<DownloadReport, DownloadError> {
        match self.first_error {
            Some(err) => Err(err),
            None => Ok(self.report),
        }
    }
}

fn flatten(
    joined: Result<Result<TaskOutcome, DownloadError>, JoinError>,
) -> Result<TaskOutcome, DownloadError> {
    joined.unwrap_or_else(|err| Err(DownloadError::Task(err)))
}

async fn download_one(
    fetcher: &dyn Fetcher,
    tokens: &dyn TokenLookup,
    artifact: &Artifact,
    dest: PathBuf,
) -> Result<TaskOutcome, DownloadError> {
    if fs::try_exists(&dest).await.unwrap_or(false) {
        tracing::debug!(filename = %artifact.filename, "already present, skipping");
        return Ok(TaskOutcome::Skipped);
    }

    let token = tokens.token_for(&artifact.resolved);
    tracing::debug!(
        name = %artifact.name,
        version = %artifact.version,
        authenticated = token.is_some(),
        "fetching artifact"
    );
    let bytes = fetcher
        .fetch(&artifact.resolved, token.as_deref())
        .await
        .map_err(|source| DownloadError::Fetch {
            filename: artifact.filename.clone(),
            source,
        })?;

    write_atomic(&dest, &bytes).await?;
    tracing::debug!(filename = %artifact.filename, bytes = bytes.len(), "wrote artifact");
    Ok(TaskOutcome::Written)
}

/// Write to a hidden sibling first so `dest` only ever holds a full body.
async fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), DownloadError> {
    let write_err = |source| DownloadError::Write {
        path: dest.to_path_buf(),
        source,
    };
    let tmp = temp_sibling(dest);

    if let Err(err) = fs::write(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(write_err(err));
    }
    if let Err(err) = fs::rename(&tmp, dest).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(write_err(err));
    }
    Ok(())
}

fn temp_sibling(dest: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_nanos())
        .unwrap_or(0);
    let name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.part-{nanos}"))
}
