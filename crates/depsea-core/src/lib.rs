//! Offline mirroring core for depsea.
//!
//! This crate turns a `package-lock.json` into a deduplicated list of package
//! archives, downloads the missing ones under a concurrency bound, and checks
//! each file against the integrity string the lockfile declared.

pub mod artifact;
pub mod download;
pub mod env;
pub mod fetch;
pub mod integrity;
pub mod lockfile;
pub mod verify;

pub use artifact::{Artifact, ArtifactSet, archive_filename};
pub use download::{DEFAULT_CONCURRENCY, DownloadError, DownloadReport, Downloader};
pub use env::{ConfigError, DownloadConfig};
pub use fetch::{FetchError, Fetcher, HttpFetcher, NoAuth, TokenLookup};
pub use integrity::{HashAlgorithm, Integrity, IntegrityError};
pub use lockfile::{Lockfile, LockfileError, parse_lockfile};
pub use verify::{VerificationSummary, Verifier, verify_all};
