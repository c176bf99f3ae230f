//! `package-lock.json` parsing.
//!
//! Two document shapes are understood: the flat `packages` map written by
//! lockfile v2/v3 and the nested `dependencies` tree written by lockfile v1.
//! When both are present `packages` wins.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

use crate::artifact::{Artifact, ArtifactSet};

const NODE_MODULES_MARKER: &str = "node_modules/";

#[derive(Debug, Error)]
pub enum LockfileError {
    #[error("invalid package-lock.json: no packages or dependencies found")]
    Format,

    #[error("failed to read lockfile {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lockfile JSON is not valid")]
    Json(#[from] serde_json::Error),
}

/// A lock document in one of the two recognised shapes.
#[derive(Debug, Clone)]
pub struct Lockfile {
    shape: LockShape,
}

#[derive(Debug, Clone)]
enum LockShape {
    Packages(IndexMap<String, RawPackageEntry>),
    Dependencies(IndexMap<String, RawDependencyEntry>),
}

impl Lockfile {
    pub fn load(path: &Path) -> Result<Self, LockfileError> {
        let file = File::open(path).map_err(|source| LockfileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, LockfileError> {
        let raw: RawLockfile = serde_json::from_reader(reader)?;
        raw.try_into()
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, LockfileError> {
        let raw: RawLockfile = serde_json::from_slice(bytes)?;
        raw.try_into()
    }

    /// `true` for the flat `packages` shape.
    pub fn is_flat(&self) -> bool {
        matches!(self.shape, LockShape::Packages(_))
    }

    /// Extract the downloadable artifacts, deduplicated by integrity.
    ///
    /// Order follows the document; for duplicated integrity values the first
    /// entry encountered supplies the name and version.
    pub fn artifacts(&self) -> Vec<Artifact> {
        let mut set = ArtifactSet::new();
        match &self.shape {
            LockShape::Packages(packages) => collect_packages(packages, &mut set),
            LockShape::Dependencies(dependencies) => collect_dependencies(dependencies, &mut set),
        }

        for (filename, shared) in set.filename_collisions() {
            tracing::warn!(
                filename,
                count = shared.len(),
                "artifacts with different integrity share a filename"
            );
        }

        set.into_vec()
    }
}

impl TryFrom<RawLockfile> for Lockfile {
    type Error = LockfileError;

    fn try_from(raw: RawLockfile) -> Result<Self, LockfileError> {
        let shape = match (raw.packages, raw.dependencies) {
            (Some(packages), _) => LockShape::Packages(packages),
            (None, Some(dependencies)) => LockShape::Dependencies(dependencies),
            (None, None) => return Err(LockfileError::Format),
        };
        Ok(Self { shape })
    }
}

/// Load `path` and return its artifacts.
pub fn parse_lockfile(path: &Path) -> Result<Vec<Artifact>, LockfileError> {
    let lockfile = Lockfile::load(path)?;
    let artifacts = lockfile.artifacts();
    tracing::debug!(
        path = %path.display(),
        flat = lockfile.is_flat(),
        artifacts = artifacts.len(),
        "parsed lockfile"
    );
    Ok(artifacts)
}

fn collect_packages(packages: &IndexMap<String, RawPackageEntry>, set: &mut ArtifactSet) {
    for (path, entry) in packages {
        if path.is_empty() {
            continue;
        }
        let (Some(resolved), Some(integrity)) =
            (non_empty(&entry.resolved), non_empty(&entry.integrity))
        else {
            tracing::trace!(path = %path, "skipping entry without resolved/integrity");
            continue;
        };
        let name = package_name_from_path(path);
        let version = entry.version.as_deref().unwrap_or_default();
        set.insert(Artifact::new(name, version, resolved, integrity));
    }
}

fn collect_dependencies(dependencies: &IndexMap<String, RawDependencyEntry>, set: &mut ArtifactSet) {
    for (name, entry) in dependencies {
        if let (Some(resolved), Some(integrity)) =
            (non_empty(&entry.resolved), non_empty(&entry.integrity))
        {
            let version = entry.version.as_deref().unwrap_or_default();
            set.insert(Artifact::new(name, version, resolved, integrity));
        }
        if let Some(nested) = &entry.dependencies {
            collect_dependencies(nested, set);
        }
    }
}

/// Empty strings count as absent.
fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|value| !value.is_empty())
}

/// `node_modules/a/node_modules/@types/node` -> `@types/node`.
fn package_name_from_path(path: &str) -> &str {
    match path.rfind(NODE_MODULES_MARKER) {
        Some(idx) => &path[idx + NODE_MODULES_MARKER.len()..],
        None => path,
    }
}

#[derive(Deserialize)]
struct RawLockfile {
    #[serde(default)]
    packages: Option<IndexMap<String, RawPackageEntry>>,
    #[serde(default)]
    dependencies: Option<IndexMap<String, RawDependencyEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPackageEntry {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    resolved: Option<String>,
    #[serde(default)]
    integrity: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDependencyEntry {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    resolved: Option<String>,
    #[serde(default)]
    integrity: Option<String>,
    #[serde(default)]
    dependencies: Option<IndexMap<String, RawDependencyEntry>>,
}
