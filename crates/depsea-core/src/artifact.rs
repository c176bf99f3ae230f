use std::collections::BTreeMap;

use indexmap::IndexMap;
use indexmap::map::Entry;

/// Extension used by npm's packed tarball format.
pub const ARCHIVE_EXTENSION: &str = "tgz";

/// A single downloadable package archive declared by a lockfile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Artifact {
    pub name: String,
    pub version: String,
    pub resolved: String,
    pub integrity: String,
    pub filename: String,
}

impl Artifact {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        resolved: impl Into<String>,
        integrity: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let version = version.into();
        let filename = archive_filename(&name, &version);
        Self {
            name,
            version,
            resolved: resolved.into(),
            integrity: integrity.into(),
            filename,
        }
    }
}

/// Derive the on-disk name for a package archive.
///
/// `lodash` at `4.17.21` becomes `lodash-4.17.21.tgz` and `@types/node` at
/// `1.0.0` becomes `types-node-1.0.0.tgz`.
pub fn archive_filename(name: &str, version: &str) -> String {
    let safe: String = name
        .chars()
        .filter(|ch| *ch != '@')
        .map(|ch| if ch == '/' { '-' } else { ch })
        .collect();
    format!("{safe}-{version}.{ARCHIVE_EXTENSION}")
}

/// Insertion-ordered artifacts keyed by their integrity string.
///
/// The first artifact registered for an integrity value is kept; later
/// entries with the same value are dropped even if name or version differ.
#[derive(Debug, Default, Clone)]
pub struct ArtifactSet {
    by_integrity: IndexMap<String, Artifact>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the artifact was added, `false` if its integrity
    /// was already present.
    pub fn insert(&mut self, artifact: Artifact) -> bool {
        match self.by_integrity.entry(artifact.integrity.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(artifact);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_integrity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_integrity.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.by_integrity.values()
    }

    /// Filenames derived by more than one artifact, with the artifacts that
    /// share them in registration order.
    pub fn filename_collisions(&self) -> BTreeMap<&str, Vec<&Artifact>> {
        let mut by_name: BTreeMap<&str, Vec<&Artifact>> = BTreeMap::new();
        for artifact in self.by_integrity.values() {
            by_name
                .entry(artifact.filename.as_str())
                .or_default()
                .push(artifact);
        }
        by_name.retain(|_, artifacts| artifacts.len() > 1);
        by_name
    }

    pub fn into_vec(self) -> Vec<Artifact> {
        self.by_integrity.into_values().collect()
    }
}
