//! Subresource Integrity strings (`sha512-<base64>`), as written into
//! `package-lock.json`.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use thiserror::Error;

const BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("integrity string is empty")]
    Empty,

    #[error("integrity `{raw}` names no supported algorithm")]
    Unsupported { raw: String },

    #[error("integrity entry `{entry}` is not valid base64")]
    Encoding { entry: String },
}

/// Hash algorithms accepted in integrity strings, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    fn hasher(self) -> Hasher {
        match self {
            Self::Sha1 => Hasher::Sha1(Sha1::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
            Self::Sha384 => Hasher::Sha384(Sha384::new()),
            Self::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = IntegrityError;

    fn from_str(value: &str) -> Result<Self, IntegrityError> {
        match value.to_ascii_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            other => Err(IntegrityError::Unsupported {
                raw: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(bytes),
            Self::Sha256(h) => h.update(bytes),
            Self::Sha384(h) => h.update(bytes),
            Self::Sha512(h) => h.update(bytes),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha384(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// One `algo-base64` entry of an integrity string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntegrityHash {
    algorithm: HashAlgorithm,
    digest: Vec<u8>,
}

impl IntegrityHash {
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }
}

impl fmt::Display for IntegrityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.algorithm, STANDARD.encode(&self.digest))
    }
}

/// A parsed integrity string.
///
/// Entries naming algorithms outside [`HashAlgorithm`] are ignored, and
/// `?option` suffixes are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Integrity {
    raw: String,
    hashes: Vec<IntegrityHash>,
}

impl Integrity {
    pub fn parse(raw: impl Into<String>) -> Result<Self, IntegrityError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(IntegrityError::Empty);
        }

        let mut hashes = Vec::new();
        let mut undecodable = None;
        for entry in raw.split_whitespace() {
            let Some((algorithm, rest)) = entry.split_once('-') else {
                continue;
            };
            let Ok(algorithm) = algorithm.parse::<HashAlgorithm>() else {
                continue;
            };
            let encoded = rest.split_once('?').map_or(rest, |(digest, _)| digest);
            match STANDARD.decode(encoded) {
                Ok(digest) => hashes.push(IntegrityHash { algorithm, digest }),
                Err(_) => {
                    tracing::debug!(entry, "ignoring integrity entry with invalid base64");
                    undecodable.get_or_insert_with(|| entry.to_string());
                }
            }
        }

        if hashes.is_empty() {
            return Err(match undecodable {
                Some(entry) => IntegrityError::Encoding { entry },
                None => IntegrityError::Unsupported { raw },
            });
        }
        Ok(Self { raw, hashes })
    }

    /// Build a single-entry integrity over `bytes`.
    pub fn from_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(bytes);
        let hash = IntegrityHash {
            algorithm,
            digest: hasher.finalize(),
        };
        Self {
            raw: hash.to_string(),
            hashes: vec![hash],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn hashes(&self) -> &[IntegrityHash] {
        &self.hashes
    }

    /// The strongest algorithm present; verification only uses this one.
    pub fn strongest_algorithm(&self) -> HashAlgorithm {
        self.hashes
            .iter()
            .map(IntegrityHash::algorithm)
            .max()
            .unwrap_or(HashAlgorithm::Sha512)
    }

    /// Hash `reader` to the end and compare with the entries of the
    /// strongest algorithm.
    pub fn matches_reader<R: Read>(&self, mut reader: R) -> std::io::Result<bool> {
        let algorithm = self.strongest_algorithm();
        let mut hasher = algorithm.hasher();
        let mut buf = vec![0u8; BUF_SIZE];
        loop {
            let read = reader.read(&mut buf)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        let computed = hasher.finalize();
        Ok(self
            .hashes
            .iter()
            .filter(|hash| hash.algorithm == algorithm)
            .any(|hash| hash.digest == computed))
    }

    pub fn matches_file(&self, path: &Path) -> std::io::Result<bool> {
        let file = File::open(path)?;
        self.matches_reader(BufReader::new(file))
    }
}

impl FromStr for Integrity {
    type Err = IntegrityError;

    fn from_str(value: &str) -> Result<Self, IntegrityError> {
        Self::parse(value)
    }
}

impl fmt::Display for Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
