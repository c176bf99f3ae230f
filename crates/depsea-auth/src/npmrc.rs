use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use depsea_core::TokenLookup;
use url::Url;

const AUTH_TOKEN_SUFFIX: &str = ":_authToken";

/// Bearer tokens declared in `.npmrc` files, keyed by registry prefix
/// (`//registry.example.com/path/`).
#[derive(Debug, Default, Clone)]
pub struct NpmrcTokens {
    tokens: HashMap<String, String>,
}

impl NpmrcTokens {
    /// Parse `.npmrc` text. `${VAR}` references are resolved through `env`.
    pub fn parse<F>(contents: &str, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut tokens = HashMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let Some(prefix) = key.trim().strip_suffix(AUTH_TOKEN_SUFFIX) else {
                continue;
            };
            if !prefix.starts_with("//") {
                continue;
            }
            let token = expand_env(unquote(value.trim()), &env);
            if token.is_empty() {
                tracing::debug!(registry = prefix, "ignoring empty auth token");
                continue;
            }
            tokens.insert(normalize_prefix(prefix), token);
        }
        Self { tokens }
    }

    /// Read the given files in order. Missing files are skipped and the first
    /// file to declare a registry wins.
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        let mut merged = Self::default();
        for path in paths {
            let contents = match fs::read_to_string(path) {
                Ok(contents) => contents,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to read npmrc {}", path.display()));
                }
            };
            let parsed = Self::parse(&contents, |key| env::var(key).ok());
            tracing::debug!(path = %path.display(), tokens = parsed.len(), "loaded npmrc");
            merged.merge(parsed);
        }
        Ok(merged)
    }

    /// Project `.npmrc` in `cwd`, then the user file.
    pub fn discover(cwd: &Path) -> Result<Self> {
        let mut paths = vec![cwd.join(".npmrc")];
        if let Some(user) = user_npmrc() {
            paths.push(user);
        }
        Self::load(&paths)
    }

    /// Add entries from `other` that are not already present.
    pub fn merge(&mut self, other: Self) {
        for (prefix, token) in other.tokens {
            self.tokens.entry(prefix).or_insert(token);
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl TokenLookup for NpmrcTokens {
    fn token_for(&self, location: &str) -> Option<String> {
        let url = Url::parse(location).ok()?;
        let host = url.host_str()?;
        let authority = match url.port() {
            Some(port) => format!("//{host}:{port}"),
            None => format!("//{host}"),
        };

        let path = url.path();
        let mut end = path.len();
        while let Some(idx) = path[..end].rfind('/') {
            let candidate = format!("{authority}{}", &path[..=idx]);
            if let Some(token) = self.tokens.get(&candidate) {
                return Some(token.clone());
            }
            end = idx;
        }
        None
    }
}

fn user_npmrc() -> Option<PathBuf> {
    env::var_os("NPM_CONFIG_USERCONFIG")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".npmrc")))
}

fn normalize_prefix(prefix: &str) -> String {
    if prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value)
}

/// Replace `${NAME}` with its value; unset variables expand to nothing.
fn expand_env<F>(value: &str, env: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&env(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
