use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Result, bail};
use depsea_core::{NoAuth, TokenLookup};
use tracing::{info, warn};

mod npmrc;

pub use npmrc::NpmrcTokens;

pub const AUTH_BACKEND_VAR: &str = "DEPSEA_AUTH";
pub const TOKEN_VARS: [&str; 2] = ["DEPSEA_REGISTRY_TOKEN", "NPM_TOKEN"];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthBackend {
    #[default]
    Npmrc,
    Env,
    None,
}

impl AuthBackend {
    pub fn from_env(env_value: Option<String>) -> Result<Self> {
        match env_value {
            Some(raw) => raw.parse(),
            None => Ok(AuthBackend::default()),
        }
    }

    /// Build the token lookup for this backend. `cwd` is where a project
    /// `.npmrc` is searched for.
    pub fn resolve(self, cwd: &Path) -> Result<Arc<dyn TokenLookup>> {
        match self {
            AuthBackend::Npmrc => {
                let tokens = NpmrcTokens::discover(cwd)?;
                info!(registries = tokens.len(), "auth backend=npmrc");
                Ok(Arc::new(tokens))
            }
            AuthBackend::Env => match EnvToken::from_env() {
                Some(token) => {
                    info!("auth backend=env");
                    Ok(Arc::new(token))
                }
                None => {
                    warn!(vars = ?TOKEN_VARS, "auth backend=env but no token variable is set");
                    Ok(Arc::new(NoAuth))
                }
            },
            AuthBackend::None => {
                info!("auth backend=none");
                Ok(Arc::new(NoAuth))
            }
        }
    }
}

impl FromStr for AuthBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "npmrc" | "" => Ok(AuthBackend::Npmrc),
            "env" => Ok(AuthBackend::Env),
            "none" | "off" => Ok(AuthBackend::None),
            other => bail!("unsupported auth backend `{other}`"),
        }
    }
}

impl fmt::Display for AuthBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthBackend::Npmrc => write!(f, "npmrc"),
            AuthBackend::Env => write!(f, "env"),
            AuthBackend::None => write!(f, "none"),
        }
    }
}

/// One token applied to every registry.
#[derive(Clone)]
pub struct EnvToken {
    token: String,
}

impl EnvToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// First non-empty value of `DEPSEA_REGISTRY_TOKEN` or `NPM_TOKEN`.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        TOKEN_VARS
            .iter()
            .filter_map(|key| lookup(*key))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .map(Self::new)
    }
}

impl fmt::Debug for EnvToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvToken").field("token", &"<redacted>").finish()
    }
}

impl TokenLookup for EnvToken {
    fn token_for(&self, _location: &str) -> Option<String> {
        Some(self.token.clone())
    }
}
