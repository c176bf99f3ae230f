use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

mod http;

pub use http::HttpFetcher;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("failed to fetch {location}: {status}")]
    Status { location: String, status: String },

    #[error("failed to fetch {location}: {reason}")]
    Transport { location: String, reason: String },
}

impl FetchError {
    pub fn location(&self) -> &str {
        match self {
            Self::Status { location, .. } | Self::Transport { location, .. } => location,
        }
    }
}

/// Retrieves the raw bytes behind an artifact URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `location`, sending `token` as a bearer credential when present.
    async fn fetch(&self, location: &str, token: Option<&str>) -> Result<Bytes, FetchError>;
}

/// Resolves the bearer token to use for a given artifact URL.
pub trait TokenLookup: Send + Sync {
    fn token_for(&self, location: &str) -> Option<String>;
}

/// Lookup that never returns a credential.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAuth;

impl TokenLookup for NoAuth {
    fn token_for(&self, _location: &str) -> Option<String> {
        None
    }
}

impl<F> TokenLookup for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn token_for(&self, location: &str) -> Option<String> {
        self(location)
    }
}
