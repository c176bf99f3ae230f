use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::AUTHORIZATION;

use super::{FetchError, Fetcher};

const USER_AGENT: &str = concat!("depsea/", env!("CARGO_PKG_VERSION"));

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, location: &str, token: Option<&str>) -> Result<Bytes, FetchError> {
        let transport = |err: reqwest::Error| FetchError::Transport {
            location: location.to_string(),
            reason: err.to_string(),
        };

        let mut request = self.client.get(location);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = request.send().await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                location: location.to_string(),
                status: status.to_string(),
            });
        }

        response.bytes().await.map_err(transport)
    }
}
