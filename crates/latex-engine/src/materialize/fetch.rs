//! Remote asset fetching

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use thiserror::Error;

/// Why a remote asset could not be fetched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("unsupported URL '{0}' (only http and https are allowed)")]
    UnsupportedUrl(String),

    #[error("request timed out")]
    TimedOut,

    #[error("server answered with status {0}")]
    Status(u16),

    #[error("asset exceeds {0} bytes")]
    TooLarge(u64),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Source of remote project assets
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Download the bytes behind `url`
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetches assets over HTTP(S) with a per-request timeout and size cap
pub struct HttpFetcher {
    client: Client,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_bytes: u64) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client, max_bytes })
    }
}

/// Parse a URL and make sure it points at an http(s) resource
pub fn parse_remote_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|_| FetchError::UnsupportedUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(FetchError::UnsupportedUrl(url.to_string())),
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let url = parse_remote_url(url)?;

        let response = self.client.get(url).send().await.map_err(map_reqwest)?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(FetchError::TooLarge(self.max_bytes));
        }

        let bytes = response.bytes().await.map_err(map_reqwest)?;
        if bytes.len() as u64 > self.max_bytes {
            return Err(FetchError::TooLarge(self.max_bytes));
        }

        Ok(bytes.to_vec())
    }
}

fn map_reqwest(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::TimedOut
    } else {
        FetchError::Transport(err.to_string())
    }
}
