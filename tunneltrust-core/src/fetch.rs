//! Remote document retrieval.
//!
//! The sync layer only needs "bytes for a URL"; [`Fetcher`] is the seam that
//! keeps HTTP out of the trust logic and lets tests supply canned responses.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Error type for remote retrieval.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server answered with a non-success status code.
    #[error("unexpected status {status} fetching {url}")]
    Status { status: u16, url: String },

    /// The request could not be completed.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The request did not complete within the configured timeout.
    #[error("request timed out after {timeout:?}")]
    TimedOut { timeout: Duration },
}

/// Retrieves the raw bytes behind a URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

#[cfg(feature = "http-client")]
mod http {
    use super::{FetchError, Fetcher};
    use async_trait::async_trait;

    /// [`Fetcher`] backed by a shared [`reqwest::Client`].
    #[derive(Debug, Clone)]
    pub struct HttpFetcher {
        client: reqwest::Client,
    }

    impl HttpFetcher {
        pub fn new() -> Self {
            Self {
                client: reqwest::Client::new(),
            }
        }

        /// Use an existing client, e.g. one with proxy or TLS settings.
        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    impl Default for HttpFetcher {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Fetcher for HttpFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| FetchError::Transport {
                    message: e.to_string(),
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            let bytes = response.bytes().await.map_err(|e| FetchError::Transport {
                message: e.to_string(),
            })?;
            Ok(bytes.to_vec())
        }
    }

}

#[cfg(feature = "http-client")]
pub use http::HttpFetcher;
