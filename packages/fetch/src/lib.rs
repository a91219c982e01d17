#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Network access for the metro map data layers.
//!
//! Every HTTP GET goes through [`RetryingFetcher`], which retries failed
//! attempts with a bounded budget and honours a shared
//! [`CancellationToken`]. [`PaginatedFeatureFetcher`] builds on it to walk
//! `ArcGIS` `query` endpoints page by page until the server stops reporting
//! `exceededTransferLimit`.
//!
//! The transport itself sits behind the [`HttpClient`] trait so the retry
//! and pagination logic can be driven without a network.

pub mod arcgis;
pub mod retry;

use std::time::Duration;

use async_trait::async_trait;

pub use arcgis::{ArcGisLayer, PaginatedFeatureFetcher};
pub use retry::{Backoff, RetryPolicy, RetryingFetcher};
pub use tokio_util::sync::CancellationToken;

/// Browser-like User-Agent; `TIGERweb` rejects requests without one.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; MetroMap/0.1; +https://github.com/metro-map/metro-map)";

/// A failure below the HTTP status level: connect, timeout, body read.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Error raised by `reqwest`.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Error raised by another [`HttpClient`] implementation.
    #[error("{message}")]
    Other {
        /// Description of what went wrong.
        message: String,
    },
}

/// Errors that can occur while fetching remote data.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The request could not be issued (empty URL, zero attempts, bad
    /// endpoint).
    #[error("Invalid request for {url:?}: {message}")]
    InvalidRequest {
        /// URL as supplied.
        url: String,
        /// Description of what is wrong.
        message: String,
    },

    /// The shared cancellation token fired before the next attempt.
    #[error("Request to {url} was cancelled")]
    Cancelled {
        /// URL being fetched.
        url: String,
    },

    /// Every attempt failed.
    #[error("Request to {url} failed after {attempts} attempts (last status: {last_status:?})")]
    Exhausted {
        /// URL being fetched.
        url: String,
        /// Attempts made.
        attempts: u32,
        /// HTTP status of the last response received, if any.
        last_status: Option<u16>,
        /// Last transport-level error, if any attempt saw one.
        #[source]
        source: Option<TransportError>,
    },

    /// The server answered with an explicit error envelope.
    #[error("ArcGIS error {code} from {url}: {message}")]
    Upstream {
        /// URL that produced the envelope.
        url: String,
        /// Error code from the envelope.
        code: i64,
        /// Error message from the envelope.
        message: String,
    },

    /// A successful response body could not be decoded.
    #[error("Failed to decode response from {url}: {message}")]
    Decode {
        /// URL that produced the body.
        url: String,
        /// Description of the decode failure.
        message: String,
    },

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl FetchError {
    /// Whether this failure came from the cancellation token rather than
    /// the network or the data.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// A complete HTTP response: status code plus the full body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Entire response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Whether the status is in the 2xx class.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Minimal GET capability used by [`RetryingFetcher`].
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Performs one GET and reads the whole body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the connection fails or the body
    /// cannot be read. Non-2xx statuses are *not* errors at this level.
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
}

/// [`HttpClient`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Builds a client with the given User-Agent and per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the TLS backend cannot be
    /// initialized.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        // Read the full body before reporting; a truncated body is a
        // transport failure, never a partial success.
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse { status, body })
    }
}
