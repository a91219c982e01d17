#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Transit stop markers from a static feed.
//!
//! [`load_stop_markers`] downloads the feed zip through a
//! [`RetryingFetcher`], parses it with [`gtfs::read_feed`] and aggregates
//! the result with [`RouteStopAggregator`].

pub mod aggregate;
pub mod gtfs;

use metro_map_fetch::{CancellationToken, FetchError, RetryingFetcher};
use metro_map_transit_models::{RailLineMarkers, StopMarker};

pub use aggregate::{RouteSets, RouteStopAggregator};

/// Errors that can occur while loading transit data.
#[derive(Debug, thiserror::Error)]
pub enum TransitError {
    /// Downloading the feed failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The feed is not a readable zip archive.
    #[error("Invalid feed archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// A required feed file is absent from the archive.
    #[error("Feed archive has no {name}")]
    MissingFile {
        /// File name inside the archive.
        name: &'static str,
    },

    /// A feed file could not be read as CSV.
    #[error("CSV error in {file}: {source}")]
    Csv {
        /// File name inside the archive.
        file: &'static str,
        /// Underlying CSV error.
        #[source]
        source: csv::Error,
    },
}

/// Downloads the feed at `url` and builds its stop markers.
///
/// # Errors
///
/// Returns [`TransitError::Fetch`] if the download fails or is cancelled,
/// or a parse error if the archive is unusable.
pub async fn load_stop_markers(
    fetcher: &RetryingFetcher,
    url: &str,
    markers: RailLineMarkers,
    cancel: Option<&CancellationToken>,
) -> Result<Vec<StopMarker>, TransitError> {
    log::info!("Downloading transit feed from {url}");
    let bytes = fetcher.fetch(url, cancel).await?;
    log::info!("Transit feed: {} KB", bytes.len() / 1024);

    let feed = gtfs::read_feed(&bytes)?;
    Ok(RouteStopAggregator::new(markers).build(&feed))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use metro_map_fetch::{HttpClient, HttpResponse, RetryPolicy, TransportError};

    use super::*;

    struct ZipServer(Vec<u8>);

    #[async_trait]
    impl HttpClient for ZipServer {
        async fn get(&self, _url: &str) -> Result<HttpResponse, TransportError> {
            Ok(HttpResponse {
                status: 200,
                body: self.0.clone(),
            })
        }
    }

    fn fetcher(body: Vec<u8>) -> RetryingFetcher {
        RetryingFetcher::new(Arc::new(ZipServer(body)), RetryPolicy::default())
    }

    #[tokio::test]
    async fn downloads_and_aggregates() {
        let fetcher = fetcher(gtfs::testing::feed_zip());

        let markers = load_stop_markers(
            &fetcher,
            "https://transit.test/google_transit.zip",
            RailLineMarkers::default(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(markers.len(), 2);
    }

    #[tokio::test]
    async fn cancellation_is_surfaced_as_fetch_error() {
        let fetcher = fetcher(gtfs::testing::feed_zip());
        let token = CancellationToken::new();
        token.cancel();

        let err = load_stop_markers(
            &fetcher,
            "https://transit.test/google_transit.zip",
            RailLineMarkers::default(),
            Some(&token),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TransitError::Fetch(ref e) if e.is_cancelled()));
    }
}
