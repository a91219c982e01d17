#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Metro map data pipeline.
//!
//! Fetches every configured data layer concurrently, joins census
//! demographics onto tract boundaries and hands back one [`Aggregate`]:
//!
//! 1. [`config::PipelineConfig`] is loaded (built-in TOML, `--config`
//!    file, environment overrides).
//! 2. [`registry::LayerRegistry::from_config`] turns it into named async
//!    layer builders.
//! 3. [`orchestrator::Orchestrator::run`] runs them under one
//!    cancellation scope; the first failure cancels the rest.
//! 4. The resulting [`Aggregate`] can be written as serving artifacts or
//!    saved as a snapshot and loaded back later.

pub mod aggregate;
pub mod config;
pub mod orchestrator;
pub mod registry;

use metro_map_census::CensusError;
use metro_map_fetch::FetchError;
use metro_map_spatial::SpatialError;
use metro_map_transit::TransitError;

pub use aggregate::Aggregate;
pub use config::{ConfigError, PipelineConfig};
pub use metro_map_fetch::CancellationToken;
pub use orchestrator::Orchestrator;
pub use registry::{LayerBuilder, LayerData, LayerRegistry};

/// Why a single layer failed.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Boundary fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Transit feed could not be loaded.
    #[error(transparent)]
    Transit(#[from] TransitError),

    /// ACS table could not be loaded.
    #[error(transparent)]
    Census(#[from] CensusError),

    /// Spatial query failed.
    #[error(transparent)]
    Spatial(#[from] SpatialError),

    /// The layer's blocking task panicked or was aborted.
    #[error("Layer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The run was cancelled before the layer started.
    #[error("Cancelled")]
    Cancelled,
}

impl SourceError {
    /// Whether this failure is the shared cancellation rather than a fault
    /// of the layer itself.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Fetch(e)
            | Self::Transit(TransitError::Fetch(e))
            | Self::Census(CensusError::Fetch(e)) => e.is_cancelled(),
            _ => false,
        }
    }
}

/// Errors that can occur while running the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The HTTP client could not be built.
    #[error(transparent)]
    Http(#[from] FetchError),

    /// A layer failed; the run was cancelled.
    #[error("Layer {layer:?} failed: {source}")]
    Layer {
        /// Layer name.
        layer: String,
        /// Underlying failure.
        #[source]
        source: SourceError,
    },

    /// A layer task panicked.
    #[error("Layer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Two layers were registered under one name.
    #[error("Layer {layer:?} is registered twice")]
    DuplicateLayer {
        /// Layer name.
        layer: String,
    },

    /// A layer name cannot be used as an artifact file name.
    #[error("Layer name {layer:?} is not a valid artifact file name")]
    InvalidLayerName {
        /// Layer name.
        layer: String,
    },

    /// A required layer is not registered or produced nothing.
    #[error("Required layer {layer:?} is missing")]
    MissingLayer {
        /// Layer name.
        layer: String,
    },

    /// A layer produced the wrong kind of data.
    #[error("Layer {layer:?} produced {found}, expected {expected}")]
    UnexpectedLayer {
        /// Layer name.
        layer: String,
        /// Kind the pipeline needs.
        expected: &'static str,
        /// Kind the layer produced.
        found: &'static str,
    },

    /// Reading or writing a file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A snapshot or artifact could not be (de)serialized.
    #[error("JSON error at {path}: {source}")]
    Json {
        /// File path.
        path: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Loads layers for `config` and runs them to an [`Aggregate`].
///
/// # Errors
///
/// Returns [`PipelineError`] if the registry cannot be built or any layer
/// fails.
pub async fn run(
    config: &PipelineConfig,
    cancel: CancellationToken,
) -> Result<Aggregate, PipelineError> {
    let registry = LayerRegistry::from_config(config)?;
    log::info!(
        "Running {} layers: {}",
        registry.len(),
        registry.names().collect::<Vec<_>>().join(", ")
    );
    Orchestrator::new(registry).run(cancel).await
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use metro_map_fetch::{HttpClient, HttpResponse, TransportError};

    /// Transport that refuses every connection.
    pub struct Unreachable;

    #[async_trait]
    impl HttpClient for Unreachable {
        async fn get(&self, _url: &str) -> Result<HttpResponse, TransportError> {
            Err(TransportError::Other {
                message: "connection refused".to_string(),
            })
        }
    }
}
