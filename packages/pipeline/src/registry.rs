//! Named data layers the orchestrator runs.
//!
//! A [`LayerRegistry`] is built once at startup. Each entry is a name plus
//! a boxed async builder that receives the run's [`CancellationToken`] and
//! produces [`LayerData`]. [`LayerRegistry::from_config`] assembles the
//! standard set; tests and callers may register their own.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt as _;
use futures::future::BoxFuture;
use metro_map_census::AcsSource;
use metro_map_census_models::PopulationTable;
use metro_map_fetch::{
    ArcGisLayer, CancellationToken, HttpClient, PaginatedFeatureFetcher, ReqwestClient,
    RetryingFetcher,
};
use metro_map_geometry_models::FeatureCollection;
use metro_map_spatial::SpatialLayer;
use metro_map_transit_models::StopMarker;

use crate::config::PipelineConfig;
use crate::{PipelineError, SourceError};

/// Transit stop markers.
pub const STOPS: &str = "stops";
/// County boundaries.
pub const COUNTIES: &str = "counties";
/// Tract boundaries, before the demographic join.
pub const TRACTS: &str = "tracts";
/// ACS tract table.
pub const POPULATION: &str = "population";

/// Names every run must produce; spatial layers may not reuse them.
pub const RESERVED_LAYERS: [&str; 4] = [STOPS, COUNTIES, TRACTS, POPULATION];

/// What a layer builder produces.
#[derive(Debug, Clone)]
pub enum LayerData {
    Stops(Vec<StopMarker>),
    Features(FeatureCollection),
    Population(PopulationTable),
}

impl LayerData {
    /// Short description of the payload, for logs and errors.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Stops(_) => "stops",
            Self::Features(_) => "features",
            Self::Population(_) => "population table",
        }
    }

    /// Number of items in the payload.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Stops(stops) => stops.len(),
            Self::Features(features) => features.len(),
            Self::Population(table) => table.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Async builder for one layer.
pub type LayerBuilder =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<LayerData, SourceError>> + Send>;

/// Ordered set of named layer builders.
#[derive(Default)]
pub struct LayerRegistry {
    entries: Vec<(String, LayerBuilder)>,
}

impl std::fmt::Debug for LayerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerRegistry")
            .field("layers", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

impl LayerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a layer.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DuplicateLayer`] if `name` is taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        builder: LayerBuilder,
    ) -> Result<(), PipelineError> {
        let name = name.into();
        if self.entries.iter().any(|(existing, _)| *existing == name) {
            return Err(PipelineError::DuplicateLayer { layer: name });
        }
        self.entries.push((name, builder));
        Ok(())
    }

    /// Layer names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names from [`RESERVED_LAYERS`] that are not registered.
    #[must_use]
    pub fn missing_required(&self) -> Vec<&'static str> {
        let names: BTreeSet<&str> = self.names().collect();
        RESERVED_LAYERS
            .into_iter()
            .filter(|name| !names.contains(name))
            .collect()
    }

    pub(crate) fn into_entries(self) -> Vec<(String, LayerBuilder)> {
        self.entries
    }

    /// The standard layers for `config`, all sharing one HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the HTTP client cannot be built.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let client: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(
            &config.http.user_agent,
            Duration::from_secs(config.http.timeout_secs),
        )?);
        Self::with_client(config, client)
    }

    /// The standard layers for `config` over the given transport.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DuplicateLayer`] if a spatial layer reuses
    /// a name.
    pub fn with_client(
        config: &PipelineConfig,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self, PipelineError> {
        let fetcher = RetryingFetcher::new(client, config.retry);
        let pager = PaginatedFeatureFetcher::new(fetcher.clone())
            .with_max_allowable_offset(config.boundaries.max_allowable_offset)
            .with_decode_retries(config.boundaries.decode_retries);

        let mut registry = Self::new();

        registry.register(STOPS, {
            let fetcher = fetcher.clone();
            let url = config.transit.feed_url.clone();
            let markers = config.transit.rail_lines.clone();
            Box::new(move |cancel: CancellationToken| {
                async move {
                    let stops = metro_map_transit::load_stop_markers(
                        &fetcher,
                        &url,
                        markers,
                        Some(&cancel),
                    )
                    .await?;
                    Ok::<_, SourceError>(LayerData::Stops(stops))
                }
                .boxed()
            })
        })?;

        registry.register(COUNTIES, boundary_builder(&pager, &config.boundaries.counties))?;
        registry.register(TRACTS, boundary_builder(&pager, &config.boundaries.tracts))?;

        registry.register(POPULATION, {
            let source = AcsSource::new(fetcher, config.census.clone());
            Box::new(move |cancel: CancellationToken| {
                async move {
                    let table = source.fetch_table(Some(&cancel)).await?;
                    Ok::<_, SourceError>(LayerData::Population(table))
                }
                .boxed()
            })
        })?;

        match &config.spatial.database {
            Some(database) => {
                for layer in &config.spatial.layers {
                    registry.register(
                        layer.name.clone(),
                        spatial_builder(
                            database.clone(),
                            config.spatial.extensions.clone(),
                            layer.clone(),
                        ),
                    )?;
                }
            }
            None if !config.spatial.layers.is_empty() => {
                log::warn!(
                    "No spatial database configured; skipping {} spatial layer(s)",
                    config.spatial.layers.len()
                );
            }
            None => {}
        }

        Ok(registry)
    }
}

fn boundary_builder(pager: &PaginatedFeatureFetcher, layer: &ArcGisLayer) -> LayerBuilder {
    let pager = pager.clone();
    let layer = layer.clone();
    Box::new(move |cancel: CancellationToken| {
        async move {
            let features = pager.fetch_all(&layer, Some(&cancel)).await?;
            Ok::<_, SourceError>(LayerData::Features(features))
        }
        .boxed()
    })
}

/// Runs the query on the blocking pool; the connection lives only for the
/// duration of the call.
fn spatial_builder(
    database: PathBuf,
    extensions: Vec<String>,
    layer: SpatialLayer,
) -> LayerBuilder {
    Box::new(move |cancel: CancellationToken| {
        async move {
            if cancel.is_cancelled() {
                return Err(SourceError::Cancelled);
            }
            let features = tokio::task::spawn_blocking(move || {
                metro_map_spatial::db::load_layer(&database, &extensions, &layer)
            })
            .await??;
            Ok::<_, SourceError>(LayerData::Features(features))
        }
        .boxed()
    })
}
