//! Concurrent layer fan-out.

use std::collections::BTreeMap;

use chrono::Utc;
use metro_map_census::DemographicJoiner;
use metro_map_census_models::PopulationTable;
use metro_map_geometry_models::FeatureCollection;
use metro_map_transit_models::StopMarker;
use tokio::task::JoinSet;

use crate::registry::{COUNTIES, LayerBuilder, LayerData, POPULATION, STOPS, TRACTS};
use crate::{Aggregate, CancellationToken, LayerRegistry, PipelineError};

/// Runs a [`LayerRegistry`] and assembles the [`Aggregate`].
#[derive(Debug)]
pub struct Orchestrator {
    registry: LayerRegistry,
    joiner: DemographicJoiner,
}

impl Orchestrator {
    #[must_use]
    pub fn new(registry: LayerRegistry) -> Self {
        Self {
            registry,
            joiner: DemographicJoiner::default(),
        }
    }

    #[must_use]
    pub fn with_joiner(mut self, joiner: DemographicJoiner) -> Self {
        self.joiner = joiner;
        self
    }

    /// Runs every layer concurrently, then joins demographics onto the
    /// tracts.
    ///
    /// Layers share a child of `cancel`: the first layer failure cancels
    /// it, so siblings stop before their next request, but the run still
    /// waits for every task before returning. Cancelling `cancel` itself
    /// cancels every layer. Partial results are discarded on failure.
    ///
    /// # Errors
    ///
    /// * [`PipelineError::MissingLayer`] if a required layer is not
    ///   registered; nothing is started in that case.
    /// * [`PipelineError::Layer`] naming the first layer that failed.
    /// * [`PipelineError::UnexpectedLayer`] if a layer produced the wrong
    ///   kind of data.
    pub async fn run(self, cancel: CancellationToken) -> Result<Aggregate, PipelineError> {
        if let Some(layer) = self.registry.missing_required().first() {
            return Err(PipelineError::MissingLayer {
                layer: (*layer).to_string(),
            });
        }

        let outputs = run_layers(self.registry.into_entries(), cancel.child_token()).await?;
        assemble(outputs, &self.joiner)
    }
}

/// Spawns every builder on a [`JoinSet`] and collects the results by name.
async fn run_layers(
    entries: Vec<(String, LayerBuilder)>,
    scope: CancellationToken,
) -> Result<BTreeMap<String, LayerData>, PipelineError> {
    let mut tasks = JoinSet::new();
    for (name, builder) in entries {
        let token = scope.clone();
        tasks.spawn(async move {
            let result = builder(token).await;
            (name, result)
        });
    }

    let mut outputs = BTreeMap::new();
    let mut first_error: Option<PipelineError> = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, Ok(data))) => {
                log::info!("{name}: {} {}", data.len(), data.kind());
                outputs.insert(name, data);
            }
            Ok((name, Err(source))) => {
                if first_error.is_none() {
                    log::error!("{name} failed: {source}; cancelling remaining layers");
                    scope.cancel();
                    first_error = Some(PipelineError::Layer {
                        layer: name,
                        source,
                    });
                } else if source.is_cancelled() {
                    log::debug!("{name}: cancelled");
                } else {
                    log::warn!("{name} also failed: {source}");
                }
            }
            Err(e) => {
                log::error!("Layer task failed: {e}");
                scope.cancel();
                if first_error.is_none() {
                    first_error = Some(PipelineError::Task(e));
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(outputs),
    }
}

fn take_stops(
    outputs: &mut BTreeMap<String, LayerData>,
) -> Result<Vec<StopMarker>, PipelineError> {
    match take(outputs, STOPS)? {
        LayerData::Stops(stops) => Ok(stops),
        other => Err(unexpected(STOPS, "stops", &other)),
    }
}

fn take_features(
    outputs: &mut BTreeMap<String, LayerData>,
    name: &str,
) -> Result<FeatureCollection, PipelineError> {
    match take(outputs, name)? {
        LayerData::Features(features) => Ok(features),
        other => Err(unexpected(name, "features", &other)),
    }
}

fn take_population(
    outputs: &mut BTreeMap<String, LayerData>,
) -> Result<PopulationTable, PipelineError> {
    match take(outputs, POPULATION)? {
        LayerData::Population(table) => Ok(table),
        other => Err(unexpected(POPULATION, "population table", &other)),
    }
}

fn take(outputs: &mut BTreeMap<String, LayerData>, name: &str) -> Result<LayerData, PipelineError> {
    outputs.remove(name).ok_or_else(|| PipelineError::MissingLayer {
        layer: name.to_string(),
    })
}

fn unexpected(name: &str, expected: &'static str, found: &LayerData) -> PipelineError {
    PipelineError::UnexpectedLayer {
        layer: name.to_string(),
        expected,
        found: found.kind(),
    }
}

/// Builds the aggregate from completed layer outputs.
fn assemble(
    mut outputs: BTreeMap<String, LayerData>,
    joiner: &DemographicJoiner,
) -> Result<Aggregate, PipelineError> {
    let stops = take_stops(&mut outputs)?;
    let counties = take_features(&mut outputs, COUNTIES)?;
    let tracts = take_features(&mut outputs, TRACTS)?;
    let population = take_population(&mut outputs)?;

    let mut layers = BTreeMap::new();
    for (name, data) in outputs {
        match data {
            LayerData::Features(features) => {
                layers.insert(name, features);
            }
            other => return Err(unexpected(&name, "features", &other)),
        }
    }

    let tracts = joiner.join(&tracts, &population);

    Ok(Aggregate {
        generated_at: Utc::now(),
        stops,
        counties,
        tracts,
        layers,
    })
}
