//! The assembled result of one pipeline run.
//!
//! An [`Aggregate`] is immutable once built. It is served as per-layer
//! JSON artifacts ([`Aggregate::write_artifacts`]) and may be saved as a
//! single snapshot so a later process can serve it without refetching.
//! Snapshot paths ending in `.gz` are gzip-compressed.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write as _};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use metro_map_geometry_models::FeatureCollection;
use metro_map_transit_models::StopMarker;
use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Directory under the artifact root holding spatial layers.
pub const LAYERS_DIR: &str = "layers";

/// Whether `name` can be used as a file stem under [`LAYERS_DIR`]: ASCII
/// letters, digits, `_`, `-` and `.`, never `..`.
#[must_use]
pub fn is_valid_layer_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Every layer of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub generated_at: DateTime<Utc>,
    pub stops: Vec<StopMarker>,
    pub counties: FeatureCollection,
    /// Tracts with demographics joined.
    pub tracts: FeatureCollection,
    /// Spatial layers by name.
    #[serde(default)]
    pub layers: BTreeMap<String, FeatureCollection>,
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PipelineError + '_ {
    move |source| PipelineError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn json_error(path: &Path) -> impl FnOnce(serde_json::Error) -> PipelineError + '_ {
    move |source| PipelineError::Json {
        path: path.display().to_string(),
        source,
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    let file = File::create(path).map_err(io_error(path))?;

    if is_gzip(path) {
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut encoder, value).map_err(json_error(path))?;
        encoder
            .finish()
            .and_then(|mut writer| writer.flush())
            .map_err(io_error(path))?;
    } else {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, value).map_err(json_error(path))?;
        writer.flush().map_err(io_error(path))?;
    }

    Ok(())
}

impl Aggregate {
    /// Total number of features and stops across every layer.
    #[must_use]
    pub fn feature_count(&self) -> usize {
        self.stops.len()
            + self.counties.len()
            + self.tracts.len()
            + self.layers.values().map(FeatureCollection::len).sum::<usize>()
    }

    /// Writes the aggregate as one snapshot file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] or [`PipelineError::Json`] naming
    /// `path`.
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        write_json(path, self)?;
        log::info!("Saved snapshot to {}", path.display());
        Ok(())
    }

    /// Reads a snapshot written by [`Self::save`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] or [`PipelineError::Json`] naming
    /// `path`.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let file = File::open(path).map_err(io_error(path))?;
        let reader = BufReader::new(file);

        let aggregate: Self = if is_gzip(path) {
            serde_json::from_reader(GzDecoder::new(reader)).map_err(json_error(path))?
        } else {
            serde_json::from_reader(reader).map_err(json_error(path))?
        };

        log::info!(
            "Loaded snapshot from {} (generated {})",
            path.display(),
            aggregate.generated_at
        );
        Ok(aggregate)
    }

    /// Writes `stops.json`, `counties.json`, `tracts.json` and one
    /// `layers/<name>.json` per spatial layer under `dir`.
    ///
    /// Returns the paths written.
    ///
    /// # Errors
    ///
    /// * [`PipelineError::InvalidLayerName`] if a layer name could escape
    ///   `dir`; nothing is written in that case.
    /// * [`PipelineError::Io`] if a directory or file cannot be created.
    /// * [`PipelineError::Json`] if serialization fails.
    pub fn write_artifacts(&self, dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        if let Some(name) = self.layers.keys().find(|name| !is_valid_layer_name(name)) {
            return Err(PipelineError::InvalidLayerName {
                layer: name.clone(),
            });
        }

        let layers_dir = dir.join(LAYERS_DIR);
        std::fs::create_dir_all(&layers_dir).map_err(io_error(&layers_dir))?;

        let mut written = Vec::with_capacity(3 + self.layers.len());

        let path = dir.join("stops.json");
        write_json(&path, &self.stops)?;
        written.push(path);

        for (name, features) in [("counties", &self.counties), ("tracts", &self.tracts)] {
            let path = dir.join(format!("{name}.json"));
            write_json(&path, features)?;
            written.push(path);
        }

        for (name, features) in &self.layers {
            let path = layers_dir.join(format!("{name}.json"));
            write_json(&path, features)?;
            written.push(path);
        }

        log::info!("Wrote {} artifacts to {}", written.len(), dir.display());
        Ok(written)
    }
}
