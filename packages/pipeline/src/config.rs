//! Pipeline configuration.
//!
//! The built-in configuration (`config/default.toml`) covers the St. Louis
//! metro area. A file passed with `--config` replaces it entirely;
//! afterwards the environment may override the spatial database path
//! (`METRO_MAP_DATABASE`) and the census API key (`CENSUS_API_KEY`).

use std::path::{Path, PathBuf};

use metro_map_census::AcsConfig;
use metro_map_fetch::{ArcGisLayer, DEFAULT_USER_AGENT, RetryPolicy};
use metro_map_spatial::SpatialLayer;
use metro_map_transit_models::RailLineMarkers;
use serde::{Deserialize, Serialize};

/// Embedded default configuration.
const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Environment variable overriding [`SpatialConfig::database`].
pub const DATABASE_ENV: &str = "METRO_MAP_DATABASE";

/// Environment variable overriding [`AcsConfig::api_key`].
pub const CENSUS_API_KEY_ENV: &str = "CENSUS_API_KEY";

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid TOML for [`PipelineConfig`].
    #[error("Invalid config {origin}: {source}")]
    Parse {
        /// File path, or `"<built-in>"`.
        origin: String,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// The configuration parsed but is unusable.
    #[error("Invalid config: {message}")]
    Invalid {
        /// Description of the problem.
        message: String,
    },
}

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 60,
        }
    }
}

/// Transit feed settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitConfig {
    /// URL of the static feed zip.
    pub feed_url: String,
    #[serde(default)]
    pub rail_lines: RailLineMarkers,
}

/// County and tract boundary layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryConfig {
    pub counties: ArcGisLayer,
    pub tracts: ArcGisLayer,
    /// Geometry simplification tolerance, in degrees.
    #[serde(default = "default_max_allowable_offset")]
    pub max_allowable_offset: f64,
    /// Extra fetches of a page whose body does not decode.
    #[serde(default = "default_decode_retries")]
    pub decode_retries: u32,
}

const fn default_max_allowable_offset() -> f64 {
    metro_map_fetch::arcgis::DEFAULT_MAX_ALLOWABLE_OFFSET
}

const fn default_decode_retries() -> u32 {
    metro_map_fetch::arcgis::DEFAULT_DECODE_RETRIES
}

/// Point-of-interest layers read from the spatial database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// `DuckDB` file. Spatial layers are skipped when unset.
    pub database: Option<PathBuf>,
    /// Extensions loaded on every connection.
    pub extensions: Vec<String>,
    pub layers: Vec<SpatialLayer>,
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub http: HttpConfig,
    pub transit: TransitConfig,
    pub boundaries: BoundaryConfig,
    pub census: AcsConfig,
    #[serde(default)]
    pub spatial: SpatialConfig,
}

impl PipelineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// The built-in configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the embedded file is invalid.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_toml_str(DEFAULT_CONFIG, "<built-in>")
    }

    /// Loads `path` if given, else the built-in configuration, then applies
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                log::info!("Loading config from {}", path.display());
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_toml_str(&content, &path.display().to_string())?
            }
            None => Self::builtin()?,
        };

        config.apply_overrides(
            std::env::var(DATABASE_ENV).ok(),
            std::env::var(CENSUS_API_KEY_ENV).ok(),
        );
        Ok(config)
    }

    /// Serializes the configuration back to TOML.
    ///
    /// # Errors
    ///
    /// Returns [`toml::ser::Error`] if a value has no TOML form.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }

    /// Applies environment-style overrides. Empty values are ignored.
    pub fn apply_overrides(&mut self, database: Option<String>, census_api_key: Option<String>) {
        if let Some(database) = database.filter(|s| !s.trim().is_empty()) {
            log::debug!("Spatial database overridden by {DATABASE_ENV}");
            self.spatial.database = Some(PathBuf::from(database));
        }
        if let Some(key) = census_api_key.filter(|s| !s.trim().is_empty()) {
            self.census.api_key = Some(key);
        }
    }

    /// Checks constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });

        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".to_string());
        }
        if self.transit.feed_url.trim().is_empty() {
            return invalid("transit.feed_url is empty".to_string());
        }
        for layer in [&self.boundaries.counties, &self.boundaries.tracts] {
            if layer.url.trim().is_empty() {
                return invalid(format!("boundary layer {:?} has no url", layer.label));
            }
            if layer.page_size == 0 {
                return invalid(format!("boundary layer {:?} has page_size 0", layer.label));
            }
        }
        if self.census.areas.is_empty() {
            return invalid("census.areas is empty".to_string());
        }

        let mut names = std::collections::BTreeSet::new();
        for layer in &self.spatial.layers {
            if crate::registry::RESERVED_LAYERS.contains(&layer.name.as_str()) {
                return invalid(format!(
                    "spatial layer name {:?} is reserved",
                    layer.name
                ));
            }
            if !crate::aggregate::is_valid_layer_name(&layer.name) {
                return invalid(format!(
                    "spatial layer name {:?} may only use letters, digits, '_', '-' and '.'",
                    layer.name
                ));
            }
            if !names.insert(layer.name.as_str()) {
                return invalid(format!("duplicate spatial layer {:?}", layer.name));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use metro_map_fetch::Backoff;

    use super::*;

    #[test]
    fn builtin_config_is_valid() {
        let config = PipelineConfig::builtin().unwrap();

        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff, Backoff::Fixed);
        assert_eq!(config.boundaries.tracts.page_size, 2000);
        assert!(config.boundaries.counties.filter.contains("STATE = '29'"));
        assert_eq!(config.transit.rail_lines, RailLineMarkers::default());
        assert_eq!(config.census.areas.len(), 2);
        assert_eq!(config.census.variables.len(), 6);
        assert!(config.spatial.database.is_none());
        let names: Vec<_> = config.spatial.layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["grocery", "bikes"]);
        assert_eq!(config.spatial.layers[0].geometry_column, "geom");
    }

    #[test]
    fn builtin_bikes_layer_projects_every_cycleway_attribute() {
        let config = PipelineConfig::builtin().unwrap();
        let bikes = &config.spatial.layers[1];

        for column in ["AS name", "AS surface", "AS bicycle", "AS foot", "AS lit", "AS geom"] {
            assert!(bikes.sql.contains(column), "{column}");
        }
        assert!(bikes.sql.contains("tags->>'lit'"));
        assert_eq!(bikes.params, vec!["cycleway".to_string()]);
    }

    #[test]
    fn overrides_apply_and_ignore_blanks() {
        let mut config = PipelineConfig::builtin().unwrap();

        config.apply_overrides(Some("  ".to_string()), Some("abc".to_string()));
        assert!(config.spatial.database.is_none());
        assert_eq!(config.census.api_key.as_deref(), Some("abc"));

        config.apply_overrides(Some("/data/osm.duckdb".to_string()), None);
        assert_eq!(
            config.spatial.database.as_deref(),
            Some(Path::new("/data/osm.duckdb"))
        );
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [transit]
            feed_url = "https://transit.test/gtfs.zip"

            [boundaries.counties]
            label = "counties"
            url = "https://arcgis.test/MapServer/82"

            [boundaries.tracts]
            label = "tracts"
            url = "https://arcgis.test/MapServer/0"

            [census]
            areas = [{ state = "29" }]
            "#,
            "test",
        )
        .unwrap();

        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.boundaries.tracts.filter, "1=1");
        assert_eq!(config.census.year, 2023);
        assert!(config.census.areas[0].counties.is_empty());
        assert!(config.spatial.layers.is_empty());
    }

    #[test]
    fn rejects_reserved_and_duplicate_layer_names() {
        let mut config = PipelineConfig::builtin().unwrap();
        config.spatial.layers[1].name = "grocery".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        config.spatial.layers[1].name = "tracts".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn rejects_layer_names_that_leave_the_output_dir() {
        let mut config = PipelineConfig::builtin().unwrap();

        for name in ["../x", "a/b", "..", ""] {
            config.spatial.layers[1].name = name.to_string();
            let err = config.validate().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { .. }), "{name}");
        }

        config.spatial.layers[1].name = "bike_lanes".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_attempts_is_invalid() {
        let err = PipelineConfig::from_toml_str(
            &DEFAULT_CONFIG.replace("max_attempts = 3", "max_attempts = 0"),
            "test",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn serialized_config_parses_back() {
        let mut config = PipelineConfig::builtin().unwrap();
        config.spatial.database = Some(PathBuf::from("/data/osm.duckdb"));

        let text = config.to_toml_string().unwrap();
        assert_eq!(PipelineConfig::from_toml_str(&text, "round trip").unwrap(), config);
    }

    #[test]
    fn malformed_toml_names_its_origin() {
        let err = PipelineConfig::from_toml_str("[transit", "custom.toml").unwrap_err();
        assert!(err.to_string().contains("custom.toml"));
    }
}
