//! Canonical geometry and its normalization from the wire formats we ingest.
//!
//! Two encodings arrive at the boundary: `GeoJSON` (from the spatial
//! database's `ST_AsGeoJSON` projections) and Esri JSON (from `ArcGIS`
//! `f=json` queries). Both collapse into [`Geometry`], whose polygon/line
//! shape follows the Esri `rings`/`paths` layout the frontend draws.

use serde::{Deserialize, Serialize};

use crate::Coordinates;

/// A `[longitude, latitude]` position.
pub type Position = [f64; 2];

/// Errors raised while normalizing a geometry value.
#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    /// The value was not valid JSON or not a valid geometry object.
    #[error("Invalid geometry JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The geometry type has no canonical counterpart.
    #[error("Unsupported geometry type: {kind}")]
    UnsupportedType {
        /// Type name as reported by the source.
        kind: String,
    },

    /// A position had fewer than two ordinates.
    #[error("Invalid position: expected at least 2 ordinates, found {found}")]
    InvalidPosition {
        /// Number of ordinates found.
        found: usize,
    },
}

/// A point, polygon or line. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Geometry {
    /// A single location.
    Point {
        /// Location of the point.
        coordinates: Coordinates,
    },
    /// Ordered rings; multi-polygons are flattened into one ring list.
    Polygon {
        /// Rings of `[lon, lat]` positions.
        rings: Vec<Vec<Position>>,
    },
    /// Ordered paths; a single line string is one path.
    Line {
        /// Paths of `[lon, lat]` positions.
        paths: Vec<Vec<Position>>,
    },
}

impl Geometry {
    /// Parses `GeoJSON` geometry text.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] if the text is not a `GeoJSON` geometry or
    /// the geometry type is unsupported.
    pub fn from_geojson_str(text: &str) -> Result<Self, GeometryError> {
        let geometry: geojson::Geometry = serde_json::from_str(text)?;
        Self::from_geojson(&geometry)
    }

    /// Normalizes an already-parsed JSON value holding `GeoJSON` geometry.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] if the value is not a `GeoJSON` geometry or
    /// the geometry type is unsupported.
    pub fn from_geojson_value(value: serde_json::Value) -> Result<Self, GeometryError> {
        let geometry: geojson::Geometry = serde_json::from_value(value)?;
        Self::from_geojson(&geometry)
    }

    /// Normalizes a `geojson` crate geometry.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::UnsupportedType`] for multi-points and
    /// geometry collections.
    pub fn from_geojson(geometry: &geojson::Geometry) -> Result<Self, GeometryError> {
        match &geometry.value {
            geojson::Value::Point(p) => {
                let [longitude, latitude] = position(p)?;
                Ok(Self::Point {
                    coordinates: Coordinates {
                        latitude,
                        longitude,
                    },
                })
            }
            geojson::Value::LineString(line) => Ok(Self::Line {
                paths: vec![path(line)?],
            }),
            geojson::Value::MultiLineString(lines) => Ok(Self::Line {
                paths: lines.iter().map(|l| path(l)).collect::<Result<_, _>>()?,
            }),
            geojson::Value::Polygon(rings) => Ok(Self::Polygon {
                rings: rings.iter().map(|r| path(r)).collect::<Result<_, _>>()?,
            }),
            geojson::Value::MultiPolygon(polygons) => Ok(Self::Polygon {
                rings: polygons
                    .iter()
                    .flatten()
                    .map(|r| path(r))
                    .collect::<Result<_, _>>()?,
            }),
            geojson::Value::MultiPoint(_) => Err(GeometryError::UnsupportedType {
                kind: "MultiPoint".to_string(),
            }),
            geojson::Value::GeometryCollection(_) => Err(GeometryError::UnsupportedType {
                kind: "GeometryCollection".to_string(),
            }),
        }
    }

    /// Normalizes an Esri JSON geometry (`{x, y}`, `{rings}` or `{paths}`).
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] if none of the known members are present or
    /// their coordinates are malformed.
    pub fn from_esri_json(value: &serde_json::Value) -> Result<Self, GeometryError> {
        if let Some(rings) = value.get("rings") {
            let rings: Vec<Vec<Vec<f64>>> = serde_json::from_value(rings.clone())?;
            return Ok(Self::Polygon {
                rings: rings.iter().map(|r| path(r)).collect::<Result<_, _>>()?,
            });
        }
        if let Some(paths) = value.get("paths") {
            let paths: Vec<Vec<Vec<f64>>> = serde_json::from_value(paths.clone())?;
            return Ok(Self::Line {
                paths: paths.iter().map(|p| path(p)).collect::<Result<_, _>>()?,
            });
        }
        if let (Some(x), Some(y)) = (
            value.get("x").and_then(serde_json::Value::as_f64),
            value.get("y").and_then(serde_json::Value::as_f64),
        ) {
            return Ok(Self::Point {
                coordinates: Coordinates {
                    latitude: y,
                    longitude: x,
                },
            });
        }

        Err(GeometryError::UnsupportedType {
            kind: describe_esri(value),
        })
    }
}

fn position(ordinates: &[f64]) -> Result<Position, GeometryError> {
    match ordinates {
        [x, y, ..] => Ok([*x, *y]),
        _ => Err(GeometryError::InvalidPosition {
            found: ordinates.len(),
        }),
    }
}

fn path(positions: &[Vec<f64>]) -> Result<Vec<Position>, GeometryError> {
    positions.iter().map(|p| position(p)).collect()
}

fn describe_esri(value: &serde_json::Value) -> String {
    match value.as_object() {
        Some(obj) if obj.is_empty() => "empty object".to_string(),
        Some(obj) => format!(
            "object with keys [{}]",
            obj.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
        ),
        None => "non-object value".to_string(),
    }
}
