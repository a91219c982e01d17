#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geometry and feature types shared by every metro map data layer.
//!
//! Every source (the paginated `ArcGIS` services, the spatial database and
//! the transit feed) is normalized into [`Feature`]s: one [`Geometry`] plus
//! a flat map of [`PropertyValue`]s. These are the types handed to the map
//! frontend and written to snapshots, so their serialized shape is stable.

pub mod geometry;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use geometry::{Geometry, GeometryError, Position};

/// A latitude/longitude pair in WGS84.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

/// A single attribute value on a [`Feature`].
///
/// Serialized untagged, so a snapshot stores plain JSON scalars and the
/// integer/float distinction survives a round trip (`50` vs `50.0`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Missing value.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Whole number.
    Integer(i64),
    /// Floating point number.
    Number(f64),
    /// Text.
    String(String),
}

impl PropertyValue {
    /// Returns the value as a float, parsing numeric strings.
    ///
    /// `Null`, booleans and non-numeric text yield `None`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Number(n) => Some(*n),
            Self::String(s) => s.trim().parse().ok(),
            Self::Null | Self::Bool(_) => None,
        }
    }

    /// Returns the value as text. Numbers are formatted, `Null` is `None`.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Number(n) => Some(n.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Null => None,
        }
    }

    /// Whether the value is [`PropertyValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Number))
                .unwrap_or(Self::Null),
            serde_json::Value::String(s) => Self::String(s),
            // Nested structures are kept as their JSON text
            other @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                Self::String(other.to_string())
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for PropertyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Property name to value. Names are unique; ordering carries no meaning.
pub type Properties = BTreeMap<String, PropertyValue>;

/// A geometry plus its named attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Normalized shape.
    pub geometry: Geometry,
    /// Named attributes.
    pub properties: Properties,
}

impl Feature {
    /// Creates a feature with no properties.
    #[must_use]
    pub const fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            properties: BTreeMap::new(),
        }
    }

    /// Looks up a property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Sets a property, replacing any previous value with the same name.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(name.into(), value.into());
    }
}

/// An ordered list of features in fetch or row order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    /// Features in the order they were received.
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    /// Creates an empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            features: Vec::new(),
        }
    }

    /// Number of features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the collection holds no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Appends a feature.
    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    /// Iterates features in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Feature> {
        self.features.iter()
    }
}

impl From<Vec<Feature>> for FeatureCollection {
    fn from(features: Vec<Feature>) -> Self {
        Self { features }
    }
}

impl Extend<Feature> for FeatureCollection {
    fn extend<I: IntoIterator<Item = Feature>>(&mut self, iter: I) {
        self.features.extend(iter);
    }
}

impl IntoIterator for FeatureCollection {
    type Item = Feature;
    type IntoIter = std::vec::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}

impl<'a> IntoIterator for &'a FeatureCollection {
    type Item = &'a Feature;
    type IntoIter = std::slice::Iter<'a, Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_value_from_json_keeps_number_kind() {
        assert_eq!(
            PropertyValue::from(serde_json::json!(42)),
            PropertyValue::Integer(42)
        );
        assert_eq!(
            PropertyValue::from(serde_json::json!(42.5)),
            PropertyValue::Number(42.5)
        );
        assert_eq!(
            PropertyValue::from(serde_json::json!(null)),
            PropertyValue::Null
        );
        assert_eq!(
            PropertyValue::from(serde_json::json!({"lit": "yes"})),
            PropertyValue::String(r#"{"lit":"yes"}"#.to_string())
        );
    }

    #[test]
    fn property_value_as_f64_parses_text() {
        assert_eq!(PropertyValue::from(" 12.5 ").as_f64(), Some(12.5));
        assert_eq!(PropertyValue::from("n/a").as_f64(), None);
        assert_eq!(PropertyValue::Integer(7).as_f64(), Some(7.0));
        assert_eq!(PropertyValue::Null.as_f64(), None);
    }

    #[test]
    fn property_values_round_trip_through_json() {
        let mut feature = Feature::new(Geometry::Point {
            coordinates: Coordinates {
                latitude: 38.627_003,
                longitude: -90.199_402_1,
            },
        });
        feature.set_property("count", 50_i64);
        feature.set_property("ratio", 50.0);
        feature.set_property("name", "Civic Center");
        feature.set_property("lit", true);
        feature.set_property("surface", PropertyValue::Null);

        let json = serde_json::to_string(&feature).unwrap();
        let back: Feature = serde_json::from_str(&json).unwrap();

        assert_eq!(back, feature);
        assert_eq!(back.property("count"), Some(&PropertyValue::Integer(50)));
        assert_eq!(back.property("ratio"), Some(&PropertyValue::Number(50.0)));
    }

    #[test]
    fn polygons_and_lines_round_trip_without_precision_loss() {
        let features: FeatureCollection = vec![
            Feature::new(Geometry::Polygon {
                rings: vec![
                    vec![
                        [-90.199_402_100_000_01, 38.627_003_000_000_01],
                        [-90.320_515_333_333_33, 38.774_349_999_999_99],
                        [-90.199_402_100_000_01, 38.627_003_000_000_01],
                    ],
                    vec![[-90.25, 38.65], [-90.26, 38.66], [-90.25, 38.65]],
                ],
            }),
            Feature::new(Geometry::Line {
                paths: vec![
                    vec![[-90.280_071_600_000_01, 38.636_981_7], [-90.279_1, 38.637_2]],
                    vec![[-90.2, 38.6], [-90.199_402_100_000_01, 38.600_000_000_000_01]],
                ],
            }),
        ]
        .into();

        let json = serde_json::to_string(&features).unwrap();
        let back: FeatureCollection = serde_json::from_str(&json).unwrap();

        assert_eq!(back, features);
        assert!(json.contains("-90.19940210000001"));
    }
}
