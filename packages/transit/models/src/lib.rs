#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Transit feed records and the stop markers built from them.
//!
//! The `Feed*` types mirror the static feed files (`stops.txt`,
//! `routes.txt`, `trips.txt`, `stop_times.txt`). [`StopMarker`] is the
//! aggregated, map-facing view: one marker per served stop with the routes
//! that visit it.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use metro_map_geometry_models::Coordinates;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A stop from `stops.txt`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedStop {
    pub id: String,
    pub name: String,
    /// `None` when either coordinate is missing or unparseable.
    pub coordinates: Option<Coordinates>,
}

/// A route from `routes.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRoute {
    pub id: String,
    pub short_name: String,
    pub long_name: String,
}

/// One row of `stop_times.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopTime {
    pub stop_id: String,
    pub stop_sequence: u32,
}

/// A trip with its stop times in `stop_sequence` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trip {
    pub id: String,
    pub route_id: String,
    pub stop_times: Vec<StopTime>,
}

/// The parts of a static feed needed to build stop markers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitFeed {
    /// Stops keyed by stop id.
    pub stops: BTreeMap<String, FeedStop>,
    /// Routes keyed by route id.
    pub routes: BTreeMap<String, FeedRoute>,
    pub trips: Vec<Trip>,
}

/// A route serving a stop.
///
/// Identity is the route id alone; two values with the same id compare
/// equal even if their names differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    #[serde(rename = "routeId")]
    pub id: String,
    #[serde(rename = "routeName")]
    pub short_name: String,
    #[serde(rename = "routeNameLong")]
    pub long_name: String,
}

impl From<&FeedRoute> for Route {
    fn from(route: &FeedRoute) -> Self {
        Self {
            id: route.id.clone(),
            short_name: route.short_name.clone(),
            long_name: route.long_name.clone(),
        }
    }
}

impl PartialEq for Route {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Route {}

impl PartialOrd for Route {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Route {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

/// What kind of service stops at a marker.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StopType {
    /// No rail line serves the stop.
    Bus,
    /// Served by the light rail line only.
    LightRail,
    /// Served by the commuter rail line only.
    CommuterRail,
    /// Served by both rail lines.
    Mixed,
}

impl StopType {
    /// Classifies a stop from which rail lines serve it.
    #[must_use]
    pub const fn from_rail_service(light_rail: bool, commuter_rail: bool) -> Self {
        match (light_rail, commuter_rail) {
            (true, true) => Self::Mixed,
            (true, false) => Self::LightRail,
            (false, true) => Self::CommuterRail,
            (false, false) => Self::Bus,
        }
    }
}

/// Route short names that identify the two rail lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RailLineMarkers {
    pub light_rail: String,
    pub commuter_rail: String,
}

impl Default for RailLineMarkers {
    fn default() -> Self {
        Self {
            light_rail: "MLR".to_string(),
            commuter_rail: "MLB".to_string(),
        }
    }
}

/// A served stop, ready for the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopMarker {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub stop_type: StopType,
    /// Distinct routes in route id order.
    pub routes: Vec<Route>,
    pub coordinates: Coordinates,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn stop_type_names() {
        assert_eq!(StopType::LightRail.to_string(), "light-rail");
        assert_eq!(StopType::from_str("commuter-rail").unwrap(), StopType::CommuterRail);
        assert_eq!(
            serde_json::to_string(&StopType::Mixed).unwrap(),
            "\"mixed\""
        );
    }

    #[test]
    fn classification_table() {
        assert_eq!(StopType::from_rail_service(true, true), StopType::Mixed);
        assert_eq!(StopType::from_rail_service(true, false), StopType::LightRail);
        assert_eq!(StopType::from_rail_service(false, true), StopType::CommuterRail);
        assert_eq!(StopType::from_rail_service(false, false), StopType::Bus);
    }

    #[test]
    fn route_identity_is_the_id() {
        let a = Route {
            id: "18".to_string(),
            short_name: "18".to_string(),
            long_name: "Taylor".to_string(),
        };
        let b = Route {
            long_name: "Taylor (renamed)".to_string(),
            ..a.clone()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn route_serializes_with_frontend_names() {
        let route = Route {
            id: "MLR".to_string(),
            short_name: "MLR".to_string(),
            long_name: "MetroLink Red Line".to_string(),
        };
        let json = serde_json::to_value(&route).unwrap();
        assert_eq!(json["routeId"], "MLR");
        assert_eq!(json["routeNameLong"], "MetroLink Red Line");
    }
}
