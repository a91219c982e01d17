//! Route-to-stop aggregation.

use std::collections::{BTreeMap, BTreeSet};

use metro_map_transit_models::{RailLineMarkers, Route, StopMarker, StopType, TransitFeed};

/// Stop id to the ids of the routes that visit it.
pub type RouteSets = BTreeMap<String, BTreeSet<String>>;

/// Builds one [`StopMarker`] per served stop.
#[derive(Debug, Clone, Default)]
pub struct RouteStopAggregator {
    markers: RailLineMarkers,
}

impl RouteStopAggregator {
    #[must_use]
    pub const fn new(markers: RailLineMarkers) -> Self {
        Self { markers }
    }

    /// Visits every trip and stop time, collecting the distinct routes seen
    /// at each stop.
    ///
    /// Trips on unknown routes and stop times at unknown stops are skipped
    /// and logged; they never fail the aggregation.
    #[must_use]
    pub fn route_sets(&self, feed: &TransitFeed) -> RouteSets {
        let mut sets = RouteSets::new();
        let mut unknown_routes = 0usize;
        let mut unknown_stops = 0usize;

        for trip in &feed.trips {
            if !feed.routes.contains_key(&trip.route_id) {
                unknown_routes += 1;
                continue;
            }
            for stop_time in &trip.stop_times {
                if !feed.stops.contains_key(&stop_time.stop_id) {
                    unknown_stops += 1;
                    continue;
                }
                sets.entry(stop_time.stop_id.clone())
                    .or_default()
                    .insert(trip.route_id.clone());
            }
        }

        if unknown_routes > 0 {
            log::warn!("Skipped {unknown_routes} trips referencing unknown routes");
        }
        if unknown_stops > 0 {
            log::warn!("Skipped {unknown_stops} stop times referencing unknown stops");
        }

        sets
    }

    /// Emits stop markers in stop id order, each with its routes in route
    /// id order. Stops no trip visits never appear.
    ///
    /// Stops without coordinates cannot be placed on the map and are
    /// dropped with a warning.
    #[must_use]
    pub fn build(&self, feed: &TransitFeed) -> Vec<StopMarker> {
        let sets = self.route_sets(feed);
        let mut markers = Vec::with_capacity(sets.len());
        let mut unplaced = 0usize;

        for (stop_id, route_ids) in &sets {
            let Some(stop) = feed.stops.get(stop_id) else {
                continue;
            };
            let Some(coordinates) = stop.coordinates else {
                unplaced += 1;
                continue;
            };

            let routes: Vec<Route> = route_ids
                .iter()
                .filter_map(|id| feed.routes.get(id))
                .map(Route::from)
                .collect();

            markers.push(StopMarker {
                id: stop.id.clone(),
                name: stop.name.clone(),
                stop_type: self.classify(&routes),
                routes,
                coordinates,
            });
        }

        if unplaced > 0 {
            log::warn!("Skipped {unplaced} served stops without coordinates");
        }
        log::info!("Built {} stop markers", markers.len());

        markers
    }

    fn classify(&self, routes: &[Route]) -> StopType {
        let serves = |marker: &str| routes.iter().any(|r| r.short_name == marker);
        StopType::from_rail_service(
            serves(&self.markers.light_rail),
            serves(&self.markers.commuter_rail),
        )
    }
}
