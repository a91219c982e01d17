//! Static feed zip reader.
//!
//! Only the four files needed for stop markers are read: `stops.txt`,
//! `routes.txt`, `trips.txt` and `stop_times.txt`. Rows that fail to
//! deserialize or lack their id are skipped and counted.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use metro_map_geometry_models::Coordinates;
use metro_map_transit_models::{FeedRoute, FeedStop, StopTime, TransitFeed, Trip};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::TransitError;

#[derive(Debug, Deserialize)]
struct StopRow {
    stop_id: String,
    #[serde(default)]
    stop_name: Option<String>,
    #[serde(default)]
    stop_lat: Option<f64>,
    #[serde(default)]
    stop_lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RouteRow {
    route_id: String,
    #[serde(default)]
    route_short_name: Option<String>,
    #[serde(default)]
    route_long_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TripRow {
    route_id: String,
    trip_id: String,
}

#[derive(Debug, Deserialize)]
struct StopTimeRow {
    trip_id: String,
    stop_id: String,
    stop_sequence: u32,
}

/// Parses a static feed from the bytes of its zip archive.
///
/// # Errors
///
/// * [`TransitError::Archive`] if the bytes are not a readable zip.
/// * [`TransitError::MissingFile`] if one of the required files is absent.
/// * [`TransitError::Csv`] if a file's header row cannot be read.
pub fn read_feed(bytes: &[u8]) -> Result<TransitFeed, TransitError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    let stops = read_rows::<StopRow, _>(&mut archive, "stops.txt")?
        .into_iter()
        .filter(|row| !row.stop_id.is_empty())
        .map(|row| {
            let coordinates = match (row.stop_lat, row.stop_lon) {
                (Some(latitude), Some(longitude)) => Some(Coordinates {
                    latitude,
                    longitude,
                }),
                _ => None,
            };
            let stop = FeedStop {
                id: row.stop_id,
                name: row.stop_name.unwrap_or_default(),
                coordinates,
            };
            (stop.id.clone(), stop)
        })
        .collect::<BTreeMap<_, _>>();
    log::info!("Parsed {} stops", stops.len());

    let routes = read_rows::<RouteRow, _>(&mut archive, "routes.txt")?
        .into_iter()
        .filter(|row| !row.route_id.is_empty())
        .map(|row| {
            let route = FeedRoute {
                id: row.route_id,
                short_name: row.route_short_name.unwrap_or_default(),
                long_name: row.route_long_name.unwrap_or_default(),
            };
            (route.id.clone(), route)
        })
        .collect::<BTreeMap<_, _>>();
    log::info!("Parsed {} routes", routes.len());

    let mut trips = read_rows::<TripRow, _>(&mut archive, "trips.txt")?
        .into_iter()
        .filter(|row| !row.trip_id.is_empty())
        .map(|row| {
            (
                row.trip_id.clone(),
                Trip {
                    id: row.trip_id,
                    route_id: row.route_id,
                    stop_times: Vec::new(),
                },
            )
        })
        .collect::<BTreeMap<_, _>>();
    log::info!("Parsed {} trips", trips.len());

    let mut orphaned = 0usize;
    let mut total = 0usize;
    for row in read_rows::<StopTimeRow, _>(&mut archive, "stop_times.txt")? {
        let Some(trip) = trips.get_mut(&row.trip_id) else {
            orphaned += 1;
            continue;
        };
        trip.stop_times.push(StopTime {
            stop_id: row.stop_id,
            stop_sequence: row.stop_sequence,
        });
        total += 1;
    }
    if orphaned > 0 {
        log::warn!("Skipped {orphaned} stop_times.txt rows for unknown trips");
    }
    log::info!("Parsed {total} stop times");

    let trips = trips
        .into_values()
        .map(|mut trip| {
            trip.stop_times.sort_by_key(|st| st.stop_sequence);
            trip
        })
        .collect();

    Ok(TransitFeed {
        stops,
        routes,
        trips,
    })
}

fn read_rows<T, R>(
    archive: &mut zip::ZipArchive<R>,
    name: &'static str,
) -> Result<Vec<T>, TransitError>
where
    T: DeserializeOwned,
    R: Read + std::io::Seek,
{
    let file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(TransitError::MissingFile { name });
        }
        Err(e) => return Err(e.into()),
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);
    reader
        .headers()
        .map_err(|source| TransitError::Csv { file: name, source })?;

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for result in reader.deserialize::<T>() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => {
                log::trace!("  skipping malformed {name} row: {e}");
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        log::warn!("Skipped {skipped} malformed rows in {name}");
    }

    Ok(rows)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io::Write;

    /// Builds an in-memory zip from `(name, contents)` pairs.
    pub fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, contents) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    pub const STOPS: &str = "stop_id,stop_name,stop_lat,stop_lon,location_type\n\
        14120,Civic Center MetroLink Station,38.6243,-90.2059,0\n\
        15000,Grand & Lindell,38.6396,-90.2333,0\n\
        99999,Depot (no service),38.6,-90.3,0\n";

    pub const ROUTES: &str = "route_id,agency_id,route_short_name,route_long_name,route_type\n\
        MLR,METRO,MLR,MetroLink Red Line,2\n\
        MLB,METRO,MLB,MetroLink Blue Line,2\n\
        70,METRO,70,Grand,3\n";

    pub const TRIPS: &str = "route_id,service_id,trip_id,direction_id\n\
        MLR,WK,T1,0\n\
        MLB,WK,T2,0\n\
        70,WK,T3,1\n\
        70,WK,T4,0\n";

    pub const STOP_TIMES: &str =
        "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
        T1,08:00:00,08:00:00,14120,1\n\
        T2,08:10:00,08:10:00,14120,1\n\
        T3,08:05:00,08:05:00,15000,2\n\
        T3,08:00:00,08:00:00,14120,1\n\
        T4,09:00:00,09:00:00,15000,1\n";

    pub fn feed_zip() -> Vec<u8> {
        zip_bytes(&[
            ("stops.txt", STOPS),
            ("routes.txt", ROUTES),
            ("trips.txt", TRIPS),
            ("stop_times.txt", STOP_TIMES),
        ])
    }
}
