//! `DuckDB` access for spatial layers.
//!
//! Each layer query opens its own read-only connection, maps the rows and
//! drops the connection before returning, whether the mapping succeeded or
//! not. Geometry is expected as `GeoJSON` (e.g. a `TEXT` column or an
//! `ST_AsGeoJSON(...)` projection).

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta};
use duckdb::Connection;
use duckdb::types::{TimeUnit, ValueRef};
use metro_map_geometry_models::FeatureCollection;

use crate::{CellValue, ResultSet, SpatialError, SpatialLayer, map_rows};

/// [`ResultSet`] over a live `duckdb::Rows` cursor.
pub struct DuckDbResultSet<'stmt> {
    rows: duckdb::Rows<'stmt>,
    columns: Vec<String>,
}

impl<'stmt> DuckDbResultSet<'stmt> {
    /// Wraps an executed query's rows, capturing the result schema.
    #[must_use]
    pub fn new(rows: duckdb::Rows<'stmt>) -> Self {
        let columns = rows
            .as_ref()
            .map(|stmt| stmt.column_names())
            .unwrap_or_default();
        Self { rows, columns }
    }
}

impl ResultSet for DuckDbResultSet<'_> {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<CellValue>>, SpatialError> {
        let width = self.columns.len();
        let Some(row) = self.rows.next()? else {
            return Ok(None);
        };
        let cells = (0..width)
            .map(|i| row.get_ref(i).map(cell_from_ref))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(cells))
    }
}

#[allow(clippy::cast_precision_loss)]
fn cell_from_ref(value: ValueRef<'_>) -> CellValue {
    match value {
        ValueRef::Null => CellValue::Null,
        ValueRef::Boolean(b) => CellValue::Boolean(b),
        ValueRef::TinyInt(i) => CellValue::Integer(i.into()),
        ValueRef::SmallInt(i) => CellValue::Integer(i.into()),
        ValueRef::Int(i) => CellValue::Integer(i.into()),
        ValueRef::BigInt(i) => CellValue::Integer(i),
        ValueRef::HugeInt(i) => {
            i64::try_from(i).map_or(CellValue::Double(i as f64), CellValue::Integer)
        }
        ValueRef::UTinyInt(i) => CellValue::Integer(i.into()),
        ValueRef::USmallInt(i) => CellValue::Integer(i.into()),
        ValueRef::UInt(i) => CellValue::Integer(i.into()),
        ValueRef::UBigInt(i) => {
            i64::try_from(i).map_or(CellValue::Double(i as f64), CellValue::Integer)
        }
        ValueRef::Float(f) => CellValue::Double(f.into()),
        ValueRef::Double(f) => CellValue::Double(f),
        ValueRef::Text(bytes) => CellValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => CellValue::Blob(bytes.to_vec()),
        ValueRef::Decimal(d) => d
            .to_string()
            .parse()
            .map_or_else(|_| CellValue::Text(d.to_string()), CellValue::Double),
        ValueRef::Date32(days) => date_cell(days),
        ValueRef::Timestamp(unit, value) => timestamp_cell(micros(unit, value)),
        ValueRef::Time64(unit, value) => time_cell(micros(unit, value)),
        // Intervals, enums and nested types have no scalar counterpart
        other => CellValue::Text(format!("{:?}", duckdb::types::Value::from(other))),
    }
}

const fn micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

fn date_cell(days: i32) -> CellValue {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .and_then(|epoch| epoch.checked_add_signed(TimeDelta::days(days.into())))
        .map_or(CellValue::Null, |date| {
            CellValue::Text(date.format("%Y-%m-%d").to_string())
        })
}

fn timestamp_cell(micros: i64) -> CellValue {
    DateTime::from_timestamp_micros(micros).map_or(CellValue::Null, |ts| {
        CellValue::Text(ts.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string())
    })
}

fn time_cell(micros: i64) -> CellValue {
    let secs = u32::try_from(micros.div_euclid(1_000_000)).ok();
    let nanos = u32::try_from(micros.rem_euclid(1_000_000) * 1_000).ok();
    secs.zip(nanos)
        .and_then(|(secs, nanos)| NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos))
        .map_or(CellValue::Null, |time| {
            CellValue::Text(time.format("%H:%M:%S%.f").to_string())
        })
}

/// Opens the spatial database read-only and loads `extensions` (e.g.
/// `spatial`, which provides `ST_AsGeoJSON`).
///
/// # Errors
///
/// Returns [`SpatialError`] if the file cannot be opened or an extension
/// fails to load.
pub fn open(path: &Path, extensions: &[String]) -> Result<Connection, SpatialError> {
    let config = duckdb::Config::default().access_mode(duckdb::AccessMode::ReadOnly)?;
    let conn = Connection::open_with_flags(path, config)?;
    for extension in extensions {
        conn.execute_batch(&format!("LOAD {extension};"))?;
    }
    Ok(conn)
}

/// Runs one layer query on `conn` and maps its rows into features.
///
/// # Errors
///
/// Returns [`SpatialError`] if the query fails or any row cannot be mapped.
pub fn query_layer(
    conn: &Connection,
    layer: &SpatialLayer,
) -> Result<FeatureCollection, SpatialError> {
    let mut stmt = conn.prepare(&layer.sql)?;
    let rows = stmt.query(duckdb::params_from_iter(layer.params.iter()))?;
    let mut result_set = DuckDbResultSet::new(rows);

    let features = map_rows(&mut result_set, &layer.geometry_column)?;
    log::info!("{}: loaded {} features", layer.name, features.len());
    Ok(features)
}

/// Opens `path`, runs the layer query and releases the connection.
///
/// # Errors
///
/// Returns [`SpatialError`] if the database cannot be opened, the query
/// fails or any row cannot be mapped.
pub fn load_layer(
    path: &Path,
    extensions: &[String],
    layer: &SpatialLayer,
) -> Result<FeatureCollection, SpatialError> {
    log::info!("{}: querying {}", layer.name, path.display());
    let conn = open(path, extensions)?;
    query_layer(&conn, layer)
}

#[cfg(test)]
mod tests {
    use metro_map_geometry_models::{Geometry, PropertyValue};

    use super::*;

    fn fixture() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE planet_osm_polygon (osm_id BIGINT, name TEXT, shop TEXT, area DOUBLE, geom TEXT);
            INSERT INTO planet_osm_polygon VALUES
                (1, 'Schnucks', 'supermarket', 1200.5, '{"type":"Point","coordinates":[-90.25,38.63]}'),
                (2, 'Corner Store', 'convenience', 80.0, '{"type":"Point","coordinates":[-90.2,38.6]}'),
                (3, 'Dierbergs', 'supermarket', NULL, NULL);
            "#,
        )
        .unwrap();
        conn
    }

    fn grocery() -> SpatialLayer {
        SpatialLayer {
            name: "grocery".to_string(),
            sql: "SELECT osm_id, name, area, geom FROM planet_osm_polygon WHERE shop = ? ORDER BY osm_id"
                .to_string(),
            geometry_column: "geom".to_string(),
            params: vec!["supermarket".to_string()],
        }
    }

    #[test]
    fn query_layer_maps_duckdb_rows() {
        let conn = fixture();

        let features = query_layer(&conn, &grocery()).unwrap();

        assert_eq!(features.len(), 1);
        let feature = &features.features[0];
        assert_eq!(feature.property("osm_id"), Some(&PropertyValue::Integer(1)));
        assert_eq!(
            feature.property("name"),
            Some(&PropertyValue::String("Schnucks".to_string()))
        );
        assert_eq!(feature.property("area"), Some(&PropertyValue::Number(1200.5)));
        assert!(matches!(feature.geometry, Geometry::Point { .. }));
    }

    #[test]
    fn decimal_and_temporal_columns_keep_their_meaning() {
        let conn = Connection::open_in_memory().unwrap();
        let layer = SpatialLayer {
            name: "grocery".to_string(),
            sql: r#"
                SELECT CAST(12.50 AS DECIMAL(6,2)) AS price,
                       DATE '2024-01-02' AS opened,
                       TIMESTAMP '2024-01-02 03:04:05' AS surveyed,
                       '{"type":"Point","coordinates":[-90.25,38.63]}' AS geom
            "#
            .to_string(),
            geometry_column: "geom".to_string(),
            params: Vec::new(),
        };

        let features = query_layer(&conn, &layer).unwrap();

        let feature = &features.features[0];
        assert_eq!(feature.property("price"), Some(&PropertyValue::Number(12.5)));
        assert_eq!(
            feature.property("opened"),
            Some(&PropertyValue::String("2024-01-02".to_string()))
        );
        let Some(PropertyValue::String(surveyed)) = feature.property("surveyed") else {
            panic!("timestamp should render as text");
        };
        assert!(surveyed.starts_with("2024-01-02T03:04:05"), "{surveyed}");
    }

    #[test]
    fn temporal_cells_render_iso_8601() {
        assert_eq!(date_cell(19_724), CellValue::Text("2024-01-02".to_string()));
        assert_eq!(date_cell(-1), CellValue::Text("1969-12-31".to_string()));
        assert_eq!(
            time_cell(micros(TimeUnit::Second, 3_723)),
            CellValue::Text("01:02:03".to_string())
        );
        assert_eq!(
            timestamp_cell(micros(TimeUnit::Millisecond, 1_704_164_645_000)),
            CellValue::Text("2024-01-02T03:04:05".to_string())
        );
    }

    #[test]
    fn result_set_reports_projection_columns() {
        let conn = fixture();
        let mut stmt = conn.prepare("SELECT name, geom FROM planet_osm_polygon").unwrap();
        let rows = stmt.query(duckdb::params![]).unwrap();

        let result_set = DuckDbResultSet::new(rows);

        assert_eq!(result_set.columns(), ["name".to_string(), "geom".to_string()]);
    }

    #[test]
    fn misnamed_geometry_column_is_a_schema_error() {
        let conn = fixture();
        let layer = SpatialLayer {
            geometry_column: "way".to_string(),
            ..grocery()
        };

        let err = query_layer(&conn, &layer).unwrap_err();

        assert!(matches!(err, SpatialError::MissingColumn { .. }));
    }
}
