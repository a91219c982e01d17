//! Result rows to features.

use metro_map_geometry_models::{
    Feature, FeatureCollection, Geometry, GeometryError, Properties, PropertyValue,
};

use crate::{CellValue, ResultSet, SpatialError};

/// Maps every row of `rows` into a [`Feature`].
///
/// The geometry column is located once, before any row is read. Every other
/// column becomes a property keyed by column name with its type preserved.
/// Rows whose geometry is null or empty are skipped.
///
/// # Errors
///
/// * [`SpatialError::MissingColumn`] if `geometry_column` is not in the
///   result schema; no row is consumed in that case.
/// * [`SpatialError::UnsupportedGeometry`] / [`SpatialError::InvalidGeometry`]
///   if a geometry cell cannot be normalized.
/// * Any row iteration error, which aborts the remainder of the result.
pub fn map_rows<R: ResultSet + ?Sized>(
    rows: &mut R,
    geometry_column: &str,
) -> Result<FeatureCollection, SpatialError> {
    let columns = rows.columns().to_vec();
    let geom_idx = columns
        .iter()
        .position(|c| c == geometry_column)
        .ok_or_else(|| SpatialError::MissingColumn {
            column: geometry_column.to_string(),
            available: columns.clone(),
        })?;

    let mut collection = FeatureCollection::new();
    let mut skipped = 0usize;
    let mut row_idx = 0usize;

    while let Some(cells) = rows.next_row()? {
        if cells.len() != columns.len() {
            return Err(SpatialError::RowShape {
                row: row_idx,
                expected: columns.len(),
                found: cells.len(),
            });
        }

        let mut geometry = None;
        let mut feature_props = Properties::new();

        for (i, cell) in cells.into_iter().enumerate() {
            if i == geom_idx {
                geometry = normalize_geometry(cell, geometry_column, row_idx)?;
            } else {
                feature_props.insert(columns[i].clone(), property_from_cell(cell));
            }
        }

        match geometry {
            Some(geometry) => collection.push(Feature {
                geometry,
                properties: feature_props,
            }),
            None => skipped += 1,
        }
        row_idx += 1;
    }

    if skipped > 0 {
        log::debug!("skipped {skipped} of {row_idx} rows with empty {geometry_column:?}");
    }

    Ok(collection)
}

/// Normalizes a geometry cell. `Ok(None)` means the row has no geometry.
fn normalize_geometry(
    cell: CellValue,
    column: &str,
    row: usize,
) -> Result<Option<Geometry>, SpatialError> {
    let invalid = |source: GeometryError| SpatialError::InvalidGeometry {
        column: column.to_string(),
        row,
        source,
    };

    match cell {
        CellValue::Null => Ok(None),
        CellValue::Json(serde_json::Value::Null) => Ok(None),
        CellValue::Text(text) if text.trim().is_empty() => Ok(None),
        CellValue::Blob(bytes) if bytes.is_empty() => Ok(None),
        CellValue::Text(text) => Geometry::from_geojson_str(&text).map(Some).map_err(invalid),
        CellValue::Blob(bytes) => {
            let text = std::str::from_utf8(&bytes).map_err(|_| SpatialError::UnsupportedGeometry {
                column: column.to_string(),
                kind: "non-UTF-8 blob",
            })?;
            if text.trim().is_empty() {
                return Ok(None);
            }
            Geometry::from_geojson_str(text).map(Some).map_err(invalid)
        }
        CellValue::Json(value) => Geometry::from_geojson_value(value)
            .map(Some)
            .map_err(invalid),
        other @ (CellValue::Boolean(_) | CellValue::Integer(_) | CellValue::Double(_)) => {
            Err(SpatialError::UnsupportedGeometry {
                column: column.to_string(),
                kind: other.kind(),
            })
        }
    }
}

fn property_from_cell(cell: CellValue) -> PropertyValue {
    match cell {
        CellValue::Null => PropertyValue::Null,
        CellValue::Boolean(b) => PropertyValue::Bool(b),
        CellValue::Integer(i) => PropertyValue::Integer(i),
        CellValue::Double(d) => PropertyValue::Number(d),
        CellValue::Text(s) => PropertyValue::String(s),
        CellValue::Blob(bytes) => PropertyValue::String(hex::encode(bytes)),
        CellValue::Json(value) => PropertyValue::from(value),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// In-memory result set that counts how many rows were pulled.
    struct VecResultSet {
        columns: Vec<String>,
        rows: VecDeque<Result<Vec<CellValue>, SpatialError>>,
        consumed: usize,
    }

    impl VecResultSet {
        fn new(columns: &[&str], rows: Vec<Vec<CellValue>>) -> Self {
            Self {
                columns: columns.iter().map(ToString::to_string).collect(),
                rows: rows.into_iter().map(Ok).collect(),
                consumed: 0,
            }
        }
    }

    impl ResultSet for VecResultSet {
        fn columns(&self) -> &[String] {
            &self.columns
        }

        fn next_row(&mut self) -> Result<Option<Vec<CellValue>>, SpatialError> {
            match self.rows.pop_front() {
                Some(row) => {
                    self.consumed += 1;
                    row.map(Some)
                }
                None => Ok(None),
            }
        }
    }

    const POINT: &str = r#"{"type":"Point","coordinates":[-90.25,38.63]}"#;
    const LINE: &str = r#"{"type":"LineString","coordinates":[[-90.3,38.6],[-90.29,38.61]]}"#;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn missing_geometry_column_fails_before_reading_rows() {
        let mut rs = VecResultSet::new(
            &["osm_id", "name", "way"],
            vec![vec![CellValue::Integer(1), text("Schnucks"), text(POINT)]],
        );

        let err = map_rows(&mut rs, "geom").unwrap_err();

        assert!(matches!(err, SpatialError::MissingColumn { ref column, .. } if column == "geom"));
        assert_eq!(rs.consumed, 0);
    }

    #[test]
    fn maps_properties_with_types_preserved() {
        let mut rs = VecResultSet::new(
            &["osm_id", "name", "lit", "width", "note", "geom"],
            vec![vec![
                CellValue::Integer(42),
                text("Grant's Trail"),
                CellValue::Boolean(true),
                CellValue::Double(3.5),
                CellValue::Null,
                text(LINE),
            ]],
        );

        let features = map_rows(&mut rs, "geom").unwrap();

        assert_eq!(features.len(), 1);
        let feature = &features.features[0];
        assert_eq!(feature.property("osm_id"), Some(&PropertyValue::Integer(42)));
        assert_eq!(
            feature.property("name"),
            Some(&PropertyValue::String("Grant's Trail".to_string()))
        );
        assert_eq!(feature.property("lit"), Some(&PropertyValue::Bool(true)));
        assert_eq!(feature.property("width"), Some(&PropertyValue::Number(3.5)));
        assert_eq!(feature.property("note"), Some(&PropertyValue::Null));
        assert!(feature.property("geom").is_none());
        assert!(matches!(feature.geometry, Geometry::Line { .. }));
    }

    #[test]
    fn empty_geometry_rows_are_skipped() {
        let mut rs = VecResultSet::new(
            &["osm_id", "geom"],
            vec![
                vec![CellValue::Integer(1), text(POINT)],
                vec![CellValue::Integer(2), CellValue::Null],
                vec![CellValue::Integer(3), text("")],
                vec![CellValue::Integer(4), CellValue::Blob(Vec::new())],
                vec![CellValue::Integer(5), CellValue::Blob(POINT.as_bytes().to_vec())],
            ],
        );

        let features = map_rows(&mut rs, "geom").unwrap();

        assert_eq!(features.len(), 5 - 3);
        let ids: Vec<_> = features
            .iter()
            .map(|f| f.property("osm_id").cloned())
            .collect();
        assert_eq!(
            ids,
            vec![Some(PropertyValue::Integer(1)), Some(PropertyValue::Integer(5))]
        );
    }

    #[test]
    fn accepts_structured_geometry() {
        let mut rs = VecResultSet::new(
            &["geom", "name"],
            vec![vec![
                CellValue::Json(serde_json::from_str(POINT).unwrap()),
                text("Civic Center"),
            ]],
        );

        let features = map_rows(&mut rs, "geom").unwrap();

        assert!(matches!(features.features[0].geometry, Geometry::Point { .. }));
    }

    #[test]
    fn unsupported_geometry_representation_is_fatal() {
        let mut rs = VecResultSet::new(
            &["osm_id", "geom"],
            vec![vec![CellValue::Integer(1), CellValue::Integer(7)]],
        );

        let err = map_rows(&mut rs, "geom").unwrap_err();

        assert_eq!(
            err.to_string(),
            r#"Geometry column "geom" has unsupported representation integer"#
        );
    }

    #[test]
    fn invalid_geojson_names_row() {
        let mut rs = VecResultSet::new(
            &["geom"],
            vec![vec![text(POINT)], vec![text("{not json")]],
        );

        let err = map_rows(&mut rs, "geom").unwrap_err();

        assert!(matches!(err, SpatialError::InvalidGeometry { row: 1, .. }));
    }

    #[test]
    fn row_errors_abort_iteration() {
        let mut rs = VecResultSet::new(&["geom"], vec![vec![text(POINT)]]);
        rs.rows.push_back(Err(SpatialError::RowShape {
            row: 1,
            expected: 1,
            found: 0,
        }));
        rs.rows.push_back(Ok(vec![text(POINT)]));

        assert!(map_rows(&mut rs, "geom").is_err());
        assert_eq!(rs.consumed, 2);
    }

    #[test]
    fn blob_properties_become_hex() {
        let mut rs = VecResultSet::new(
            &["tags", "geom"],
            vec![vec![CellValue::Blob(vec![0xde, 0xad]), text(POINT)]],
        );

        let features = map_rows(&mut rs, "geom").unwrap();

        assert_eq!(
            features.features[0].property("tags"),
            Some(&PropertyValue::String("dead".to_string()))
        );
    }
}
