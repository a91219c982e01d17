#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Point-of-interest layers from the spatial database.
//!
//! Layer queries are plain SQL with an arbitrary projection: one column
//! holds the geometry (as `GeoJSON` text, bytes or a structured value) and
//! every other column becomes a feature property. No schema is declared
//! up front; [`mapper::map_rows`] works from the result set's column names
//! and the tagged [`CellValue`]s of each row.

pub mod db;
pub mod mapper;

use metro_map_geometry_models::GeometryError;
use serde::{Deserialize, Serialize};

pub use mapper::map_rows;

/// Errors that can occur while reading a spatial layer.
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    /// The designated geometry column is not in the result schema.
    #[error("Geometry column {column:?} not found (columns: {available:?})")]
    MissingColumn {
        /// Column that was requested.
        column: String,
        /// Columns the result set actually has.
        available: Vec<String>,
    },

    /// The geometry cell arrived in a representation we cannot normalize.
    #[error("Geometry column {column:?} has unsupported representation {kind}")]
    UnsupportedGeometry {
        /// Geometry column name.
        column: String,
        /// Concrete shape of the value (e.g. `"integer"`).
        kind: &'static str,
    },

    /// The geometry cell could not be parsed.
    #[error("Invalid geometry in column {column:?} at row {row}: {source}")]
    InvalidGeometry {
        /// Geometry column name.
        column: String,
        /// Zero-based row index.
        row: usize,
        /// Underlying parse error.
        #[source]
        source: GeometryError,
    },

    /// A row had a different number of cells than the result schema.
    #[error("Row {row} has {found} cells but the result has {expected} columns")]
    RowShape {
        /// Zero-based row index.
        row: usize,
        /// Number of columns in the schema.
        expected: usize,
        /// Number of cells in the row.
        found: usize,
    },
}

/// One cell of a result row, tagged by its decoded type.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// SQL `NULL`.
    Null,
    /// Boolean.
    Boolean(bool),
    /// Any integer type that fits in 64 bits.
    Integer(i64),
    /// Floating point or out-of-range integer.
    Double(f64),
    /// Text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
    /// An already-structured value (e.g. a `JSON` column).
    Json(serde_json::Value),
}

impl CellValue {
    /// Short name of the cell's representation, used in error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Double(_) => "double",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
            Self::Json(_) => "json",
        }
    }
}

/// An open query result: column names plus fallible row iteration.
///
/// Implementations own whatever database handle backs the rows; dropping
/// the result set releases it.
pub trait ResultSet {
    /// Column names in projection order.
    fn columns(&self) -> &[String];

    /// Reads the next row, or `None` once the result is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the underlying cursor fails.
    fn next_row(&mut self) -> Result<Option<Vec<CellValue>>, SpatialError>;
}

/// A named spatial layer query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialLayer {
    /// Layer name, used as the output key (e.g. `"bikes"`).
    pub name: String,
    /// SQL producing one row per feature.
    pub sql: String,
    /// Column holding the geometry.
    #[serde(default = "default_geometry_column")]
    pub geometry_column: String,
    /// Positional query parameters.
    #[serde(default)]
    pub params: Vec<String>,
}

fn default_geometry_column() -> String {
    "geom".to_string()
}
