#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Census geography identifiers and ACS population tables.
//!
//! Boundary services and the ACS table API spell the same geography
//! differently: `TIGERweb` reports a tract as `29510101100`, the ACS as
//! `1400000US29510101100`. [`GeographyId`] always holds the long form so
//! lookups compare like with like.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Summary-level prefix the ACS puts in front of a tract `GEOID`.
pub const TRACT_PREFIX: &str = "1400000US";

/// Summary-level prefix the ACS puts in front of a county `GEOID`.
pub const COUNTY_PREFIX: &str = "0500000US";

/// A geography key in long (summary-level prefixed) form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeographyId(String);

impl GeographyId {
    /// Wraps an identifier that is already in long form (e.g. an ACS
    /// `GEO_ID` value).
    #[must_use]
    pub fn new(long_form: impl Into<String>) -> Self {
        Self(long_form.into())
    }

    /// Builds the long form from a short code and its summary-level prefix.
    #[must_use]
    pub fn from_short_code(prefix: &str, short_code: &str) -> Self {
        Self(format!("{prefix}{}", short_code.trim()))
    }

    /// Long form of a tract's short `GEOID`.
    #[must_use]
    pub fn tract(short_code: &str) -> Self {
        Self::from_short_code(TRACT_PREFIX, short_code)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The short code, if this id carries `prefix`.
    #[must_use]
    pub fn short_code(&self, prefix: &str) -> Option<&str> {
        self.0.strip_prefix(prefix)
    }
}

impl fmt::Display for GeographyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw ACS attributes for one geography.
///
/// Values are kept as the API returned them; `None` marks a JSON `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationRecord {
    pub id: GeographyId,
    pub attributes: BTreeMap<String, Option<String>>,
}

impl PopulationRecord {
    #[must_use]
    pub const fn new(id: GeographyId) -> Self {
        Self {
            id,
            attributes: BTreeMap::new(),
        }
    }

    /// The raw value of `name`, if present and not null.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Option::as_deref)
    }
}

/// Population records keyed by long-form geography id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationTable {
    records: BTreeMap<GeographyId, PopulationRecord>,
}

impl PopulationTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }

    /// Inserts a record, returning the one it replaced.
    pub fn insert(&mut self, record: PopulationRecord) -> Option<PopulationRecord> {
        self.records.insert(record.id.clone(), record)
    }

    #[must_use]
    pub fn get(&self, id: &GeographyId) -> Option<&PopulationRecord> {
        self.records.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PopulationRecord> {
        self.records.values()
    }
}

impl Extend<PopulationRecord> for PopulationTable {
    fn extend<T: IntoIterator<Item = PopulationRecord>>(&mut self, iter: T) {
        for record in iter {
            self.insert(record);
        }
    }
}

impl FromIterator<PopulationRecord> for PopulationTable {
    fn from_iter<T: IntoIterator<Item = PopulationRecord>>(iter: T) -> Self {
        let mut table = Self::new();
        table.extend(iter);
        table
    }
}
