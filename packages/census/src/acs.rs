//! American Community Survey table fetches.
//!
//! One request per configured state, restricted to that state's counties:
//!
//! ```text
//! {base_url}/{year}/{dataset}?get=GEO_ID,B01003_001E,...&for=tract:*&in=state:29&in=county:099,071
//! ```
//!
//! The response is a JSON array of string arrays whose first row is the
//! header:
//!
//! ```text
//! [["GEO_ID","B01003_001E","state","county","tract"],
//!  ["1400000US29510101100","2875","29","510","101100"], ...]
//! ```

use metro_map_census_models::{GeographyId, PopulationRecord, PopulationTable};
use metro_map_fetch::{CancellationToken, RetryingFetcher};
use serde::{Deserialize, Serialize};

use crate::{CensusError, variables};

/// Column holding the long-form geography id.
pub const GEO_ID_COLUMN: &str = "GEO_ID";

/// One state and the counties requested within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcsArea {
    /// Two-digit state FIPS code.
    pub state: String,
    /// Three-digit county FIPS codes. Empty means every county.
    #[serde(default)]
    pub counties: Vec<String>,
}

/// Which ACS table to read and for where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcsConfig {
    pub base_url: String,
    pub year: u16,
    pub dataset: String,
    /// Variables requested besides `GEO_ID`.
    pub variables: Vec<String>,
    pub areas: Vec<AcsArea>,
    /// Optional API key; the API allows a limited number of keyless
    /// requests per day.
    pub api_key: Option<String>,
}

impl Default for AcsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.census.gov/data".to_string(),
            year: 2023,
            dataset: "acs/acs5".to_string(),
            variables: variables::ALL.iter().map(ToString::to_string).collect(),
            areas: Vec::new(),
            api_key: None,
        }
    }
}

/// Fetches ACS tract tables through a [`RetryingFetcher`].
#[derive(Debug, Clone)]
pub struct AcsSource {
    fetcher: RetryingFetcher,
    config: AcsConfig,
}

impl AcsSource {
    #[must_use]
    pub const fn new(fetcher: RetryingFetcher, config: AcsConfig) -> Self {
        Self { fetcher, config }
    }

    /// Request URL for the tracts of one area.
    #[must_use]
    pub fn request_url(&self, area: &AcsArea) -> String {
        let config = &self.config;
        let mut get = vec![GEO_ID_COLUMN.to_string()];
        get.extend(
            config
                .variables
                .iter()
                .filter(|v| v.as_str() != GEO_ID_COLUMN)
                .cloned(),
        );

        let mut url = format!(
            "{}/{}/{}?get={}&for=tract:*&in=state:{}",
            config.base_url.trim_end_matches('/'),
            config.year,
            config.dataset,
            get.join(","),
            area.state,
        );
        if !area.counties.is_empty() {
            url.push_str("&in=county:");
            url.push_str(&area.counties.join(","));
        }
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            url.push_str("&key=");
            url.push_str(key);
        }
        url
    }

    /// Fetches every configured area, one request at a time, into a single
    /// table.
    ///
    /// # Errors
    ///
    /// Returns [`CensusError`] if any request fails or any response cannot
    /// be decoded.
    pub async fn fetch_table(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<PopulationTable, CensusError> {
        let mut table = PopulationTable::new();

        for area in &self.config.areas {
            let url = self.request_url(area);
            log::info!("Fetching ACS tract data for state FIPS {}...", area.state);

            let body = self.fetcher.fetch(&url, cancel).await?;
            let records = parse_table(&url, &body)?;
            log::info!("State {}: {} tract records", area.state, records.len());
            table.extend(records);
        }

        Ok(table)
    }
}

/// Decodes an ACS response body into records keyed by `GEO_ID`.
///
/// Every column other than `GEO_ID` (variables and the `state`, `county`,
/// `tract` geography columns) becomes an attribute. Rows whose width does
/// not match the header, or whose `GEO_ID` is null, are skipped.
///
/// # Errors
///
/// * [`CensusError::Decode`] if the body is not an array of string arrays
///   or has no header row.
/// * [`CensusError::MissingColumn`] if the header has no `GEO_ID`.
pub fn parse_table(url: &str, body: &[u8]) -> Result<Vec<PopulationRecord>, CensusError> {
    let rows: Vec<Vec<Option<String>>> =
        serde_json::from_slice(body).map_err(|e| CensusError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    let mut rows = rows.into_iter();
    let header: Vec<String> = rows
        .next()
        .ok_or_else(|| CensusError::Decode {
            url: url.to_string(),
            message: "response has no header row".to_string(),
        })?
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect();

    let id_idx = header
        .iter()
        .position(|h| h == GEO_ID_COLUMN)
        .ok_or_else(|| CensusError::MissingColumn {
            url: url.to_string(),
            column: GEO_ID_COLUMN,
        })?;

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for row in rows {
        if row.len() != header.len() {
            skipped += 1;
            continue;
        }
        let mut values = row.into_iter();
        let mut id = None;
        let mut record_attrs = Vec::with_capacity(header.len().saturating_sub(1));
        for (i, name) in header.iter().enumerate() {
            let value = values.next().flatten();
            if i == id_idx {
                id = value;
            } else {
                record_attrs.push((name.clone(), value));
            }
        }
        let Some(id) = id.filter(|id| !id.is_empty()) else {
            skipped += 1;
            continue;
        };
        records.push(PopulationRecord {
            id: GeographyId::new(id),
            attributes: record_attrs.into_iter().collect(),
        });
    }

    if skipped > 0 {
        log::warn!("Skipped {skipped} malformed ACS rows from {url}");
    }

    Ok(records)
}
