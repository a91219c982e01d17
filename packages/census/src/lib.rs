#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Census demographics for tract boundaries.
//!
//! [`acs::AcsSource`] downloads ACS 5-year estimates for the configured
//! states and counties into a [`PopulationTable`], and
//! [`join::DemographicJoiner`] attaches them to the tract features fetched
//! from `TIGERweb`, deriving population density and two percentage ratios.
//!
//! [`PopulationTable`]: metro_map_census_models::PopulationTable

pub mod acs;
pub mod join;

use metro_map_fetch::FetchError;

pub use acs::{AcsArea, AcsConfig, AcsSource};
pub use join::DemographicJoiner;

/// ACS variable codes used by the tract join.
pub mod variables {
    /// Total population.
    pub const TOTAL_POPULATION: &str = "B01003_001E";
    /// Median income in the past 12 months.
    pub const MEDIAN_INCOME: &str = "B06011_001E";
    /// Median age.
    pub const MEDIAN_AGE: &str = "B01002_001E";
    /// Median gross rent.
    pub const MEDIAN_GROSS_RENT: &str = "B25064_001E";
    /// Income in the past 12 months below poverty level.
    pub const BELOW_POVERTY: &str = "B17001_002E";
    /// Households with a computer.
    pub const HAS_COMPUTER: &str = "B28008_002E";

    /// Every variable the join reads.
    pub const ALL: [&str; 6] = [
        TOTAL_POPULATION,
        MEDIAN_INCOME,
        MEDIAN_AGE,
        MEDIAN_GROSS_RENT,
        BELOW_POVERTY,
        HAS_COMPUTER,
    ];
}

/// Errors that can occur while loading census data.
#[derive(Debug, thiserror::Error)]
pub enum CensusError {
    /// The request failed or was cancelled.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The response was not an ACS table.
    #[error("Failed to decode ACS response from {url}: {message}")]
    Decode {
        /// Request URL.
        url: String,
        /// Description of the decode failure.
        message: String,
    },

    /// The ACS table lacks a required column.
    #[error("ACS response from {url} has no {column} column")]
    MissingColumn {
        /// Request URL.
        url: String,
        /// Missing column name.
        column: &'static str,
    },
}
