//! Joins ACS attributes onto tract boundaries.

use metro_map_census_models::{GeographyId, PopulationRecord, PopulationTable, TRACT_PREFIX};
use metro_map_geometry_models::{Feature, FeatureCollection, PropertyValue};

use crate::variables;

/// Square meters in one square mile, as used for `POPLSQMI`.
pub const SQ_METERS_PER_SQ_MILE: f64 = 2_589_988.0;

/// ACS annotation values (e.g. `-666666666`) stand in for missing
/// estimates; anything at or below this is treated as absent.
const ANNOTATION_THRESHOLD: f64 = -100_000_000.0;

/// Identifying attributes copied from the boundary feature.
const TRACT_ATTRIBUTES: [&str; 4] = ["GEOID", "TRACT", "COUNTY", "AREALAND"];

/// Output attribute name for each raw ACS variable.
const DEMOGRAPHIC_ATTRIBUTES: [(&str, &str); 5] = [
    ("INCOME", variables::MEDIAN_INCOME),
    ("AGE", variables::MEDIAN_AGE),
    ("MGRENT", variables::MEDIAN_GROSS_RENT),
    ("INC_BELOW_POV", variables::BELOW_POVERTY),
    ("HAS_COMP", variables::HAS_COMPUTER),
];

const DERIVED_ATTRIBUTES: [&str; 3] = ["POPLSQMI", "PCT_HAS_COMP", "PCT_INC_BELOW_POV"];

/// Rounds to two decimal places.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Persons per square mile for a land area given in square meters.
///
/// Zero when the area is zero, negative or not a finite number.
#[must_use]
pub fn population_density(population: f64, area_sq_meters: f64) -> f64 {
    if !area_sq_meters.is_finite() || area_sq_meters <= 0.0 {
        return 0.0;
    }
    round2(population / (area_sq_meters / SQ_METERS_PER_SQ_MILE))
}

/// `numerator / denominator` as a percentage rounded to two decimals.
///
/// Zero when either side is missing or the denominator is zero.
#[must_use]
pub fn percentage(numerator: Option<f64>, denominator: Option<f64>) -> f64 {
    match (numerator, denominator) {
        (Some(num), Some(den)) if den != 0.0 => round2(100.0 * num / den),
        _ => 0.0,
    }
}

/// Parses a raw ACS estimate. Blank, non-numeric and annotation values are
/// `None`.
fn estimate(record: &PopulationRecord, variable: &str) -> Option<f64> {
    record
        .attribute(variable)
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > ANNOTATION_THRESHOLD)
}

/// Attaches demographic attributes from a [`PopulationTable`] to tract
/// boundary features.
///
/// Each tract's short `GEOID` is lengthened with the summary-level prefix
/// before lookup. Tracts without a matching record are kept with null
/// demographic and derived attributes.
#[derive(Debug, Clone)]
pub struct DemographicJoiner {
    prefix: String,
}

impl Default for DemographicJoiner {
    fn default() -> Self {
        Self::new(TRACT_PREFIX)
    }
}

impl DemographicJoiner {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Joins every tract, preserving input order.
    #[must_use]
    pub fn join(&self, tracts: &FeatureCollection, table: &PopulationTable) -> FeatureCollection {
        let mut unmatched = 0usize;

        let joined: FeatureCollection = tracts
            .iter()
            .map(|tract| {
                let record = tract
                    .property("GEOID")
                    .and_then(PropertyValue::as_text)
                    .map(|short| GeographyId::from_short_code(&self.prefix, &short))
                    .and_then(|id| table.get(&id));
                if record.is_none() {
                    unmatched += 1;
                }
                join_tract(tract, record)
            })
            .collect::<Vec<_>>()
            .into();

        if unmatched > 0 {
            log::warn!(
                "{unmatched} of {} tracts have no ACS record; demographics left null",
                joined.len()
            );
        }
        log::info!("Joined demographics onto {} tracts", joined.len());

        joined
    }
}

fn join_tract(tract: &Feature, record: Option<&PopulationRecord>) -> Feature {
    let mut feature = Feature::new(tract.geometry.clone());

    for name in TRACT_ATTRIBUTES {
        let value = tract.property(name).cloned().unwrap_or(PropertyValue::Null);
        feature.set_property(name, value);
    }

    let Some(record) = record else {
        feature.set_property("POPL", PropertyValue::Null);
        for (name, _) in DEMOGRAPHIC_ATTRIBUTES {
            feature.set_property(name, PropertyValue::Null);
        }
        for name in DERIVED_ATTRIBUTES {
            feature.set_property(name, PropertyValue::Null);
        }
        return feature;
    };

    let population = estimate(record, variables::TOTAL_POPULATION);
    let area = tract
        .property("AREALAND")
        .and_then(PropertyValue::as_f64)
        .unwrap_or(0.0);

    feature.set_property("POPL", population.unwrap_or(0.0));
    for (name, variable) in DEMOGRAPHIC_ATTRIBUTES {
        feature.set_property(name, estimate(record, variable));
    }

    feature.set_property(
        "POPLSQMI",
        population_density(population.unwrap_or(0.0), area),
    );
    feature.set_property(
        "PCT_HAS_COMP",
        percentage(estimate(record, variables::HAS_COMPUTER), population),
    );
    feature.set_property(
        "PCT_INC_BELOW_POV",
        percentage(estimate(record, variables::BELOW_POVERTY), population),
    );

    feature
}
