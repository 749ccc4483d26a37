//! Per-month join of case metrics onto district features.
//!
//! The merge reads the loaded datasets and builds a fresh result; nothing
//! from one month's merge can leak into the next.

use serde::Serialize;
use tracing::{debug, warn};

use crate::cases::{CaseDataset, CaseRecord, derive_incidence};
use crate::error::{MapError, Result};
use crate::geo::DistrictFeature;
use crate::month::YearMonth;
use crate::scale::Metric;

/// How to resolve several case rows for one district in one month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Fail the merge.
    #[default]
    Reject,
    /// Keep the row that appears last in the table.
    Last,
    /// Add the case counts and derive incidence from the total.
    Sum,
}

/// Case values attached to one district for one month.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DistrictValues {
    pub cases: Option<u64>,
    pub population: Option<f64>,
    pub incidence: Option<f64>,
}

/// A district feature with its month's values, or no data.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedView<'a> {
    pub feature: &'a DistrictFeature,
    /// `None` when the case table has no row for this district and month.
    pub values: Option<DistrictValues>,
}

impl MergedView<'_> {
    pub fn key(&self) -> &str {
        &self.feature.key
    }

    pub fn label(&self) -> &str {
        &self.feature.label
    }

    pub fn has_data(&self) -> bool {
        self.values.is_some()
    }

    pub fn cases(&self) -> Option<u64> {
        self.values.and_then(|v| v.cases)
    }

    pub fn population(&self) -> Option<f64> {
        self.values.and_then(|v| v.population)
    }

    pub fn incidence(&self) -> Option<f64> {
        self.values.and_then(|v| v.incidence)
    }

    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Incidence => self.incidence(),
            Metric::Cases => self.cases().map(|c| c as f64),
        }
    }
}

/// Joins one month of `cases` onto `features`.
///
/// The output has one entry per feature, in feature order. Districts without
/// a row for `year_month` come back with no values.
///
/// # Errors
///
/// With [`DuplicatePolicy::Reject`], returns [`MapError::AmbiguousRows`] for the
/// first district that has more than one row in the month.
pub fn merge_month<'a>(
    features: &'a [DistrictFeature],
    cases: &CaseDataset,
    year_month: YearMonth,
    policy: DuplicatePolicy,
) -> Result<Vec<MergedView<'a>>> {
    let slice = cases.slice(year_month);
    let mut merged = Vec::with_capacity(features.len());

    for feature in features {
        let rows = slice.rows(&feature.key);
        let values = match rows {
            [] => None,
            [row] => Some(values_of(row)),
            _ => Some(resolve_duplicates(&feature.key, year_month, rows, policy)?),
        };
        merged.push(MergedView { feature, values });
    }

    debug!(
        %year_month,
        districts = merged.len(),
        matched = merged.iter().filter(|m| m.has_data()).count(),
        "Month merged"
    );

    Ok(merged)
}

fn values_of(row: &CaseRecord) -> DistrictValues {
    DistrictValues {
        cases: row.cases,
        population: row.population,
        incidence: row.incidence,
    }
}

fn resolve_duplicates(
    key: &str,
    year_month: YearMonth,
    rows: &[&CaseRecord],
    policy: DuplicatePolicy,
) -> Result<DistrictValues> {
    let lines: Vec<u64> = rows.iter().map(|r| r.line).collect();

    match policy {
        DuplicatePolicy::Reject => Err(MapError::AmbiguousRows {
            key: key.to_string(),
            year_month,
            rows: rows.len(),
        }),
        DuplicatePolicy::Last => {
            warn!(key, %year_month, ?lines, "Duplicate case rows, keeping the last");
            let last = rows.last().map(|r| values_of(r));
            Ok(last.unwrap_or(DistrictValues {
                cases: None,
                population: None,
                incidence: None,
            }))
        }
        DuplicatePolicy::Sum => {
            warn!(key, %year_month, ?lines, "Duplicate case rows, summing cases");
            let cases = rows
                .iter()
                .map(|r| r.cases)
                .sum::<Option<u64>>();
            let population = rows.iter().rev().find_map(|r| r.population);
            Ok(DistrictValues {
                cases,
                population,
                incidence: derive_incidence(cases, population),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_district;

    fn features(labels: &[&str]) -> Vec<DistrictFeature> {
        labels
            .iter()
            .map(|label| DistrictFeature {
                label: (*label).to_string(),
                key: normalize_district(label),
                geometry: None,
            })
            .collect()
    }

    fn ym(year: i32, month: u32) -> YearMonth {
        YearMonth::new(year, month).unwrap()
    }

    fn sample_cases() -> CaseDataset {
        CaseDataset::from_records(vec![
            CaseRecord::new(2024, 1, "Colombo", Some(100), Some(1_000_000.0), None),
            CaseRecord::new(2024, 1, "Gampaha", Some(50), Some(500_000.0), None),
            CaseRecord::new(2024, 2, "Colombo", None, Some(1_000_000.0), None),
        ])
    }

    #[test]
    fn test_merge_example_in_feature_order() {
        let geo = features(&["Colombo District", "Gampaha"]);
        let merged = merge_month(&geo, &sample_cases(), ym(2024, 1), DuplicatePolicy::Reject).unwrap();

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].label(), "Colombo District");
        assert_eq!(merged[1].label(), "Gampaha");
        for view in &merged {
            assert!(view.has_data());
            assert!((view.incidence().unwrap() - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_missing_cases_is_missing_not_zero() {
        let geo = features(&["Colombo"]);
        let merged = merge_month(&geo, &sample_cases(), ym(2024, 2), DuplicatePolicy::Reject).unwrap();
        assert!(merged[0].has_data());
        assert_eq!(merged[0].incidence(), None);
        assert_eq!(merged[0].cases(), None);
    }

    #[test]
    fn test_month_without_rows_is_all_no_data() {
        let geo = features(&["Colombo", "Gampaha", "Kandy"]);
        let merged = merge_month(&geo, &sample_cases(), ym(2024, 3), DuplicatePolicy::Reject).unwrap();
        assert_eq!(merged.len(), 3);
        assert!(merged.iter().all(|m| !m.has_data() && m.incidence().is_none()));
    }

    #[test]
    fn test_absent_district_is_no_data() {
        let geo = features(&["Colombo", "Kandy"]);
        let merged = merge_month(&geo, &sample_cases(), ym(2024, 1), DuplicatePolicy::Reject).unwrap();
        assert!(merged[0].has_data());
        assert!(!merged[1].has_data());
        assert_eq!(merged[1].value(Metric::Cases), None);
    }

    #[test]
    fn test_length_matches_features_when_cases_outnumber_them() {
        let geo = features(&["Colombo"]);
        let merged = merge_month(&geo, &sample_cases(), ym(2024, 1), DuplicatePolicy::Reject).unwrap();
        assert_eq!(merged.len(), 1);
    }

    fn duplicated() -> CaseDataset {
        CaseDataset::from_records(vec![
            CaseRecord::new(2024, 1, "Colombo", Some(100), Some(1_000_000.0), None),
            CaseRecord::new(2024, 1, "Colombo District", Some(20), Some(1_000_000.0), None),
        ])
    }

    #[test]
    fn test_duplicates_rejected_by_default() {
        let geo = features(&["Colombo"]);
        let err = merge_month(&geo, &duplicated(), ym(2024, 1), DuplicatePolicy::default()).unwrap_err();
        assert!(matches!(err, MapError::AmbiguousRows { rows: 2, .. }));
    }

    #[test]
    fn test_duplicates_last_wins() {
        let geo = features(&["Colombo"]);
        let merged = merge_month(&geo, &duplicated(), ym(2024, 1), DuplicatePolicy::Last).unwrap();
        assert_eq!(merged[0].cases(), Some(20));
    }

    #[test]
    fn test_duplicates_summed() {
        let geo = features(&["Colombo"]);
        let merged = merge_month(&geo, &duplicated(), ym(2024, 1), DuplicatePolicy::Sum).unwrap();
        assert_eq!(merged[0].cases(), Some(120));
        assert!((merged[0].incidence().unwrap() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_merge_is_repeatable() {
        let geo = features(&["Colombo", "Gampaha"]);
        let cases = sample_cases();
        let first = merge_month(&geo, &cases, ym(2024, 1), DuplicatePolicy::Reject).unwrap();
        let _ = merge_month(&geo, &cases, ym(2024, 2), DuplicatePolicy::Reject).unwrap();
        let again = merge_month(&geo, &cases, ym(2024, 1), DuplicatePolicy::Reject).unwrap();
        assert_eq!(first, again);
    }
}
