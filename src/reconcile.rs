//! Join coverage between the boundary file and the case table.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::cases::CaseDataset;
use crate::geo::GeoDataset;

/// Keys that only one source knows about.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciliationReport {
    /// Geo districts that never appear in the case table.
    pub geo_without_cases: Vec<String>,
    /// Case-table districts with no boundary; their rows can never render.
    pub cases_without_geo: Vec<String>,
    /// Keys shared by several geo features.
    pub duplicate_geo_keys: Vec<String>,
    /// Case rows with a missing year or month.
    pub undated_rows: usize,
}

impl ReconciliationReport {
    /// True when every case row can be placed on the map.
    pub fn is_clean(&self) -> bool {
        self.cases_without_geo.is_empty() && self.duplicate_geo_keys.is_empty()
    }
}

pub fn reconcile(geo: &GeoDataset, cases: &CaseDataset) -> ReconciliationReport {
    let geo_keys: BTreeSet<&str> = geo.features().iter().map(|f| f.key.as_str()).collect();
    let case_keys: BTreeSet<&str> = cases.records().iter().map(|r| r.key.as_str()).collect();

    ReconciliationReport {
        geo_without_cases: geo_keys
            .difference(&case_keys)
            .map(|k| (*k).to_string())
            .collect(),
        cases_without_geo: case_keys
            .difference(&geo_keys)
            .map(|k| (*k).to_string())
            .collect(),
        duplicate_geo_keys: geo
            .duplicate_keys()
            .into_keys()
            .map(str::to_string)
            .collect(),
        undated_rows: cases.undated_rows(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::CaseRecord;
    use serde_json::json;

    fn geo(labels: &[&str]) -> GeoDataset {
        let features: Vec<_> = labels
            .iter()
            .map(|l| json!({ "type": "Feature", "properties": { "shapeName": l }, "geometry": null }))
            .collect();
        GeoDataset::parse(&json!({ "type": "FeatureCollection", "features": features }).to_string())
            .unwrap()
    }

    #[test]
    fn test_reports_both_directions() {
        let cases = CaseDataset::from_records(vec![
            CaseRecord::new(2024, 1, "Colombo", Some(1), Some(10.0), None),
            CaseRecord::new(2024, 1, "Colmbo", Some(1), Some(10.0), None),
        ]);
        let report = reconcile(&geo(&["Colombo District", "Kandy"]), &cases);

        assert_eq!(report.geo_without_cases, vec!["kandy"]);
        assert_eq!(report.cases_without_geo, vec!["colmbo"]);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_clean_when_all_case_keys_match() {
        let cases = CaseDataset::from_records(vec![CaseRecord::new(
            2024,
            1,
            "kandy",
            Some(1),
            Some(10.0),
            None,
        )]);
        let report = reconcile(&geo(&["Kandy", "Matale"]), &cases);
        assert!(report.is_clean());
        assert_eq!(report.geo_without_cases, vec!["matale"]);
    }

    #[test]
    fn test_flags_duplicate_geo_keys() {
        let report = reconcile(&geo(&["Colombo", "COLOMBO District"]), &CaseDataset::default());
        assert_eq!(report.duplicate_geo_keys, vec!["colombo"]);
        assert!(!report.is_clean());
    }
}
