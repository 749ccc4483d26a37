//! District boundary loading.
//!
//! Each feature's label comes from the first recognised property key that is
//! present. A feature without any of them fails the whole load: a silently
//! dropped district would corrupt every month rendered afterwards.

use std::collections::BTreeMap;
use std::io::Read;

use geojson::{FeatureCollection, GeoJson, Geometry};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{MapError, Result};
use crate::normalize::normalize_district;

/// Property keys tried, in order, for a feature's district label.
pub const DISTRICT_KEYS: &[&str] = &["shapeName", "NAME_2", "name", "district", "DISTRICT"];

/// A district polygon with its label and join key.
#[derive(Debug, Clone, PartialEq)]
pub struct DistrictFeature {
    pub label: String,
    pub key: String,
    pub geometry: Option<Geometry>,
}

/// Ordered district features from one boundary file.
#[derive(Debug, Clone, Default)]
pub struct GeoDataset {
    features: Vec<DistrictFeature>,
}

impl GeoDataset {
    /// Builds the dataset from a parsed collection without modifying it.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::MissingNameKey`] for the first feature that has no
    /// usable label property.
    pub fn from_collection(collection: &FeatureCollection) -> Result<Self> {
        let mut features = Vec::with_capacity(collection.features.len());

        for (index, feature) in collection.features.iter().enumerate() {
            let label = feature
                .properties
                .as_ref()
                .and_then(pick_label)
                .ok_or_else(|| MapError::MissingNameKey {
                    index,
                    tried: DISTRICT_KEYS.join(", "),
                })?;

            features.push(DistrictFeature {
                key: normalize_district(&label),
                label,
                geometry: feature.geometry.clone(),
            });
        }

        let dataset = Self { features };
        for (key, labels) in dataset.duplicate_keys() {
            warn!(key = %key, labels = ?labels, "Several features share one district key");
        }
        debug!(features = dataset.len(), "District features loaded");

        Ok(dataset)
    }

    /// Parses GeoJSON text. The top level must be a `FeatureCollection`.
    pub fn parse(text: &str) -> Result<Self> {
        match text.parse::<GeoJson>()? {
            GeoJson::FeatureCollection(collection) => Self::from_collection(&collection),
            GeoJson::Feature(_) => Err(MapError::NotFeatureCollection { found: "Feature" }),
            GeoJson::Geometry(_) => Err(MapError::NotFeatureCollection { found: "Geometry" }),
        }
    }

    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Self::parse(&text)
    }

    pub fn features(&self) -> &[DistrictFeature] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// One label per distinct key, sorted by key.
    pub fn district_labels(&self) -> Vec<&str> {
        let mut by_key: BTreeMap<&str, &str> = BTreeMap::new();
        for feature in &self.features {
            by_key.entry(feature.key.as_str()).or_insert(feature.label.as_str());
        }
        by_key.into_values().collect()
    }

    /// Keys carried by more than one feature, with the labels that produced them.
    pub fn duplicate_keys(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut by_key: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for feature in &self.features {
            by_key.entry(feature.key.as_str()).or_default().push(feature.label.as_str());
        }
        by_key.retain(|_, labels| labels.len() > 1);
        by_key
    }
}

/// Picks the label from the first recognised key. JSON `null` counts as absent.
pub fn pick_label(properties: &serde_json::Map<String, Value>) -> Option<String> {
    DISTRICT_KEYS.iter().find_map(|key| match properties.get(*key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collection(props: Vec<Value>) -> FeatureCollection {
        let features: Vec<Value> = props
            .into_iter()
            .map(|p| {
                json!({
                    "type": "Feature",
                    "properties": p,
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[79.8, 6.9], [80.0, 6.9], [80.0, 7.1], [79.8, 6.9]]]
                    }
                })
            })
            .collect();
        json!({ "type": "FeatureCollection", "features": features })
            .to_string()
            .parse()
            .unwrap()
    }

    #[test]
    fn test_key_preference_order() {
        let props = json!({ "name": "Wrong", "shapeName": "Colombo District", "DISTRICT": "X" });
        assert_eq!(
            pick_label(props.as_object().unwrap()).as_deref(),
            Some("Colombo District")
        );

        let props = json!({ "DISTRICT": "Kandy", "district": "Gampaha" });
        assert_eq!(pick_label(props.as_object().unwrap()).as_deref(), Some("Gampaha"));
    }

    #[test]
    fn test_null_value_falls_through() {
        let props = json!({ "shapeName": null, "NAME_2": "Matara" });
        assert_eq!(pick_label(props.as_object().unwrap()).as_deref(), Some("Matara"));
    }

    #[test]
    fn test_non_string_label_is_rendered() {
        let props = json!({ "name": 42 });
        assert_eq!(pick_label(props.as_object().unwrap()).as_deref(), Some("42"));
    }

    #[test]
    fn test_load_preserves_order_and_attaches_keys() {
        let fc = collection(vec![
            json!({ "shapeName": "Gampaha District" }),
            json!({ "NAME_2": "Colombo" }),
        ]);
        let geo = GeoDataset::from_collection(&fc).unwrap();

        let keys: Vec<_> = geo.features().iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["gampaha", "colombo"]);
        assert_eq!(geo.features()[0].label, "Gampaha District");
        assert!(geo.features()[0].geometry.is_some());
    }

    #[test]
    fn test_load_does_not_mutate_input() {
        let fc = collection(vec![json!({ "shapeName": "Colombo" })]);
        let before = fc.clone();
        GeoDataset::from_collection(&fc).unwrap();
        assert_eq!(fc, before);
    }

    #[test]
    fn test_missing_name_key_fails_whole_load() {
        let fc = collection(vec![
            json!({ "shapeName": "Colombo" }),
            json!({ "population": 10 }),
        ]);
        let err = GeoDataset::from_collection(&fc).unwrap_err();
        match err {
            MapError::MissingNameKey { index, tried } => {
                assert_eq!(index, 1);
                assert!(tried.contains("shapeName"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_rejects_single_feature() {
        let text = json!({
            "type": "Feature",
            "properties": { "name": "Colombo" },
            "geometry": null
        })
        .to_string();
        assert!(matches!(
            GeoDataset::parse(&text),
            Err(MapError::NotFeatureCollection { found: "Feature" })
        ));
    }

    #[test]
    fn test_district_labels_sorted_and_deduplicated() {
        let fc = collection(vec![
            json!({ "shapeName": "Kandy" }),
            json!({ "shapeName": "Colombo District" }),
            json!({ "shapeName": "Colombo" }),
        ]);
        let geo = GeoDataset::from_collection(&fc).unwrap();

        assert_eq!(geo.district_labels(), vec!["Colombo District", "Kandy"]);
        let dupes = geo.duplicate_keys();
        assert_eq!(dupes.len(), 1);
        assert_eq!(dupes["colombo"], vec!["Colombo District", "Colombo"]);
    }
}
