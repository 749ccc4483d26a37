//! Renderer-ready properties for merged districts.
//!
//! Colors follow the Viridis ramp between the scale's bounds. Districts with
//! no data, or with a missing value for the chosen metric, get a neutral
//! color outside the ramp.

use geojson::{Feature, FeatureCollection, JsonObject};
use serde_json::{Value, json};

use crate::merge::MergedView;
use crate::scale::{ColorScale, Metric};

/// Fill for districts without a value.
pub const NO_DATA_COLOR: &str = "#eeeeee";

/// Opacity of districts under the highlight threshold.
const DIMMED_OPACITY: f64 = 0.2;

/// Viridis anchor colors, evenly spaced from low to high.
const VIRIDIS: [(u8, u8, u8); 9] = [
    (0x44, 0x01, 0x54),
    (0x47, 0x2d, 0x7b),
    (0x3b, 0x52, 0x8b),
    (0x2c, 0x72, 0x8e),
    (0x21, 0x91, 0x8c),
    (0x28, 0xae, 0x80),
    (0x5e, 0xc9, 0x62),
    (0xad, 0xdc, 0x30),
    (0xfd, 0xe7, 0x25),
];

/// Options shared by every district of one rendered map.
#[derive(Debug, Clone, Copy)]
pub struct StyleOptions {
    pub metric: Metric,
    pub scale: ColorScale,
    /// Incidence below this is dimmed. Zero or less disables highlighting.
    pub threshold: f64,
}

/// Hex color for a position on the ramp (0-1).
pub fn viridis(fraction: f64) -> String {
    let pos = fraction.clamp(0.0, 1.0) * (VIRIDIS.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let t = pos - lower as f64;

    let mix = |a: u8, b: u8| (f64::from(a) + (f64::from(b) - f64::from(a)) * t).round() as u8;
    let (r1, g1, b1) = VIRIDIS[lower];
    let (r2, g2, b2) = VIRIDIS[upper];

    format!("#{:02x}{:02x}{:02x}", mix(r1, r2), mix(g1, g2), mix(b1, b2))
}

/// Fill color for a metric value, or the no-data color.
pub fn fill_color(value: Option<f64>, scale: &ColorScale) -> String {
    match value {
        Some(v) if v.is_finite() => viridis(scale.fraction(v)),
        _ => NO_DATA_COLOR.to_string(),
    }
}

fn fill_opacity(incidence: Option<f64>, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return 1.0;
    }
    match incidence {
        Some(v) if v >= threshold => 1.0,
        _ => DIMMED_OPACITY,
    }
}

/// Formats an integer with thousands separators: `2415000` -> `"2,415,000"`.
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Feature properties for one merged district.
pub fn feature_properties(view: &MergedView<'_>, options: &StyleOptions) -> JsonObject {
    let incidence = view.incidence();
    let cases = view.cases();
    let population = view.population();

    let props = json!({
        "district": view.label(),
        "district_key": view.key(),
        "has_data": view.has_data(),
        "incidence_per_100k": incidence,
        "cases": cases,
        "population": population,
        "inc_text": incidence.map(|v| format!("{v:.1}")).unwrap_or_default(),
        "cases_text": cases.map(group_thousands).unwrap_or_default(),
        "pop_text": population
            .map(|p| group_thousands(p.round() as u64))
            .unwrap_or_default(),
        "fill": fill_color(view.value(options.metric), &options.scale),
        "fill-opacity": fill_opacity(incidence, options.threshold),
        "stroke": "#666666",
        "stroke-width": 0.5,
    });

    match props {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}

/// A styled feature collection for one month. Geometry is cloned from the
/// loaded features; the loaded dataset is left as is.
pub fn feature_collection(views: &[MergedView<'_>], options: &StyleOptions) -> FeatureCollection {
    let features = views
        .iter()
        .map(|view| Feature {
            bbox: None,
            geometry: view.feature.geometry.clone(),
            id: None,
            properties: Some(feature_properties(view, options)),
            foreign_members: None,
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}
