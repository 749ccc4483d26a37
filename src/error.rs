//! Error types shared by the loaders, the merger and the scale selector.

use crate::month::YearMonth;

/// Errors that abort a load or a render call.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    /// A geo feature carries none of the recognised label properties.
    #[error("feature #{index} has no district name property (tried {tried})")]
    MissingNameKey {
        /// Position of the feature in the collection.
        index: usize,
        /// Comma-separated list of property keys that were tried.
        tried: String,
    },

    /// The GeoJSON document is a bare geometry or a single feature.
    #[error("expected a GeoJSON FeatureCollection, found {found}")]
    NotFeatureCollection { found: &'static str },

    /// A required CSV column is absent from the header.
    #[error("{table} table is missing required column '{column}'")]
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },

    /// More than one case row for the same district and month.
    #[error("{rows} case rows for district '{key}' in {year_month}")]
    AmbiguousRows {
        key: String,
        year_month: YearMonth,
        rows: usize,
    },

    /// A caller-supplied color scale maximum that cannot drive a linear mapping.
    #[error("color scale override must be finite and positive, got {0}")]
    InvalidScaleOverride(f64),

    #[error("percentile must be between 0 and 1, got {0}")]
    InvalidPercentile(f64),

    #[error("invalid month '{0}', expected YYYY-MM with month 1-12")]
    InvalidYearMonth(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MapError>;
