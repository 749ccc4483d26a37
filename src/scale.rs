//! Shared color scale selection.
//!
//! One upper bound per metric is computed over the whole dataset, so a given
//! color means the same value on every month's map.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::cases::CaseDataset;
use crate::error::{MapError, Result};

/// Upper bound used when the dataset has nothing to scale against.
pub const DEFAULT_SCALE_MAX: f64 = 1.0;

/// A value that can be mapped to color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
pub enum Metric {
    #[serde(rename = "incidence_per_100k")]
    #[value(name = "incidence_per_100k", alias = "incidence")]
    Incidence,
    #[serde(rename = "cases")]
    #[value(name = "cases")]
    Cases,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::Incidence, Metric::Cases];

    /// Column / property name.
    pub fn column(self) -> &'static str {
        match self {
            Metric::Incidence => "incidence_per_100k",
            Metric::Cases => "cases",
        }
    }

    /// Legend title.
    pub fn title(self) -> &'static str {
        match self {
            Metric::Incidence => "Incidence/100k",
            Metric::Cases => "Cases",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Numeric range mapped onto the palette.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColorScale {
    pub low: f64,
    pub high: f64,
}

impl ColorScale {
    /// Picks the scale for `metric`.
    ///
    /// `max_override` wins when given. Otherwise the bound is the `percentile`
    /// (0-1) of the metric's non-missing values over every row, dated or not, falling
    /// back to [`DEFAULT_SCALE_MAX`] when that is not strictly positive.
    ///
    /// # Errors
    ///
    /// Returns an error for a percentile outside 0-1 or an override that is
    /// not finite and positive.
    pub fn select(
        cases: &CaseDataset,
        metric: Metric,
        percentile: f64,
        max_override: Option<f64>,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&percentile) {
            return Err(MapError::InvalidPercentile(percentile));
        }

        if let Some(high) = max_override {
            if !(high.is_finite() && high > 0.0) {
                return Err(MapError::InvalidScaleOverride(high));
            }
            return Ok(Self { low: 0.0, high });
        }

        let mut values: Vec<f64> = cases
            .records()
            .iter()
            .filter_map(|r| r.value(metric))
            .collect();

        let computed = quantile(&mut values, percentile);
        let high = computed
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(DEFAULT_SCALE_MAX);
        debug!(%metric, values = values.len(), ?computed, high, "Color scale selected");

        Ok(Self { low: 0.0, high })
    }

    /// Position of `value` on the scale, clamped to 0-1.
    pub fn fraction(&self, value: f64) -> f64 {
        let span = self.high - self.low;
        if span <= 0.0 {
            return 0.0;
        }
        ((value - self.low) / span).clamp(0.0, 1.0)
    }
}

/// Global scales for every metric, computed once per dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColorScales {
    pub incidence_per_100k: ColorScale,
    pub cases: ColorScale,
}

impl ColorScales {
    /// `max_override` applies to `override_metric` only.
    pub fn select(
        cases: &CaseDataset,
        percentile: f64,
        override_metric: Metric,
        max_override: Option<f64>,
    ) -> Result<Self> {
        let pick = |metric: Metric| {
            let max = if metric == override_metric {
                max_override
            } else {
                None
            };
            ColorScale::select(cases, metric, percentile, max)
        };

        Ok(Self {
            incidence_per_100k: pick(Metric::Incidence)?,
            cases: pick(Metric::Cases)?,
        })
    }

    pub fn get(&self, metric: Metric) -> ColorScale {
        match metric {
            Metric::Incidence => self.incidence_per_100k,
            Metric::Cases => self.cases,
        }
    }

    /// Copy with `metric`'s scale replaced.
    pub fn with_scale(mut self, metric: Metric, scale: ColorScale) -> Self {
        match metric {
            Metric::Incidence => self.incidence_per_100k = scale,
            Metric::Cases => self.cases = scale,
        }
        self
    }
}

/// Quantile with linear interpolation between closest ranks. Sorts `values`.
pub fn quantile(values: &mut [f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);

    let pos = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let weight = pos - lower as f64;

    Some(values[lower] + (values[upper] - values[lower]) * weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::CaseRecord;

    fn dataset(incidences: &[f64]) -> CaseDataset {
        CaseDataset::from_records(
            incidences
                .iter()
                .enumerate()
                .map(|(i, v)| CaseRecord::new(2024, (i % 12) as u32 + 1, "Colombo", Some(1), None, Some(*v)))
                .collect(),
        )
    }

    #[test]
    fn test_quantile_matches_linear_interpolation() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0];
        assert_eq!(quantile(&mut values, 0.5), Some(2.5));
        assert_eq!(quantile(&mut values, 1.0), Some(4.0));
        assert_eq!(quantile(&mut values, 0.0), Some(1.0));
        assert!((quantile(&mut values, 0.95).unwrap() - 3.85).abs() < 1e-12);
        assert_eq!(quantile(&mut [], 0.5), None);
    }

    #[test]
    fn test_scale_uses_percentile_of_all_months() {
        let cases = dataset(&[0.0, 10.0, 20.0, 30.0, 40.0]);
        let scale = ColorScale::select(&cases, Metric::Incidence, 0.5, None).unwrap();
        assert_eq!(scale, ColorScale { low: 0.0, high: 20.0 });
    }

    #[test]
    fn test_empty_dataset_falls_back_to_positive_default() {
        let scale =
            ColorScale::select(&CaseDataset::default(), Metric::Incidence, 0.95, None).unwrap();
        assert_eq!(scale.high, DEFAULT_SCALE_MAX);
        assert!(scale.high > 0.0);
    }

    #[test]
    fn test_all_zero_values_fall_back_to_default() {
        let cases = dataset(&[0.0, 0.0, 0.0]);
        let scale = ColorScale::select(&cases, Metric::Incidence, 0.99, None).unwrap();
        assert_eq!(scale.high, DEFAULT_SCALE_MAX);
    }

    #[test]
    fn test_missing_values_are_ignored() {
        let cases = CaseDataset::from_records(vec![
            CaseRecord::new(2024, 1, "Colombo", None, Some(1000.0), None),
            CaseRecord::new(2024, 1, "Gampaha", Some(7), Some(1000.0), None),
        ]);
        let scale = ColorScale::select(&cases, Metric::Cases, 1.0, None).unwrap();
        assert_eq!(scale.high, 7.0);
    }

    #[test]
    fn test_override_takes_precedence() {
        let cases = dataset(&[10.0, 20.0]);
        let scale = ColorScale::select(&cases, Metric::Incidence, 0.95, Some(150.0)).unwrap();
        assert_eq!(scale.high, 150.0);
    }

    #[test]
    fn test_invalid_override_and_percentile() {
        let cases = dataset(&[10.0]);
        assert!(matches!(
            ColorScale::select(&cases, Metric::Incidence, 0.95, Some(0.0)),
            Err(MapError::InvalidScaleOverride(_))
        ));
        assert!(matches!(
            ColorScale::select(&cases, Metric::Incidence, 1.5, None),
            Err(MapError::InvalidPercentile(_))
        ));
    }

    #[test]
    fn test_scales_apply_override_to_one_metric() {
        let cases = dataset(&[10.0, 20.0]);
        let scales = ColorScales::select(&cases, 1.0, Metric::Cases, Some(5.0)).unwrap();
        assert_eq!(scales.get(Metric::Cases).high, 5.0);
        assert_eq!(scales.get(Metric::Incidence).high, 20.0);

        let replaced = scales.with_scale(Metric::Incidence, ColorScale { low: 0.0, high: 7.0 });
        assert_eq!(replaced.get(Metric::Incidence).high, 7.0);
        assert_eq!(replaced.get(Metric::Cases).high, 5.0);
    }

    #[test]
    fn test_undated_rows_count_toward_scale() {
        let mut undated = CaseRecord::new(2024, 1, "Gampaha", Some(1), None, Some(100.0));
        undated.month = None;
        let cases = CaseDataset::from_records(vec![
            CaseRecord::new(2024, 1, "Colombo", Some(1), None, Some(1.0)),
            undated,
        ]);
        let scale = ColorScale::select(&cases, Metric::Incidence, 1.0, None).unwrap();
        assert_eq!(scale.high, 100.0);
    }

    #[test]
    fn test_fraction_clamps() {
        let scale = ColorScale { low: 0.0, high: 50.0 };
        assert_eq!(scale.fraction(25.0), 0.5);
        assert_eq!(scale.fraction(500.0), 1.0);
        assert_eq!(scale.fraction(-3.0), 0.0);
    }
}
