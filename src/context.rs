//! Loaded datasets shared by every render call.
//!
//! A [`MapContext`] is built once and never changes. Picking up edited source
//! files means loading a new context and dropping the old one.

use serde::Serialize;
use tracing::info;

use crate::cases::CaseDataset;
use crate::error::Result;
use crate::geo::GeoDataset;
use crate::merge::{DuplicatePolicy, MergedView, merge_month};
use crate::month::YearMonth;
use crate::population::PopulationTable;
use crate::scale::{ColorScale, ColorScales, Metric};
use crate::style::{StyleOptions, feature_collection};

/// Settings that stay fixed for the lifetime of a context.
#[derive(Debug, Clone, Copy)]
pub struct ContextOptions {
    /// Percentile (0-1) used for every metric's color scale.
    pub percentile: f64,
    pub duplicates: DuplicatePolicy,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            percentile: 0.95,
            duplicates: DuplicatePolicy::Reject,
        }
    }
}

/// Per-call choices.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest {
    pub year_month: YearMonth,
    pub metric: Metric,
    /// Replaces the global upper bound for `metric` in this call only.
    pub max_override: Option<f64>,
    pub threshold: f64,
}

/// One month ready for a renderer.
#[derive(Debug, Clone)]
pub struct MonthView<'a> {
    pub year_month: YearMonth,
    pub metric: Metric,
    pub style: StyleOptions,
    pub districts: Vec<MergedView<'a>>,
}

impl MonthView<'_> {
    pub fn matched(&self) -> usize {
        self.districts.iter().filter(|d| d.has_data()).count()
    }

    pub fn title(&self) -> String {
        let what = match self.metric {
            Metric::Incidence => "incidence per 100k",
            Metric::Cases => "cases",
        };
        format!("Dengue {what} - {}", self.year_month.label())
    }

    pub fn to_feature_collection(&self) -> geojson::FeatureCollection {
        feature_collection(&self.districts, &self.style)
    }
}

/// Summary counts for logging.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ContextSummary {
    pub districts: usize,
    pub case_rows: usize,
    pub months: usize,
    pub row_issues: usize,
}

#[derive(Debug, Clone)]
pub struct MapContext {
    geo: GeoDataset,
    cases: CaseDataset,
    scales: ColorScales,
    options: ContextOptions,
}

impl MapContext {
    /// Builds the context, applying population overrides first so the color
    /// scales see the final incidences.
    pub fn new(
        geo: GeoDataset,
        cases: CaseDataset,
        population: Option<&PopulationTable>,
        options: ContextOptions,
    ) -> Result<Self> {
        let cases = match population {
            Some(table) => cases.with_population_overrides(table),
            None => cases,
        };
        let scales = ColorScales::select(&cases, options.percentile, Metric::Incidence, None)?;

        let context = Self {
            geo,
            cases,
            scales,
            options,
        };
        let summary = context.summary();
        info!(
            districts = summary.districts,
            case_rows = summary.case_rows,
            months = summary.months,
            incidence_max = scales.incidence_per_100k.high,
            cases_max = scales.cases.high,
            "Map context ready"
        );

        Ok(context)
    }

    pub fn geo(&self) -> &GeoDataset {
        &self.geo
    }

    pub fn cases(&self) -> &CaseDataset {
        &self.cases
    }

    pub fn scales(&self) -> &ColorScales {
        &self.scales
    }

    pub fn months(&self) -> Vec<YearMonth> {
        self.cases.months()
    }

    pub fn summary(&self) -> ContextSummary {
        ContextSummary {
            districts: self.geo.len(),
            case_rows: self.cases.len(),
            months: self.cases.months().len(),
            row_issues: self.cases.issues().len(),
        }
    }

    /// Merges and styles one month. Side-effect free: the same request
    /// always yields the same view.
    pub fn render(&self, request: &RenderRequest) -> Result<MonthView<'_>> {
        let scale = match request.max_override {
            Some(max) => ColorScale::select(
                &self.cases,
                request.metric,
                self.options.percentile,
                Some(max),
            )?,
            None => self.scales.get(request.metric),
        };

        let districts = merge_month(
            self.geo.features(),
            &self.cases,
            request.year_month,
            self.options.duplicates,
        )?;

        Ok(MonthView {
            year_month: request.year_month,
            metric: request.metric,
            style: StyleOptions {
                metric: request.metric,
                scale,
                threshold: request.threshold,
            },
            districts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::CaseRecord;
    use serde_json::json;

    fn context(population: Option<&PopulationTable>) -> MapContext {
        let geo = GeoDataset::parse(
            &json!({
                "type": "FeatureCollection",
                "features": [
                    { "type": "Feature", "properties": { "shapeName": "Colombo District" }, "geometry": null },
                    { "type": "Feature", "properties": { "shapeName": "Gampaha" }, "geometry": null }
                ]
            })
            .to_string(),
        )
        .unwrap();
        let cases = CaseDataset::from_records(vec![
            CaseRecord::new(2024, 1, "Colombo", Some(100), Some(1_000_000.0), None),
            CaseRecord::new(2024, 1, "Gampaha", Some(50), None, None),
            CaseRecord::new(2024, 2, "Colombo", Some(300), Some(1_000_000.0), None),
        ]);
        MapContext::new(geo, cases, population, ContextOptions::default()).unwrap()
    }

    fn request(month: u32) -> RenderRequest {
        RenderRequest {
            year_month: YearMonth::new(2024, month).unwrap(),
            metric: Metric::Incidence,
            max_override: None,
            threshold: 0.0,
        }
    }

    #[test]
    fn test_scale_is_shared_across_months() {
        let ctx = context(None);
        let jan = ctx.render(&request(1)).unwrap();
        let feb = ctx.render(&request(2)).unwrap();
        assert_eq!(jan.style.scale, feb.style.scale);
        assert_eq!(jan.style.scale, ctx.scales().get(Metric::Incidence));
    }

    #[test]
    fn test_render_is_idempotent() {
        let ctx = context(None);
        let first = ctx.render(&request(1)).unwrap().to_feature_collection();
        ctx.render(&request(2)).unwrap();
        let second = ctx.render(&request(1)).unwrap().to_feature_collection();
        assert_eq!(first, second);
    }

    #[test]
    fn test_population_overrides_feed_incidence() {
        let table = PopulationTable::from_pairs([("Gampaha", 500_000.0)]);
        let ctx = context(Some(&table));
        let jan = ctx.render(&request(1)).unwrap();
        assert!((jan.districts[1].incidence().unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_override_applies_to_one_call() {
        let ctx = context(None);
        let mut req = request(1);
        req.max_override = Some(500.0);
        assert_eq!(ctx.render(&req).unwrap().style.scale.high, 500.0);
        assert_ne!(ctx.render(&request(1)).unwrap().style.scale.high, 500.0);
    }

    #[test]
    fn test_title_and_matched() {
        let ctx = context(None);
        let feb = ctx.render(&request(2)).unwrap();
        assert_eq!(feb.title(), "Dengue incidence per 100k - February 2024");
        assert_eq!(feb.matched(), 1);
    }
}
