//! Artifacts handed to the renderer: per-month GeoJSON and CSV, plus the
//! site index.
//!
//! The index is rebuilt from the monthly files present in the output
//! directory, so single-month builds show up alongside batch builds.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use tracing::{debug, info};

use crate::context::MonthView;
use crate::month::YearMonth;
use crate::scale::{ColorScales, Metric};

/// One CSV row per district per month.
#[derive(Debug, Serialize)]
pub struct MergedRow<'a> {
    pub year: i32,
    pub month: u32,
    pub district_key: &'a str,
    pub district: &'a str,
    pub has_data: bool,
    pub cases: Option<u64>,
    pub population: Option<f64>,
    pub incidence_per_100k: Option<f64>,
}

/// Flattens a month view into CSV rows, in feature order.
pub fn merged_rows<'a>(view: &'a MonthView<'_>) -> impl Iterator<Item = MergedRow<'a>> {
    view.districts.iter().map(move |d| MergedRow {
        year: view.year_month.year,
        month: view.year_month.month,
        district_key: d.key(),
        district: d.label(),
        has_data: d.has_data(),
        cases: d.cases(),
        population: d.population(),
        incidence_per_100k: d.incidence(),
    })
}

/// Writes the rows of every view, with one header line.
pub fn write_rows<W: Write>(writer: W, views: &[MonthView<'_>]) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(true).from_writer(writer);
    for view in views {
        for row in merged_rows(view) {
            wtr.serialize(row)?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Writes `merged.csv` with every row of every view.
pub fn write_merged_csv(dir: &Path, views: &[MonthView<'_>]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join("merged.csv");
    write_rows(File::create(&path)?, views)?;
    info!(path = %path.display(), months = views.len(), "Merged table written");
    Ok(path)
}

/// Writes `choropleth_YYYY_MM.geojson` and `.csv` for one month.
#[tracing::instrument(skip(view), fields(year_month = %view.year_month))]
pub fn write_month(dir: &Path, view: &MonthView<'_>) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let stem = view.year_month.file_stem();

    let geojson_path = dir.join(format!("{stem}.geojson"));
    let collection = geojson::GeoJson::from(view.to_feature_collection());
    fs::write(&geojson_path, collection.to_string())?;

    let csv_path = dir.join(format!("{stem}.csv"));
    write_rows(File::create(&csv_path)?, std::slice::from_ref(view))?;

    info!(
        path = %geojson_path.display(),
        matched = view.matched(),
        districts = view.districts.len(),
        "Month written"
    );
    Ok(geojson_path)
}

/// Entry for one month in `index.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexEntry {
    pub year_month: String,
    pub label: String,
    pub geojson: String,
    pub csv: String,
    pub matched: usize,
    pub unmatched: usize,
}

/// Top-level site manifest, served as `index.json`.
#[derive(Debug, Serialize)]
pub struct SiteIndex {
    pub generated_at: DateTime<Utc>,
    pub metric: Metric,
    pub scales: ColorScales,
    pub no_data_color: &'static str,
    pub months: Vec<IndexEntry>,
}

/// Months with a `choropleth_YYYY_MM.geojson` file in `dir`, oldest first.
pub fn built_months(dir: &Path) -> Result<Vec<YearMonth>> {
    let mut months = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(ym) = name.to_str().and_then(parse_file_name) {
            months.push(ym);
        }
    }
    months.sort();
    months.dedup();
    Ok(months)
}

fn parse_file_name(name: &str) -> Option<YearMonth> {
    let rest = name.strip_prefix("choropleth_")?.strip_suffix(".geojson")?;
    let (year, month) = rest.split_once('_')?;
    YearMonth::new(year.parse().ok()?, month.parse().ok()?)
}

/// Rebuilds `index.json` and `index.html` from the monthly files in `dir`.
pub fn write_index(dir: &Path, metric: Metric, scales: &ColorScales) -> Result<SiteIndex> {
    let mut months = Vec::new();
    for ym in built_months(dir)? {
        let stem = ym.file_stem();
        let geojson = format!("{stem}.geojson");
        let (matched, unmatched) = count_matched(&dir.join(&geojson))?;
        months.push(IndexEntry {
            year_month: ym.to_string(),
            label: ym.label(),
            geojson,
            csv: format!("{stem}.csv"),
            matched,
            unmatched,
        });
    }

    let index = SiteIndex {
        generated_at: Utc::now(),
        metric,
        scales: *scales,
        no_data_color: crate::style::NO_DATA_COLOR,
        months,
    };

    fs::write(dir.join("index.json"), serde_json::to_string_pretty(&index)?)?;
    fs::write(dir.join("index.html"), index_html(&index))?;
    debug!(months = index.months.len(), "Index written");

    Ok(index)
}

/// Counts features with and without data in a written month file.
fn count_matched(path: &Path) -> Result<(usize, usize)> {
    let collection: geojson::FeatureCollection = fs::read_to_string(path)?.parse()?;
    let matched = collection
        .features
        .iter()
        .filter(|f| {
            f.property("has_data")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false)
        })
        .count();
    Ok((matched, collection.features.len() - matched))
}

fn index_html(index: &SiteIndex) -> String {
    let mut html = String::from(
        "<!doctype html><meta charset=\"utf-8\"><title>Dengue maps</title><h1>Dengue maps</h1><ul>",
    );
    for entry in &index.months {
        html.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>",
            entry.geojson, entry.label
        ));
    }
    html.push_str("</ul>");
    html
}
