//! Monthly case table loading and incidence derivation.
//!
//! Per-row problems never abort a load. A value that fails numeric coercion
//! becomes missing and is recorded as a [`RowIssue`]; rows with a missing
//! year or month stay in the dataset but never match a month lookup.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MapError, Result};
use crate::month::YearMonth;
use crate::normalize::normalize_district;
use crate::population::PopulationTable;
use crate::scale::Metric;

const REQUIRED_COLUMNS: [&str; 3] = ["year", "month", "district"];

/// Where a record's incidence value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidenceSource {
    /// Supplied by the table; never recomputed.
    Explicit,
    /// Computed from cases and population.
    Derived,
    /// Neither supplied nor derivable.
    Missing,
}

/// One (year, month, district) observation.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseRecord {
    /// 1-based line in the source file, 0 for records built in code.
    pub line: u64,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub district: String,
    pub key: String,
    pub cases: Option<u64>,
    pub population: Option<f64>,
    pub incidence: Option<f64>,
    pub incidence_source: IncidenceSource,
}

impl CaseRecord {
    /// Builds a record from already-typed values, deriving incidence when
    /// `incidence` is `None`.
    pub fn new(
        year: i32,
        month: u32,
        district: &str,
        cases: Option<u64>,
        population: Option<f64>,
        incidence: Option<f64>,
    ) -> Self {
        let population = population.filter(|p| p.is_finite() && *p > 0.0);
        let (incidence, incidence_source) = match incidence.filter(|v| v.is_finite() && *v >= 0.0) {
            Some(value) => (Some(value), IncidenceSource::Explicit),
            None => derived(cases, population),
        };

        Self {
            line: 0,
            year: Some(year),
            month: YearMonth::new(year, month).map(|ym| ym.month),
            district: district.to_string(),
            key: normalize_district(district),
            cases,
            population,
            incidence,
            incidence_source,
        }
    }

    /// `None` when either the year or the month is missing.
    pub fn year_month(&self) -> Option<YearMonth> {
        YearMonth::new(self.year?, self.month?)
    }

    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Incidence => self.incidence,
            Metric::Cases => self.cases.map(|c| c as f64),
        }
    }
}

/// Cases per 100,000 people. `None` unless both inputs are present and the
/// population is positive.
pub fn derive_incidence(cases: Option<u64>, population: Option<f64>) -> Option<f64> {
    match (cases, population) {
        (Some(cases), Some(pop)) if pop.is_finite() && pop > 0.0 => {
            Some(cases as f64 / pop * 100_000.0)
        }
        _ => None,
    }
}

fn derived(cases: Option<u64>, population: Option<f64>) -> (Option<f64>, IncidenceSource) {
    match derive_incidence(cases, population) {
        Some(value) => (Some(value), IncidenceSource::Derived),
        None => (None, IncidenceSource::Missing),
    }
}

/// A per-row problem recovered to a missing value.
#[derive(Debug, Clone, PartialEq)]
pub enum RowIssue {
    /// A numeric field could not be coerced.
    UnparsableNumeric {
        line: u64,
        field: &'static str,
        value: String,
    },
    /// Incidence absent and not derivable from cases and population.
    UndefinedIncidence { line: u64, district: String },
}

#[derive(Debug, Deserialize)]
struct RawCaseRow {
    year: Option<String>,
    month: Option<String>,
    district: Option<String>,
    #[serde(default)]
    cases: Option<String>,
    #[serde(default)]
    population: Option<String>,
    #[serde(default)]
    incidence_per_100k: Option<String>,
}

/// Every case record of one table, in file order.
#[derive(Debug, Clone, Default)]
pub struct CaseDataset {
    records: Vec<CaseRecord>,
    issues: Vec<RowIssue>,
}

impl CaseDataset {
    /// Reads a case CSV. Header names are trimmed and lower-cased.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::MissingColumn`] when `year`, `month` or `district`
    /// is absent, or a CSV error for a malformed file.
    #[tracing::instrument(skip(reader))]
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
        let headers: StringRecord = rdr
            .headers()?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect::<Vec<_>>()
            .into();

        for column in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                return Err(MapError::MissingColumn {
                    table: "case",
                    column,
                });
            }
        }

        let mut records = Vec::new();
        let mut issues = Vec::new();

        for result in rdr.records() {
            let row = result?;
            let line = row.position().map_or(0, |p| p.line());
            let raw: RawCaseRow = row.deserialize(Some(&headers))?;
            records.push(coerce_row(line, raw, &mut issues));
        }

        let dataset = Self { records, issues };
        dataset.log_summary();
        Ok(dataset)
    }

    /// Wraps records built in code. Undefined incidences are recorded as issues.
    pub fn from_records(records: Vec<CaseRecord>) -> Self {
        let issues = records.iter().filter_map(undefined_issue).collect();
        Self { records, issues }
    }

    pub fn records(&self) -> &[CaseRecord] {
        &self.records
    }

    pub fn issues(&self) -> &[RowIssue] {
        &self.issues
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct complete (year, month) pairs, oldest first.
    pub fn months(&self) -> Vec<YearMonth> {
        self.records
            .iter()
            .filter_map(CaseRecord::year_month)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Rows for one month, grouped by normalized district key.
    pub fn slice(&self, year_month: YearMonth) -> MonthSlice<'_> {
        let mut rows: BTreeMap<&str, Vec<&CaseRecord>> = BTreeMap::new();
        for record in &self.records {
            if record.year_month() == Some(year_month) {
                rows.entry(record.key.as_str()).or_default().push(record);
            }
        }
        MonthSlice { year_month, rows }
    }

    /// Rows that can never be matched to a month.
    pub fn undated_rows(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.year_month().is_none())
            .count()
    }

    /// Returns a new dataset with populations replaced from `table`.
    ///
    /// Derived incidences are recomputed; explicit ones are kept as is.
    pub fn with_population_overrides(&self, table: &PopulationTable) -> Self {
        let mut replaced = 0usize;
        let records: Vec<CaseRecord> = self
            .records
            .iter()
            .map(|record| {
                let mut record = record.clone();
                if let Some(population) = table.get(&record.key) {
                    record.population = Some(population);
                    replaced += 1;
                    if record.incidence_source != IncidenceSource::Explicit {
                        (record.incidence, record.incidence_source) =
                            derived(record.cases, record.population);
                    }
                }
                record
            })
            .collect();

        let mut issues: Vec<RowIssue> = self
            .issues
            .iter()
            .filter(|issue| matches!(issue, RowIssue::UnparsableNumeric { .. }))
            .cloned()
            .collect();
        issues.extend(records.iter().filter_map(undefined_issue));

        info!(replaced, "Population overrides applied");
        Self { records, issues }
    }

    fn log_summary(&self) {
        let count = |source| {
            self.records
                .iter()
                .filter(|r| r.incidence_source == source)
                .count()
        };
        let unparsable = self
            .issues
            .iter()
            .filter(|i| matches!(i, RowIssue::UnparsableNumeric { .. }))
            .count();
        let undefined = self.issues.len() - unparsable;

        for issue in &self.issues {
            debug!(?issue, "Case row issue");
        }

        info!(
            rows = self.records.len(),
            explicit = count(IncidenceSource::Explicit),
            derived = count(IncidenceSource::Derived),
            missing = count(IncidenceSource::Missing),
            "Case table loaded"
        );
        if unparsable > 0 || undefined > 0 {
            warn!(
                unparsable,
                undefined_incidence = undefined,
                undated = self.undated_rows(),
                "Case rows with missing values"
            );
        }
    }
}

/// The case rows of a single month, keyed by normalized district.
#[derive(Debug, Clone)]
pub struct MonthSlice<'a> {
    pub year_month: YearMonth,
    rows: BTreeMap<&'a str, Vec<&'a CaseRecord>>,
}

impl<'a> MonthSlice<'a> {
    /// All rows for `key`, in file order. Empty when the district has no data.
    pub fn rows(&self, key: &str) -> &[&'a CaseRecord] {
        self.rows.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.rows.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn undefined_issue(record: &CaseRecord) -> Option<RowIssue> {
    (record.incidence_source == IncidenceSource::Missing).then(|| RowIssue::UndefinedIncidence {
        line: record.line,
        district: record.district.clone(),
    })
}

fn coerce_row(line: u64, raw: RawCaseRow, issues: &mut Vec<RowIssue>) -> CaseRecord {
    let mut unparsable = |field: &'static str, value: &str| {
        issues.push(RowIssue::UnparsableNumeric {
            line,
            field,
            value: value.to_string(),
        });
    };

    let year = present(raw.year.as_deref()).and_then(|text| {
        let parsed = parse_whole(text).and_then(|v| i32::try_from(v).ok());
        if parsed.is_none() {
            unparsable("year", text);
        }
        parsed
    });

    let month = present(raw.month.as_deref()).and_then(|text| {
        let parsed = parse_whole(text)
            .and_then(|v| u32::try_from(v).ok())
            .filter(|m| (1..=12).contains(m));
        if parsed.is_none() {
            unparsable("month", text);
        }
        parsed
    });

    let cases = present(raw.cases.as_deref()).and_then(|text| {
        let parsed = parse_whole(text).and_then(|v| u64::try_from(v).ok());
        if parsed.is_none() {
            unparsable("cases", text);
        }
        parsed
    });

    let population = present(raw.population.as_deref()).and_then(|text| {
        let parsed = parse_number(text);
        if parsed.is_none() {
            unparsable("population", text);
        }
        parsed.filter(|p| *p > 0.0)
    });

    let (incidence, incidence_source) = match present(raw.incidence_per_100k.as_deref()) {
        None => derived(cases, population),
        Some(text) => match parse_number(text).filter(|v| *v >= 0.0) {
            Some(value) => (Some(value), IncidenceSource::Explicit),
            None => {
                unparsable("incidence_per_100k", text);
                (None, IncidenceSource::Missing)
            }
        },
    };

    let district = raw.district.unwrap_or_default();
    if incidence_source == IncidenceSource::Missing {
        issues.push(RowIssue::UndefinedIncidence {
            line,
            district: district.clone(),
        });
    }

    CaseRecord {
        line,
        year,
        month,
        key: normalize_district(&district),
        district,
        cases,
        population,
        incidence,
        incidence_source,
    }
}

/// Cell texts read as a missing value rather than as data.
const MISSING_MARKERS: &[&str] = &["", "NA", "N/A", "n/a", "NaN", "nan", "null", "NULL", "-"];

/// `None` for an absent cell or a missing-value marker.
fn present(text: Option<&str>) -> Option<&str> {
    text.map(str::trim)
        .filter(|t| !MISSING_MARKERS.contains(t))
}

/// Parses an integer, accepting floats without a fractional part (`"2024.0"`).
fn parse_whole(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(v) = text.parse::<i64>() {
        return Some(v);
    }
    let v = text.parse::<f64>().ok()?;
    (v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64).then_some(v as i64)
}

/// Parses a finite number. `NaN` and infinities count as unparsable.
fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
