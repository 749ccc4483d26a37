//! Optional `district,population` override table.

use std::collections::HashMap;
use std::io::{Read, Write};

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MapError, Result};
use crate::geo::GeoDataset;
use crate::normalize::normalize_district;

/// Known populations used to pre-fill a fresh template.
const PREFILL: &[(&str, u64)] = &[("colombo", 2_415_000), ("gampaha", 2_394_000)];

/// Populations keyed by normalized district.
#[derive(Debug, Clone, Default)]
pub struct PopulationTable {
    entries: HashMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct PopulationRow {
    district: Option<String>,
    population: Option<String>,
}

#[derive(Debug, Serialize)]
struct TemplateRow<'a> {
    district: &'a str,
    population: Option<u64>,
}

impl PopulationTable {
    /// Reads a population CSV. Rows without a district or with a population
    /// that is not a positive number are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::MissingColumn`] when either column is absent.
    #[tracing::instrument(skip(reader))]
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
        let headers: StringRecord = rdr
            .headers()?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect::<Vec<_>>()
            .into();

        for column in ["district", "population"] {
            if !headers.iter().any(|h| h == column) {
                return Err(MapError::MissingColumn {
                    table: "population",
                    column,
                });
            }
        }

        let mut entries = HashMap::new();
        let mut dropped = 0usize;

        for result in rdr.records() {
            let row = result?;
            let parsed: PopulationRow = row.deserialize(Some(&headers))?;
            let population = parsed
                .population
                .as_deref()
                .and_then(|p| p.parse::<f64>().ok())
                .filter(|p| p.is_finite() && *p > 0.0);

            match (parsed.district, population) {
                (Some(district), Some(population)) => {
                    entries.insert(normalize_district(&district), population);
                }
                _ => dropped += 1,
            }
        }

        if dropped > 0 {
            warn!(dropped, "Population rows without a usable value were skipped");
        }
        info!(districts = entries.len(), "Population table loaded");

        Ok(Self { entries })
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        Self {
            entries: pairs
                .into_iter()
                .map(|(district, population)| (normalize_district(district), population))
                .collect(),
        }
    }

    /// Population for a normalized key.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Writes a `district,population` template with one row per geo district.
///
/// With `prefill`, Colombo and Gampaha get their known populations.
pub fn write_population_template<W: Write>(
    writer: W,
    geo: &GeoDataset,
    prefill: bool,
) -> Result<usize> {
    let mut wtr = WriterBuilder::new().from_writer(writer);
    let labels = geo.district_labels();

    for district in labels.iter().copied() {
        let key = normalize_district(district);
        let population = PREFILL
            .iter()
            .find(|(k, _)| prefill && *k == key)
            .map(|(_, p)| *p);
        wtr.serialize(TemplateRow {
            district,
            population,
        })?;
    }
    wtr.flush()?;

    Ok(labels.len())
}
