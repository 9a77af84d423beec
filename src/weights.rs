use anyhow::{anyhow, Context, Result};
use log::info;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::models::{is_missing_token, parse_category_cell};

/// Default weight of an unlisted `start_cluster` when used as a feature.
pub const FEATURE_DEFAULT_WEIGHT: f64 = 0.0;
/// Default weight of an unlisted class when averaging per-class AUC.
pub const EVALUATION_DEFAULT_WEIGHT: f64 = 1.0;

/// Cluster label to importance weight. Loaded once and shared read-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightTable {
    weights: HashMap<String, f64>,
}

impl WeightTable {
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut weights = HashMap::new();
        for (label, weight) in pairs {
            let label = label.into();
            if !weight.is_finite() || weight < 0.0 {
                return Err(anyhow!(
                    "Cluster weight for {} must be a non-negative number (value: {})",
                    label,
                    weight
                ));
            }
            weights.insert(label, weight);
        }
        Ok(Self { weights })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open cluster weights at {}", path.display()))?;
        let table = Self::from_reader(file)
            .with_context(|| format!("Invalid cluster weights in {}", path.display()))?;
        info!(
            "Loaded {} cluster weight(s) from {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    /// Reads a headed two-column CSV: cluster label, unnormalized weight.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);
        let mut pairs = Vec::new();
        for (line, record) in csv_reader.records().enumerate() {
            let record = record.with_context(|| format!("Malformed weight row {}", line + 1))?;
            if record.len() < 2 {
                return Err(anyhow!(
                    "Weight row {} needs a label and a weight",
                    line + 1
                ));
            }
            let Some(label) = parse_category_cell(&record[0]) else {
                continue;
            };
            let raw_weight = &record[1];
            if is_missing_token(raw_weight) {
                return Err(anyhow!("Weight for cluster {} is missing", label));
            }
            let weight = raw_weight.trim().parse::<f64>().map_err(|err| {
                anyhow!(
                    "Failed to parse weight \"{}\" for cluster {}: {}",
                    raw_weight,
                    label,
                    err
                )
            })?;
            pairs.push((label, weight));
        }
        Self::from_pairs(pairs)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.weights.get(label).copied()
    }

    pub fn feature_weight(&self, label: &str) -> f64 {
        self.get(label).unwrap_or(FEATURE_DEFAULT_WEIGHT)
    }

    pub fn evaluation_weight(&self, label: &str) -> f64 {
        self.get(label).unwrap_or(EVALUATION_DEFAULT_WEIGHT)
    }
}
