use anyhow::Result;
use log::{info, warn};
use std::collections::BTreeMap;

use crate::models::{ObservationTable, UNKNOWN_CLUSTER};
use crate::weights::{WeightTable, FEATURE_DEFAULT_WEIGHT};

pub const MISSING_COUNT_COLUMN: &str = "missing_cnt";
pub const CLUSTER_WEIGHT_COLUMN: &str = "cluster_weight_start";
pub const REL_RANGE_EPSILON: f64 = 1e-5;

const AVG_SUFFIX: &str = "_avg";
const MAX_SUFFIX: &str = "_max";
const MIN_SUFFIX: &str = "_min";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnGroup {
    pub base: String,
    pub avg: Option<String>,
    pub max: Option<String>,
    pub min: Option<String>,
}

impl ColumnGroup {
    pub fn range_column(&self) -> String {
        format!("{}_range", self.base)
    }

    pub fn rel_range_column(&self) -> String {
        format!("{}_rel_range", self.base)
    }

    pub fn has_range(&self) -> bool {
        self.max.is_some() && self.min.is_some()
    }

    pub fn has_rel_range(&self) -> bool {
        self.has_range() && self.avg.is_some()
    }
}

/// `_avg`/`_max`/`_min` column families, declared once from the training
/// table and reused for every table after it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnGroups {
    groups: Vec<ColumnGroup>,
}

impl ColumnGroups {
    pub fn from_columns<S: AsRef<str>>(names: &[S]) -> Self {
        let mut by_base: BTreeMap<String, ColumnGroup> = BTreeMap::new();
        for name in names {
            let name = name.as_ref();
            let Some((base, suffix)) = split_suffix(name) else {
                continue;
            };
            let group = by_base
                .entry(base.to_string())
                .or_insert_with(|| ColumnGroup {
                    base: base.to_string(),
                    avg: None,
                    max: None,
                    min: None,
                });
            let slot = match suffix {
                AVG_SUFFIX => &mut group.avg,
                MAX_SUFFIX => &mut group.max,
                _ => &mut group.min,
            };
            *slot = Some(name.to_string());
        }
        Self {
            groups: by_base.into_values().collect(),
        }
    }

    pub fn from_table(table: &ObservationTable) -> Self {
        Self::from_columns(&table.numeric_column_names())
    }

    pub fn groups(&self) -> &[ColumnGroup] {
        &self.groups
    }

    pub fn derived_column_count(&self) -> usize {
        self.groups
            .iter()
            .map(|group| usize::from(group.has_range()) + usize::from(group.has_rel_range()))
            .sum()
    }
}

fn split_suffix(name: &str) -> Option<(&str, &'static str)> {
    [AVG_SUFFIX, MAX_SUFFIX, MIN_SUFFIX]
        .into_iter()
        .find_map(|suffix| {
            name.strip_suffix(suffix)
                .filter(|base| !base.is_empty())
                .map(|base| (base, suffix))
        })
}

pub fn range_value(max: f64, min: f64) -> f64 {
    max - min
}

pub fn rel_range_value(max: f64, min: f64, avg: f64) -> f64 {
    (max - min) / (avg.abs() + REL_RANGE_EPSILON)
}

/// Row-local features that need no fitted state beyond the column groups.
pub struct CrossSectionalBuilder<'a> {
    weights: &'a WeightTable,
    groups: &'a ColumnGroups,
}

impl<'a> CrossSectionalBuilder<'a> {
    pub fn new(weights: &'a WeightTable, groups: &'a ColumnGroups) -> Self {
        Self { weights, groups }
    }

    /// Records `missing_cnt` from the untouched table, then replaces missing
    /// `start_cluster` values with the sentinel. Must run before imputation.
    pub fn annotate_raw(&self, table: &mut ObservationTable) -> Result<()> {
        let counts = table
            .missing_counts()
            .into_iter()
            .map(|count| Some(count as f64))
            .collect();
        let mut sentinel_rows = 0usize;
        for cluster in table.start_clusters.iter_mut() {
            if cluster.is_none() {
                *cluster = Some(UNKNOWN_CLUSTER.to_string());
                sentinel_rows += 1;
            }
        }
        if sentinel_rows > 0 {
            info!(
                "Replaced {} missing start_cluster value(s) with {}",
                sentinel_rows, UNKNOWN_CLUSTER
            );
        }
        table.push_numeric(MISSING_COUNT_COLUMN, counts)
    }

    /// Adds `cluster_weight_start` plus range and relative-range columns.
    pub fn derive(&self, table: &mut ObservationTable) -> Result<()> {
        let cluster_weights = table
            .start_clusters
            .iter()
            .map(|cluster| {
                Some(
                    cluster
                        .as_deref()
                        .map_or(FEATURE_DEFAULT_WEIGHT, |label| self.weights.feature_weight(label)),
                )
            })
            .collect();
        table.push_numeric(CLUSTER_WEIGHT_COLUMN, cluster_weights)?;

        let mut derived = Vec::new();
        for group in self.groups.groups() {
            if !group.has_range() {
                continue;
            }
            let (Some(max), Some(min)) = (
                lookup(table, group.max.as_deref()),
                lookup(table, group.min.as_deref()),
            ) else {
                warn!(
                    "Columns for group {} are missing from this table; range features skipped",
                    group.base
                );
                continue;
            };
            let range: Vec<Option<f64>> = max
                .iter()
                .zip(min)
                .map(|(max, min)| Some(range_value((*max)?, (*min)?)))
                .collect();
            derived.push((group.range_column(), range));

            if let Some(avg) = lookup(table, group.avg.as_deref()) {
                let rel_range: Vec<Option<f64>> = max
                    .iter()
                    .zip(min)
                    .zip(avg)
                    .map(|((max, min), avg)| Some(rel_range_value((*max)?, (*min)?, (*avg)?)))
                    .collect();
                derived.push((group.rel_range_column(), rel_range));
            }
        }

        for (name, values) in derived {
            table.push_numeric(name, values)?;
        }
        Ok(())
    }
}

fn lookup<'t>(table: &'t ObservationTable, name: Option<&str>) -> Option<&'t [Option<f64>]> {
    table.column(name?)?.as_numeric()
}
