use anyhow::Result;
use log::{debug, warn};
use std::collections::{BTreeSet, HashMap};

use crate::models::{ColumnData, FeatureMatrix, ObservationTable, MONTH_COLUMN, START_CLUSTER_COLUMN};

#[derive(Debug, Clone, PartialEq)]
enum FeatureSource {
    Month,
    StartCluster,
    Categorical(String),
    Numeric(String),
}

/// Sorted vocabulary of one categorical column; codes are positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCodes {
    codes: HashMap<String, usize>,
}

impl CategoryCodes {
    pub fn fit<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a Option<String>>,
    {
        let vocabulary: BTreeSet<&str> = values.into_iter().flatten().map(String::as_str).collect();
        let codes = vocabulary
            .into_iter()
            .enumerate()
            .map(|(code, value)| (value.to_string(), code))
            .collect();
        Self { codes }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Unseen and missing values encode as NaN.
    pub fn encode(&self, value: Option<&str>) -> f64 {
        value
            .and_then(|value| self.codes.get(value))
            .map_or(f64::NAN, |code| *code as f64)
    }
}

/// Column order and category vocabularies fitted on the training table.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureLayout {
    sources: Vec<FeatureSource>,
    names: Vec<String>,
    categorical: Vec<usize>,
    vocabularies: HashMap<String, CategoryCodes>,
}

impl FeatureLayout {
    pub fn fit(table: &ObservationTable) -> Self {
        let mut sources = Vec::new();
        let mut vocabularies = HashMap::new();
        if table.months.is_some() {
            sources.push(FeatureSource::Month);
        }
        sources.push(FeatureSource::StartCluster);
        vocabularies.insert(
            START_CLUSTER_COLUMN.to_string(),
            CategoryCodes::fit(&table.start_clusters),
        );
        for column in &table.columns {
            if let ColumnData::Categorical(values) = &column.data {
                vocabularies.insert(column.name.clone(), CategoryCodes::fit(values));
                sources.push(FeatureSource::Categorical(column.name.clone()));
            }
        }
        for column in &table.columns {
            if column.is_numeric() {
                sources.push(FeatureSource::Numeric(column.name.clone()));
            }
        }

        let names = sources
            .iter()
            .map(|source| match source {
                FeatureSource::Month => MONTH_COLUMN.to_string(),
                FeatureSource::StartCluster => START_CLUSTER_COLUMN.to_string(),
                FeatureSource::Categorical(name) | FeatureSource::Numeric(name) => name.clone(),
            })
            .collect();
        let categorical = sources
            .iter()
            .enumerate()
            .filter(|(_, source)| {
                matches!(
                    source,
                    FeatureSource::StartCluster | FeatureSource::Categorical(_)
                )
            })
            .map(|(idx, _)| idx)
            .collect();

        Self {
            sources,
            names,
            categorical,
            vocabularies,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn categorical_indices(&self) -> &[usize] {
        &self.categorical
    }

    pub fn transform(&self, table: &ObservationTable) -> Result<FeatureMatrix> {
        let row_count = table.row_count();
        let mut matrix_columns: Vec<Vec<f64>> = Vec::with_capacity(self.sources.len());

        for (source, name) in self.sources.iter().zip(&self.names) {
            let column = match source {
                FeatureSource::Month => match &table.months {
                    Some(months) => months.iter().map(|m| m.unwrap_or(f64::NAN)).collect(),
                    None => missing_feature(name, row_count),
                },
                FeatureSource::StartCluster => {
                    let codes = &self.vocabularies[START_CLUSTER_COLUMN];
                    table
                        .start_clusters
                        .iter()
                        .map(|value| codes.encode(value.as_deref()))
                        .collect()
                }
                FeatureSource::Categorical(column_name) => {
                    let codes = &self.vocabularies[column_name];
                    match table.column(column_name).and_then(|c| c.as_categorical()) {
                        Some(values) => values
                            .iter()
                            .map(|value| codes.encode(value.as_deref()))
                            .collect(),
                        None => missing_feature(name, row_count),
                    }
                }
                FeatureSource::Numeric(column_name) => {
                    match table.column(column_name).and_then(|c| c.as_numeric()) {
                        Some(values) => values.iter().map(|v| v.unwrap_or(f64::NAN)).collect(),
                        None => missing_feature(name, row_count),
                    }
                }
            };
            matrix_columns.push(column);
        }

        let rows = (0..row_count)
            .map(|row| matrix_columns.iter().map(|column| column[row]).collect())
            .collect();
        debug!(
            "Built feature matrix with {} rows and {} features",
            row_count,
            self.names.len()
        );
        FeatureMatrix::new(self.names.clone(), self.categorical.clone(), rows)
    }
}

fn missing_feature(name: &str, row_count: usize) -> Vec<f64> {
    warn!(
        "Feature {} is absent from this table; filling with missing values",
        name
    );
    vec![f64::NAN; row_count]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Column;

    fn train_table() -> ObservationTable {
        ObservationTable::new(
            vec!["1".into(), "2".into()],
            Some(vec![Some(4.0), Some(5.0)]),
            vec![Some("{b}".into()), Some("{a}".into())],
            Some(vec![Some("{a}".into()), Some("{b}".into())]),
            vec![
                Column::numeric("x", vec![Some(1.0), None]),
                Column::categorical("segment", vec![Some("retail".into()), Some("corp".into())]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn layout_orders_month_categoricals_then_numerics() {
        let layout = FeatureLayout::fit(&train_table());
        assert_eq!(layout.names(), &["month", "start_cluster", "segment", "x"]);
        assert_eq!(layout.categorical_indices(), &[1, 2]);

        let matrix = layout.transform(&train_table()).unwrap();
        assert_eq!(matrix.rows[0][..3], [4.0, 1.0, 1.0]);
        assert_eq!(matrix.rows[0][3], 1.0);
        assert_eq!(matrix.rows[1][..3], [5.0, 0.0, 0.0]);
        assert!(matrix.rows[1][3].is_nan());
    }

    #[test]
    fn test_table_uses_training_vocabulary_and_columns() {
        let layout = FeatureLayout::fit(&train_table());
        let test = ObservationTable::new(
            vec!["3".into()],
            Some(vec![Some(6.0)]),
            vec![Some("{new}".into())],
            None,
            vec![Column::categorical("segment", vec![Some("corp".into())])],
        )
        .unwrap();

        let matrix = layout.transform(&test).unwrap();
        assert_eq!(matrix.feature_count(), 4);
        assert_eq!(matrix.rows[0][0], 6.0);
        assert!(matrix.rows[0][1].is_nan());
        assert_eq!(matrix.rows[0][2], 0.0);
        assert!(matrix.rows[0][3].is_nan());
    }
}
