use anyhow::{anyhow, Result};
use serde::Serialize;

pub const ID_COLUMN: &str = "id";
pub const MONTH_COLUMN: &str = "month";
pub const START_CLUSTER_COLUMN: &str = "start_cluster";
pub const END_CLUSTER_COLUMN: &str = "end_cluster";

/// Category used in place of a missing `start_cluster`.
pub const UNKNOWN_CLUSTER: &str = "__unknown__";

const MISSING_TOKENS: [&str; 5] = ["na", "nan", "null", "none", "n/a"];

pub fn is_missing_token(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || MISSING_TOKENS
            .iter()
            .any(|token| trimmed.eq_ignore_ascii_case(token))
}

pub fn parse_numeric_cell(raw: &str) -> Option<f64> {
    if is_missing_token(raw) {
        return None;
    }
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Accepts plain numbers as well as tokens ending in digits, so `month_5` maps to 5.
pub fn parse_month_cell(raw: &str) -> Option<f64> {
    if let Some(value) = parse_numeric_cell(raw) {
        return Some(value);
    }
    if is_missing_token(raw) {
        return None;
    }
    let trimmed = raw.trim();
    let digits_start = trimmed
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(idx, _)| idx)?;
    trimmed[digits_start..].parse::<f64>().ok()
}

pub fn parse_category_cell(raw: &str) -> Option<String> {
    if is_missing_token(raw) {
        None
    } else {
        Some(raw.trim().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
}

impl ColumnData {
    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnData::Numeric(_) => ColumnKind::Numeric,
            ColumnData::Categorical(_) => ColumnKind::Categorical,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(values) => values.len(),
            ColumnData::Categorical(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            ColumnData::Numeric(values) => values.get(row).map_or(true, Option::is_none),
            ColumnData::Categorical(values) => values.get(row).map_or(true, Option::is_none),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Numeric(values),
        }
    }

    pub fn categorical(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Categorical(values),
        }
    }

    pub fn as_numeric(&self) -> Option<&[Option<f64>]> {
        match &self.data {
            ColumnData::Numeric(values) => Some(values),
            ColumnData::Categorical(_) => None,
        }
    }

    pub fn as_numeric_mut(&mut self) -> Option<&mut Vec<Option<f64>>> {
        match &mut self.data {
            ColumnData::Numeric(values) => Some(values),
            ColumnData::Categorical(_) => None,
        }
    }

    pub fn as_categorical(&self) -> Option<&[Option<String>]> {
        match &self.data {
            ColumnData::Categorical(values) => Some(values),
            ColumnData::Numeric(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.data, ColumnData::Numeric(_))
    }
}

/// Per-entity-per-month records. Every stage that touches the table keeps
/// rows at their original index.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTable {
    pub ids: Vec<String>,
    pub months: Option<Vec<Option<f64>>>,
    pub start_clusters: Vec<Option<String>>,
    pub end_clusters: Option<Vec<Option<String>>>,
    pub columns: Vec<Column>,
}

impl ObservationTable {
    pub fn new(
        ids: Vec<String>,
        months: Option<Vec<Option<f64>>>,
        start_clusters: Vec<Option<String>>,
        end_clusters: Option<Vec<Option<String>>>,
        columns: Vec<Column>,
    ) -> Result<Self> {
        let row_count = ids.len();
        if start_clusters.len() != row_count {
            return Err(anyhow!(
                "{} has {} values, expected {}",
                START_CLUSTER_COLUMN,
                start_clusters.len(),
                row_count
            ));
        }
        if let Some(months) = &months {
            if months.len() != row_count {
                return Err(anyhow!(
                    "{} has {} values, expected {}",
                    MONTH_COLUMN,
                    months.len(),
                    row_count
                ));
            }
        }
        if let Some(labels) = &end_clusters {
            if labels.len() != row_count {
                return Err(anyhow!(
                    "{} has {} values, expected {}",
                    END_CLUSTER_COLUMN,
                    labels.len(),
                    row_count
                ));
            }
        }
        for column in &columns {
            if column.data.len() != row_count {
                return Err(anyhow!(
                    "Column {} has {} values, expected {}",
                    column.name,
                    column.data.len(),
                    row_count
                ));
            }
        }
        Ok(Self {
            ids,
            months,
            start_clusters,
            end_clusters,
            columns,
        })
    }

    pub fn row_count(&self) -> usize {
        self.ids.len()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|column| column.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn numeric_column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|column| column.is_numeric())
            .map(|column| column.name.clone())
            .collect()
    }

    /// Appends a derived numeric column, replacing an existing column of the same name.
    pub fn push_numeric(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) -> Result<()> {
        let name = name.into();
        if values.len() != self.row_count() {
            return Err(anyhow!(
                "Derived column {} has {} values, expected {}",
                name,
                values.len(),
                self.row_count()
            ));
        }
        if let Some(existing) = self.column_mut(&name) {
            existing.data = ColumnData::Numeric(values);
        } else {
            self.columns.push(Column::numeric(name, values));
        }
        Ok(())
    }

    /// Missing cells per row across `start_cluster`, `month` and every feature column.
    pub fn missing_counts(&self) -> Vec<usize> {
        (0..self.row_count())
            .map(|row| {
                let mut count = usize::from(self.start_clusters[row].is_none());
                if let Some(months) = &self.months {
                    count += usize::from(months[row].is_none());
                }
                count
                    + self
                        .columns
                        .iter()
                        .filter(|column| column.data.is_missing(row))
                        .count()
            })
            .collect()
    }
}

/// Dense row-major feature matrix. Missing cells are NaN, which LightGBM
/// treats as missing.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub names: Vec<String>,
    pub categorical: Vec<usize>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn new(names: Vec<String>, categorical: Vec<usize>, rows: Vec<Vec<f64>>) -> Result<Self> {
        let width = names.len();
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != width) {
            return Err(anyhow!(
                "Feature row {} has {} values, expected {}",
                idx,
                row.len(),
                width
            ));
        }
        if let Some(index) = categorical.iter().find(|index| **index >= width) {
            return Err(anyhow!(
                "Categorical feature index {} is outside {} features",
                index,
                width
            ));
        }
        Ok(Self {
            names,
            categorical,
            rows,
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn feature_count(&self) -> usize {
        self.names.len()
    }

    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            names: self.names.clone(),
            categorical: self.categorical.clone(),
            rows: indices.iter().map(|idx| self.rows[*idx].clone()).collect(),
        }
    }
}

/// Class-probability rows; column order follows the label encoder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbabilityMatrix {
    pub classes: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl ProbabilityMatrix {
    pub fn zeros(classes: Vec<String>, row_count: usize) -> Self {
        let width = classes.len();
        Self {
            classes,
            rows: vec![vec![0.0; width]; row_count],
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column(&self, class_idx: usize) -> Vec<f64> {
        self.rows
            .iter()
            .map(|row| row.get(class_idx).copied().unwrap_or(0.0))
            .collect()
    }

    pub fn class_index(&self, class: &str) -> Option<usize> {
        self.classes.iter().position(|name| name == class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_tokens_parse_trailing_digits() {
        assert_eq!(parse_month_cell("3"), Some(3.0));
        assert_eq!(parse_month_cell("month_5"), Some(5.0));
        assert_eq!(parse_month_cell("month_12"), Some(12.0));
        assert_eq!(parse_month_cell("month"), None);
        assert_eq!(parse_month_cell(""), None);
    }

    #[test]
    fn missing_tokens_are_recognised() {
        assert!(is_missing_token(""));
        assert!(is_missing_token(" NaN "));
        assert!(is_missing_token("NULL"));
        assert!(!is_missing_token("0"));
        assert_eq!(parse_numeric_cell("1.5"), Some(1.5));
        assert_eq!(parse_numeric_cell("abc"), None);
        assert_eq!(parse_category_cell(" {α} "), Some("{α}".to_string()));
    }

    #[test]
    fn missing_counts_include_cluster_and_month() {
        let table = ObservationTable::new(
            vec!["1".into(), "2".into()],
            Some(vec![Some(1.0), None]),
            vec![None, Some("a".into())],
            None,
            vec![
                Column::numeric("x_avg", vec![None, Some(1.0)]),
                Column::categorical("segment", vec![Some("s".into()), None]),
            ],
        )
        .unwrap();

        assert_eq!(table.missing_counts(), vec![2, 2]);
    }

    #[test]
    fn table_rejects_ragged_columns() {
        let result = ObservationTable::new(
            vec!["1".into()],
            None,
            vec![None],
            None,
            vec![Column::numeric("x", vec![Some(1.0), Some(2.0)])],
        );
        assert!(result.is_err());
    }
}
