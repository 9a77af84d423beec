use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::models::{
    is_missing_token, parse_category_cell, parse_month_cell, parse_numeric_cell, Column,
    ColumnData, ColumnKind, ObservationTable, END_CLUSTER_COLUMN, ID_COLUMN, MONTH_COLUMN, START_CLUSTER_COLUMN,
};
use crate::weights::WeightTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    Training,
    Test,
}

impl TableRole {
    fn label(self) -> &'static str {
        match self {
            TableRole::Training => "training",
            TableRole::Test => "test",
        }
    }
}

/// Feature column kinds of a loaded table, used to read another table the same way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSchema {
    kinds: HashMap<String, ColumnKind>,
}

impl ColumnSchema {
    pub fn from_table(table: &ObservationTable) -> Self {
        let kinds = table
            .columns
            .iter()
            .map(|column| (column.name.clone(), column.data.kind()))
            .collect();
        Self { kinds }
    }

    pub fn kind(&self, name: &str) -> Option<ColumnKind> {
        self.kinds.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Reads an observation table from a headed CSV. Columns other than the
/// reserved ones are numeric when every present cell parses as a number.
pub fn read_observation_table<R: Read>(reader: R, role: TableRole) -> Result<ObservationTable> {
    read_observation_table_with_schema(reader, role, None)
}

/// Like [`read_observation_table`], but columns named in `schema` keep the
/// schema's kind. Numeric cells that do not parse become missing.
pub fn read_observation_table_with_schema<R: Read>(
    reader: R,
    role: TableRole,
    schema: Option<&ColumnSchema>,
) -> Result<ObservationTable> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);
    let headers: Vec<String> = csv_reader
        .headers()
        .context("Failed to read table header")?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();

    let id_idx = headers
        .iter()
        .position(|header| header == ID_COLUMN)
        .ok_or_else(|| anyhow!("{} table has no {} column", role.label(), ID_COLUMN))?;
    let month_idx = headers.iter().position(|header| header == MONTH_COLUMN);
    let start_idx = headers
        .iter()
        .position(|header| header == START_CLUSTER_COLUMN);
    let end_idx = headers.iter().position(|header| header == END_CLUSTER_COLUMN);
    if role == TableRole::Training && end_idx.is_none() {
        return Err(anyhow!(
            "training table has no {} column",
            END_CLUSTER_COLUMN
        ));
    }
    if role == TableRole::Test && end_idx.is_some() {
        warn!(
            "Ignoring {} column present in the test table",
            END_CLUSTER_COLUMN
        );
    }

    let reserved = [Some(id_idx), month_idx, start_idx, end_idx];
    let feature_indices: Vec<usize> = (0..headers.len())
        .filter(|idx| !reserved.contains(&Some(*idx)))
        .collect();

    let mut ids = Vec::new();
    let mut raw_months = Vec::new();
    let mut start_clusters = Vec::new();
    let mut end_clusters = Vec::new();
    let mut raw_features: Vec<Vec<String>> = vec![Vec::new(); feature_indices.len()];

    for (line, record) in csv_reader.records().enumerate() {
        let record = record.with_context(|| format!("Malformed {} row {}", role.label(), line + 1))?;
        let cell = |idx: usize| record.get(idx).unwrap_or("");
        let id = cell(id_idx).trim();
        if is_missing_token(id) {
            return Err(anyhow!(
                "{} row {} has no {}",
                role.label(),
                line + 1,
                ID_COLUMN
            ));
        }
        ids.push(id.to_string());
        if let Some(idx) = month_idx {
            raw_months.push(cell(idx).to_string());
        }
        start_clusters.push(start_idx.and_then(|idx| parse_category_cell(cell(idx))));
        if let Some(idx) = end_idx {
            end_clusters.push(parse_category_cell(cell(idx)));
        }
        for (slot, idx) in raw_features.iter_mut().zip(&feature_indices) {
            slot.push(cell(*idx).to_string());
        }
    }

    let months = match month_idx {
        Some(_) => {
            let parsed: Vec<Option<f64>> =
                raw_months.iter().map(|raw| parse_month_cell(raw)).collect();
            let unparsed = raw_months
                .iter()
                .zip(&parsed)
                .filter(|(raw, value)| value.is_none() && !is_missing_token(raw))
                .count();
            if unparsed > 0 {
                warn!(
                    "{} {} value(s) in the {} table could not be parsed and are treated as missing",
                    unparsed,
                    MONTH_COLUMN,
                    role.label()
                );
            }
            Some(parsed)
        }
        None => None,
    };

    let columns = feature_indices
        .iter()
        .zip(raw_features)
        .map(|(idx, values)| {
            let name = &headers[*idx];
            match schema.and_then(|schema| schema.kind(name)) {
                Some(ColumnKind::Numeric) => numeric_column(name, values, role),
                Some(ColumnKind::Categorical) => categorical_column(name, values),
                None => infer_column(name, values),
            }
        })
        .collect();

    let end_clusters = match role {
        TableRole::Training => Some(end_clusters),
        TableRole::Test => None,
    };

    ObservationTable::new(ids, months, start_clusters, end_clusters, columns)
}

fn infer_column(name: &str, values: Vec<String>) -> Column {
    let numeric = values
        .iter()
        .filter(|raw| !is_missing_token(raw))
        .all(|raw| raw.trim().parse::<f64>().is_ok());
    if numeric {
        Column::numeric(name, values.iter().map(|raw| parse_numeric_cell(raw)).collect())
    } else {
        categorical_column(name, values)
    }
}

fn numeric_column(name: &str, values: Vec<String>, role: TableRole) -> Column {
    let parsed: Vec<Option<f64>> = values.iter().map(|raw| parse_numeric_cell(raw)).collect();
    let unparsed = values
        .iter()
        .zip(&parsed)
        .filter(|(raw, value)| value.is_none() && !is_missing_token(raw))
        .count();
    if unparsed > 0 {
        warn!(
            "{} non-numeric value(s) in {} column {} treated as missing",
            unparsed,
            role.label(),
            name
        );
    }
    Column::numeric(name, parsed)
}

fn categorical_column(name: &str, values: Vec<String>) -> Column {
    Column::categorical(
        name,
        values.iter().map(|raw| parse_category_cell(raw)).collect(),
    )
}

pub fn load_observation_table<P: AsRef<Path>>(path: P, role: TableRole) -> Result<ObservationTable> {
    load_observation_table_with_schema(path, role, None)
}

pub fn load_observation_table_with_schema<P: AsRef<Path>>(
    path: P,
    role: TableRole,
    schema: Option<&ColumnSchema>,
) -> Result<ObservationTable> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open {} table at {}", role.label(), path.display()))?;
    let table = read_observation_table_with_schema(file, role, schema)
        .with_context(|| format!("Failed to load {} table from {}", role.label(), path.display()))?;
    info!(
        "Loaded {} table from {} ({} rows, {} feature columns)",
        role.label(),
        path.display(),
        table.row_count(),
        table.columns.len()
    );
    Ok(table)
}

fn format_numeric(value: Option<f64>) -> String {
    value.map_or_else(String::new, |value| value.to_string())
}

/// Writes a (possibly derived) table with its reserved columns first. Missing
/// cells are left empty.
pub fn write_observation_table<W: Write>(writer: W, table: &ObservationTable) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut header = vec![ID_COLUMN.to_string()];
    if table.months.is_some() {
        header.push(MONTH_COLUMN.to_string());
    }
    header.push(START_CLUSTER_COLUMN.to_string());
    if table.end_clusters.is_some() {
        header.push(END_CLUSTER_COLUMN.to_string());
    }
    header.extend(table.columns.iter().map(|column| column.name.clone()));
    csv_writer.write_record(&header)?;

    for row in 0..table.row_count() {
        let mut record = Vec::with_capacity(header.len());
        record.push(table.ids[row].clone());
        if let Some(months) = &table.months {
            record.push(format_numeric(months[row]));
        }
        record.push(table.start_clusters[row].clone().unwrap_or_default());
        if let Some(end_clusters) = &table.end_clusters {
            record.push(end_clusters[row].clone().unwrap_or_default());
        }
        for column in &table.columns {
            record.push(match &column.data {
                ColumnData::Numeric(values) => format_numeric(values[row]),
                ColumnData::Categorical(values) => values[row].clone().unwrap_or_default(),
            });
        }
        csv_writer.write_record(&record)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn save_observation_table<P: AsRef<Path>>(path: P, table: &ObservationTable) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("Failed to create table at {}", path.display()))?;
    write_observation_table(file, table)
        .with_context(|| format!("Failed to write table to {}", path.display()))?;
    info!(
        "Wrote {} rows x {} columns to {}",
        table.row_count(),
        table.columns.len(),
        path.display()
    );
    Ok(())
}

/// Output schema taken from the sample submission: id universe and class column order.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionSchema {
    pub ids: Vec<String>,
    pub class_columns: Vec<String>,
}

impl SubmissionSchema {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);
        let headers: Vec<String> = csv_reader
            .headers()
            .context("Failed to read sample submission header")?
            .iter()
            .map(|header| header.trim().to_string())
            .collect();
        let id_idx = headers
            .iter()
            .position(|header| header == ID_COLUMN)
            .ok_or_else(|| anyhow!("Sample submission has no {} column", ID_COLUMN))?;
        let class_columns: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != id_idx)
            .map(|(_, header)| header.clone())
            .collect();
        if class_columns.is_empty() {
            return Err(anyhow!("Sample submission has no class columns"));
        }

        let mut ids = Vec::new();
        for (line, record) in csv_reader.records().enumerate() {
            let record =
                record.with_context(|| format!("Malformed sample submission row {}", line + 1))?;
            let id = record.get(id_idx).unwrap_or("").trim();
            if id.is_empty() {
                return Err(anyhow!("Sample submission row {} has no id", line + 1));
            }
            ids.push(id.to_string());
        }

        Ok(Self { ids, class_columns })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open sample submission at {}", path.display()))?;
        Self::from_reader(file)
            .with_context(|| format!("Invalid sample submission in {}", path.display()))
    }
}

/// Every input of one run, loaded once.
#[derive(Debug, Clone)]
pub struct CompetitionData {
    pub train: ObservationTable,
    pub test: ObservationTable,
    pub weights: WeightTable,
    pub schema: SubmissionSchema,
}

impl CompetitionData {
    pub fn load(
        train_path: &Path,
        test_path: &Path,
        weights_path: &Path,
        sample_submission_path: &Path,
    ) -> Result<Self> {
        let train = load_observation_table(train_path, TableRole::Training)?;
        let schema = ColumnSchema::from_table(&train);
        let test = load_observation_table_with_schema(test_path, TableRole::Test, Some(&schema))?;
        let weights = WeightTable::load(weights_path)?;
        let schema = SubmissionSchema::load(sample_submission_path)?;
        info!(
            "Sample submission lists {} ids and {} class columns",
            schema.ids.len(),
            schema.class_columns.len()
        );
        Ok(Self {
            train,
            test,
            weights,
            schema,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_training_table_with_inferred_types() {
        let csv = "id,month,start_cluster,balance_avg,segment,end_cluster\n\
                   1,month_4,{a},1.5,retail,{a}\n\
                   1,month_5,,NA,,{b}\n";
        let table = read_observation_table(csv.as_bytes(), TableRole::Training).unwrap();

        assert_eq!(table.row_count(), 2);
        assert_eq!(table.months, Some(vec![Some(4.0), Some(5.0)]));
        assert_eq!(table.start_clusters, vec![Some("{a}".to_string()), None]);
        assert_eq!(
            table.end_clusters,
            Some(vec![Some("{a}".to_string()), Some("{b}".to_string())])
        );
        assert_eq!(
            table.column("balance_avg").unwrap().data,
            ColumnData::Numeric(vec![Some(1.5), None])
        );
        assert_eq!(
            table.column("segment").unwrap().data,
            ColumnData::Categorical(vec![Some("retail".to_string()), None])
        );
    }

    #[test]
    fn test_table_without_month_column_has_no_months() {
        let csv = "id,start_cluster,x\n7,{a},3\n";
        let table = read_observation_table(csv.as_bytes(), TableRole::Test).unwrap();
        assert!(table.months.is_none());
        assert!(table.end_clusters.is_none());
    }

    #[test]
    fn training_table_requires_target() {
        let csv = "id,start_cluster,x\n7,{a},3\n";
        assert!(read_observation_table(csv.as_bytes(), TableRole::Training).is_err());
    }

    #[test]
    fn test_table_follows_training_column_kinds() {
        let train_csv = "id,segment,x,end_cluster\n1,7,1.5,{a}\n2,corp,2.5,{b}\n";
        let train = read_observation_table(train_csv.as_bytes(), TableRole::Training).unwrap();
        let schema = ColumnSchema::from_table(&train);
        assert_eq!(schema.kind("segment"), Some(ColumnKind::Categorical));
        assert_eq!(schema.kind("x"), Some(ColumnKind::Numeric));

        let test_csv = "id,segment,x,extra\n3,7,?,4\n4,8,3.5,5\n";
        let test =
            read_observation_table_with_schema(test_csv.as_bytes(), TableRole::Test, Some(&schema))
                .unwrap();
        assert_eq!(
            test.column("segment").unwrap().data,
            ColumnData::Categorical(vec![Some("7".to_string()), Some("8".to_string())])
        );
        assert_eq!(
            test.column("x").unwrap().data,
            ColumnData::Numeric(vec![None, Some(3.5)])
        );
        assert!(test.column("extra").unwrap().is_numeric());

        let inferred = read_observation_table(test_csv.as_bytes(), TableRole::Test).unwrap();
        assert!(inferred.column("segment").unwrap().is_numeric());
        assert!(!inferred.column("x").unwrap().is_numeric());
    }

    #[test]
    fn sample_submission_keeps_column_order() {
        let csv = "id,{b},{a}\n3,0,0\n1,0,0\n";
        let schema = SubmissionSchema::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(schema.ids, vec!["3", "1"]);
        assert_eq!(schema.class_columns, vec!["{b}", "{a}"]);
    }

    #[test]
    fn written_table_reads_back_with_reserved_columns_first() {
        let csv = "id,x,month,end_cluster,start_cluster\n1,2.5,3,{b},{a}\n2,,4,{a},\n";
        let table = read_observation_table(csv.as_bytes(), TableRole::Training).unwrap();
        let mut buffer = Vec::new();
        write_observation_table(&mut buffer, &table).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "id,month,start_cluster,end_cluster,x\n1,3,{a},{b},2.5\n2,4,,{a},\n"
        );
    }
}
