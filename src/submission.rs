use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::labels::LabelEncoder;
use crate::models::{ProbabilityMatrix, ID_COLUMN};

/// Canonical-order submission: `id` followed by one probability per class column.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub class_columns: Vec<String>,
    pub rows: Vec<(String, Vec<f64>)>,
}

/// Maps test predictions onto the canonical ids. Repeated test ids keep the
/// last occurrence; canonical ids or classes without predictions are 0.0 and
/// ids outside the canonical list are dropped.
pub fn assemble(
    test_predictions: &ProbabilityMatrix,
    test_ids: &[String],
    canonical_ids: &[String],
    canonical_class_columns: &[String],
) -> Result<Submission> {
    if test_ids.len() != test_predictions.row_count() {
        return Err(anyhow!(
            "Got {} test ids for {} prediction rows",
            test_ids.len(),
            test_predictions.row_count()
        ));
    }

    let mut last_row: HashMap<&str, usize> = HashMap::with_capacity(test_ids.len());
    for (row, id) in test_ids.iter().enumerate() {
        last_row.insert(id.as_str(), row);
    }
    let column_sources: Vec<Option<usize>> = canonical_class_columns
        .iter()
        .map(|column| test_predictions.class_index(column))
        .collect();
    let unmapped = column_sources.iter().filter(|source| source.is_none()).count();
    if unmapped > 0 {
        info!(
            "{} submission class column(s) never seen in training; filled with 0",
            unmapped
        );
    }

    let mut absent = 0usize;
    let rows: Vec<(String, Vec<f64>)> = canonical_ids
        .iter()
        .map(|id| {
            let probabilities = match last_row.get(id.as_str()) {
                Some(row) => column_sources
                    .iter()
                    .map(|source| source.map_or(0.0, |class_idx| test_predictions.rows[*row][class_idx]))
                    .collect(),
                None => {
                    absent += 1;
                    vec![0.0; canonical_class_columns.len()]
                }
            };
            (id.clone(), probabilities)
        })
        .collect();
    if absent > 0 {
        warn!(
            "{} canonical id(s) have no test rows; their probabilities are 0",
            absent
        );
    }

    Ok(Submission {
        class_columns: canonical_class_columns.to_vec(),
        rows,
    })
}

fn format_probability(value: f64) -> String {
    format!("{:.6}", value)
}

impl Submission {
    pub fn write<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        let mut header = vec![ID_COLUMN.to_string()];
        header.extend(self.class_columns.iter().cloned());
        csv_writer.write_record(&header)?;
        for (id, probabilities) in &self.rows {
            let mut record = Vec::with_capacity(probabilities.len() + 1);
            record.push(id.clone());
            record.extend(probabilities.iter().map(|value| format_probability(*value)));
            csv_writer.write_record(&record)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create submission at {}", path.display()))?;
        self.write(file)
            .with_context(|| format!("Failed to write submission to {}", path.display()))?;
        info!(
            "Wrote submission with {} rows to {}",
            self.rows.len(),
            path.display()
        );
        Ok(())
    }
}

/// Writes out-of-fold predictions: row index, id, true label, then one column per class.
pub fn write_oof_predictions<W: Write>(
    writer: W,
    oof: &ProbabilityMatrix,
    ids: &[String],
    labels: &[usize],
    encoder: &LabelEncoder,
) -> Result<()> {
    if ids.len() != oof.row_count() || labels.len() != oof.row_count() {
        return Err(anyhow!(
            "Out-of-fold matrix has {} rows but {} ids and {} labels",
            oof.row_count(),
            ids.len(),
            labels.len()
        ));
    }
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut header = vec![
        String::from("row"),
        ID_COLUMN.to_string(),
        String::from("label"),
    ];
    header.extend(oof.classes.iter().cloned());
    csv_writer.write_record(&header)?;
    for (row, (id, probabilities)) in ids.iter().zip(&oof.rows).enumerate() {
        let mut record = vec![
            row.to_string(),
            id.clone(),
            encoder.decode(labels[row])?.to_string(),
        ];
        record.extend(probabilities.iter().map(|value| format_probability(*value)));
        csv_writer.write_record(&record)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn save_oof_predictions<P: AsRef<Path>>(
    path: P,
    oof: &ProbabilityMatrix,
    ids: &[String],
    labels: &[usize],
    encoder: &LabelEncoder,
) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("Failed to create out-of-fold file at {}", path.display()))?;
    write_oof_predictions(file, oof, ids, labels, encoder)
        .with_context(|| format!("Failed to write out-of-fold predictions to {}", path.display()))?;
    info!("Wrote out-of-fold predictions to {}", path.display());
    Ok(())
}
