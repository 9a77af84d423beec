use anyhow::{anyhow, Result};
use log::{debug, info};
use statrs::statistics::{Data, Median};
use std::collections::{BTreeMap, HashMap};

use crate::models::ObservationTable;

fn median_of(values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let median = Data::new(values).median();
    median.is_finite().then_some(median)
}

/// Fill values fitted on the training table: per-`start_cluster` medians with a
/// global median fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericImputer {
    columns: Vec<String>,
    cluster_medians: HashMap<String, Vec<Option<f64>>>,
    global_medians: Vec<Option<f64>>,
}

impl NumericImputer {
    /// Expects `start_cluster` to be filled already so missing clusters group
    /// under the sentinel.
    pub fn fit(table: &ObservationTable, columns: &[String]) -> Result<Self> {
        let mut global_values: Vec<Vec<f64>> = vec![Vec::new(); columns.len()];
        let mut cluster_values: BTreeMap<String, Vec<Vec<f64>>> = BTreeMap::new();

        for (col_idx, name) in columns.iter().enumerate() {
            let values = table
                .column(name)
                .and_then(|column| column.as_numeric())
                .ok_or_else(|| anyhow!("Imputation column {} is not numeric", name))?;
            for (row, value) in values.iter().enumerate() {
                let Some(value) = value else {
                    continue;
                };
                global_values[col_idx].push(*value);
                if let Some(cluster) = &table.start_clusters[row] {
                    cluster_values
                        .entry(cluster.clone())
                        .or_insert_with(|| vec![Vec::new(); columns.len()])[col_idx]
                        .push(*value);
                }
            }
        }

        // Clusters whose rows are entirely missing still need an entry.
        for cluster in table.start_clusters.iter().flatten() {
            cluster_values
                .entry(cluster.clone())
                .or_insert_with(|| vec![Vec::new(); columns.len()]);
        }

        let global_medians: Vec<Option<f64>> = global_values.into_iter().map(median_of).collect();
        let cluster_medians: HashMap<String, Vec<Option<f64>>> = cluster_values
            .into_iter()
            .map(|(cluster, per_column)| {
                (cluster, per_column.into_iter().map(median_of).collect())
            })
            .collect();

        info!(
            "Fitted imputation medians for {} numeric column(s) across {} cluster(s)",
            columns.len(),
            cluster_medians.len()
        );

        Ok(Self {
            columns: columns.to_vec(),
            cluster_medians,
            global_medians,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn global_median(&self, column: &str) -> Option<f64> {
        let idx = self.columns.iter().position(|name| name == column)?;
        self.global_medians[idx]
    }

    pub fn cluster_median(&self, cluster: &str, column: &str) -> Option<f64> {
        let idx = self.columns.iter().position(|name| name == column)?;
        self.cluster_medians.get(cluster)?[idx]
    }

    /// Fills missing cells in place by row index. Returns the number of cells filled.
    pub fn apply(&self, table: &mut ObservationTable) -> Result<usize> {
        let row_fill: Vec<Option<&Vec<Option<f64>>>> = table
            .start_clusters
            .iter()
            .map(|cluster| {
                cluster
                    .as_ref()
                    .and_then(|cluster| self.cluster_medians.get(cluster))
            })
            .collect();

        let mut filled = 0usize;
        for (col_idx, name) in self.columns.iter().enumerate() {
            let Some(column) = table.column_mut(name) else {
                debug!("Imputation column {} absent from table; skipped", name);
                continue;
            };
            let values = column
                .as_numeric_mut()
                .ok_or_else(|| anyhow!("Imputation column {} is not numeric", name))?;
            for (row, value) in values.iter_mut().enumerate() {
                if value.is_some() {
                    continue;
                }
                let fill = row_fill[row]
                    .and_then(|medians| medians[col_idx])
                    .or(self.global_medians[col_idx]);
                if fill.is_some() {
                    *value = fill;
                    filled += 1;
                }
            }
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Column;

    fn table(clusters: Vec<Option<&str>>, x: Vec<Option<f64>>) -> ObservationTable {
        let ids = (0..clusters.len()).map(|idx| idx.to_string()).collect();
        ObservationTable::new(
            ids,
            None,
            clusters
                .into_iter()
                .map(|cluster| cluster.map(str::to_string))
                .collect(),
            None,
            vec![Column::numeric("x", x)],
        )
        .unwrap()
    }

    #[test]
    fn fills_from_cluster_median_then_global_median() {
        let train = table(
            vec![Some("a"), Some("a"), Some("a"), Some("b"), Some("b")],
            vec![Some(1.0), Some(3.0), None, Some(10.0), Some(20.0)],
        );
        let columns = vec!["x".to_string()];
        let imputer = NumericImputer::fit(&train, &columns).unwrap();

        assert_eq!(imputer.cluster_median("a", "x"), Some(2.0));
        assert_eq!(imputer.cluster_median("b", "x"), Some(15.0));
        assert_eq!(imputer.global_median("x"), Some(6.5));

        let mut test = table(
            vec![Some("a"), Some("b"), Some("unseen"), Some("a")],
            vec![None, None, None, Some(7.0)],
        );
        let filled = imputer.apply(&mut test).unwrap();

        assert_eq!(filled, 3);
        assert_eq!(
            test.column("x").unwrap().as_numeric().unwrap(),
            &[Some(2.0), Some(15.0), Some(6.5), Some(7.0)]
        );
    }

    #[test]
    fn all_missing_cluster_falls_back_to_global() {
        let train = table(
            vec![Some("a"), Some("b"), Some("b")],
            vec![None, Some(4.0), Some(6.0)],
        );
        let columns = vec!["x".to_string()];
        let imputer = NumericImputer::fit(&train, &columns).unwrap();
        assert_eq!(imputer.cluster_median("a", "x"), None);

        let mut target = train.clone();
        imputer.apply(&mut target).unwrap();
        assert_eq!(
            target.column("x").unwrap().as_numeric().unwrap(),
            &[Some(5.0), Some(4.0), Some(6.0)]
        );
    }

    #[test]
    fn preserves_row_order_and_count() {
        let train = table(
            vec![Some("b"), Some("a"), Some("b"), Some("a")],
            vec![None, Some(1.0), Some(9.0), None],
        );
        let columns = vec!["x".to_string()];
        let imputer = NumericImputer::fit(&train, &columns).unwrap();
        let mut target = train.clone();
        imputer.apply(&mut target).unwrap();

        assert_eq!(target.ids, train.ids);
        assert_eq!(target.start_clusters, train.start_clusters);
        assert_eq!(
            target.column("x").unwrap().as_numeric().unwrap(),
            &[Some(9.0), Some(1.0), Some(9.0), Some(1.0)]
        );
    }

    #[test]
    fn column_without_values_stays_missing() {
        let train = table(vec![Some("a"), Some("a")], vec![None, None]);
        let columns = vec!["x".to_string()];
        let imputer = NumericImputer::fit(&train, &columns).unwrap();
        let mut target = train.clone();
        assert_eq!(imputer.apply(&mut target).unwrap(), 0);
        assert_eq!(
            target.column("x").unwrap().as_numeric().unwrap(),
            &[None, None]
        );
    }
}
