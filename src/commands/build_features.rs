use anyhow::Result;
use log::info;
use std::path::Path;

use crate::data_context::{load_observation_table, save_observation_table, TableRole};
use crate::pipeline::FeaturePipeline;
use crate::weights::WeightTable;

/// Derives the training features and writes the augmented table for inspection.
pub fn run(train_path: &Path, weights_path: &Path, output_path: &Path) -> Result<()> {
    info!("Building features from {}", train_path.display());
    let train = load_observation_table(train_path, TableRole::Training)?;
    let weights = WeightTable::load(weights_path)?;
    let fitted = FeaturePipeline::fit(train, &weights)?;

    save_observation_table(output_path, &fitted.table)?;
    println!(
        "Saved {} feature columns for {} rows to {}",
        fitted.matrix.feature_count(),
        fitted.table.row_count(),
        output_path.display()
    );
    Ok(())
}
