use anyhow::{anyhow, Result};
use log::info;

use crate::dataset::FeatureLayout;
use crate::features::{ColumnGroups, CrossSectionalBuilder};
use crate::imputer::NumericImputer;
use crate::labels::LabelEncoder;
use crate::models::{FeatureMatrix, ObservationTable};
use crate::trends::TemporalTrendBuilder;
use crate::weights::WeightTable;

/// Training features with everything fitted on the way, ready to transform
/// the test table without refitting.
pub struct FittedFeatures {
    pub table: ObservationTable,
    pub matrix: FeatureMatrix,
    pub labels: Vec<usize>,
    pub encoder: LabelEncoder,
    pub pipeline: FeaturePipeline,
}

/// Fitted state of the feature derivation: column groups, imputation medians and layout.
#[derive(Debug, Clone)]
pub struct FeaturePipeline {
    groups: ColumnGroups,
    imputer: NumericImputer,
    layout: FeatureLayout,
}

impl FeaturePipeline {
    /// Derives training features. Order matters: `missing_cnt` and the
    /// sentinel cluster come first, then imputation, cross-sectional and
    /// trend features.
    pub fn fit(mut train: ObservationTable, weights: &WeightTable) -> Result<FittedFeatures> {
        let end_clusters = train
            .end_clusters
            .take()
            .ok_or_else(|| anyhow!("Training table carries no end_cluster labels"))?;
        let (encoder, labels) = LabelEncoder::fit_column(&end_clusters)?;
        info!(
            "Encoded {} training labels into {} classes",
            labels.len(),
            encoder.len()
        );

        let groups = ColumnGroups::from_table(&train);
        info!(
            "Declared {} column group(s) yielding {} range feature(s)",
            groups.groups().len(),
            groups.derived_column_count()
        );
        let imputed_columns = train.numeric_column_names();

        let builder = CrossSectionalBuilder::new(weights, &groups);
        builder.annotate_raw(&mut train)?;
        let imputer = NumericImputer::fit(&train, &imputed_columns)?;
        let filled = imputer.apply(&mut train)?;
        info!("Imputed {} missing training cell(s)", filled);
        builder.derive(&mut train)?;
        TemporalTrendBuilder::build(&mut train)?;

        let layout = FeatureLayout::fit(&train);
        let matrix = layout.transform(&train)?;
        info!(
            "Training feature matrix: {} rows x {} features ({} categorical)",
            matrix.row_count(),
            matrix.feature_count(),
            matrix.categorical.len()
        );

        train.end_clusters = Some(end_clusters);
        Ok(FittedFeatures {
            table: train,
            matrix,
            labels,
            encoder,
            pipeline: Self {
                groups,
                imputer,
                layout,
            },
        })
    }

    /// Applies the fitted stages to another table. Returns the derived table
    /// alongside its matrix in the training layout.
    pub fn transform(
        &self,
        mut table: ObservationTable,
        weights: &WeightTable,
    ) -> Result<(ObservationTable, FeatureMatrix)> {
        let builder = CrossSectionalBuilder::new(weights, &self.groups);
        builder.annotate_raw(&mut table)?;
        let filled = self.imputer.apply(&mut table)?;
        info!("Imputed {} missing cell(s) with training medians", filled);
        builder.derive(&mut table)?;
        TemporalTrendBuilder::build(&mut table)?;
        let matrix = self.layout.transform(&table)?;
        Ok((table, matrix))
    }

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    pub fn groups(&self) -> &ColumnGroups {
        &self.groups
    }

    pub fn imputer(&self) -> &NumericImputer {
        &self.imputer
    }
}
