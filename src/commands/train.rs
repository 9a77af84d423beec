use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::path::PathBuf;

use crate::classifier::Classifier;
use crate::config::{InputPaths, LightgbmOverrides, LightgbmParams, RuntimeSettings};
use crate::context::RunContext;
use crate::data_context::CompetitionData;
use crate::lightgbm::LightgbmClassifier;
use crate::metrics::ClassAuc;
use crate::pipeline::FeaturePipeline;
use crate::submission::{assemble, save_oof_predictions};
use crate::trainer::{FoldReport, FoldTrainer};

pub const SUMMARY_PREFIX: &str = "CLUSTER_FORECAST_TRAIN_SUMMARY=";

#[derive(Debug, Clone)]
pub struct TrainOutputs {
    pub submission: PathBuf,
    pub oof: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainSummary {
    pub classifier: String,
    pub folds: usize,
    pub seed: u64,
    pub train_rows: usize,
    pub test_rows: usize,
    pub feature_count: usize,
    pub categorical_features: usize,
    pub classes: Vec<String>,
    pub weighted_auc: f64,
    pub per_class: Vec<ClassAuc>,
    pub fold_reports: Vec<FoldReport>,
    pub hyperparameters: LightgbmParams,
    pub submission_path: String,
    pub generated_at: DateTime<Utc>,
}

pub fn run(
    inputs: &InputPaths,
    outputs: &TrainOutputs,
    settings: RuntimeSettings,
    overrides: LightgbmOverrides,
) -> Result<()> {
    info!("Starting cross-validated training");
    let data = CompetitionData::load(
        &inputs.train,
        &inputs.test,
        &inputs.weights,
        &inputs.sample_submission,
    )?;
    let params = overrides.apply(LightgbmParams::default());
    let context = RunContext::new(settings, params, data.weights.clone())?;
    let classifier = LightgbmClassifier::new(context.lightgbm().clone(), context.settings())?;

    let summary = run_with_classifier(data, &context, &classifier, outputs)?;
    match serde_json::to_string(&summary) {
        Ok(payload) => println!("{SUMMARY_PREFIX}{payload}"),
        Err(err) => warn!("Failed to serialize training summary: {err}"),
    }
    Ok(())
}

/// Full run with any classifier: features, folds, submission and optional
/// out-of-fold file.
pub fn run_with_classifier(
    data: CompetitionData,
    context: &RunContext,
    classifier: &dyn Classifier,
    outputs: &TrainOutputs,
) -> Result<TrainSummary> {
    let CompetitionData {
        train, test, schema, ..
    } = data;

    let fitted = FeaturePipeline::fit(train, context.weights())?;
    let (test_table, test_matrix) = fitted.pipeline.transform(test, context.weights())?;

    let trainer = FoldTrainer::new(classifier, context);
    let outcome = trainer.train_and_evaluate(
        &fitted.matrix,
        &fitted.labels,
        &test_matrix,
        fitted.encoder.classes(),
    )?;

    let submission = assemble(
        &outcome.test,
        &test_table.ids,
        &schema.ids,
        &schema.class_columns,
    )?;
    submission.save(&outputs.submission)?;
    if let Some(oof_path) = &outputs.oof {
        save_oof_predictions(
            oof_path,
            &outcome.oof,
            &fitted.table.ids,
            &fitted.labels,
            &fitted.encoder,
        )?;
    }

    println!(
        "Weighted out-of-fold AUC {:.5}; saved submission to {}",
        outcome.auc.score,
        outputs.submission.display()
    );

    Ok(TrainSummary {
        classifier: classifier.name().to_string(),
        folds: context.settings().folds,
        seed: context.settings().seed,
        train_rows: fitted.matrix.row_count(),
        test_rows: test_matrix.row_count(),
        feature_count: fitted.matrix.feature_count(),
        categorical_features: fitted.matrix.categorical.len(),
        classes: fitted.encoder.classes().to_vec(),
        weighted_auc: outcome.auc.score,
        per_class: outcome.auc.per_class,
        fold_reports: outcome.folds,
        hyperparameters: context.lightgbm().clone(),
        submission_path: outputs.submission.display().to_string(),
        generated_at: Utc::now(),
    })
}
