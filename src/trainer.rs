use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::classifier::{Classifier, LabeledSet};
use crate::context::RunContext;
use crate::folds::{Fold, StratifiedKFold};
use crate::metrics::{weighted_multiclass_auc, WeightedAuc};
use crate::models::{FeatureMatrix, ProbabilityMatrix};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FoldReport {
    pub index: usize,
    pub train_rows: usize,
    pub validation_rows: usize,
    /// `None` when a class is absent from this fold's held-out rows.
    pub weighted_auc: Option<f64>,
    pub best_iteration: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct CrossValidationOutcome {
    pub oof: ProbabilityMatrix,
    pub test: ProbabilityMatrix,
    pub auc: WeightedAuc,
    pub folds: Vec<FoldReport>,
}

struct FoldResult {
    report: FoldReport,
    validation: Vec<usize>,
    validation_predictions: Vec<Vec<f64>>,
    test_predictions: Vec<Vec<f64>>,
}

/// Stratified k-fold training: out-of-fold predictions for every training
/// row and fold-averaged predictions for the test rows.
pub struct FoldTrainer<'a> {
    classifier: &'a dyn Classifier,
    context: &'a RunContext,
}

impl<'a> FoldTrainer<'a> {
    pub fn new(classifier: &'a dyn Classifier, context: &'a RunContext) -> Self {
        Self {
            classifier,
            context,
        }
    }

    pub fn train_and_evaluate(
        &self,
        features: &FeatureMatrix,
        labels: &[usize],
        test: &FeatureMatrix,
        classes: &[String],
    ) -> Result<CrossValidationOutcome> {
        if labels.len() != features.row_count() {
            return Err(anyhow!(
                "Training matrix has {} rows but {} labels",
                features.row_count(),
                labels.len()
            ));
        }
        if test.feature_count() != features.feature_count() {
            return Err(anyhow!(
                "Test matrix has {} features, training matrix has {}",
                test.feature_count(),
                features.feature_count()
            ));
        }
        if let Some(label) = labels.iter().find(|label| **label >= classes.len()) {
            return Err(anyhow!(
                "Label index {} is outside {} classes",
                label,
                classes.len()
            ));
        }

        let settings = self.context.settings();
        let splitter = StratifiedKFold::new(settings.folds, settings.seed)?;
        let folds = splitter.split(labels)?;
        info!(
            "Training {} with {} stratified folds (seed {}) on {} rows, {} features, {} classes",
            self.classifier.name(),
            folds.len(),
            settings.seed,
            features.row_count(),
            features.feature_count(),
            classes.len()
        );

        let pb = ProgressBar::new(folds.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} folds ({eta})")
                .context("Invalid progress bar template")?
                .progress_chars("#>-"),
        );

        let run_fold = |fold: &Fold| -> Result<FoldResult> {
            let result = self
                .train_fold(fold, features, labels, test, classes)
                .with_context(|| format!("Fold {} failed", fold.index + 1));
            pb.inc(1);
            result
        };
        let results: Vec<FoldResult> = if settings.parallel_folds {
            folds.par_iter().map(run_fold).collect::<Result<_>>()?
        } else {
            folds.iter().map(run_fold).collect::<Result<_>>()?
        };
        pb.finish_and_clear();

        let k = folds.len() as f64;
        let mut oof = ProbabilityMatrix::zeros(classes.to_vec(), features.row_count());
        let mut test_matrix = ProbabilityMatrix::zeros(classes.to_vec(), test.row_count());
        let mut filled = vec![false; features.row_count()];
        let mut reports = Vec::with_capacity(results.len());

        for result in results {
            for (row, prediction) in result.validation.iter().zip(result.validation_predictions) {
                if filled[*row] {
                    return Err(anyhow!(
                        "Training row {} received more than one out-of-fold prediction",
                        row
                    ));
                }
                filled[*row] = true;
                oof.rows[*row] = prediction;
            }
            for (accumulated, prediction) in test_matrix.rows.iter_mut().zip(&result.test_predictions) {
                for (total, value) in accumulated.iter_mut().zip(prediction) {
                    *total += value / k;
                }
            }
            reports.push(result.report);
        }
        if let Some(row) = filled.iter().position(|done| !done) {
            return Err(anyhow!("Training row {} received no out-of-fold prediction", row));
        }
        reports.sort_by_key(|report| report.index);

        let auc = weighted_multiclass_auc(labels, &oof, self.context.weights())?;
        for entry in &auc.per_class {
            info!(
                "Class {}: AUC {:.5} (weight {})",
                entry.class, entry.auc, entry.weight
            );
        }
        info!("Out-of-fold weighted AUC: {:.5}", auc.score);

        Ok(CrossValidationOutcome {
            oof,
            test: test_matrix,
            auc,
            folds: reports,
        })
    }

    fn train_fold(
        &self,
        fold: &Fold,
        features: &FeatureMatrix,
        labels: &[usize],
        test: &FeatureMatrix,
        classes: &[String],
    ) -> Result<FoldResult> {
        let train_features = features.select_rows(&fold.train);
        let train_labels: Vec<usize> = fold.train.iter().map(|row| labels[*row]).collect();
        let validation_features = features.select_rows(&fold.validation);
        let validation_labels: Vec<usize> =
            fold.validation.iter().map(|row| labels[*row]).collect();

        let model = self.classifier.fit(
            LabeledSet {
                features: &train_features,
                labels: &train_labels,
            },
            LabeledSet {
                features: &validation_features,
                labels: &validation_labels,
            },
            classes.len(),
        )?;

        let validation_predictions = model.predict_proba(&validation_features)?;
        check_shape(&validation_predictions, fold.validation.len(), classes.len(), "validation")?;
        let test_predictions = model.predict_proba(test)?;
        check_shape(&test_predictions, test.row_count(), classes.len(), "test")?;

        let fold_matrix = ProbabilityMatrix {
            classes: classes.to_vec(),
            rows: validation_predictions,
        };
        let weighted_auc =
            match weighted_multiclass_auc(&validation_labels, &fold_matrix, self.context.weights()) {
                Ok(auc) => Some(auc.score),
                Err(err) => {
                    warn!("Fold {}: weighted AUC unavailable ({})", fold.index + 1, err);
                    None
                }
            };
        info!(
            "Fold {}: {} train rows, {} validation rows, weighted AUC {}",
            fold.index + 1,
            fold.train.len(),
            fold.validation.len(),
            weighted_auc.map_or_else(|| String::from("n/a"), |auc| format!("{:.5}", auc))
        );

        Ok(FoldResult {
            report: FoldReport {
                index: fold.index,
                train_rows: fold.train.len(),
                validation_rows: fold.validation.len(),
                weighted_auc,
                best_iteration: model.best_iteration(),
            },
            validation: fold.validation.clone(),
            validation_predictions: fold_matrix.rows,
            test_predictions,
        })
    }
}

fn check_shape(rows: &[Vec<f64>], expected_rows: usize, width: usize, what: &str) -> Result<()> {
    if rows.len() != expected_rows {
        return Err(anyhow!(
            "Classifier returned {} {} rows, expected {}",
            rows.len(),
            what,
            expected_rows
        ));
    }
    if let Some(row) = rows.iter().find(|row| row.len() != width) {
        return Err(anyhow!(
            "Classifier returned a {} row with {} probabilities, expected {}",
            what,
            row.len(),
            width
        ));
    }
    Ok(())
}
