use anyhow::Result;

use crate::models::FeatureMatrix;

/// Rows and encoded labels handed to a classifier for one fit.
#[derive(Debug, Clone, Copy)]
pub struct LabeledSet<'a> {
    pub features: &'a FeatureMatrix,
    pub labels: &'a [usize],
}

/// A supervised multi-class learner. Every `fit` call produces an
/// independent model; the learner itself holds only configuration.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    /// `validation` drives early stopping.
    fn fit(
        &self,
        train: LabeledSet<'_>,
        validation: LabeledSet<'_>,
        num_classes: usize,
    ) -> Result<Box<dyn FittedClassifier>>;
}

pub trait FittedClassifier: Send + Sync {
    /// One probability row per input row, `num_classes` wide.
    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<Vec<f64>>>;

    fn best_iteration(&self) -> Option<usize> {
        None
    }
}
