use serde::Serialize;
use std::cmp::Ordering;
use thiserror::Error;

use crate::models::ProbabilityMatrix;
use crate::weights::WeightTable;

#[derive(Debug, Error, PartialEq)]
pub enum MetricError {
    #[error("class {class} has {positives} positive and {negatives} negative out-of-fold rows; one-vs-rest AUC is undefined")]
    DegenerateClass {
        class: String,
        positives: usize,
        negatives: usize,
    },
    #[error("expected {expected} scores, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("total class weight is zero")]
    ZeroTotalWeight,
}

/// Binary ROC AUC via the Mann-Whitney statistic; tied scores share their average rank.
/// Returns `None` when either class is absent.
pub fn binary_auc(targets: &[bool], scores: &[f64]) -> Option<f64> {
    if targets.len() != scores.len() {
        return None;
    }
    let positives = targets.iter().filter(|target| **target).count();
    let negatives = targets.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| scores[*a].partial_cmp(&scores[*b]).unwrap_or(Ordering::Equal));

    let mut positive_rank_sum = 0.0;
    let mut start = 0usize;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        let average_rank = (start + end + 1) as f64 / 2.0;
        for idx in &order[start..end] {
            if targets[*idx] {
                positive_rank_sum += average_rank;
            }
        }
        start = end;
    }

    let positives = positives as f64;
    let negatives = negatives as f64;
    let u = positive_rank_sum - positives * (positives + 1.0) / 2.0;
    Some(u / (positives * negatives))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassAuc {
    pub class: String,
    pub auc: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightedAuc {
    pub score: f64,
    pub per_class: Vec<ClassAuc>,
}

/// Weighted average of per-class one-vs-rest AUC. A class without both
/// positive and negative rows fails the whole computation.
pub fn weighted_multiclass_auc(
    labels: &[usize],
    predictions: &ProbabilityMatrix,
    weights: &WeightTable,
) -> Result<WeightedAuc, MetricError> {
    if labels.len() != predictions.row_count() {
        return Err(MetricError::LengthMismatch {
            expected: labels.len(),
            actual: predictions.row_count(),
        });
    }

    let mut per_class = Vec::with_capacity(predictions.classes.len());
    for (class_idx, class) in predictions.classes.iter().enumerate() {
        let targets: Vec<bool> = labels.iter().map(|label| *label == class_idx).collect();
        let scores = predictions.column(class_idx);
        let auc = binary_auc(&targets, &scores).ok_or_else(|| {
            let positives = targets.iter().filter(|target| **target).count();
            MetricError::DegenerateClass {
                class: class.clone(),
                positives,
                negatives: targets.len() - positives,
            }
        })?;
        per_class.push(ClassAuc {
            class: class.clone(),
            auc,
            weight: weights.evaluation_weight(class),
        });
    }

    let total_weight: f64 = per_class.iter().map(|entry| entry.weight).sum();
    if total_weight <= 0.0 {
        return Err(MetricError::ZeroTotalWeight);
    }
    let score = per_class
        .iter()
        .map(|entry| entry.auc * entry.weight)
        .sum::<f64>()
        / total_weight;

    Ok(WeightedAuc { score, per_class })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_auc_handles_perfect_random_and_tied_scores() {
        let targets = [false, false, true, true];
        assert_eq!(binary_auc(&targets, &[0.1, 0.2, 0.8, 0.9]), Some(1.0));
        assert_eq!(binary_auc(&targets, &[0.9, 0.8, 0.2, 0.1]), Some(0.0));
        assert_eq!(binary_auc(&targets, &[0.5, 0.5, 0.5, 0.5]), Some(0.5));
        let mixed = binary_auc(&targets, &[0.1, 0.4, 0.35, 0.8]).unwrap();
        assert!((mixed - 0.75).abs() < 1e-12);
        assert_eq!(binary_auc(&[true, true], &[0.1, 0.2]), None);
    }

    #[test]
    fn weighted_auc_uses_class_weights() {
        // Class A is perfectly separated, class B scores are uninformative.
        let labels = vec![0, 0, 1, 1];
        let predictions = ProbabilityMatrix {
            classes: vec!["A".to_string(), "B".to_string()],
            rows: vec![
                vec![0.9, 0.5],
                vec![0.8, 0.5],
                vec![0.2, 0.5],
                vec![0.1, 0.5],
            ],
        };
        let weights = WeightTable::from_pairs([("A", 1.0), ("B", 3.0)]).unwrap();

        let result = weighted_multiclass_auc(&labels, &predictions, &weights).unwrap();

        assert_eq!(result.per_class[0].auc, 1.0);
        assert_eq!(result.per_class[1].auc, 0.5);
        assert!((result.score - 0.625).abs() < 1e-12);
    }

    #[test]
    fn unlisted_classes_weigh_one() {
        let labels = vec![0, 1];
        let predictions = ProbabilityMatrix {
            classes: vec!["A".to_string(), "B".to_string()],
            rows: vec![vec![0.9, 0.1], vec![0.1, 0.9]],
        };
        let result =
            weighted_multiclass_auc(&labels, &predictions, &WeightTable::default()).unwrap();
        assert!(result.per_class.iter().all(|entry| entry.weight == 1.0));
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn degenerate_class_is_reported() {
        let labels = vec![0, 0];
        let predictions = ProbabilityMatrix {
            classes: vec!["A".to_string(), "B".to_string()],
            rows: vec![vec![0.9, 0.1], vec![0.8, 0.2]],
        };
        let err = weighted_multiclass_auc(&labels, &predictions, &WeightTable::default())
            .unwrap_err();
        assert_eq!(
            err,
            MetricError::DegenerateClass {
                class: "A".to_string(),
                positives: 2,
                negatives: 0,
            }
        );
    }
}
