use anyhow::{anyhow, Result};
use cluster_forecast::classifier::{Classifier, FittedClassifier, LabeledSet};
use cluster_forecast::commands::{build_features, train};
use cluster_forecast::config::{LightgbmParams, RuntimeSettings};
use cluster_forecast::context::RunContext;
use cluster_forecast::data_context::CompetitionData;
use cluster_forecast::models::FeatureMatrix;
use cluster_forecast::pipeline::FeaturePipeline;
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;
use uuid::Uuid;

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

struct TempDir(PathBuf);

impl TempDir {
    fn new() -> Self {
        let path = std::env::temp_dir().join(format!("cluster_forecast_{}", Uuid::new_v4()));
        fs::create_dir_all(&path).unwrap();
        Self(path)
    }

    fn join(&self, name: &str) -> PathBuf {
        self.0.join(name)
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

/// Scores classes by inverse distance of feature `x` to each class's training mean.
struct CentroidClassifier;

struct CentroidModel {
    feature: usize,
    centroids: Vec<f64>,
}

impl Classifier for CentroidClassifier {
    fn name(&self) -> &str {
        "centroid"
    }

    fn fit(
        &self,
        train: LabeledSet<'_>,
        _validation: LabeledSet<'_>,
        num_classes: usize,
    ) -> Result<Box<dyn FittedClassifier>> {
        let feature = train
            .features
            .names
            .iter()
            .position(|name| name == "x")
            .ok_or_else(|| anyhow!("feature x missing"))?;
        let mut sums = vec![0.0; num_classes];
        let mut counts = vec![0usize; num_classes];
        for (row, label) in train.features.rows.iter().zip(train.labels) {
            sums[*label] += row[feature];
            counts[*label] += 1;
        }
        let centroids = sums
            .iter()
            .zip(&counts)
            .map(|(sum, count)| sum / (*count).max(1) as f64)
            .collect();
        Ok(Box::new(CentroidModel { feature, centroids }))
    }
}

impl FittedClassifier for CentroidModel {
    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<Vec<f64>>> {
        Ok(features
            .rows
            .iter()
            .map(|row| {
                let scores: Vec<f64> = self
                    .centroids
                    .iter()
                    .map(|centroid| 1.0 / (1.0 + (row[self.feature] - centroid).abs()))
                    .collect();
                let total: f64 = scores.iter().sum();
                scores.iter().map(|score| score / total).collect()
            })
            .collect())
    }
}

fn write_inputs(dir: &TempDir) -> (PathBuf, PathBuf, PathBuf, PathBuf) {
    let mut train = String::from("id,month,start_cluster,x,bal_max,bal_min,bal_avg,segment,end_cluster\n");
    for entity in 0..12 {
        let (label, base) = if entity < 6 { ("{a}", 1.0) } else { ("{b}", 7.0) };
        let x = base + (entity % 3) as f64;
        for month in 1..=2 {
            let start = if entity == 4 && month == 1 { "" } else { label };
            let bal_min = if entity == 9 && month == 2 {
                String::from("NA")
            } else {
                (x - 1.0).to_string()
            };
            let segment = if entity % 2 == 0 { "retail" } else { "corp" };
            writeln!(
                train,
                "e{entity},month_{month},{start},{x},{},{bal_min},{x},{segment},{label}",
                x + month as f64
            )
            .unwrap();
        }
    }

    let test = "id,month,start_cluster,x,bal_max,bal_min,bal_avg,segment\n\
                t0,month_1,{a},2,3,1,2,retail\n\
                t0,month_2,{a},2,4,1,2,retail\n\
                t1,month_1,{b},8,9,,8,corp\n\
                t2,month_1,{z},5,6,4,5,other\n";
    let weights = "cluster,weight\n{a},1\n{b},2\n";
    let sample = "id,{a},{b},{c}\nt1,0,0,0\nt0,0,0,0\nt_missing,0,0,0\nt2,0,0,0\n";

    let paths = (
        dir.join("train.csv"),
        dir.join("test.csv"),
        dir.join("weights.csv"),
        dir.join("sample_submission.csv"),
    );
    fs::write(&paths.0, train).unwrap();
    fs::write(&paths.1, test).unwrap();
    fs::write(&paths.2, weights).unwrap();
    fs::write(&paths.3, sample).unwrap();
    paths
}

fn load(paths: &(PathBuf, PathBuf, PathBuf, PathBuf)) -> CompetitionData {
    CompetitionData::load(&paths.0, &paths.1, &paths.2, &paths.3).unwrap()
}

fn read_csv(path: &Path) -> Vec<Vec<String>> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| line.split(',').map(str::to_string).collect())
        .collect()
}

fn context(data: &CompetitionData, folds: usize, parallel_folds: bool) -> RunContext {
    let settings = RuntimeSettings {
        folds,
        parallel_folds,
        ..RuntimeSettings::default()
    };
    RunContext::new(settings, LightgbmParams::default(), data.weights.clone()).unwrap()
}

#[test]
fn train_writes_canonical_submission_and_oof_predictions() {
    ensure_test_env();
    let dir = TempDir::new();
    let paths = write_inputs(&dir);
    let data = load(&paths);
    let context = context(&data, 3, false);
    let outputs = train::TrainOutputs {
        submission: dir.join("submission.csv"),
        oof: Some(dir.join("oof.csv")),
    };

    let summary = train::run_with_classifier(data, &context, &CentroidClassifier, &outputs).unwrap();

    assert_eq!(summary.classifier, "centroid");
    assert_eq!(summary.train_rows, 24);
    assert_eq!(summary.test_rows, 4);
    assert_eq!(summary.classes, vec!["{a}", "{b}"]);
    assert_eq!(summary.fold_reports.len(), 3);
    assert_eq!(summary.weighted_auc, 1.0);
    assert_eq!(summary.per_class[1].weight, 2.0);

    let submission = read_csv(&outputs.submission);
    assert_eq!(submission[0], vec!["id", "{a}", "{b}", "{c}"]);
    let ids: Vec<&str> = submission[1..].iter().map(|row| row[0].as_str()).collect();
    assert_eq!(ids, vec!["t1", "t0", "t_missing", "t2"]);
    for row in &submission[1..] {
        assert_eq!(row.len(), 4);
        assert_eq!(row[3], "0.000000");
        assert!(row[1..].iter().all(|cell| cell.split('.').nth(1).map(str::len) == Some(6)));
    }
    let probability = |row: usize, col: usize| submission[row][col].parse::<f64>().unwrap();
    assert!(probability(1, 2) > 0.5);
    assert!(probability(2, 1) > 0.5);
    assert!((probability(2, 1) + probability(2, 2) - 1.0).abs() < 1e-5);
    assert_eq!(&submission[3][1..], &["0.000000", "0.000000", "0.000000"]);

    let oof = read_csv(outputs.oof.as_deref().unwrap());
    assert_eq!(oof[0], vec!["row", "id", "label", "{a}", "{b}"]);
    assert_eq!(oof.len(), 25);
    for (idx, row) in oof[1..].iter().enumerate() {
        assert_eq!(row[0], idx.to_string());
    }
    assert_eq!(oof[1][1], "e0");
    assert_eq!(oof[1][2], "{a}");
    assert_eq!(oof[24][2], "{b}");
}

#[test]
fn parallel_folds_produce_the_same_submission() {
    ensure_test_env();
    let dir = TempDir::new();
    let paths = write_inputs(&dir);

    let mut submissions = Vec::new();
    for parallel in [false, true] {
        let data = load(&paths);
        let context = context(&data, 4, parallel);
        let outputs = train::TrainOutputs {
            submission: dir.join(&format!("submission_{parallel}.csv")),
            oof: None,
        };
        train::run_with_classifier(data, &context, &CentroidClassifier, &outputs).unwrap();
        submissions.push(fs::read_to_string(&outputs.submission).unwrap());
    }
    assert_eq!(submissions[0], submissions[1]);
}

#[test]
fn fold_count_below_two_is_rejected() {
    ensure_test_env();
    let dir = TempDir::new();
    let paths = write_inputs(&dir);
    let data = load(&paths);
    let context = context(&data, 1, false);
    let outputs = train::TrainOutputs {
        submission: dir.join("submission.csv"),
        oof: None,
    };
    assert!(train::run_with_classifier(data, &context, &CentroidClassifier, &outputs).is_err());
    assert!(!outputs.submission.exists());
}

#[test]
fn build_features_writes_derived_columns() {
    ensure_test_env();
    let dir = TempDir::new();
    let paths = write_inputs(&dir);
    let output = dir.join("features.csv");

    build_features::run(&paths.0, &paths.2, &output).unwrap();

    let rows = read_csv(&output);
    assert_eq!(rows.len(), 25);
    let header = &rows[0];
    for column in [
        "id",
        "month",
        "start_cluster",
        "end_cluster",
        "missing_cnt",
        "cluster_weight_start",
        "bal_range",
        "bal_rel_range",
        "x_delta",
        "x_ratio",
        "bal_max_slope",
    ] {
        assert!(header.iter().any(|name| name == column), "missing {column}");
    }
    let missing_cnt = header.iter().position(|name| name == "missing_cnt").unwrap();
    let start = header.iter().position(|name| name == "start_cluster").unwrap();
    // Entity e4 month 1 had no start cluster.
    assert_eq!(rows[9][missing_cnt], "1");
    assert_eq!(rows[9][start], "__unknown__");
    assert_eq!(rows[1][missing_cnt], "0");
}

#[test]
fn test_columns_are_read_with_training_kinds() {
    ensure_test_env();
    let dir = TempDir::new();
    let paths = write_inputs(&dir);
    fs::write(
        &paths.0,
        "id,month,start_cluster,x,segment,end_cluster\n\
         e0,month_1,{a},1,7,{a}\n\
         e1,month_1,{b},9,corp,{b}\n",
    )
    .unwrap();
    fs::write(
        &paths.1,
        "id,month,start_cluster,x,segment\n\
         t0,month_1,{a},?,7\n\
         t1,month_1,{b},8,7\n",
    )
    .unwrap();

    let data = load(&paths);
    let fitted = FeaturePipeline::fit(data.train, &data.weights).unwrap();
    let (test_table, matrix) = fitted.pipeline.transform(data.test, &data.weights).unwrap();

    let segment = matrix.names.iter().position(|name| name == "segment").unwrap();
    assert_eq!(matrix.rows[0][segment], 0.0);
    assert_eq!(matrix.rows[1][segment], 0.0);
    // The unparsable x is imputed from the {a} training median.
    let x = test_table.column("x").unwrap().as_numeric().unwrap();
    assert_eq!(x, &[Some(1.0), Some(8.0)]);
}
