use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use uuid::Uuid;

use crate::classifier::{Classifier, FittedClassifier, LabeledSet};
use crate::config::{LightgbmParams, RuntimeSettings};
use crate::models::FeatureMatrix;

pub const LIGHTGBM_EXE_KEY: &str = "LIGHTGBM_EXE";

/// Removes the file when dropped, so early returns never leak temp datasets.
struct TempPath(PathBuf);

impl TempPath {
    fn new(prefix: &str, extension: &str) -> Self {
        Self(std::env::temp_dir().join(format!("{prefix}_{}.{extension}", Uuid::new_v4())))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

/// Drives the LightGBM command-line program: one `task=train` per fit,
/// one `task=predict` per prediction.
#[derive(Debug, Clone)]
pub struct LightgbmClassifier {
    exe_path: PathBuf,
    params: LightgbmParams,
    device_id: String,
    seed: u64,
}

impl LightgbmClassifier {
    pub fn new(params: LightgbmParams, settings: &RuntimeSettings) -> Result<Self> {
        let exe_path = resolve_lightgbm_executable()?;
        info!("Using LightGBM executable at {}", exe_path.display());
        Ok(Self::with_executable(exe_path, params, settings))
    }

    pub fn with_executable(
        exe_path: PathBuf,
        params: LightgbmParams,
        settings: &RuntimeSettings,
    ) -> Self {
        Self {
            exe_path,
            params,
            device_id: settings.device_id.trim().to_string(),
            seed: settings.seed,
        }
    }

    fn training_args(
        &self,
        data: &Path,
        valid_data: &Path,
        output_model: &Path,
        num_classes: usize,
        categorical: &[usize],
    ) -> Vec<String> {
        let params = &self.params;
        let mut args = vec![
            String::from("task=train"),
            String::from("objective=multiclass"),
            format!("num_class={}", num_classes),
            String::from("metric=multi_logloss"),
            String::from("header=false"),
            format!("data={}", data.to_string_lossy()),
            format!("valid_data={}", valid_data.to_string_lossy()),
            format!("num_iterations={}", params.num_iterations),
            format!("learning_rate={}", params.learning_rate),
            format!("num_leaves={}", params.num_leaves),
            format!("max_depth={}", params.max_depth),
            format!("min_data_in_leaf={}", params.min_data_in_leaf),
            format!("lambda_l1={}", params.lambda_l1),
            format!("lambda_l2={}", params.lambda_l2),
            format!("feature_fraction={}", params.feature_fraction),
            format!("bagging_fraction={}", params.bagging_fraction),
            format!("bagging_freq={}", params.bagging_freq),
            format!("seed={}", self.seed),
            format!("num_threads={}", params.num_threads),
        ];
        if !categorical.is_empty() {
            let indices: Vec<String> = categorical.iter().map(|idx| idx.to_string()).collect();
            args.push(format!("categorical_feature={}", indices.join(",")));
        }
        if params.early_stopping_round > 0 {
            args.push(format!("early_stopping_round={}", params.early_stopping_round));
        }
        if self.device_id.is_empty() {
            args.push(String::from("device_type=cpu"));
        } else {
            args.push(String::from("device_type=gpu"));
            args.push(String::from("gpu_platform_id=0"));
            args.push(format!("gpu_device_id={}", self.device_id));
        }
        args.push(format!("output_model={}", output_model.to_string_lossy()));
        args.push(String::from("verbosity=-1"));
        args
    }
}

impl Classifier for LightgbmClassifier {
    fn name(&self) -> &str {
        "lightgbm"
    }

    fn fit(
        &self,
        train: LabeledSet<'_>,
        validation: LabeledSet<'_>,
        num_classes: usize,
    ) -> Result<Box<dyn FittedClassifier>> {
        let train_path = TempPath::new("lightgbm_train", "csv");
        let valid_path = TempPath::new("lightgbm_valid", "csv");
        write_csv_dataset(train.features, Some(train.labels), train_path.path())?;
        write_csv_dataset(validation.features, Some(validation.labels), valid_path.path())?;

        let model_path = TempPath::new("lightgbm_model", "txt");
        let args = self.training_args(
            train_path.path(),
            valid_path.path(),
            model_path.path(),
            num_classes,
            &train.features.categorical,
        );
        debug!("Launching LightGBM with {}", args.join(" "));

        let status = Command::new(&self.exe_path)
            .args(&args)
            .status()
            .context("Failed to spawn lightgbm for training")?;
        if !status.success() {
            return Err(anyhow!("lightgbm training failed with status {status}"));
        }

        let model_text = fs::read_to_string(model_path.path()).with_context(|| {
            format!(
                "LightGBM reported success but wrote no model at {}",
                model_path.path().display()
            )
        })?;
        let best_iteration = count_trees(&model_text).checked_div(num_classes);

        Ok(Box::new(LightgbmModel {
            exe_path: self.exe_path.clone(),
            model_path,
            num_classes,
            best_iteration,
        }))
    }
}

struct LightgbmModel {
    exe_path: PathBuf,
    model_path: TempPath,
    num_classes: usize,
    best_iteration: Option<usize>,
}

impl FittedClassifier for LightgbmModel {
    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<Vec<f64>>> {
        if features.row_count() == 0 {
            return Ok(Vec::new());
        }
        let data_path = TempPath::new("lightgbm_predict", "csv");
        let result_path = TempPath::new("lightgbm_predict_result", "txt");
        write_csv_dataset(features, None, data_path.path())?;

        let status = Command::new(&self.exe_path)
            .args([
                "task=predict",
                "header=false",
                &format!("data={}", data_path.path().to_string_lossy()),
                &format!("input_model={}", self.model_path.path().to_string_lossy()),
                &format!("output_result={}", result_path.path().to_string_lossy()),
                "verbosity=-1",
            ])
            .status()
            .context("Failed to spawn lightgbm for prediction")?;
        if !status.success() {
            return Err(anyhow!("lightgbm prediction failed with status {status}"));
        }

        let raw = fs::read_to_string(result_path.path())
            .context("Failed to read LightGBM predictions")?;
        parse_predictions(&raw, features.row_count(), self.num_classes)
    }

    fn best_iteration(&self) -> Option<usize> {
        self.best_iteration
    }
}

/// Header-less CSV, label first. Prediction datasets carry a placeholder label
/// so both files share one layout.
fn write_csv_dataset(features: &FeatureMatrix, labels: Option<&[usize]>, path: &Path) -> Result<()> {
    if let Some(labels) = labels {
        if labels.len() != features.row_count() {
            return Err(anyhow!(
                "Dataset has {} feature rows but {} labels",
                features.row_count(),
                labels.len()
            ));
        }
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create LightGBM dataset at {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for (idx, row) in features.rows.iter().enumerate() {
        let label = labels.map_or(0, |labels| labels[idx]);
        writer.write_all(format_dataset_line(label, row).as_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

fn format_dataset_line(label: usize, row: &[f64]) -> String {
    let mut line = label.to_string();
    for value in row {
        line.push(',');
        if value.is_finite() {
            line.push_str(&format!("{}", value));
        } else {
            line.push_str("nan");
        }
    }
    line.push('\n');
    line
}

fn parse_predictions(raw: &str, expected_rows: usize, num_classes: usize) -> Result<Vec<Vec<f64>>> {
    let mut rows = Vec::with_capacity(expected_rows);
    for (line_idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|token| {
                token.parse::<f64>().map_err(|err| {
                    anyhow!(
                        "Invalid LightGBM prediction \"{}\" on line {}: {}",
                        token,
                        line_idx + 1,
                        err
                    )
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        if row.len() != num_classes {
            return Err(anyhow!(
                "LightGBM prediction line {} has {} values, expected {}",
                line_idx + 1,
                row.len(),
                num_classes
            ));
        }
        rows.push(row);
    }
    if rows.len() != expected_rows {
        return Err(anyhow!(
            "Expected {} LightGBM prediction rows, got {}",
            expected_rows,
            rows.len()
        ));
    }
    Ok(rows)
}

fn count_trees(model_text: &str) -> usize {
    model_text
        .lines()
        .filter(|line| line.starts_with("Tree="))
        .count()
}

fn resolve_lightgbm_executable() -> Result<PathBuf> {
    if let Some(configured) = std::env::var_os(LIGHTGBM_EXE_KEY).filter(|value| !value.is_empty()) {
        let exe_path = PathBuf::from(configured);
        if exe_path.exists() {
            return Ok(exe_path);
        }
        return Err(anyhow!(
            "{} points to {}, which does not exist",
            LIGHTGBM_EXE_KEY,
            exe_path.display()
        ));
    }

    let binary = if cfg!(windows) { "lightgbm.exe" } else { "lightgbm" };
    let vendor_path = Path::new(env!("CARGO_MANIFEST_DIR")).join("vendor").join(binary);
    if vendor_path.exists() {
        return Ok(vendor_path);
    }

    if let Some(path) = find_in_path(binary) {
        return Ok(path);
    }

    Err(anyhow!(
        "lightgbm executable not found via {}, vendor/ or PATH; install the LightGBM CLI to train",
        LIGHTGBM_EXE_KEY
    ))
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let path_value = std::env::var_os("PATH")?;
    for entry in std::env::split_paths(&path_value) {
        let candidate = entry.join(binary);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}
