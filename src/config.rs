use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

pub const DEFAULT_TRAIN_FILE: &str = "data/train.csv";
pub const DEFAULT_TEST_FILE: &str = "data/test.csv";
pub const DEFAULT_WEIGHTS_FILE: &str = "data/cluster_weights.csv";
pub const DEFAULT_SAMPLE_SUBMISSION_FILE: &str = "data/sample_submission.csv";
pub const DEFAULT_SUBMISSION_FILE: &str = "submission.csv";
pub const DEFAULT_FOLDS: usize = 5;
pub const DEFAULT_SEED: u64 = 42;

pub const DEVICE_ID_KEY: &str = "DEVICE_ID";
pub const FOLDS_KEY: &str = "CV_FOLDS";
pub const SEED_KEY: &str = "CV_SEED";
pub const PARALLEL_FOLDS_KEY: &str = "PARALLEL_FOLDS";

/// LightGBM hyperparameters; `early_stopping_round = 0` disables early stopping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LightgbmParams {
    pub num_iterations: u32,
    pub learning_rate: f64,
    pub num_leaves: u32,
    pub max_depth: i32,
    pub min_data_in_leaf: u32,
    pub lambda_l1: f64,
    pub lambda_l2: f64,
    pub feature_fraction: f64,
    pub bagging_fraction: f64,
    pub bagging_freq: u32,
    pub early_stopping_round: u32,
    pub num_threads: usize,
}

impl Default for LightgbmParams {
    fn default() -> Self {
        Self {
            num_iterations: 1000,
            learning_rate: 0.05,
            num_leaves: 31,
            max_depth: -1,
            min_data_in_leaf: 20,
            lambda_l1: 0.0,
            lambda_l2: 1.0,
            feature_fraction: 0.8,
            bagging_fraction: 0.8,
            bagging_freq: 1,
            early_stopping_round: 100,
            num_threads: num_cpus::get().max(1),
        }
    }
}

impl LightgbmParams {
    pub fn validate(&self) -> Result<()> {
        if self.num_iterations == 0 {
            return Err(anyhow!("num_iterations must be >= 1"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(anyhow!(
                "learning_rate must be a positive number (value: {})",
                self.learning_rate
            ));
        }
        if self.num_leaves < 2 {
            return Err(anyhow!("num_leaves must be >= 2 (value: {})", self.num_leaves));
        }
        for (name, value) in [
            ("feature_fraction", self.feature_fraction),
            ("bagging_fraction", self.bagging_fraction),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(anyhow!("{} must be in (0, 1] (value: {})", name, value));
            }
        }
        for (name, value) in [("lambda_l1", self.lambda_l1), ("lambda_l2", self.lambda_l2)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(anyhow!("{} must be >= 0 (value: {})", name, value));
            }
        }
        Ok(())
    }
}

/// Optional command-line overrides, applied on top of defaults.
#[derive(Debug, Clone, Default)]
pub struct LightgbmOverrides {
    pub num_iterations: Option<u32>,
    pub learning_rate: Option<f64>,
    pub num_leaves: Option<u32>,
    pub max_depth: Option<i32>,
    pub min_data_in_leaf: Option<u32>,
    pub lambda_l1: Option<f64>,
    pub lambda_l2: Option<f64>,
    pub feature_fraction: Option<f64>,
    pub bagging_fraction: Option<f64>,
    pub bagging_freq: Option<u32>,
    pub early_stopping_round: Option<u32>,
}

impl LightgbmOverrides {
    pub fn apply(self, base: LightgbmParams) -> LightgbmParams {
        LightgbmParams {
            num_iterations: self.num_iterations.unwrap_or(base.num_iterations),
            learning_rate: self.learning_rate.unwrap_or(base.learning_rate),
            num_leaves: self.num_leaves.unwrap_or(base.num_leaves),
            max_depth: self.max_depth.unwrap_or(base.max_depth),
            min_data_in_leaf: self.min_data_in_leaf.unwrap_or(base.min_data_in_leaf),
            lambda_l1: self.lambda_l1.unwrap_or(base.lambda_l1),
            lambda_l2: self.lambda_l2.unwrap_or(base.lambda_l2),
            feature_fraction: self.feature_fraction.unwrap_or(base.feature_fraction),
            bagging_fraction: self.bagging_fraction.unwrap_or(base.bagging_fraction),
            bagging_freq: self.bagging_freq.unwrap_or(base.bagging_freq),
            early_stopping_round: self
                .early_stopping_round
                .unwrap_or(base.early_stopping_round),
            num_threads: base.num_threads,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputPaths {
    pub train: PathBuf,
    pub test: PathBuf,
    pub weights: PathBuf,
    pub sample_submission: PathBuf,
}

impl Default for InputPaths {
    fn default() -> Self {
        Self {
            train: PathBuf::from(DEFAULT_TRAIN_FILE),
            test: PathBuf::from(DEFAULT_TEST_FILE),
            weights: PathBuf::from(DEFAULT_WEIGHTS_FILE),
            sample_submission: PathBuf::from(DEFAULT_SAMPLE_SUBMISSION_FILE),
        }
    }
}

/// Cross-validation and hardware settings read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    /// Empty disables GPU training.
    pub device_id: String,
    pub folds: usize,
    pub seed: u64,
    pub parallel_folds: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            folds: DEFAULT_FOLDS,
            seed: DEFAULT_SEED,
            parallel_folds: false,
        }
    }
}

impl RuntimeSettings {
    pub fn from_env() -> Result<Self> {
        let settings: HashMap<String, String> = std::env::vars().collect();
        Self::from_settings_map(&settings)
    }

    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let device_id = optional_setting(settings, DEVICE_ID_KEY)
            .unwrap_or_default()
            .to_string();
        let folds = setting_usize_or(settings, FOLDS_KEY, DEFAULT_FOLDS, 2)?;
        let seed = setting_u64_or(settings, SEED_KEY, DEFAULT_SEED)?;
        let parallel_folds = setting_bool_or(settings, PARALLEL_FOLDS_KEY, false)?;
        Ok(Self {
            device_id,
            folds,
            seed,
            parallel_folds,
        })
    }

    pub fn gpu_enabled(&self) -> bool {
        !self.device_id.trim().is_empty()
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn setting_usize_or(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
) -> Result<usize> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<usize>()
        .map_err(|_| anyhow!("Setting {} must be an integer (value: {})", key, raw))?;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value)
}

fn setting_u64_or(settings: &HashMap<String, String>, key: &str, default: u64) -> Result<u64> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    raw.parse::<u64>()
        .map_err(|_| anyhow!("Setting {} must be a non-negative integer (value: {})", key, raw))
}

fn setting_bool_or(settings: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("Setting {} must be true or false (value: {})", key, raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn runtime_settings_default_when_unset() {
        let parsed = RuntimeSettings::from_settings_map(&HashMap::new()).unwrap();
        assert_eq!(parsed, RuntimeSettings::default());
        assert!(!parsed.gpu_enabled());
    }

    #[test]
    fn runtime_settings_parse_overrides() {
        let parsed = RuntimeSettings::from_settings_map(&settings(&[
            (DEVICE_ID_KEY, " 1 "),
            (FOLDS_KEY, "3"),
            (SEED_KEY, "7"),
            (PARALLEL_FOLDS_KEY, "yes"),
        ]))
        .unwrap();
        assert_eq!(parsed.device_id, "1");
        assert!(parsed.gpu_enabled());
        assert_eq!(parsed.folds, 3);
        assert_eq!(parsed.seed, 7);
        assert!(parsed.parallel_folds);
    }

    #[test]
    fn runtime_settings_reject_invalid_values() {
        assert!(RuntimeSettings::from_settings_map(&settings(&[(FOLDS_KEY, "1")])).is_err());
        assert!(RuntimeSettings::from_settings_map(&settings(&[(SEED_KEY, "-4")])).is_err());
        assert!(
            RuntimeSettings::from_settings_map(&settings(&[(PARALLEL_FOLDS_KEY, "maybe")]))
                .is_err()
        );
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let base = LightgbmParams::default();
        let merged = LightgbmOverrides {
            learning_rate: Some(0.1),
            early_stopping_round: Some(0),
            ..Default::default()
        }
        .apply(base.clone());
        assert_eq!(merged.learning_rate, 0.1);
        assert_eq!(merged.early_stopping_round, 0);
        assert_eq!(merged.num_leaves, base.num_leaves);
        assert!(merged.validate().is_ok());
    }

    #[test]
    fn params_validation_catches_bad_fractions() {
        let params = LightgbmParams {
            feature_fraction: 0.0,
            ..LightgbmParams::default()
        };
        assert!(params.validate().is_err());
    }
}
