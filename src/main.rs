use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use cluster_forecast::{
    commands::{build_features, train},
    config::{
        InputPaths, LightgbmOverrides, RuntimeSettings, DEFAULT_SAMPLE_SUBMISSION_FILE,
        DEFAULT_SUBMISSION_FILE, DEFAULT_TEST_FILE, DEFAULT_TRAIN_FILE, DEFAULT_WEIGHTS_FILE,
    },
};
use log::info;
use std::path::PathBuf;

const DEFAULT_FEATURES_FILE: &str = "data/train_features.csv";

#[derive(Parser)]
#[command(name = "cluster-forecast")]
#[command(about = "Cross-validated cluster transition forecasting")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train per-fold LightGBM models and write the submission
    Train {
        /// Training observations
        #[arg(long, value_name = "PATH", default_value = DEFAULT_TRAIN_FILE)]
        train: PathBuf,
        /// Test observations
        #[arg(long, value_name = "PATH", default_value = DEFAULT_TEST_FILE)]
        test: PathBuf,
        /// Cluster weight table
        #[arg(long, value_name = "PATH", default_value = DEFAULT_WEIGHTS_FILE)]
        weights: PathBuf,
        /// Sample submission defining id order and class columns
        #[arg(long, value_name = "PATH", default_value = DEFAULT_SAMPLE_SUBMISSION_FILE)]
        sample_submission: PathBuf,
        /// Destination for the submission
        #[arg(short, long, value_name = "PATH", default_value = DEFAULT_SUBMISSION_FILE)]
        output: PathBuf,
        /// Optional destination for out-of-fold predictions
        #[arg(long, value_name = "PATH")]
        oof_output: Option<PathBuf>,
        #[command(flatten)]
        runtime: RuntimeArgs,
        #[command(flatten)]
        lightgbm: LightgbmArgs,
    },
    /// Write the derived training feature table to CSV
    BuildFeatures {
        /// Training observations
        #[arg(long, value_name = "PATH", default_value = DEFAULT_TRAIN_FILE)]
        train: PathBuf,
        /// Cluster weight table
        #[arg(long, value_name = "PATH", default_value = DEFAULT_WEIGHTS_FILE)]
        weights: PathBuf,
        /// Destination for the feature table
        #[arg(short, long, value_name = "PATH", default_value = DEFAULT_FEATURES_FILE)]
        output: PathBuf,
    },
}

#[derive(Args)]
struct RuntimeArgs {
    /// GPU device id (overrides DEVICE_ID; empty trains on CPU)
    #[arg(long)]
    device_id: Option<String>,
    /// Number of stratified folds (overrides CV_FOLDS)
    #[arg(long)]
    folds: Option<usize>,
    /// Shuffle seed (overrides CV_SEED)
    #[arg(long)]
    seed: Option<u64>,
    /// Train folds concurrently
    #[arg(long)]
    parallel_folds: bool,
}

impl RuntimeArgs {
    fn resolve(self) -> Result<RuntimeSettings> {
        let mut settings = RuntimeSettings::from_env()?;
        if let Some(device_id) = self.device_id {
            settings.device_id = device_id.trim().to_string();
        }
        if let Some(folds) = self.folds {
            settings.folds = folds;
        }
        if let Some(seed) = self.seed {
            settings.seed = seed;
        }
        settings.parallel_folds |= self.parallel_folds;
        Ok(settings)
    }
}

#[derive(Args)]
struct LightgbmArgs {
    /// Number of boosting iterations
    #[arg(long)]
    num_iterations: Option<u32>,
    /// Learning rate
    #[arg(long)]
    learning_rate: Option<f64>,
    /// Number of leaves in one tree
    #[arg(long)]
    num_leaves: Option<u32>,
    /// Maximum tree depth (-1 means no limit)
    #[arg(long, allow_hyphen_values = true)]
    max_depth: Option<i32>,
    /// Minimum number of observations in one leaf
    #[arg(long)]
    min_data_in_leaf: Option<u32>,
    /// L1 regularization
    #[arg(long)]
    lambda_l1: Option<f64>,
    /// L2 regularization
    #[arg(long)]
    lambda_l2: Option<f64>,
    /// Feature fraction (0..=1)
    #[arg(long)]
    feature_fraction: Option<f64>,
    /// Bagging fraction (0..=1)
    #[arg(long)]
    bagging_fraction: Option<f64>,
    /// Bagging frequency (0 disables bagging)
    #[arg(long)]
    bagging_freq: Option<u32>,
    /// Early stopping rounds (0 disables early stopping)
    #[arg(long)]
    early_stopping_round: Option<u32>,
}

impl From<LightgbmArgs> for LightgbmOverrides {
    fn from(args: LightgbmArgs) -> Self {
        Self {
            num_iterations: args.num_iterations,
            learning_rate: args.learning_rate,
            num_leaves: args.num_leaves,
            max_depth: args.max_depth,
            min_data_in_leaf: args.min_data_in_leaf,
            lambda_l1: args.lambda_l1,
            lambda_l2: args.lambda_l2,
            feature_fraction: args.feature_fraction,
            bagging_fraction: args.bagging_fraction,
            bagging_freq: args.bagging_freq,
            early_stopping_round: args.early_stopping_round,
        }
    }
}

fn main() -> Result<()> {
    let Cli { command } = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match command {
        Commands::Train {
            train: train_path,
            test,
            weights,
            sample_submission,
            output,
            oof_output,
            runtime,
            lightgbm,
        } => {
            let inputs = InputPaths {
                train: train_path,
                test,
                weights,
                sample_submission,
            };
            let outputs = train::TrainOutputs {
                submission: output,
                oof: oof_output,
            };
            let settings = runtime.resolve()?;
            train::run(&inputs, &outputs, settings, lightgbm.into())?;
        }
        Commands::BuildFeatures {
            train: train_path,
            weights,
            output,
        } => {
            build_features::run(&train_path, &weights, &output)?;
        }
    }

    info!("Done");
    Ok(())
}
