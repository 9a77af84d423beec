pub mod classifier;
pub mod commands;
pub mod config;
pub mod context;
pub mod data_context;
pub mod dataset;
pub mod features;
pub mod folds;
pub mod imputer;
pub mod labels;
pub mod lightgbm;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod submission;
pub mod trainer;
pub mod trends;
pub mod weights;
