pub mod build_features;
pub mod train;
