use anyhow::Result;
use log::info;

use crate::config::{LightgbmParams, RuntimeSettings};
use crate::weights::WeightTable;

/// Everything a run needs that is fixed before the first fold: settings,
/// classifier hyperparameters and the cluster weight table.
#[derive(Debug, Clone)]
pub struct RunContext {
    settings: RuntimeSettings,
    lightgbm: LightgbmParams,
    weights: WeightTable,
}

impl RunContext {
    pub fn new(
        settings: RuntimeSettings,
        lightgbm: LightgbmParams,
        weights: WeightTable,
    ) -> Result<Self> {
        lightgbm.validate()?;
        if settings.gpu_enabled() {
            info!("GPU training requested on device {}", settings.device_id);
        } else {
            info!("DEVICE_ID not set; training on CPU");
        }
        info!(
            "Run context: {} folds, seed {}, {} cluster weight(s), parallel folds {}",
            settings.folds,
            settings.seed,
            weights.len(),
            if settings.parallel_folds { "on" } else { "off" }
        );
        Ok(Self {
            settings,
            lightgbm,
            weights,
        })
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn lightgbm(&self) -> &LightgbmParams {
        &self.lightgbm
    }

    pub fn weights(&self) -> &WeightTable {
        &self.weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_hyperparameters() {
        let params = LightgbmParams {
            num_iterations: 0,
            ..LightgbmParams::default()
        };
        assert!(
            RunContext::new(RuntimeSettings::default(), params, WeightTable::default()).is_err()
        );
    }

    #[test]
    fn exposes_the_weight_table() {
        let weights = WeightTable::from_pairs([("{a}", 2.0)]).unwrap();
        let context =
            RunContext::new(RuntimeSettings::default(), LightgbmParams::default(), weights)
                .unwrap();
        assert_eq!(context.weights().feature_weight("{a}"), 2.0);
        assert_eq!(context.settings().folds, 5);
    }
}
