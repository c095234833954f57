// src/config.rs

use crate::types::Config;
use anyhow::{bail, Context, Result};
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading config file {path}"))?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Fail fast on settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.tracker.max_disappear == 0 {
            bail!("tracker.max_disappear must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.cable.border_ratio) {
            bail!(
                "cable.border_ratio must be within 0..=1, got {}",
                self.cable.border_ratio
            );
        }
        if let Some(y) = self.cable.border_y {
            if y < 0.0 {
                bail!("cable.border_y must be non-negative, got {y}");
            }
        }
        if self.detector.min_area < 0.0 {
            bail!("detector.min_area must be non-negative");
        }
        if self.detector.min_group_size == 0 {
            bail!("detector.min_group_size must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::types::Config;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_disappearance_tolerance_rejected() {
        let mut config = Config::default();
        config.tracker.max_disappear = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_border_ratio_rejected() {
        let mut config = Config::default();
        config.cable.border_ratio = 1.5;
        assert!(config.validate().is_err());
    }
}
