use crate::detection::texture::MAX_LBP_POINTS;
use crate::types::Config;
use anyhow::{ensure, Context, Result};
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break an invariant downstream.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.detection.max_width > 0 && self.detection.max_height > 0,
            "detection.max_width/max_height must be positive"
        );
        ensure!(
            self.realtime.reduced_resolution > 0.0 && self.realtime.reduced_resolution <= 1.0,
            "realtime.reduced_resolution must be in (0, 1], got {}",
            self.realtime.reduced_resolution
        );
        ensure!(self.realtime.frame_skip >= 1, "realtime.frame_skip must be >= 1");
        ensure!(
            self.fusion.precision_percentile > 0.0 && self.fusion.precision_percentile < 100.0,
            "fusion.precision_percentile must be in (0, 100)"
        );
        ensure!(
            !self.precision.multi_scale.is_empty()
                && self.precision.multi_scale.iter().all(|s| *s > 0.0),
            "precision.multi_scale must contain positive scales"
        );
        ensure!(
            self.texture.gabor_kernel_size % 2 == 1,
            "texture.gabor_kernel_size must be odd"
        );
        ensure!(
            self.texture.variance_window % 2 == 1,
            "texture.variance_window must be odd"
        );
        ensure!(
            (1..=MAX_LBP_POINTS).contains(&self.texture.lbp_points),
            "texture.lbp_points must be in 1..={}",
            MAX_LBP_POINTS
        );
        ensure!(self.learning.max_examples > 0, "learning.max_examples must be positive");
        ensure!(
            self.learning.learning_rate > 0.0 && self.learning.learning_rate < 1.0,
            "learning.learning_rate must be in (0, 1)"
        );
        ensure!(self.color.clahe_tile_grid > 0, "color.clahe_tile_grid must be positive");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DetectionMethod, Mode};
    use std::io::Write;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "detection:\n  mode: precision\n  default_method: deeplearning\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.detection.mode, Mode::Precision);
        assert_eq!(config.detection.default_method, DetectionMethod::Model);
        assert_eq!(config.detection.max_width, 1920);
        assert_eq!(config.learning.max_examples, 100);
        assert!((config.scenario.dense_coverage - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "learning:\n  max_examples: 10\n  learning_rate: 0.1").unwrap();
        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.learning.max_examples, 10);
        assert!((config.learning.learning_rate - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_bad_resolution() {
        let mut config = Config::default();
        config.realtime.reduced_resolution = 0.0;
        assert!(config.validate().is_err());
        config.realtime.reduced_resolution = 0.5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_lbp_points_range() {
        let mut config = Config::default();
        for (points, ok) in [(0, false), (1, true), (8, true), (9, false), (16, false)] {
            config.texture.lbp_points = points;
            assert_eq!(config.validate().is_ok(), ok, "lbp_points={}", points);
        }
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(Config::load("/nonexistent/grass.yaml").is_err());
    }
}
