//! Application Configuration
//!
//! Pipeline, matching and dataset settings stored in TOML format. Every
//! section and field is optional in the file and falls back to its default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::dataset::DatasetConfig;
use crate::error::{ScanError, ScanResult};
use crate::matching::MatchConfig;
use crate::phash::HashConfig;
use crate::pipeline::PipelineConfig;
use crate::vision::{DetectionConfig, RectifyConfig};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Outline detection
    pub detection: DetectionConfig,
    /// Perspective correction and cropping
    pub rectify: RectifyConfig,
    /// Perceptual hash parameters
    pub hashing: HashConfig,
    /// Reference matching
    pub matching: MatchConfig,
    /// Reference dataset location
    pub dataset: DatasetConfig,
    /// Streaming session behaviour
    pub session: SessionSettings,
}

/// Streaming session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Process the candidates of one frame in parallel
    pub parallel: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { parallel: true }
    }
}

impl AppConfig {
    /// Settings for a frame pipeline built from this configuration
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            detection: self.detection.clone(),
            rectify: self.rectify.clone(),
            hashing: self.hashing,
            parallel: self.session.parallel,
        }
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> ScanResult<()> {
        self.hashing.validate()?;

        if self.detection.median_kernel % 2 == 0 {
            return Err(ScanError::Config(format!(
                "median_kernel must be odd, got {}",
                self.detection.median_kernel
            )));
        }
        if self.detection.threshold_block_size < 3 || self.detection.threshold_block_size % 2 == 0 {
            return Err(ScanError::Config(format!(
                "threshold_block_size must be odd and at least 3, got {}",
                self.detection.threshold_block_size
            )));
        }
        if !(self.rectify.crop_scale > 0.0 && self.rectify.crop_scale <= 1.0) {
            return Err(ScanError::Config(format!(
                "crop_scale must be in (0, 1], got {}",
                self.rectify.crop_scale
            )));
        }
        if let Some(ratio) = self.rectify.aspect_ratio {
            if ratio <= 0.0 {
                return Err(ScanError::Config(format!("aspect_ratio must be positive, got {}", ratio)));
            }
        }
        if self.matching.threshold > self.hashing.bit_len() {
            return Err(ScanError::Config(format!(
                "threshold {} exceeds the {}-bit hash width",
                self.matching.threshold,
                self.hashing.bit_len()
            )));
        }
        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Default location of the configuration file
pub fn default_config_path() -> Result<PathBuf> {
    Ok(crate::storage::get_config_dir()?.join("config.toml"))
}

/// Load an explicit config file, or the default one if it exists, or defaults
pub fn load_or_default(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        let config = load_config(path).with_context(|| format!("Failed to load config {:?}", path))?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Some(config) = default_config_path().ok().and_then(|path| load_if_present(&path)) {
        return Ok(config);
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}

/// Load an optional config file; a file that exists but does not parse is
/// reported and skipped
fn load_if_present(path: &Path) -> Option<AppConfig> {
    if !path.exists() {
        return None;
    }
    match load_config(path) {
        Ok(config) => {
            info!("Loaded configuration from {:?}", path);
            Some(config)
        }
        Err(e) => {
            warn!("Ignoring unreadable config {:?}: {:#}", path, e);
            None
        }
    }
}
