//! Matcher configuration loaded from YAML.
//!
//! ```yaml
//! nn_ratio: 0.75
//! check_orientation: true
//! pyramid:
//!   n_levels: 8
//!   scale_factor: 1.2
//! camera:
//!   fx: 458.654
//!   fy: 457.296
//!   cx: 367.215
//!   cy: 248.375
//!   bf: 50.2
//! ```
//!
//! Every field is optional; missing ones take the defaults below.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::tracking::frame::CameraModel;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Tunables of the feature matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatcherSettings {
    /// Best / second-best acceptance ratio.
    pub nn_ratio: f64,
    /// Drop matches outside the dominant rotation bins.
    pub check_orientation: bool,
    pub pyramid: PyramidSettings,
    /// Intrinsics, when the caller wants them built from the same file.
    pub camera: Option<CameraSettings>,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        Self {
            nn_ratio: 0.6,
            check_orientation: true,
            pyramid: PyramidSettings::default(),
            camera: None,
        }
    }
}

/// ORB extractor pyramid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PyramidSettings {
    pub n_levels: usize,
    pub scale_factor: f64,
}

impl Default for PyramidSettings {
    fn default() -> Self {
        Self {
            n_levels: 8,
            scale_factor: 1.2,
        }
    }
}

/// Rectified pinhole intrinsics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraSettings {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Baseline times fx; zero for monocular.
    #[serde(default)]
    pub bf: f64,
}

impl CameraSettings {
    pub fn to_camera(&self) -> CameraModel {
        CameraModel::new(self.fx, self.fy, self.cx, self.cy, self.bf / self.fx)
    }
}

impl MatcherSettings {
    /// Reject values the matcher cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.nn_ratio > 0.0 && self.nn_ratio <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "nn_ratio",
                reason: format!("{} is outside (0, 1]", self.nn_ratio),
            });
        }
        if self.pyramid.n_levels < 1 {
            return Err(ConfigError::Invalid {
                field: "pyramid.n_levels",
                reason: "at least one level is required".to_string(),
            });
        }
        if !(self.pyramid.scale_factor > 1.0) {
            return Err(ConfigError::Invalid {
                field: "pyramid.scale_factor",
                reason: format!("{} must exceed 1", self.pyramid.scale_factor),
            });
        }
        if let Some(camera) = &self.camera {
            if camera.fx <= 0.0 || camera.fy <= 0.0 {
                return Err(ConfigError::Invalid {
                    field: "camera",
                    reason: "focal lengths must be positive".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Settings loader.
pub struct SettingsLoader;

impl SettingsLoader {
    /// Load and validate settings from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<MatcherSettings, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_str(&content)?;
        info!("[Config] loaded matcher settings from {}", path.display());
        Ok(settings)
    }

    /// Parse and validate settings from YAML text.
    pub fn from_str(content: &str) -> Result<MatcherSettings, ConfigError> {
        let settings: MatcherSettings = serde_yaml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings as YAML.
    pub fn save<P: AsRef<Path>>(settings: &MatcherSettings, path: P) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(settings)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
