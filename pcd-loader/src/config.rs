use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use pcd_core::{camera::ProjectionMode, limits::FileSizeLimits};
use pcd_parser::{parsers::ColorDepth, ParseOptions};

use crate::error::LoadError;

pub const DEFAULT_POINT_BUDGET: usize = 2_000_000;

/// Clouds above `threshold` points are reduced right after parsing to at
/// most `ceiling` points, whatever the active budget is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoDownsample {
    pub threshold: usize,
    pub ceiling: usize,
}

impl Default for AutoDownsample {
    fn default() -> Self {
        Self {
            threshold: 2_000_000,
            ceiling: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub point_budget: usize,
    pub projection: ProjectionMode,
    pub color_depth: ColorDepth,
    pub limits: FileSizeLimits,
    pub auto_downsample: AutoDownsample,
    pub http_timeout_secs: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            point_budget: DEFAULT_POINT_BUDGET,
            projection: ProjectionMode::default(),
            color_depth: ColorDepth::default(),
            limits: FileSizeLimits::default(),
            auto_downsample: AutoDownsample::default(),
            http_timeout_secs: 60,
        }
    }
}

impl LoaderConfig {
    pub fn from_json_str(json: &str) -> Result<Self, LoadError> {
        let config: LoaderConfig =
            serde_json::from_str(json).map_err(|e| LoadError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, LoadError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json).map_err(|e| match e {
            LoadError::Config(message) => {
                LoadError::Config(format!("{}: {}", path.display(), message))
            }
            other => other,
        })
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        if self.point_budget == 0 {
            return Err(LoadError::Config("point_budget must be at least 1".into()));
        }
        if self.auto_downsample.ceiling == 0 {
            return Err(LoadError::Config(
                "auto_downsample.ceiling must be at least 1".into(),
            ));
        }
        if self.limits.warn_file_size > self.limits.max_file_size {
            return Err(LoadError::Config(
                "limits.warn_file_size must not exceed limits.max_file_size".into(),
            ));
        }
        Ok(())
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            color_depth: self.color_depth,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
