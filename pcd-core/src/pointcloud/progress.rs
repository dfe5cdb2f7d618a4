use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingStage {
    Downloading,
    Parsing,
    Processing,
    Complete,
    Error,
}

impl fmt::Display for LoadingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadingStage::Downloading => "downloading",
            LoadingStage::Parsing => "parsing",
            LoadingStage::Processing => "processing",
            LoadingStage::Complete => "complete",
            LoadingStage::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadingProgress {
    pub loaded: u64,
    pub total: u64,
    /// Always within `[0, 100]`.
    pub percentage: f32,
    pub stage: LoadingStage,
}

impl LoadingProgress {
    /// A `total` of zero means "unknown" and yields 0 %, except for
    /// `Complete` which is always 100 %.
    pub fn new(stage: LoadingStage, loaded: u64, total: u64) -> Self {
        let percentage = match stage {
            LoadingStage::Complete => 100.0,
            _ if total == 0 => 0.0,
            _ => (loaded as f64 / total as f64 * 100.0) as f32,
        };

        Self {
            loaded,
            total,
            percentage: percentage.clamp(0.0, 100.0),
            stage,
        }
    }

    pub fn stage(stage: LoadingStage) -> Self {
        Self::new(stage, 0, 0)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.stage, LoadingStage::Complete | LoadingStage::Error)
    }
}
