use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::point::PointFormat;

/// Post-load summary for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCloudMetrics {
    pub total_points: usize,
    /// Never above `total_points`.
    pub visible_points: usize,
    pub file_size: u64,
    pub load_time: Duration,
    pub format: PointFormat,
}

impl PointCloudMetrics {
    pub fn new(
        total_points: usize,
        visible_points: usize,
        file_size: u64,
        load_time: Duration,
        format: PointFormat,
    ) -> Self {
        Self {
            total_points,
            visible_points: visible_points.min(total_points),
            file_size,
            load_time,
            format,
        }
    }

    pub fn with_visible_points(&self, visible_points: usize) -> Self {
        Self {
            visible_points: visible_points.min(self.total_points),
            ..self.clone()
        }
    }
}
