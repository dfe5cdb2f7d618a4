use std::{collections::HashMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};

use super::bounds::BoundingVolume;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointFormat {
    Las,
    Laz,
    Pts,
    Ptx,
}

impl PointFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointFormat::Las => "las",
            PointFormat::Laz => "laz",
            PointFormat::Pts => "pts",
            PointFormat::Ptx => "ptx",
        }
    }
}

impl fmt::Display for PointFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header of a single scan inside a PTX file.
///
/// Kept for diagnostics only, the transform is never applied to the points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanHeader {
    pub columns: u64,
    pub rows: u64,
    pub scanner_position: [f64; 3],
    pub scanner_axes: [[f64; 3]; 3],
    pub transform: [[f64; 4]; 4],
}

impl ScanHeader {
    pub fn expected_points(&self) -> u64 {
        self.columns.saturating_mul(self.rows)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub parse_time: Duration,
    pub declared_point_count: Option<u64>,
    pub skipped_records: u64,
    pub scans: Vec<ScanHeader>,
    pub other: HashMap<String, String>,
}

/// Parsed point cloud with flat xyz (and optional rgb) buffers.
///
/// Positions are laid out `[x0, y0, z0, x1, y1, z1, ...]`, colors use the
/// same layout with every channel in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct PointCloudData {
    points: Vec<f32>,
    colors: Option<Vec<f32>>,
    bounds: Option<BoundingVolume>,
    format: PointFormat,
    pub metadata: Metadata,
}

impl PointCloudData {
    /// Builds a cloud from already-accumulated buffers.
    ///
    /// Panics if the buffers don't describe whole points or disagree on the
    /// point count; parsers always push xyz and rgb triples together.
    pub fn new(
        points: Vec<f32>,
        colors: Option<Vec<f32>>,
        bounds: Option<BoundingVolume>,
        format: PointFormat,
        metadata: Metadata,
    ) -> Self {
        assert_eq!(points.len() % 3, 0, "positions must be xyz triples");
        if let Some(colors) = &colors {
            assert_eq!(colors.len(), points.len(), "one rgb triple per point");
        }
        debug_assert_eq!(bounds.is_some(), !points.is_empty());

        Self {
            points,
            colors,
            bounds,
            format,
            metadata,
        }
    }

    /// Builds a cloud and computes its bounds in one scan.
    pub fn from_buffers(
        points: Vec<f32>,
        colors: Option<Vec<f32>>,
        format: PointFormat,
        metadata: Metadata,
    ) -> Self {
        let bounds = super::bounds::compute_bounds(&points);
        Self::new(points, colors, bounds, format, metadata)
    }

    pub fn points(&self) -> &[f32] {
        &self.points
    }

    pub fn colors(&self) -> Option<&[f32]> {
        self.colors.as_deref()
    }

    pub fn count(&self) -> usize {
        self.points.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn has_color(&self) -> bool {
        self.colors.is_some()
    }

    /// `None` when the cloud holds no points.
    pub fn bounds(&self) -> Option<&BoundingVolume> {
        self.bounds.as_ref()
    }

    pub fn format(&self) -> PointFormat {
        self.format
    }

    pub fn iter(&self) -> impl Iterator<Item = [f32; 3]> + '_ {
        self.points.chunks_exact(3).map(|p| [p[0], p[1], p[2]])
    }

    pub fn into_buffers(self) -> (Vec<f32>, Option<Vec<f32>>) {
        (self.points, self.colors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_and_color_flags_follow_buffers() {
        let pc = PointCloudData::from_buffers(
            vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
            Some(vec![1.0; 6]),
            PointFormat::Pts,
            Metadata::default(),
        );
        assert_eq!(pc.count(), 2);
        assert!(pc.has_color());
        assert_eq!(pc.iter().nth(1), Some([3.0, 4.0, 5.0]));

        let bounds = pc.bounds().unwrap();
        assert_eq!(bounds.min, [0.0, 1.0, 2.0]);
        assert_eq!(bounds.max, [3.0, 4.0, 5.0]);
    }

    #[test]
    fn empty_cloud_has_no_bounds() {
        let pc = PointCloudData::from_buffers(vec![], None, PointFormat::Ptx, Metadata::default());
        assert_eq!(pc.count(), 0);
        assert!(pc.is_empty());
        assert!(!pc.has_color());
        assert!(pc.bounds().is_none());
    }

    #[test]
    #[should_panic]
    fn mismatched_color_buffer_is_rejected() {
        PointCloudData::from_buffers(
            vec![0.0, 0.0, 0.0],
            Some(vec![1.0; 6]),
            PointFormat::Las,
            Metadata::default(),
        );
    }
}
