use serde::{Deserialize, Serialize};

/// Axis-aligned box over a set of points.
///
/// `min[i] <= max[i]` holds on every axis for any box built from at least one point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingVolume {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl BoundingVolume {
    pub fn size(&self) -> [f32; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// Euclidean length of the box diagonal.
    pub fn diagonal(&self) -> f32 {
        let [sx, sy, sz] = self.size();
        (sx * sx + sy * sy + sz * sz).sqrt()
    }

    pub fn max_dimension(&self) -> f32 {
        let [sx, sy, sz] = self.size();
        sx.max(sy).max(sz)
    }

    pub fn contains(&self, p: [f32; 3]) -> bool {
        (0..3).all(|i| self.min[i] <= p[i] && p[i] <= self.max[i])
    }
}

/// Running min/max, fed one point at a time while a parser walks its input.
#[derive(Debug, Clone)]
pub struct BoundsAccumulator {
    min: [f32; 3],
    max: [f32; 3],
    count: usize,
}

impl Default for BoundsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundsAccumulator {
    pub fn new() -> Self {
        Self {
            min: [f32::INFINITY; 3],
            max: [f32::NEG_INFINITY; 3],
            count: 0,
        }
    }

    pub fn update(&mut self, x: f32, y: f32, z: f32) {
        self.min[0] = self.min[0].min(x);
        self.min[1] = self.min[1].min(y);
        self.min[2] = self.min[2].min(z);
        self.max[0] = self.max[0].max(x);
        self.max[1] = self.max[1].max(y);
        self.max[2] = self.max[2].max(z);
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// `None` if no point was ever added.
    pub fn finish(&self) -> Option<BoundingVolume> {
        (self.count > 0).then_some(BoundingVolume {
            min: self.min,
            max: self.max,
        })
    }
}

/// Bounds of a flat xyz buffer in a single linear scan.
pub fn compute_bounds(points: &[f32]) -> Option<BoundingVolume> {
    let mut acc = BoundsAccumulator::new();
    for p in points.chunks_exact(3) {
        acc.update(p[0], p[1], p[2]);
    }
    acc.finish()
}

/// Mean of all coordinates, accumulated in f64.
pub fn centroid(points: &[f32]) -> Option<[f32; 3]> {
    let count = points.len() / 3;
    if count == 0 {
        return None;
    }

    let mut sum = [0.0_f64; 3];
    for p in points.chunks_exact(3) {
        sum[0] += p[0] as f64;
        sum[1] += p[1] as f64;
        sum[2] += p[2] as f64;
    }

    let n = count as f64;
    Some([
        (sum[0] / n) as f32,
        (sum[1] / n) as f32,
        (sum[2] / n) as f32,
    ])
}
