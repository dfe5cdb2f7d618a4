use std::borrow::Cow;

use rayon::prelude::*;

/// Output counts above this are gathered on the rayon pool.
const PARALLEL_GATHER_THRESHOLD: usize = 250_000;

/// Point/color buffers reduced to a point budget.
///
/// Borrows the input when no reduction was needed.
#[derive(Debug, Clone)]
pub struct LodResult<'a> {
    pub positions: Cow<'a, [f32]>,
    pub colors: Option<Cow<'a, [f32]>>,
    pub count: usize,
}

impl LodResult<'_> {
    pub fn is_reduced(&self) -> bool {
        matches!(self.positions, Cow::Owned(_))
    }

    pub fn into_owned(self) -> (Vec<f32>, Option<Vec<f32>>) {
        (
            self.positions.into_owned(),
            self.colors.map(Cow::into_owned),
        )
    }
}

pub trait PointCloudDecimator {
    fn decimate<'a>(&self, positions: &'a [f32], colors: Option<&'a [f32]>) -> LodResult<'a>;
}

/// Keeps every `skip`-th point starting at index 0.
///
/// Deterministic uniform decimation: no randomness, no error bound and no
/// notion of camera distance.
pub struct UniformDecimator {
    pub point_budget: usize,
}

impl PointCloudDecimator for UniformDecimator {
    fn decimate<'a>(&self, positions: &'a [f32], colors: Option<&'a [f32]>) -> LodResult<'a> {
        let total = positions.len() / 3;
        let budget = self.point_budget.max(1);

        if total <= budget {
            return LodResult {
                positions: Cow::Borrowed(positions),
                colors: colors.map(Cow::Borrowed),
                count: total,
            };
        }

        let skip = skip_factor(total, budget);
        let count = total.div_ceil(skip);
        log::debug!(
            "uniform LOD: {} -> {} points (skip factor {})",
            total,
            count,
            skip
        );

        let positions = gather(positions, skip, count);
        let colors = colors.map(|colors| {
            debug_assert_eq!(colors.len(), total * 3);
            gather(colors, skip, count)
        });

        LodResult {
            positions: Cow::Owned(positions),
            colors: colors.map(Cow::Owned),
            count,
        }
    }
}

/// `ceil(total / budget)`; a budget of zero is treated as one.
pub fn skip_factor(total: usize, budget: usize) -> usize {
    total.div_ceil(budget.max(1)).max(1)
}

/// Number of points `apply_lod` keeps out of `total`.
pub fn lod_count(total: usize, point_budget: usize) -> usize {
    if total <= point_budget.max(1) {
        total
    } else {
        total.div_ceil(skip_factor(total, point_budget))
    }
}

/// Reduces the buffers so that at most `point_budget` points remain.
pub fn apply_lod<'a>(
    positions: &'a [f32],
    colors: Option<&'a [f32]>,
    point_budget: usize,
) -> LodResult<'a> {
    UniformDecimator { point_budget }.decimate(positions, colors)
}

fn gather(src: &[f32], skip: usize, count: usize) -> Vec<f32> {
    if count < PARALLEL_GATHER_THRESHOLD {
        return src
            .chunks_exact(3)
            .step_by(skip)
            .flatten()
            .copied()
            .collect();
    }

    let mut out = vec![0.0_f32; count * 3];
    out.par_chunks_mut(3).enumerate().for_each(|(i, dst)| {
        let start = i * skip * 3;
        dst.copy_from_slice(&src[start..start + 3]);
    });
    out
}
