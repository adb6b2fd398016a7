use glam::DVec3;
use ndarray::ArrayView3;

use crate::volume::Voxel;

/// Slack allowed past the outermost voxel centers before a point counts as
/// outside the grid. Absorbs rounding in the world-to-index mapping.
const BOUNDS_TOLERANCE: f64 = 1e-6;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Trilinear sample at a continuous (x, y, z) index of a (z, y, x) array.
    ///
    /// Returns `None` when the index lies outside `[0, dim - 1]` on any axis.
    #[inline]
    pub(crate) fn trilinear_interpolate<T: Voxel>(
        data: &ArrayView3<'_, T>,
        index: DVec3,
    ) -> Option<f32> {
        let (depth, height, width) = data.dim();
        let x = Self::clamp_to_axis(index.x, width)?;
        let y = Self::clamp_to_axis(index.y, height)?;
        let z = Self::clamp_to_axis(index.z, depth)?;

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let z0 = z.floor() as usize;
        let x1 = (x0 + 1).min(width - 1);
        let y1 = (y0 + 1).min(height - 1);
        let z1 = (z0 + 1).min(depth - 1);

        let dx = (x - x0 as f64) as f32;
        let dy = (y - y0 as f64) as f32;
        let dz = (z - z0 as f64) as f32;
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;
        let one_minus_dz = 1.0 - dz;

        let v = |z: usize, y: usize, x: usize| data[[z, y, x]].to_f32();

        let c00 = v(z0, y0, x0).mul_add(one_minus_dx, v(z0, y0, x1) * dx);
        let c01 = v(z0, y1, x0).mul_add(one_minus_dx, v(z0, y1, x1) * dx);
        let c10 = v(z1, y0, x0).mul_add(one_minus_dx, v(z1, y0, x1) * dx);
        let c11 = v(z1, y1, x0).mul_add(one_minus_dx, v(z1, y1, x1) * dx);

        let c0 = c00.mul_add(one_minus_dy, c01 * dy);
        let c1 = c10.mul_add(one_minus_dy, c11 * dy);

        Some(c0.mul_add(one_minus_dz, c1 * dz))
    }

    #[inline]
    pub(crate) fn nearest_interpolate<T: Voxel>(
        data: &ArrayView3<'_, T>,
        index: DVec3,
    ) -> Option<f32> {
        let (depth, height, width) = data.dim();
        let x = Self::clamp_to_axis(index.x, width)?.round() as usize;
        let y = Self::clamp_to_axis(index.y, height)?.round() as usize;
        let z = Self::clamp_to_axis(index.z, depth)?.round() as usize;
        Some(data[[z, y, x]].to_f32())
    }

    // NaN coordinates fail the range check and are treated as outside.
    #[inline]
    fn clamp_to_axis(coord: f64, len: usize) -> Option<f64> {
        if len == 0 {
            return None;
        }
        let max = (len - 1) as f64;
        if coord >= -BOUNDS_TOLERANCE && coord <= max + BOUNDS_TOLERANCE {
            Some(coord.clamp(0.0, max))
        } else {
            None
        }
    }
}
