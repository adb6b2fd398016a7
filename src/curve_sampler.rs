//! Resampling of a curve into equally spaced cross-section frames.
//!
//! Frames are propagated with the double reflection method (Wang et al.
//! 2008), giving rotation minimizing frames that do not twist where the
//! tangent swings past a fixed reference direction. The first frame takes
//! its height axis from the `up` hint. On closed curves the rotation left
//! over after one full loop is spread linearly along the arc length, so the
//! frame at the end of the loop matches the first one.

use glam::DVec3;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::curve::{Curve, Spline};
use crate::error::PanoramaError;

/// Largest arc-length step used while transporting a frame.
const MAX_TRANSPORT_STEP_MM: f64 = 0.5;
/// Fewest transport steps between two output frames.
const MIN_TRANSPORT_STEPS: usize = 4;
/// Keeps `length / spacing` that is an integer up to rounding from losing
/// its last frame.
const FRAME_COUNT_EPSILON: f64 = 1e-9;
/// Smallest projection of a reference direction onto the normal plane that
/// is still used to seed the first frame.
const PARALLEL_THRESHOLD: f64 = 0.1;
/// Upper bound on the frames sampled from one curve.
const MAX_FRAMES: usize = u32::MAX as usize;

/// Geometry parameters shared by the sampler and the straightener.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplingParameters {
    /// Arc-length distance between consecutive frames (mm).
    pub spacing_along_curve_mm: f64,
    /// Slab extent along the depth axis (mm).
    pub slab_depth_mm: f64,
    /// Slab extent along the height axis (mm).
    pub slab_height_mm: f64,
    /// Preferred world direction of the first frame's height axis.
    pub up: DVec3,
}

impl Default for SamplingParameters {
    fn default() -> Self {
        Self {
            spacing_along_curve_mm: 0.5,
            slab_depth_mm: 40.0,
            slab_height_mm: 80.0,
            up: DVec3::Z,
        }
    }
}

impl SamplingParameters {
    pub fn new(spacing_along_curve_mm: f64, slab_depth_mm: f64, slab_height_mm: f64) -> Self {
        Self {
            spacing_along_curve_mm,
            slab_depth_mm,
            slab_height_mm,
            ..Self::default()
        }
    }

    pub fn with_up(mut self, up: DVec3) -> Self {
        self.up = up;
        self
    }

    pub fn validate(&self) -> Result<(), PanoramaError> {
        positive("spacing_along_curve_mm", self.spacing_along_curve_mm)?;
        positive("slab_depth_mm", self.slab_depth_mm)?;
        positive("slab_height_mm", self.slab_height_mm)?;
        if !self.up.is_finite() || self.up.length_squared() <= f64::EPSILON {
            return Err(PanoramaError::InvalidParameter {
                name: "up",
                value: self.up.length(),
            });
        }
        Ok(())
    }
}

pub(crate) fn positive(name: &'static str, value: f64) -> Result<(), PanoramaError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PanoramaError::InvalidParameter { name, value })
    }
}

/// Cross-section frame at one arc-length position.
///
/// `depth_axis × height_axis = tangent`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampledFrame {
    pub arc_length: f64,
    pub center: DVec3,
    pub tangent: DVec3,
    pub depth_axis: DVec3,
    pub height_axis: DVec3,
}

impl SampledFrame {
    fn new(arc_length: f64, center: DVec3, tangent: DVec3, normal: DVec3) -> Self {
        let height_axis = orthogonalize(normal, tangent);
        Self {
            arc_length,
            center,
            tangent,
            depth_axis: height_axis.cross(tangent),
            height_axis,
        }
    }

    /// World point at the given offsets (mm) from the center.
    #[inline]
    pub fn point(&self, depth_offset: f64, height_offset: f64) -> DVec3 {
        self.center + self.depth_axis * depth_offset + self.height_axis * height_offset
    }
}

/// Frames produced for a curve length and spacing: `floor(length / spacing) + 1`.
///
/// Fails with `InvalidParameter` when the spacing is so small that the count
/// would exceed `MAX_FRAMES`.
pub fn frame_count(length: f64, spacing: f64) -> Result<usize, PanoramaError> {
    let steps = (length / spacing + FRAME_COUNT_EPSILON).floor();
    if !steps.is_finite() || steps < 0.0 || steps >= MAX_FRAMES as f64 {
        return Err(PanoramaError::InvalidParameter {
            name: "spacing_along_curve_mm",
            value: spacing,
        });
    }
    Ok(steps as usize + 1)
}

pub struct CurveSampler;

impl CurveSampler {
    /// Sample `curve` every `spacing_along_curve_mm` of arc length.
    ///
    /// # Errors
    ///
    /// `DegenerateCurve` for fewer than two distinct points (three when
    /// closed) or zero length, `InvalidParameter` for non-positive sizes.
    pub fn sample(
        curve: &Curve,
        parameters: &SamplingParameters,
    ) -> Result<Vec<SampledFrame>, PanoramaError> {
        parameters.validate()?;
        let spline = Spline::new(curve)?;
        let frames = Self::sample_spline(&spline, parameters)?;
        debug!(
            "sampled {} frames over {:.3} mm (spacing {} mm, closed: {})",
            frames.len(),
            spline.length(),
            parameters.spacing_along_curve_mm,
            spline.is_closed()
        );
        Ok(frames)
    }

    fn sample_spline(
        spline: &Spline,
        parameters: &SamplingParameters,
    ) -> Result<Vec<SampledFrame>, PanoramaError> {
        let length = spline.length();
        let spacing = parameters.spacing_along_curve_mm;
        let count = frame_count(length, spacing)?;

        let start = spline.parameter_at(0.0);
        let start_tangent = spline.tangent(start).unwrap_or(DVec3::Z);
        let up = parameters.up.try_normalize().unwrap_or(DVec3::Z);
        let mut transport = Transport {
            position: spline.position(start),
            tangent: start_tangent,
            normal: initial_normal(start_tangent, up),
            arc_length: 0.0,
        };

        let mut frames = Vec::with_capacity(count);
        frames.push(transport.frame());
        for k in 1..count {
            let target = (k as f64 * spacing).min(length);
            transport.advance_to(spline, target);
            frames.push(transport.frame());
        }

        if spline.is_closed() {
            transport.advance_to(spline, length);
            Self::close_seam(&mut frames, &transport, length);
        }
        Ok(frames)
    }

    /// Spreads the loop's residual rotation over the frames and makes a frame
    /// sitting at the end of the loop identical to the first one.
    fn close_seam(frames: &mut [SampledFrame], end: &Transport, length: f64) {
        let Some(first) = frames.first().copied() else {
            return;
        };
        let axis = first.tangent;
        let end_normal = orthogonalize(end.normal, axis);
        let angle = end_normal
            .cross(first.height_axis)
            .dot(axis)
            .atan2(end_normal.dot(first.height_axis));

        for frame in frames.iter_mut().skip(1) {
            let correction = angle * frame.arc_length / length;
            let normal = rotate_about(frame.height_axis, frame.tangent, correction);
            *frame = SampledFrame::new(frame.arc_length, frame.center, frame.tangent, normal);
        }

        let count = frames.len();
        if let Some(last) = frames.last_mut() {
            let at_loop_end =
                (length - last.arc_length).abs() <= FRAME_COUNT_EPSILON * length.max(1.0);
            if count > 1 && at_loop_end {
                *last = SampledFrame {
                    arc_length: last.arc_length,
                    ..first
                };
            }
        }
        debug!("closed curve seam corrected by {:.6} rad", angle);
    }
}

/// Frame state carried along the spline.
struct Transport {
    position: DVec3,
    tangent: DVec3,
    normal: DVec3,
    arc_length: f64,
}

impl Transport {
    fn frame(&self) -> SampledFrame {
        SampledFrame::new(self.arc_length, self.position, self.tangent, self.normal)
    }

    fn advance_to(&mut self, spline: &Spline, target: f64) {
        let gap = target - self.arc_length;
        if gap <= 0.0 {
            return;
        }
        let steps = ((gap / MAX_TRANSPORT_STEP_MM).ceil() as usize).max(MIN_TRANSPORT_STEPS);
        let from = self.arc_length;
        for step in 1..=steps {
            let arc_length = if step == steps {
                target
            } else {
                from + gap * step as f64 / steps as f64
            };
            let at = spline.parameter_at(arc_length);
            let position = spline.position(at);
            let tangent = spline.tangent(at).unwrap_or(self.tangent);
            self.normal = double_reflection(self.normal, self.position, self.tangent, position, tangent);
            self.position = position;
            self.tangent = tangent;
        }
        self.arc_length = target;
    }
}

fn initial_normal(tangent: DVec3, up: DVec3) -> DVec3 {
    [up, DVec3::Y, DVec3::X]
        .into_iter()
        .map(|reference| reference - tangent * tangent.dot(reference))
        .find(|projected| projected.length() > PARALLEL_THRESHOLD)
        .map_or_else(|| tangent.any_orthonormal_vector(), DVec3::normalize)
}

/// Rotation minimizing transport of `normal` from (x0, t0) to (x1, t1).
fn double_reflection(normal: DVec3, x0: DVec3, t0: DVec3, x1: DVec3, t1: DVec3) -> DVec3 {
    let v1 = x1 - x0;
    let c1 = v1.dot(v1);
    if c1 < 1e-20 {
        return orthogonalize(normal, t1);
    }
    let reflected_normal = normal - v1 * (2.0 / c1 * v1.dot(normal));
    let reflected_tangent = t0 - v1 * (2.0 / c1 * v1.dot(t0));

    let v2 = t1 - reflected_tangent;
    let c2 = v2.dot(v2);
    let transported = if c2 < 1e-20 {
        reflected_normal
    } else {
        reflected_normal - v2 * (2.0 / c2 * v2.dot(reflected_normal))
    };
    orthogonalize(transported, t1)
}

fn orthogonalize(normal: DVec3, tangent: DVec3) -> DVec3 {
    (normal - tangent * tangent.dot(normal))
        .try_normalize()
        .unwrap_or_else(|| tangent.any_orthonormal_vector())
}

fn rotate_about(vector: DVec3, axis: DVec3, angle: f64) -> DVec3 {
    let (sin, cos) = angle.sin_cos();
    vector * cos + axis.cross(vector) * sin
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn assert_orthonormal(frame: &SampledFrame) {
        assert_relative_eq!(frame.tangent.length(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(frame.depth_axis.length(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(frame.height_axis.length(), 1.0, epsilon = 1e-6);
        assert!(frame.tangent.dot(frame.depth_axis).abs() < 1e-6);
        assert!(frame.tangent.dot(frame.height_axis).abs() < 1e-6);
        assert!(frame.depth_axis.dot(frame.height_axis).abs() < 1e-6);
    }

    fn helix() -> Curve {
        Curve::open(
            (0..12)
                .map(|i| {
                    let angle = i as f64 * 0.6;
                    DVec3::new(20.0 * angle.cos(), 20.0 * angle.sin(), 4.0 * i as f64)
                })
                .collect(),
        )
    }

    #[test]
    fn straight_line_frame_count_and_axes() {
        let curve = Curve::open(vec![DVec3::ZERO, DVec3::new(0.0, 0.0, 100.0)]);
        let frames = CurveSampler::sample(&curve, &SamplingParameters::new(1.0, 10.0, 10.0)).unwrap();
        assert_eq!(frames.len(), 101);
        for (k, frame) in frames.iter().enumerate() {
            assert_relative_eq!(frame.arc_length, k as f64, epsilon = 1e-9);
            assert_relative_eq!(frame.center.z, k as f64, epsilon = 1e-6);
            assert_relative_eq!(frame.tangent.z, 1.0, epsilon = 1e-9);
            // up hint is parallel to the line, so +Y seeds the frame
            assert_relative_eq!(frame.height_axis.y, 1.0, epsilon = 1e-9);
            assert_relative_eq!(frame.depth_axis.x, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn up_hint_orients_the_first_frame() {
        let curve = Curve::open(vec![DVec3::ZERO, DVec3::new(50.0, 0.0, 0.0)]);
        let frames = CurveSampler::sample(&curve, &SamplingParameters::new(5.0, 10.0, 10.0)).unwrap();
        assert_relative_eq!(frames[0].height_axis.z, 1.0, epsilon = 1e-9);
        assert_relative_eq!(frames[0].depth_axis.y, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn frames_are_orthonormal_and_monotonic() {
        let frames = CurveSampler::sample(&helix(), &SamplingParameters::new(0.7, 10.0, 10.0)).unwrap();
        for frame in &frames {
            assert_orthonormal(frame);
        }
        for pair in frames.windows(2) {
            assert!(pair[1].arc_length > pair[0].arc_length);
        }
    }

    #[test]
    fn frame_count_matches_length() {
        let curve = helix();
        let length = curve.length().unwrap();
        for spacing in [0.3, 1.0, 2.5, 7.0] {
            let frames =
                CurveSampler::sample(&curve, &SamplingParameters::new(spacing, 10.0, 10.0)).unwrap();
            assert_eq!(frames.len(), (length / spacing).floor() as usize + 1);
        }
    }

    #[test]
    fn frames_are_rotation_minimizing() {
        // consecutive height axes should only turn as much as the tangent does
        let frames = CurveSampler::sample(&helix(), &SamplingParameters::new(0.5, 10.0, 10.0)).unwrap();
        for pair in frames.windows(2) {
            let tangent_turn = pair[0].tangent.angle_between(pair[1].tangent);
            let normal_turn = pair[0].height_axis.angle_between(pair[1].height_axis);
            assert!(normal_turn <= tangent_turn + 1e-3, "{normal_turn} > {tangent_turn}");
        }
    }

    #[test]
    fn sampling_is_deterministic() {
        let parameters = SamplingParameters::new(0.9, 10.0, 10.0);
        let first = CurveSampler::sample(&helix(), &parameters).unwrap();
        let second = CurveSampler::sample(&helix(), &parameters).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn short_curve_gives_single_frame() {
        let curve = Curve::open(vec![DVec3::ZERO, DVec3::new(0.2, 0.0, 0.0)]);
        let frames = CurveSampler::sample(&curve, &SamplingParameters::new(1.0, 10.0, 10.0)).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].center, DVec3::ZERO);
    }

    #[test]
    fn identical_points_are_rejected() {
        let curve = Curve::open(vec![DVec3::new(1.0, 2.0, 3.0), DVec3::new(1.0, 2.0, 3.0)]);
        let result = CurveSampler::sample(&curve, &SamplingParameters::default());
        assert!(matches!(result, Err(PanoramaError::DegenerateCurve(_))));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let curve = helix();
        let result = CurveSampler::sample(&curve, &SamplingParameters::new(0.0, 10.0, 10.0));
        assert!(matches!(
            result,
            Err(PanoramaError::InvalidParameter { name: "spacing_along_curve_mm", .. })
        ));
        let result = CurveSampler::sample(&curve, &SamplingParameters::new(1.0, 10.0, f64::NAN));
        assert!(result.is_err());
    }

    #[test]
    fn tiny_spacing_is_rejected_without_overflow() {
        let curve = Curve::open(vec![DVec3::ZERO, DVec3::new(10.0, 0.0, 0.0)]);
        let result = CurveSampler::sample(&curve, &SamplingParameters::new(1e-300, 10.0, 10.0));
        assert!(matches!(
            result,
            Err(PanoramaError::InvalidParameter { name: "spacing_along_curve_mm", .. })
        ));
        assert!(frame_count(10.0, f64::MIN_POSITIVE).is_err());
        assert_eq!(frame_count(10.0, 1.0).unwrap(), 11);
        assert_eq!(frame_count(0.5, 1.0).unwrap(), 1);
    }

    #[test]
    fn closed_curve_wraps_seamlessly() {
        // Tilted ellipse so the loop carries a non-trivial frame rotation.
        let points: Vec<DVec3> = (0..10)
            .map(|i| {
                let angle = 2.0 * PI * i as f64 / 10.0;
                DVec3::new(8.0 * angle.cos(), 4.0 * angle.sin(), 3.0 * (2.0 * angle).sin())
            })
            .collect();
        let curve = Curve::closed(points);
        let length = curve.length().unwrap();
        let spacing = length / 3.0;
        let frames = CurveSampler::sample(&curve, &SamplingParameters::new(spacing, 10.0, 10.0)).unwrap();

        assert_eq!(frames.len(), 4);
        let (first, last) = (frames[0], frames[3]);
        assert_relative_eq!(last.arc_length, length, epsilon = 1e-6);
        assert_eq!(last.center, first.center);
        assert_eq!(last.tangent, first.tangent);
        assert_eq!(last.height_axis, first.height_axis);
        for frame in &frames {
            assert_orthonormal(frame);
        }
    }

    #[test]
    fn closed_curve_seam_is_continuous() {
        let points: Vec<DVec3> = (0..8)
            .map(|i| {
                let angle = 2.0 * PI * i as f64 / 8.0;
                DVec3::new(10.0 * angle.cos(), 10.0 * angle.sin(), 2.0 * (3.0 * angle).cos())
            })
            .collect();
        let curve = Curve::closed(points);
        let length = curve.length().unwrap();
        let frames =
            CurveSampler::sample(&curve, &SamplingParameters::new(length / 200.0, 10.0, 10.0)).unwrap();
        let before_seam = frames[frames.len() - 2];
        let first = frames[0];
        assert!(before_seam.tangent.angle_between(first.tangent) < 0.1);
        assert!(before_seam.height_axis.angle_between(first.height_axis) < 0.1);
    }
}
