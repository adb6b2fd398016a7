//! Resampling of a source volume along a curve into a straightened volume.
//!
//! The straightened volume is laid out (arc, height, depth): slice `k` is the
//! cross-section through frame `k`, row `j` runs along the frame's height
//! axis and column `i` along its depth axis.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use glam::{DMat3, DVec3};
use log::{debug, info, warn};
use ndarray::{Array3, ArrayView3, ArrayViewMut2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::curve::Curve;
use crate::curve_sampler::{CurveSampler, SampledFrame, SamplingParameters, positive};
use crate::enums::{Background, Interpolation, NodeId, SplineKind};
use crate::error::PanoramaError;
use crate::interpolator::Interpolator;
use crate::volume::{Volume, Voxel, WorldToIndex};

pub type SharedTransform = Arc<RwLock<StraighteningTransform>>;

/// What a transform was computed from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct CurveKey {
    points: Vec<DVec3>,
    closed: bool,
    spline: SplineKind,
}

impl CurveKey {
    fn of(curve: &Curve) -> Self {
        Self {
            points: curve.points().to_vec(),
            closed: curve.is_closed(),
            spline: curve.spline(),
        }
    }
}

/// Lookup from straightened-volume indices to world-space sample points.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StraighteningTransform {
    pub id: NodeId,
    frames: Vec<SampledFrame>,
    parameters: SamplingParameters,
    curve: Option<CurveKey>,
}

/// Shape and placement of the straightened volume.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutputGeometry {
    /// (arc, height, depth) sample counts.
    pub dim: (usize, usize, usize),
    pub spacing: DVec3,
    pub origin: DVec3,
}

impl StraighteningTransform {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            frames: Vec::new(),
            parameters: SamplingParameters::default(),
            curve: None,
        }
    }

    pub fn into_shared(self) -> SharedTransform {
        Arc::new(RwLock::new(self))
    }

    /// Samples `curve` unless the stored frames were already computed from
    /// the same curve and parameters. Returns whether frames were rebuilt.
    ///
    /// On error the previous frames are kept.
    pub fn compute(
        &mut self,
        curve: &Curve,
        parameters: &SamplingParameters,
    ) -> Result<bool, PanoramaError> {
        if self.is_current_for(curve, parameters) {
            debug!("transform {} is up to date, reusing frames", self.id);
            return Ok(false);
        }
        let frames = CurveSampler::sample(curve, parameters)?;
        self.frames = frames;
        self.parameters = *parameters;
        self.curve = Some(CurveKey::of(curve));
        Ok(true)
    }

    pub fn is_current_for(&self, curve: &Curve, parameters: &SamplingParameters) -> bool {
        !self.frames.is_empty()
            && self.parameters == *parameters
            && self.curve.as_ref() == Some(&CurveKey::of(curve))
    }

    pub fn frames(&self) -> &[SampledFrame] {
        &self.frames
    }

    pub fn parameters(&self) -> &SamplingParameters {
        &self.parameters
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn output_geometry(&self, slice_resolution_mm: f64) -> OutputGeometry {
        let steps = |extent: f64| ((extent / slice_resolution_mm).round() as usize).max(1);
        OutputGeometry {
            dim: (
                self.frames.len(),
                steps(self.parameters.slab_height_mm),
                steps(self.parameters.slab_depth_mm),
            ),
            spacing: DVec3::new(
                slice_resolution_mm,
                slice_resolution_mm,
                self.parameters.spacing_along_curve_mm,
            ),
            origin: DVec3::new(
                -self.parameters.slab_depth_mm * 0.5,
                -self.parameters.slab_height_mm * 0.5,
                0.0,
            ),
        }
    }

    /// World point sampled for output voxel (depth `i`, height `j`, arc `k`).
    pub fn world_point(&self, i: usize, j: usize, k: usize, slice_resolution_mm: f64) -> Option<DVec3> {
        let frame = self.frames.get(k)?;
        Some(frame.point(
            i as f64 * slice_resolution_mm - self.parameters.slab_depth_mm * 0.5,
            j as f64 * slice_resolution_mm - self.parameters.slab_height_mm * 0.5,
        ))
    }
}

type SampleFn<T> = fn(&ArrayView3<'_, T>, DVec3) -> Option<f32>;

pub struct Straightener {
    slice_resolution_mm: f64,
    interpolation: Interpolation,
    background: Background,
    parallel: bool,
    cancel: Option<Arc<AtomicBool>>,
}

impl Straightener {
    pub fn new(slice_resolution_mm: f64) -> Self {
        Self {
            slice_resolution_mm,
            interpolation: Interpolation::default(),
            background: Background::default(),
            parallel: true,
            cancel: None,
        }
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn with_background(mut self, background: Background) -> Self {
        self.background = background;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Flag polled before each arc slice; once set, straightening stops with
    /// `Cancelled` and the output is left as it was.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn slice_resolution_mm(&self) -> f64 {
        self.slice_resolution_mm
    }

    /// Fill `output` with `source` resampled along `transform`.
    ///
    /// `output` keeps its identity; its voxels and geometry are replaced.
    ///
    /// # Errors
    ///
    /// `IncompatibleVolume` for an empty source or a singular geometry,
    /// `DegenerateCurve` for a transform without frames, `InvalidParameter`
    /// for a non-positive resolution and `Cancelled`. The output is only
    /// written once resampling has fully succeeded.
    pub fn straighten<T: Voxel>(
        &self,
        source: &Volume<T>,
        transform: &StraighteningTransform,
        output: &mut Volume<T>,
    ) -> Result<(), PanoramaError> {
        positive("slice_resolution_mm", self.slice_resolution_mm)?;
        let world_to_index = Self::validate_source(source)?;
        if transform.is_empty() {
            return Err(PanoramaError::DegenerateCurve(format!(
                "transform {} has no frames",
                transform.id
            )));
        }

        let started = Instant::now();
        let geometry = transform.output_geometry(self.slice_resolution_mm);
        let background: T = self.background.resolve();
        let mut straightened = Array3::from_elem(geometry.dim, background);

        let sample: SampleFn<T> = match self.interpolation {
            Interpolation::Trilinear => Interpolator::trilinear_interpolate::<T>,
            Interpolation::Nearest => Interpolator::nearest_interpolate::<T>,
        };
        let source_view = source.data.view();
        let slab = SlabSampler {
            source: &source_view,
            world_to_index,
            sample,
            resolution: self.slice_resolution_mm,
            half_depth: transform.parameters.slab_depth_mm * 0.5,
            half_height: transform.parameters.slab_height_mm * 0.5,
        };

        let cancelled = || {
            self.cancel
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::Relaxed))
        };
        let fill = |k: usize, slice: ArrayViewMut2<'_, T>| {
            if !cancelled() {
                slab.fill_slice(&transform.frames[k], slice);
            }
        };
        if self.parallel {
            straightened
                .axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(k, slice)| fill(k, slice));
        } else {
            straightened
                .axis_iter_mut(Axis(0))
                .enumerate()
                .for_each(|(k, slice)| fill(k, slice));
        }

        if cancelled() {
            warn!("straightening into {} cancelled", output.id);
            return Err(PanoramaError::Cancelled);
        }

        output.data = straightened;
        output.spacing = geometry.spacing;
        output.origin = geometry.origin;
        output.direction = DMat3::IDENTITY;

        info!(
            "straightened {} into {} {:?} in {:.1} ms",
            source.id,
            output.id,
            geometry.dim,
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(())
    }

    fn validate_source<T: Voxel>(source: &Volume<T>) -> Result<WorldToIndex, PanoramaError> {
        let (depth, height, width) = source.dim();
        if depth == 0 || height == 0 || width == 0 {
            return Err(PanoramaError::IncompatibleVolume(format!(
                "{} has dimensions {:?}",
                source.id,
                source.dim()
            )));
        }
        let spacing = source.spacing;
        if !spacing.is_finite() || spacing.min_element() <= 0.0 {
            return Err(PanoramaError::IncompatibleVolume(format!(
                "{} has spacing {:?}",
                source.id, spacing
            )));
        }
        source.world_to_index().ok_or_else(|| {
            PanoramaError::IncompatibleVolume(format!("{} has a singular direction matrix", source.id))
        })
    }
}

/// Per-call sampling state shared by all arc slices.
struct SlabSampler<'a, 'b, T: Voxel> {
    source: &'a ArrayView3<'b, T>,
    world_to_index: WorldToIndex,
    sample: SampleFn<T>,
    resolution: f64,
    half_depth: f64,
    half_height: f64,
}

impl<T: Voxel> SlabSampler<'_, '_, T> {
    /// The source index is affine in (i, j) within a slice, so only the
    /// corner and the two step vectors are mapped; the loops just add.
    fn fill_slice(&self, frame: &SampledFrame, mut slice: ArrayViewMut2<'_, T>) {
        let corner = self
            .world_to_index
            .transform_point(frame.point(-self.half_depth, -self.half_height));
        let depth_step = self
            .world_to_index
            .transform_vector(frame.depth_axis * self.resolution);
        let height_step = self
            .world_to_index
            .transform_vector(frame.height_axis * self.resolution);

        for (j, mut row) in slice.outer_iter_mut().enumerate() {
            let row_start = corner + height_step * j as f64;
            for (i, voxel) in row.iter_mut().enumerate() {
                let index = row_start + depth_step * i as f64;
                if let Some(value) = (self.sample)(self.source, index) {
                    *voxel = T::from_f32(value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn uniform_volume(value: u16) -> Volume<u16> {
        // 1 mm voxels covering [-50, 50] x [-50, 50] x [-10, 110]
        Volume::new(NodeId::new("uniform"), Array3::from_elem((121, 101, 101), value), DVec3::ONE)
            .with_origin(DVec3::new(-50.0, -50.0, -10.0))
    }

    fn ramp(point: DVec3) -> f32 {
        (point.x + 2.0 * point.y + 3.0 * point.z + 500.0) as f32
    }

    fn ramp_volume() -> Volume<f32> {
        let origin = DVec3::new(-40.0, -40.0, -40.0);
        let spacing = DVec3::new(1.0, 0.5, 2.0);
        let data = Array3::from_shape_fn((41, 161, 81), |(z, y, x)| {
            ramp(origin + DVec3::new(x as f64, y as f64, z as f64) * spacing)
        });
        Volume::new(NodeId::new("ramp"), data, spacing).with_origin(origin)
    }

    fn line_transform() -> StraighteningTransform {
        let mut transform = StraighteningTransform::new(NodeId::new("transform"));
        let curve = Curve::open(vec![DVec3::ZERO, DVec3::new(0.0, 0.0, 100.0)]);
        transform
            .compute(&curve, &SamplingParameters::new(1.0, 10.0, 10.0))
            .unwrap();
        transform
    }

    fn empty_output() -> Volume<u16> {
        Volume::new(NodeId::new("output"), Array3::zeros((0, 0, 0)), DVec3::ONE)
    }

    #[test]
    fn straight_line_through_uniform_volume() {
        let source = uniform_volume(42);
        let transform = line_transform();
        let mut output = empty_output();
        Straightener::new(1.0)
            .straighten(&source, &transform, &mut output)
            .unwrap();

        assert_eq!(output.dim(), (101, 10, 10));
        assert!(output.data.iter().all(|&v| v == 42));
        assert_eq!(output.spacing, DVec3::new(1.0, 1.0, 1.0));
        assert_eq!(output.origin, DVec3::new(-5.0, -5.0, 0.0));
        assert_eq!(output.id, NodeId::new("output"));
    }

    #[test]
    fn samples_outside_source_are_background() {
        let mut source = uniform_volume(42);
        // only the lower half of the line lies inside now
        source.origin = DVec3::new(-50.0, -50.0, -100.0);
        let transform = line_transform();
        let mut output = empty_output();
        Straightener::new(1.0)
            .with_background(Background::Value(7.0))
            .straighten(&source, &transform, &mut output)
            .unwrap();

        // source z extent is [-100, 20]
        assert!(output.data.slice(ndarray::s![..=20, .., ..]).iter().all(|&v| v == 42));
        assert!(output.data.slice(ndarray::s![21.., .., ..]).iter().all(|&v| v == 7));
    }

    #[test]
    fn default_background_is_type_minimum() {
        let source: Volume<i16> = Volume::new(
            NodeId::new("small"),
            Array3::from_elem((3, 3, 3), 5),
            DVec3::ONE,
        )
        .with_origin(DVec3::splat(500.0));
        let transform = line_transform();
        let mut output = Volume::new(NodeId::new("output"), Array3::zeros((0, 0, 0)), DVec3::ONE);
        Straightener::new(1.0)
            .straighten(&source, &transform, &mut output)
            .unwrap();
        assert!(output.data.iter().all(|&v| v == i16::MIN));
    }

    #[test]
    fn frame_centers_sample_source_values() {
        let source = ramp_volume();
        let curve = Curve::open(vec![
            DVec3::new(-20.0, -10.0, -20.0),
            DVec3::new(0.0, 5.0, -5.0),
            DVec3::new(15.0, -5.0, 10.0),
            DVec3::new(20.0, 10.0, 25.0),
        ]);
        let mut transform = StraighteningTransform::new(NodeId::new("transform"));
        transform
            .compute(&curve, &SamplingParameters::new(2.0, 10.0, 6.0))
            .unwrap();
        let mut output = Volume::new(NodeId::new("output"), Array3::zeros((0, 0, 0)), DVec3::ONE);
        Straightener::new(1.0)
            .straighten(&source, &transform, &mut output)
            .unwrap();

        assert_eq!(output.dim().1, 6);
        assert_eq!(output.dim().2, 10);
        for (k, frame) in transform.frames().iter().enumerate() {
            assert_relative_eq!(output.data[[k, 3, 5]], ramp(frame.center), epsilon = 1e-2);
            let corner = transform.world_point(0, 0, k, 1.0).unwrap();
            assert_relative_eq!(output.data[[k, 0, 0]], ramp(corner), epsilon = 1e-2);
        }
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let source = ramp_volume();
        let curve = Curve::open(vec![
            DVec3::new(-10.0, 0.0, 0.0),
            DVec3::new(0.0, 10.0, 5.0),
            DVec3::new(10.0, 0.0, 10.0),
        ]);
        let mut transform = StraighteningTransform::new(NodeId::new("transform"));
        transform
            .compute(&curve, &SamplingParameters::new(0.5, 8.0, 8.0))
            .unwrap();

        let empty = || Volume::new(NodeId::new("output"), Array3::<f32>::zeros((0, 0, 0)), DVec3::ONE);
        let mut parallel = empty();
        let mut sequential = empty();
        Straightener::new(0.5)
            .straighten(&source, &transform, &mut parallel)
            .unwrap();
        Straightener::new(0.5)
            .with_parallel(false)
            .straighten(&source, &transform, &mut sequential)
            .unwrap();
        assert_eq!(parallel.data, sequential.data);
    }

    #[test]
    fn nearest_interpolation_uses_voxel_values() {
        let source = ramp_volume();
        // offsets keep every query point away from a voxel midpoint
        let curve = Curve::open(vec![DVec3::new(0.25, 0.1, 0.3), DVec3::new(0.25, 0.1, 20.3)]);
        let mut transform = StraighteningTransform::new(NodeId::new("transform"));
        transform
            .compute(&curve, &SamplingParameters::new(1.0, 10.0, 10.0))
            .unwrap();
        let mut output = Volume::new(NodeId::new("output"), Array3::<f32>::zeros((0, 0, 0)), DVec3::ONE);
        Straightener::new(1.0)
            .with_interpolation(Interpolation::Nearest)
            .straighten(&source, &transform, &mut output)
            .unwrap();
        for ((k, j, i), value) in output.data.indexed_iter() {
            let world = transform.world_point(i, j, k, 1.0).unwrap();
            let expected = source.sample_world(world, Interpolation::Nearest, Background::TypeMinimum);
            assert_eq!(*value, expected);
        }
    }

    #[test]
    fn empty_source_is_incompatible_and_output_untouched() {
        let source = Volume::new(NodeId::new("empty"), Array3::<u16>::zeros((0, 4, 4)), DVec3::ONE);
        let mut output = Volume::new(NodeId::new("output"), Array3::from_elem((1, 1, 1), 3u16), DVec3::ONE);
        let result = Straightener::new(1.0).straighten(&source, &line_transform(), &mut output);
        assert!(matches!(result, Err(PanoramaError::IncompatibleVolume(_))));
        assert_eq!(output.data, Array3::from_elem((1, 1, 1), 3u16));
    }

    #[test]
    fn zero_spacing_is_incompatible() {
        let mut source = uniform_volume(1);
        source.spacing = DVec3::new(1.0, 0.0, 1.0);
        let result = Straightener::new(1.0).straighten(&source, &line_transform(), &mut empty_output());
        assert!(matches!(result, Err(PanoramaError::IncompatibleVolume(_))));
    }

    #[test]
    fn empty_transform_is_degenerate() {
        let transform = StraighteningTransform::new(NodeId::new("transform"));
        let result = Straightener::new(1.0).straighten(&uniform_volume(1), &transform, &mut empty_output());
        assert!(matches!(result, Err(PanoramaError::DegenerateCurve(_))));
    }

    #[test]
    fn cancelled_straightening_leaves_output() {
        let cancel = Arc::new(AtomicBool::new(true));
        let mut output = empty_output();
        let result = Straightener::new(1.0)
            .with_cancel_flag(cancel)
            .straighten(&uniform_volume(42), &line_transform(), &mut output);
        assert!(matches!(result, Err(PanoramaError::Cancelled)));
        assert!(output.is_empty());
    }

    #[test]
    fn transform_is_reused_until_curve_or_parameters_change() {
        let mut curve = Curve::open(vec![DVec3::ZERO, DVec3::new(0.0, 0.0, 20.0)]);
        let parameters = SamplingParameters::new(1.0, 10.0, 10.0);
        let mut transform = StraighteningTransform::new(NodeId::new("transform"));

        assert!(transform.compute(&curve, &parameters).unwrap());
        assert!(!transform.compute(&curve, &parameters).unwrap());
        assert_eq!(transform.frames().len(), 21);

        curve.push_point(DVec3::new(0.0, 0.0, 30.0));
        assert!(transform.compute(&curve, &parameters).unwrap());
        assert_eq!(transform.frames().len(), 31);

        let coarser = SamplingParameters::new(2.0, 10.0, 10.0);
        assert!(transform.compute(&curve, &coarser).unwrap());
        assert_eq!(transform.frames().len(), 16);
    }

    #[test]
    fn failed_compute_keeps_previous_frames() {
        let curve = Curve::open(vec![DVec3::ZERO, DVec3::new(0.0, 0.0, 20.0)]);
        let parameters = SamplingParameters::new(1.0, 10.0, 10.0);
        let mut transform = StraighteningTransform::new(NodeId::new("transform"));
        transform.compute(&curve, &parameters).unwrap();

        let degenerate = Curve::open(vec![DVec3::ZERO, DVec3::ZERO]);
        assert!(transform.compute(&degenerate, &parameters).is_err());
        assert_eq!(transform.frames().len(), 21);
    }

    #[test]
    fn output_dimensions_round_to_whole_steps() {
        let transform = line_transform();
        let geometry = transform.output_geometry(0.3);
        assert_eq!(geometry.dim, (101, 33, 33));
        assert_eq!(geometry.spacing, DVec3::new(0.3, 0.3, 1.0));
    }
}
