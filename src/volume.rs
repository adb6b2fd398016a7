use std::fmt;
use std::sync::{Arc, RwLock};

use glam::{DMat3, DVec3};
use image::{GrayImage, ImageBuffer};
use ndarray::{Array3, ArrayView2, s};
use rayon::prelude::*;

use crate::enums::{Background, Interpolation, NodeId, Orientation, ViewTag};
use crate::interpolator::Interpolator;
use crate::window_level::WindowLevel;

/// Scalar type a volume can hold.
pub trait Voxel: Copy + Default + fmt::Debug + Send + Sync + 'static {
    /// Smallest representable value, used as the default background.
    const MIN: Self;

    fn to_f32(self) -> f32;

    /// Converts an interpolated value back, rounding and saturating for
    /// integer types.
    fn from_f32(value: f32) -> Self;
}

macro_rules! impl_integer_voxel {
    ($($t:ty),*) => {
        $(
            impl Voxel for $t {
                const MIN: Self = <$t>::MIN;

                #[inline]
                fn to_f32(self) -> f32 {
                    self as f32
                }

                #[inline]
                fn from_f32(value: f32) -> Self {
                    value.round() as $t
                }
            }
        )*
    };
}

impl_integer_voxel!(u8, i16, u16);

impl Voxel for f32 {
    const MIN: Self = f32::MIN;

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        value
    }
}

impl Background {
    pub fn resolve<T: Voxel>(&self) -> T {
        match self {
            Background::TypeMinimum => T::MIN,
            Background::Value(value) => T::from_f32(*value as f32),
        }
    }
}

/// A volume shared between the pipeline and whatever displays it. The `Arc`
/// is the volume's identity: recomputation writes through the lock, so every
/// holder keeps seeing the same volume.
pub type SharedVolume<T> = Arc<RwLock<Volume<T>>>;

/// Affine map from world coordinates to continuous (x, y, z) voxel indices.
#[derive(Clone, Copy, Debug)]
pub struct WorldToIndex {
    linear: DMat3,
    origin: DVec3,
}

impl WorldToIndex {
    #[inline]
    pub fn transform_point(&self, world: DVec3) -> DVec3 {
        self.linear * (world - self.origin)
    }

    /// Maps a world-space displacement (no translation).
    #[inline]
    pub fn transform_vector(&self, world: DVec3) -> DVec3 {
        self.linear * world
    }
}

#[derive(Clone, Debug)]
pub struct Volume<T: Voxel = u16> {
    pub id: NodeId,
    /// Voxels laid out (z, y, x).
    pub data: Array3<T>,
    /// Voxel size along x, y, z in mm.
    pub spacing: DVec3,
    /// World position of voxel (0, 0, 0).
    pub origin: DVec3,
    /// Columns are the world directions of the x, y, z index axes.
    pub direction: DMat3,
    pub window_level: WindowLevel,
}

impl<T: Voxel> Volume<T> {
    pub fn new(id: NodeId, data: Array3<T>, spacing: DVec3) -> Self {
        let mut volume = Self {
            id,
            data,
            spacing,
            origin: DVec3::ZERO,
            direction: DMat3::IDENTITY,
            window_level: WindowLevel::default(),
        };
        if let Some((min, max)) = volume.value_range() {
            volume.window_level = WindowLevel::from_range(min as f64, max as f64);
        }
        volume
    }

    pub fn with_origin(mut self, origin: DVec3) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_direction(mut self, direction: DMat3) -> Self {
        self.direction = direction;
        self
    }

    pub fn into_shared(self) -> SharedVolume<T> {
        Arc::new(RwLock::new(self))
    }

    /// Same geometry and display settings, no voxels.
    pub fn clone_without_data(&self, id: NodeId) -> Self {
        Self {
            id,
            data: Array3::default((0, 0, 0)),
            spacing: self.spacing,
            origin: self.origin,
            direction: self.direction,
            window_level: self.window_level,
        }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<T> {
        &self.data
    }

    /// Get a mutable reference to the underlying data
    pub fn data_mut(&mut self) -> &mut Array3<T> {
        &mut self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn value_range(&self) -> Option<(f32, f32)> {
        self.data
            .par_iter()
            .map(|v| {
                let v = v.to_f32();
                (v, v)
            })
            .reduce_with(|a, b| (a.0.min(b.0), a.1.max(b.1)))
    }

    pub fn index_to_world(&self, index: DVec3) -> DVec3 {
        self.origin + self.direction * (index * self.spacing)
    }

    /// Inverse of [`Volume::index_to_world`]; `None` when the spacing or
    /// direction make the mapping singular.
    pub fn world_to_index(&self) -> Option<WorldToIndex> {
        let scaled = self.direction * DMat3::from_diagonal(self.spacing);
        let det = scaled.determinant();
        if !det.is_finite() || det.abs() <= f64::EPSILON {
            return None;
        }
        Some(WorldToIndex {
            linear: scaled.inverse(),
            origin: self.origin,
        })
    }

    /// Sample at a world point, `background` outside the grid.
    pub fn sample_world(
        &self,
        world: DVec3,
        interpolation: Interpolation,
        background: Background,
    ) -> T {
        let Some(world_to_index) = self.world_to_index() else {
            return background.resolve();
        };
        let index = world_to_index.transform_point(world);
        let view = self.data.view();
        let value = match interpolation {
            Interpolation::Trilinear => Interpolator::trilinear_interpolate(&view, index),
            Interpolation::Nearest => Interpolator::nearest_interpolate(&view, index),
        };
        value.map_or_else(|| background.resolve(), T::from_f32)
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: &Orientation,
    ) -> Option<ArrayView2<'_, T>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        let slice_result = match orientation {
            Orientation::Axial => self.data().slice(s![index, .., ..]),
            Orientation::Coronal => self.data().slice(s![.., index, ..]),
            Orientation::Sagittal => self.data().slice(s![.., .., index]),
        };
        Some(slice_result)
    }

    /// 8-bit image of a slice, mapped through the volume's window/level.
    pub fn get_image_from_axis(&self, index: usize, orientation: Orientation) -> Option<GrayImage> {
        let slice = self.get_slice_from_axis(index, &orientation)?;
        self.slice_to_image(&slice)
    }

    /// Image for one of the view slots.
    ///
    /// On a straightened volume the front view puts arc length on the
    /// horizontal axis and height on the vertical one; the lateral view shows
    /// the depth by height cross-section at arc index `index`. Both panoramic
    /// views put the top of the slab (largest height index) in the first row.
    pub fn panoramic_image(&self, view: ViewTag, index: usize) -> Option<GrayImage> {
        let orientation = view.slice_orientation();
        let slice = self.get_slice_from_axis(index, &orientation)?;
        let slice = match view {
            ViewTag::PanoramaFront => slice.reversed_axes().slice_move(s![..;-1, ..]),
            ViewTag::PanoramaLateral => slice.slice_move(s![..;-1, ..]),
            _ => slice,
        };
        self.slice_to_image(&slice)
    }

    fn slice_to_image(&self, slice: &ArrayView2<'_, T>) -> Option<GrayImage> {
        let (height, width) = slice.dim();
        let window_level = self.window_level;
        // Logical order, so transposed views come out row by row as well.
        let values: Vec<T> = slice.iter().copied().collect();
        let pixel_data: Vec<u8> = values
            .into_par_iter()
            .map(|v| window_level.map_to_u8(v.to_f32()))
            .collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
    }

    fn is_valid_index(&self, index: usize, orientation: &Orientation) -> bool {
        let dim = self.data.dim();
        let max_index = match orientation {
            Orientation::Axial => dim.0,
            Orientation::Coronal => dim.1,
            Orientation::Sagittal => dim.2,
        };
        index < max_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp_volume() -> Volume<u16> {
        let data = Array3::from_shape_fn((4, 3, 2), |(z, y, x)| (x + 10 * y + 100 * z) as u16);
        Volume::new(NodeId::new("ramp"), data, DVec3::new(0.5, 1.0, 2.0))
            .with_origin(DVec3::new(10.0, 20.0, 30.0))
    }

    #[test]
    fn new_sets_window_from_data_range() {
        let volume = ramp_volume();
        assert_eq!(volume.window_level, WindowLevel::from_range(0.0, 321.0));
    }

    #[test]
    fn world_index_round_trip() {
        let volume = ramp_volume().with_direction(DMat3::from_cols(
            DVec3::Y,
            DVec3::NEG_X,
            DVec3::Z,
        ));
        let index = DVec3::new(1.0, 2.0, 3.0);
        let world = volume.index_to_world(index);
        let back = volume.world_to_index().unwrap().transform_point(world);
        assert_relative_eq!(back.x, index.x, epsilon = 1e-12);
        assert_relative_eq!(back.y, index.y, epsilon = 1e-12);
        assert_relative_eq!(back.z, index.z, epsilon = 1e-12);
    }

    #[test]
    fn zero_spacing_has_no_inverse() {
        let mut volume = ramp_volume();
        volume.spacing = DVec3::new(1.0, 0.0, 1.0);
        assert!(volume.world_to_index().is_none());
    }

    #[test]
    fn sample_world_hits_voxel_values() {
        let volume = ramp_volume();
        let world = volume.index_to_world(DVec3::new(1.0, 2.0, 3.0));
        let value = volume.sample_world(world, Interpolation::Trilinear, Background::TypeMinimum);
        assert_eq!(value, 321);
    }

    #[test]
    fn sample_world_outside_is_background() {
        let volume = ramp_volume();
        let value =
            volume.sample_world(DVec3::splat(-100.0), Interpolation::Trilinear, Background::Value(7.0));
        assert_eq!(value, 7);
        let value = volume.sample_world(DVec3::splat(-100.0), Interpolation::Nearest, Background::TypeMinimum);
        assert_eq!(value, 0);
    }

    #[test]
    fn integer_conversion_rounds_and_saturates() {
        assert_eq!(u8::from_f32(300.0), 255);
        assert_eq!(u8::from_f32(-4.0), 0);
        assert_eq!(i16::from_f32(-2.6), -3);
        assert_eq!(<i16 as Voxel>::MIN, i16::MIN);
    }

    #[test]
    fn clone_without_data_keeps_geometry() {
        let volume = ramp_volume();
        let clone = volume.clone_without_data(NodeId::new("clone"));
        assert!(clone.is_empty());
        assert_eq!(clone.spacing, volume.spacing);
        assert_eq!(clone.origin, volume.origin);
        assert_eq!(clone.window_level, volume.window_level);
    }

    #[test]
    fn slice_index_is_checked() {
        let volume = ramp_volume();
        assert!(volume.get_slice_from_axis(3, &Orientation::Axial).is_some());
        assert!(volume.get_slice_from_axis(4, &Orientation::Axial).is_none());
        assert!(volume.get_slice_from_axis(2, &Orientation::Sagittal).is_none());
    }

    #[test]
    fn panoramas_are_upright() {
        let mut volume = ramp_volume();
        volume.window_level = WindowLevel::from_range(0.0, 255.0);
        let image = volume.panoramic_image(ViewTag::PanoramaFront, 1).unwrap();
        // (z, y) slice at x = 1, transposed: width = z extent, height = y extent
        assert_eq!(image.dimensions(), (4, 3));
        assert_eq!(image.get_pixel(2, 1).0[0], 211);
        // largest y on top
        assert_eq!(image.get_pixel(2, 0).0[0], 221);
        assert_eq!(image.get_pixel(0, 2).0[0], 1);

        let lateral = volume.panoramic_image(ViewTag::PanoramaLateral, 0).unwrap();
        assert_eq!(lateral.dimensions(), (2, 3));
        assert_eq!(lateral.get_pixel(0, 0).0[0], 20);
        assert_eq!(lateral.get_pixel(1, 2).0[0], 1);
    }
}
