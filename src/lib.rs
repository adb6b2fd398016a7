//! # CPR-volume library
//!
//! Curved planar reformation for volumetric images. A curve drawn through a
//! volume (a dental arch, a vessel centerline) is sampled into a sequence of
//! rotation-minimizing frames, and the volume is resampled slab by slab along
//! those frames into a "straightened" volume. Slicing the straightened
//! volume gives the panoramic views:
//!  - Front: height against arc length, at a chosen depth
//!  - Lateral: height against depth, at a chosen arc position
//!
//! Control points are interpolated with a Kochanek spline (Catmull-Rom by
//! default) and the curve may be open or closed. Slabs are resampled in
//! parallel using rayon, with trilinear or nearest-neighbour interpolation.
//! The straightened volume follows the window/level of its source.
//!
//! [`Panorama`] keeps the source volume, the reusable transform and the
//! straightened volume together and binds them to the host's views.
//!
//! # Examples
//!
//! ## Straightening along an arch
//!
//! Straighten a volume along a three-point curve and save the front view at
//! the center of the slab.
//!
//! ```no_run
//! # use cpr_volume::{Curve, NodeId, SamplingParameters, Straightener, StraighteningTransform, Volume, ViewTag};
//! # use glam::DVec3;
//! # use ndarray::Array3;
//! let source = Volume::new(NodeId::new("ct"), Array3::<u16>::zeros((100, 100, 100)), DVec3::ONE);
//! let curve = Curve::open(vec![
//!     DVec3::new(20.0, 30.0, 50.0),
//!     DVec3::new(50.0, 70.0, 50.0),
//!     DVec3::new(80.0, 30.0, 50.0),
//! ]);
//!
//! let mut transform = StraighteningTransform::new(NodeId::new("transform"));
//! transform
//!     .compute(&curve, &SamplingParameters::default())
//!     .expect("curve should not be degenerate");
//!
//! let mut straightened = source.clone_without_data(NodeId::new("panorama"));
//! Straightener::new(0.5)
//!     .straighten(&source, &transform, &mut straightened)
//!     .expect("source should be straightenable");
//!
//! let image = straightened
//!     .panoramic_image(ViewTag::PanoramaFront, straightened.dim().2 / 2)
//!     .expect("should have returned the front view");
//! image.save("panorama.png");
//! ```

pub mod config;
pub mod curve;
pub mod curve_sampler;
pub mod enums;
pub mod error;
mod interpolator;
pub mod panorama;
pub mod straightener;
pub mod volume;
pub mod window_level;

pub use config::PanoramaSettings;
pub use curve::Curve;
pub use curve_sampler::{CurveSampler, SampledFrame, SamplingParameters};
pub use enums::{Background, Interpolation, NodeId, Orientation, SplineKind, ViewTag};
pub use error::{ConfigError, PanoramaError};
pub use panorama::{DisplayBinding, NodeResolver, Panorama, PanoramaState};
pub use straightener::{SharedTransform, Straightener, StraighteningTransform};
pub use volume::{SharedVolume, Volume, Voxel};
pub use window_level::{WindowLevel, WindowLevelSync};
