use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

/// Named view slots a volume can be bound to for display.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewTag {
    Axial,
    Coronal,
    Sagittal,
    PanoramaFront,
    PanoramaLateral,
}

impl ViewTag {
    pub fn main_view_tags() -> [ViewTag; 3] {
        [ViewTag::Axial, ViewTag::Coronal, ViewTag::Sagittal]
    }

    pub fn panoramic_view_tags() -> [ViewTag; 2] {
        [ViewTag::PanoramaFront, ViewTag::PanoramaLateral]
    }

    /// Name of the view slot in the host layout.
    pub fn slot_name(&self) -> &'static str {
        match self {
            ViewTag::Axial => "Red",
            ViewTag::Sagittal => "Yellow",
            ViewTag::Coronal => "Green",
            ViewTag::PanoramaFront => "PanoramaFront",
            ViewTag::PanoramaLateral => "PanoramaLateral",
        }
    }

    /// Array axis a view cuts through.
    ///
    /// A straightened volume is laid out (arc, height, depth), so the front
    /// panorama is a fixed-depth cut and the lateral one a fixed-arc cut.
    pub fn slice_orientation(&self) -> Orientation {
        match self {
            ViewTag::Axial | ViewTag::PanoramaLateral => Orientation::Axial,
            ViewTag::Coronal => Orientation::Coronal,
            ViewTag::Sagittal | ViewTag::PanoramaFront => Orientation::Sagittal,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Nearest,
    #[default]
    Trilinear,
}

/// Value written where a query point falls outside the source volume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Background {
    /// Smallest value representable by the voxel type.
    #[default]
    TypeMinimum,
    Value(f64),
}

/// Spline used to interpolate the curve control points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplineKind {
    Linear,
    /// Kochanek-Bartels spline with zero continuity, which keeps it C1.
    /// `tension = bias = 0` is a Catmull-Rom spline.
    Kochanek { tension: f64, bias: f64 },
}

impl Default for SplineKind {
    fn default() -> Self {
        SplineKind::Kochanek {
            tension: 0.0,
            bias: 0.0,
        }
    }
}

/// Identifier under which a volume or transform is known to the host.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
