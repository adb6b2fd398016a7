//! Panorama settings.
//!
//! Defaults and ranges are those of the panorama panel sliders. Settings are
//! stored as TOML.

use std::path::Path;

use glam::DVec3;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::curve_sampler::SamplingParameters;
use crate::enums::{Background, Interpolation};
use crate::error::ConfigError;
use crate::straightener::Straightener;

/// Sampling distance along the curve (mm).
pub const CURVE_RESOLUTION_MM: f64 = 0.5;
pub const CURVE_RESOLUTION_RANGE: (f64, f64) = (0.1, 10.0);
/// Pixel size of the panorama image (mm).
pub const SLICE_RESOLUTION_MM: f64 = 0.5;
pub const SLICE_RESOLUTION_RANGE: (f64, f64) = (0.1, 10.0);
/// Height of the panorama image (mm).
pub const PANORAMA_HEIGHT_MM: f64 = 80.0;
pub const PANORAMA_HEIGHT_RANGE: (f64, f64) = (10.0, 200.0);
/// Depth of the panorama slab (mm).
pub const PANORAMA_DEPTH_MM: f64 = 40.0;
pub const PANORAMA_DEPTH_RANGE: (f64, f64) = (10.0, 100.0);

/// Name given to the straightened volume.
pub const STRAIGHTENED_VOLUME_NAME: &str = "PanoramicStraightenedVolume";
/// Name given to the straightening transform.
pub const STRAIGHTENING_TRANSFORM_NAME: &str = "Straightening transform";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanoramaSettings {
    pub curve_resolution_mm: f64,
    pub slice_resolution_mm: f64,
    pub panorama_height_mm: f64,
    pub panorama_depth_mm: f64,
    pub interpolation: Interpolation,
    /// Straighten arc slices on the rayon pool.
    pub parallel: bool,
    /// Preferred world direction of the panorama's vertical axis.
    pub up: [f64; 3],
    // Last, as a `Value` background serializes to a TOML table.
    pub background: Background,
}

impl Default for PanoramaSettings {
    fn default() -> Self {
        Self {
            curve_resolution_mm: CURVE_RESOLUTION_MM,
            slice_resolution_mm: SLICE_RESOLUTION_MM,
            panorama_height_mm: PANORAMA_HEIGHT_MM,
            panorama_depth_mm: PANORAMA_DEPTH_MM,
            interpolation: Interpolation::default(),
            parallel: true,
            up: [0.0, 0.0, 1.0],
            background: Background::default(),
        }
    }
}

impl PanoramaSettings {
    /// Loads settings from a TOML file, falling back to defaults when the
    /// file is missing or invalid.
    pub fn load_from_file(path: &Path) -> Self {
        match Self::load_strict(path) {
            Ok(settings) => {
                info!("Panorama settings loaded from {}", path.display());
                settings
            }
            Err(ConfigError::Io { .. }) => {
                info!("No panorama settings at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("Panorama settings invalid, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Loads and validates settings from a TOML file.
    pub fn load_strict(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Panorama settings saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        in_range("curve_resolution_mm", self.curve_resolution_mm, CURVE_RESOLUTION_RANGE)?;
        in_range("slice_resolution_mm", self.slice_resolution_mm, SLICE_RESOLUTION_RANGE)?;
        in_range("panorama_height_mm", self.panorama_height_mm, PANORAMA_HEIGHT_RANGE)?;
        in_range("panorama_depth_mm", self.panorama_depth_mm, PANORAMA_DEPTH_RANGE)?;
        let up = DVec3::from_array(self.up);
        if !up.is_finite() || up.length_squared() <= f64::EPSILON {
            return Err(ConfigError::InvalidDirection {
                name: "up",
                value: self.up,
            });
        }
        Ok(())
    }

    pub fn sampling_parameters(&self) -> SamplingParameters {
        SamplingParameters::new(
            self.curve_resolution_mm,
            self.panorama_depth_mm,
            self.panorama_height_mm,
        )
        .with_up(DVec3::from_array(self.up))
    }

    /// Spacing of the straightened volume along (depth, height, arc).
    pub fn output_spacing(&self) -> DVec3 {
        DVec3::new(
            self.slice_resolution_mm,
            self.slice_resolution_mm,
            self.curve_resolution_mm,
        )
    }

    pub fn straightener(&self) -> Straightener {
        Straightener::new(self.slice_resolution_mm)
            .with_interpolation(self.interpolation)
            .with_background(self.background)
            .with_parallel(self.parallel)
    }
}

fn in_range(name: &'static str, value: f64, (min, max): (f64, f64)) -> Result<(), ConfigError> {
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}
