use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::PanoramaError;
use crate::volume::{SharedVolume, Voxel};

/// Brightness/contrast mapping used when a volume is displayed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowLevel {
    pub window: f64,
    pub level: f64,
}

impl Default for WindowLevel {
    fn default() -> Self {
        Self {
            window: 65535.0,
            level: 32767.5,
        }
    }
}

impl WindowLevel {
    pub fn new(window: f64, level: f64) -> Self {
        Self { window, level }
    }

    /// Window spanning `[min, max]`.
    pub fn from_range(min: f64, max: f64) -> Self {
        Self {
            window: (max - min).abs(),
            level: (min + max) * 0.5,
        }
    }

    pub fn lower(&self) -> f64 {
        self.level - self.window * 0.5
    }

    pub fn upper(&self) -> f64 {
        self.level + self.window * 0.5
    }

    /// Linear ramp from the lower to the upper bound of the window, clamped.
    /// A zero-width window thresholds at the level.
    #[inline]
    pub fn map_to_u8(&self, value: f32) -> u8 {
        let value = value as f64;
        if self.window <= f64::EPSILON {
            return if value >= self.level { 255 } else { 0 };
        }
        (((value - self.lower()) / self.window) * 255.0)
            .round()
            .clamp(0.0, 255.0) as u8
    }
}

/// One-way forwarding of the source volume's window/level to a derived volume.
pub struct WindowLevelSync<T: Voxel> {
    source: SharedVolume<T>,
    target: SharedVolume<T>,
}

impl<T: Voxel> WindowLevelSync<T> {
    /// Binds `source` to `target` and copies the current values once.
    pub fn new(source: SharedVolume<T>, target: SharedVolume<T>) -> Result<Self, PanoramaError> {
        let sync = Self { source, target };
        sync.synchronize()?;
        Ok(sync)
    }

    pub fn synchronize(&self) -> Result<WindowLevel, PanoramaError> {
        let window_level = self
            .source
            .read()
            .map_err(|_| PanoramaError::LockPoisoned)?
            .window_level;
        let mut target = self.target.write().map_err(|_| PanoramaError::LockPoisoned)?;
        target.window_level = window_level;
        debug!(
            "window/level {:.1}/{:.1} forwarded to {}",
            window_level.window, window_level.level, target.id
        );
        Ok(window_level)
    }

    pub fn source(&self) -> &SharedVolume<T> {
        &self.source
    }

    pub fn target(&self) -> &SharedVolume<T> {
        &self.target
    }
}
