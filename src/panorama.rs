//! Panoramic view of a volume along a user-drawn curve.
//!
//! [`Panorama`] ties the pipeline together for a host viewer: it keeps the
//! source volume, one straightening transform and one straightened volume,
//! recomputes them when asked, and tells the host which volume belongs in
//! which view. The straightened volume is created on first use and then
//! rewritten in place, so anything the host bound to it stays valid.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{PanoramaSettings, STRAIGHTENED_VOLUME_NAME, STRAIGHTENING_TRANSFORM_NAME};
use crate::curve::Curve;
use crate::enums::{NodeId, ViewTag};
use crate::error::{ConfigError, PanoramaError};
use crate::straightener::{SharedTransform, StraighteningTransform};
use crate::volume::{SharedVolume, Voxel};
use crate::window_level::WindowLevelSync;

/// Binds volumes to the host's view slots.
pub trait DisplayBinding<T: Voxel> {
    /// Show `volume` in `view`; `None` clears the slot.
    fn show_volume(&mut self, volume: Option<&SharedVolume<T>>, view: ViewTag);
}

/// Looks up nodes by id when a saved session is restored.
pub trait NodeResolver<T: Voxel> {
    fn volume(&self, id: &NodeId) -> Option<SharedVolume<T>>;
    fn transform(&self, id: &NodeId) -> Option<SharedTransform>;
}

/// References persisted with a session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanoramaState {
    pub source_volume: Option<NodeId>,
    pub transform: Option<NodeId>,
    pub output_volume: Option<NodeId>,
}

pub struct Panorama<T: Voxel> {
    settings: PanoramaSettings,
    source: Option<SharedVolume<T>>,
    transform: Option<SharedTransform>,
    straightened: Option<SharedVolume<T>>,
    window_level_sync: Option<WindowLevelSync<T>>,
}

impl<T: Voxel> Default for Panorama<T> {
    fn default() -> Self {
        Self::new(PanoramaSettings::default())
    }
}

impl<T: Voxel> Panorama<T> {
    pub fn new(settings: PanoramaSettings) -> Self {
        Self {
            settings,
            source: None,
            transform: None,
            straightened: None,
            window_level_sync: None,
        }
    }

    pub fn settings(&self) -> &PanoramaSettings {
        &self.settings
    }

    /// Replaces the settings if they are within range. Takes effect on the
    /// next straightening.
    pub fn set_settings(&mut self, settings: PanoramaSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    pub fn source_volume(&self) -> Option<&SharedVolume<T>> {
        self.source.as_ref()
    }

    pub fn straightened_volume(&self) -> Option<&SharedVolume<T>> {
        self.straightened.as_ref()
    }

    pub fn transform(&self) -> Option<&SharedTransform> {
        self.transform.as_ref()
    }

    /// Switches to a new source volume. The straightened volume belongs to
    /// the previous source and is dropped; the views are rebound.
    pub fn set_source_volume(
        &mut self,
        volume: Option<SharedVolume<T>>,
        display: &mut impl DisplayBinding<T>,
    ) {
        self.source = volume;
        self.straightened = None;
        self.window_level_sync = None;
        self.update_displayed_volumes(display);
    }

    pub fn clear_source_volume(&mut self, display: &mut impl DisplayBinding<T>) {
        self.set_source_volume(None, display);
    }

    /// Straightens the source volume along `curve`.
    ///
    /// The transform is only resampled when the curve or the sampling
    /// settings changed.
    ///
    /// # Errors
    ///
    /// `IncompatibleVolume` when no source volume is set or it cannot be
    /// sampled, `DegenerateCurve` for an unusable curve. Both are detected
    /// before the straightened volume is touched; a previous result stays as
    /// it was.
    pub fn straighten_along_curve(&mut self, curve: &Curve) -> Result<(), PanoramaError> {
        let Some(source) = self.source.clone() else {
            return Err(PanoramaError::IncompatibleVolume(
                "no source volume set".to_string(),
            ));
        };

        let transform = self
            .transform
            .get_or_insert_with(|| {
                StraighteningTransform::new(NodeId::new(STRAIGHTENING_TRANSFORM_NAME)).into_shared()
            })
            .clone();
        let parameters = self.settings.sampling_parameters();
        if write(&transform)?.compute(curve, &parameters)? {
            debug!("straightening transform resampled");
        }

        let straightener = self.settings.straightener();
        {
            let source_volume = read(&source)?;
            let transform = read(&transform)?;
            let created = match &self.straightened {
                Some(straightened) => {
                    let mut output = write(straightened)?;
                    straightener.straighten(&source_volume, &transform, &mut output)?;
                    None
                }
                None => {
                    let mut output =
                        source_volume.clone_without_data(NodeId::new(STRAIGHTENED_VOLUME_NAME));
                    straightener.straighten(&source_volume, &transform, &mut output)?;
                    info!("created straightened volume {}", output.id);
                    Some(output.into_shared())
                }
            };
            if created.is_some() {
                self.straightened = created;
            }
        }

        if self.window_level_sync.is_none() {
            if let Some(straightened) = &self.straightened {
                self.window_level_sync =
                    Some(WindowLevelSync::new(source.clone(), straightened.clone())?);
            }
        }
        self.synchronize_window_level()?;
        Ok(())
    }

    /// Straightens along `curve` and binds the result to the panoramic views.
    ///
    /// Returns `Ok(false)` without touching the views when no source volume
    /// is set.
    pub fn show_panoramic_view(
        &mut self,
        curve: &Curve,
        display: &mut impl DisplayBinding<T>,
    ) -> Result<bool, PanoramaError> {
        if self.source.is_none() {
            debug!("no source volume, nothing to show");
            return Ok(false);
        }
        self.straighten_along_curve(curve)?;
        self.update_displayed_volumes(display);
        Ok(true)
    }

    /// Straightened volume in the panoramic views, source volume in the main ones.
    pub fn update_displayed_volumes(&self, display: &mut impl DisplayBinding<T>) {
        for view in ViewTag::panoramic_view_tags() {
            display.show_volume(self.straightened.as_ref(), view);
        }
        for view in ViewTag::main_view_tags() {
            display.show_volume(self.source.as_ref(), view);
        }
    }

    /// Forwards the source window/level to the straightened volume; call
    /// whenever the source's display settings change.
    pub fn synchronize_window_level(&self) -> Result<(), PanoramaError> {
        if let Some(sync) = &self.window_level_sync {
            sync.synchronize()?;
        }
        Ok(())
    }

    pub fn export_state(&self) -> Result<PanoramaState, PanoramaError> {
        Ok(PanoramaState {
            source_volume: self.source.as_ref().map(volume_id).transpose()?,
            transform: self
                .transform
                .as_ref()
                .map(|transform| read(transform).map(|t| t.id.clone()))
                .transpose()?,
            output_volume: self.straightened.as_ref().map(volume_id).transpose()?,
        })
    }

    /// Restores the references of a saved session. Ids that no longer
    /// resolve are dropped with a warning.
    pub fn import_state(
        &mut self,
        state: &PanoramaState,
        resolver: &impl NodeResolver<T>,
        display: &mut impl DisplayBinding<T>,
    ) -> Result<(), PanoramaError> {
        self.source = resolve(state.source_volume.as_ref(), |id| resolver.volume(id));
        self.transform = resolve(state.transform.as_ref(), |id| resolver.transform(id));
        self.straightened = resolve(state.output_volume.as_ref(), |id| resolver.volume(id));

        self.window_level_sync = match (&self.source, &self.straightened) {
            (Some(source), Some(straightened)) => {
                Some(WindowLevelSync::new(source.clone(), straightened.clone())?)
            }
            _ => None,
        };
        self.update_displayed_volumes(display);
        Ok(())
    }
}

fn resolve<N>(id: Option<&NodeId>, lookup: impl Fn(&NodeId) -> Option<N>) -> Option<N> {
    let id = id?;
    let node = lookup(id);
    if node.is_none() {
        warn!("saved panorama node {} not found", id);
    }
    node
}

fn volume_id<T: Voxel>(volume: &SharedVolume<T>) -> Result<NodeId, PanoramaError> {
    Ok(read(volume)?.id.clone())
}

fn read<X>(lock: &RwLock<X>) -> Result<RwLockReadGuard<'_, X>, PanoramaError> {
    lock.read().map_err(|_| PanoramaError::LockPoisoned)
}

fn write<X>(lock: &RwLock<X>) -> Result<RwLockWriteGuard<'_, X>, PanoramaError> {
    lock.write().map_err(|_| PanoramaError::LockPoisoned)
}
