//! # CPR Volume
//!
//! Builds a synthetic dental-arch phantom, straightens it along a curve and
//! writes the panoramic and orthogonal views as PNG images.
//!
//! ## Usage
//!
//! ```bash
//! cpr-volume --out <folder>
//! cpr-volume --settings panorama.toml -p 10,15,15 -p 40,45,15 -p 70,15,15 --out <folder>
//! cpr-volume --points-file arch.txt --closed --out <folder>
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use glam::DVec3;
use ndarray::Array3;

use cpr_volume::{
    Curve, DisplayBinding, NodeId, Orientation, Panorama, PanoramaSettings, SharedVolume, ViewTag,
    Volume,
};

/// Phantom grid (z, y, x) and voxel size in mm.
const PHANTOM_DIM: (usize, usize, usize) = (60, 120, 160);
const PHANTOM_SPACING_MM: f64 = 0.5;
const ARCH_CENTER: (f64, f64) = (40.0, 15.0);
const ARCH_RADIUS_MM: f64 = 30.0;
const ARCH_THICKNESS_MM: f64 = 3.0;
const ARCH_HALF_HEIGHT_MM: f64 = 10.0;
const ARCH_Z_MM: f64 = 15.0;

#[derive(Parser, Debug)]
#[command(name = "cpr-volume")]
#[command(about = "Straighten a volume along a curve and write panoramic views")]
struct CliArgs {
    /// Panorama settings (TOML); defaults are used when the file is missing
    #[arg(long, short = 's', default_value = "panorama.toml")]
    settings: PathBuf,

    /// Control point "x,y,z" in mm, repeatable (defaults to the phantom's arch)
    #[arg(long = "point", short = 'p', value_parser = parse_point)]
    points: Vec<DVec3>,

    /// File with one control point per line
    #[arg(long, conflicts_with = "points")]
    points_file: Option<PathBuf>,

    /// Connect the last control point back to the first
    #[arg(long)]
    closed: bool,

    /// Output folder for the images
    #[arg(long = "out", short = 'o', default_value = ".")]
    output: PathBuf,

    /// Write the settings in use back to the settings file
    #[arg(long)]
    save_settings: bool,
}

/// Volumes currently bound to each view slot.
#[derive(Default)]
struct ViewSlots {
    slots: HashMap<ViewTag, SharedVolume<u16>>,
}

impl DisplayBinding<u16> for ViewSlots {
    fn show_volume(&mut self, volume: Option<&SharedVolume<u16>>, view: ViewTag) {
        match volume {
            Some(volume) => {
                self.slots.insert(view, volume.clone());
            }
            None => {
                self.slots.remove(&view);
            }
        }
    }
}

impl ViewSlots {
    /// Writes the center slice of every bound view to `<folder>/<slot>.png`.
    fn save_images(&self, folder: &Path) -> Result<usize> {
        let mut written = 0;
        for (view, volume) in &self.slots {
            let volume = volume
                .read()
                .map_err(|_| anyhow!("Volume lock poisoned"))?;
            let dim = volume.dim();
            let orientation = view.slice_orientation();
            let center = match orientation {
                Orientation::Axial => dim.0 / 2,
                Orientation::Coronal => dim.1 / 2,
                Orientation::Sagittal => dim.2 / 2,
            };
            let image = match view {
                ViewTag::PanoramaFront | ViewTag::PanoramaLateral => {
                    volume.panoramic_image(*view, center)
                }
                _ => volume.get_image_from_axis(center, orientation),
            };
            let Some(image) = image else {
                log::warn!("{} view of {} is empty, skipping", view.slot_name(), volume.id);
                continue;
            };
            let path = folder.join(format!("{}.png", view.slot_name()));
            image
                .save(&path)
                .with_context(|| format!("Failed to write image: {:?}", path))?;
            log::info!("Wrote {}", path.display());
            written += 1;
        }
        Ok(written)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = CliArgs::parse();

    let settings = PanoramaSettings::load_from_file(&args.settings);
    if args.save_settings {
        settings.save_to_file(&args.settings)?;
    }

    let points = match &args.points_file {
        Some(path) => read_points(path)?,
        None if args.points.is_empty() => default_arch(),
        None => args.points.clone(),
    };
    let curve = Curve::new(points, args.closed);

    fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output folder: {:?}", args.output))?;

    let mut slots = ViewSlots::default();
    let mut panorama = Panorama::new(settings);
    panorama.set_source_volume(Some(phantom().into_shared()), &mut slots);
    panorama.show_panoramic_view(&curve, &mut slots)?;

    let written = slots.save_images(&args.output)?;
    println!("Wrote {} images to {:?}", written, args.output);
    Ok(())
}

/// A bright horseshoe band in an empty box, shaped like a dental arch.
fn phantom() -> Volume<u16> {
    let data = Array3::from_shape_fn(PHANTOM_DIM, |(z, y, x)| {
        let x = x as f64 * PHANTOM_SPACING_MM - ARCH_CENTER.0;
        let y = y as f64 * PHANTOM_SPACING_MM - ARCH_CENTER.1;
        let z = z as f64 * PHANTOM_SPACING_MM - ARCH_Z_MM;
        let radial = (x.hypot(y) - ARCH_RADIUS_MM).abs();
        if y >= 0.0 && radial <= ARCH_THICKNESS_MM && z.abs() <= ARCH_HALF_HEIGHT_MM {
            1500
        } else if y >= -5.0 && radial <= 2.0 * ARCH_THICKNESS_MM {
            200
        } else {
            0
        }
    });
    Volume::new(NodeId::new("phantom"), data, DVec3::splat(PHANTOM_SPACING_MM))
}

fn default_arch() -> Vec<DVec3> {
    [180.0_f64, 135.0, 90.0, 45.0, 0.0]
        .iter()
        .map(|angle| {
            let (sin, cos) = angle.to_radians().sin_cos();
            DVec3::new(
                ARCH_CENTER.0 + ARCH_RADIUS_MM * cos,
                ARCH_CENTER.1 + ARCH_RADIUS_MM * sin,
                ARCH_Z_MM,
            )
        })
        .collect()
}

fn read_points(path: &Path) -> Result<Vec<DVec3>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read points file: {:?}", path))?;
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| parse_point(line).map_err(|e| anyhow!("{:?}: {}", path, e)))
        .collect()
}

/// Parses "x,y,z" or "x y z".
fn parse_point(text: &str) -> Result<DVec3, String> {
    let coordinates = text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<f64>()
                .map_err(|e| format!("invalid coordinate {:?}: {}", part, e))
        })
        .collect::<Result<Vec<_>, _>>()?;
    match coordinates.as_slice() {
        [x, y, z] => Ok(DVec3::new(*x, *y, *z)),
        _ => Err(format!("expected 3 coordinates, got {:?}", text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_point_accepts_commas_and_spaces() {
        assert_eq!(parse_point("1,2.5,-3").unwrap(), DVec3::new(1.0, 2.5, -3.0));
        assert_eq!(parse_point(" 1 2  3 ").unwrap(), DVec3::new(1.0, 2.0, 3.0));
        assert!(parse_point("1,2").is_err());
        assert!(parse_point("1,a,3").is_err());
    }

    #[test]
    fn default_arch_lies_on_the_phantom_band() {
        let volume = phantom();
        let world_to_index = volume.world_to_index().unwrap();
        for point in default_arch() {
            let index = world_to_index.transform_point(point).round();
            let value = volume.data()[[index.z as usize, index.y as usize, index.x as usize]];
            assert_eq!(value, 1500, "control point {:?}", point);
        }
    }
}
