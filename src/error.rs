use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PanoramaError {
    #[error("Degenerate curve: {0}")]
    DegenerateCurve(String),

    #[error("Incompatible volume: {0}")]
    IncompatibleVolume(String),

    #[error("Invalid parameter {name} = {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("Straightening was cancelled")]
    Cancelled,

    #[error("Volume lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Settings serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("{name} = {value:?} is not a usable direction")]
    InvalidDirection { name: &'static str, value: [f64; 3] },

    #[error("{name} = {value} is out of range [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}
