//! Error types.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration rejected at setup, before any stepping.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("resolution must be at least {min} cells per axis, got {got:?}")]
    ResolutionTooSmall { got: [usize; 3], min: usize },

    #[error("boundary width {width} leaves no interior in a {res:?} domain")]
    BoundaryTooWide { width: usize, res: [usize; 3] },

    #[error("{field} must be positive and finite, got {value}")]
    NotPositive { field: &'static str, value: f32 },

    #[error("{field} must lie in [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("noise upres must be between 1 and {max}, got {got}")]
    InvalidUpres { got: usize, max: usize },

    #[error("timing needs 1 <= min_substeps <= max_substeps, got {min}..{max}")]
    InvalidSubsteps { min: usize, max: usize },

    #[error("unknown boundary face '{0}', expected one of xXyYzZ")]
    InvalidBoundaryFace(char),

    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Snapshot save or load failure. Never leaves the simulation half-written.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode or decode {path}: {message}")]
    Codec { path: PathBuf, message: String },

    #[error("grid '{name}' has {got} values, expected {expected}")]
    ShapeMismatch {
        name: String,
        got: usize,
        expected: usize,
    },

    #[error("grid '{0}' is not part of this simulation")]
    UnknownGrid(String),

    #[error("snapshot for frame {frame} is missing grid '{name}'")]
    MissingGrid { frame: u32, name: String },
}

/// Errors from driving a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("frame input '{name}' has {got} cells, expected {expected}")]
    InputShape {
        name: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("timing override '{name}' must be positive and finite, got {value}")]
    InvalidTiming { name: &'static str, value: f32 },
}

/// Errors from a whole-sequence bake.
#[derive(Debug, Error)]
pub enum BakeError {
    #[error("frame {frame}: {source}")]
    Frame {
        frame: u32,
        #[source]
        source: SimError,
    },

    #[error("invalid frame range {start}..={end}")]
    InvalidRange { start: u32, end: u32 },

    #[error("bake cursor {path}: {message}")]
    Cursor { path: PathBuf, message: String },
}

pub type Result<T, E = SimError> = std::result::Result<T, E>;
