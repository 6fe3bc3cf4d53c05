//! Error types for the slicer.

use thiserror::Error;

use crate::cutting_plane::LinkFailure;

/// Errors that can occur during slicing.
#[derive(Error, Debug)]
pub enum SlicerError {
    /// Mesh has no triangles.
    #[error("mesh is empty")]
    EmptyMesh,

    /// Mesh has degenerate geometry.
    #[error("mesh has degenerate geometry: {0}")]
    DegenerateMesh(String),

    /// Invalid slice settings.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// A polygon operation was given fewer than three vertices.
    #[error("polygon needs at least 3 vertices, got {0}")]
    DegeneratePolygon(usize),

    /// Merging overlapping shell rings failed.
    #[error("polygon clipping failed: {0}")]
    Clipping(String),

    /// A polygon id was not found in its layer arena.
    #[error("unknown polygon id {0}")]
    UnknownPolygon(usize),

    /// Segment linking kept failing after every retry.
    #[error("segment linking failed at z={z} after {attempts} attempt(s): {source}")]
    LinkFailed {
        /// Requested layer height.
        z: f64,
        /// Number of cutting planes tried.
        attempts: usize,
        /// Failure reported by the last attempt.
        #[source]
        source: LinkFailure,
    },

    /// The slicing job was cancelled.
    #[error("slicing cancelled")]
    Cancelled,

    /// Reading a mesh or settings file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file could not be parsed.
    #[error("settings parse error: {0}")]
    Config(#[from] toml::de::Error),
}

/// Result type for slicer operations.
pub type Result<T> = std::result::Result<T, SlicerError>;
