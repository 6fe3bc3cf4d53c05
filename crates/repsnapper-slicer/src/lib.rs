#![warn(missing_docs)]

//! Layer slicing for the RepSnapper 3D printer host.
//!
//! A mesh is cut by horizontal planes. The segments of every plane are
//! deduplicated through a tolerance-based point hash and linked into closed
//! loops. The loops are then shrunk into shells, and the innermost region is
//! filled with scan-line infill.
//!
//! # Example
//!
//! ```no_run
//! use repsnapper_slicer::{slice, SliceSettings, TriangleMesh};
//!
//! let mesh = TriangleMesh::load_stl("part.stl")?;
//! let settings = SliceSettings::default();
//! let result = slice(&mesh, &settings)?;
//!
//! println!("Layers: {}", result.layers.len());
//! println!("Path length: {:.0}mm", result.stats.path_length_mm);
//! # Ok::<(), repsnapper_slicer::SlicerError>(())
//! ```

pub mod cutting_plane;
pub mod error;
pub mod infill;
mod link;
pub mod mesh;
mod offset;
pub mod path;
pub mod point_hash;
pub mod polygon;
pub mod shells;
pub mod slice;

pub use cutting_plane::{CuttingPlane, LinkFailure, LinkOutcome, PlaneSettings, Segment};
pub use error::{Result, SlicerError};
pub use infill::{generate_infill, InfillPattern, InfillResult, InfillSettings};
pub use mesh::TriangleMesh;
pub use path::{optimize_polyline_order, Polyline};
pub use point_hash::{PointHash, PointRegistry, DEFAULT_POINT_EPSILON};
pub use polygon::Polygon2f;
pub use shells::{generate_shells, LayerShells, PolygonArena, PolygonId, ShellSettings};
pub use slice::{
    generate_layer_heights, link_with_retry, mesh_bounds, slice_mesh, slice_mesh_with_cancel,
    LinkFailurePolicy, LinkedPlane, RetrySettings, SliceLayer,
};

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Slicing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SliceSettings {
    /// Layer height for non-first layers (mm).
    pub layer_height: f64,
    /// First layer height (mm).
    pub first_layer_height: f64,
    /// Extrusion line width (mm).
    pub line_width: f64,
    /// Number of shells inside each contour.
    pub shell_count: u32,
    /// Infill settings.
    pub infill: InfillSettings,
    /// Cutting-plane tolerances.
    pub plane: PlaneSettings,
    /// Link retry policy.
    pub retry: RetrySettings,
}

impl Default for SliceSettings {
    fn default() -> Self {
        Self {
            layer_height: 0.2,
            first_layer_height: 0.25,
            line_width: 0.45,
            shell_count: 3,
            infill: InfillSettings::default(),
            plane: PlaneSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl SliceSettings {
    /// Validate settings.
    pub fn validate(&self) -> Result<()> {
        if self.layer_height <= 0.0 || self.layer_height > 1.0 {
            return Err(SlicerError::InvalidSettings(
                "layer_height must be between 0 and 1mm".into(),
            ));
        }
        if self.first_layer_height <= 0.0 {
            return Err(SlicerError::InvalidSettings(
                "first_layer_height must be positive".into(),
            ));
        }
        if self.line_width <= 0.0 {
            return Err(SlicerError::InvalidSettings(
                "line_width must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.infill.density) {
            return Err(SlicerError::InvalidSettings(
                "infill density must be between 0 and 1".into(),
            ));
        }
        self.plane.validate()?;
        self.retry.validate()
    }

    /// Parse settings from TOML. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Serialize settings to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SlicerError::InvalidSettings(e.to_string()))
    }

    fn shell_settings(&self) -> ShellSettings {
        ShellSettings {
            wall_count: self.shell_count,
            line_width: self.line_width,
        }
    }
}

/// A complete layer with shells and infill.
#[derive(Debug, Clone)]
pub struct PrintLayer {
    /// Z height (mm).
    pub z: f64,
    /// Layer index.
    pub index: usize,
    /// Layer height at this position (mm).
    pub layer_height: f64,
    /// Contours and the shells shrunk from them.
    pub shells: LayerShells,
    /// Infill paths.
    pub infill: Vec<Polyline>,
    /// Cutting planes built before the layer linked.
    pub link_attempts: usize,
    /// Whether the layer failed to link and carries no geometry.
    pub skipped: bool,
}

impl PrintLayer {
    /// Shell and infill extrusion length (mm).
    pub fn path_length(&self) -> f64 {
        self.shells.path_length() + self.infill.iter().map(Polyline::length).sum::<f64>()
    }
}

/// Statistics about the sliced model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintStats {
    /// Total number of layers.
    pub layer_count: usize,
    /// Layers left empty because their segments never linked.
    pub skipped_layers: usize,
    /// Layers that linked only after a Z nudge.
    pub retried_layers: usize,
    /// Total shell and infill length (mm).
    pub path_length_mm: f64,
    /// Bounding box min corner.
    pub bounds_min: [f64; 3],
    /// Bounding box max corner.
    pub bounds_max: [f64; 3],
}

/// Result of slicing operation.
#[derive(Debug, Clone)]
pub struct SliceResult {
    /// Layers from bottom to top.
    pub layers: Vec<PrintLayer>,
    /// Print statistics.
    pub stats: PrintStats,
}

/// Slice a mesh with the given settings.
///
/// This is the main entry point for slicing. It:
/// 1. Cuts the mesh into linked contours per layer
/// 2. Shrinks the contours into shells
/// 3. Fills the innermost region with infill
/// 4. Computes print statistics
pub fn slice(mesh: &TriangleMesh, settings: &SliceSettings) -> Result<SliceResult> {
    slice_with_cancel(mesh, settings, &AtomicBool::new(false))
}

/// [`slice`] that can be stopped from another thread by setting `cancel`.
pub fn slice_with_cancel(
    mesh: &TriangleMesh,
    settings: &SliceSettings,
    cancel: &AtomicBool,
) -> Result<SliceResult> {
    settings.validate()?;

    let (bounds_min, bounds_max) = mesh_bounds(mesh).ok_or(SlicerError::EmptyMesh)?;

    let layer_heights = generate_layer_heights(
        bounds_min[2],
        bounds_max[2],
        settings.first_layer_height,
        settings.layer_height,
    );

    if layer_heights.is_empty() {
        return Err(SlicerError::DegenerateMesh("model too thin to slice".into()));
    }

    let slice_layers = slice_mesh_with_cancel(
        mesh,
        &layer_heights,
        &settings.plane,
        &settings.retry,
        cancel,
    )?;

    let shell_settings = settings.shell_settings();
    let layers: Vec<PrintLayer> = slice_layers
        .into_par_iter()
        .map(|slice_layer| {
            if cancel.load(Ordering::Relaxed) {
                return Err(SlicerError::Cancelled);
            }
            build_print_layer(slice_layer, settings, &shell_settings)
        })
        .collect::<Result<_>>()?;

    let stats = PrintStats {
        layer_count: layers.len(),
        skipped_layers: layers.iter().filter(|l| l.skipped).count(),
        retried_layers: layers.iter().filter(|l| l.link_attempts > 1).count(),
        path_length_mm: layers.iter().map(PrintLayer::path_length).sum(),
        bounds_min,
        bounds_max,
    };

    info!(
        layers = stats.layer_count,
        skipped = stats.skipped_layers,
        retried = stats.retried_layers,
        path_mm = stats.path_length_mm,
        "sliced mesh"
    );

    Ok(SliceResult { layers, stats })
}

fn build_print_layer(
    slice_layer: SliceLayer,
    settings: &SliceSettings,
    shell_settings: &ShellSettings,
) -> Result<PrintLayer> {
    let layer_height = if slice_layer.index == 0 {
        settings.first_layer_height
    } else {
        settings.layer_height
    };

    let shells = generate_shells(&slice_layer.contours, shell_settings)?;
    let infill = generate_infill(
        &shells.infill_polygons(),
        &settings.infill,
        settings.line_width,
        slice_layer.index,
    );

    Ok(PrintLayer {
        z: slice_layer.z,
        index: slice_layer.index,
        layer_height,
        shells,
        infill: infill.paths,
        link_attempts: slice_layer.link_attempts,
        skipped: slice_layer.skipped,
    })
}
