//! Voxel-to-mesh reconstruction and repair.
//!
//! This crate turns a labeled 3D voxel volume (the output of an AI
//! segmentation step) into one repaired, colored surface mesh per anatomical
//! label, plus a combined mesh, and writes them as PLY files.
//!
//! # Pipeline
//!
//! For each label, strictly in order:
//!
//! 1. **Extract**: isosurface of the binary label mask at the 0.5 crossing,
//!    with physical voxel spacing applied ([`extract`])
//! 2. **Select**: keep the dominant connected component, dropping floating
//!    speckle geometry ([`components`])
//! 3. **Simplify**: quadric-error edge-collapse decimation toward a target
//!    face fraction; skipped, never fatal, when it fails ([`decimate`])
//! 4. **Smooth**: simple Laplacian passes against voxel staircasing
//!    ([`smooth`])
//! 5. **Repair**: detect open boundary loops, close them with an automatic
//!    fill, clustered convex/planar fills and a winding fallback, recording
//!    every step ([`repair`])
//! 6. **Colorize**: uniform per-vertex color from the label catalog
//!    ([`colorize`])
//! 7. **Export**: sanitized per-label PLY files plus a combined `all.ply`
//!    ([`export`])
//!
//! Labels are independent and run in parallel; results merge in ascending
//! label order so output is deterministic ([`pipeline`]).
//!
//! # Units
//!
//! Vertex coordinates are voxel indices scaled by the volume's physical
//! spacing, so meshes come out in the scanner's units (typically mm).
//!
//! # Quick start
//!
//! ```no_run
//! use std::path::Path;
//! use voxmesh::{LabelColorCatalog, PipelineParams, Volume, convert_volume};
//!
//! # fn main() -> voxmesh::VoxResult<()> {
//! let volume = Volume::load(Path::new("scan_seg.vxl"))?;
//! let catalog = LabelColorCatalog::load(Path::new("labels.json"))?;
//!
//! let summary = convert_volume(
//!     &volume,
//!     &catalog,
//!     &PipelineParams::default(),
//!     Path::new("out/"),
//! )?;
//!
//! println!("{} labels converted, {} skipped", summary.converted(), summary.skipped());
//! # Ok(())
//! # }
//! ```
//!
//! # Error handling
//!
//! Fatal errors are [`VoxError`] with `VOX-XXXX` codes. Per-label conditions
//! (empty mask, skipped decimation, unresolved watertightness) are outcome
//! data on the [`pipeline::LabelOutcome`], not errors: a batch run only ever
//! fails per input file.

mod error;
mod types;

pub mod adjacency;
pub mod colorize;
pub mod components;
pub mod decimate;
pub mod export;
pub mod extract;
pub mod holes;
pub mod pipeline;
pub mod repair;
pub mod smooth;
pub mod tracing_ext;
pub mod volume;
pub mod winding;

// Core types at the crate root
pub use error::{ErrorCode, RecoverySuggestion, VoxError, VoxLocation, VoxResult};
pub use types::{Mesh, MeshMetadata, Triangle, Vertex, VertexColor};

// The adjacency index is the shared topology primitive
pub use adjacency::MeshAdjacency;

// Commonly used stage entry points
pub use colorize::{LabelColorCatalog, LabelColorEntry, colorize_mesh};
pub use components::{ComponentAnalysis, find_connected_components, keep_largest_component};
pub use decimate::{DecimateParams, DecimateResult, decimate_mesh};
pub use export::{export_batch, export_single, merge_meshes, sanitize_label_filename, save_ply};
pub use extract::{extract_label, extract_mask_surface, extract_threshold};
pub use holes::{BoundaryLoop, auto_fill_holes, detect_holes};
pub use pipeline::{
    BatchSummary, ConversionSummary, LabelOutcome, LabelStatus, LabelWarning, PipelineParams,
    SkipReason, convert_batch, convert_volume,
};
pub use repair::{HoleFillMethod, RepairOutcome, RepairParams, RepairStep, close_boundaries};
pub use smooth::{smooth_mesh, smooth_mesh_with_strength};
pub use volume::{Volume, VolumeData};
pub use winding::{compute_vertex_normals, fix_winding_order};
