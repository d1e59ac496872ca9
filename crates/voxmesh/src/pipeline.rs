//! The volume-to-mesh pipeline: per-label stage chain, batch orchestration.
//!
//! Stages run strictly in order for each label: extract, keep the dominant
//! component, decimate, smooth, repair boundaries, colorize, compute normals.
//! Labels are independent values with no shared mutable state, so they fan
//! out on a rayon pool; results are collected in ascending label order before
//! export, which keeps the combined file deterministic regardless of
//! completion order.
//!
//! Per-label conditions never abort a run. An empty mask skips the label; a
//! failed decimation or an unresolved watertightness downgrade to warnings on
//! the converted outcome. Only I/O failures are fatal, and in batch mode only
//! for their own input file.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::colorize::{LabelColorCatalog, colorize_mesh};
use crate::components::keep_largest_component;
use crate::decimate::{DecimateParams, decimate_mesh};
use crate::error::{VoxError, VoxResult};
use crate::export;
use crate::extract;
use crate::repair::{HoleFillMethod, RepairParams, close_boundaries};
use crate::smooth::smooth_mesh;
use crate::tracing_ext::OperationTimer;
use crate::types::Mesh;
use crate::volume::Volume;
use crate::winding::compute_vertex_normals;

/// Parameters for one pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineParams {
    /// Single-label threshold mode when set; multi-label otherwise.
    pub threshold: Option<f64>,
    /// Laplacian smoothing passes; 0 disables smoothing.
    pub smoothing_iterations: usize,
    /// Fraction of faces to keep in decimation, in (0, 1]; 1.0 disables it.
    pub decimation_fraction: f64,
    /// Whether to run boundary repair.
    pub close_boundaries: bool,
    /// Hole triangulation strategy for boundary repair.
    pub hole_filling_method: HoleFillMethod,
    /// Holes with more vertices than this are left open.
    pub max_hole_size: usize,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            threshold: None,
            smoothing_iterations: 10,
            decimation_fraction: 0.5,
            close_boundaries: true,
            hole_filling_method: HoleFillMethod::Convex,
            max_hole_size: 500,
        }
    }
}

/// Why a label produced no mesh file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No foreground voxels (or no extractable surface) for this label.
    EmptyMask,
}

/// Non-fatal conditions recorded on a converted label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelWarning {
    /// Decimation produced an unusable mesh and was skipped.
    DecimationSkipped,
    /// Some boundary loops had degenerate fills and were left open.
    DegenerateHoles { count: usize },
    /// The repair chain ended without reaching watertightness.
    NotWatertight,
}

/// Terminal status of one label.
#[derive(Debug, Clone)]
pub enum LabelStatus {
    /// A mesh file was produced.
    Converted {
        vertices: usize,
        faces: usize,
        watertight: bool,
        warnings: Vec<LabelWarning>,
    },
    /// The label was skipped with a reason; the batch continued.
    Skipped(SkipReason),
}

/// Outcome record for one label of one volume.
#[derive(Debug, Clone)]
pub struct LabelOutcome {
    pub label_id: u32,
    pub label_name: Option<String>,
    pub status: LabelStatus,
}

/// Result of converting one volume.
#[derive(Debug)]
pub struct ConversionSummary {
    /// Per-label outcomes in ascending label-id order.
    pub outcomes: Vec<LabelOutcome>,
    /// Paths written, combined file last in multi-label mode.
    pub files: Vec<PathBuf>,
}

impl ConversionSummary {
    /// Number of labels that produced a mesh.
    pub fn converted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, LabelStatus::Converted { .. }))
            .count()
    }

    /// Number of labels skipped.
    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.converted()
    }
}

/// Run stages 2-7 for one binary mask that already became a raw mesh.
fn process_mesh(
    mesh: Mesh,
    label_id: u32,
    catalog: &LabelColorCatalog,
    params: &PipelineParams,
) -> (Mesh, Vec<LabelWarning>) {
    let _timer = OperationTimer::with_context("process_label", mesh.vertex_count(), mesh.face_count());
    let mut warnings = Vec::new();

    let (mesh, _removed) = keep_largest_component(mesh);

    let mesh = if params.decimation_fraction < 1.0 {
        let result = decimate_mesh(
            &mesh,
            &DecimateParams::with_target_ratio(params.decimation_fraction),
        );
        if result.is_usable() {
            result.mesh
        } else {
            warn!(
                label_id,
                "decimation produced an unusable mesh, continuing undecimated"
            );
            warnings.push(LabelWarning::DecimationSkipped);
            mesh
        }
    } else {
        mesh
    };

    let mesh = smooth_mesh(mesh, params.smoothing_iterations);

    let mut mesh = if params.close_boundaries {
        let outcome = close_boundaries(
            mesh,
            &RepairParams {
                method: params.hole_filling_method,
                max_hole_size: params.max_hole_size,
            },
        );
        if outcome.degenerate_loops > 0 {
            warnings.push(LabelWarning::DegenerateHoles {
                count: outcome.degenerate_loops,
            });
        }
        if !outcome.is_watertight() {
            warnings.push(LabelWarning::NotWatertight);
        }
        outcome.mesh
    } else {
        let mut mesh = mesh;
        mesh.refresh_watertight();
        if !mesh.metadata.is_watertight {
            warnings.push(LabelWarning::NotWatertight);
        }
        mesh
    };

    mesh = colorize_mesh(mesh, label_id, catalog);
    compute_vertex_normals(&mut mesh);

    (mesh, warnings)
}

fn converted_status(mesh: &Mesh, warnings: Vec<LabelWarning>) -> LabelStatus {
    LabelStatus::Converted {
        vertices: mesh.vertex_count(),
        faces: mesh.face_count(),
        watertight: mesh.metadata.is_watertight,
        warnings,
    }
}

/// Convert one volume into mesh files under `out_dir`.
///
/// Multi-label mode (threshold unset) writes one file per distinct non-zero
/// label plus a combined file; threshold mode writes exactly one file.
pub fn convert_volume(
    volume: &Volume,
    catalog: &LabelColorCatalog,
    params: &PipelineParams,
    out_dir: &Path,
) -> VoxResult<ConversionSummary> {
    std::fs::create_dir_all(out_dir).map_err(|e| VoxError::io_write(out_dir, e))?;

    let params = normalized(params);

    if let Some(level) = params.threshold {
        return convert_threshold(volume, level, catalog, &params, out_dir);
    }

    let labels = volume.distinct_labels();
    if labels.is_empty() {
        return Err(VoxError::invalid_volume(
            "volume contains no non-zero labels; use threshold mode for grayscale input",
        ));
    }

    info!("converting {} label(s)", labels.len());

    // Labels are independent; the indexed parallel map keeps ascending order.
    let results: Vec<(LabelOutcome, Option<Mesh>)> = labels
        .par_iter()
        .map(|&label_id| match extract::extract_label(volume, label_id) {
            None => (
                LabelOutcome {
                    label_id,
                    label_name: None,
                    status: LabelStatus::Skipped(SkipReason::EmptyMask),
                },
                None,
            ),
            Some(raw) => {
                let (mesh, warnings) = process_mesh(raw, label_id, catalog, &params);
                (
                    LabelOutcome {
                        label_id,
                        label_name: mesh.metadata.label_name.clone(),
                        status: converted_status(&mesh, warnings),
                    },
                    Some(mesh),
                )
            }
        })
        .collect();

    let mut outcomes = Vec::with_capacity(results.len());
    let mut meshes = Vec::new();
    for (outcome, mesh) in results {
        if let LabelStatus::Skipped(reason) = &outcome.status {
            warn!(label_id = outcome.label_id, ?reason, "label skipped");
        }
        outcomes.push(outcome);
        if let Some(mesh) = mesh {
            meshes.push(mesh);
        }
    }

    let files = if meshes.is_empty() {
        Vec::new()
    } else {
        export::export_batch(&meshes, out_dir)?
    };

    info!(
        converted = meshes.len(),
        skipped = outcomes.len() - meshes.len(),
        files = files.len(),
        "volume converted"
    );

    Ok(ConversionSummary { outcomes, files })
}

fn convert_threshold(
    volume: &Volume,
    level: f64,
    catalog: &LabelColorCatalog,
    params: &PipelineParams,
    out_dir: &Path,
) -> VoxResult<ConversionSummary> {
    let Some((mut raw, used)) = extract::extract_threshold(volume, level) else {
        return Ok(ConversionSummary {
            outcomes: vec![LabelOutcome {
                label_id: 0,
                label_name: None,
                status: LabelStatus::Skipped(SkipReason::EmptyMask),
            }],
            files: Vec::new(),
        });
    };
    if (used - level).abs() > f64::EPSILON {
        warn!(requested = level, used, "threshold level was adjusted");
    }

    raw.metadata.label_name = Some("segmentation".to_string());
    let (mesh, warnings) = process_mesh(raw, 0, catalog, params);

    let path = export::export_single(&mesh, out_dir)?;
    Ok(ConversionSummary {
        outcomes: vec![LabelOutcome {
            label_id: 0,
            label_name: mesh.metadata.label_name.clone(),
            status: converted_status(&mesh, warnings),
        }],
        files: vec![path],
    })
}

/// Clamp out-of-range parameters instead of failing the run.
fn normalized(params: &PipelineParams) -> PipelineParams {
    let mut params = params.clone();
    if !(params.decimation_fraction > 0.0) || params.decimation_fraction > 1.0 {
        warn!(
            requested = params.decimation_fraction,
            "decimation fraction out of (0, 1], disabling decimation"
        );
        params.decimation_fraction = 1.0;
    }
    params
}

/// Terminal status of one batch unit (one input file).
#[derive(Debug)]
pub enum UnitStatus {
    /// The volume converted; per-label details inside.
    Converted(ConversionSummary),
    /// The volume failed as a whole (I/O or parse); the batch continued.
    Failed(String),
}

/// Outcome record for one input file of a batch run.
#[derive(Debug)]
pub struct BatchUnit {
    pub input: PathBuf,
    pub status: UnitStatus,
}

/// Result of a batch run over several volume files.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub units: Vec<BatchUnit>,
}

impl BatchSummary {
    /// Number of inputs that converted.
    pub fn succeeded(&self) -> usize {
        self.units
            .iter()
            .filter(|u| matches!(u.status, UnitStatus::Converted(_)))
            .count()
    }

    /// Number of inputs that failed outright.
    pub fn failed(&self) -> usize {
        self.units.len() - self.succeeded()
    }

    /// Labels skipped across all converted inputs.
    pub fn labels_skipped(&self) -> usize {
        self.units
            .iter()
            .filter_map(|u| match &u.status {
                UnitStatus::Converted(summary) => Some(summary.skipped()),
                UnitStatus::Failed(_) => None,
            })
            .sum()
    }
}

/// Convert several volume files, each into `out_root/<file_stem>/`.
///
/// A failing input (unreadable, unparsable, unwritable output) is recorded
/// and the remaining inputs still run.
pub fn convert_batch(
    inputs: &[PathBuf],
    catalog: &LabelColorCatalog,
    params: &PipelineParams,
    out_root: &Path,
) -> BatchSummary {
    let mut summary = BatchSummary::default();

    for input in inputs {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "volume".to_string());
        let out_dir = out_root.join(stem);

        let status = match Volume::load(input)
            .and_then(|volume| convert_volume(&volume, catalog, params, &out_dir))
        {
            Ok(conversion) => UnitStatus::Converted(conversion),
            Err(err) => {
                warn!("skipping {:?}: {}", input, err);
                UnitStatus::Failed(format!("{} ({})", err, err.code()))
            }
        };

        summary.units.push(BatchUnit {
            input: input.clone(),
            status,
        });
    }

    info!(
        succeeded = summary.succeeded(),
        failed = summary.failed(),
        "batch finished"
    );

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colorize::LabelColorEntry;
    use tempfile::tempdir;

    fn catalog() -> LabelColorCatalog {
        LabelColorCatalog::from_entries(vec![LabelColorEntry {
            id: 1,
            name: "sphere".to_string(),
            color: [255, 0, 0],
        }])
    }

    #[test]
    fn test_convert_sphere_volume() {
        let volume = crate::extract::tests::sphere_volume(20, 5.0, 1);
        let dir = tempdir().unwrap();

        let summary =
            convert_volume(&volume, &catalog(), &PipelineParams::default(), dir.path()).unwrap();

        assert_eq!(summary.converted(), 1);
        assert_eq!(summary.skipped(), 0);
        // One label file plus the combined file.
        assert_eq!(summary.files.len(), 2);
        assert!(dir.path().join("sphere.ply").exists());
        assert!(dir.path().join("all.ply").exists());

        match &summary.outcomes[0].status {
            LabelStatus::Converted { watertight, .. } => assert!(*watertight),
            other => panic!("expected converted, got {:?}", other),
        }
    }

    #[test]
    fn test_labelless_volume_is_an_error() {
        let volume = crate::volume::Volume::from_labels([4, 4, 4], vec![0; 64]).unwrap();
        let dir = tempdir().unwrap();
        let err = convert_volume(&volume, &catalog(), &PipelineParams::default(), dir.path())
            .unwrap_err();
        assert!(matches!(err, VoxError::InvalidVolume { .. }));
    }

    #[test]
    fn test_threshold_mode_single_file() {
        let volume = crate::extract::tests::sphere_volume(16, 5.0, 1);
        let params = PipelineParams {
            threshold: Some(0.5),
            ..Default::default()
        };
        let dir = tempdir().unwrap();

        let summary = convert_volume(&volume, &catalog(), &params, dir.path()).unwrap();
        assert_eq!(summary.files.len(), 1);
        assert!(dir.path().join("segmentation.ply").exists());
    }

    #[test]
    fn test_bad_decimation_fraction_disables_decimation() {
        let params = PipelineParams {
            decimation_fraction: 0.0,
            ..Default::default()
        };
        assert_eq!(normalized(&params).decimation_fraction, 1.0);
    }

    #[test]
    fn test_batch_continues_past_bad_file() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.vxl");
        crate::extract::tests::sphere_volume(12, 4.0, 1)
            .save(&good)
            .unwrap();
        let bad = dir.path().join("bad.vxl");
        std::fs::write(&bad, b"not a volume").unwrap();

        let out = tempdir().unwrap();
        let summary = convert_batch(
            &[bad.clone(), good.clone()],
            &catalog(),
            &PipelineParams::default(),
            out.path(),
        );

        assert_eq!(summary.units.len(), 2);
        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 1);
        assert!(matches!(summary.units[0].status, UnitStatus::Failed(_)));
        assert!(out.path().join("good").join("all.ply").exists());
    }
}
