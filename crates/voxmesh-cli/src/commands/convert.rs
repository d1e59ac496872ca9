//! convert command - run the volume-to-mesh pipeline.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use colored::Colorize;
use serde::Serialize;
use voxmesh::pipeline::UnitStatus;
use voxmesh::{
    HoleFillMethod, LabelColorCatalog, LabelStatus, LabelWarning, PipelineParams, SkipReason,
    Volume, convert_batch, convert_volume,
};

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct LabelReport {
    label_id: u32,
    name: Option<String>,
    status: String,
    vertices: usize,
    faces: usize,
    watertight: bool,
    warnings: Vec<String>,
}

#[derive(Serialize)]
struct UnitReport {
    input: String,
    success: bool,
    error: Option<String>,
    labels: Vec<LabelReport>,
    files: Vec<String>,
}

#[derive(Serialize)]
struct ConvertReport {
    succeeded: usize,
    failed: usize,
    labels_converted: usize,
    labels_skipped: usize,
    units: Vec<UnitReport>,
}

fn warning_text(warning: &LabelWarning) -> String {
    match warning {
        LabelWarning::DecimationSkipped => "decimation skipped".to_string(),
        LabelWarning::DegenerateHoles { count } => {
            format!("{} degenerate hole(s) left open", count)
        }
        LabelWarning::NotWatertight => "not watertight".to_string(),
    }
}

fn label_report(outcome: &voxmesh::LabelOutcome) -> LabelReport {
    match &outcome.status {
        LabelStatus::Converted {
            vertices,
            faces,
            watertight,
            warnings,
        } => LabelReport {
            label_id: outcome.label_id,
            name: outcome.label_name.clone(),
            status: "converted".to_string(),
            vertices: *vertices,
            faces: *faces,
            watertight: *watertight,
            warnings: warnings.iter().map(warning_text).collect(),
        },
        LabelStatus::Skipped(reason) => LabelReport {
            label_id: outcome.label_id,
            name: outcome.label_name.clone(),
            status: match reason {
                SkipReason::EmptyMask => "skipped: empty mask".to_string(),
            },
            vertices: 0,
            faces: 0,
            watertight: false,
            warnings: Vec::new(),
        },
    }
}

fn collect_inputs(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        bail!("input {:?} is neither a file nor a directory", input);
    }

    let mut inputs: Vec<PathBuf> = std::fs::read_dir(input)
        .with_context(|| format!("failed to read input directory {:?}", input))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "vxl"))
        .collect();
    inputs.sort();

    if inputs.is_empty() {
        bail!("input directory {:?} contains no .vxl volumes", input);
    }
    Ok(inputs)
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    input: &Path,
    output_dir: &Path,
    colors: Option<&Path>,
    threshold: Option<f64>,
    smoothing_iterations: usize,
    decimation_fraction: f64,
    close_boundaries: bool,
    hole_filling_method: HoleFillMethod,
    max_hole_size: usize,
    cli: &Cli,
) -> Result<()> {
    let catalog = match colors {
        Some(path) => LabelColorCatalog::load(path)
            .with_context(|| format!("failed to load color catalog from {:?}", path))?,
        None => LabelColorCatalog::default(),
    };

    let params = PipelineParams {
        threshold,
        smoothing_iterations,
        decimation_fraction,
        close_boundaries,
        hole_filling_method,
        max_hole_size,
    };

    let inputs = collect_inputs(input)?;

    let mut units = Vec::new();
    if inputs.len() == 1 && input.is_file() {
        // Single file: write straight into the output directory.
        let volume = Volume::load(&inputs[0])?;
        let summary = convert_volume(&volume, &catalog, &params, output_dir)?;
        units.push(UnitReport {
            input: inputs[0].display().to_string(),
            success: true,
            error: None,
            labels: summary.outcomes.iter().map(label_report).collect(),
            files: summary.files.iter().map(|p| p.display().to_string()).collect(),
        });
    } else {
        let batch = convert_batch(&inputs, &catalog, &params, output_dir);
        for unit in &batch.units {
            units.push(match &unit.status {
                UnitStatus::Converted(summary) => UnitReport {
                    input: unit.input.display().to_string(),
                    success: true,
                    error: None,
                    labels: summary.outcomes.iter().map(label_report).collect(),
                    files: summary.files.iter().map(|p| p.display().to_string()).collect(),
                },
                UnitStatus::Failed(error) => UnitReport {
                    input: unit.input.display().to_string(),
                    success: false,
                    error: Some(error.clone()),
                    labels: Vec::new(),
                    files: Vec::new(),
                },
            });
        }
    }

    let report = ConvertReport {
        succeeded: units.iter().filter(|u| u.success).count(),
        failed: units.iter().filter(|u| !u.success).count(),
        labels_converted: units
            .iter()
            .flat_map(|u| &u.labels)
            .filter(|l| l.status == "converted")
            .count(),
        labels_skipped: units
            .iter()
            .flat_map(|u| &u.labels)
            .filter(|l| l.status != "converted")
            .count(),
        units,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&report, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                for unit in &report.units {
                    if let Some(error) = &unit.error {
                        println!("{} {}: {}", "FAILED".red().bold(), unit.input, error);
                        continue;
                    }
                    output::success(&unit.input, cli.format, cli.quiet);
                    for label in &unit.labels {
                        let name = label.name.as_deref().unwrap_or("-");
                        if label.status == "converted" {
                            let tightness = if label.watertight {
                                "watertight".green()
                            } else {
                                "open".yellow()
                            };
                            let mut line = format!(
                                "  {} {} ({}): {} vertices, {} faces, {}",
                                "Label".cyan(),
                                label.label_id,
                                name,
                                label.vertices,
                                label.faces,
                                tightness
                            );
                            if !label.warnings.is_empty() {
                                line.push_str(&format!(" [{}]", label.warnings.join("; ")));
                            }
                            println!("{}", line);
                        } else {
                            println!(
                                "  {} {} ({}): {}",
                                "Label".cyan(),
                                label.label_id,
                                name,
                                label.status.yellow()
                            );
                        }
                    }
                    for file in &unit.files {
                        println!("  {} {}", "Wrote".cyan(), file);
                    }
                }
                println!(
                    "{}: {} succeeded, {} failed, {} label(s) skipped",
                    "Summary".bold(),
                    report.succeeded,
                    report.failed,
                    report.labels_skipped
                );
            }
        }
    }

    Ok(())
}
