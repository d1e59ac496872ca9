//! info command - volume dimensions, spacing and label inventory.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use voxmesh::{Volume, VolumeData};

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct LabelInfo {
    id: u32,
    voxels: usize,
}

#[derive(Serialize)]
struct InfoResult {
    input: String,
    dims: [usize; 3],
    spacing: [f64; 3],
    voxel_count: usize,
    dtype: String,
    labels: Vec<LabelInfo>,
}

pub fn run(input: &Path, cli: &Cli) -> Result<()> {
    let volume =
        Volume::load(input).with_context(|| format!("failed to load volume from {:?}", input))?;

    let (dtype, labels) = match &volume.data {
        VolumeData::Labels(data) => {
            // BTreeMap keeps the inventory sorted by label id.
            let mut counts = std::collections::BTreeMap::new();
            for &v in data {
                if v != 0 {
                    *counts.entry(v).or_insert(0) += 1;
                }
            }
            let labels: Vec<LabelInfo> = counts
                .into_iter()
                .map(|(id, voxels)| LabelInfo { id, voxels })
                .collect();
            ("u32".to_string(), labels)
        }
        VolumeData::Scalar(_) => ("f32".to_string(), Vec::new()),
    };

    let result = InfoResult {
        input: input.display().to_string(),
        dims: volume.dims,
        spacing: volume.spacing,
        voxel_count: volume.voxel_count(),
        dtype,
        labels,
    };

    match cli.format {
        OutputFormat::Json => output::print(&result, cli.format, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}: {}", "Volume".cyan(), result.input);
                println!(
                    "  {}: {} x {} x {}",
                    "Dims".cyan(),
                    result.dims[0],
                    result.dims[1],
                    result.dims[2]
                );
                println!(
                    "  {}: {:.3} x {:.3} x {:.3}",
                    "Spacing".cyan(),
                    result.spacing[0],
                    result.spacing[1],
                    result.spacing[2]
                );
                println!("  {}: {} ({})", "Voxels".cyan(), result.voxel_count, result.dtype);
                if result.labels.is_empty() {
                    println!("  {}: none (grayscale volume)", "Labels".cyan());
                } else {
                    println!("  {}:", "Labels".cyan());
                    for label in &result.labels {
                        println!("    {} - {} voxel(s)", label.id, label.voxels);
                    }
                }
            }
        }
    }

    Ok(())
}
