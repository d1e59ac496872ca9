//! Mesh export: PLY files with per-vertex color, batch naming, merging.
//!
//! PLY is the interchange format here because it carries per-vertex color
//! natively and is understood by scanning and visualization tools (MeshLab,
//! PCL, most viewers). Output is ASCII for maximum compatibility.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{VoxError, VoxResult};
use crate::types::{Mesh, VertexColor};

/// File name of the combined multi-label mesh.
pub const COMBINED_FILE_STEM: &str = "all";

/// Sanitize a label name into a file stem: alphanumerics, space, hyphen and
/// underscore survive, spaces become underscores, everything else is dropped.
pub fn sanitize_label_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .map(|c| if c == ' ' { '_' } else { c })
        .collect();

    if cleaned.is_empty() {
        "label".to_string()
    } else {
        cleaned
    }
}

/// Save a mesh to an ASCII PLY file with positions, optional normals and
/// optional per-vertex colors.
pub fn save_ply(mesh: &Mesh, path: &Path) -> VoxResult<()> {
    use ply_rs::ply::{
        Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    };
    use ply_rs::writer::Writer;

    debug!("saving mesh to {:?} (PLY ASCII format)", path);

    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;

    let has_normals = mesh.vertices.iter().any(|v| v.normal.is_some());
    let has_colors = mesh.vertices.iter().any(|v| v.color.is_some());

    let mut vertex_def = ElementDef::new("vertex".to_string());
    vertex_def.properties.add(PropertyDef::new(
        "x".to_string(),
        PropertyType::Scalar(ScalarType::Float),
    ));
    vertex_def.properties.add(PropertyDef::new(
        "y".to_string(),
        PropertyType::Scalar(ScalarType::Float),
    ));
    vertex_def.properties.add(PropertyDef::new(
        "z".to_string(),
        PropertyType::Scalar(ScalarType::Float),
    ));
    if has_normals {
        vertex_def.properties.add(PropertyDef::new(
            "nx".to_string(),
            PropertyType::Scalar(ScalarType::Float),
        ));
        vertex_def.properties.add(PropertyDef::new(
            "ny".to_string(),
            PropertyType::Scalar(ScalarType::Float),
        ));
        vertex_def.properties.add(PropertyDef::new(
            "nz".to_string(),
            PropertyType::Scalar(ScalarType::Float),
        ));
    }
    if has_colors {
        vertex_def.properties.add(PropertyDef::new(
            "red".to_string(),
            PropertyType::Scalar(ScalarType::UChar),
        ));
        vertex_def.properties.add(PropertyDef::new(
            "green".to_string(),
            PropertyType::Scalar(ScalarType::UChar),
        ));
        vertex_def.properties.add(PropertyDef::new(
            "blue".to_string(),
            PropertyType::Scalar(ScalarType::UChar),
        ));
    }
    vertex_def.count = mesh.vertices.len();
    ply.header.elements.add(vertex_def);

    let mut face_def = ElementDef::new("face".to_string());
    face_def.properties.add(PropertyDef::new(
        "vertex_indices".to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::Int),
    ));
    face_def.count = mesh.faces.len();
    ply.header.elements.add(face_def);

    let mut vertices_payload: Vec<DefaultElement> = Vec::with_capacity(mesh.vertices.len());
    for v in &mesh.vertices {
        let mut element = DefaultElement::new();
        element.insert("x".to_string(), Property::Float(v.position.x as f32));
        element.insert("y".to_string(), Property::Float(v.position.y as f32));
        element.insert("z".to_string(), Property::Float(v.position.z as f32));
        if has_normals {
            let n = v.normal.unwrap_or_else(|| nalgebra::Vector3::new(0.0, 0.0, 0.0));
            element.insert("nx".to_string(), Property::Float(n.x as f32));
            element.insert("ny".to_string(), Property::Float(n.y as f32));
            element.insert("nz".to_string(), Property::Float(n.z as f32));
        }
        if has_colors {
            let c = v.color.unwrap_or(VertexColor::new(255, 255, 255));
            element.insert("red".to_string(), Property::UChar(c.r));
            element.insert("green".to_string(), Property::UChar(c.g));
            element.insert("blue".to_string(), Property::UChar(c.b));
        }
        vertices_payload.push(element);
    }
    ply.payload.insert("vertex".to_string(), vertices_payload);

    let mut faces_payload: Vec<DefaultElement> = Vec::with_capacity(mesh.faces.len());
    for face in &mesh.faces {
        let mut element = DefaultElement::new();
        element.insert(
            "vertex_indices".to_string(),
            Property::ListInt(vec![face[0] as i32, face[1] as i32, face[2] as i32]),
        );
        faces_payload.push(element);
    }
    ply.payload.insert("face".to_string(), faces_payload);

    ply.make_consistent().map_err(|e| VoxError::IoWrite {
        path: path.to_path_buf(),
        source: std::io::Error::other(format!("PLY consistency error: {:?}", e)),
    })?;

    let file = File::create(path).map_err(|e| VoxError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);

    let ply_writer = Writer::new();
    ply_writer
        .write_ply(&mut writer, &mut ply)
        .map_err(|e| VoxError::IoWrite {
            path: path.to_path_buf(),
            source: std::io::Error::other(format!("PLY write error: {:?}", e)),
        })?;

    writer.flush().map_err(|e| VoxError::io_write(path, e))?;

    info!(
        "saved {} vertices and {} faces to {:?}",
        mesh.vertices.len(),
        mesh.faces.len(),
        path
    );

    Ok(())
}

/// Concatenate meshes into one, adjusting face indices by the running vertex
/// offset. Vertex attributes (colors, normals) are preserved as-is.
pub fn merge_meshes(meshes: &[Mesh]) -> Mesh {
    let total_vertices = meshes.iter().map(|m| m.vertex_count()).sum();
    let total_faces = meshes.iter().map(|m| m.face_count()).sum();
    let mut merged = Mesh::with_capacity(total_vertices, total_faces);

    let mut vertex_offset = 0u32;
    for mesh in meshes {
        merged.vertices.extend(mesh.vertices.iter().cloned());
        for face in &mesh.faces {
            merged.faces.push([
                face[0] + vertex_offset,
                face[1] + vertex_offset,
                face[2] + vertex_offset,
            ]);
        }
        vertex_offset = merged.vertices.len() as u32;
    }

    merged.metadata.label_name = Some(COMBINED_FILE_STEM.to_string());
    merged.refresh_watertight();
    merged
}

/// File stem for one labeled mesh.
fn label_file_stem(mesh: &Mesh) -> String {
    match (&mesh.metadata.label_name, mesh.metadata.label_id) {
        (Some(name), _) => sanitize_label_filename(name),
        (None, Some(id)) => format!("label_{}", id),
        (None, None) => "label".to_string(),
    }
}

/// Write one mesh file per label plus the combined file.
///
/// `meshes` must already be in ascending label-id order; the combined file is
/// their concatenation in that order, so output is deterministic regardless
/// of which label finished processing first. Returns the written paths,
/// combined file last.
pub fn export_batch(meshes: &[Mesh], out_dir: &Path) -> VoxResult<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(meshes.len() + 1);

    for mesh in meshes {
        let path = out_dir.join(format!("{}.ply", label_file_stem(mesh)));
        save_ply(mesh, &path)?;
        written.push(path);
    }

    let combined = merge_meshes(meshes);
    let combined_path = out_dir.join(format!("{}.ply", COMBINED_FILE_STEM));
    save_ply(&combined, &combined_path)?;
    written.push(combined_path);

    Ok(written)
}

/// Write exactly one mesh file, for single-label (threshold) mode.
pub fn export_single(mesh: &Mesh, out_dir: &Path) -> VoxResult<PathBuf> {
    let path = out_dir.join(format!("{}.ply", label_file_stem(mesh)));
    save_ply(mesh, &path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Vertex, VertexColor};
    use tempfile::tempdir;

    fn colored_triangle(offset: f64, color: VertexColor) -> Mesh {
        let mut mesh = Mesh::new();
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)] {
            let mut v = Vertex::from_coords(x + offset, y, 0.0);
            v.color = Some(color);
            mesh.vertices.push(v);
        }
        mesh.faces.push([0, 1, 2]);
        mesh
    }

    #[test]
    fn test_sanitize_label_filename() {
        assert_eq!(sanitize_label_filename("Left Lung"), "Left_Lung");
        assert_eq!(sanitize_label_filename("aorta/arch:v2"), "aortaarchv2");
        assert_eq!(sanitize_label_filename("t-12_b"), "t-12_b");
        assert_eq!(sanitize_label_filename("///"), "label");
    }

    #[test]
    fn test_merge_adjusts_indices_and_keeps_colors() {
        let red = VertexColor::new(255, 0, 0);
        let blue = VertexColor::new(0, 0, 255);
        let a = colored_triangle(0.0, red);
        let b = colored_triangle(10.0, blue);

        let merged = merge_meshes(&[a.clone(), b.clone()]);
        assert_eq!(merged.vertex_count(), a.vertex_count() + b.vertex_count());
        assert_eq!(merged.face_count(), a.face_count() + b.face_count());
        assert_eq!(merged.faces[1], [3, 4, 5]);
        assert_eq!(merged.vertices[0].color, Some(red));
        assert_eq!(merged.vertices[3].color, Some(blue));
    }

    #[test]
    fn test_save_ply_writes_color_properties() {
        let mesh = colored_triangle(0.0, VertexColor::new(9, 8, 7));
        let dir = tempdir().unwrap();
        let path = dir.path().join("tri.ply");
        save_ply(&mesh, &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("ply"));
        assert!(contents.contains("element vertex 3"));
        assert!(contents.contains("element face 1"));
        assert!(contents.contains("property uchar red"));
    }

    #[test]
    fn test_export_batch_file_count() {
        let mut a = colored_triangle(0.0, VertexColor::new(255, 0, 0));
        a.metadata.label_id = Some(1);
        a.metadata.label_name = Some("left lung".to_string());
        let mut b = colored_triangle(5.0, VertexColor::new(0, 255, 0));
        b.metadata.label_id = Some(2);

        let dir = tempdir().unwrap();
        let written = export_batch(&[a, b], dir.path()).unwrap();

        // One file per label plus the combined file.
        assert_eq!(written.len(), 3);
        assert!(dir.path().join("left_lung.ply").exists());
        assert!(dir.path().join("label_2.ply").exists());
        assert!(dir.path().join("all.ply").exists());
    }

    #[test]
    fn test_export_single_writes_one_file() {
        let mut mesh = colored_triangle(0.0, VertexColor::new(1, 2, 3));
        mesh.metadata.label_name = Some("segmentation".to_string());

        let dir = tempdir().unwrap();
        let path = export_single(&mesh, dir.path()).unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
