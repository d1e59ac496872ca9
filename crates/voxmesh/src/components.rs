//! Connected component analysis and speckle removal.
//!
//! Marching over a voxel mask can leave isolated slivers of geometry next to
//! the real surface. This module splits a mesh into edge-connected pieces and
//! keeps the dominant one.

use std::cmp::Reverse;

use hashbrown::HashMap;
use tracing::{debug, info};

use crate::adjacency::MeshAdjacency;
use crate::types::Mesh;

/// Result of connected component analysis.
#[derive(Debug, Clone)]
pub struct ComponentAnalysis {
    /// Number of connected components found.
    pub component_count: usize,
    /// Face indices for each component, sorted by size (largest first,
    /// ties broken by first-encountered face).
    pub components: Vec<Vec<u32>>,
}

impl ComponentAnalysis {
    /// Check if the mesh is fully connected (single component).
    pub fn is_connected(&self) -> bool {
        self.component_count == 1
    }

    /// Face count of the largest component.
    pub fn largest_size(&self) -> usize {
        self.components.first().map(|c| c.len()).unwrap_or(0)
    }
}

/// Find all connected components in a mesh.
///
/// Flood fill over faces; two faces are connected when they share an edge.
pub fn find_connected_components(mesh: &Mesh) -> ComponentAnalysis {
    if mesh.faces.is_empty() {
        return ComponentAnalysis {
            component_count: 0,
            components: Vec::new(),
        };
    }

    let adjacency = MeshAdjacency::build(&mesh.faces);
    let face_count = mesh.faces.len();

    let mut face_neighbors: Vec<Vec<u32>> = vec![Vec::new(); face_count];
    for faces in adjacency.edge_to_faces.values() {
        if faces.len() == 2 {
            let (f0, f1) = (faces[0], faces[1]);
            face_neighbors[f0 as usize].push(f1);
            face_neighbors[f1 as usize].push(f0);
        }
    }

    let mut visited = vec![false; face_count];
    let mut components: Vec<Vec<u32>> = Vec::new();

    for start_face in 0..face_count {
        if visited[start_face] {
            continue;
        }

        let mut component = Vec::new();
        let mut queue = vec![start_face as u32];
        visited[start_face] = true;

        while let Some(face_idx) = queue.pop() {
            component.push(face_idx);
            for &neighbor in &face_neighbors[face_idx as usize] {
                if !visited[neighbor as usize] {
                    visited[neighbor as usize] = true;
                    queue.push(neighbor);
                }
            }
        }

        components.push(component);
    }

    // Stable sort keeps first-encountered order among equal sizes.
    components.sort_by_key(|c| Reverse(c.len()));

    let component_count = components.len();
    if component_count > 1 {
        debug!(
            "component sizes: {:?}",
            components.iter().map(|c| c.len()).collect::<Vec<_>>()
        );
    }

    ComponentAnalysis {
        component_count,
        components,
    }
}

/// Build a standalone mesh from a subset of face indices, renumbering
/// vertices densely in first-use order.
fn extract_faces(mesh: &Mesh, face_indices: &[u32]) -> Mesh {
    let mut old_to_new: HashMap<u32, u32> = HashMap::new();
    let mut result = Mesh::new();
    result.metadata = mesh.metadata.clone();

    for &face_idx in face_indices {
        let face = &mesh.faces[face_idx as usize];
        let mapped = face.map(|old_idx| {
            *old_to_new.entry(old_idx).or_insert_with(|| {
                let new_idx = result.vertices.len() as u32;
                result.vertices.push(mesh.vertices[old_idx as usize].clone());
                new_idx
            })
        });
        result.faces.push(mapped);
    }

    result
}

/// Split a mesh into separate meshes, one per connected component,
/// sorted largest first.
pub fn split_into_components(mesh: &Mesh) -> Vec<Mesh> {
    let analysis = find_connected_components(mesh);

    if analysis.component_count <= 1 {
        return vec![mesh.clone()];
    }

    analysis
        .components
        .iter()
        .map(|faces| extract_faces(mesh, faces))
        .collect()
}

/// Keep only the dominant connected component (most faces, ties broken by
/// first encountered). Returns the cleaned mesh and how many components were
/// discarded.
pub fn keep_largest_component(mesh: Mesh) -> (Mesh, usize) {
    let analysis = find_connected_components(&mesh);

    if analysis.component_count <= 1 {
        return (mesh, 0);
    }

    let removed = analysis.component_count - 1;
    info!(
        "keeping largest component ({} faces), dropping {} smaller piece(s)",
        analysis.largest_size(),
        removed
    );

    let mut largest = extract_faces(&mesh, &analysis.components[0]);
    largest.refresh_watertight();
    (largest, removed)
}
