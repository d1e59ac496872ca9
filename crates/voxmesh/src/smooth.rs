//! Laplacian smoothing to reduce voxel staircasing.
//!
//! Simple (non-Taubin) smoothing: each pass moves every vertex a fraction of
//! the way toward the centroid of its edge-connected neighbors. Topology is
//! never touched; only positions change.

use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};
use tracing::debug;

use crate::types::Mesh;

/// Default blend factor toward the neighborhood centroid per pass.
pub const DEFAULT_STRENGTH: f64 = 0.5;

/// Build vertex-to-vertex adjacency from the face array.
fn build_vertex_adjacency(mesh: &Mesh) -> HashMap<u32, Vec<u32>> {
    let mut adjacency: HashMap<u32, Vec<u32>> = HashMap::new();

    for face in &mesh.faces {
        for i in 0..3 {
            let v0 = face[i];
            let v1 = face[(i + 1) % 3];
            adjacency.entry(v0).or_default().push(v1);
            adjacency.entry(v1).or_default().push(v0);
        }
    }

    for neighbors in adjacency.values_mut() {
        neighbors.sort_unstable();
        neighbors.dedup();
    }

    adjacency
}

/// Compute per-vertex displacements toward the neighborhood centroid.
fn laplacian_displacements(
    mesh: &Mesh,
    adjacency: &HashMap<u32, Vec<u32>>,
    strength: f64,
) -> Vec<Vector3<f64>> {
    let mut displacements = vec![Vector3::zeros(); mesh.vertices.len()];

    for (vi, v) in mesh.vertices.iter().enumerate() {
        if let Some(neighbors) = adjacency.get(&(vi as u32)) {
            if neighbors.is_empty() {
                continue;
            }

            let centroid: Point3<f64> = Point3::from(
                neighbors
                    .iter()
                    .map(|&ni| mesh.vertices[ni as usize].position.coords)
                    .sum::<Vector3<f64>>()
                    / neighbors.len() as f64,
            );

            displacements[vi] = (centroid - v.position) * strength;
        }
    }

    displacements
}

/// Apply `iterations` passes of Laplacian smoothing with a custom strength.
///
/// Vertex and face counts are identical before and after; `0` iterations
/// returns the mesh unchanged.
pub fn smooth_mesh_with_strength(mut mesh: Mesh, iterations: usize, strength: f64) -> Mesh {
    if iterations == 0 || mesh.is_empty() {
        return mesh;
    }

    // Connectivity never changes, so the adjacency is built once.
    let adjacency = build_vertex_adjacency(&mesh);

    for _ in 0..iterations {
        let displacements = laplacian_displacements(&mesh, &adjacency, strength);
        for (vertex, disp) in mesh.vertices.iter_mut().zip(&displacements) {
            vertex.position += *disp;
        }
    }

    debug!(iterations, strength, "smoothed mesh");
    mesh
}

/// Apply `iterations` passes of Laplacian smoothing with the default strength.
pub fn smooth_mesh(mesh: Mesh, iterations: usize) -> Mesh {
    smooth_mesh_with_strength(mesh, iterations, DEFAULT_STRENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tests::make_unit_cube;

    #[test]
    fn test_zero_iterations_is_noop() {
        let mesh = make_unit_cube();
        let positions: Vec<_> = mesh.vertices.iter().map(|v| v.position).collect();

        let smoothed = smooth_mesh(mesh, 0);
        for (vertex, original) in smoothed.vertices.iter().zip(&positions) {
            assert_eq!(vertex.position, *original);
        }
    }

    #[test]
    fn test_topology_preserved() {
        let mesh = make_unit_cube();
        let faces = mesh.faces.clone();

        let smoothed = smooth_mesh(mesh, 25);
        assert_eq!(smoothed.vertex_count(), 8);
        assert_eq!(smoothed.faces, faces);
    }

    #[test]
    fn test_smoothing_shrinks_cube() {
        // Laplacian smoothing pulls a closed convex surface inward.
        let mesh = make_unit_cube();
        let before = mesh.signed_volume();

        let smoothed = smooth_mesh(mesh, 3);
        let after = smoothed.signed_volume();
        assert!(after > 0.0);
        assert!(after < before, "expected shrinkage, {} -> {}", before, after);
    }

    #[test]
    fn test_vertices_move_toward_neighbors() {
        let mesh = make_unit_cube();
        let before = mesh.vertices[0].position;

        let smoothed = smooth_mesh(mesh, 1);
        assert_ne!(smoothed.vertices[0].position, before);
    }
}
