//! Normal consistency and winding order correction.
//!
//! The repair fallback pass: no geometry change, only face orientation. BFS
//! propagation makes shared edges traverse in opposite directions within each
//! connected component, then a global flip corrects an inside-out result.

use std::collections::VecDeque;

use hashbrown::HashSet;
use nalgebra::Vector3;
use tracing::{debug, info};

use crate::adjacency::{MeshAdjacency, edge_key};
use crate::types::Mesh;

/// Make all faces wind consistently, flipping the mesh globally if the
/// result is inside-out. Returns the number of faces flipped.
pub fn fix_winding_order(mesh: &mut Mesh) -> usize {
    if mesh.faces.is_empty() {
        return 0;
    }

    let adjacency = MeshAdjacency::build(&mesh.faces);
    let face_count = mesh.faces.len();

    let mut global_visited: HashSet<u32> = HashSet::new();
    let mut to_flip: HashSet<u32> = HashSet::new();
    let mut component_count = 0;

    for start_face in 0..face_count {
        let start_face = start_face as u32;
        if global_visited.contains(&start_face) {
            continue;
        }

        component_count += 1;
        let mut component_flips: HashSet<u32> = HashSet::new();
        let mut queue: VecDeque<u32> = VecDeque::new();

        queue.push_back(start_face);
        global_visited.insert(start_face);

        while let Some(face_idx) = queue.pop_front() {
            let face = mesh.faces[face_idx as usize];

            for edge_idx in 0..3 {
                let v0 = face[edge_idx];
                let v1 = face[(edge_idx + 1) % 3];

                if let Some(neighbors) = adjacency.edge_to_faces.get(&edge_key(v0, v1)) {
                    for &neighbor_idx in neighbors {
                        if neighbor_idx == face_idx || global_visited.contains(&neighbor_idx) {
                            continue;
                        }
                        global_visited.insert(neighbor_idx);

                        // The neighbor must traverse the shared edge in the
                        // opposite direction; same direction means one of the
                        // two needs flipping.
                        let neighbor_face = mesh.faces[neighbor_idx as usize];
                        let same_direction =
                            edge_direction_in_face(&neighbor_face, v0, v1).unwrap_or_default();

                        let flip_neighbor = if component_flips.contains(&face_idx) {
                            !same_direction
                        } else {
                            same_direction
                        };

                        if flip_neighbor {
                            component_flips.insert(neighbor_idx);
                        }

                        queue.push_back(neighbor_idx);
                    }
                }
            }
        }

        to_flip.extend(component_flips);
    }

    let mut flipped = to_flip.len();
    for &face_idx in &to_flip {
        mesh.faces[face_idx as usize].swap(1, 2);
    }

    // Consistent winding can still be uniformly inward.
    if mesh.is_inside_out() {
        for face in &mut mesh.faces {
            face.swap(1, 2);
        }
        flipped = mesh.faces.len();
        info!("mesh was inside-out, flipped all {} faces", flipped);
    } else if flipped > 0 {
        info!(
            "fixed winding order: flipped {} faces across {} component(s)",
            flipped, component_count
        );
    } else {
        debug!(
            "winding order already consistent across {} component(s)",
            component_count
        );
    }

    flipped
}

/// Check if edge (a, b) appears in face in the same direction (a -> b).
/// Returns Some(true) if same direction, Some(false) if opposite, None if absent.
fn edge_direction_in_face(face: &[u32; 3], a: u32, b: u32) -> Option<bool> {
    for i in 0..3 {
        let v0 = face[i];
        let v1 = face[(i + 1) % 3];

        if v0 == a && v1 == b {
            return Some(true);
        }
        if v0 == b && v1 == a {
            return Some(false);
        }
    }
    None
}

/// Compute area-weighted vertex normals from face normals.
pub fn compute_vertex_normals(mesh: &mut Mesh) {
    let mut normals = vec![Vector3::zeros(); mesh.vertices.len()];

    for face in &mesh.faces {
        let v0 = mesh.vertices[face[0] as usize].position;
        let v1 = mesh.vertices[face[1] as usize].position;
        let v2 = mesh.vertices[face[2] as usize].position;
        // The unnormalized cross product weighs by twice the triangle area.
        let weighted = (v1 - v0).cross(&(v2 - v0));
        for &vi in face {
            normals[vi as usize] += weighted;
        }
    }

    for (vertex, normal) in mesh.vertices.iter_mut().zip(normals) {
        let len = normal.norm();
        vertex.normal = if len > f64::EPSILON {
            Some(normal / len)
        } else {
            None
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vertex;

    #[test]
    fn test_fix_inconsistent_pair() {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.5, 1.0, 0.0));
        mesh.vertices.push(Vertex::from_coords(0.5, -1.0, 0.0));

        mesh.faces.push([0, 1, 2]);
        mesh.faces.push([0, 1, 3]); // same direction on shared edge: wrong

        fix_winding_order(&mut mesh);

        let dir0 = edge_direction_in_face(&mesh.faces[0], 0, 1);
        let dir1 = edge_direction_in_face(&mesh.faces[1], 0, 1);
        match (dir0, dir1) {
            (Some(d0), Some(d1)) => assert_ne!(d0, d1),
            _ => panic!("edge should exist in both faces"),
        }
    }

    #[test]
    fn test_inverted_cube_flipped_outward() {
        let mut mesh = crate::types::tests::make_unit_cube();
        for face in &mut mesh.faces {
            face.swap(1, 2);
        }
        assert!(mesh.is_inside_out());

        fix_winding_order(&mut mesh);
        assert!(!mesh.is_inside_out());
    }

    #[test]
    fn test_consistent_cube_untouched() {
        let mut mesh = crate::types::tests::make_unit_cube();
        let faces = mesh.faces.clone();

        let flipped = fix_winding_order(&mut mesh);
        assert_eq!(flipped, 0);
        assert_eq!(mesh.faces, faces);
    }

    #[test]
    fn test_vertex_normals_point_outward_on_cube() {
        let mut mesh = crate::types::tests::make_unit_cube();
        compute_vertex_normals(&mut mesh);

        // Corner vertex at the origin: averaged normal points into (-,-,-).
        let n = mesh.vertices[0].normal.expect("normal computed");
        assert!(n.x < 0.0 && n.y < 0.0 && n.z < 0.0);
        assert!((n.norm() - 1.0).abs() < 1e-9);
    }
}
