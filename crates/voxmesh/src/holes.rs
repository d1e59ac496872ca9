//! Boundary-loop tracing and automatic hole filling.
//!
//! A hole is a closed chain of boundary edges (edges with exactly one
//! incident face). This module traces those chains into ordered loops and
//! closes them by ear-clipping triangulation. This is the automatic fill the
//! repair pass attempts first, before the cluster-based strategies.

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::adjacency::MeshAdjacency;
use crate::types::{Mesh, Triangle};

/// A boundary loop representing one hole in the mesh.
#[derive(Debug, Clone)]
pub struct BoundaryLoop {
    /// Ordered list of vertex indices forming the loop.
    pub vertices: Vec<u32>,
}

impl BoundaryLoop {
    /// Number of edges (and vertices) in the loop.
    pub fn edge_count(&self) -> usize {
        self.vertices.len()
    }
}

/// Trace boundary edges into ordered closed loops.
///
/// Chains that dead-end (malformed boundaries) or close with fewer than
/// three vertices are dropped with a warning.
pub fn detect_holes(adjacency: &MeshAdjacency) -> Vec<BoundaryLoop> {
    let boundary_edges: Vec<(u32, u32)> = adjacency.boundary_edges().collect();
    trace_loops(&boundary_edges)
}

/// Trace a set of undirected boundary edges into ordered loops.
pub(crate) fn trace_loops(boundary_edges: &[(u32, u32)]) -> Vec<BoundaryLoop> {
    if boundary_edges.is_empty() {
        return Vec::new();
    }

    debug!("found {} boundary edges", boundary_edges.len());

    let mut edge_neighbors: HashMap<u32, Vec<u32>> = HashMap::new();
    for &(a, b) in boundary_edges {
        edge_neighbors.entry(a).or_default().push(b);
        edge_neighbors.entry(b).or_default().push(a);
    }

    let mut visited: HashSet<u32> = HashSet::new();
    let mut loops = Vec::new();

    for &(start, _) in boundary_edges {
        if visited.contains(&start) {
            continue;
        }

        let mut loop_vertices = Vec::new();
        let mut current = start;
        let mut prev: Option<u32> = None;
        let mut closed = false;

        loop {
            visited.insert(current);
            loop_vertices.push(current);

            let neighbors = edge_neighbors
                .get(&current)
                .map(|v| v.as_slice())
                .unwrap_or(&[]);

            let next = neighbors
                .iter()
                .find(|&&n| Some(n) != prev && !visited.contains(&n))
                .or_else(|| {
                    // Allow closing the loop back to the start.
                    neighbors
                        .iter()
                        .find(|&&n| n == start && loop_vertices.len() > 2)
                });

            match next {
                Some(&n) if n == start => {
                    closed = true;
                    break;
                }
                Some(&n) => {
                    prev = Some(current);
                    current = n;
                }
                None => {
                    warn!("boundary chain starting at vertex {} is not closed", start);
                    break;
                }
            }
        }

        if closed && loop_vertices.len() >= 3 {
            loops.push(BoundaryLoop {
                vertices: loop_vertices,
            });
        }
    }

    info!(
        "detected {} hole(s), sizes: {:?}",
        loops.len(),
        loops.iter().map(|l| l.edge_count()).collect::<Vec<_>>()
    );

    loops
}

/// Fill one hole using ear-clipping triangulation.
///
/// Returns the new triangles to append; the mesh itself is not modified.
pub fn fill_hole_ear_clipping(mesh: &Mesh, boundary: &BoundaryLoop) -> Vec<[u32; 3]> {
    let n = boundary.vertices.len();
    if n < 3 {
        return Vec::new();
    }

    let positions: Vec<Point3<f64>> = boundary
        .vertices
        .iter()
        .map(|&idx| mesh.vertices[idx as usize].position)
        .collect();

    let centroid = Point3::from(
        positions.iter().map(|p| p.coords).sum::<Vector3<f64>>() / (n as f64),
    );
    let hole_normal = loop_normal(&positions, &centroid);

    let mut remaining: Vec<usize> = (0..n).collect();
    let mut triangles = Vec::new();

    while remaining.len() > 3 {
        let mut found_ear = false;

        for i in 0..remaining.len() {
            let prev = remaining[(i + remaining.len() - 1) % remaining.len()];
            let curr = remaining[i];
            let next = remaining[(i + 1) % remaining.len()];

            if is_ear(&positions, &remaining, prev, curr, next, &hole_normal) {
                triangles.push([
                    boundary.vertices[prev],
                    boundary.vertices[curr],
                    boundary.vertices[next],
                ]);
                remaining.remove(i);
                found_ear = true;
                break;
            }
        }

        if !found_ear {
            warn!(
                "ear clipping stuck with {} vertices remaining, using fan triangulation",
                remaining.len()
            );
            break;
        }
    }

    if remaining.len() == 3 {
        triangles.push([
            boundary.vertices[remaining[0]],
            boundary.vertices[remaining[1]],
            boundary.vertices[remaining[2]],
        ]);
    } else if remaining.len() > 3 {
        let center = remaining[0];
        for i in 1..remaining.len() - 1 {
            triangles.push([
                boundary.vertices[center],
                boundary.vertices[remaining[i]],
                boundary.vertices[remaining[i + 1]],
            ]);
        }
    }

    debug!(
        "filled hole with {} edges using {} triangles",
        n,
        triangles.len()
    );

    triangles
}

/// Area-vector normal of a loop around its centroid.
pub(crate) fn loop_normal(positions: &[Point3<f64>], centroid: &Point3<f64>) -> Vector3<f64> {
    let mut normal = Vector3::zeros();
    let n = positions.len();

    for i in 0..n {
        let v0 = positions[i] - centroid;
        let v1 = positions[(i + 1) % n] - centroid;
        normal += v0.cross(&v1);
    }

    let len = normal.norm();
    if len > f64::EPSILON {
        normal / len
    } else {
        Vector3::new(0.0, 0.0, 1.0)
    }
}

/// Check if vertex `curr` forms a valid ear of the loop.
fn is_ear(
    positions: &[Point3<f64>],
    remaining: &[usize],
    prev: usize,
    curr: usize,
    next: usize,
    hole_normal: &Vector3<f64>,
) -> bool {
    let p_prev = positions[prev];
    let p_curr = positions[curr];
    let p_next = positions[next];

    let tri = Triangle::new(p_prev, p_curr, p_next);
    let tri_normal = match tri.normal() {
        Some(n) => n,
        None => return false,
    };

    // Concave corners point against the hole normal.
    if tri_normal.dot(hole_normal) < 0.0 {
        return false;
    }

    for &idx in remaining {
        if idx == prev || idx == curr || idx == next {
            continue;
        }
        if point_in_triangle(&positions[idx], &p_prev, &p_curr, &p_next, hole_normal) {
            return false;
        }
    }

    true
}

/// Point-in-triangle test projected onto the plane orthogonal to `normal`.
fn point_in_triangle(
    p: &Point3<f64>,
    v0: &Point3<f64>,
    v1: &Point3<f64>,
    v2: &Point3<f64>,
    normal: &Vector3<f64>,
) -> bool {
    // Drop the axis most aligned with the normal.
    let abs = Vector3::new(normal.x.abs(), normal.y.abs(), normal.z.abs());

    let (p2, a2, b2, c2) = if abs.z >= abs.x && abs.z >= abs.y {
        ((p.x, p.y), (v0.x, v0.y), (v1.x, v1.y), (v2.x, v2.y))
    } else if abs.y >= abs.x {
        ((p.x, p.z), (v0.x, v0.z), (v1.x, v1.z), (v2.x, v2.z))
    } else {
        ((p.y, p.z), (v0.y, v0.z), (v1.y, v1.z), (v2.y, v2.z))
    };

    let sign = |p1: (f64, f64), p2: (f64, f64), p3: (f64, f64)| -> f64 {
        (p1.0 - p3.0) * (p2.1 - p3.1) - (p2.0 - p3.0) * (p1.1 - p3.1)
    };

    let d1 = sign(p2, a2, b2);
    let d2 = sign(p2, b2, c2);
    let d3 = sign(p2, c2, a2);

    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;

    !(has_neg && has_pos)
}

/// Statistics from one automatic fill pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoFillStats {
    /// Holes closed by ear clipping.
    pub filled: usize,
    /// Holes left alone because they exceed the size cap.
    pub skipped_too_large: usize,
    /// Triangles appended to the mesh.
    pub faces_added: usize,
}

/// Fill all holes up to `max_hole_size` vertices, in place.
///
/// Holes are filled independently in parallel; each fill only reads vertex
/// positions and produces new triangles, which are then appended.
pub fn auto_fill_holes(mesh: &mut Mesh, max_hole_size: usize) -> AutoFillStats {
    let adjacency = MeshAdjacency::build(&mesh.faces);
    let holes = detect_holes(&adjacency);

    let (fillable, skipped): (Vec<_>, Vec<_>) = holes
        .into_iter()
        .partition(|hole| hole.edge_count() <= max_hole_size);

    for hole in &skipped {
        warn!(
            "skipping large hole with {} edges (max: {})",
            hole.edge_count(),
            max_hole_size
        );
    }

    let snapshot: &Mesh = mesh;
    let all_new_triangles: Vec<Vec<[u32; 3]>> = fillable
        .par_iter()
        .map(|hole| fill_hole_ear_clipping(snapshot, hole))
        .collect();

    let mut stats = AutoFillStats {
        filled: 0,
        skipped_too_large: skipped.len(),
        faces_added: 0,
    };

    for triangles in all_new_triangles {
        if triangles.is_empty() {
            continue;
        }
        stats.filled += 1;
        stats.faces_added += triangles.len();
        mesh.faces.extend(triangles);
    }

    if stats.filled > 0 {
        info!("auto-filled {} hole(s)", stats.filled);
    }

    stats
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::Vertex;

    /// A box missing its top face (square hole at z = 1).
    pub(crate) fn open_box_mesh() -> Mesh {
        let mut mesh = Mesh::new();

        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0)); // 0
        mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0)); // 1
        mesh.vertices.push(Vertex::from_coords(1.0, 1.0, 0.0)); // 2
        mesh.vertices.push(Vertex::from_coords(0.0, 1.0, 0.0)); // 3
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 1.0)); // 4
        mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 1.0)); // 5
        mesh.vertices.push(Vertex::from_coords(1.0, 1.0, 1.0)); // 6
        mesh.vertices.push(Vertex::from_coords(0.0, 1.0, 1.0)); // 7

        // Bottom
        mesh.faces.push([0, 2, 1]);
        mesh.faces.push([0, 3, 2]);
        // Front
        mesh.faces.push([0, 1, 5]);
        mesh.faces.push([0, 5, 4]);
        // Right
        mesh.faces.push([1, 2, 6]);
        mesh.faces.push([1, 6, 5]);
        // Back
        mesh.faces.push([2, 3, 7]);
        mesh.faces.push([2, 7, 6]);
        // Left
        mesh.faces.push([3, 0, 4]);
        mesh.faces.push([3, 4, 7]);
        // Top face missing

        mesh
    }

    #[test]
    fn test_detect_single_square_hole() {
        let mesh = open_box_mesh();
        let adjacency = MeshAdjacency::build(&mesh.faces);
        let holes = detect_holes(&adjacency);

        assert_eq!(holes.len(), 1);
        assert_eq!(holes[0].edge_count(), 4);
    }

    #[test]
    fn test_watertight_mesh_has_no_holes() {
        let mesh = crate::types::tests::make_unit_cube();
        let adjacency = MeshAdjacency::build(&mesh.faces);
        assert!(detect_holes(&adjacency).is_empty());
    }

    #[test]
    fn test_auto_fill_closes_open_box() {
        let mut mesh = open_box_mesh();
        let initial_faces = mesh.face_count();

        let stats = auto_fill_holes(&mut mesh, 100);
        assert_eq!(stats.filled, 1);
        assert_eq!(stats.skipped_too_large, 0);
        assert!(mesh.face_count() > initial_faces);

        let adjacency = MeshAdjacency::build(&mesh.faces);
        assert!(adjacency.is_watertight());
    }

    #[test]
    fn test_size_cap_skips_hole() {
        let mut mesh = open_box_mesh();
        let initial_faces = mesh.face_count();

        let stats = auto_fill_holes(&mut mesh, 3);
        assert_eq!(stats.filled, 0);
        assert_eq!(stats.skipped_too_large, 1);
        assert_eq!(mesh.face_count(), initial_faces);
    }

    #[test]
    fn test_fill_reduces_boundary_edges() {
        let mut mesh = open_box_mesh();
        let before = MeshAdjacency::build(&mesh.faces).boundary_edge_count();
        assert!(before > 0);

        auto_fill_holes(&mut mesh, 100);
        let after = MeshAdjacency::build(&mesh.faces).boundary_edge_count();
        assert!(after < before);
    }
}
