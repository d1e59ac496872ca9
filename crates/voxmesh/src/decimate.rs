//! Mesh decimation using edge collapse with quadric error metrics.
//!
//! Simplification toward a target face fraction by iteratively collapsing
//! the edge with the lowest quadric error. Decimation is advisory in this
//! pipeline: a result the caller deems unusable is dropped in favor of the
//! input mesh, never an abort.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use hashbrown::{HashMap, HashSet};
use nalgebra::Point3;
use tracing::debug;

use crate::adjacency::{MeshAdjacency, edge_key};
use crate::types::{Mesh, Vertex};

/// Parameters for mesh decimation.
#[derive(Debug, Clone)]
pub struct DecimateParams {
    /// Target number of triangles. If None, uses `target_ratio` instead.
    pub target_triangles: Option<usize>,
    /// Target fraction of triangles to keep, in (0, 1]. Default: 0.5
    pub target_ratio: f64,
    /// Whether to refuse collapsing boundary edges. Default: true
    pub preserve_boundary: bool,
    /// Cost multiplier for boundary edges when `preserve_boundary` is false.
    pub boundary_penalty: f64,
}

impl Default for DecimateParams {
    fn default() -> Self {
        Self {
            target_triangles: None,
            target_ratio: 0.5,
            preserve_boundary: true,
            boundary_penalty: 10.0,
        }
    }
}

impl DecimateParams {
    /// Create params targeting a fraction of the original triangles.
    pub fn with_target_ratio(ratio: f64) -> Self {
        Self {
            target_ratio: ratio.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    /// Create params targeting a specific triangle count.
    pub fn with_target_triangles(count: usize) -> Self {
        Self {
            target_triangles: Some(count),
            ..Default::default()
        }
    }
}

/// Result of mesh decimation.
#[derive(Debug, Clone)]
pub struct DecimateResult {
    /// The decimated mesh.
    pub mesh: Mesh,
    /// Number of triangles in the original mesh.
    pub original_triangles: usize,
    /// Number of triangles in the decimated mesh.
    pub final_triangles: usize,
    /// Number of edge collapses performed.
    pub collapses_performed: usize,
    /// Number of edge collapses rejected (would create non-manifold geometry).
    pub collapses_rejected: usize,
}

impl DecimateResult {
    /// Whether the result is structurally usable as a pipeline stage output.
    ///
    /// A decimation that emptied the mesh or produced out-of-range indices is
    /// reported here rather than panicking, so the caller can skip the stage.
    pub fn is_usable(&self) -> bool {
        !self.mesh.is_empty()
            && self.final_triangles <= self.original_triangles
            && self
                .mesh
                .faces
                .iter()
                .all(|face| face.iter().all(|&i| (i as usize) < self.mesh.vertices.len()))
    }
}

/// Quadric error matrix (4x4 symmetric, stored as the 10-value upper triangle).
#[derive(Debug, Clone, Copy, Default)]
struct Quadric {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
    g: f64,
    h: f64,
    i: f64,
    j: f64,
}

impl Quadric {
    /// Create a quadric from a plane equation (ax + by + cz + d = 0).
    fn from_plane(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self {
            a: a * a,
            b: a * b,
            c: a * c,
            d: a * d,
            e: b * b,
            f: b * c,
            g: b * d,
            h: c * c,
            i: c * d,
            j: d * d,
        }
    }

    fn add(&mut self, other: &Quadric) {
        self.a += other.a;
        self.b += other.b;
        self.c += other.c;
        self.d += other.d;
        self.e += other.e;
        self.f += other.f;
        self.g += other.g;
        self.h += other.h;
        self.i += other.i;
        self.j += other.j;
    }

    /// Evaluate v^T Q v for v = [x, y, z, 1].
    fn evaluate(&self, x: f64, y: f64, z: f64) -> f64 {
        self.a * x * x
            + 2.0 * self.b * x * y
            + 2.0 * self.c * x * z
            + 2.0 * self.d * x
            + self.e * y * y
            + 2.0 * self.f * y * z
            + 2.0 * self.g * y
            + self.h * z * z
            + 2.0 * self.i * z
            + self.j
    }

    /// Point minimizing the error, or None when the 3x3 system is singular.
    fn optimal_point(&self) -> Option<[f64; 3]> {
        let det = self.a * (self.e * self.h - self.f * self.f)
            - self.b * (self.b * self.h - self.f * self.c)
            + self.c * (self.b * self.f - self.e * self.c);

        if det.abs() < 1e-10 {
            return None;
        }

        let inv_det = 1.0 / det;
        let m00 = (self.e * self.h - self.f * self.f) * inv_det;
        let m01 = (self.c * self.f - self.b * self.h) * inv_det;
        let m02 = (self.b * self.f - self.c * self.e) * inv_det;
        let m11 = (self.a * self.h - self.c * self.c) * inv_det;
        let m12 = (self.b * self.c - self.a * self.f) * inv_det;
        let m22 = (self.a * self.e - self.b * self.b) * inv_det;

        let x = m00 * (-self.d) + m01 * (-self.g) + m02 * (-self.i);
        let y = m01 * (-self.d) + m11 * (-self.g) + m12 * (-self.i);
        let z = m02 * (-self.d) + m12 * (-self.g) + m22 * (-self.i);

        Some([x, y, z])
    }
}

/// An edge collapse candidate in the priority queue.
#[derive(Debug, Clone)]
struct EdgeCollapse {
    v1: u32,
    v2: u32,
    cost: f64,
    optimal_pos: [f64; 3],
}

impl PartialEq for EdgeCollapse {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}

impl Eq for EdgeCollapse {}

impl PartialOrd for EdgeCollapse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EdgeCollapse {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering so the BinaryHeap pops the cheapest collapse.
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
    }
}

/// Decimate a mesh using edge collapse with quadric error metrics.
pub fn decimate_mesh(mesh: &Mesh, params: &DecimateParams) -> DecimateResult {
    let original_triangles = mesh.faces.len();

    if original_triangles == 0 {
        return DecimateResult {
            mesh: mesh.clone(),
            original_triangles: 0,
            final_triangles: 0,
            collapses_performed: 0,
            collapses_rejected: 0,
        };
    }

    let target = params
        .target_triangles
        .unwrap_or_else(|| ((original_triangles as f64) * params.target_ratio).round() as usize);

    if original_triangles <= target {
        return DecimateResult {
            mesh: mesh.clone(),
            original_triangles,
            final_triangles: original_triangles,
            collapses_performed: 0,
            collapses_rejected: 0,
        };
    }

    let mut vertices: Vec<Option<Vertex>> = mesh.vertices.iter().cloned().map(Some).collect();
    let mut faces: Vec<Option<[u32; 3]>> = mesh.faces.iter().cloned().map(Some).collect();
    let mut active_faces = original_triangles;

    let adj = MeshAdjacency::build(&mesh.faces);
    let mut quadrics = compute_vertex_quadrics(mesh);
    let boundary_edges: HashSet<(u32, u32)> = adj.boundary_edges().collect();

    let mut heap = build_collapse_queue(mesh, &quadrics, &boundary_edges, params);
    let mut vertex_remap: HashMap<u32, u32> = HashMap::new();

    let mut collapses_performed = 0;
    let mut collapses_rejected = 0;

    while active_faces > target {
        let Some(collapse) = heap.pop() else {
            break;
        };

        let v1 = resolve_vertex(collapse.v1, &vertex_remap);
        let v2 = resolve_vertex(collapse.v2, &vertex_remap);

        // Stale queue entry: endpoints already merged away.
        if v1 == v2 || vertices[v1 as usize].is_none() || vertices[v2 as usize].is_none() {
            continue;
        }

        if params.preserve_boundary && boundary_edges.contains(&edge_key(v1, v2)) {
            collapses_rejected += 1;
            continue;
        }

        if !is_collapse_valid(&faces, v1, v2) {
            collapses_rejected += 1;
            continue;
        }

        // Merge v2 into v1 at the optimal position.
        if let Some(v) = vertices[v1 as usize].as_mut() {
            v.position = Point3::new(
                collapse.optimal_pos[0],
                collapse.optimal_pos[1],
                collapse.optimal_pos[2],
            );
        }

        let q2 = quadrics[v2 as usize];
        quadrics[v1 as usize].add(&q2);

        vertices[v2 as usize] = None;
        vertex_remap.insert(v2, v1);

        for face_opt in faces.iter_mut() {
            if let Some(face) = face_opt {
                for idx in face.iter_mut() {
                    *idx = resolve_vertex(*idx, &vertex_remap);
                }
                if face[0] == face[1] || face[1] == face[2] || face[0] == face[2] {
                    *face_opt = None;
                    active_faces -= 1;
                }
            }
        }

        collapses_performed += 1;

        requeue_vertex_edges(
            v1,
            &vertices,
            &faces,
            &quadrics,
            &boundary_edges,
            params,
            &mut heap,
        );
    }

    let final_mesh = build_final_mesh(mesh, &vertices, &faces);

    debug!(
        original = original_triangles,
        remaining = active_faces,
        collapses = collapses_performed,
        rejected = collapses_rejected,
        "decimation finished"
    );

    DecimateResult {
        mesh: final_mesh,
        original_triangles,
        final_triangles: active_faces,
        collapses_performed,
        collapses_rejected,
    }
}

/// Sum the face-plane quadrics onto each incident vertex.
fn compute_vertex_quadrics(mesh: &Mesh) -> Vec<Quadric> {
    let mut quadrics = vec![Quadric::default(); mesh.vertices.len()];

    for (tri, face) in mesh.triangles().zip(&mesh.faces) {
        let Some(normal) = tri.normal() else {
            continue;
        };
        let d = -(normal.x * tri.v0.x + normal.y * tri.v0.y + normal.z * tri.v0.z);
        let q = Quadric::from_plane(normal.x, normal.y, normal.z, d);

        for &vi in face {
            quadrics[vi as usize].add(&q);
        }
    }

    quadrics
}

fn collapse_for_edge(
    v1: u32,
    v2: u32,
    p1: &Point3<f64>,
    p2: &Point3<f64>,
    quadrics: &[Quadric],
    boundary_edges: &HashSet<(u32, u32)>,
    params: &DecimateParams,
) -> Option<EdgeCollapse> {
    let edge = edge_key(v1, v2);

    if params.preserve_boundary && boundary_edges.contains(&edge) {
        return None;
    }

    let mut combined = quadrics[v1 as usize];
    combined.add(&quadrics[v2 as usize]);

    let midpoint = [
        (p1.x + p2.x) / 2.0,
        (p1.y + p2.y) / 2.0,
        (p1.z + p2.z) / 2.0,
    ];
    let optimal_pos = combined.optimal_point().unwrap_or(midpoint);

    let mut cost = combined.evaluate(optimal_pos[0], optimal_pos[1], optimal_pos[2]);
    if boundary_edges.contains(&edge) {
        cost *= params.boundary_penalty;
    }

    Some(EdgeCollapse {
        v1,
        v2,
        cost,
        optimal_pos,
    })
}

fn build_collapse_queue(
    mesh: &Mesh,
    quadrics: &[Quadric],
    boundary_edges: &HashSet<(u32, u32)>,
    params: &DecimateParams,
) -> BinaryHeap<EdgeCollapse> {
    let mut heap = BinaryHeap::new();
    let mut seen_edges = HashSet::new();

    for face in &mesh.faces {
        for i in 0..3 {
            let v1 = face[i];
            let v2 = face[(i + 1) % 3];
            if !seen_edges.insert(edge_key(v1, v2)) {
                continue;
            }

            if let Some(collapse) = collapse_for_edge(
                v1,
                v2,
                &mesh.vertices[v1 as usize].position,
                &mesh.vertices[v2 as usize].position,
                quadrics,
                boundary_edges,
                params,
            ) {
                heap.push(collapse);
            }
        }
    }

    heap
}

/// Follow the remap chain to the surviving vertex.
fn resolve_vertex(v: u32, remap: &HashMap<u32, u32>) -> u32 {
    let mut current = v;
    while let Some(&next) = remap.get(&current) {
        current = next;
    }
    current
}

/// A collapse is manifold-safe when the endpoints share at most two
/// neighbors (the apexes of the two triangles flanking the edge).
fn is_collapse_valid(faces: &[Option<[u32; 3]>], v1: u32, v2: u32) -> bool {
    let mut neighbors_v1 = HashSet::new();
    let mut neighbors_v2 = HashSet::new();

    for face in faces.iter().flatten() {
        if face.contains(&v1) {
            for &vi in face {
                if vi != v1 {
                    neighbors_v1.insert(vi);
                }
            }
        }
        if face.contains(&v2) {
            for &vi in face {
                if vi != v2 {
                    neighbors_v2.insert(vi);
                }
            }
        }
    }

    neighbors_v1.intersection(&neighbors_v2).count() <= 2
}

/// Re-queue edges around a merged vertex with refreshed costs.
fn requeue_vertex_edges(
    v: u32,
    vertices: &[Option<Vertex>],
    faces: &[Option<[u32; 3]>],
    quadrics: &[Quadric],
    boundary_edges: &HashSet<(u32, u32)>,
    params: &DecimateParams,
    heap: &mut BinaryHeap<EdgeCollapse>,
) {
    let mut neighbors = HashSet::new();
    for face in faces.iter().flatten() {
        if face.contains(&v) {
            for &vi in face {
                if vi != v && vertices[vi as usize].is_some() {
                    neighbors.insert(vi);
                }
            }
        }
    }

    let Some(v_vert) = vertices[v as usize].as_ref() else {
        return;
    };

    for &neighbor in &neighbors {
        let Some(n_vert) = vertices[neighbor as usize].as_ref() else {
            continue;
        };

        if let Some(collapse) = collapse_for_edge(
            v,
            neighbor,
            &v_vert.position,
            &n_vert.position,
            quadrics,
            boundary_edges,
            params,
        ) {
            heap.push(collapse);
        }
    }
}

/// Compact the surviving vertices and faces into a fresh mesh.
fn build_final_mesh(original: &Mesh, vertices: &[Option<Vertex>], faces: &[Option<[u32; 3]>]) -> Mesh {
    let mut old_to_new: HashMap<u32, u32> = HashMap::new();
    let mut result = Mesh::new();
    result.metadata = original.metadata.clone();

    for face in faces.iter().flatten() {
        let mapped = face.map(|old_idx| {
            *old_to_new.entry(old_idx).or_insert_with(|| {
                let new_idx = result.vertices.len() as u32;
                let vertex = vertices[old_idx as usize]
                    .clone()
                    .unwrap_or_else(|| original.vertices[old_idx as usize].clone());
                result.vertices.push(vertex);
                new_idx
            })
        });
        result.faces.push(mapped);
    }

    result.refresh_watertight();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::tests::sphere_volume;
    use crate::extract::extract_label;

    #[test]
    fn test_empty_mesh() {
        let result = decimate_mesh(&Mesh::new(), &DecimateParams::default());
        assert_eq!(result.final_triangles, 0);
        assert_eq!(result.collapses_performed, 0);
    }

    #[test]
    fn test_already_below_target() {
        let mesh = crate::types::tests::make_unit_cube();
        let result = decimate_mesh(&mesh, &DecimateParams::with_target_triangles(100));
        assert_eq!(result.final_triangles, 12);
        assert_eq!(result.collapses_performed, 0);
        assert!(result.is_usable());
    }

    #[test]
    fn test_sphere_halves_face_count() {
        let volume = sphere_volume(24, 8.0, 1);
        let mesh = extract_label(&volume, 1).unwrap();
        let original = mesh.face_count();
        assert!(original > 100);

        let result = decimate_mesh(&mesh, &DecimateParams::with_target_ratio(0.5));
        assert!(result.is_usable());
        assert!(result.final_triangles <= original);

        // Within 10% of the requested fraction.
        let target = original as f64 * 0.5;
        assert!(
            (result.final_triangles as f64) <= target * 1.10,
            "final {} vs target {}",
            result.final_triangles,
            target
        );
        assert_eq!(result.mesh.face_count(), result.final_triangles);
    }

    #[test]
    fn test_indices_renumbered_densely() {
        let volume = sphere_volume(16, 5.0, 1);
        let mesh = extract_label(&volume, 1).unwrap();
        let result = decimate_mesh(&mesh, &DecimateParams::with_target_ratio(0.4));

        for face in &result.mesh.faces {
            for &idx in face {
                assert!((idx as usize) < result.mesh.vertex_count());
            }
        }
    }

    #[test]
    fn test_metadata_carried_through() {
        let volume = sphere_volume(16, 5.0, 7);
        let mesh = extract_label(&volume, 7).unwrap();
        let result = decimate_mesh(&mesh, &DecimateParams::with_target_ratio(0.5));
        assert_eq!(result.mesh.metadata.label_id, Some(7));
    }
}
