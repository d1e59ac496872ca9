//! Boundary repair: detect open boundary loops and close them.
//!
//! The repair pass runs a fixed chain over one mesh: an already-watertight
//! mesh is returned untouched; otherwise an automatic ear-clipping fill is
//! attempted, remaining boundary vertices are clustered into distinct holes,
//! each hole small enough is closed with the requested strategy, and a final
//! normal-consistency pass runs when watertightness was still not reached.
//! Every transition is recorded as a [`RepairStep`] so the chain can be
//! audited from the outcome instead of reconstructed from logs.
//!
//! Failure is always local: a hole whose fill cannot be constructed (for
//! example a degenerate convex hull over a near-coplanar loop) is skipped and
//! the remaining holes are still processed. The terminal state is best-effort
//! by design and never an error.

use hashbrown::HashSet;
use nalgebra::{Point3, Vector3};
use parry3d_f64::transformation::try_convex_hull;
use tracing::{debug, info, warn};

use crate::adjacency::MeshAdjacency;
use crate::holes::{self, AutoFillStats, trace_loops};
use crate::types::{Mesh, Triangle};
use crate::winding::fix_winding_order;

/// Strategy for triangulating one boundary loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoleFillMethod {
    /// Triangulated convex hull of the loop points, oriented outward.
    Convex,
    /// Fan triangulation from the loop's first vertex. Assumes a roughly
    /// planar, convex loop; adequate for clipped-plane holes.
    Planar,
}

/// Parameters for boundary repair.
#[derive(Debug, Clone)]
pub struct RepairParams {
    /// Hole triangulation strategy.
    pub method: HoleFillMethod,
    /// Holes with more vertices than this are skipped, not failed.
    pub max_hole_size: usize,
}

impl Default for RepairParams {
    fn default() -> Self {
        Self {
            method: HoleFillMethod::Convex,
            max_hole_size: 500,
        }
    }
}

/// Fractions of the bounding-box diagonal swept as clustering radii.
const RADIUS_FRACTIONS: [f64; 5] = [0.02, 0.05, 0.10, 0.15, 0.20];

/// One recorded transition of the repair chain.
#[derive(Debug, Clone)]
pub enum RepairStep {
    /// Input mesh had no boundary edges; nothing was done.
    AlreadyWatertight,
    /// Automatic ear-clipping fill over traced loops.
    AutoFill {
        filled: usize,
        skipped_too_large: usize,
        faces_added: usize,
    },
    /// Boundary edges and their incident vertices were collected.
    BoundariesDetected {
        boundary_edges: usize,
        boundary_vertices: usize,
    },
    /// Boundary vertices grouped into distinct holes.
    LoopsClustered {
        radius: f64,
        loops: usize,
        discarded_small: usize,
    },
    /// One hole closed with the configured method.
    LoopFilled {
        method: HoleFillMethod,
        vertices: usize,
        faces_added: usize,
    },
    /// One hole left open because it exceeds `max_hole_size`.
    LoopSkippedTooLarge { vertices: usize },
    /// One hole left open because its fill could not be constructed.
    LoopSkippedDegenerate { vertices: usize },
    /// Final normal-consistency pass (winding only, no geometry change).
    WindingFallback { faces_flipped: usize },
}

/// Result of one repair run.
#[derive(Debug)]
pub struct RepairOutcome {
    /// The repaired (or best-effort) mesh, watertightness recomputed.
    pub mesh: Mesh,
    /// The chain of transitions actually taken.
    pub steps: Vec<RepairStep>,
    /// Holes closed across the auto and clustered fill stages.
    pub loops_filled: usize,
    /// Holes left open due to the size cap.
    pub loops_skipped: usize,
    /// Holes left open due to degenerate fills.
    pub degenerate_loops: usize,
}

impl RepairOutcome {
    /// Whether the terminal mesh is watertight.
    pub fn is_watertight(&self) -> bool {
        self.mesh.metadata.is_watertight
    }
}

/// Run the repair chain on one mesh.
pub fn close_boundaries(mut mesh: Mesh, params: &RepairParams) -> RepairOutcome {
    let mut steps = Vec::new();
    let mut loops_filled = 0;
    let mut loops_skipped = 0;
    let mut degenerate_loops = 0;

    mesh.refresh_watertight();
    if mesh.metadata.is_watertight {
        debug!("mesh already watertight, repair is a no-op");
        steps.push(RepairStep::AlreadyWatertight);
        return RepairOutcome {
            mesh,
            steps,
            loops_filled,
            loops_skipped,
            degenerate_loops,
        };
    }

    // Automatic fill over cleanly traced loops.
    let AutoFillStats {
        filled,
        skipped_too_large,
        faces_added,
    } = holes::auto_fill_holes(&mut mesh, params.max_hole_size);
    loops_filled += filled;
    loops_skipped += skipped_too_large;
    steps.push(RepairStep::AutoFill {
        filled,
        skipped_too_large,
        faces_added,
    });

    mesh.refresh_watertight();
    if mesh.metadata.is_watertight {
        info!("auto fill reached watertightness");
        return RepairOutcome {
            mesh,
            steps,
            loops_filled,
            loops_skipped,
            degenerate_loops,
        };
    }

    // Collect what is still open.
    let adjacency = MeshAdjacency::build(&mesh.faces);
    let boundary_edges: Vec<(u32, u32)> = adjacency.boundary_edges().collect();
    let boundary_vertices: Vec<u32> = {
        let mut set = HashSet::new();
        for &(a, b) in &boundary_edges {
            set.insert(a);
            set.insert(b);
        }
        let mut v: Vec<u32> = set.into_iter().collect();
        v.sort_unstable();
        v
    };
    steps.push(RepairStep::BoundariesDetected {
        boundary_edges: boundary_edges.len(),
        boundary_vertices: boundary_vertices.len(),
    });

    // Group boundary vertices into distinct holes.
    let positions: Vec<Point3<f64>> = boundary_vertices
        .iter()
        .map(|&v| mesh.vertices[v as usize].position)
        .collect();
    let (radius, clusters, discarded_small) =
        cluster_boundary_vertices(&positions, mesh.bounding_diagonal());
    steps.push(RepairStep::LoopsClustered {
        radius,
        loops: clusters.len(),
        discarded_small,
    });

    let mesh_centroid = mesh.centroid();
    for cluster in &clusters {
        let loop_vertices: Vec<u32> = cluster.iter().map(|&i| boundary_vertices[i]).collect();

        if loop_vertices.len() > params.max_hole_size {
            warn!(
                "skipping hole with {} vertices (max: {})",
                loop_vertices.len(),
                params.max_hole_size
            );
            loops_skipped += 1;
            steps.push(RepairStep::LoopSkippedTooLarge {
                vertices: loop_vertices.len(),
            });
            continue;
        }

        let fill = match params.method {
            HoleFillMethod::Convex => fill_loop_convex(&mesh, &loop_vertices, &mesh_centroid),
            HoleFillMethod::Planar => fill_loop_planar(&loop_vertices, &boundary_edges),
        };

        match fill {
            Some(new_faces) if !new_faces.is_empty() => {
                loops_filled += 1;
                steps.push(RepairStep::LoopFilled {
                    method: params.method,
                    vertices: loop_vertices.len(),
                    faces_added: new_faces.len(),
                });
                mesh.faces.extend(new_faces);
            }
            _ => {
                warn!(
                    "could not construct a {} fill for hole with {} vertices, leaving open",
                    match params.method {
                        HoleFillMethod::Convex => "convex",
                        HoleFillMethod::Planar => "planar",
                    },
                    loop_vertices.len()
                );
                degenerate_loops += 1;
                steps.push(RepairStep::LoopSkippedDegenerate {
                    vertices: loop_vertices.len(),
                });
            }
        }
    }

    mesh.refresh_watertight();
    if !mesh.metadata.is_watertight {
        // Best-effort terminal state: correct winding, accept the result.
        let faces_flipped = fix_winding_order(&mut mesh);
        steps.push(RepairStep::WindingFallback { faces_flipped });
        mesh.refresh_watertight();
    }

    info!(
        watertight = mesh.metadata.is_watertight,
        loops_filled, loops_skipped, degenerate_loops, "repair chain finished"
    );

    RepairOutcome {
        mesh,
        steps,
        loops_filled,
        loops_skipped,
        degenerate_loops,
    }
}

/// Group points into density clusters with an adaptive radius sweep.
///
/// Several radii proportional to the mesh diagonal are tried; the radius
/// producing the most clusters of at least three vertices wins (more
/// clusters is treated as a better separation of distinct holes; first
/// radius wins ties). Returns the chosen radius, the clusters, and how many
/// undersized clusters were discarded.
pub(crate) fn cluster_boundary_vertices(
    positions: &[Point3<f64>],
    diagonal: f64,
) -> (f64, Vec<Vec<usize>>, usize) {
    let mut best_radius = RADIUS_FRACTIONS[0] * diagonal;
    let mut best: Option<(Vec<Vec<usize>>, usize)> = None;

    for &fraction in &RADIUS_FRACTIONS {
        let radius = fraction * diagonal;
        let raw = cluster_by_radius(positions, radius);
        let (kept, discarded): (Vec<_>, Vec<_>) = raw.into_iter().partition(|c| c.len() >= 3);

        let better = match &best {
            None => true,
            Some((best_kept, _)) => kept.len() > best_kept.len(),
        };
        if better {
            best_radius = radius;
            best = Some((kept, discarded.len()));
        }
    }

    let (clusters, discarded) = best.unwrap_or_default();
    debug!(
        radius = best_radius,
        clusters = clusters.len(),
        discarded, "clustered boundary vertices"
    );
    (best_radius, clusters, discarded)
}

/// Region growth over the fixed-radius neighbor graph.
pub(crate) fn cluster_by_radius(positions: &[Point3<f64>], radius: f64) -> Vec<Vec<usize>> {
    let radius_sq = radius * radius;
    let mut visited = vec![false; positions.len()];
    let mut clusters = Vec::new();

    for start in 0..positions.len() {
        if visited[start] {
            continue;
        }

        let mut cluster = Vec::new();
        let mut queue = vec![start];
        visited[start] = true;

        while let Some(i) = queue.pop() {
            cluster.push(i);
            for j in 0..positions.len() {
                if !visited[j] && (positions[i] - positions[j]).norm_squared() <= radius_sq {
                    visited[j] = true;
                    queue.push(j);
                }
            }
        }

        cluster.sort_unstable();
        clusters.push(cluster);
    }

    clusters
}

/// Close a loop with the triangulated convex hull of its points, oriented
/// outward. Returns None when the hull is degenerate (near-coplanar or
/// collinear points).
pub(crate) fn fill_loop_convex(
    mesh: &Mesh,
    loop_vertices: &[u32],
    mesh_centroid: &Point3<f64>,
) -> Option<Vec<[u32; 3]>> {
    if loop_vertices.len() < 4 {
        return None;
    }

    let points: Vec<Point3<f64>> = loop_vertices
        .iter()
        .map(|&v| mesh.vertices[v as usize].position)
        .collect();

    let (hull_points, hull_faces) = match try_convex_hull(&points) {
        Ok(hull) => hull,
        Err(err) => {
            debug!("convex hull construction failed: {:?}", err);
            return None;
        }
    };

    // Map hull points back to the original loop vertex indices.
    let to_original: Vec<u32> = hull_points
        .iter()
        .map(|hp| {
            let (best, _) = points.iter().enumerate().fold(
                (0usize, f64::INFINITY),
                |(best, best_dist), (i, p)| {
                    let dist = (p - hp).norm_squared();
                    if dist < best_dist { (i, dist) } else { (best, best_dist) }
                },
            );
            loop_vertices[best]
        })
        .collect();

    let mut new_faces: Vec<[u32; 3]> = Vec::with_capacity(hull_faces.len());
    for face in &hull_faces {
        let mapped = [
            to_original[face[0] as usize],
            to_original[face[1] as usize],
            to_original[face[2] as usize],
        ];
        // Mapping can collapse hull vertices onto one loop vertex.
        if mapped[0] != mapped[1] && mapped[1] != mapped[2] && mapped[0] != mapped[2] {
            new_faces.push(mapped);
        }
    }

    if new_faces.is_empty() {
        return None;
    }

    // Orient the fill outward: average fill normal against the direction
    // from the overall mesh centroid to the hole centroid.
    let hole_centroid = Point3::from(
        points.iter().map(|p| p.coords).sum::<Vector3<f64>>() / points.len() as f64,
    );
    let outward = hole_centroid - mesh_centroid;

    let mut average_normal = Vector3::zeros();
    for face in &new_faces {
        let tri = Triangle::new(
            mesh.vertices[face[0] as usize].position,
            mesh.vertices[face[1] as usize].position,
            mesh.vertices[face[2] as usize].position,
        );
        average_normal += tri.normal_unnormalized();
    }

    if average_normal.dot(&outward) < 0.0 {
        for face in &mut new_faces {
            face.swap(1, 2);
        }
    }

    Some(new_faces)
}

/// Close a loop by fan triangulation from its first vertex.
///
/// The cluster is an unordered vertex set; the loop order is recovered by
/// tracing the boundary edges induced on the cluster. Returns None when no
/// closed chain can be traced.
pub(crate) fn fill_loop_planar(
    loop_vertices: &[u32],
    boundary_edges: &[(u32, u32)],
) -> Option<Vec<[u32; 3]>> {
    if loop_vertices.len() < 3 {
        return None;
    }

    let members: HashSet<u32> = loop_vertices.iter().copied().collect();
    let induced: Vec<(u32, u32)> = boundary_edges
        .iter()
        .copied()
        .filter(|&(a, b)| members.contains(&a) && members.contains(&b))
        .collect();

    let ordered = trace_loops(&induced)
        .into_iter()
        .max_by_key(|l| l.edge_count())?;
    if ordered.edge_count() < 3 {
        return None;
    }

    let v = &ordered.vertices;
    let mut new_faces = Vec::with_capacity(v.len().saturating_sub(2));
    for i in 1..v.len() - 1 {
        new_faces.push([v[0], v[i], v[i + 1]]);
    }

    Some(new_faces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holes::tests::open_box_mesh;
    use crate::types::Vertex;

    /// An open bowl: apex below, non-planar hexagonal rim (alternating rim
    /// heights keep the rim off a single plane so its hull is well-formed).
    fn open_bowl_mesh() -> Mesh {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, -1.0)); // apex

        let n = 6;
        for i in 0..n {
            let angle = i as f64 * std::f64::consts::TAU / n as f64;
            let z = if i % 2 == 0 { 0.0 } else { 0.3 };
            mesh.vertices
                .push(Vertex::from_coords(angle.cos(), angle.sin(), z));
        }

        for i in 0..n as u32 {
            let a = 1 + i;
            let b = 1 + (i + 1) % n as u32;
            mesh.faces.push([0, a, b]);
        }

        mesh
    }

    #[test]
    fn test_idempotent_on_watertight_mesh() {
        let mesh = crate::types::tests::make_unit_cube();
        let vertices = mesh.vertex_count();
        let faces = mesh.face_count();

        let outcome = close_boundaries(mesh, &RepairParams::default());
        assert!(outcome.is_watertight());
        assert_eq!(outcome.mesh.vertex_count(), vertices);
        assert_eq!(outcome.mesh.face_count(), faces);
        assert!(matches!(outcome.steps[0], RepairStep::AlreadyWatertight));
        assert_eq!(outcome.steps.len(), 1);
    }

    #[test]
    fn test_open_box_closed_by_chain() {
        let mesh = open_box_mesh();
        let faces_before = mesh.face_count();

        let outcome = close_boundaries(mesh, &RepairParams::default());
        assert!(outcome.is_watertight());
        assert!(outcome.mesh.face_count() > faces_before);
        assert!(outcome.loops_filled >= 1);
    }

    #[test]
    fn test_size_cap_leaves_hole_open_without_error() {
        let mesh = open_box_mesh();
        let params = RepairParams {
            max_hole_size: 3,
            ..Default::default()
        };

        let outcome = close_boundaries(mesh, &params);
        assert!(!outcome.is_watertight());
        assert_eq!(outcome.loops_filled, 0);
        // The chain ran to its best-effort terminal state.
        assert!(
            outcome
                .steps
                .iter()
                .any(|s| matches!(s, RepairStep::WindingFallback { .. }))
        );
    }

    #[test]
    fn test_cluster_by_radius_separates_two_groups() {
        let mut positions = Vec::new();
        for i in 0..4 {
            positions.push(Point3::new(i as f64 * 0.1, 0.0, 0.0));
        }
        for i in 0..4 {
            positions.push(Point3::new(100.0 + i as f64 * 0.1, 0.0, 0.0));
        }

        let clusters = cluster_by_radius(&positions, 0.2);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0], vec![0, 1, 2, 3]);
        assert_eq!(clusters[1], vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_adaptive_radius_prefers_more_clusters() {
        // Two tight groups 1.0 apart inside a diagonal of 10: small radii
        // separate them, large radii merge them into one cluster.
        let mut positions = Vec::new();
        for i in 0..4 {
            positions.push(Point3::new(i as f64 * 0.05, 0.0, 0.0));
        }
        for i in 0..4 {
            positions.push(Point3::new(1.0 + i as f64 * 0.05, 0.0, 0.0));
        }

        let (_, clusters, _) = cluster_boundary_vertices(&positions, 10.0);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn test_convex_fill_closes_bowl_rim() {
        let mesh = open_bowl_mesh();
        let rim: Vec<u32> = (1..=6).collect();
        let centroid = mesh.centroid();

        let new_faces = fill_loop_convex(&mesh, &rim, &centroid).expect("hull fill");
        assert!(!new_faces.is_empty());

        let mut filled = mesh.clone();
        filled.faces.extend(new_faces);
        let adjacency = MeshAdjacency::build(&filled.faces);
        assert_eq!(adjacency.boundary_edge_count(), 0);
    }

    #[test]
    fn test_convex_fill_rejects_collinear_loop() {
        let mut mesh = Mesh::new();
        for i in 0..5 {
            mesh.vertices.push(Vertex::from_coords(i as f64, 0.0, 0.0));
        }
        let loop_vertices: Vec<u32> = (0..5).collect();

        assert!(fill_loop_convex(&mesh, &loop_vertices, &Point3::origin()).is_none());
    }

    #[test]
    fn test_planar_fill_fans_square_hole() {
        let mesh = open_box_mesh();
        let adjacency = MeshAdjacency::build(&mesh.faces);
        let boundary_edges: Vec<(u32, u32)> = adjacency.boundary_edges().collect();
        let rim = vec![4u32, 5, 6, 7];

        let new_faces = fill_loop_planar(&rim, &boundary_edges).expect("fan fill");
        assert_eq!(new_faces.len(), 2);

        let mut filled = mesh.clone();
        filled.faces.extend(new_faces);
        assert!(MeshAdjacency::build(&filled.faces).is_watertight());
    }

    #[test]
    fn test_planar_fill_requires_traceable_loop() {
        // Edges that do not close a cycle cannot be fanned.
        let rim = vec![0u32, 1, 2, 3];
        let edges = vec![(0u32, 1u32), (1, 2)];
        assert!(fill_loop_planar(&rim, &edges).is_none());
    }
}
