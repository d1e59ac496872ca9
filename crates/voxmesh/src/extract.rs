//! Isosurface extraction from binary voxel masks.
//!
//! Extracts the 0.5-level surface between foreground and background voxels.
//! Boolean occupancy has no scalar field to interpolate, so a tri-table
//! marching-cubes walk is prone to ambiguous configurations that show up as
//! cracks; instead one vertex is placed per sign-mixed cell (at the mean of
//! its crossing-edge midpoints) and two triangles are stitched across every
//! crossing lattice edge, which is deterministic and cannot produce
//! inconsistent neighboring cells.
//!
//! A mask that touches the volume border is clipped open there: a quad is
//! only emitted when all four cells around the crossing edge exist. Interior
//! solids therefore come out closed, while structures cut off by the scan
//! extent keep an open rim for [`crate::repair`] to deal with.

use tracing::debug;

use crate::types::{Mesh, Vertex};
use crate::volume::Volume;

/// Cell corner offsets, indexed bitwise: bit 0 = x, bit 1 = y, bit 2 = z.
const CORNERS: [(usize, usize, usize); 8] = [
    (0, 0, 0),
    (1, 0, 0),
    (0, 1, 0),
    (1, 1, 0),
    (0, 0, 1),
    (1, 0, 1),
    (0, 1, 1),
    (1, 1, 1),
];

/// The 12 cell edges as corner-index pairs (bit patterns differing in one axis).
const CELL_EDGES: [(usize, usize); 12] = [
    (0, 1),
    (2, 3),
    (4, 5),
    (6, 7),
    (0, 2),
    (1, 3),
    (4, 6),
    (5, 7),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// Extract the surface of a binary mask as a triangle mesh.
///
/// `mask` is `dims[0] * dims[1] * dims[2]` booleans in x-fastest order;
/// vertex coordinates are voxel indices scaled by `spacing`. Returns None
/// when the mask produces no surface (no foreground, or foreground with no
/// interior transition).
pub fn extract_mask_surface(mask: &[bool], dims: [usize; 3], spacing: [f64; 3]) -> Option<Mesh> {
    let [nx, ny, nz] = dims;
    debug_assert_eq!(mask.len(), nx * ny * nz);

    if nx < 2 || ny < 2 || nz < 2 {
        return None;
    }

    let occ = |x: usize, y: usize, z: usize| mask[x + nx * (y + ny * z)];

    // One vertex per sign-mixed cell. Cell (cx, cy, cz) spans voxels
    // (cx..cx+1, cy..cy+1, cz..cz+1).
    let (cnx, cny, cnz) = (nx - 1, ny - 1, nz - 1);
    let cell_index = |cx: usize, cy: usize, cz: usize| cx + cnx * (cy + cny * cz);

    let mut cell_vertex = vec![u32::MAX; cnx * cny * cnz];
    let mut mesh = Mesh::new();

    for cz in 0..cnz {
        for cy in 0..cny {
            for cx in 0..cnx {
                let corner_occ: [bool; 8] = std::array::from_fn(|i| {
                    let (dx, dy, dz) = CORNERS[i];
                    occ(cx + dx, cy + dy, cz + dz)
                });

                let inside = corner_occ.iter().filter(|&&o| o).count();
                if inside == 0 || inside == 8 {
                    continue;
                }

                // Vertex at the mean of the crossing-edge midpoints.
                let mut sum = [0.0f64; 3];
                let mut crossings = 0usize;
                for &(a, b) in &CELL_EDGES {
                    if corner_occ[a] != corner_occ[b] {
                        let (ax, ay, az) = CORNERS[a];
                        let (bx, by, bz) = CORNERS[b];
                        sum[0] += (cx + ax) as f64 + (cx + bx) as f64;
                        sum[1] += (cy + ay) as f64 + (cy + by) as f64;
                        sum[2] += (cz + az) as f64 + (cz + bz) as f64;
                        crossings += 1;
                    }
                }
                let scale = 1.0 / (2.0 * crossings as f64);

                cell_vertex[cell_index(cx, cy, cz)] = mesh.vertices.len() as u32;
                mesh.vertices.push(Vertex::from_coords(
                    sum[0] * scale * spacing[0],
                    sum[1] * scale * spacing[1],
                    sum[2] * scale * spacing[2],
                ));
            }
        }
    }

    if mesh.vertices.is_empty() {
        return None;
    }

    // Stitch a quad across every crossing lattice edge whose four incident
    // cells all exist. For axis a with cyclic (a, b, c), the cells are
    // p-eb-ec, p-ec, p, p-eb; that order is CCW viewed from +a, so it is
    // emitted as-is when the edge start is inside (outward normal +a) and
    // reversed otherwise.
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let here = occ(x, y, z);

                // X edge (x, y, z) -> (x + 1, y, z)
                if x + 1 < nx && here != occ(x + 1, y, z) && (1..=ny - 2).contains(&y) && (1..=nz - 2).contains(&z)
                {
                    let quad = [
                        cell_vertex[cell_index(x, y - 1, z - 1)],
                        cell_vertex[cell_index(x, y, z - 1)],
                        cell_vertex[cell_index(x, y, z)],
                        cell_vertex[cell_index(x, y - 1, z)],
                    ];
                    push_quad(&mut mesh.faces, quad, here);
                }

                // Y edge (x, y, z) -> (x, y + 1, z); cyclic (b, c) = (z, x)
                if y + 1 < ny && here != occ(x, y + 1, z) && (1..=nz - 2).contains(&z) && (1..=nx - 2).contains(&x)
                {
                    let quad = [
                        cell_vertex[cell_index(x - 1, y, z - 1)],
                        cell_vertex[cell_index(x - 1, y, z)],
                        cell_vertex[cell_index(x, y, z)],
                        cell_vertex[cell_index(x, y, z - 1)],
                    ];
                    push_quad(&mut mesh.faces, quad, here);
                }

                // Z edge (x, y, z) -> (x, y, z + 1); cyclic (b, c) = (x, y)
                if z + 1 < nz && here != occ(x, y, z + 1) && (1..=nx - 2).contains(&x) && (1..=ny - 2).contains(&y)
                {
                    let quad = [
                        cell_vertex[cell_index(x - 1, y - 1, z)],
                        cell_vertex[cell_index(x, y - 1, z)],
                        cell_vertex[cell_index(x, y, z)],
                        cell_vertex[cell_index(x - 1, y, z)],
                    ];
                    push_quad(&mut mesh.faces, quad, here);
                }
            }
        }
    }

    if mesh.faces.is_empty() {
        return None;
    }

    mesh.refresh_watertight();
    debug!(
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        watertight = mesh.metadata.is_watertight,
        "extracted surface"
    );

    Some(mesh)
}

#[inline]
fn push_quad(faces: &mut Vec<[u32; 3]>, quad: [u32; 4], start_inside: bool) {
    debug_assert!(quad.iter().all(|&v| v != u32::MAX));
    let [q0, q1, q2, q3] = quad;
    if start_inside {
        faces.push([q0, q1, q2]);
        faces.push([q0, q2, q3]);
    } else {
        faces.push([q3, q2, q1]);
        faces.push([q3, q1, q0]);
    }
}

/// Extract the surface for one label id. None when the label is absent.
pub fn extract_label(volume: &Volume, label: u32) -> Option<Mesh> {
    let mask = volume.label_mask(label)?;
    let mut mesh = extract_mask_surface(&mask, volume.dims, volume.spacing)?;
    mesh.metadata.label_id = Some(label);
    Some(mesh)
}

/// Extract a single surface at `value > level`. None when nothing crosses.
///
/// Returns the mesh together with the threshold actually used after the
/// out-of-range adjustment in [`Volume::threshold_mask`].
pub fn extract_threshold(volume: &Volume, level: f64) -> Option<(Mesh, f64)> {
    let (mask, used) = volume.threshold_mask(level)?;
    let mesh = extract_mask_surface(&mask, volume.dims, volume.spacing)?;
    Some((mesh, used))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::volume::Volume;

    /// Label volume with a solid sphere of the given radius at the center.
    pub(crate) fn sphere_volume(n: usize, radius: f64, label: u32) -> Volume {
        let c = (n as f64 - 1.0) / 2.0;
        let mut labels = vec![0u32; n * n * n];
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    let dx = x as f64 - c;
                    let dy = y as f64 - c;
                    let dz = z as f64 - c;
                    if (dx * dx + dy * dy + dz * dz).sqrt() <= radius {
                        labels[x + n * (y + n * z)] = label;
                    }
                }
            }
        }
        Volume::from_labels([n, n, n], labels).unwrap()
    }

    #[test]
    fn test_single_voxel_is_closed_cube() {
        let mut labels = vec![0u32; 5 * 5 * 5];
        labels[2 + 5 * (2 + 5 * 2)] = 1;
        let volume = Volume::from_labels([5, 5, 5], labels).unwrap();

        let mesh = extract_label(&volume, 1).expect("surface for one voxel");
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(mesh.face_count(), 12);
        assert!(mesh.metadata.is_watertight);
        assert!(
            mesh.signed_volume() > 0.0,
            "winding must be outward, got volume {}",
            mesh.signed_volume()
        );
        assert_eq!(mesh.metadata.label_id, Some(1));
    }

    #[test]
    fn test_sphere_is_watertight() {
        let volume = sphere_volume(20, 5.0, 1);
        let mesh = extract_label(&volume, 1).expect("sphere surface");
        assert!(mesh.vertex_count() > 0);
        assert!(mesh.face_count() > 0);
        assert!(mesh.metadata.is_watertight);
        assert!(mesh.signed_volume() > 0.0);
    }

    #[test]
    fn test_absent_label_yields_none() {
        let volume = sphere_volume(10, 3.0, 1);
        assert!(extract_label(&volume, 9).is_none());
    }

    #[test]
    fn test_border_touching_solid_is_clipped_open() {
        // Box pressed against the z+ border: the top is clipped open.
        let volume = crate::volume::tests::box_volume([12, 12, 12], [2, 2, 4], [9, 9, 11], 1);
        let mesh = extract_label(&volume, 1).expect("clipped surface");
        assert!(!mesh.metadata.is_watertight);
    }

    #[test]
    fn test_spacing_scales_coordinates() {
        let mut labels = vec![0u32; 5 * 5 * 5];
        labels[2 + 5 * (2 + 5 * 2)] = 1;
        let volume = Volume::new(
            [5, 5, 5],
            [2.0, 3.0, 4.0],
            crate::volume::VolumeData::Labels(labels),
        )
        .unwrap();

        let mesh = extract_label(&volume, 1).unwrap();
        let (min, max) = mesh.bounds().unwrap();
        let extent = max - min;
        // One voxel across with anisotropic spacing: extents keep the ratio.
        assert!((extent.y / extent.x - 1.5).abs() < 1e-9);
        assert!((extent.z / extent.x - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_full_mask_has_no_surface() {
        let volume = Volume::from_labels([4, 4, 4], vec![1; 64]).unwrap();
        assert!(extract_label(&volume, 1).is_none());
    }
}
