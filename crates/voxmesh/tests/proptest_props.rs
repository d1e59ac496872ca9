//! Property-based tests for structural invariants.

use proptest::prelude::*;
use voxmesh::colorize::normalize_name;
use voxmesh::{Mesh, Vertex, sanitize_label_filename, smooth_mesh};

fn tetrahedron() -> Mesh {
    let mut mesh = Mesh::new();
    mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
    mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
    mesh.vertices.push(Vertex::from_coords(0.5, 1.0, 0.0));
    mesh.vertices.push(Vertex::from_coords(0.5, 0.5, 1.0));
    mesh.faces.push([0, 2, 1]);
    mesh.faces.push([0, 1, 3]);
    mesh.faces.push([1, 2, 3]);
    mesh.faces.push([2, 0, 3]);
    mesh
}

proptest! {
    #[test]
    fn sanitized_filenames_contain_only_safe_characters(name in ".{0,64}") {
        let sanitized = sanitize_label_filename(&name);
        prop_assert!(!sanitized.is_empty());
        prop_assert!(
            sanitized
                .chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn sanitization_is_idempotent(name in ".{0,64}") {
        let once = sanitize_label_filename(&name);
        prop_assert_eq!(sanitize_label_filename(&once), once);
    }

    #[test]
    fn normalized_names_are_fixed_points(name in "[a-zA-Z _-]{0,32}") {
        let once = normalize_name(&name);
        prop_assert_eq!(normalize_name(&once), once);
    }

    #[test]
    fn smoothing_never_changes_topology(iterations in 0usize..20) {
        let mesh = tetrahedron();
        let faces = mesh.faces.clone();

        let smoothed = smooth_mesh(mesh, iterations);
        prop_assert_eq!(smoothed.vertex_count(), 4);
        prop_assert_eq!(smoothed.faces, faces);
    }
}
