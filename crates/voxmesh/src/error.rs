//! Error types for the conversion engine with rich diagnostics.
//!
//! Fatal errors carry a machine-readable code in the format `VOX-XXXX`:
//! - `VOX-1xxx`: I/O errors (volume reading, mesh writing, parsing)
//! - `VOX-2xxx`: Volume and mesh validation errors
//! - `VOX-3xxx`: Geometry operations that could not complete
//! - `VOX-4xxx`: Format errors (unsupported or malformed data)
//!
//! Recoverable per-label conditions (empty mask, skipped decimation,
//! degenerate hole fills, unresolved watertightness) are deliberately not
//! errors; they travel as outcome data in [`crate::pipeline`] so a batch run
//! never aborts on a single label.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for conversion operations.
pub type VoxResult<T> = Result<T, VoxError>;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// VOX-1001: Failed to read file
    IoRead = 1001,
    /// VOX-1002: Failed to write file
    IoWrite = 1002,
    /// VOX-1003: Failed to parse file format
    ParseError = 1003,
    /// VOX-2001: Volume has no voxels or inconsistent dimensions
    InvalidVolume = 2001,
    /// VOX-2002: Face references invalid vertex index
    InvalidVertexIndex = 2002,
    /// VOX-2003: Mesh has no vertices or faces
    EmptyMesh = 2003,
    /// VOX-3001: Hole filling failed
    HoleFillFailed = 3001,
    /// VOX-4001: Unsupported file format
    UnsupportedFormat = 4001,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `VOX-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::IoRead => "VOX-1001",
            ErrorCode::IoWrite => "VOX-1002",
            ErrorCode::ParseError => "VOX-1003",
            ErrorCode::InvalidVolume => "VOX-2001",
            ErrorCode::InvalidVertexIndex => "VOX-2002",
            ErrorCode::EmptyMesh => "VOX-2003",
            ErrorCode::HoleFillFailed => "VOX-3001",
            ErrorCode::UnsupportedFormat => "VOX-4001",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions attached to fatal errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Check the input volume or file for the listed issues.
    CheckInput { checks: Vec<String> },
    /// Adjust parameters for the operation.
    AdjustParameters { parameters: Vec<(String, String)> },
    /// Re-run the upstream conversion that produced the volume.
    RegenerateVolume,
    /// No automatic recovery available.
    None,
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::CheckInput { checks } => {
                write!(f, "Check the input for: {}", checks.join(", "))
            }
            RecoverySuggestion::AdjustParameters { parameters } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|(k, v)| format!("{} = {}", k, v))
                    .collect();
                write!(f, "Try adjusting: {}", params.join(", "))
            }
            RecoverySuggestion::RegenerateVolume => {
                write!(
                    f,
                    "Re-run the upstream segmentation/conversion step that produced this volume"
                )
            }
            RecoverySuggestion::None => {
                write!(f, "No automatic recovery available")
            }
        }
    }
}

/// Location information for errors.
#[derive(Debug, Clone)]
pub enum VoxLocation {
    /// Error in a file.
    File { path: PathBuf },
    /// Error at a specific voxel.
    Voxel { x: usize, y: usize, z: usize },
    /// Error at a specific face.
    Face { index: usize },
    /// No specific location.
    Unknown,
}

impl std::fmt::Display for VoxLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoxLocation::File { path } => write!(f, "{}", path.display()),
            VoxLocation::Voxel { x, y, z } => write!(f, "voxel ({}, {}, {})", x, y, z),
            VoxLocation::Face { index } => write!(f, "face {}", index),
            VoxLocation::Unknown => write!(f, "unknown location"),
        }
    }
}

/// Errors that can occur during volume-to-mesh conversion.
#[derive(Debug, Error, Diagnostic)]
pub enum VoxError {
    /// Error reading from a file.
    #[error("failed to read {path}")]
    #[diagnostic(
        code(voxmesh::io::read),
        help("Check that the file exists and is readable")
    )]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write {path}")]
    #[diagnostic(
        code(voxmesh::io::write),
        help("Check that the output directory exists and is writable")
    )]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing a file.
    #[error("failed to parse {path}: {details}")]
    #[diagnostic(
        code(voxmesh::parse::error),
        help("The file may be truncated or not a volume container")
    )]
    ParseError { path: PathBuf, details: String },

    /// Unsupported file format.
    #[error("unsupported format: {extension:?}")]
    #[diagnostic(
        code(voxmesh::format::unsupported),
        help("Supported inputs: .vxl volume containers; outputs: .ply")
    )]
    UnsupportedFormat { extension: Option<String> },

    /// Volume dimensions do not match the payload.
    #[error("invalid volume: {details}")]
    #[diagnostic(
        code(voxmesh::volume::invalid),
        help("The volume header and payload disagree; re-export the volume")
    )]
    InvalidVolume { details: String },

    /// Face references a vertex beyond the vertex array.
    #[error(
        "invalid vertex index: face {face_index} references vertex {vertex_index}, but mesh only has {vertex_count} vertices"
    )]
    #[diagnostic(code(voxmesh::mesh::vertex_index))]
    InvalidVertexIndex {
        face_index: usize,
        vertex_index: u32,
        vertex_count: usize,
    },

    /// Empty mesh where geometry was required.
    #[error("mesh is empty: {details}")]
    #[diagnostic(code(voxmesh::mesh::empty))]
    EmptyMesh { details: String },

    /// Hole filling failed beyond the per-loop skip semantics.
    #[error("hole filling failed: {details}")]
    #[diagnostic(
        code(voxmesh::repair::hole_fill),
        help("Try the planar fill method or raise max_hole_size")
    )]
    HoleFillFailed { details: String },
}

impl VoxError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            VoxError::IoRead { .. } => ErrorCode::IoRead,
            VoxError::IoWrite { .. } => ErrorCode::IoWrite,
            VoxError::ParseError { .. } => ErrorCode::ParseError,
            VoxError::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            VoxError::InvalidVolume { .. } => ErrorCode::InvalidVolume,
            VoxError::InvalidVertexIndex { .. } => ErrorCode::InvalidVertexIndex,
            VoxError::EmptyMesh { .. } => ErrorCode::EmptyMesh,
            VoxError::HoleFillFailed { .. } => ErrorCode::HoleFillFailed,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            VoxError::IoRead { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["file exists".into(), "file permissions".into()],
            },
            VoxError::IoWrite { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["directory exists".into(), "write permissions".into()],
            },
            VoxError::ParseError { .. } => RecoverySuggestion::RegenerateVolume,
            VoxError::UnsupportedFormat { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["file extension".into()],
            },
            VoxError::InvalidVolume { .. } => RecoverySuggestion::RegenerateVolume,
            VoxError::InvalidVertexIndex { .. } => RecoverySuggestion::None,
            VoxError::EmptyMesh { .. } => RecoverySuggestion::CheckInput {
                checks: vec!["label ids present in the volume".into()],
            },
            VoxError::HoleFillFailed { .. } => RecoverySuggestion::AdjustParameters {
                parameters: vec![
                    ("hole_filling_method".into(), "planar".into()),
                    ("max_hole_size".into(), "a larger value".into()),
                ],
            },
        }
    }

    /// Returns location information if available.
    pub fn location(&self) -> Option<VoxLocation> {
        match self {
            VoxError::IoRead { path, .. }
            | VoxError::IoWrite { path, .. }
            | VoxError::ParseError { path, .. } => Some(VoxLocation::File { path: path.clone() }),
            VoxError::InvalidVertexIndex { face_index, .. } => {
                Some(VoxLocation::Face { index: *face_index })
            }
            _ => None,
        }
    }

    /// Create an IoRead error.
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VoxError::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create an IoWrite error.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VoxError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a ParseError.
    pub fn parse_error(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        VoxError::ParseError {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Create an InvalidVolume error.
    pub fn invalid_volume(details: impl Into<String>) -> Self {
        VoxError::InvalidVolume {
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = VoxError::invalid_volume("payload short");
        assert_eq!(err.code(), ErrorCode::InvalidVolume);
        assert_eq!(err.code().as_str(), "VOX-2001");
    }

    #[test]
    fn test_location_for_io() {
        let err = VoxError::io_read(
            "missing.vxl",
            std::io::Error::new(std::io::ErrorKind::NotFound, "nope"),
        );
        match err.location() {
            Some(VoxLocation::File { path }) => {
                assert_eq!(path, PathBuf::from("missing.vxl"));
            }
            other => panic!("expected file location, got {:?}", other),
        }
    }

    #[test]
    fn test_recovery_suggestion_display() {
        let suggestion = VoxError::invalid_volume("x").recovery_suggestion();
        let text = format!("{}", suggestion);
        assert!(text.contains("upstream"));
    }
}
