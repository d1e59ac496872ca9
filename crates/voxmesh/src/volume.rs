//! Labeled volume input: the `.vxl` container and mask construction.
//!
//! A volume is a dense 3D grid with physical voxel spacing. The payload is
//! either integer label ids (0 = background) from a segmentation step, or
//! grayscale scalars for plain threshold extraction. The container format is
//! deliberately minimal: a 4-byte magic, a little-endian version and header
//! length, a JSON header with dims/spacing/dtype, then the raw little-endian
//! payload in x-fastest order.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{VoxError, VoxResult};

const MAGIC: &[u8; 4] = b"VXLV";
const VERSION: u32 = 1;

/// Voxel payload: integer labels or grayscale scalars.
#[derive(Debug, Clone)]
pub enum VolumeData {
    /// Per-voxel label ids, 0 = background.
    Labels(Vec<u32>),
    /// Grayscale values for single-threshold extraction.
    Scalar(Vec<f32>),
}

impl VolumeData {
    fn len(&self) -> usize {
        match self {
            VolumeData::Labels(data) => data.len(),
            VolumeData::Scalar(data) => data.len(),
        }
    }

    fn dtype(&self) -> &'static str {
        match self {
            VolumeData::Labels(_) => "u32",
            VolumeData::Scalar(_) => "f32",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct VolumeHeader {
    dims: [usize; 3],
    spacing: [f64; 3],
    dtype: String,
}

/// A dense 3D voxel grid with physical spacing. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Volume {
    /// Grid dimensions `[nx, ny, nz]`.
    pub dims: [usize; 3],
    /// Physical size of one voxel step along each axis.
    pub spacing: [f64; 3],
    /// Voxel payload, `dims[0] * dims[1] * dims[2]` elements, x fastest.
    pub data: VolumeData,
}

impl Volume {
    /// Create a volume from parts, validating the payload length.
    pub fn new(dims: [usize; 3], spacing: [f64; 3], data: VolumeData) -> VoxResult<Self> {
        let expected = dims[0]
            .checked_mul(dims[1])
            .and_then(|n| n.checked_mul(dims[2]))
            .ok_or_else(|| VoxError::invalid_volume("dimensions overflow"))?;

        if expected == 0 {
            return Err(VoxError::invalid_volume("zero-sized dimensions"));
        }
        if data.len() != expected {
            return Err(VoxError::invalid_volume(format!(
                "payload has {} elements, dims {:?} require {}",
                data.len(),
                dims,
                expected
            )));
        }
        if spacing.iter().any(|&s| !(s > 0.0) || !s.is_finite()) {
            return Err(VoxError::invalid_volume(format!(
                "spacing must be positive and finite, got {:?}",
                spacing
            )));
        }

        Ok(Self {
            dims,
            spacing,
            data,
        })
    }

    /// Create a label volume with uniform spacing of 1.0, for tests and tools.
    pub fn from_labels(dims: [usize; 3], labels: Vec<u32>) -> VoxResult<Self> {
        Self::new(dims, [1.0, 1.0, 1.0], VolumeData::Labels(labels))
    }

    /// Linear index for voxel (x, y, z), x fastest.
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.dims[0] * (y + self.dims[1] * z)
    }

    /// Total voxel count.
    #[inline]
    pub fn voxel_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Distinct non-zero label ids present, sorted ascending.
    ///
    /// Empty for scalar volumes, which carry no label structure.
    pub fn distinct_labels(&self) -> Vec<u32> {
        match &self.data {
            VolumeData::Labels(data) => {
                let mut labels: Vec<u32> = {
                    let mut set = hashbrown::HashSet::new();
                    for &v in data {
                        if v != 0 {
                            set.insert(v);
                        }
                    }
                    set.into_iter().collect()
                };
                labels.sort_unstable();
                labels
            }
            VolumeData::Scalar(_) => Vec::new(),
        }
    }

    /// Binary occupancy mask for one label id.
    ///
    /// Returns None when the label has no foreground voxels (EmptyMask).
    pub fn label_mask(&self, label: u32) -> Option<Vec<bool>> {
        let data = match &self.data {
            VolumeData::Labels(data) => data,
            VolumeData::Scalar(_) => return None,
        };

        let mask: Vec<bool> = data.iter().map(|&v| v == label && v != 0).collect();
        if mask.iter().any(|&m| m) { Some(mask) } else { None }
    }

    /// Binary occupancy mask for `value > level` on a grayscale volume.
    ///
    /// A level outside the observed data range is not an error: it is pulled
    /// inward (to 90 % of the maximum, or just above the minimum) and the
    /// adjustment is reported as a warning. Returns the mask together with
    /// the level actually used, or None when nothing exceeds it.
    pub fn threshold_mask(&self, level: f64) -> Option<(Vec<bool>, f64)> {
        let data = match &self.data {
            VolumeData::Scalar(data) => data,
            // Label volumes threshold on the raw ids, which covers the
            // "single foreground label" export path.
            VolumeData::Labels(data) => {
                let mask: Vec<bool> = data.iter().map(|&v| (v as f64) > level).collect();
                return if mask.iter().any(|&m| m) {
                    Some((mask, level))
                } else {
                    None
                };
            }
        };

        let (min, max) = data.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(min, max), &v| (min.min(v as f64), max.max(v as f64)),
        );
        if !min.is_finite() || !max.is_finite() {
            return None;
        }

        let mut used = level;
        if level >= max {
            used = max * 0.9;
            // Degenerate ranges (e.g. max <= 0) still need a level below max.
            if used >= max {
                used = min + (max - min) * 0.5;
            }
            warn!(
                requested = level,
                used, "threshold above data maximum, adjusted inward"
            );
        } else if level < min {
            used = min + (max - min) * 1e-3;
            warn!(
                requested = level,
                used, "threshold below data minimum, adjusted inward"
            );
        }

        let mask: Vec<bool> = data.iter().map(|&v| (v as f64) > used).collect();
        if mask.iter().any(|&m| m) {
            Some((mask, used))
        } else {
            None
        }
    }

    /// Load a volume from a `.vxl` container.
    pub fn load(path: &Path) -> VoxResult<Self> {
        let file = File::open(path).map_err(|e| VoxError::io_read(path, e))?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|e| VoxError::io_read(path, e))?;
        if &magic != MAGIC {
            return Err(VoxError::parse_error(path, "bad magic, not a .vxl volume"));
        }

        let version = read_u32(&mut reader, path)?;
        if version != VERSION {
            return Err(VoxError::parse_error(
                path,
                format!("unsupported container version {}", version),
            ));
        }

        let header_len = read_u32(&mut reader, path)? as usize;
        let mut header_bytes = vec![0u8; header_len];
        reader
            .read_exact(&mut header_bytes)
            .map_err(|e| VoxError::io_read(path, e))?;
        let header: VolumeHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| VoxError::parse_error(path, e.to_string()))?;

        let count = header.dims[0]
            .checked_mul(header.dims[1])
            .and_then(|n| n.checked_mul(header.dims[2]))
            .ok_or_else(|| VoxError::parse_error(path, "header dimensions overflow"))?;

        let mut payload = vec![0u8; count * 4];
        reader
            .read_exact(&mut payload)
            .map_err(|e| VoxError::io_read(path, e))?;

        let data = match header.dtype.as_str() {
            "u32" => VolumeData::Labels(
                payload
                    .chunks_exact(4)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            ),
            "f32" => VolumeData::Scalar(
                payload
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            ),
            other => {
                return Err(VoxError::parse_error(
                    path,
                    format!("unknown dtype {:?}", other),
                ));
            }
        };

        let volume = Volume::new(header.dims, header.spacing, data)?;
        debug!(
            dims = ?volume.dims,
            spacing = ?volume.spacing,
            dtype = volume.data.dtype(),
            "loaded volume from {:?}",
            path
        );
        Ok(volume)
    }

    /// Write the volume to a `.vxl` container.
    pub fn save(&self, path: &Path) -> VoxResult<()> {
        let header = VolumeHeader {
            dims: self.dims,
            spacing: self.spacing,
            dtype: self.data.dtype().to_string(),
        };
        let header_bytes = serde_json::to_vec(&header)
            .map_err(|e| VoxError::parse_error(path, e.to_string()))?;

        let file = File::create(path).map_err(|e| VoxError::io_write(path, e))?;
        let mut writer = BufWriter::new(file);

        let write = |writer: &mut BufWriter<File>, bytes: &[u8]| {
            writer
                .write_all(bytes)
                .map_err(|e| VoxError::io_write(path, e))
        };

        write(&mut writer, MAGIC)?;
        write(&mut writer, &VERSION.to_le_bytes())?;
        write(&mut writer, &(header_bytes.len() as u32).to_le_bytes())?;
        write(&mut writer, &header_bytes)?;

        match &self.data {
            VolumeData::Labels(data) => {
                for &v in data {
                    write(&mut writer, &v.to_le_bytes())?;
                }
            }
            VolumeData::Scalar(data) => {
                for &v in data {
                    write(&mut writer, &v.to_le_bytes())?;
                }
            }
        }

        writer.flush().map_err(|e| VoxError::io_write(path, e))?;
        Ok(())
    }
}

fn read_u32(reader: &mut impl Read, path: &Path) -> VoxResult<u32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|e| VoxError::io_read(path, e))?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    /// Volume with a centered axis-aligned box of the given label.
    pub(crate) fn box_volume(
        dims: [usize; 3],
        min: [usize; 3],
        max: [usize; 3],
        label: u32,
    ) -> Volume {
        let mut labels = vec![0u32; dims[0] * dims[1] * dims[2]];
        for z in min[2]..=max[2] {
            for y in min[1]..=max[1] {
                for x in min[0]..=max[0] {
                    labels[x + dims[0] * (y + dims[1] * z)] = label;
                }
            }
        }
        Volume::from_labels(dims, labels).unwrap()
    }

    #[test]
    fn test_new_rejects_short_payload() {
        let err = Volume::from_labels([2, 2, 2], vec![0; 7]).unwrap_err();
        assert!(matches!(err, VoxError::InvalidVolume { .. }));
    }

    #[test]
    fn test_new_rejects_bad_spacing() {
        let err = Volume::new(
            [1, 1, 1],
            [0.0, 1.0, 1.0],
            VolumeData::Labels(vec![0]),
        )
        .unwrap_err();
        assert!(matches!(err, VoxError::InvalidVolume { .. }));
    }

    #[test]
    fn test_distinct_labels_sorted() {
        let volume = Volume::from_labels([2, 2, 1], vec![3, 0, 1, 3]).unwrap();
        assert_eq!(volume.distinct_labels(), vec![1, 3]);
    }

    #[test]
    fn test_label_mask_empty_for_absent_label() {
        let volume = Volume::from_labels([2, 2, 1], vec![1, 1, 0, 0]).unwrap();
        assert!(volume.label_mask(7).is_none());
        let mask = volume.label_mask(1).unwrap();
        assert_eq!(mask, vec![true, true, false, false]);
    }

    #[test]
    fn test_threshold_clamps_out_of_range_level() {
        let volume = Volume::new(
            [2, 2, 1],
            [1.0, 1.0, 1.0],
            VolumeData::Scalar(vec![0.0, 1.0, 2.0, 10.0]),
        )
        .unwrap();

        // Above the max: pulled down to 90% of max, still selects the peak.
        let (mask, used) = volume.threshold_mask(50.0).unwrap();
        assert!(used < 10.0);
        assert_eq!(mask.iter().filter(|&&m| m).count(), 1);

        // Below the min: pulled up just above the min.
        let (mask, used) = volume.threshold_mask(-5.0).unwrap();
        assert!(used > 0.0);
        assert_eq!(mask.iter().filter(|&&m| m).count(), 3);
    }

    #[test]
    fn test_vxl_round_trip() {
        let volume = box_volume([4, 4, 4], [1, 1, 1], [2, 2, 2], 5);
        let file = NamedTempFile::new().unwrap();
        volume.save(file.path()).unwrap();

        let loaded = Volume::load(file.path()).unwrap();
        assert_eq!(loaded.dims, volume.dims);
        assert_eq!(loaded.spacing, volume.spacing);
        assert_eq!(loaded.distinct_labels(), vec![5]);
        match (&loaded.data, &volume.data) {
            (VolumeData::Labels(a), VolumeData::Labels(b)) => assert_eq!(a, b),
            _ => panic!("expected label payloads"),
        }
    }

    #[test]
    fn test_load_rejects_bad_magic() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"NOPE0000").unwrap();
        let err = Volume::load(file.path()).unwrap_err();
        assert!(matches!(err, VoxError::ParseError { .. }));
    }
}
