//! Label color catalog and per-vertex coloring.
//!
//! The catalog is loaded once per batch run and passed into the pipeline as
//! an explicit, read-only configuration object. Lookup is by exact label id
//! first, then by a normalized name match; an unmatched label gets a neutral
//! gray and a warning rather than failing the export.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{VoxError, VoxResult};
use crate::types::{Mesh, VertexColor};

/// Neutral gray assigned to labels missing from the catalog.
pub const FALLBACK_COLOR: VertexColor = VertexColor {
    r: 180,
    g: 180,
    b: 180,
};

/// One catalog record: label id, display name, RGB color.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelColorEntry {
    pub id: u32,
    pub name: String,
    pub color: [u8; 3],
}

/// Read-only mapping of label id / name to display color.
#[derive(Debug, Clone, Default)]
pub struct LabelColorCatalog {
    entries: Vec<LabelColorEntry>,
    by_id: HashMap<u32, usize>,
    by_normalized_name: HashMap<String, usize>,
}

/// Collapse underscores, hyphens and spaces and lower-case the rest, so
/// "Left_Lung", "left lung" and "LEFT-LUNG" all compare equal.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(|c| c.to_lowercase())
        .collect()
}

impl LabelColorCatalog {
    /// Build a catalog from records. Later duplicates of an id or name are
    /// ignored; the first occurrence wins.
    pub fn from_entries(entries: Vec<LabelColorEntry>) -> Self {
        let mut by_id = HashMap::new();
        let mut by_normalized_name = HashMap::new();

        for (index, entry) in entries.iter().enumerate() {
            by_id.entry(entry.id).or_insert(index);
            by_normalized_name
                .entry(normalize_name(&entry.name))
                .or_insert(index);
        }

        Self {
            entries,
            by_id,
            by_normalized_name,
        }
    }

    /// Load a catalog from a JSON file: a list of `{id, name, color}` records.
    pub fn load(path: &Path) -> VoxResult<Self> {
        let file = File::open(path).map_err(|e| VoxError::io_read(path, e))?;
        let reader = BufReader::new(file);
        let entries: Vec<LabelColorEntry> = serde_json::from_reader(reader)
            .map_err(|e| VoxError::parse_error(path, e.to_string()))?;

        debug!("loaded {} catalog entries from {:?}", entries.len(), path);
        Ok(Self::from_entries(entries))
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by exact id, falling back to a normalized name match.
    pub fn lookup(&self, label_id: u32, name_hint: Option<&str>) -> Option<&LabelColorEntry> {
        if let Some(&index) = self.by_id.get(&label_id) {
            return Some(&self.entries[index]);
        }

        let hint = name_hint?;
        self.by_normalized_name
            .get(&normalize_name(hint))
            .map(|&index| &self.entries[index])
    }
}

/// Assign a uniform catalog color (and resolved name) to every vertex.
///
/// An unmatched label gets [`FALLBACK_COLOR`] and keeps its existing name,
/// reported as a warning naming the label.
pub fn colorize_mesh(mut mesh: Mesh, label_id: u32, catalog: &LabelColorCatalog) -> Mesh {
    let name_hint = mesh.metadata.label_name.clone();

    let color = match catalog.lookup(label_id, name_hint.as_deref()) {
        Some(entry) => {
            mesh.metadata.label_name = Some(entry.name.clone());
            VertexColor::new(entry.color[0], entry.color[1], entry.color[2])
        }
        None => {
            warn!(
                "label {} ({}) not found in color catalog, using neutral gray",
                label_id,
                name_hint.as_deref().unwrap_or("unnamed")
            );
            FALLBACK_COLOR
        }
    };

    mesh.metadata.label_id = Some(label_id);
    for vertex in &mut mesh.vertices {
        vertex.color = Some(color);
    }

    mesh
}
