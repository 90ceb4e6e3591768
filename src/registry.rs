//! In-memory tileset lookup.

use crate::model::TileSet;
use std::collections::HashMap;
use uuid::Uuid;

/// Resolves tileset references at render and export time.
pub trait TilesetLookup {
    /// The tileset with identifier `id`.
    fn tileset(&self, id: &Uuid) -> Option<TileSet>;
}

/// Known tilesets, indexed by identifier and by normalized name.
#[derive(Debug, Default, Clone)]
pub struct TilesetRegistry {
    by_id: HashMap<Uuid, TileSet>,
    // insertion order, for stable listings
    order: Vec<Uuid>,
}

impl TilesetRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `tilesets`, later duplicates replacing earlier ones.
    pub fn from_tilesets(tilesets: impl IntoIterator<Item = TileSet>) -> Self {
        let mut reg = Self::new();
        for ts in tilesets {
            reg.insert(ts);
        }
        reg
    }

    /// Adds or replaces a tileset.
    pub fn insert(&mut self, tileset: TileSet) {
        if !self.by_id.contains_key(&tileset.uuid) {
            self.order.push(tileset.uuid);
        }
        self.by_id.insert(tileset.uuid, tileset);
    }

    /// Removes and returns a tileset.
    pub fn remove(&mut self, id: &Uuid) -> Option<TileSet> {
        let removed = self.by_id.remove(id)?;
        self.order.retain(|o| o != id);
        Some(removed)
    }

    /// A tileset by identifier.
    pub fn get(&self, id: &Uuid) -> Option<&TileSet> {
        self.by_id.get(id)
    }

    /// Tilesets whose normalized name equals the normalized `name`.
    pub fn find_by_name(&self, name: &str) -> Vec<&TileSet> {
        let wanted = normalize_name(name);
        self.iter()
            .filter(|ts| normalize_name(&ts.name) == wanted)
            .collect()
    }

    /// Tilesets in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TileSet> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    /// Number of tilesets.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl TilesetLookup for TilesetRegistry {
    fn tileset(&self, id: &Uuid) -> Option<TileSet> {
        self.get(id).cloned()
    }
}

/// Lower-cases and folds `_`, `-`, `.` and runs of whitespace into single spaces,
/// so `castle_exterior_mc` and `Castle Exterior Mc` compare equal.
pub fn normalize_name(name: &str) -> String {
    name.split(|c: char| c == '_' || c == '-' || c == '.' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TileGeometry;

    #[test]
    fn name_lookup_ignores_case_and_separators() {
        let ts = TileSet::new("Castle Exterior Mc", None, (64, 64), TileGeometry::square(32));
        let reg = TilesetRegistry::from_tilesets([ts.clone()]);
        assert_eq!(reg.find_by_name("castle_exterior_mc"), vec![&ts]);
        assert!(reg.find_by_name("castle").is_empty());
        assert_eq!(reg.tileset(&ts.uuid), Some(ts));
    }

    #[test]
    fn normalize_collapses_separators() {
        assert_eq!(normalize_name("  Town__Walls-v2 "), "town walls v2");
    }
}
