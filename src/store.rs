//! Persistence of maps, layers and tilesets.
//!
//! [`MapStore`] is the seam to a relational backend. [`MemoryStore`] keeps
//! rows the way such a backend would: one row per layer, cells in their
//! encoded JSON column, decoded on read with the configured policy.

use crate::codec::{self, DecodePolicy};
use crate::error::MapError;
use crate::model::{Creator, Layer, LayerType, TileMap, TileSet};
use crate::registry::TilesetRegistry;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// Persistence of maps, layers and tilesets.
pub trait MapStore: Send + Sync {
    /// Stores a new map and its layers.
    fn insert_map(&self, map: &TileMap) -> Result<(), MapError>;
    /// A map with all of its layers.
    fn map(&self, id: Uuid) -> Result<TileMap, MapError>;
    /// Whether a map exists.
    fn contains_map(&self, id: Uuid) -> Result<bool, MapError>;
    /// Rewrites the map row and all of its layer rows, soft-deleted ones included.
    fn update_map(&self, map: &TileMap) -> Result<(), MapError>;
    /// Removes the map and cascades to its layers.
    fn delete_map(&self, id: Uuid) -> Result<(), MapError>;
    /// Maps with exactly this name.
    fn maps_by_name(&self, name: &str) -> Result<Vec<TileMap>, MapError>;
    /// Maps whose creator has this email.
    fn maps_by_creator(&self, email: &str) -> Result<Vec<TileMap>, MapError>;

    /// Stores a new tileset.
    fn insert_tileset(&self, tileset: &TileSet) -> Result<(), MapError>;
    /// A tileset by identifier.
    fn tileset(&self, id: Uuid) -> Result<TileSet, MapError>;
    /// Overwrites a stored tileset.
    fn update_tileset(&self, tileset: &TileSet) -> Result<(), MapError>;
    /// Tiles that reference a deleted tileset are left in place.
    fn delete_tileset(&self, id: Uuid) -> Result<(), MapError>;
    /// Every tileset, in insertion order.
    fn tilesets(&self) -> Result<Vec<TileSet>, MapError>;

    /// Writes new tilesets and a new map in one step: either every row lands or none does.
    fn commit_import(&self, tilesets: &[TileSet], map: &TileMap) -> Result<(), MapError>;

    /// Every tileset as a lookup registry.
    fn registry(&self) -> Result<TilesetRegistry, MapError> {
        Ok(TilesetRegistry::from_tilesets(self.tilesets()?))
    }
}

#[derive(Debug, Clone)]
struct MapRow {
    name: String,
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    creator: Option<Creator>,
}

#[derive(Debug, Clone)]
struct LayerRow {
    map_id: Uuid,
    uuid: Uuid,
    name: String,
    layer_type: LayerType,
    x: i32,
    y: i32,
    z: i32,
    width: u32,
    height: u32,
    visible: bool,
    opacity: f32,
    data: Value,
    image_path: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl LayerRow {
    fn from_layer(map_id: Uuid, layer: &Layer) -> Self {
        LayerRow {
            map_id,
            uuid: layer.uuid,
            name: layer.name.clone(),
            layer_type: layer.layer_type(),
            x: layer.x,
            y: layer.y,
            z: layer.z,
            width: layer.width,
            height: layer.height,
            visible: layer.visible,
            opacity: layer.opacity,
            data: codec::encode(layer.content()),
            image_path: layer.image_path.clone(),
            created_at: layer.created_at,
            updated_at: layer.updated_at,
            deleted_at: layer.deleted_at,
        }
    }

    fn to_layer(&self, policy: DecodePolicy) -> Result<Layer, MapError> {
        let content = codec::decode(&self.data, self.layer_type, policy)?;
        let mut layer = Layer::new(self.name.clone(), self.layer_type, self.width, self.height)
            .with_content(content);
        layer.uuid = self.uuid;
        layer.x = self.x;
        layer.y = self.y;
        layer.z = self.z;
        layer.visible = self.visible;
        layer.opacity = self.opacity;
        layer.image_path = self.image_path.clone();
        layer.created_at = self.created_at;
        layer.updated_at = self.updated_at;
        layer.deleted_at = self.deleted_at;
        Ok(layer)
    }
}

#[derive(Default)]
struct Tables {
    maps: HashMap<Uuid, MapRow>,
    // kept in insertion order per map
    layers: Vec<LayerRow>,
    tilesets: TilesetRegistry,
}

impl Tables {
    fn assemble(&self, id: Uuid, policy: DecodePolicy) -> Result<TileMap, MapError> {
        let row = self.maps.get(&id).ok_or_else(|| MapError::not_found("map", id))?;
        let layers = self
            .layers
            .iter()
            .filter(|l| l.map_id == id)
            .map(|l| l.to_layer(policy))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TileMap {
            uuid: id,
            name: row.name.clone(),
            width: row.width,
            height: row.height,
            tile_width: row.tile_width,
            tile_height: row.tile_height,
            creator: row.creator.clone(),
            layers,
        })
    }

    fn write_map(&mut self, map: &TileMap) {
        self.maps.insert(
            map.uuid,
            MapRow {
                name: map.name.clone(),
                width: map.width,
                height: map.height,
                tile_width: map.tile_width,
                tile_height: map.tile_height,
                creator: map.creator.clone(),
            },
        );
        self.layers.retain(|l| l.map_id != map.uuid);
        self.layers
            .extend(map.layers.iter().map(|l| LayerRow::from_layer(map.uuid, l)));
    }

    fn maps_where(
        &self,
        policy: DecodePolicy,
        pred: impl Fn(&MapRow) -> bool,
    ) -> Result<Vec<TileMap>, MapError> {
        let mut ids: Vec<Uuid> = self
            .maps
            .iter()
            .filter(|(_, row)| pred(*row))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids.into_iter().map(|id| self.assemble(id, policy)).collect()
    }
}

/// In-process [`MapStore`].
pub struct MemoryStore {
    tables: Mutex<Tables>,
    policy: DecodePolicy,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DecodePolicy::default())
    }
}

impl MemoryStore {
    /// An empty store decoding layer rows with `policy`.
    pub fn new(policy: DecodePolicy) -> Self {
        MemoryStore {
            tables: Mutex::new(Tables::default()),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raw stored cell column of a layer, as a relational backend would hold it.
    pub fn stored_layer_data(&self, layer_id: Uuid) -> Option<Value> {
        self.lock()
            .layers
            .iter()
            .find(|l| l.uuid == layer_id)
            .map(|l| l.data.clone())
    }

    /// Overwrites the stored cell column of a layer without touching its timestamps.
    pub fn put_stored_layer_data(&self, layer_id: Uuid, data: Value) -> Result<(), MapError> {
        let mut tables = self.lock();
        let row = tables
            .layers
            .iter_mut()
            .find(|l| l.uuid == layer_id)
            .ok_or_else(|| MapError::not_found("layer", layer_id))?;
        row.data = data;
        Ok(())
    }
}

impl MapStore for MemoryStore {
    fn insert_map(&self, map: &TileMap) -> Result<(), MapError> {
        let mut tables = self.lock();
        if tables.maps.contains_key(&map.uuid) {
            return Err(MapError::invalid(format!("map {} already exists", map.uuid)));
        }
        tables.write_map(map);
        debug!(map = %map.uuid, layers = map.layers.len(), "map inserted");
        Ok(())
    }

    fn map(&self, id: Uuid) -> Result<TileMap, MapError> {
        self.lock().assemble(id, self.policy)
    }

    fn contains_map(&self, id: Uuid) -> Result<bool, MapError> {
        Ok(self.lock().maps.contains_key(&id))
    }

    fn update_map(&self, map: &TileMap) -> Result<(), MapError> {
        let mut tables = self.lock();
        if !tables.maps.contains_key(&map.uuid) {
            return Err(MapError::not_found("map", map.uuid));
        }
        tables.write_map(map);
        Ok(())
    }

    fn delete_map(&self, id: Uuid) -> Result<(), MapError> {
        let mut tables = self.lock();
        tables
            .maps
            .remove(&id)
            .ok_or_else(|| MapError::not_found("map", id))?;
        tables.layers.retain(|l| l.map_id != id);
        Ok(())
    }

    fn maps_by_name(&self, name: &str) -> Result<Vec<TileMap>, MapError> {
        self.lock().maps_where(self.policy, |row| row.name == name)
    }

    fn maps_by_creator(&self, email: &str) -> Result<Vec<TileMap>, MapError> {
        self.lock().maps_where(self.policy, |row| {
            row.creator.as_ref().is_some_and(|c| c.email == email)
        })
    }

    fn insert_tileset(&self, tileset: &TileSet) -> Result<(), MapError> {
        let mut tables = self.lock();
        if tables.tilesets.get(&tileset.uuid).is_some() {
            return Err(MapError::invalid(format!(
                "tileset {} already exists",
                tileset.uuid
            )));
        }
        tables.tilesets.insert(tileset.clone());
        Ok(())
    }

    fn tileset(&self, id: Uuid) -> Result<TileSet, MapError> {
        self.lock()
            .tilesets
            .get(&id)
            .cloned()
            .ok_or_else(|| MapError::not_found("tileset", id))
    }

    fn update_tileset(&self, tileset: &TileSet) -> Result<(), MapError> {
        let mut tables = self.lock();
        if tables.tilesets.get(&tileset.uuid).is_none() {
            return Err(MapError::not_found("tileset", tileset.uuid));
        }
        tables.tilesets.insert(tileset.clone());
        Ok(())
    }

    fn delete_tileset(&self, id: Uuid) -> Result<(), MapError> {
        self.lock()
            .tilesets
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| MapError::not_found("tileset", id))
    }

    fn tilesets(&self) -> Result<Vec<TileSet>, MapError> {
        Ok(self.lock().tilesets.iter().cloned().collect())
    }

    fn commit_import(&self, tilesets: &[TileSet], map: &TileMap) -> Result<(), MapError> {
        let mut tables = self.lock();
        // check everything before the first write
        let mut problems = Vec::new();
        if tables.maps.contains_key(&map.uuid) {
            problems.push(format!("map {} already exists", map.uuid));
        }
        for ts in tilesets {
            if tables.tilesets.get(&ts.uuid).is_some() {
                problems.push(format!("tileset {} already exists", ts.uuid));
            }
        }
        if !problems.is_empty() {
            return Err(MapError::Validation { problems });
        }

        for ts in tilesets {
            tables.tilesets.insert(ts.clone());
        }
        tables.write_map(map);
        debug!(map = %map.uuid, tilesets = tilesets.len(), "import committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Brush, Cell, TileGeometry, Tile};

    #[test]
    fn map_round_trips_through_rows() {
        let store = MemoryStore::default();
        let mut map = TileMap::new(
            "harbor",
            (4, 4),
            (16, 16),
            Some(Creator {
                name: "Ada".into(),
                email: "ada@example.com".into(),
            }),
        );
        let layer_id = map.layers[0].uuid;
        map.layer_mut(layer_id)
            .unwrap()
            .place(Cell::Tile(Tile {
                x: 1,
                y: 1,
                brush: Brush { tileset: Uuid::new_v4(), tile_x: 0, tile_y: 0 },
            }))
            .unwrap();
        store.insert_map(&map).unwrap();

        assert_eq!(store.map(map.uuid).unwrap(), map);
        assert_eq!(store.maps_by_creator("ada@example.com").unwrap().len(), 1);
        assert!(store.maps_by_name("other").unwrap().is_empty());
    }

    #[test]
    fn delete_map_cascades_to_layers() {
        let store = MemoryStore::default();
        let map = TileMap::new("harbor", (4, 4), (16, 16), None);
        let layer_id = map.layers[0].uuid;
        store.insert_map(&map).unwrap();
        store.delete_map(map.uuid).unwrap();
        assert!(store.stored_layer_data(layer_id).is_none());
        assert!(matches!(store.map(map.uuid), Err(MapError::NotFound { .. })));
    }

    #[test]
    fn commit_import_writes_nothing_on_conflict() {
        let store = MemoryStore::default();
        let existing = TileSet::new("a", None, (32, 32), TileGeometry::square(16));
        store.insert_tileset(&existing).unwrap();

        let fresh = TileSet::new("b", None, (32, 32), TileGeometry::square(16));
        let map = TileMap::new("m", (1, 1), (16, 16), None);
        let err = store
            .commit_import(&[fresh.clone(), existing], &map)
            .unwrap_err();

        assert!(matches!(err, MapError::Validation { .. }));
        assert!(!store.contains_map(map.uuid).unwrap());
        assert!(store.tileset(fresh.uuid).is_err());
    }

    #[test]
    fn strict_store_rejects_corrupt_rows() {
        let store = MemoryStore::new(DecodePolicy::Strict);
        let map = TileMap::new("harbor", (4, 4), (16, 16), None);
        store.insert_map(&map).unwrap();
        store
            .put_stored_layer_data(map.layers[0].uuid, serde_json::json!([{ "x": 1 }]))
            .unwrap();
        assert!(matches!(store.map(map.uuid), Err(MapError::Validation { .. })));
    }
}
