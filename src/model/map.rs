//! Tile maps.

use super::layer::{Layer, LayerType};
use crate::error::MapError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author of a map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    /// Display name.
    pub name: String,
    /// Contact address; maps can be listed by it.
    pub email: String,
}

/// A tile map and the layers it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct TileMap {
    /// Stable identifier.
    pub uuid: Uuid,
    /// Display name, not unique.
    pub name: String,
    /// Width in tiles.
    pub width: u32,
    /// Height in tiles.
    pub height: u32,
    /// Tile width in pixels.
    pub tile_width: u32,
    /// Tile height in pixels.
    pub tile_height: u32,
    /// Author, when known.
    pub creator: Option<Creator>,
    /// Every layer, soft-deleted ones included.
    pub layers: Vec<Layer>,
}

impl TileMap {
    /// Creates a map with a fresh identifier and one empty background layer.
    pub fn new(
        name: impl Into<String>,
        size: (u32, u32),
        tile_size: (u32, u32),
        creator: Option<Creator>,
    ) -> Self {
        let mut map = Self::without_layers(name, size, tile_size, creator);
        map.layers
            .push(Layer::new("background", LayerType::Background, size.0, size.1));
        map
    }

    /// Creates a map with a fresh identifier and no layers; used when the
    /// layers come from an import.
    pub fn without_layers(
        name: impl Into<String>,
        size: (u32, u32),
        tile_size: (u32, u32),
        creator: Option<Creator>,
    ) -> Self {
        TileMap {
            uuid: Uuid::new_v4(),
            name: name.into(),
            width: size.0,
            height: size.1,
            tile_width: tile_size.0,
            tile_height: tile_size.1,
            creator,
            layers: Vec::new(),
        }
    }

    /// Layers that have not been soft-deleted, in insertion order.
    pub fn active_layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter().filter(|l| !l.is_deleted())
    }

    /// An active layer by identifier.
    pub fn layer(&self, id: Uuid) -> Option<&Layer> {
        self.active_layers().find(|l| l.uuid == id)
    }

    /// Mutable access to an active layer; `NotFound` otherwise.
    pub fn layer_mut(&mut self, id: Uuid) -> Result<&mut Layer, MapError> {
        self.layers
            .iter_mut()
            .find(|l| l.uuid == id && !l.is_deleted())
            .ok_or_else(|| MapError::not_found("layer", id))
    }

    /// Appends a layer above every existing one. The layer takes the map's size.
    pub fn add_layer(&mut self, name: impl Into<String>, layer_type: LayerType) -> &mut Layer {
        let z = self.active_layers().map(|l| l.z + 1).max().unwrap_or(0);
        let mut layer = Layer::new(name, layer_type, self.width, self.height);
        layer.z = z;
        self.layers.push(layer);
        let idx = self.layers.len() - 1;
        &mut self.layers[idx]
    }

    /// Marks a layer deleted; its row is kept.
    pub fn soft_delete_layer(&mut self, id: Uuid) -> Result<(), MapError> {
        self.layer_mut(id)?.soft_delete();
        Ok(())
    }

    /// Active layers sorted by `z`; ties keep insertion order.
    pub fn layers_by_z(&self) -> Vec<&Layer> {
        let mut layers: Vec<&Layer> = self.active_layers().collect();
        layers.sort_by_key(|l| l.z);
        layers
    }
}
