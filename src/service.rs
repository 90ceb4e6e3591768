//! Map operations over a [`MapStore`] and a [`BlobStore`].
//!
//! Imports are all or nothing: parsing and reconciliation finish before the
//! single [`MapStore::commit_import`] call, and any unresolved tileset
//! without auto-create stops the import before that point.

use crate::blob::BlobStore;
use crate::codec;
use crate::config::Settings;
use crate::error::MapError;
use crate::export::{self, ExportDocument};
use crate::import::{ImportedMap, ImporterRegistry};
use crate::model::{Cell, Creator, Layer, LayerType, TileMap, TileSet};
use crate::reconcile::{self, ReconcileOptions, Reconciliation};
use crate::render::{self, Rasterizer};
use crate::store::MapStore;
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of a committed import.
#[derive(Debug, Clone)]
pub struct ImportReport {
    /// Name of the importer that read the file.
    pub importer: &'static str,
    /// The persisted map.
    pub map: TileMap,
    /// Tilesets auto-created for this import.
    pub created_tilesets: Vec<TileSet>,
    /// Tiles left out because their tileset stayed unresolved.
    pub dropped_tiles: usize,
}

/// What an import would do, without doing it.
#[derive(Debug, Clone)]
pub struct ImportPreview {
    /// Name of the importer that read the file.
    pub importer: &'static str,
    /// The parsed document.
    pub map: ImportedMap,
    /// How its tilesets would resolve.
    pub reconciliation: Reconciliation,
}

/// Map editing, import, export and rendering over a store and a blob store.
pub struct MapService<S, B> {
    store: S,
    raster: Rasterizer<B>,
    importers: ImporterRegistry,
    settings: Settings,
}

impl<S: MapStore, B: BlobStore> MapService<S, B> {
    /// Importers and rendering are configured from `settings`.
    pub fn new(store: S, blobs: B, settings: Settings) -> Self {
        let importers =
            ImporterRegistry::with_defaults(settings.import.decode_policy, &settings.import.field_type_suffix);
        MapService {
            store,
            raster: Rasterizer::new(blobs, settings.tilesets.image_root.clone()),
            importers,
            settings,
        }
    }

    /// The map store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The rasterizer and its image store.
    pub fn rasterizer(&self) -> &Rasterizer<B> {
        &self.raster
    }

    /// Settings the service was built with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Creates and stores a map with one empty background layer.
    pub fn create_map(
        &self,
        name: &str,
        size: (u32, u32),
        tile_size: (u32, u32),
        creator: Option<Creator>,
    ) -> Result<TileMap, MapError> {
        if tile_size.0 == 0 || tile_size.1 == 0 {
            return Err(MapError::invalid("tile size must be positive"));
        }
        let map = TileMap::new(name, size, tile_size, creator);
        self.store.insert_map(&map)?;
        info!(map = %map.uuid, %name, "map created");
        Ok(map)
    }

    /// A map with its layers.
    pub fn map(&self, id: Uuid) -> Result<TileMap, MapError> {
        self.store.map(id)
    }

    /// Maps with exactly this name.
    pub fn maps_by_name(&self, name: &str) -> Result<Vec<TileMap>, MapError> {
        self.store.maps_by_name(name)
    }

    /// Maps whose creator has this email.
    pub fn maps_by_creator(&self, email: &str) -> Result<Vec<TileMap>, MapError> {
        self.store.maps_by_creator(email)
    }

    /// Deletes a map, its layers and their generated images.
    pub fn delete_map(&self, id: Uuid) -> Result<(), MapError> {
        let map = self.store.map(id)?;
        self.store.delete_map(id)?;
        for layer in &map.layers {
            if let Err(e) = self.raster.blobs().delete(&render::layer_image_key(id, layer.uuid)) {
                warn!(map = %id, layer = %layer.uuid, "layer image not removed: {e}");
            }
        }
        if let Err(e) = self.raster.blobs().delete(&render::map_image_key(id)) {
            warn!(map = %id, "map image not removed: {e}");
        }
        Ok(())
    }

    /// Adds an empty layer above the existing ones.
    pub fn add_layer(&self, map_id: Uuid, name: &str, layer_type: LayerType) -> Result<Layer, MapError> {
        let mut map = self.store.map(map_id)?;
        let layer = map.add_layer(name, layer_type).clone();
        self.store.update_map(&map)?;
        Ok(layer)
    }

    /// Adds or replaces the cell at its coordinate.
    pub fn place_cell(&self, map_id: Uuid, layer_id: Uuid, cell: Cell) -> Result<(), MapError> {
        self.edit_layer(map_id, layer_id, |layer| layer.place(cell))
    }

    /// Returns whether a cell was there to remove.
    pub fn remove_cell(&self, map_id: Uuid, layer_id: Uuid, x: i32, y: i32) -> Result<bool, MapError> {
        self.edit_layer(map_id, layer_id, |layer| Ok(layer.remove(x, y)))
    }

    /// Replaces every cell of a layer from loosely shaped JSON; missing
    /// numbers become 0 instead of failing.
    pub fn replace_layer_data(&self, map_id: Uuid, layer_id: Uuid, raw: &Value) -> Result<(), MapError> {
        self.edit_layer(map_id, layer_id, |layer| {
            let content = codec::coerce(raw, layer.layer_type());
            layer.set_content(content)
        })
    }

    /// Soft-deletes a layer.
    pub fn delete_layer(&self, map_id: Uuid, layer_id: Uuid) -> Result<(), MapError> {
        self.edit_layer(map_id, layer_id, |layer| {
            layer.soft_delete();
            Ok(())
        })
    }

    fn edit_layer<T>(
        &self,
        map_id: Uuid,
        layer_id: Uuid,
        edit: impl FnOnce(&mut Layer) -> Result<T, MapError>,
    ) -> Result<T, MapError> {
        let mut map = self.store.map(map_id)?;
        let layer = map.layer_mut(layer_id)?;
        if layer.is_deleted() {
            return Err(MapError::not_found("layer", layer_id));
        }
        let out = edit(layer)?;
        self.store.update_map(&map)?;
        Ok(out)
    }

    /// Stores a new tileset.
    pub fn create_tileset(&self, tileset: TileSet) -> Result<TileSet, MapError> {
        self.store.insert_tileset(&tileset)?;
        info!(tileset = %tileset.uuid, name = %tileset.name, "tileset created");
        Ok(tileset)
    }

    /// Every stored tileset.
    pub fn tilesets(&self) -> Result<Vec<TileSet>, MapError> {
        self.store.tilesets()
    }

    /// Parses and reconciles a file without persisting anything.
    pub fn preview_import(&self, path: &Path, options: &ReconcileOptions) -> Result<ImportPreview, MapError> {
        let importer = self.importers.detect(path)?;
        let map = importer.parse(path)?;
        let registry = self.store.registry()?;
        let reconciliation = reconcile::reconcile_map(&map, &registry, options);
        Ok(ImportPreview {
            importer: importer.name(),
            map,
            reconciliation,
        })
    }

    /// Imports with reconciliation options taken from the settings.
    pub fn import(&self, path: &Path) -> Result<ImportReport, MapError> {
        self.import_with(path, &self.settings.reconcile_options())
    }

    /// Parses, reconciles and stores a map file.
    ///
    /// Nothing is written unless every tileset resolves or auto-creation is on.
    /// An identifier already in use is replaced with fresh ones.
    pub fn import_with(&self, path: &Path, options: &ReconcileOptions) -> Result<ImportReport, MapError> {
        let ImportPreview {
            importer,
            map: imported,
            reconciliation,
        } = self.preview_import(path, options)?;

        if !reconciliation.is_complete() {
            let missing = reconciliation.missing_names();
            if !options.auto_create {
                return Err(MapError::Reconciliation { missing });
            }
            warn!(path = %path.display(), ?missing, "tiles of unresolved tilesets will be left out");
        }

        let info = &imported.info;
        if info.tile_width == 0 || info.tile_height == 0 {
            return Err(MapError::invalid("tile size must be positive"));
        }
        let mut map = TileMap::without_layers(
            info.name.clone(),
            (info.width, info.height),
            (info.tile_width, info.tile_height),
            info.creator.clone(),
        );
        let mut keep_ids = true;
        if let Some(id) = info.uuid {
            if self.store.contains_map(id)? {
                info!(map = %id, "map identifier already taken, assigning new ones");
                keep_ids = false;
            } else {
                map.uuid = id;
            }
        }

        let mut dropped_tiles = 0;
        for imported_layer in &imported.layers {
            let (mut layer, dropped) = imported_layer.to_layer(&reconciliation.resolved)?;
            if !keep_ids {
                layer.uuid = Uuid::new_v4();
            }
            dropped_tiles += dropped;
            map.layers.push(layer);
        }
        if map.layers.is_empty() {
            map.layers
                .push(Layer::new("background", LayerType::Background, map.width, map.height));
        }

        self.store.commit_import(&reconciliation.created, &map)?;
        info!(
            importer,
            map = %map.uuid,
            layers = map.layers.len(),
            created_tilesets = reconciliation.created.len(),
            dropped_tiles,
            "map imported"
        );
        Ok(ImportReport {
            importer,
            map,
            created_tilesets: reconciliation.created,
            dropped_tiles,
        })
    }

    /// The map in the current export schema.
    pub fn export(&self, map_id: Uuid) -> Result<ExportDocument, MapError> {
        let map = self.store.map(map_id)?;
        let registry = self.store.registry()?;
        Ok(export::to_canonical_form(&map, &registry))
    }

    /// Writes the export document as pretty JSON.
    pub fn export_to_file(&self, map_id: Uuid, path: &Path) -> Result<(), MapError> {
        let doc = self.export(map_id)?;
        let text = serde_json::to_string_pretty(&doc).map_err(|source| MapError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, text).map_err(|e| MapError::io(path, e))
    }

    /// Blob key of the layer's image, rendered first if stale or forced.
    /// The layer's `image_path` is updated to point at it.
    pub fn layer_image(&self, map_id: Uuid, layer_id: Uuid, force_refresh: bool) -> Result<String, MapError> {
        let mut map = self.store.map(map_id)?;
        let layer = map
            .layer(layer_id)
            .filter(|l| !l.is_deleted())
            .ok_or_else(|| MapError::not_found("layer", layer_id))?;
        let registry = self.store.registry()?;
        let key = self.raster.get_or_render_layer(&map, layer, &registry, force_refresh)?;

        if layer.image_path.as_deref() != Some(key.as_str()) {
            map.layer_mut(layer_id)?.image_path = Some(key.clone());
            self.store.update_map(&map)?;
        }
        Ok(key)
    }

    /// Blob key of the freshly composited map image.
    pub fn map_image(&self, map_id: Uuid) -> Result<String, MapError> {
        let map = self.store.map(map_id)?;
        let registry = self.store.registry()?;
        self.raster.render_map_to_store(&map, &registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::model::{Brush, FieldTypeTile, Tile, TileGeometry};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn service() -> MapService<MemoryStore, MemoryBlobStore> {
        MapService::new(MemoryStore::default(), MemoryBlobStore::new(), Settings::default())
    }

    #[test]
    fn new_map_has_an_empty_background_layer() {
        let svc = service();
        let map = svc.create_map("town", (8, 8), (16, 16), None).unwrap();
        let stored = svc.map(map.uuid).unwrap();
        assert_eq!(stored.layers.len(), 1);
        assert_eq!(stored.layers[0].layer_type(), LayerType::Background);
        assert!(stored.layers[0].content().is_empty());
    }

    #[test]
    fn edits_persist_and_respect_layer_type() {
        let svc = service();
        let map = svc.create_map("town", (4, 4), (16, 16), None).unwrap();
        let zones = svc.add_layer(map.uuid, "zones", LayerType::FieldType).unwrap();

        let cell = Cell::FieldType(FieldTypeTile { x: 1, y: 1, field_type: 2 });
        svc.place_cell(map.uuid, zones.uuid, cell).unwrap();
        let brush = Brush { tileset: Uuid::new_v4(), tile_x: 0, tile_y: 0 };
        assert!(svc
            .place_cell(map.uuid, zones.uuid, Cell::Tile(Tile { x: 0, y: 0, brush }))
            .is_err());
        assert!(svc
            .place_cell(map.uuid, zones.uuid, Cell::FieldType(FieldTypeTile { x: 9, y: 0, field_type: 1 }))
            .is_err());

        let stored = svc.map(map.uuid).unwrap();
        assert_eq!(stored.layer(zones.uuid).unwrap().content().len(), 1);
        assert!(svc.remove_cell(map.uuid, zones.uuid, 1, 1).unwrap());
        assert!(!svc.remove_cell(map.uuid, zones.uuid, 1, 1).unwrap());
    }

    #[test]
    fn replace_layer_data_coerces_missing_fields() {
        let svc = service();
        let map = svc.create_map("town", (4, 4), (16, 16), None).unwrap();
        let bg = map.layers[0].uuid;
        svc.replace_layer_data(map.uuid, bg, &json!([{"x": 2, "brush": {"tileX": 1}}]))
            .unwrap();
        let stored = svc.map(map.uuid).unwrap();
        let tile = stored.layer(bg).unwrap().content().tiles().unwrap()[0];
        assert_eq!((tile.x, tile.y), (2, 0));
        assert_eq!(tile.brush.tileset, Uuid::nil());
        assert_eq!(tile.brush.tile_x, 1);
    }

    #[test]
    fn deleted_layers_are_kept_but_not_editable() {
        let svc = service();
        let map = svc.create_map("town", (4, 4), (16, 16), None).unwrap();
        let bg = map.layers[0].uuid;
        svc.delete_layer(map.uuid, bg).unwrap();

        let stored = svc.map(map.uuid).unwrap();
        assert!(stored.layer(bg).unwrap().is_deleted());
        assert!(matches!(
            svc.remove_cell(map.uuid, bg, 0, 0),
            Err(MapError::NotFound { .. })
        ));
        assert!(svc.export(map.uuid).unwrap().layers.is_empty());
    }

    #[test]
    fn layer_image_records_its_key() {
        let svc = service();
        svc.create_tileset(TileSet::new("t", None, (16, 16), TileGeometry::square(16)))
            .unwrap();
        let map = svc.create_map("town", (2, 2), (16, 16), None).unwrap();
        let bg = map.layers[0].uuid;

        let key = svc.layer_image(map.uuid, bg, false).unwrap();
        assert_eq!(key, render::layer_image_key(map.uuid, bg));
        let stored = svc.map(map.uuid).unwrap();
        assert_eq!(stored.layer(bg).unwrap().image_path.as_deref(), Some(key.as_str()));
        assert!(svc.rasterizer().blobs().exists(&key));
    }
}
