//! Map file importers.
//!
//! Every importer turns one external format into an [`ImportedMap`]: map
//! info, tileset descriptors and layers whose tiles already use local
//! tileset coordinates. Parsing only reads; nothing is persisted here.

pub mod canonical;
pub mod gid;
pub mod script;
pub mod tiled_json;
pub mod tmx;

use crate::codec::DecodePolicy;
use crate::error::MapError;
use crate::model::{
    Brush, Creator, FieldTypeTile, Layer, LayerContent, LayerType, ObjectTile, Tile, TileGeometry,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// How sure an importer is that it understands a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    /// Not this format.
    No,
    /// Could be; used when the file cannot be inspected.
    Maybe,
    /// This format.
    Certain,
}

/// A map file format.
pub trait Importer: Send + Sync {
    /// Short name reported in import results.
    fn name(&self) -> &'static str;
    /// How likely `path` is in this format; cheap and never fails.
    fn can_parse(&self, path: &Path) -> Confidence;
    /// Reads the file into a neutral description.
    fn parse(&self, path: &Path) -> Result<ImportedMap, MapError>;
}

/// Map-level fields of an imported document.
#[derive(Debug, Clone, PartialEq)]
pub struct MapInfo {
    /// Identifier carried by the document, if any.
    pub uuid: Option<Uuid>,
    /// Map name.
    pub name: String,
    /// Width in tiles.
    pub width: u32,
    /// Height in tiles.
    pub height: u32,
    /// Tile width in pixels.
    pub tile_width: u32,
    /// Tile height in pixels.
    pub tile_height: u32,
    /// Author, when the format records one.
    pub creator: Option<Creator>,
}

/// A tileset as referenced by an imported file.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedTileset {
    /// Key that the imported tiles use to reference this tileset.
    pub key: String,
    /// Identifier of a registered tileset, if the document names one.
    pub uuid: Option<Uuid>,
    /// Tileset name.
    pub name: String,
    /// Local image, resolved against the document.
    pub image_path: Option<PathBuf>,
    /// Remote image location.
    pub image_url: Option<String>,
    /// 0 when the document does not say.
    pub image_width: u32,
    /// Image height in pixels, 0 when unknown.
    pub image_height: u32,
    /// Declared grid, if any.
    pub geometry: Option<TileGeometry>,
    /// Number of tiles, 0 when unknown.
    pub tile_count: u32,
    /// First global id in formats that use them.
    pub first_gid: u32,
}

impl ImportedTileset {
    /// Descriptor with only a key and a name.
    pub fn named(key: impl Into<String>, name: impl Into<String>) -> Self {
        ImportedTileset {
            key: key.into(),
            uuid: None,
            name: name.into(),
            image_path: None,
            image_url: None,
            image_width: 0,
            image_height: 0,
            geometry: None,
            tile_count: 0,
            first_gid: 1,
        }
    }
}

/// A brush tile whose tileset is still an imported key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedTile {
    /// Column on the map.
    pub x: i32,
    /// Row on the map.
    pub y: i32,
    /// Key of an [`ImportedTileset`], or a tileset identifier.
    pub tileset: String,
    /// Column in the tileset grid.
    pub tile_x: u32,
    /// Row in the tileset grid.
    pub tile_y: u32,
}

/// Cells of an imported layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportedCells {
    /// Brush tiles for background, floor and sky layers.
    Paint(Vec<ImportedTile>),
    /// Field types.
    FieldType(Vec<FieldTypeTile>),
    /// Objects.
    Object(Vec<ObjectTile>),
}

impl ImportedCells {
    /// No cells, shaped for `layer_type`.
    pub fn empty(layer_type: LayerType) -> Self {
        match layer_type {
            LayerType::FieldType => ImportedCells::FieldType(Vec::new()),
            LayerType::Object => ImportedCells::Object(Vec::new()),
            _ => ImportedCells::Paint(Vec::new()),
        }
    }

    /// Cells of stored content; brush tilesets become their identifier strings.
    pub fn from_content(content: &LayerContent) -> Self {
        match content {
            LayerContent::Background(t) | LayerContent::Floor(t) | LayerContent::Sky(t) => {
                ImportedCells::Paint(
                    t.iter()
                        .map(|t| ImportedTile {
                            x: t.x,
                            y: t.y,
                            tileset: t.brush.tileset.to_string(),
                            tile_x: t.brush.tile_x,
                            tile_y: t.brush.tile_y,
                        })
                        .collect(),
                )
            }
            LayerContent::FieldType(t) => ImportedCells::FieldType(t.clone()),
            LayerContent::Object(t) => ImportedCells::Object(t.clone()),
        }
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        match self {
            ImportedCells::Paint(t) => t.len(),
            ImportedCells::FieldType(t) => t.len(),
            ImportedCells::Object(t) => t.len(),
        }
    }

    /// Whether there are no cells.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A layer of an imported map.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedLayer {
    /// Identifier carried by the document, if any.
    pub uuid: Option<Uuid>,
    /// Layer name.
    pub name: String,
    /// Layer type.
    pub layer_type: LayerType,
    /// Horizontal offset in tiles.
    pub x: i32,
    /// Vertical offset in tiles.
    pub y: i32,
    /// Stacking order.
    pub z: i32,
    /// Width in tiles.
    pub width: u32,
    /// Height in tiles.
    pub height: u32,
    /// Visibility flag.
    pub visible: bool,
    /// Blend factor.
    pub opacity: f32,
    /// Cells with unresolved tileset keys.
    pub cells: ImportedCells,
    /// Creation time, if recorded.
    pub created_at: Option<DateTime<Utc>>,
    /// Last change, if recorded.
    pub updated_at: Option<DateTime<Utc>>,
}

impl ImportedLayer {
    /// Empty, visible, fully opaque layer.
    pub fn new(name: impl Into<String>, layer_type: LayerType, width: u32, height: u32) -> Self {
        ImportedLayer {
            uuid: None,
            name: name.into(),
            layer_type,
            x: 0,
            y: 0,
            z: 0,
            width,
            height,
            visible: true,
            opacity: 1.0,
            cells: ImportedCells::empty(layer_type),
            created_at: None,
            updated_at: None,
        }
    }

    /// Builds the model layer, translating tileset keys through `resolved`.
    ///
    /// Tiles whose key has no entry are dropped; the count of dropped tiles
    /// is returned alongside the layer.
    pub fn to_layer(&self, resolved: &HashMap<String, Uuid>) -> Result<(Layer, usize), MapError> {
        let mut dropped = 0;
        let content = match (&self.cells, self.layer_type) {
            (ImportedCells::Paint(tiles), t) if t.is_paintable() => {
                let tiles = tiles
                    .iter()
                    .filter_map(|it| match resolved.get(&it.tileset) {
                        Some(id) => Some(Tile {
                            x: it.x,
                            y: it.y,
                            brush: Brush {
                                tileset: *id,
                                tile_x: it.tile_x,
                                tile_y: it.tile_y,
                            },
                        }),
                        None => {
                            dropped += 1;
                            None
                        }
                    })
                    .collect();
                LayerContent::paint(t, tiles)?
            }
            (ImportedCells::FieldType(t), LayerType::FieldType) => LayerContent::FieldType(t.clone()),
            (ImportedCells::Object(t), LayerType::Object) => LayerContent::Object(t.clone()),
            (_, t) => {
                return Err(MapError::invalid(format!(
                    "layer '{}' declares type {t} but carries other cells",
                    self.name
                )))
            }
        };

        let mut layer =
            Layer::new(self.name.clone(), self.layer_type, self.width, self.height).with_content(content);
        if let Some(id) = self.uuid {
            layer.uuid = id;
        }
        layer.x = self.x;
        layer.y = self.y;
        layer.z = self.z;
        layer.visible = self.visible;
        layer.opacity = self.opacity;
        if let Some(at) = self.created_at {
            layer.created_at = at;
        }
        if let Some(at) = self.updated_at {
            layer.updated_at = at;
        }
        Ok((layer, dropped))
    }
}

/// Format-independent description of an imported map.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedMap {
    /// Map-level fields.
    pub info: MapInfo,
    /// Tilesets the document declares.
    pub tilesets: Vec<ImportedTileset>,
    /// Layers in document order.
    pub layers: Vec<ImportedLayer>,
}

impl ImportedMap {
    /// Tileset keys referenced by at least one tile.
    pub fn referenced_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for layer in &self.layers {
            if let ImportedCells::Paint(tiles) = &layer.cells {
                for t in tiles {
                    if !keys.contains(&t.tileset.as_str()) {
                        keys.push(&t.tileset);
                    }
                }
            }
        }
        keys
    }
}

/// Picks an importer per file.
pub struct ImporterRegistry {
    importers: Vec<Box<dyn Importer>>,
}

impl ImporterRegistry {
    /// A registry with no importers.
    pub fn empty() -> Self {
        ImporterRegistry {
            importers: Vec::new(),
        }
    }

    /// Canonical JSON, TMX, Tiled JSON and the legacy script format.
    pub fn with_defaults(policy: DecodePolicy, field_type_suffix: &str) -> Self {
        let mut reg = Self::empty();
        reg.register(canonical::CanonicalImporter::new(policy));
        reg.register(tmx::TmxImporter);
        reg.register(tiled_json::TiledJsonImporter);
        reg.register(script::ScriptImporter::new(field_type_suffix));
        reg
    }

    /// Adds an importer after the existing ones.
    pub fn register(&mut self, importer: impl Importer + 'static) {
        self.importers.push(Box::new(importer));
    }

    /// The most confident importer; earlier registrations win ties.
    pub fn detect(&self, path: &Path) -> Result<&dyn Importer, MapError> {
        let mut best: Option<(&dyn Importer, Confidence)> = None;
        for importer in &self.importers {
            let c = importer.can_parse(path);
            debug!(importer = importer.name(), path = %path.display(), ?c, "probe");
            if c > Confidence::No && best.map_or(true, |(_, b)| c > b) {
                best = Some((importer.as_ref(), c));
            }
        }
        best.map(|(i, _)| i)
            .ok_or_else(|| MapError::unsupported(path, "no importer recognises this file"))
    }

    /// Parses a file without reconciling or persisting anything.
    pub fn parse_only(&self, path: &Path) -> Result<ImportedMap, MapError> {
        let importer = self.detect(path)?;
        let map = importer.parse(path)?;
        info!(
            importer = importer.name(),
            path = %path.display(),
            tilesets = map.tilesets.len(),
            layers = map.layers.len(),
            "map parsed"
        );
        Ok(map)
    }
}

pub(crate) fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("imported")
        .to_string()
}

pub(crate) fn read_text(path: &Path) -> Result<String, MapError> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => MapError::not_found("file", path.display()),
        _ => MapError::io(path, e),
    })
}

/// Layer type of a Tiled tile layer: an explicit `layer_type` property
/// wins, then well-known names, then `background`.
pub(crate) fn infer_layer_type(name: &str, declared: Option<&str>) -> Result<LayerType, String> {
    if let Some(declared) = declared {
        return declared
            .parse::<LayerType>()
            .map_err(|_| format!("layer '{name}': unknown layer_type '{declared}'"));
    }
    let lower = name.to_ascii_lowercase();
    Ok(if lower.contains("sky") {
        LayerType::Sky
    } else if lower.contains("floor") {
        LayerType::Floor
    } else if lower.contains("field") || lower.contains("collision") {
        LayerType::FieldType
    } else {
        LayerType::Background
    })
}

/// Adds one non-empty grid cell of a Tiled tile layer.
///
/// Field-type and object layers keep the global id as their value; paint
/// layers need the resolved `(tileset key, tile_x, tile_y)`. Returns false
/// when a paint cell has no brush.
pub(crate) fn push_grid_cell(
    cells: &mut ImportedCells,
    x: i32,
    y: i32,
    gid: u32,
    brush: Option<(&str, u32, u32)>,
) -> bool {
    match cells {
        ImportedCells::FieldType(t) => t.push(FieldTypeTile {
            x,
            y,
            field_type: i64::from(gid),
        }),
        ImportedCells::Object(t) => t.push(ObjectTile {
            x,
            y,
            object_type: i64::from(gid),
        }),
        ImportedCells::Paint(t) => match brush {
            Some((key, tile_x, tile_y)) => t.push(ImportedTile {
                x,
                y,
                tileset: key.to_string(),
                tile_x,
                tile_y,
            }),
            None => return false,
        },
    }
    true
}

/// Converts a pixel offset to whole tiles.
pub(crate) fn tiles_from_pixels(offset: f32, tile: u32) -> i32 {
    if tile == 0 {
        0
    } else {
        (offset / tile as f32).round() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_type_inference() {
        assert_eq!(infer_layer_type("Sky 2", None).unwrap(), LayerType::Sky);
        assert_eq!(infer_layer_type("collision", None).unwrap(), LayerType::FieldType);
        assert_eq!(infer_layer_type("ground", None).unwrap(), LayerType::Background);
        assert_eq!(
            infer_layer_type("ground", Some("floor")).unwrap(),
            LayerType::Floor
        );
        assert!(infer_layer_type("ground", Some("water")).is_err());
    }

    #[test]
    fn to_layer_drops_unresolved_tiles() {
        let mut layer = ImportedLayer::new("ground", LayerType::Floor, 4, 4);
        layer.cells = ImportedCells::Paint(vec![
            ImportedTile { x: 0, y: 0, tileset: "known".into(), tile_x: 1, tile_y: 0 },
            ImportedTile { x: 1, y: 0, tileset: "gone".into(), tile_x: 0, tile_y: 0 },
        ]);
        let id = Uuid::new_v4();
        let resolved = HashMap::from([("known".to_string(), id)]);

        let (out, dropped) = layer.to_layer(&resolved).unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(out.layer_type(), LayerType::Floor);
        assert_eq!(out.content().tiles().unwrap()[0].brush.tileset, id);
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("map.bin");
        std::fs::write(&path, [0u8, 1, 2]).unwrap();
        let reg = ImporterRegistry::with_defaults(DecodePolicy::Lenient, "_fieldtype");
        assert!(matches!(
            reg.parse_only(&path),
            Err(MapError::UnsupportedFormat { .. })
        ));
    }
}
