//! Versioned canonical export documents.
//!
//! Export always writes [`CURRENT_VERSION`]. Reading dispatches on the
//! document's `export_version` through [`VersionRegistry`], so a later
//! schema only needs a new entry there.

use crate::codec::{self, DecodePolicy};
use crate::error::MapError;
use crate::import::{ImportedCells, ImportedLayer, ImportedMap, ImportedTileset, MapInfo};
use crate::model::{Creator, LayerType, TileGeometry, TileMap, TileSet};
use crate::registry::TilesetLookup;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

/// Schema version written by [`to_canonical_form`].
pub const CURRENT_VERSION: &str = "1.0";

/// Canonical document, schema `1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    /// Schema version of the document.
    pub export_version: String,
    /// Map-level fields.
    pub map: ExportMap,
    /// Tilesets referenced by the exported layers.
    pub tilesets: Vec<ExportTileset>,
    /// Active layers.
    pub layers: Vec<ExportLayer>,
}

/// Map section of an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMap {
    /// Map identifier.
    pub uuid: Uuid,
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
    /// Author, when known.
    pub creator: Option<Creator>,
}

/// Tileset section of an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportTileset {
    /// Tileset identifier; brushes refer to it.
    pub uuid: Uuid,
    /// Tileset name.
    pub name: String,
    /// Image width in pixels.
    pub image_width: u32,
    /// Image height in pixels.
    pub image_height: u32,
    /// Tile width in pixels.
    pub tile_width: u32,
    /// Tile height in pixels.
    pub tile_height: u32,
    /// Number of tiles in the grid.
    pub tile_count: u32,
    /// Remote image location.
    #[serde(default)]
    pub image_url: Option<String>,
    /// Local image path.
    #[serde(default)]
    pub image_path: Option<String>,
    /// Grid margin in pixels.
    #[serde(default)]
    pub margin: u32,
    /// Grid spacing in pixels.
    #[serde(default)]
    pub spacing: u32,
}

/// Layer section of an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportLayer {
    /// Layer identifier.
    pub uuid: Uuid,
    /// Layer name.
    pub name: String,
    /// Decides the shape of `data`.
    #[serde(rename = "type")]
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
    /// Cells in their stored form.
    pub data: Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

impl From<&TileSet> for ExportTileset {
    fn from(ts: &TileSet) -> Self {
        ExportTileset {
            uuid: ts.uuid,
            name: ts.name.clone(),
            image_width: ts.image_width,
            image_height: ts.image_height,
            tile_width: ts.tile_width,
            tile_height: ts.tile_height,
            tile_count: ts.tile_count,
            image_url: ts.image_url.clone(),
            image_path: ts.image_path.clone(),
            margin: ts.margin,
            spacing: ts.spacing,
        }
    }
}

/// Builds the export document of a map.
///
/// Soft-deleted layers are left out. The tileset list holds every tileset
/// a remaining brush references, in order of first reference.
pub fn to_canonical_form(map: &TileMap, tilesets: &dyn TilesetLookup) -> ExportDocument {
    let mut referenced: Vec<Uuid> = Vec::new();
    let mut layers = Vec::new();
    for layer in map.active_layers() {
        if let Some(tiles) = layer.content().tiles() {
            for t in tiles {
                if !referenced.contains(&t.brush.tileset) {
                    referenced.push(t.brush.tileset);
                }
            }
        }
        layers.push(ExportLayer {
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
            created_at: layer.created_at,
            updated_at: layer.updated_at,
        });
    }

    let tilesets = referenced
        .iter()
        .filter_map(|id| {
            let ts = tilesets.tileset(id);
            if ts.is_none() {
                warn!(map = %map.uuid, tileset = %id, "referenced tileset not exported: not registered");
            }
            ts
        })
        .map(|ts| ExportTileset::from(&ts))
        .collect();

    ExportDocument {
        export_version: CURRENT_VERSION.to_string(),
        map: ExportMap {
            uuid: map.uuid,
            name: map.name.clone(),
            width: map.width,
            height: map.height,
            tile_width: map.tile_width,
            tile_height: map.tile_height,
            creator: map.creator.clone(),
        },
        tilesets,
        layers,
    }
}

/// Reads an export document of any supported version.
pub fn from_canonical_form(doc: &Value, policy: DecodePolicy) -> Result<ImportedMap, MapError> {
    let version = match doc.get("export_version") {
        Some(Value::String(v)) => v.as_str(),
        Some(other) => {
            return Err(MapError::invalid(format!(
                "export_version must be a string, got {other}"
            )))
        }
        None => return Err(MapError::invalid("export_version is missing")),
    };
    let entry = VersionRegistry::get(version).ok_or_else(|| {
        MapError::invalid(format!(
            "unsupported export_version '{version}' (supported: {})",
            VersionRegistry::versions().join(", ")
        ))
    })?;
    (entry.read)(doc, policy)
}

/// One supported schema version.
pub struct VersionInfo {
    /// Value of `export_version`.
    pub version: &'static str,
    /// Human-readable summary of what the version carries.
    pub features: &'static [&'static str],
    read: fn(&Value, DecodePolicy) -> Result<ImportedMap, MapError>,
}

static VERSIONS: &[VersionInfo] = &[VersionInfo {
    version: "1.0",
    features: &[
        "map identity, size and tile size",
        "optional creator",
        "tilesets with image geometry, margin and spacing",
        "typed layers with offset, z order, visibility and opacity",
        "local brush addressing (tileset, tileX, tileY)",
        "layer timestamps",
    ],
    read: read_v1,
}];

/// Supported export schema versions.
pub struct VersionRegistry;

impl VersionRegistry {
    /// Every supported version.
    pub fn all() -> &'static [VersionInfo] {
        VERSIONS
    }

    /// Supported version strings, oldest first.
    pub fn versions() -> Vec<&'static str> {
        VERSIONS.iter().map(|v| v.version).collect()
    }

    /// Details of one version.
    pub fn get(version: &str) -> Option<&'static VersionInfo> {
        VERSIONS.iter().find(|v| v.version == version)
    }

    /// Whether `version` can be read.
    pub fn is_supported(version: &str) -> bool {
        Self::get(version).is_some()
    }

    /// Feature summary of a version.
    pub fn features(version: &str) -> Option<&'static [&'static str]> {
        Self::get(version).map(|v| v.features)
    }
}

fn read_v1(doc: &Value, policy: DecodePolicy) -> Result<ImportedMap, MapError> {
    let mut problems = Vec::new();

    let map: Option<ExportMap> = element(doc.get("map"), "map", &mut problems);
    let tilesets: Vec<ExportTileset> = elements(doc.get("tilesets"), "tilesets", &mut problems);
    let layers: Vec<ExportLayer> = elements(doc.get("layers"), "layers", &mut problems);

    let mut imported_layers = Vec::with_capacity(layers.len());
    for (i, layer) in layers.into_iter().enumerate() {
        match codec::decode(&layer.data, layer.layer_type, policy) {
            Ok(content) => imported_layers.push(ImportedLayer {
                uuid: Some(layer.uuid),
                name: layer.name,
                layer_type: layer.layer_type,
                x: layer.x,
                y: layer.y,
                z: layer.z,
                width: layer.width,
                height: layer.height,
                visible: layer.visible,
                opacity: layer.opacity,
                cells: ImportedCells::from_content(&content),
                created_at: Some(layer.created_at),
                updated_at: Some(layer.updated_at),
            }),
            Err(MapError::Validation { problems: found }) => problems.extend(
                found
                    .into_iter()
                    .map(|p| format!("layers[{i}] data: {p}")),
            ),
            Err(e) => problems.push(format!("layers[{i}] data: {e}")),
        }
    }

    let Some(map) = map.filter(|_| problems.is_empty()) else {
        return Err(MapError::Validation { problems });
    };

    Ok(ImportedMap {
        info: MapInfo {
            uuid: Some(map.uuid),
            name: map.name,
            width: map.width,
            height: map.height,
            tile_width: map.tile_width,
            tile_height: map.tile_height,
            creator: map.creator,
        },
        tilesets: tilesets.into_iter().map(imported_tileset).collect(),
        layers: imported_layers,
    })
}

fn imported_tileset(ts: ExportTileset) -> ImportedTileset {
    let mut desc = ImportedTileset::named(ts.uuid.to_string(), ts.name);
    desc.uuid = Some(ts.uuid);
    desc.image_path = ts.image_path.map(PathBuf::from);
    desc.image_url = ts.image_url;
    desc.image_width = ts.image_width;
    desc.image_height = ts.image_height;
    desc.geometry = Some(TileGeometry {
        tile_width: ts.tile_width,
        tile_height: ts.tile_height,
        margin: ts.margin,
        spacing: ts.spacing,
    });
    desc.tile_count = ts.tile_count;
    desc
}

fn element<T: DeserializeOwned>(
    value: Option<&Value>,
    at: &str,
    problems: &mut Vec<String>,
) -> Option<T> {
    let Some(value) = value else {
        problems.push(format!("{at}: missing"));
        return None;
    };
    serde_json::from_value(value.clone())
        .map_err(|e| problems.push(format!("{at}: {e}")))
        .ok()
}

fn elements<T: DeserializeOwned>(
    value: Option<&Value>,
    at: &str,
    problems: &mut Vec<String>,
) -> Vec<T> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| element(Some(item), &format!("{at}[{i}]"), problems))
            .collect(),
        Some(_) => {
            problems.push(format!("{at}: must be an array"));
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Brush, Cell, FieldTypeTile, Tile};
    use crate::registry::TilesetRegistry;
    use serde_json::json;

    fn sample() -> (TileMap, TilesetRegistry) {
        let ts = TileSet::new("grass", Some("grass.png".into()), (64, 32), TileGeometry::square(16));
        let mut map = TileMap::new(
            "meadow",
            (4, 4),
            (16, 16),
            Some(Creator { name: "Ada".into(), email: "ada@example.com".into() }),
        );
        let bg = map.layers[0].uuid;
        map.layer_mut(bg)
            .unwrap()
            .place(Cell::Tile(Tile { x: 1, y: 2, brush: Brush { tileset: ts.uuid, tile_x: 3, tile_y: 1 } }))
            .unwrap();
        map.add_layer("zones", LayerType::FieldType)
            .place(Cell::FieldType(FieldTypeTile { x: 0, y: 0, field_type: 9 }))
            .unwrap();
        (map, TilesetRegistry::from_tilesets([ts]))
    }

    #[test]
    fn export_lists_referenced_tilesets_and_layers() {
        let (map, reg) = sample();
        let doc = to_canonical_form(&map, &reg);
        assert_eq!(doc.export_version, "1.0");
        assert_eq!(doc.tilesets.len(), 1);
        assert_eq!(doc.tilesets[0].name, "grass");
        assert_eq!(doc.layers.len(), 2);
        assert_eq!(doc.layers[1].layer_type, LayerType::FieldType);

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["layers"][0]["type"], "background");
        assert_eq!(value["layers"][0]["data"][0]["brush"]["tileX"], 3);
        assert_eq!(value["map"]["creator"]["email"], "ada@example.com");
    }

    #[test]
    fn reading_back_keeps_identity_and_cells() {
        let (map, reg) = sample();
        let value = serde_json::to_value(to_canonical_form(&map, &reg)).unwrap();
        let imported = from_canonical_form(&value, DecodePolicy::Strict).unwrap();

        assert_eq!(imported.info.uuid, Some(map.uuid));
        assert_eq!(imported.info.creator, map.creator);
        assert_eq!(imported.layers[0].uuid, Some(map.layers[0].uuid));
        assert_eq!(imported.layers[0].updated_at, Some(map.layers[0].updated_at));
        assert_eq!(
            imported.layers[0].cells,
            ImportedCells::from_content(map.layers[0].content())
        );
        assert_eq!(imported.tilesets[0].key, imported.tilesets[0].uuid.unwrap().to_string());
    }

    #[test]
    fn unknown_version_is_rejected() {
        let err = from_canonical_form(&json!({"export_version": "9.9"}), DecodePolicy::Lenient)
            .unwrap_err();
        assert!(err.to_string().contains("9.9"));
        assert!(VersionRegistry::is_supported("1.0"));
        assert!(!VersionRegistry::features("1.0").unwrap().is_empty());
    }

    #[test]
    fn every_schema_problem_is_reported() {
        let doc = json!({
            "export_version": "1.0",
            "tilesets": [{"name": "no uuid"}],
            "layers": [{"uuid": "bad"}]
        });
        match from_canonical_form(&doc, DecodePolicy::Lenient) {
            Err(MapError::Validation { problems }) => {
                assert_eq!(problems.len(), 3, "{problems:?}");
                assert!(problems[0].starts_with("map"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
