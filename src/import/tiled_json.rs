//! Tiled JSON maps (`.tmj`, or `.json` without an `export_version`).
//!
//! The document structures here are shared with the legacy script
//! importer, whose payload is the same document wrapped in a script.

use super::gid::{self, GidRange, GidTable};
use super::{
    extension, file_stem, infer_layer_type, push_grid_cell, read_text, tiles_from_pixels,
    Confidence, ImportedCells, ImportedLayer, ImportedMap, ImportedTileset, Importer, MapInfo,
};
use crate::error::MapError;
use crate::model::{LayerType, ObjectTile, TileGeometry, TileSet};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub(crate) struct TiledDocument {
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
    tilewidth: u32,
    tileheight: u32,
    #[serde(default)]
    infinite: bool,
    #[serde(default)]
    layers: Vec<TiledLayer>,
    #[serde(default)]
    tilesets: Vec<TiledTileset>,
    #[serde(default)]
    properties: Vec<TiledProperty>,
}

#[derive(Debug, Deserialize)]
struct TiledLayer {
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default = "tile_layer")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
    #[serde(default)]
    x: i32,
    #[serde(default)]
    y: i32,
    #[serde(default)]
    offsetx: f32,
    #[serde(default)]
    offsety: f32,
    #[serde(default = "default_true")]
    visible: bool,
    #[serde(default = "one")]
    opacity: f32,
    #[serde(default)]
    properties: Vec<TiledProperty>,
    #[serde(default)]
    objects: Vec<TiledObject>,
    #[serde(default)]
    layers: Vec<TiledLayer>,
}

fn tile_layer() -> String {
    "tilelayer".to_string()
}
fn default_true() -> bool {
    true
}
fn one() -> f32 {
    1.0
}
fn first() -> u32 {
    1
}

/// Embedded tileset, or a reference to an external one through `source`.
#[derive(Debug, Deserialize)]
struct TiledTileset {
    #[serde(default = "first")]
    firstgid: u32,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    imagewidth: u32,
    #[serde(default)]
    imageheight: u32,
    #[serde(default)]
    tilewidth: u32,
    #[serde(default)]
    tileheight: u32,
    #[serde(default)]
    tilecount: u32,
    #[serde(default)]
    columns: u32,
    #[serde(default)]
    margin: u32,
    #[serde(default)]
    spacing: u32,
    #[serde(default)]
    properties: Vec<TiledProperty>,
}

#[derive(Debug, Deserialize)]
struct TiledProperty {
    name: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct TiledObject {
    #[serde(default)]
    id: u32,
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
    #[serde(default)]
    properties: Vec<TiledProperty>,
}

fn property<'a>(props: &'a [TiledProperty], name: &str) -> Option<&'a Value> {
    props.iter().find(|p| p.name == name).map(|p| &p.value)
}

fn uuid_property(props: &[TiledProperty]) -> Option<Uuid> {
    property(props, "uuid")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Tiles per row when the document omits `columns`.
pub(crate) fn derived_columns(image_width: u32, geometry: TileGeometry) -> u32 {
    TileSet::new("", None, (image_width, 0), geometry).tiles_per_row()
}

/// Reads Tiled JSON maps (`.tmj`, `.json`).
pub struct TiledJsonImporter;

impl Importer for TiledJsonImporter {
    fn name(&self) -> &'static str {
        "tiled-json"
    }

    fn can_parse(&self, path: &Path) -> Confidence {
        match extension(path).as_deref() {
            Some("tmj") => Confidence::Certain,
            Some("json") => {
                let Ok(text) = std::fs::read_to_string(path) else {
                    return Confidence::No;
                };
                match serde_json::from_str::<Value>(&text) {
                    Ok(Value::Object(o))
                        if !o.contains_key("export_version")
                            && o.contains_key("layers")
                            && o.contains_key("tilewidth") =>
                    {
                        Confidence::Certain
                    }
                    _ => Confidence::No,
                }
            }
            _ => Confidence::No,
        }
    }

    fn parse(&self, path: &Path) -> Result<ImportedMap, MapError> {
        let text = read_text(path)?;
        let doc: TiledDocument = serde_json::from_str(&text).map_err(|source| MapError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        convert(doc, path)
    }
}

/// Turns a Tiled document into the canonical import description.
///
/// Relative tileset sources and images resolve against the document's
/// directory. Every problem found is reported together.
pub(crate) fn convert(doc: TiledDocument, path: &Path) -> Result<ImportedMap, MapError> {
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("./"));
    let mut problems = Vec::new();

    if doc.infinite {
        problems.push("infinite maps are not supported".to_string());
    }
    if doc.tilewidth == 0 || doc.tileheight == 0 {
        problems.push(format!(
            "tile size must be positive, got {}x{}",
            doc.tilewidth, doc.tileheight
        ));
    }

    let mut tilesets = Vec::with_capacity(doc.tilesets.len());
    let mut ranges = Vec::with_capacity(doc.tilesets.len());
    for entry in &doc.tilesets {
        match tileset_descriptor(entry, &base_dir) {
            Ok((desc, range)) => {
                tilesets.push(desc);
                ranges.push(range);
            }
            Err(e) => problems.push(e.to_string()),
        }
    }
    let table = GidTable::new(ranges);

    let mut flat = Vec::new();
    flatten(&doc.layers, Inherited::root(), &mut flat);

    let mut layers = Vec::with_capacity(flat.len());
    for (z, (layer, inherited)) in flat.into_iter().enumerate() {
        let converted = match layer.kind.as_str() {
            "tilelayer" => tile_layer_of(layer, &doc, &table, &mut problems),
            "objectgroup" => Some(object_layer_of(layer, &doc)),
            other => {
                debug!(layer = %layer.name, kind = other, "layer kind ignored");
                None
            }
        };
        if let Some(mut out) = converted {
            out.z = z as i32;
            out.x = layer.x
                + tiles_from_pixels(layer.offsetx + inherited.offset.0, doc.tilewidth);
            out.y = layer.y
                + tiles_from_pixels(layer.offsety + inherited.offset.1, doc.tileheight);
            out.visible = layer.visible && inherited.visible;
            out.opacity = layer.opacity * inherited.opacity;
            layers.push(out);
        }
    }

    if !problems.is_empty() {
        return Err(MapError::Validation { problems });
    }

    Ok(ImportedMap {
        info: MapInfo {
            uuid: uuid_property(&doc.properties),
            name: property(&doc.properties, "name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| file_stem(path)),
            width: doc.width,
            height: doc.height,
            tile_width: doc.tilewidth,
            tile_height: doc.tileheight,
            creator: None,
        },
        tilesets,
        layers,
    })
}

#[derive(Clone, Copy)]
struct Inherited {
    offset: (f32, f32),
    visible: bool,
    opacity: f32,
}

impl Inherited {
    fn root() -> Self {
        Inherited {
            offset: (0.0, 0.0),
            visible: true,
            opacity: 1.0,
        }
    }
}

/// Group layers are dissolved; their offset, visibility and opacity carry
/// over to their children.
fn flatten<'a>(layers: &'a [TiledLayer], parent: Inherited, out: &mut Vec<(&'a TiledLayer, Inherited)>) {
    for layer in layers {
        if layer.kind == "group" {
            let inherited = Inherited {
                offset: (parent.offset.0 + layer.offsetx, parent.offset.1 + layer.offsety),
                visible: parent.visible && layer.visible,
                opacity: parent.opacity * layer.opacity,
            };
            flatten(&layer.layers, inherited, out);
        } else {
            out.push((layer, parent));
        }
    }
}

fn tileset_descriptor(
    entry: &TiledTileset,
    base_dir: &Path,
) -> Result<(ImportedTileset, GidRange), MapError> {
    let Some(source) = &entry.source else {
        return Ok(embedded_descriptor(entry, entry.firstgid, base_dir));
    };

    let ts_path = base_dir.join(source);
    match extension(&ts_path).as_deref() {
        Some("tsx") => {
            let tileset = tiled::Loader::new()
                .load_tsx_tileset(&ts_path)
                .map_err(|source| MapError::Tmx {
                    path: ts_path.clone(),
                    source,
                })?;
            Ok(super::tmx::tileset_descriptor(&tileset, entry.firstgid))
        }
        Some("json") | Some("tsj") => {
            let text = read_text(&ts_path)?;
            let external: TiledTileset =
                serde_json::from_str(&text).map_err(|source| MapError::Json {
                    path: ts_path.clone(),
                    source,
                })?;
            let dir = ts_path.parent().unwrap_or(base_dir);
            Ok(embedded_descriptor(&external, entry.firstgid, dir))
        }
        _ => Err(MapError::unsupported(
            &ts_path,
            "external tileset must be .tsx, .tsj or .json",
        )),
    }
}

fn embedded_descriptor(
    ts: &TiledTileset,
    first_gid: u32,
    image_dir: &Path,
) -> (ImportedTileset, GidRange) {
    let image_path = ts.image.as_deref().map(|img| image_dir.join(img));
    let name = if ts.name.is_empty() {
        image_path
            .as_deref()
            .map(file_stem)
            .unwrap_or_else(|| format!("tileset-{first_gid}"))
    } else {
        ts.name.clone()
    };

    let mut desc = ImportedTileset::named(first_gid.to_string(), name);
    desc.uuid = uuid_property(&ts.properties);
    desc.image_path = image_path;
    desc.image_width = ts.imagewidth;
    desc.image_height = ts.imageheight;
    desc.tile_count = ts.tilecount;
    desc.first_gid = first_gid;
    let geometry = (ts.tilewidth > 0 && ts.tileheight > 0).then_some(TileGeometry {
        tile_width: ts.tilewidth,
        tile_height: ts.tileheight,
        margin: ts.margin,
        spacing: ts.spacing,
    });
    desc.geometry = geometry;

    let columns = match (ts.columns, geometry) {
        (0, Some(g)) => derived_columns(ts.imagewidth, g),
        (c, _) => c,
    };
    let range = GidRange {
        key: desc.key.clone(),
        first_gid,
        tile_count: ts.tilecount,
        columns,
    };
    (desc, range)
}

fn tile_layer_of(
    layer: &TiledLayer,
    doc: &TiledDocument,
    table: &GidTable,
    problems: &mut Vec<String>,
) -> Option<ImportedLayer> {
    let declared = property(&layer.properties, "layer_type").and_then(Value::as_str);
    let layer_type = match infer_layer_type(&layer.name, declared) {
        Ok(t) => t,
        Err(p) => {
            problems.push(p);
            return None;
        }
    };

    let data = match grid_data(layer) {
        Ok(d) => d,
        Err(p) => {
            problems.push(p);
            return None;
        }
    };

    let width = if layer.width > 0 { layer.width } else { doc.width };
    let height = if layer.height > 0 { layer.height } else { doc.height };
    if !layer.data.is_null() && data.len() as u64 != u64::from(width) * u64::from(height) {
        problems.push(format!(
            "layer '{}': {} tile ids do not fill a {width}x{height} grid",
            layer.name,
            data.len()
        ));
        return None;
    }
    let mut out = ImportedLayer::new(layer.name.clone(), layer_type, width, height);
    if width == 0 {
        return Some(out);
    }
    for (i, &raw) in data.iter().enumerate() {
        let gid = gid::clean(raw);
        if gid == 0 {
            continue;
        }
        let (x, y) = ((i as u32 % width) as i32, (i as u32 / width) as i32);
        let brush = table.resolve(raw).map(|t| (t.key, t.tile_x, t.tile_y));
        if !push_grid_cell(&mut out.cells, x, y, gid, brush) {
            problems.push(format!(
                "layer '{}': global id {gid} at ({x}, {y}) belongs to no tileset",
                layer.name
            ));
        }
    }
    Some(out)
}

fn grid_data(layer: &TiledLayer) -> Result<Vec<u32>, String> {
    if let Some(enc) = layer.encoding.as_deref().filter(|e| *e != "csv") {
        return Err(format!(
            "layer '{}': {enc} encoded data is not supported",
            layer.name
        ));
    }
    match &layer.data {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| {
                v.as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| format!("layer '{}': item {i} is not a tile id", layer.name))
            })
            .collect(),
        _ => Err(format!("layer '{}': data must be an array", layer.name)),
    }
}

fn object_layer_of(layer: &TiledLayer, doc: &TiledDocument) -> ImportedLayer {
    let mut out = ImportedLayer::new(layer.name.clone(), LayerType::Object, doc.width, doc.height);
    let objects = layer
        .objects
        .iter()
        .filter_map(|obj| {
            let Some(object_type) = property(&obj.properties, "object_type").and_then(Value::as_i64)
            else {
                warn!(layer = %layer.name, object = obj.id, "object without an integer object_type dropped");
                return None;
            };
            Some(ObjectTile {
                x: cell_of(obj.x, doc.tilewidth),
                y: cell_of(obj.y, doc.tileheight),
                object_type,
            })
        })
        .collect();
    out.cells = ImportedCells::Object(objects);
    out
}

pub(crate) fn cell_of(pixel: f32, tile: u32) -> i32 {
    if tile == 0 {
        0
    } else {
        (pixel / tile as f32).floor() as i32
    }
}
