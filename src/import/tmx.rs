//! Tiled TMX maps, read through the `tiled` crate.

use super::gid::GidRange;
use super::tiled_json::{cell_of, derived_columns};
use super::{
    extension, file_stem, infer_layer_type, push_grid_cell, tiles_from_pixels, Confidence,
    ImportedCells, ImportedLayer, ImportedMap, ImportedTileset, Importer, MapInfo,
};
use crate::error::MapError;
use crate::model::{LayerType, ObjectTile, TileGeometry};
use std::fs;
use std::path::Path;
use tiled::{PropertyValue, TileLayer};
use tracing::{debug, warn};
use uuid::Uuid;

/// Reads Tiled XML maps (`.tmx`).
pub struct TmxImporter;

impl Importer for TmxImporter {
    fn name(&self) -> &'static str {
        "tmx"
    }

    fn can_parse(&self, path: &Path) -> Confidence {
        match extension(path).as_deref() {
            Some("tmx") => Confidence::Certain,
            _ => Confidence::No,
        }
    }

    fn parse(&self, path: &Path) -> Result<ImportedMap, MapError> {
        if !path.is_file() {
            return Err(MapError::not_found("file", path.display()));
        }
        let map = tiled::Loader::new()
            .load_tmx_map(path)
            .map_err(|source| MapError::Tmx {
                path: path.to_path_buf(),
                source,
            })?;

        // The loaded map keeps tileset order but not the declared first ids.
        let source = fs::read_to_string(path).map_err(|e| MapError::io(path, e))?;
        let declared = declared_first_gids(&source);
        let mut tilesets = Vec::with_capacity(map.tilesets().len());
        let mut ranges = Vec::with_capacity(map.tilesets().len());
        let mut next_gid = 1u32;
        for (i, tileset) in map.tilesets().iter().enumerate() {
            let first_gid = declared.get(i).copied().flatten().unwrap_or_else(|| {
                warn!(tileset = %tileset.name, first_gid = next_gid, "no firstgid declared, assuming contiguous ids");
                next_gid
            });
            let (desc, range) = tileset_descriptor(tileset, first_gid);
            tilesets.push(desc);
            ranges.push(range);
            next_gid = first_gid.saturating_add(tileset.tilecount);
        }

        let mut problems = Vec::new();
        let mut layers = Vec::new();
        let mut z = 0;
        let mut pending: Vec<(tiled::Layer, (f32, f32), bool, f32)> =
            map.layers().map(|l| (l, (0.0, 0.0), true, 1.0)).collect();
        pending.reverse();

        // Depth-first so that group children keep document order.
        while let Some((layer, offset, visible, opacity)) = pending.pop() {
            let offset = (offset.0 + layer.offset_x, offset.1 + layer.offset_y);
            let visible = visible && layer.visible;
            let opacity = opacity * layer.opacity;

            let converted = match layer.layer_type() {
                tiled::LayerType::Tiles(tiles) => {
                    tile_layer_of(&layer, &tiles, &map, &ranges, &mut problems)
                }
                tiled::LayerType::Objects(objects) => {
                    let mut out =
                        ImportedLayer::new(layer.name.clone(), LayerType::Object, map.width, map.height);
                    let cells = objects
                        .objects()
                        .filter_map(|obj| match obj.properties.get("object_type") {
                            Some(PropertyValue::IntValue(t)) => Some(ObjectTile {
                                x: cell_of(obj.x, map.tile_width),
                                y: cell_of(obj.y, map.tile_height),
                                object_type: i64::from(*t),
                            }),
                            _ => {
                                warn!(layer = %layer.name, object = obj.id(), "object without an integer object_type dropped");
                                None
                            }
                        })
                        .collect();
                    out.cells = ImportedCells::Object(cells);
                    Some(out)
                }
                tiled::LayerType::Group(group) => {
                    let children: Vec<_> = group.layers().collect();
                    for child in children.into_iter().rev() {
                        pending.push((child, offset, visible, opacity));
                    }
                    continue;
                }
                tiled::LayerType::Image(_) => {
                    debug!(layer = %layer.name, "image layer ignored");
                    None
                }
            };

            if let Some(mut out) = converted {
                out.z = z;
                out.x = tiles_from_pixels(offset.0, map.tile_width);
                out.y = tiles_from_pixels(offset.1, map.tile_height);
                out.visible = visible;
                out.opacity = opacity;
                layers.push(out);
            }
            z += 1;
        }

        if !problems.is_empty() {
            return Err(MapError::Validation { problems });
        }

        Ok(ImportedMap {
            info: MapInfo {
                uuid: uuid_property(&map.properties),
                name: match map.properties.get("name") {
                    Some(PropertyValue::StringValue(s)) => s.clone(),
                    _ => file_stem(path),
                },
                width: map.width,
                height: map.height,
                tile_width: map.tile_width,
                tile_height: map.tile_height,
                creator: None,
            },
            tilesets,
            layers,
        })
    }
}

/// `firstgid` of every `<tileset>` tag in document order; `None` where a
/// tag does not carry a usable one.
fn declared_first_gids(doc: &str) -> Vec<Option<u32>> {
    let mut out = Vec::new();
    let mut rest = doc;
    while let Some(start) = rest.find('<') {
        rest = &rest[start..];
        if let Some(body) = rest.strip_prefix("<!--") {
            rest = body.find("-->").map_or("", |end| &body[end + 3..]);
            continue;
        }
        let end = rest.find('>').map_or(rest.len(), |e| e + 1);
        let (tag, tail) = rest.split_at(end);
        rest = tail;
        let Some(attrs) = tag.strip_prefix("<tileset") else {
            continue;
        };
        if attrs.starts_with(|c: char| c.is_whitespace() || c == '>' || c == '/') {
            out.push(attribute(attrs, "firstgid").and_then(|v| v.trim().parse().ok()));
        }
    }
    out
}

/// Value of `name="..."` (or single-quoted) inside a tag's attribute list.
fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let mut rest = attrs;
    loop {
        let at = rest.find(name)?;
        let preceded = rest[..at].ends_with(char::is_whitespace);
        rest = &rest[at + name.len()..];
        if !preceded {
            continue;
        }
        let Some(value) = rest.trim_start().strip_prefix('=') else {
            continue;
        };
        let value = value.trim_start();
        let quote = value.chars().next().filter(|&q| q == '"' || q == '\'')?;
        let value = &value[1..];
        return value.find(quote).map(|end| &value[..end]);
    }
}

fn uuid_property(props: &tiled::Properties) -> Option<Uuid> {
    match props.get("uuid") {
        Some(PropertyValue::StringValue(s)) => Uuid::parse_str(s).ok(),
        _ => None,
    }
}

/// Descriptor and id range of a tileset loaded by the `tiled` crate.
///
/// Image paths come back already resolved against the tileset file.
pub(crate) fn tileset_descriptor(ts: &tiled::Tileset, first_gid: u32) -> (ImportedTileset, GidRange) {
    let mut desc = ImportedTileset::named(first_gid.to_string(), ts.name.clone());
    desc.uuid = uuid_property(&ts.properties);
    if let Some(image) = &ts.image {
        desc.image_path = Some(image.source.clone());
        desc.image_width = image.width.max(0) as u32;
        desc.image_height = image.height.max(0) as u32;
    }
    let geometry = TileGeometry {
        tile_width: ts.tile_width,
        tile_height: ts.tile_height,
        margin: ts.margin,
        spacing: ts.spacing,
    };
    desc.geometry = (ts.tile_width > 0 && ts.tile_height > 0).then_some(geometry);
    desc.tile_count = ts.tilecount;
    desc.first_gid = first_gid;

    let columns = if ts.columns > 0 {
        ts.columns
    } else {
        derived_columns(desc.image_width, geometry)
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
    layer: &tiled::Layer,
    tiles: &TileLayer,
    map: &tiled::Map,
    ranges: &[GidRange],
    problems: &mut Vec<String>,
) -> Option<ImportedLayer> {
    let declared = match layer.properties.get("layer_type") {
        Some(PropertyValue::StringValue(s)) => Some(s.as_str()),
        _ => None,
    };
    let layer_type = match infer_layer_type(&layer.name, declared) {
        Ok(t) => t,
        Err(p) => {
            problems.push(p);
            return None;
        }
    };
    let (Some(width), Some(height)) = (tiles.width(), tiles.height()) else {
        problems.push(format!("layer '{}': infinite layers are not supported", layer.name));
        return None;
    };

    let mut out = ImportedLayer::new(layer.name.clone(), layer_type, width, height);
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let Some(tile) = tiles.get_tile(x, y) else {
                continue;
            };
            let Some(range) = ranges.get(tile.tileset_index()) else {
                problems.push(format!(
                    "layer '{}': tile at ({x}, {y}) references unknown tileset {}",
                    layer.name,
                    tile.tileset_index()
                ));
                continue;
            };
            let local = tile.id();
            let cols = range.columns.max(1);
            let brush = Some((range.key.as_str(), local % cols, local / cols));
            push_grid_cell(&mut out.cells, x, y, range.first_gid + local, brush);
        }
    }
    debug!(layer = %layer.name, cells = out.cells.len(), width = map.width, "tile layer read");
    Some(out)
}
