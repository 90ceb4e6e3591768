//! Legacy script maps: a Tiled map document embedded as an object literal
//! in a script, plus an optional field-type sidecar script next to it.
//!
//! For `castle.js` the sidecar is `castle_fieldtype.js` (the suffix is
//! configurable). It holds `{ "name"?, "width"?, "height"?, "data": [..] }`
//! with row-major field-type ids, 0 meaning empty.

use super::tiled_json::{self, TiledDocument};
use super::{extension, file_stem, read_text, Confidence, ImportedCells, ImportedLayer, ImportedMap, Importer};
use crate::error::MapError;
use crate::model::{FieldTypeTile, LayerType};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Reads maps embedded in scripts, merging their field-type sidecar.
pub struct ScriptImporter {
    suffix: String,
}

impl ScriptImporter {
    /// Sidecars are found by appending `field_type_suffix` to the file stem.
    pub fn new(field_type_suffix: impl Into<String>) -> Self {
        ScriptImporter {
            suffix: field_type_suffix.into(),
        }
    }

    /// Where the field-type sidecar of `path` would live.
    pub fn sidecar_path(&self, path: &Path) -> PathBuf {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("js");
        path.with_file_name(format!("{}{}.{ext}", file_stem(path), self.suffix))
    }

    fn is_sidecar(&self, path: &Path) -> bool {
        !self.suffix.is_empty() && file_stem(path).ends_with(&self.suffix)
    }
}

#[derive(Debug, Deserialize)]
struct FieldTypeSidecar {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    data: Vec<i64>,
}

impl Importer for ScriptImporter {
    fn name(&self) -> &'static str {
        "legacy-script"
    }

    fn can_parse(&self, path: &Path) -> Confidence {
        if extension(path).as_deref() != Some("js") || self.is_sidecar(path) {
            return Confidence::No;
        }
        match std::fs::read_to_string(path) {
            Ok(text) if find_literal(&text, "layers").is_some() => Confidence::Certain,
            Ok(_) => Confidence::No,
            Err(_) => Confidence::Maybe,
        }
    }

    fn parse(&self, path: &Path) -> Result<ImportedMap, MapError> {
        let text = read_text(path)?;
        let literal = find_literal(&text, "layers")
            .ok_or_else(|| MapError::unsupported(path, "no map object literal in script"))?;
        let doc: TiledDocument = serde_json::from_value(literal).map_err(|source| MapError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let mut map = tiled_json::convert(doc, path)?;

        let sidecar = self.sidecar_path(path);
        if sidecar.is_file() {
            let layer = read_sidecar(&sidecar, &map)?;
            info!(path = %sidecar.display(), cells = layer.cells.len(), "field type sidecar merged");
            map.layers.push(layer);
        } else {
            debug!(path = %sidecar.display(), "no field type sidecar");
        }
        Ok(map)
    }
}

/// The sidecar becomes a hidden field-type layer above every other layer.
fn read_sidecar(path: &Path, map: &ImportedMap) -> Result<ImportedLayer, MapError> {
    let text = read_text(path)?;
    let literal = find_literal(&text, "data")
        .ok_or_else(|| MapError::unsupported(path, "no field type literal in sidecar"))?;
    let sidecar: FieldTypeSidecar = serde_json::from_value(literal).map_err(|source| MapError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let width = sidecar.width.unwrap_or(map.info.width);
    let height = sidecar.height.unwrap_or(map.info.height);
    if !sidecar.data.is_empty()
        && sidecar.data.len() as u64 != u64::from(width) * u64::from(height)
    {
        return Err(MapError::invalid(format!(
            "{}: {} field type ids do not fill a {width}x{height} grid",
            path.display(),
            sidecar.data.len()
        )));
    }

    let cells = sidecar
        .data
        .iter()
        .enumerate()
        .filter(|(_, v)| **v != 0)
        .map(|(i, v)| FieldTypeTile {
            x: (i as u32 % width) as i32,
            y: (i as u32 / width) as i32,
            field_type: *v,
        })
        .collect();

    let mut layer = ImportedLayer::new(
        sidecar.name.unwrap_or_else(|| "field_type".to_string()),
        LayerType::FieldType,
        width,
        height,
    );
    layer.z = map.layers.iter().map(|l| l.z + 1).max().unwrap_or(0);
    layer.visible = false;
    layer.cells = ImportedCells::FieldType(cells);
    Ok(layer)
}

/// First object literal in `src` that parses as JSON and holds `key`,
/// either at its top level or in a nested object.
fn find_literal(src: &str, key: &str) -> Option<Value> {
    // spans inside an object that already parsed were searched with it
    let mut searched_to = 0;
    for (open, close) in brace_spans(src) {
        if open < searched_to {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(&src[open..=close]) else {
            continue;
        };
        searched_to = close + 1;
        if let Some(found) = object_with_key(value, key) {
            return Some(found);
        }
    }
    None
}

fn object_with_key(value: Value, key: &str) -> Option<Value> {
    match value {
        Value::Object(o) if o.contains_key(key) => Some(Value::Object(o)),
        Value::Object(o) => o.into_iter().find_map(|(_, v)| object_with_key(v, key)),
        Value::Array(items) => items.into_iter().find_map(|v| object_with_key(v, key)),
        _ => None,
    }
}

/// Byte spans of balanced `{...}` pairs ordered by their opening brace.
///
/// Braces inside string literals and comments do not count.
fn brace_spans(src: &str) -> Vec<(usize, usize)> {
    let bytes = src.as_bytes();
    let mut spans = Vec::new();
    let mut open = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = src[i..].find('\n').map_or(bytes.len(), |n| i + n);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = src[i + 2..].find("*/").map_or(bytes.len(), |n| i + n + 4);
                continue;
            }
            q @ (b'"' | b'\'' | b'`') => {
                i += 1;
                while i < bytes.len() && bytes[i] != q {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'{' => open.push(i),
            b'}' => {
                if let Some(start) = open.pop() {
                    spans.push((start, i));
                }
            }
            _ => {}
        }
        i += 1;
    }
    spans.sort_unstable_by_key(|&(start, _)| start);
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SCRIPT: &str = r#"(function(name,data){
 if(typeof onTileMapLoaded === 'undefined') {
  if(typeof TileMaps === 'undefined') TileMaps = {};
  TileMaps[name] = data;
 } else {
  onTileMapLoaded(name,data);
 }})("castle",
{ "width": 3, "height": 2, "tilewidth": 8, "tileheight": 8,
  "tilesets": [{"firstgid": 1, "name": "stone", "image": "stone.png",
                "imagewidth": 16, "imageheight": 16, "tilewidth": 8, "tileheight": 8,
                "tilecount": 4, "columns": 2}],
  "layers": [{"type": "tilelayer", "name": "walls {north}", "width": 3, "height": 2,
              "data": [1, 2, 0, 0, 4, 0]}]
});"#;

    #[test]
    fn extracts_the_document_literal() {
        let lit = find_literal(SCRIPT, "layers").unwrap();
        assert_eq!(lit["width"], 3);
        assert!(find_literal("var x = {a: 1};", "layers").is_none());
    }

    #[test]
    fn merges_the_sidecar_as_hidden_top_layer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("castle.js");
        fs::write(&path, SCRIPT).unwrap();
        fs::write(
            dir.path().join("castle_fieldtype.js"),
            r#"var castle_fieldtype = { "data": [0, 3, 0, 7, 0, 0] };"#,
        )
        .unwrap();

        let importer = ScriptImporter::new("_fieldtype");
        assert_eq!(importer.can_parse(&path), Confidence::Certain);
        assert_eq!(
            importer.can_parse(&dir.path().join("castle_fieldtype.js")),
            Confidence::No
        );

        let map = importer.parse(&path).unwrap();
        assert_eq!(map.info.name, "castle");
        assert_eq!(map.layers.len(), 2);
        assert_eq!(map.layers[0].cells.len(), 3);

        let zones = &map.layers[1];
        assert_eq!(zones.layer_type, LayerType::FieldType);
        assert_eq!(zones.z, 1);
        assert!(!zones.visible);
        assert_eq!(
            zones.cells,
            ImportedCells::FieldType(vec![
                FieldTypeTile { x: 1, y: 0, field_type: 3 },
                FieldTypeTile { x: 0, y: 1, field_type: 7 },
            ])
        );
    }

    #[test]
    fn comments_and_strings_do_not_unbalance_literals() {
        let src = "// don't touch {\n/* it's { here */ var m = { \"name\": \"a } b\", \"layers\": [] };";
        let lit = find_literal(src, "layers").unwrap();
        assert_eq!(lit["name"], "a } b");
    }

    #[test]
    fn nested_literals_are_found_inside_parsed_objects() {
        let lit = find_literal(r#"load({"maps": [{"layers": [], "width": 2}]});"#, "layers").unwrap();
        assert_eq!(lit["width"], 2);
    }

    #[test]
    fn sidecar_must_fill_the_map_grid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("castle.js");
        fs::write(&path, SCRIPT).unwrap();
        fs::write(
            dir.path().join("castle_fieldtype.js"),
            r#"var castle_fieldtype = { "data": [0, 3, 0, 7] };"#,
        )
        .unwrap();
        match ScriptImporter::new("_fieldtype").parse(&path) {
            Err(MapError::Validation { problems }) => assert!(problems[0].contains("3x2")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sidecar_is_optional() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("castle.js");
        fs::write(&path, SCRIPT).unwrap();
        let map = ScriptImporter::new("_fieldtype").parse(&path).unwrap();
        assert_eq!(map.layers.len(), 1);
    }
}
