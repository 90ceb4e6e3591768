//! JSON stored form of layer cells.
//!
//! The cell variant is chosen by the owning layer's type, never by looking
//! at which keys an item happens to carry.

use crate::error::MapError;
use crate::model::{Brush, FieldTypeTile, LayerContent, LayerType, ObjectTile, Tile};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonObject, Value};
use tracing::warn;
use uuid::Uuid;

/// What to do with stored items that lack a required field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodePolicy {
    /// Reject the whole layer, listing every bad item.
    Strict,
    /// Drop bad items and log them.
    #[default]
    Lenient,
}

/// Decodes a layer's stored cell array.
pub fn decode(
    stored: &Value,
    layer_type: LayerType,
    policy: DecodePolicy,
) -> Result<LayerContent, MapError> {
    let items: &[Value] = match stored {
        Value::Array(items) => items,
        Value::Null => &[],
        other => {
            let problem = format!("{layer_type} layer data must be an array, got {}", kind_of(other));
            return match policy {
                DecodePolicy::Strict => Err(MapError::invalid(problem)),
                DecodePolicy::Lenient => {
                    warn!(%layer_type, "{problem}; treating layer as empty");
                    Ok(LayerContent::empty(layer_type))
                }
            };
        }
    };

    let mut problems = Vec::new();
    let content = match layer_type {
        LayerType::Background | LayerType::Floor | LayerType::Sky => {
            let tiles = collect(items, decode_tile, &mut problems);
            LayerContent::paint(layer_type, tiles)?
        }
        LayerType::FieldType => {
            LayerContent::FieldType(collect(items, decode_field_type, &mut problems))
        }
        LayerType::Object => LayerContent::Object(collect(items, decode_object, &mut problems)),
    };

    if problems.is_empty() {
        return Ok(content);
    }
    match policy {
        DecodePolicy::Strict => Err(MapError::Validation { problems }),
        DecodePolicy::Lenient => {
            for problem in &problems {
                warn!(%layer_type, "dropping stored cell: {problem}");
            }
            Ok(content)
        }
    }
}

/// Encodes cells to their stored form.
pub fn encode(content: &LayerContent) -> Value {
    let items: Vec<Value> = match content {
        LayerContent::Background(t) | LayerContent::Floor(t) | LayerContent::Sky(t) => t
            .iter()
            .map(|t| {
                json!({
                    "x": t.x,
                    "y": t.y,
                    "brush": {
                        "tileset": t.brush.tileset.to_string(),
                        "tileX": t.brush.tile_x,
                        "tileY": t.brush.tile_y,
                    }
                })
            })
            .collect(),
        LayerContent::FieldType(t) => t
            .iter()
            .map(|t| json!({ "x": t.x, "y": t.y, "fieldType": t.field_type }))
            .collect(),
        LayerContent::Object(t) => t
            .iter()
            .map(|t| json!({ "x": t.x, "y": t.y, "objectType": t.object_type }))
            .collect(),
    };
    Value::Array(items)
}

/// Builds cells from loosely shaped input, never failing: missing numbers
/// become `0` and a missing or unparsable tileset id becomes the nil id.
pub fn coerce(raw: &Value, layer_type: LayerType) -> LayerContent {
    let items = raw.as_array().map(Vec::as_slice).unwrap_or_default();
    let objects = items.iter().filter_map(Value::as_object);

    match layer_type {
        LayerType::Background | LayerType::Floor | LayerType::Sky => {
            let tiles = objects
                .map(|o| {
                    let empty = JsonObject::new();
                    let brush = o.get("brush").and_then(Value::as_object).unwrap_or(&empty);
                    let tileset = brush.get("tileset").and_then(Value::as_str).unwrap_or("");
                    Tile {
                        x: int_or_zero(o, "x"),
                        y: int_or_zero(o, "y"),
                        brush: Brush {
                            tileset: Uuid::parse_str(tileset).unwrap_or(Uuid::nil()),
                            tile_x: int_or_zero(brush, "tileX").max(0) as u32,
                            tile_y: int_or_zero(brush, "tileY").max(0) as u32,
                        },
                    }
                })
                .collect();
            match layer_type {
                LayerType::Floor => LayerContent::Floor(tiles),
                LayerType::Sky => LayerContent::Sky(tiles),
                _ => LayerContent::Background(tiles),
            }
        }
        LayerType::FieldType => LayerContent::FieldType(
            objects
                .map(|o| FieldTypeTile {
                    x: int_or_zero(o, "x"),
                    y: int_or_zero(o, "y"),
                    field_type: int(o, "fieldType").unwrap_or(0),
                })
                .collect(),
        ),
        LayerType::Object => LayerContent::Object(
            objects
                .map(|o| ObjectTile {
                    x: int_or_zero(o, "x"),
                    y: int_or_zero(o, "y"),
                    object_type: int(o, "objectType").unwrap_or(0),
                })
                .collect(),
        ),
    }
}

fn collect<T>(
    items: &[Value],
    decode_one: fn(&JsonObject<String, Value>) -> Result<T, String>,
    problems: &mut Vec<String>,
) -> Vec<T> {
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let result = match item.as_object() {
            Some(o) => decode_one(o),
            None => Err(format!("expected an object, got {}", kind_of(item))),
        };
        match result {
            Ok(v) => out.push(v),
            Err(e) => problems.push(format!("item {i}: {e}")),
        }
    }
    out
}

fn decode_tile(o: &JsonObject<String, Value>) -> Result<Tile, String> {
    let (x, y) = position(o)?;
    let brush = o
        .get("brush")
        .and_then(Value::as_object)
        .ok_or("missing 'brush'")?;
    let tileset = brush
        .get("tileset")
        .and_then(Value::as_str)
        .ok_or("missing 'brush.tileset'")?;
    let tileset =
        Uuid::parse_str(tileset).map_err(|e| format!("bad 'brush.tileset' '{tileset}': {e}"))?;
    Ok(Tile {
        x,
        y,
        brush: Brush {
            tileset,
            tile_x: unsigned(brush, "tileX")?,
            tile_y: unsigned(brush, "tileY")?,
        },
    })
}

fn decode_field_type(o: &JsonObject<String, Value>) -> Result<FieldTypeTile, String> {
    let (x, y) = position(o)?;
    let field_type = int(o, "fieldType").ok_or("missing 'fieldType'")?;
    Ok(FieldTypeTile { x, y, field_type })
}

fn decode_object(o: &JsonObject<String, Value>) -> Result<ObjectTile, String> {
    let (x, y) = position(o)?;
    let object_type = int(o, "objectType").ok_or("missing 'objectType'")?;
    Ok(ObjectTile { x, y, object_type })
}

fn position(o: &JsonObject<String, Value>) -> Result<(i32, i32), String> {
    let coord = |key: &str| -> Result<i32, String> {
        let v = int(o, key).ok_or_else(|| format!("missing '{key}'"))?;
        i32::try_from(v).map_err(|_| format!("'{key}' out of range: {v}"))
    };
    Ok((coord("x")?, coord("y")?))
}

fn unsigned(o: &JsonObject<String, Value>, key: &str) -> Result<u32, String> {
    let v = int(o, key).ok_or_else(|| format!("missing 'brush.{key}'"))?;
    u32::try_from(v).map_err(|_| format!("'brush.{key}' out of range: {v}"))
}

/// Integer field; integral floats such as `3.0` are accepted.
fn int(o: &JsonObject<String, Value>, key: &str) -> Option<i64> {
    let v = o.get(key)?;
    v.as_i64().or_else(|| {
        v.as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn int_or_zero(o: &JsonObject<String, Value>, key: &str) -> i32 {
    int(o, key)
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or(0)
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> Uuid {
        Uuid::parse_str("6f1c1e0e-2d7a-4c59-9a53-0c1f3f0b9d11").unwrap()
    }

    #[test]
    fn lenient_decode_drops_tile_without_brush() {
        let stored = json!([
            { "x": 1, "y": 2, "brush": { "tileset": ts().to_string(), "tileX": 3, "tileY": 4 } },
            { "x": 5, "y": 6 }
        ]);
        let content = decode(&stored, LayerType::Background, DecodePolicy::Lenient).unwrap();
        assert_eq!(
            content.tiles().unwrap(),
            &[Tile {
                x: 1,
                y: 2,
                brush: Brush { tileset: ts(), tile_x: 3, tile_y: 4 }
            }]
        );
    }

    #[test]
    fn strict_decode_lists_every_bad_item() {
        let stored = json!([
            { "x": 1 },
            { "x": 1, "y": 1, "fieldType": 2 },
            "garbage"
        ]);
        let err = decode(&stored, LayerType::FieldType, DecodePolicy::Strict).unwrap_err();
        match err {
            MapError::Validation { problems } => {
                assert_eq!(problems.len(), 2);
                assert!(problems[0].starts_with("item 0"));
                assert!(problems[1].starts_with("item 2"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn decode_dispatches_on_layer_type_not_item_shape() {
        // A brush-shaped item in a field_type layer is not silently taken as a Tile.
        let stored = json!([
            { "x": 0, "y": 0, "brush": { "tileset": ts().to_string(), "tileX": 0, "tileY": 0 } }
        ]);
        let content = decode(&stored, LayerType::FieldType, DecodePolicy::Lenient).unwrap();
        assert_eq!(content, LayerContent::FieldType(vec![]));
    }

    #[test]
    fn encode_then_decode_keeps_objects() {
        let content = LayerContent::Object(vec![
            ObjectTile { x: 0, y: 1, object_type: 12 },
            ObjectTile { x: 4, y: 1, object_type: 3 },
        ]);
        let stored = encode(&content);
        assert_eq!(stored[0]["objectType"], 12);
        let back = decode(&stored, LayerType::Object, DecodePolicy::Strict).unwrap();
        assert_eq!(back, content);
    }

    #[test]
    fn coerce_fills_missing_fields_with_zero() {
        let raw = json!([{ "y": 3, "brush": { "tileX": 2 } }, 17]);
        let content = coerce(&raw, LayerType::Sky);
        assert_eq!(
            content,
            LayerContent::Sky(vec![Tile {
                x: 0,
                y: 3,
                brush: Brush { tileset: Uuid::nil(), tile_x: 2, tile_y: 0 }
            }])
        );
    }

    #[test]
    fn non_array_data_is_policy_dependent() {
        let stored = json!({ "x": 1 });
        assert!(decode(&stored, LayerType::Object, DecodePolicy::Strict).is_err());
        let content = decode(&stored, LayerType::Object, DecodePolicy::Lenient).unwrap();
        assert!(content.is_empty());
        assert!(decode(&Value::Null, LayerType::Object, DecodePolicy::Strict)
            .unwrap()
            .is_empty());
    }
}
