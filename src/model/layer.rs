//! Layers and their typed cell content.

use super::tile::{Cell, FieldTypeTile, ObjectTile, Placed, Tile};
use crate::error::MapError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Semantic role of a layer; decides which cell variant it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerType {
    /// Painted tiles drawn first.
    Background,
    /// Painted tiles.
    Floor,
    /// Painted tiles drawn above the floor.
    Sky,
    /// Logical field types such as collision; usually hidden.
    FieldType,
    /// Object references.
    Object,
}

impl LayerType {
    /// Every layer type, in declaration order.
    pub const ALL: [LayerType; 5] = [
        LayerType::Background,
        LayerType::Floor,
        LayerType::Sky,
        LayerType::FieldType,
        LayerType::Object,
    ];

    /// Stored name, e.g. `field_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            LayerType::Background => "background",
            LayerType::Floor => "floor",
            LayerType::Sky => "sky",
            LayerType::FieldType => "field_type",
            LayerType::Object => "object",
        }
    }

    /// Background, floor and sky layers hold brush tiles.
    pub fn is_paintable(self) -> bool {
        matches!(
            self,
            LayerType::Background | LayerType::Floor | LayerType::Sky
        )
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerType {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LayerType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| MapError::invalid(format!("unknown layer type '{s}'")))
    }
}

/// The cells of a layer. The variant is the layer's type, so a
/// `field_type` layer can only ever hold [`FieldTypeTile`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerContent {
    /// Cells of a background layer.
    Background(Vec<Tile>),
    /// Cells of a floor layer.
    Floor(Vec<Tile>),
    /// Cells of a sky layer.
    Sky(Vec<Tile>),
    /// Cells of a field-type layer.
    FieldType(Vec<FieldTypeTile>),
    /// Cells of an object layer.
    Object(Vec<ObjectTile>),
}

impl LayerContent {
    /// No cells, of the given type.
    pub fn empty(layer_type: LayerType) -> Self {
        match layer_type {
            LayerType::Background => LayerContent::Background(Vec::new()),
            LayerType::Floor => LayerContent::Floor(Vec::new()),
            LayerType::Sky => LayerContent::Sky(Vec::new()),
            LayerType::FieldType => LayerContent::FieldType(Vec::new()),
            LayerType::Object => LayerContent::Object(Vec::new()),
        }
    }

    /// Wraps brush tiles for a paintable layer type.
    pub fn paint(layer_type: LayerType, tiles: Vec<Tile>) -> Result<Self, MapError> {
        match layer_type {
            LayerType::Background => Ok(LayerContent::Background(tiles)),
            LayerType::Floor => Ok(LayerContent::Floor(tiles)),
            LayerType::Sky => Ok(LayerContent::Sky(tiles)),
            other => Err(MapError::invalid(format!(
                "layer type '{other}' does not hold brush tiles"
            ))),
        }
    }

    /// Layer type this content belongs to.
    pub fn layer_type(&self) -> LayerType {
        match self {
            LayerContent::Background(_) => LayerType::Background,
            LayerContent::Floor(_) => LayerType::Floor,
            LayerContent::Sky(_) => LayerType::Sky,
            LayerContent::FieldType(_) => LayerType::FieldType,
            LayerContent::Object(_) => LayerType::Object,
        }
    }

    /// Brush tiles, for paintable layers only.
    pub fn tiles(&self) -> Option<&[Tile]> {
        match self {
            LayerContent::Background(t) | LayerContent::Floor(t) | LayerContent::Sky(t) => Some(t),
            _ => None,
        }
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        match self {
            LayerContent::Background(t) | LayerContent::Floor(t) | LayerContent::Sky(t) => t.len(),
            LayerContent::FieldType(t) => t.len(),
            LayerContent::Object(t) => t.len(),
        }
    }

    /// Whether there are no cells.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The cell at `(x, y)`, if any.
    pub fn cell_at(&self, x: i32, y: i32) -> Option<Cell> {
        match self {
            LayerContent::Background(t) | LayerContent::Floor(t) | LayerContent::Sky(t) => {
                t.iter().find(|c| c.at(x, y)).copied().map(Cell::Tile)
            }
            LayerContent::FieldType(t) => t.iter().find(|c| c.at(x, y)).copied().map(Cell::FieldType),
            LayerContent::Object(t) => t.iter().find(|c| c.at(x, y)).copied().map(Cell::Object),
        }
    }

    /// Adds the cell, replacing whatever occupied its coordinate.
    pub fn place(&mut self, cell: Cell) -> Result<(), MapError> {
        match (self, cell) {
            (
                LayerContent::Background(t) | LayerContent::Floor(t) | LayerContent::Sky(t),
                Cell::Tile(tile),
            ) => upsert(t, tile),
            (LayerContent::FieldType(t), Cell::FieldType(tile)) => upsert(t, tile),
            (LayerContent::Object(t), Cell::Object(tile)) => upsert(t, tile),
            (content, cell) => {
                return Err(MapError::invalid(format!(
                    "{:?} cell cannot be placed on a {} layer",
                    cell,
                    content.layer_type()
                )))
            }
        }
        Ok(())
    }

    /// Removes the cell at `(x, y)`; `false` when there was none.
    pub fn remove(&mut self, x: i32, y: i32) -> bool {
        match self {
            LayerContent::Background(t) | LayerContent::Floor(t) | LayerContent::Sky(t) => {
                remove_at(t, x, y)
            }
            LayerContent::FieldType(t) => remove_at(t, x, y),
            LayerContent::Object(t) => remove_at(t, x, y),
        }
    }
}

fn upsert<T: Placed>(items: &mut Vec<T>, item: T) {
    match items.iter_mut().find(|t| t.at(item.x(), item.y())) {
        Some(slot) => *slot = item,
        None => items.push(item),
    }
}

fn remove_at<T: Placed>(items: &mut Vec<T>, x: i32, y: i32) -> bool {
    let before = items.len();
    items.retain(|t| !t.at(x, y));
    items.len() != before
}

/// A layer of a tile map.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Stable identifier; also names the cached image.
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
    /// Horizontal offset in tiles.
    pub x: i32,
    /// Vertical offset in tiles.
    pub y: i32,
    /// Stacking order, lowest drawn first.
    pub z: i32,
    /// Width in tiles.
    pub width: u32,
    /// Height in tiles.
    pub height: u32,
    /// Hidden layers are left out of map images, except field-type layers.
    pub visible: bool,
    /// Blend factor used when compositing.
    pub opacity: f32,
    content: LayerContent,
    /// Blob key of the last rendered image.
    pub image_path: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last content or property change; drives image freshness.
    pub updated_at: DateTime<Utc>,
    /// Set once the layer is soft-deleted.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Layer {
    /// Creates an empty, visible, fully opaque layer with a fresh identifier.
    pub fn new(name: impl Into<String>, layer_type: LayerType, width: u32, height: u32) -> Self {
        let now = Utc::now();
        Layer {
            uuid: Uuid::new_v4(),
            name: name.into(),
            x: 0,
            y: 0,
            z: 0,
            width,
            height,
            visible: true,
            opacity: 1.0,
            content: LayerContent::empty(layer_type),
            image_path: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Builder form of [`Layer::set_content`] without the type check.
    pub fn with_content(mut self, content: LayerContent) -> Self {
        self.content = content;
        self
    }

    /// Type of the layer, fixed by its content.
    pub fn layer_type(&self) -> LayerType {
        self.content.layer_type()
    }

    /// The layer cells.
    pub fn content(&self) -> &LayerContent {
        &self.content
    }

    /// Replaces all cells. The new content must be of the layer's type.
    pub fn set_content(&mut self, content: LayerContent) -> Result<(), MapError> {
        if content.layer_type() != self.layer_type() {
            return Err(MapError::invalid(format!(
                "cannot store {} content in {} layer '{}'",
                content.layer_type(),
                self.layer_type(),
                self.name
            )));
        }
        self.content = content;
        self.touch();
        Ok(())
    }

    /// Adds or replaces the cell at its coordinate.
    ///
    /// Edits are bounds checked against the layer's declared size; content
    /// loaded from storage or imports is not.
    pub fn place(&mut self, cell: Cell) -> Result<(), MapError> {
        let (x, y) = cell.position();
        if !self.contains(x, y) {
            return Err(MapError::invalid(format!(
                "cell ({x}, {y}) is outside layer '{}' ({}x{})",
                self.name, self.width, self.height
            )));
        }
        self.content.place(cell)?;
        self.touch();
        Ok(())
    }

    /// Removes the cell at `(x, y)`; `false` when there was none.
    pub fn remove(&mut self, x: i32, y: i32) -> bool {
        let removed = self.content.remove(x, y);
        if removed {
            self.touch();
        }
        removed
    }

    /// Whether `(x, y)` lies within the declared size.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    /// Marks the layer changed now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Hides the layer from listings and renders but keeps its row.
    pub fn soft_delete(&mut self) {
        let now = Utc::now();
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    /// Whether the layer was soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Opacity clamped into `[0, 1]`.
    pub fn effective_opacity(&self) -> f32 {
        if self.opacity.is_nan() {
            1.0
        } else {
            self.opacity.clamp(0.0, 1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tile::Brush;

    fn brush() -> Brush {
        Brush {
            tileset: Uuid::new_v4(),
            tile_x: 1,
            tile_y: 2,
        }
    }

    #[test]
    fn place_replaces_cell_at_same_coordinate() {
        let mut layer = Layer::new("ground", LayerType::Background, 4, 4);
        let b = brush();
        layer
            .place(Cell::Tile(Tile { x: 1, y: 1, brush: b }))
            .unwrap();
        let other = Brush { tile_x: 3, ..b };
        layer
            .place(Cell::Tile(Tile { x: 1, y: 1, brush: other }))
            .unwrap();

        assert_eq!(layer.content().len(), 1);
        assert_eq!(
            layer.content().cell_at(1, 1),
            Some(Cell::Tile(Tile { x: 1, y: 1, brush: other }))
        );
    }

    #[test]
    fn wrong_variant_is_rejected() {
        let mut layer = Layer::new("zones", LayerType::FieldType, 4, 4);
        let err = layer
            .place(Cell::Tile(Tile { x: 0, y: 0, brush: brush() }))
            .unwrap_err();
        assert!(matches!(err, MapError::Validation { .. }));
        assert!(layer.content().is_empty());
    }

    #[test]
    fn out_of_bounds_edit_is_rejected() {
        let mut layer = Layer::new("objects", LayerType::Object, 2, 2);
        let err = layer
            .place(Cell::Object(ObjectTile { x: 2, y: 0, object_type: 7 }))
            .unwrap_err();
        assert!(matches!(err, MapError::Validation { .. }));
    }

    #[test]
    fn edits_bump_updated_at() {
        let mut layer = Layer::new("zones", LayerType::FieldType, 4, 4);
        layer.updated_at = Utc::now() - chrono::Duration::minutes(5);
        let before = layer.updated_at;

        layer
            .place(Cell::FieldType(FieldTypeTile { x: 0, y: 0, field_type: 3 }))
            .unwrap();
        assert!(layer.updated_at > before);

        let stamp = layer.updated_at;
        assert!(!layer.remove(3, 3));
        assert_eq!(layer.updated_at, stamp);
        assert!(layer.remove(0, 0));
    }

    #[test]
    fn set_content_keeps_type() {
        let mut layer = Layer::new("sky", LayerType::Sky, 4, 4);
        assert!(layer.set_content(LayerContent::Object(Vec::new())).is_err());
        assert!(layer.set_content(LayerContent::Sky(Vec::new())).is_ok());
    }

    #[test]
    fn layer_type_parses_wire_names() {
        assert_eq!("field_type".parse::<LayerType>().unwrap(), LayerType::FieldType);
        assert!("tilelayer".parse::<LayerType>().is_err());
    }
}
