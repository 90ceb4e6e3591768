//! Cell types placed on layers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One cell of a tileset image, addressed by local column/row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brush {
    /// Owning tileset.
    pub tileset: Uuid,
    /// Column in the tileset grid.
    pub tile_x: u32,
    /// Row in the tileset grid.
    pub tile_y: u32,
}

/// A painted cell in a background, floor or sky layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    /// Column on the map.
    pub x: i32,
    /// Row on the map.
    pub y: i32,
    /// Tileset cell drawn here.
    pub brush: Brush,
}

/// A cell tagged with a logical field type (collision, zone, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldTypeTile {
    /// Column on the map.
    pub x: i32,
    /// Row on the map.
    pub y: i32,
    /// Application-defined field type id.
    pub field_type: i64,
}

/// A placed object reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectTile {
    /// Column on the map.
    pub x: i32,
    /// Row on the map.
    pub y: i32,
    /// Application-defined object type id.
    pub object_type: i64,
}

/// A single edit payload. Which variant a layer accepts follows from its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    /// For background, floor and sky layers.
    Tile(Tile),
    /// For field-type layers.
    FieldType(FieldTypeTile),
    /// For object layers.
    Object(ObjectTile),
}

impl Cell {
    /// Map coordinate of the cell.
    pub fn position(&self) -> (i32, i32) {
        match self {
            Cell::Tile(t) => (t.x, t.y),
            Cell::FieldType(t) => (t.x, t.y),
            Cell::Object(t) => (t.x, t.y),
        }
    }
}

/// Anything placed on the grid.
pub trait Placed {
    /// Column on the map.
    fn x(&self) -> i32;
    /// Row on the map.
    fn y(&self) -> i32;

    /// Whether this sits at `(x, y)`.
    #[inline]
    fn at(&self, x: i32, y: i32) -> bool {
        self.x() == x && self.y() == y
    }
}

macro_rules! impl_placed {
    ($($t:ty),*) => {
        $(impl Placed for $t {
            #[inline] fn x(&self) -> i32 { self.x }
            #[inline] fn y(&self) -> i32 { self.y }
        })*
    };
}

impl_placed!(Tile, FieldTypeTile, ObjectTile);
