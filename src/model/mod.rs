//! Canonical in-memory tile map model.
//!
//! Tiles address tileset cells by local column/row ([`Brush`]), never by a
//! global tile id.

pub mod layer;
pub mod map;
pub mod tile;
pub mod tileset;

pub use layer::{Layer, LayerContent, LayerType};
pub use map::{Creator, TileMap};
pub use tile::{Brush, Cell, FieldTypeTile, ObjectTile, Placed, Tile};
pub use tileset::{TileGeometry, TileSet};
