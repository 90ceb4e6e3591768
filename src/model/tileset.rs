//! Tilesets and their tile grid.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tile grid geometry of a tileset image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGeometry {
    /// Tile width in pixels.
    pub tile_width: u32,
    /// Tile height in pixels.
    pub tile_height: u32,
    /// Border around the whole grid, in pixels.
    pub margin: u32,
    /// Gap between neighbouring tiles, in pixels.
    pub spacing: u32,
}

impl TileGeometry {
    /// Square tiles without margin or spacing.
    pub fn square(size: u32) -> Self {
        TileGeometry {
            tile_width: size,
            tile_height: size,
            margin: 0,
            spacing: 0,
        }
    }
}

/// A tileset record: an image cut into a regular grid of tiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileSet {
    /// Stable identifier; brushes refer to it.
    pub uuid: Uuid,
    /// Display name; reconciliation matches on it.
    pub name: String,
    /// Local image, relative to the image root unless absolute.
    pub image_path: Option<String>,
    /// Remote location of the image. Never fetched.
    pub image_url: Option<String>,
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
    /// Only kept for global-id interchange formats.
    pub first_gid: u32,
    /// Border around the whole grid, in pixels.
    pub margin: u32,
    /// Gap between neighbouring tiles, in pixels.
    pub spacing: u32,
}

impl TileSet {
    /// Creates a tileset with a fresh identifier; `tile_count` is derived from the grid.
    pub fn new(
        name: impl Into<String>,
        image_path: Option<String>,
        image_size: (u32, u32),
        geometry: TileGeometry,
    ) -> Self {
        let mut ts = TileSet {
            uuid: Uuid::new_v4(),
            name: name.into(),
            image_path,
            image_url: None,
            image_width: image_size.0,
            image_height: image_size.1,
            tile_width: geometry.tile_width,
            tile_height: geometry.tile_height,
            tile_count: 0,
            first_gid: 1,
            margin: geometry.margin,
            spacing: geometry.spacing,
        };
        ts.tile_count = ts.tiles_per_row() * ts.rows();
        ts
    }

    /// `floor((imageWidth - 2*margin) / (tileWidth + spacing))`
    pub fn tiles_per_row(&self) -> u32 {
        grid_count(self.image_width, self.margin, self.tile_width, self.spacing)
    }

    /// Same as [`TileSet::tiles_per_row`], vertically.
    pub fn rows(&self) -> u32 {
        grid_count(self.image_height, self.margin, self.tile_height, self.spacing)
    }

    /// Pixel origin of the brush cell `(tile_x, tile_y)` inside the image.
    pub fn source_origin(&self, tile_x: u32, tile_y: u32) -> (u32, u32) {
        (
            self.margin + tile_x * (self.tile_width + self.spacing),
            self.margin + tile_y * (self.tile_height + self.spacing),
        )
    }

    /// Local tile coordinates for a local tile index.
    pub fn local_to_brush(&self, local_id: u32) -> (u32, u32) {
        let cols = self.tiles_per_row().max(1);
        (local_id % cols, local_id / cols)
    }
}

fn grid_count(extent: u32, margin: u32, tile: u32, spacing: u32) -> u32 {
    let step = tile + spacing;
    if step == 0 {
        return 0;
    }
    extent.saturating_sub(2 * margin) / step
}
