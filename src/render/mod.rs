//! Rasterization of layers and maps into cached PNG images.
//!
//! A layer image is keyed by the layer's own freshness: it is rebuilt only
//! when the stored file is missing or older than the layer's `updated_at`.

mod canvas;

pub use canvas::TileSkip;

use crate::blob::BlobStore;
use crate::error::MapError;
use crate::model::{Layer, LayerType, TileMap};
use crate::registry::TilesetLookup;
use canvas::TilesetImages;
use image::RgbaImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Blob key of a layer image.
pub fn layer_image_key(map_id: Uuid, layer_id: Uuid) -> String {
    format!("maps/{map_id}/layers/{layer_id}.png")
}

/// Blob key of a full-map composite.
pub fn map_image_key(map_id: Uuid) -> String {
    format!("maps/{map_id}/map.png")
}

/// Largest canvas the rasterizer will allocate, in pixels.
pub const MAX_CANVAS_PIXELS: u64 = 1 << 26;

/// Allocates a transparent canvas of `cols*tw x rows*th` pixels.
fn new_canvas(
    target: impl FnOnce() -> String,
    cols: u32,
    rows: u32,
    (tw, th): (u32, u32),
) -> Result<RgbaImage, MapError> {
    let size = cols
        .checked_mul(tw)
        .zip(rows.checked_mul(th))
        .filter(|&(w, h)| u64::from(w) * u64::from(h) <= MAX_CANVAS_PIXELS);
    match size {
        Some((w, h)) => Ok(RgbaImage::new(w, h)),
        None => Err(MapError::Render {
            target: target(),
            reason: format!(
                "canvas of {cols}x{rows} tiles at {tw}x{th}px exceeds {MAX_CANVAS_PIXELS} pixels"
            ),
        }),
    }
}

/// Layers that make up a map composite, bottom first.
///
/// Field-type layers are always included, visible or not.
pub fn composite_layers(map: &TileMap) -> Vec<&Layer> {
    map.layers_by_z()
        .into_iter()
        .filter(|l| l.visible || l.layer_type() == LayerType::FieldType)
        .collect()
}

#[derive(Debug, Default)]
struct Counters {
    layers_rendered: AtomicU64,
    cache_hits: AtomicU64,
    tiles_skipped: AtomicU64,
}

/// Point-in-time copy of the rasterizer's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderStats {
    /// Layer images written.
    pub layers_rendered: u64,
    /// Layer requests served by an up-to-date image.
    pub cache_hits: u64,
    /// Tiles left out of layer images.
    pub tiles_skipped: u64,
}

/// Renders layers and maps and keeps their images in a [`BlobStore`].
pub struct Rasterizer<B> {
    blobs: B,
    image_root: PathBuf,
    counters: Counters,
}

impl<B: BlobStore> Rasterizer<B> {
    /// `image_root` is the base for relative tileset image paths.
    pub fn new(blobs: B, image_root: impl Into<PathBuf>) -> Self {
        Rasterizer {
            blobs,
            image_root: image_root.into(),
            counters: Counters::default(),
        }
    }

    /// The image store.
    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    /// Counters since construction.
    pub fn stats(&self) -> RenderStats {
        RenderStats {
            layers_rendered: self.counters.layers_rendered.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            tiles_skipped: self.counters.tiles_skipped.load(Ordering::Relaxed),
        }
    }

    /// Draws a layer's brush tiles onto a transparent canvas of
    /// `width*tile_width x height*tile_height` pixels.
    ///
    /// Tiles whose tileset or image cannot be resolved are skipped and logged.
    /// A canvas too large to allocate is a [`MapError::Render`].
    pub fn render_layer(
        &self,
        layer: &Layer,
        tile_size: (u32, u32),
        tilesets: &dyn TilesetLookup,
    ) -> Result<RgbaImage, MapError> {
        let (tw, th) = tile_size;
        let mut canvas = new_canvas(
            || format!("layer {}", layer.uuid),
            layer.width,
            layer.height,
            tile_size,
        )?;
        let Some(tiles) = layer.content().tiles() else {
            return Ok(canvas);
        };

        let mut images = TilesetImages::new(tilesets, &self.image_root);
        let mut skipped = 0u64;
        for tile in tiles {
            if !layer.contains(tile.x, tile.y) {
                debug!(layer = %layer.uuid, x = tile.x, y = tile.y, "tile outside layer bounds is clipped");
            }
            match images.crop(&tile.brush) {
                Ok(cell) => canvas::paste(
                    &mut canvas,
                    &cell,
                    i64::from(tile.x) * i64::from(tw),
                    i64::from(tile.y) * i64::from(th),
                ),
                Err(skip) => {
                    skipped += 1;
                    warn!(layer = %layer.uuid, x = tile.x, y = tile.y, "skipping tile: {skip}");
                }
            }
        }
        self.counters
            .tiles_skipped
            .fetch_add(skipped, Ordering::Relaxed);
        Ok(canvas)
    }

    /// Whether a stored image exists for the layer and is not older than it.
    pub fn is_up_to_date(&self, map_id: Uuid, layer: &Layer) -> Result<bool, MapError> {
        let key = layer_image_key(map_id, layer.uuid);
        Ok(self
            .blobs
            .modified(&key)?
            .is_some_and(|mtime| mtime >= layer.updated_at))
    }

    /// Returns the blob key of the layer image, rendering and storing it
    /// first when it is stale or `force_refresh` is set.
    pub fn get_or_render_layer(
        &self,
        map: &TileMap,
        layer: &Layer,
        tilesets: &dyn TilesetLookup,
        force_refresh: bool,
    ) -> Result<String, MapError> {
        let key = layer_image_key(map.uuid, layer.uuid);
        if !force_refresh && self.is_up_to_date(map.uuid, layer)? {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!(layer = %layer.uuid, %key, "layer image is up to date");
            return Ok(key);
        }

        let image = self.render_layer(layer, (map.tile_width, map.tile_height), tilesets)?;
        let bytes = canvas::encode_png(&image).map_err(|e| MapError::Render {
            target: format!("layer {}", layer.uuid),
            reason: e.to_string(),
        })?;
        self.blobs.write(&key, &bytes)?;
        self.counters.layers_rendered.fetch_add(1, Ordering::Relaxed);
        info!(layer = %layer.uuid, name = %layer.name, %key, "layer rendered");
        Ok(key)
    }

    /// Composites the map's layers, bottom to top by `z`.
    ///
    /// A layer whose image cannot be produced is left out; the rest of the
    /// map is still drawn.
    pub fn render_map(
        &self,
        map: &TileMap,
        tilesets: &dyn TilesetLookup,
    ) -> Result<RgbaImage, MapError> {
        let mut canvas = new_canvas(
            || format!("map {}", map.uuid),
            map.width,
            map.height,
            (map.tile_width, map.tile_height),
        )?;

        for layer in composite_layers(map) {
            let image = self
                .get_or_render_layer(map, layer, tilesets, false)
                .and_then(|key| self.load_image(&key));
            match image {
                Ok(image) => canvas::blend(
                    &mut canvas,
                    &image,
                    i64::from(layer.x) * i64::from(map.tile_width),
                    i64::from(layer.y) * i64::from(map.tile_height),
                    layer.effective_opacity(),
                ),
                Err(e) => warn!(map = %map.uuid, layer = %layer.uuid, "layer left out of map image: {e}"),
            }
        }
        Ok(canvas)
    }

    /// Renders the map composite and stores it, returning its blob key.
    pub fn render_map_to_store(
        &self,
        map: &TileMap,
        tilesets: &dyn TilesetLookup,
    ) -> Result<String, MapError> {
        let image = self.render_map(map, tilesets)?;
        let key = map_image_key(map.uuid);
        let bytes = canvas::encode_png(&image).map_err(|e| MapError::Render {
            target: format!("map {}", map.uuid),
            reason: e.to_string(),
        })?;
        self.blobs.write(&key, &bytes)?;
        info!(map = %map.uuid, %key, "map rendered");
        Ok(key)
    }

    /// Reads and decodes a stored image.
    pub fn load_image(&self, key: &str) -> Result<RgbaImage, MapError> {
        let bytes = self.blobs.read(key)?;
        canvas::decode_png(&bytes).map_err(|e| MapError::Render {
            target: key.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::model::{Brush, Cell, Tile, TileGeometry, TileSet};
    use crate::registry::TilesetRegistry;
    use image::Rgba;
    use tempfile::TempDir;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);

    /// 2x1 tileset of 4px tiles: red then green.
    fn fixture() -> (TempDir, TileSet) {
        let dir = TempDir::new().unwrap();
        let img = RgbaImage::from_fn(8, 4, |x, _| if x < 4 { RED } else { GREEN });
        img.save(dir.path().join("tiles.png")).unwrap();
        let ts = TileSet::new(
            "tiles",
            Some("tiles.png".into()),
            (8, 4),
            TileGeometry::square(4),
        );
        (dir, ts)
    }

    fn paint(layer: &mut Layer, x: i32, y: i32, tileset: Uuid, tile_x: u32) {
        layer
            .place(Cell::Tile(Tile {
                x,
                y,
                brush: Brush { tileset, tile_x, tile_y: 0 },
            }))
            .unwrap();
    }

    #[test]
    fn render_layer_places_cropped_cells() {
        let (dir, ts) = fixture();
        let reg = TilesetRegistry::from_tilesets([ts.clone()]);
        let raster = Rasterizer::new(MemoryBlobStore::new(), dir.path());

        let mut layer = Layer::new("ground", LayerType::Background, 3, 2);
        paint(&mut layer, 0, 0, ts.uuid, 1);
        paint(&mut layer, 2, 1, ts.uuid, 0);

        let img = raster.render_layer(&layer, (4, 4), &reg).unwrap();
        assert_eq!(img.dimensions(), (12, 8));
        assert_eq!(*img.get_pixel(1, 1), GREEN);
        assert_eq!(*img.get_pixel(9, 5), RED);
        assert_eq!(img.get_pixel(5, 1).0[3], 0);
    }

    #[test]
    fn unresolved_tileset_skips_only_that_tile() {
        let (dir, ts) = fixture();
        let reg = TilesetRegistry::from_tilesets([ts.clone()]);
        let raster = Rasterizer::new(MemoryBlobStore::new(), dir.path());

        let mut layer = Layer::new("ground", LayerType::Floor, 2, 1);
        paint(&mut layer, 0, 0, Uuid::new_v4(), 0);
        paint(&mut layer, 1, 0, ts.uuid, 0);

        let img = raster.render_layer(&layer, (4, 4), &reg).unwrap();
        assert_eq!(img.get_pixel(0, 0).0[3], 0);
        assert_eq!(*img.get_pixel(4, 0), RED);
        assert_eq!(raster.stats().tiles_skipped, 1);
    }

    #[test]
    fn missing_image_and_out_of_range_brush_are_skipped() {
        let (dir, ts) = fixture();
        let broken = TileSet::new("broken", Some("nope.png".into()), (8, 4), TileGeometry::square(4));
        let reg = TilesetRegistry::from_tilesets([ts.clone(), broken.clone()]);
        let raster = Rasterizer::new(MemoryBlobStore::new(), dir.path());

        let mut layer = Layer::new("ground", LayerType::Sky, 3, 1);
        paint(&mut layer, 0, 0, broken.uuid, 0);
        paint(&mut layer, 1, 0, ts.uuid, 5);
        paint(&mut layer, 2, 0, ts.uuid, 1);

        let img = raster.render_layer(&layer, (4, 4), &reg).unwrap();
        assert_eq!(*img.get_pixel(8, 0), GREEN);
        assert_eq!(raster.stats().tiles_skipped, 2);
    }

    #[test]
    fn non_paint_layers_render_transparent() {
        let raster = Rasterizer::new(MemoryBlobStore::new(), ".");
        let layer = Layer::new("zones", LayerType::FieldType, 2, 2);
        let img = raster.render_layer(&layer, (8, 8), &TilesetRegistry::new()).unwrap();
        assert_eq!(img.dimensions(), (16, 16));
        assert!(img.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn oversized_canvases_are_render_errors() {
        let raster = Rasterizer::new(MemoryBlobStore::new(), ".");
        let layer = Layer::new("huge", LayerType::Floor, 100_000, 100_000);
        assert!(matches!(
            raster.render_layer(&layer, (100_000, 100_000), &TilesetRegistry::new()),
            Err(MapError::Render { .. })
        ));

        let map = TileMap::new("huge", (100_000, 100_000), (100_000, 100_000), None);
        let err = raster.render_map(&map, &TilesetRegistry::new()).unwrap_err();
        assert!(matches!(err, MapError::Render { ref target, .. } if target.starts_with("map ")));
        assert_eq!(raster.stats().layers_rendered, 0);
    }

    #[test]
    fn half_opacity_blends() {
        let mut canvas = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 255, 255]));
        let top = RgbaImage::from_pixel(1, 1, RED);
        canvas::blend(&mut canvas, &top, 0, 0, 0.5);
        let px = canvas.get_pixel(0, 0);
        assert!(px.0[0] > 100 && px.0[0] < 155);
        assert!(px.0[2] > 100 && px.0[2] < 155);
    }
}
