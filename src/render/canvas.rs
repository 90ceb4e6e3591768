use crate::model::{Brush, TileSet};
use crate::registry::TilesetLookup;
use image::{imageops, ImageFormat, RgbaImage};
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Why a single tile was left out of a layer image.
#[derive(Debug, Clone, PartialEq)]
pub enum TileSkip {
    /// The brush names a tileset nobody registered.
    UnknownTileset(Uuid),
    /// The tileset image could not be read.
    MissingImage {
        /// Tileset name.
        tileset: String,
        /// Why the image is unavailable.
        reason: String,
    },
    /// The brush cell lies past the edge of the image.
    BrushOutOfRange {
        /// Tileset name.
        tileset: String,
        /// Brush column.
        tile_x: u32,
        /// Brush row.
        tile_y: u32,
    },
}

impl fmt::Display for TileSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileSkip::UnknownTileset(id) => write!(f, "tileset {id} is not registered"),
            TileSkip::MissingImage { tileset, reason } => {
                write!(f, "image of tileset '{tileset}' unavailable: {reason}")
            }
            TileSkip::BrushOutOfRange {
                tileset,
                tile_x,
                tile_y,
            } => write!(
                f,
                "brush ({tile_x}, {tile_y}) lies outside the image of tileset '{tileset}'"
            ),
        }
    }
}

struct Loaded {
    tileset: TileSet,
    image: Result<Arc<RgbaImage>, String>,
}

/// Tileset images loaded during one render, each source read at most once.
pub(crate) struct TilesetImages<'a> {
    lookup: &'a dyn TilesetLookup,
    image_root: &'a Path,
    loaded: HashMap<Uuid, Option<Loaded>>,
}

impl<'a> TilesetImages<'a> {
    pub(crate) fn new(lookup: &'a dyn TilesetLookup, image_root: &'a Path) -> Self {
        TilesetImages {
            lookup,
            image_root,
            loaded: HashMap::new(),
        }
    }

    /// Crops the brush's cell out of its tileset image.
    pub(crate) fn crop(&mut self, brush: &Brush) -> Result<RgbaImage, TileSkip> {
        let image_root = self.image_root;
        let lookup = self.lookup;
        let entry = self.loaded.entry(brush.tileset).or_insert_with(|| {
            lookup.tileset(&brush.tileset).map(|tileset| {
                let image = load_tileset_image(&tileset, image_root);
                if let Err(reason) = &image {
                    warn!(tileset = %tileset.name, %reason, "tileset image unavailable");
                }
                Loaded { tileset, image }
            })
        });
        let Some(loaded) = entry else {
            return Err(TileSkip::UnknownTileset(brush.tileset));
        };
        let image = loaded
            .image
            .as_ref()
            .map_err(|reason| TileSkip::MissingImage {
                tileset: loaded.tileset.name.clone(),
                reason: reason.clone(),
            })?;

        let ts = &loaded.tileset;
        let (sx, sy) = ts.source_origin(brush.tile_x, brush.tile_y);
        let fits = ts.tile_width > 0
            && ts.tile_height > 0
            && sx.checked_add(ts.tile_width).is_some_and(|r| r <= image.width())
            && sy.checked_add(ts.tile_height).is_some_and(|b| b <= image.height());
        if !fits {
            return Err(TileSkip::BrushOutOfRange {
                tileset: ts.name.clone(),
                tile_x: brush.tile_x,
                tile_y: brush.tile_y,
            });
        }
        Ok(imageops::crop_imm(&**image, sx, sy, ts.tile_width, ts.tile_height).to_image())
    }
}

fn load_tileset_image(tileset: &TileSet, image_root: &Path) -> Result<Arc<RgbaImage>, String> {
    let Some(rel) = tileset.image_path.as_deref().filter(|p| !p.is_empty()) else {
        return Err(match &tileset.image_url {
            Some(url) => format!("no local image, remote source {url} is not fetched"),
            None => "no image path".to_string(),
        });
    };
    let path = resolve_image_path(image_root, rel);
    image::open(&path)
        .map(|img| Arc::new(img.to_rgba8()))
        .map_err(|e| format!("{}: {e}", path.display()))
}

pub(crate) fn resolve_image_path(image_root: &Path, image_path: &str) -> PathBuf {
    let p = Path::new(image_path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        image_root.join(p)
    }
}

/// Pastes `tile` at pixel `(x, y)`, replacing what was underneath.
pub(crate) fn paste(canvas: &mut RgbaImage, tile: &RgbaImage, x: i64, y: i64) {
    imageops::replace(canvas, tile, x, y);
}

/// Alpha-blends `layer` over `canvas` at pixel `(x, y)`, scaled by `opacity`.
pub(crate) fn blend(canvas: &mut RgbaImage, layer: &RgbaImage, x: i64, y: i64, opacity: f32) {
    if opacity <= 0.0 {
        return;
    }
    if opacity >= 1.0 {
        imageops::overlay(canvas, layer, x, y);
        return;
    }
    let mut faded = layer.clone();
    for px in faded.pixels_mut() {
        px.0[3] = (f32::from(px.0[3]) * opacity).round() as u8;
    }
    imageops::overlay(canvas, &faded, x, y);
}

pub(crate) fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

pub(crate) fn decode_png(bytes: &[u8]) -> Result<RgbaImage, image::ImageError> {
    Ok(image::load_from_memory_with_format(bytes, ImageFormat::Png)?.to_rgba8())
}
