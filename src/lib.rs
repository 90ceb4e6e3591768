#![warn(missing_docs)]

//! Sparse layered tile maps: a JSON cell codec, cached PNG rendering and
//! importers for canonical JSON, Tiled TMX/JSON and legacy script maps.

pub mod blob;
pub mod codec;
pub mod config;
mod error;
pub mod export;
pub mod import;
pub mod logging;
pub mod model;
pub mod reconcile;
pub mod registry;
pub mod render;
pub mod service;
pub mod store;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use codec::DecodePolicy;
pub use config::Settings;
pub use error::MapError;
pub use export::{ExportDocument, VersionRegistry};
pub use import::{Confidence, ImportedMap, Importer, ImporterRegistry};
pub use model::{
    Brush, Cell, Creator, FieldTypeTile, Layer, LayerContent, LayerType, ObjectTile, Tile,
    TileGeometry, TileMap, TileSet,
};
pub use reconcile::{ReconcileOptions, Reconciliation};
pub use registry::{TilesetLookup, TilesetRegistry};
pub use render::{Rasterizer, RenderStats};
pub use service::{ImportPreview, ImportReport, MapService};
pub use store::{MapStore, MemoryStore};
