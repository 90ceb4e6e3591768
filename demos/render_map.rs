//! Imports a map file and renders it to PNG.
//!
//! ```text
//! cargo run --example render_map -- assets/map.tmj [settings.toml]
//! ```
//!
//! Tilesets the map references are created from their images when nothing
//! registered matches. Images land under `storage.root`.

use anyhow::{bail, Context};
use std::path::PathBuf;
use tilemap_studio::logging::{default_filter, init_logging};
use tilemap_studio::{FsBlobStore, MapService, MemoryStore, Settings};

fn main() -> anyhow::Result<()> {
    init_logging(default_filter())?;

    let mut args = std::env::args_os().skip(1);
    let Some(map_path) = args.next().map(PathBuf::from) else {
        bail!("usage: render_map <map file> [settings file]");
    };
    let config_path = args.next().map(PathBuf::from);

    let mut settings = Settings::load(config_path.as_deref()).context("loading settings")?;
    if let Some(dir) = map_path.parent() {
        if settings.tilesets.image_root == PathBuf::from(".") {
            settings.tilesets.image_root = dir.to_path_buf();
        }
    }
    let mut options = settings.reconcile_options();
    options.auto_create = true;

    let blobs = FsBlobStore::new(&settings.storage.root);
    let service = MapService::new(MemoryStore::default(), blobs, settings);

    let report = service
        .import_with(&map_path, &options)
        .with_context(|| format!("importing {}", map_path.display()))?;
    println!(
        "imported '{}' with {} ({} layers, {} tilesets created, {} tiles dropped)",
        report.map.name,
        report.importer,
        report.map.layers.len(),
        report.created_tilesets.len(),
        report.dropped_tiles
    );

    for layer in &report.map.layers {
        let key = service.layer_image(report.map.uuid, layer.uuid, false)?;
        println!("  {:<10} {:<16} {}", layer.layer_type().as_str(), layer.name, key);
    }

    let key = service.map_image(report.map.uuid)?;
    let stats = service.rasterizer().stats();
    println!(
        "map image: {} ({} layers rendered, {} tiles skipped)",
        service.rasterizer().blobs().root().join(key).display(),
        stats.layers_rendered,
        stats.tiles_skipped
    );
    Ok(())
}
