// tests/import_tests.rs

use image::RgbaImage;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tilemap_studio::reconcile::ReconcileOptions;
use tilemap_studio::{
    Brush, Cell, Creator, FieldTypeTile, LayerType, MapError, MapService, MapStore,
    MemoryBlobStore, MemoryStore, Settings, Tile, TileGeometry, TileSet,
};

type Service = MapService<MemoryStore, MemoryBlobStore>;

fn service(image_root: &Path) -> Service {
    let mut settings = Settings::default();
    settings.tilesets.image_root = image_root.to_path_buf();
    MapService::new(MemoryStore::default(), MemoryBlobStore::new(), settings)
}

fn auto_create() -> ReconcileOptions {
    ReconcileOptions {
        auto_create: true,
        ..ReconcileOptions::default()
    }
}

fn write_png(path: PathBuf, w: u32, h: u32) {
    RgbaImage::new(w, h).save(path).unwrap();
}

/// A Tiled JSON map painting from a known tileset (by `uuid` property) and
/// from a second one nobody has registered.
fn two_tileset_map(dir: &Path, known: &TileSet) -> PathBuf {
    let image = r#""image": "dungeon.png", "imagewidth": 32, "imageheight": 32,"#;
    write_map(dir, known, image)
}

fn write_map(dir: &Path, known: &TileSet, dungeon_image: &str) -> PathBuf {
    let doc = format!(
        r#"{{
          "width": 2, "height": 1, "tilewidth": 16, "tileheight": 16,
          "tilesets": [
            {{"firstgid": 1, "name": "castle", "tilewidth": 16, "tileheight": 16,
              "tilecount": 4, "columns": 2,
              "properties": [{{"name": "uuid", "type": "string", "value": "{}"}}]}},
            {{"firstgid": 5, "name": "dungeon_walls", {}
              "tilewidth": 16, "tileheight": 16, "tilecount": 4, "columns": 2}}
          ],
          "layers": [{{"type": "tilelayer", "name": "ground", "width": 2, "height": 1,
                       "data": [2, 8]}}]
        }}"#,
        known.uuid, dungeon_image
    );
    let path = dir.join("level.tmj");
    fs::write(&path, doc).unwrap();
    path
}

fn castle() -> TileSet {
    TileSet::new("castle", Some("castle.png".into()), (32, 32), TileGeometry::square(16))
}

#[test]
fn unresolved_tileset_rejects_the_whole_import() {
    let dir = TempDir::new().unwrap();
    let svc = service(dir.path());
    let known = svc.create_tileset(castle()).unwrap();
    let path = two_tileset_map(dir.path(), &known);

    let err = svc.import(&path).unwrap_err();
    match err {
        MapError::Reconciliation { missing } => assert_eq!(missing, vec!["dungeon_walls".to_string()]),
        other => panic!("expected Reconciliation, got {other:?}"),
    }
    assert!(svc.maps_by_name("level").unwrap().is_empty());
    assert_eq!(svc.tilesets().unwrap().len(), 1);
}

#[test]
fn auto_create_builds_missing_tilesets_from_images() {
    let dir = TempDir::new().unwrap();
    write_png(dir.path().join("dungeon.png"), 32, 32);
    let svc = service(dir.path());
    let known = svc.create_tileset(castle()).unwrap();
    let path = two_tileset_map(dir.path(), &known);

    let report = svc.import_with(&path, &auto_create()).unwrap();
    assert_eq!(report.importer, "tiled-json");
    assert_eq!(report.created_tilesets.len(), 1);
    assert_eq!(report.dropped_tiles, 0);
    let created = &report.created_tilesets[0];
    assert_eq!(created.name, "dungeon_walls");
    assert_eq!(created.tile_count, 4);

    let map = svc.map(report.map.uuid).unwrap();
    let tiles = map.layers[0].content().tiles().unwrap();
    assert_eq!(tiles[0].brush, Brush { tileset: known.uuid, tile_x: 1, tile_y: 0 });
    assert_eq!(tiles[1].brush, Brush { tileset: created.uuid, tile_x: 1, tile_y: 1 });
    assert_eq!(svc.tilesets().unwrap().len(), 2);
}

#[test]
fn auto_create_without_an_image_drops_those_tiles() {
    let dir = TempDir::new().unwrap();
    let svc = service(dir.path());
    let known = svc.create_tileset(castle()).unwrap();
    let path = write_map(dir.path(), &known, "");

    let report = svc.import_with(&path, &auto_create()).unwrap();
    assert!(report.created_tilesets.is_empty());
    assert_eq!(report.dropped_tiles, 1);
    assert_eq!(report.map.layers[0].content().len(), 1);
}

#[test]
fn preview_suggests_without_persisting() {
    let dir = TempDir::new().unwrap();
    let svc = service(dir.path());
    let known = svc.create_tileset(castle()).unwrap();
    svc.create_tileset(TileSet::new("Dungeon Walls", None, (32, 32), TileGeometry::square(16)))
        .unwrap();
    let path = two_tileset_map(dir.path(), &known);

    let preview = svc.preview_import(&path, &ReconcileOptions::default()).unwrap();
    assert_eq!(preview.reconciliation.missing.len(), 1);
    let suggestions = &preview.reconciliation.missing[0].suggestions;
    assert_eq!(suggestions[0].name, "Dungeon Walls");
    assert_eq!(suggestions[0].score, 1.0);
    assert!(svc.maps_by_name("level").unwrap().is_empty());

    // binding the key to the suggestion completes the import
    let mut options = ReconcileOptions::default();
    options
        .mappings
        .insert(preview.reconciliation.missing[0].descriptor.key.clone(), suggestions[0].tileset);
    let report = svc.import_with(&path, &options).unwrap();
    assert_eq!(report.map.layers[0].content().len(), 2);
}

#[test]
fn canonical_export_round_trips_into_another_store() {
    let dir = TempDir::new().unwrap();
    let source = service(dir.path());
    let ts = source.create_tileset(castle()).unwrap();
    let creator = Creator { name: "Ada".into(), email: "ada@example.com".into() };
    let map = source.create_map("keep", (4, 3), (16, 16), Some(creator)).unwrap();
    let bg = map.layers[0].uuid;
    source
        .place_cell(map.uuid, bg, Cell::Tile(Tile { x: 3, y: 2, brush: Brush { tileset: ts.uuid, tile_x: 1, tile_y: 1 } }))
        .unwrap();
    let zones = source.add_layer(map.uuid, "zones", LayerType::FieldType).unwrap();
    source
        .place_cell(map.uuid, zones.uuid, Cell::FieldType(FieldTypeTile { x: 0, y: 0, field_type: 5 }))
        .unwrap();

    let export_path = dir.path().join("keep.json");
    source.export_to_file(map.uuid, &export_path).unwrap();
    let original = source.map(map.uuid).unwrap();

    let target = service(dir.path());
    target.create_tileset(ts.clone()).unwrap();
    let report = target.import(&export_path).unwrap();
    assert_eq!(report.importer, "canonical");

    let copy = target.map(report.map.uuid).unwrap();
    assert_eq!(copy.uuid, original.uuid);
    assert_eq!(copy.name, original.name);
    assert_eq!((copy.width, copy.height), (original.width, original.height));
    assert_eq!(copy.creator, original.creator);
    assert_eq!(copy.layers.len(), original.layers.len());
    for (a, b) in copy.layers.iter().zip(&original.layers) {
        assert_eq!(a.uuid, b.uuid);
        assert_eq!(a.layer_type(), b.layer_type());
        assert_eq!(a.z, b.z);
        assert_eq!(a.content(), b.content());
        assert_eq!(a.updated_at, b.updated_at);
    }
    assert_eq!(target.export(copy.uuid).unwrap(), source.export(map.uuid).unwrap());

    // a second import of the same document gets a fresh identifier
    let again = target.import(&export_path).unwrap();
    assert_ne!(again.map.uuid, original.uuid);
}

#[test]
fn legacy_script_with_sidecar_imports_field_types() {
    let dir = TempDir::new().unwrap();
    write_png(dir.path().join("stone.png"), 16, 16);
    fs::write(
        dir.path().join("crypt.js"),
        r#"TileMaps["crypt"] = { "width": 2, "height": 2, "tilewidth": 8, "tileheight": 8,
  "tilesets": [{"firstgid": 1, "name": "stone", "image": "stone.png", "imagewidth": 16,
                "imageheight": 16, "tilewidth": 8, "tileheight": 8, "tilecount": 4, "columns": 2}],
  "layers": [{"type": "tilelayer", "name": "floor", "width": 2, "height": 2, "data": [1, 2, 3, 4]}] };"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("crypt_fieldtype.js"),
        r#"TileMaps["crypt_fieldtype"] = { "name": "walkable", "data": [0, 1, 1, 0] };"#,
    )
    .unwrap();

    let svc = service(dir.path());
    let report = svc.import_with(&dir.path().join("crypt.js"), &auto_create()).unwrap();
    assert_eq!(report.importer, "legacy-script");

    let map = svc.map(report.map.uuid).unwrap();
    assert_eq!(map.layers.len(), 2);
    let floor = &map.layers[0];
    assert_eq!(floor.layer_type(), LayerType::Floor);
    assert_eq!(floor.content().len(), 4);
    let walkable = &map.layers[1];
    assert_eq!(walkable.name, "walkable");
    assert_eq!(walkable.layer_type(), LayerType::FieldType);
    assert!(!walkable.visible);
    assert!(walkable.z > floor.z);
    assert_eq!(walkable.content().len(), 2);
}

#[test]
fn tmx_imports_through_the_service() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    RgbaImage::new(16, 16).save(dir.path().join("walls.png"))?;
    fs::write(
        dir.path().join("hall.tmx"),
        r#"<?xml version="1.0" encoding="UTF-8"?>
<map version="1.10" orientation="orthogonal" renderorder="right-down" width="2" height="1" tilewidth="8" tileheight="8" infinite="0">
 <tileset firstgid="1" name="walls" tilewidth="8" tileheight="8" tilecount="4" columns="2">
  <image source="walls.png" width="16" height="16"/>
 </tileset>
 <layer id="1" name="sky" width="2" height="1">
  <data encoding="csv">
3,0
</data>
 </layer>
</map>
"#,
    )?;

    let svc = service(dir.path());
    let report = svc.import_with(&dir.path().join("hall.tmx"), &auto_create())?;
    assert_eq!(report.importer, "tmx");
    let layer = &report.map.layers[0];
    assert_eq!(layer.layer_type(), LayerType::Sky);
    let tile = layer.content().tiles().unwrap()[0];
    assert_eq!((tile.brush.tile_x, tile.brush.tile_y), (0, 1));
    assert!(svc.store().contains_map(report.map.uuid)?);
    Ok(())
}

#[test]
fn unknown_formats_are_unsupported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("map.yaml");
    fs::write(&path, "width: 3").unwrap();
    let svc = service(dir.path());
    assert!(matches!(svc.import(&path), Err(MapError::UnsupportedFormat { .. })));
}
