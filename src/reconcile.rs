//! Matching imported tileset descriptors against registered tilesets.
//!
//! A descriptor resolves through an explicit mapping or its identifier.
//! Otherwise it gets name-based suggestions and, when allowed and an image
//! is available, a freshly created tileset. Suggestions are never picked
//! automatically.

use crate::import::{ImportedMap, ImportedTileset};
use crate::model::{TileGeometry, TileSet};
use crate::registry::{normalize_name, TilesetRegistry};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How imported tileset descriptors are matched.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Create tilesets for unresolved descriptors that come with an image.
    pub auto_create: bool,
    /// Imported key to chosen tileset, typically picked from suggestions.
    pub mappings: HashMap<String, Uuid>,
    /// Geometry for created tilesets whose descriptor declares none.
    pub default_geometry: TileGeometry,
    /// Suggestions must score strictly above this.
    pub suggestion_threshold: f64,
    /// Cap on suggestions per descriptor.
    pub max_suggestions: usize,
    /// Base for relative image paths when probing image dimensions.
    pub image_root: PathBuf,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        ReconcileOptions {
            auto_create: false,
            mappings: HashMap::new(),
            default_geometry: TileGeometry::square(32),
            suggestion_threshold: 0.3,
            max_suggestions: 5,
            image_root: PathBuf::from("."),
        }
    }
}

/// A registered tileset whose name resembles a missing one.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    /// Suggested tileset.
    pub tileset: Uuid,
    /// Its name.
    pub name: String,
    /// Name similarity in `[0, 1]`.
    pub score: f64,
}

/// A descriptor that resolved to nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingTileset {
    /// What the import declared.
    pub descriptor: ImportedTileset,
    /// Best matches first.
    pub suggestions: Vec<Suggestion>,
}

/// Result of matching descriptors against the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Imported key to registered (or created) tileset.
    pub resolved: HashMap<String, Uuid>,
    /// Tilesets built from images; not yet persisted.
    pub created: Vec<TileSet>,
    /// Descriptors left unresolved.
    pub missing: Vec<MissingTileset>,
}

impl Reconciliation {
    /// Whether every descriptor resolved.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Names of the unresolved descriptors, for error reporting.
    pub fn missing_names(&self) -> Vec<String> {
        self.missing
            .iter()
            .map(|m| m.descriptor.name.clone())
            .collect()
    }
}

/// Reconciles every tileset an imported map declares or references.
///
/// Keys that tiles use without a matching descriptor are treated as bare
/// identifiers.
pub fn reconcile_map(
    map: &ImportedMap,
    registry: &TilesetRegistry,
    options: &ReconcileOptions,
) -> Reconciliation {
    let mut descriptors = map.tilesets.clone();
    for key in map.referenced_keys() {
        if !descriptors.iter().any(|d| d.key == key) {
            let mut bare = ImportedTileset::named(key, key);
            bare.uuid = Uuid::parse_str(key).ok();
            descriptors.push(bare);
        }
    }
    reconcile(&descriptors, registry, options)
}

/// Resolves descriptors by explicit mapping, then identifier, then
/// auto-creation. Unresolved ones carry name suggestions.
pub fn reconcile(
    tilesets: &[ImportedTileset],
    registry: &TilesetRegistry,
    options: &ReconcileOptions,
) -> Reconciliation {
    let mut out = Reconciliation::default();

    for desc in tilesets {
        if let Some(id) = resolve_existing(desc, registry, options) {
            debug!(key = %desc.key, tileset = %id, "tileset resolved");
            out.resolved.insert(desc.key.clone(), id);
            continue;
        }

        let suggestions = suggest(&desc.name, registry, options);

        if options.auto_create {
            match create_tileset(desc, options) {
                Ok(Some(ts)) => {
                    info!(key = %desc.key, tileset = %ts.uuid, name = %ts.name, "tileset created");
                    out.resolved.insert(desc.key.clone(), ts.uuid);
                    out.created.push(ts);
                    continue;
                }
                Ok(None) => debug!(key = %desc.key, "no image to create a tileset from"),
                Err(reason) => warn!(key = %desc.key, %reason, "tileset not created"),
            }
        }

        out.missing.push(MissingTileset {
            descriptor: desc.clone(),
            suggestions,
        });
    }
    out
}

fn resolve_existing(
    desc: &ImportedTileset,
    registry: &TilesetRegistry,
    options: &ReconcileOptions,
) -> Option<Uuid> {
    if let Some(id) = options.mappings.get(&desc.key) {
        if registry.get(id).is_some() {
            return Some(*id);
        }
        warn!(key = %desc.key, tileset = %id, "mapping points at an unknown tileset");
    }
    desc.uuid.filter(|id| registry.get(id).is_some())
}

/// Builds a tileset from a descriptor's image. `Ok(None)` when there is no
/// local image to build from.
fn create_tileset(desc: &ImportedTileset, options: &ReconcileOptions) -> Result<Option<TileSet>, String> {
    let Some(image_path) = &desc.image_path else {
        return Ok(None);
    };
    let (width, height) = if desc.image_width > 0 && desc.image_height > 0 {
        (desc.image_width, desc.image_height)
    } else {
        let probe = locate(image_path, &options.image_root);
        image::image_dimensions(&probe).map_err(|e| format!("{}: {e}", probe.display()))?
    };
    let geometry = desc.geometry.unwrap_or(options.default_geometry);

    let mut ts = TileSet::new(
        desc.name.clone(),
        Some(image_path.to_string_lossy().into_owned()),
        (width, height),
        geometry,
    );
    if let Some(id) = desc.uuid {
        ts.uuid = id;
    }
    ts.image_url = desc.image_url.clone();
    Ok(Some(ts))
}

fn locate(path: &Path, image_root: &Path) -> PathBuf {
    if path.is_absolute() || path.exists() {
        path.to_path_buf()
    } else {
        image_root.join(path)
    }
}

/// Registered tilesets whose names look like `name`, best first.
pub fn suggest(name: &str, registry: &TilesetRegistry, options: &ReconcileOptions) -> Vec<Suggestion> {
    let mut found: Vec<Suggestion> = registry
        .iter()
        .map(|ts| Suggestion {
            tileset: ts.uuid,
            name: ts.name.clone(),
            score: similarity(name, &ts.name),
        })
        .filter(|s| s.score > options.suggestion_threshold)
        .collect();
    found.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    found.truncate(options.max_suggestions);
    found
}

/// `1 - distance / longest` over normalized names, in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = normalize_name(a).chars().collect();
    let b: Vec<char> = normalize_name(b).chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitute = prev[j] + usize::from(ca != cb);
            cur[j + 1] = substitute.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}
