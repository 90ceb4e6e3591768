//! Settings, layered from defaults, an optional file and the environment.
//!
//! Environment keys use the `TILEMAP` prefix and `__` between sections,
//! e.g. `TILEMAP__IMPORT__AUTO_CREATE=true`.

use crate::codec::DecodePolicy;
use crate::model::TileGeometry;
use crate::reconcile::ReconcileOptions;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variables override settings as `TILEMAP__<SECTION>__<KEY>`.
pub const ENV_PREFIX: &str = "TILEMAP";

/// Where generated images go.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Root of generated layer and map images.
    pub root: PathBuf,
}

/// Tileset image lookup and defaults.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TilesetConfig {
    /// Base directory for relative tileset image paths.
    pub image_root: PathBuf,
    /// Tile width for created tilesets that declare none.
    pub default_tile_width: u32,
    /// Tile height for created tilesets that declare none.
    pub default_tile_height: u32,
}

/// Import and decoding behaviour.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImportConfig {
    /// Create unresolved tilesets from their images.
    pub auto_create: bool,
    /// How stored and imported cell data is decoded.
    pub decode_policy: DecodePolicy,
    /// Minimum name similarity for a suggestion, exclusive.
    pub suggestion_threshold: f64,
    /// Suggestions kept per unresolved tileset.
    pub max_suggestions: usize,
    /// File stem suffix of legacy field-type sidecars.
    pub field_type_suffix: String,
}

/// Application settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Image storage.
    pub storage: StorageConfig,
    /// Tileset lookup.
    pub tilesets: TilesetConfig,
    /// Import behaviour.
    pub import: ImportConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            storage: StorageConfig {
                root: PathBuf::from("generated"),
            },
            tilesets: TilesetConfig {
                image_root: PathBuf::from("."),
                default_tile_width: 32,
                default_tile_height: 32,
            },
            import: ImportConfig {
                auto_create: false,
                decode_policy: DecodePolicy::Lenient,
                suggestion_threshold: 0.3,
                max_suggestions: 5,
                field_type_suffix: "_fieldtype".to_string(),
            },
        }
    }
}

impl Settings {
    /// Defaults, then `config_file` if given, then `TILEMAP__*` variables.
    pub fn load(config_file: Option<&Path>) -> Result<Settings, ConfigError> {
        let defaults = Config::try_from(&Settings::default())?;
        let mut builder = Config::builder().add_source(defaults);
        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: Settings = builder.build()?.try_deserialize()?;
        tracing::debug!(settings = ?cfg, "settings loaded");
        Ok(cfg)
    }

    /// Grid for created tilesets that declare none.
    pub fn default_geometry(&self) -> TileGeometry {
        TileGeometry {
            tile_width: self.tilesets.default_tile_width,
            tile_height: self.tilesets.default_tile_height,
            margin: 0,
            spacing: 0,
        }
    }

    /// Reconciliation options for one import; `mappings` start empty.
    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            auto_create: self.import.auto_create,
            mappings: HashMap::new(),
            default_geometry: self.default_geometry(),
            suggestion_threshold: self.import.suggestion_threshold,
            max_suggestions: self.import.max_suggestions,
            image_root: self.tilesets.image_root.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tilemap.toml");
        fs::write(
            &path,
            "[import]\nauto_create = true\ndecode_policy = \"strict\"\n\n[storage]\nroot = \"out\"\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert!(settings.import.auto_create);
        assert_eq!(settings.import.decode_policy, DecodePolicy::Strict);
        assert_eq!(settings.storage.root, PathBuf::from("out"));
        assert_eq!(settings.import.max_suggestions, 5);
        assert_eq!(settings.tilesets.default_tile_width, 32);
    }

    #[test]
    fn options_follow_settings() {
        let mut settings = Settings::default();
        settings.tilesets.default_tile_height = 16;
        let opts = settings.reconcile_options();
        assert!(!opts.auto_create);
        assert_eq!(opts.default_geometry.tile_height, 16);
        assert!((opts.suggestion_threshold - 0.3).abs() < f64::EPSILON);
    }
}
