use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the tile map pipeline.
#[derive(Debug, Error)]
pub enum MapError {
    /// No importer claims the file, or the file does not have the shape an importer expects.
    #[error("unsupported map format for {}: {reason}", path.display())]
    UnsupportedFormat {
        /// The rejected file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// Malformed external document or invalid edit. Carries every problem found.
    #[error("validation failed: {}", problems.join("; "))]
    Validation {
        /// One message per problem.
        problems: Vec<String>,
    },

    /// A referenced map, layer, tileset or file is absent.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up.
        kind: &'static str,
        /// Identifier or path that was not found.
        id: String,
    },

    /// Imported tilesets could not be resolved and auto-create is disabled.
    #[error("unresolved tilesets: {}", missing.join(", "))]
    Reconciliation {
        /// Names of the unresolved tilesets.
        missing: Vec<String>,
    },

    /// A layer or map image could not be produced.
    #[error("render of {target} failed: {reason}")]
    Render {
        /// The layer or map being rendered.
        target: String,
        /// Why it failed.
        reason: String,
    },

    /// Reading or writing a file failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The file involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A JSON document did not parse or deserialize.
    #[error("JSON error in {}: {source}", path.display())]
    Json {
        /// The document.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A TMX map or its tilesets could not be loaded.
    #[error("TMX error in {}: {source}", path.display())]
    Tmx {
        /// The map file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: tiled::Error,
    },

    /// Image decoding or encoding failed.
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl MapError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        MapError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        MapError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn unsupported(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        MapError::UnsupportedFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(problem: impl Into<String>) -> Self {
        MapError::Validation {
            problems: vec![problem.into()],
        }
    }
}
