//! The crate's own export documents, read back in.

use super::{extension, read_text, Confidence, ImportedMap, Importer};
use crate::codec::DecodePolicy;
use crate::error::MapError;
use crate::export;
use serde_json::Value;
use std::path::Path;

/// Reads documents written by [`crate::export::to_canonical_form`].
#[derive(Debug, Default)]
pub struct CanonicalImporter {
    /// Decoding of layer data.
    pub policy: DecodePolicy,
}

impl CanonicalImporter {
    /// Importer decoding layer data with `policy`.
    pub fn new(policy: DecodePolicy) -> Self {
        CanonicalImporter { policy }
    }
}

impl Importer for CanonicalImporter {
    fn name(&self) -> &'static str {
        "canonical"
    }

    /// Claims `.json` files that carry an `export_version` key.
    fn can_parse(&self, path: &Path) -> Confidence {
        if extension(path).as_deref() != Some("json") {
            return Confidence::No;
        }
        let Ok(text) = std::fs::read_to_string(path) else {
            return Confidence::No;
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(o)) if o.contains_key("export_version") => Confidence::Certain,
            Ok(_) => Confidence::No,
            Err(_) => Confidence::Maybe,
        }
    }

    fn parse(&self, path: &Path) -> Result<ImportedMap, MapError> {
        let text = read_text(path)?;
        let doc: Value = serde_json::from_str(&text).map_err(|source| MapError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        if !doc.is_object() {
            return Err(MapError::unsupported(path, "expected a JSON object"));
        }
        export::from_canonical_form(&doc, self.policy)
    }
}
