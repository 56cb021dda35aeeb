use std::path::Path;

use ib_core::Templates;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::fsutil::read_optional;

fn load_json(path: &Path) -> Result<Option<Value>> {
    match read_optional(path)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Json(path.to_path_buf(), e)),
        None => Ok(None),
    }
}

/// Load reply templates from `dir`, falling back to the built-in text for
/// any file that is absent.
pub fn load_templates(dir: &Path) -> Result<Templates> {
    let mut templates = Templates::default();
    if let Some(body) = read_optional(&dir.join("body.txt"))? {
        templates.body = body;
    }
    if let Some(forced) = read_optional(&dir.join("force.txt"))? {
        templates.forced = forced;
    }
    if let Some(export) = read_optional(&dir.join("export.txt"))? {
        templates.export = export;
    }
    if let Some(footer) = load_json(&dir.join("body.json"))? {
        templates.footer = footer;
    }
    if let Some(header) = load_json(&dir.join("force.json"))? {
        templates.header = header;
    }
    Ok(templates)
}
