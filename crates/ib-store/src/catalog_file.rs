//! `images.toml` loader.
//!
//! ```toml
//! [gatto]
//! aliases = ["cat", "micio"]   # or alias = "cat"
//! hiddens = ["felino"]         # or hidden = "felino"
//! hide = false
//! images = [
//!     "https://i.example/cat.png",
//!     ["https://i.example/cat.gif", "media-id"],
//! ]                            # or image = "..."
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use ib_core::{Image, ImageSet, KeywordCatalog};
use serde::Deserialize;

use crate::error::{Result, StoreError};
use crate::fsutil::read_optional;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ImageEntry {
    Url(String),
    WithRef(String, String),
}

impl From<ImageEntry> for Image {
    fn from(entry: ImageEntry) -> Self {
        match entry {
            ImageEntry::Url(url) => Image::new(url, None),
            ImageEntry::WithRef(url, media) => Image::new(url, Some(media)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SetEntry {
    alias: Option<String>,
    aliases: Option<Vec<String>>,
    hidden: Option<String>,
    hiddens: Option<Vec<String>>,
    #[serde(default)]
    hide: bool,
    image: Option<ImageEntry>,
    images: Option<Vec<ImageEntry>>,
}

/// Plural list wins over the singular key, as long as it is non-empty.
fn words(plural: Option<Vec<String>>, singular: Option<String>) -> Vec<String> {
    match plural {
        Some(list) if !list.is_empty() => list,
        _ => singular.into_iter().filter(|s| !s.is_empty()).collect(),
    }
}

/// Parse catalog TOML text. `origin` only labels errors.
pub fn parse_catalog(content: &str, origin: &Path) -> Result<KeywordCatalog> {
    let entries: BTreeMap<String, SetEntry> =
        toml::from_str(content).map_err(|e| StoreError::TomlDecode(origin.to_path_buf(), e))?;

    let mut sets = Vec::with_capacity(entries.len());
    for (id, entry) in entries {
        let aliases = words(entry.aliases, entry.alias);
        let hidden = words(entry.hiddens, entry.hidden);
        let images: Vec<Image> = match (entry.image, entry.images) {
            (Some(one), _) => vec![one.into()],
            (None, Some(many)) => many.into_iter().map(Image::from).collect(),
            (None, None) => Vec::new(),
        };
        sets.push(ImageSet::new(&id, aliases, hidden, entry.hide, images)?);
    }
    Ok(KeywordCatalog::new(sets))
}

/// Load the catalog file. A missing file is an error: the bot has nothing to say.
pub fn load_catalog(path: &Path) -> Result<KeywordCatalog> {
    let content = read_optional(path)?.ok_or_else(|| {
        StoreError::InvalidData(format!("catalog not found at {}", path.display()))
    })?;
    let catalog = parse_catalog(&content, path)?;
    tracing::info!(
        sets = catalog.len(),
        keywords = catalog.keyword_count(),
        images = catalog.image_count(),
        "loaded catalog from {}",
        path.display()
    );
    Ok(catalog)
}
