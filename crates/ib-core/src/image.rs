use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::constants::is_animated_ext;
use crate::normalize::normalize;

/// A single image link, optionally paired with a platform-native media id.
///
/// Equality and hashing look at `url` only.
#[derive(Clone, Debug)]
pub struct Image {
    pub url: String,
    pub external_ref: Option<String>,
    pub animated: bool,
}

impl Image {
    /// Build an image; `animated` comes from the url's file extension.
    pub fn new(url: impl Into<String>, external_ref: Option<String>) -> Self {
        let url = url.into();
        let animated = url_extension(&url).is_some_and(is_animated_ext);
        Self {
            url,
            external_ref,
            animated,
        }
    }
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Image {}

impl Hash for Image {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

/// Extension of the last path segment, ignoring query string and fragment.
fn url_extension(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() { None } else { Some(ext) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    EmptyId,
    NoImages(String),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::EmptyId => write!(f, "image set id normalizes to an empty keyword"),
            CatalogError::NoImages(id) => write!(f, "image set '{id}' has no images"),
        }
    }
}

impl std::error::Error for CatalogError {}

/// A named group of interchangeable images reachable through its keywords.
///
/// `keywords` always contains the normalized id. Sets are immutable once built.
#[derive(Clone, Debug)]
pub struct ImageSet {
    pub id: String,
    pub keywords: BTreeSet<String>,
    pub images: Vec<Image>,
    pub hidden_keywords: BTreeSet<String>,
    pub hide: bool,
}

impl ImageSet {
    pub fn new<A, H, I>(
        id: &str,
        aliases: A,
        hidden_keywords: H,
        hide: bool,
        images: I,
    ) -> Result<Self, CatalogError>
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        H: IntoIterator,
        H::Item: AsRef<str>,
        I: IntoIterator<Item = Image>,
    {
        let own = normalize(id);
        if own.is_empty() {
            return Err(CatalogError::EmptyId);
        }

        let mut keywords = BTreeSet::from([own]);
        keywords.extend(
            aliases
                .into_iter()
                .map(|a| normalize(a.as_ref()))
                .filter(|a| !a.is_empty()),
        );
        let hidden_keywords = hidden_keywords
            .into_iter()
            .map(|h| normalize(h.as_ref()))
            .filter(|h| !h.is_empty())
            .collect();

        let mut deduped: Vec<Image> = Vec::new();
        for image in images {
            if !deduped.contains(&image) {
                deduped.push(image);
            }
        }
        if deduped.is_empty() {
            return Err(CatalogError::NoImages(id.to_string()));
        }

        Ok(Self {
            id: id.to_string(),
            keywords,
            images: deduped,
            hidden_keywords,
            hide,
        })
    }
}
