use std::collections::{BTreeMap, HashSet};

use crate::constants::FUZZY_THRESHOLD;
use crate::image::{Image, ImageSet};
use crate::similarity::score;

/// In-memory index from normalized keyword to image sets.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct KeywordCatalog {
    sets: Vec<ImageSet>,
    by_keyword: BTreeMap<String, Vec<usize>>,
}

impl KeywordCatalog {
    /// Sets are kept sorted by id so lookups return candidates in a stable order.
    pub fn new(sets: impl IntoIterator<Item = ImageSet>) -> Self {
        let mut sets: Vec<ImageSet> = sets.into_iter().collect();
        sets.sort_by(|a, b| a.id.cmp(&b.id));

        let mut by_keyword: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (idx, set) in sets.iter().enumerate() {
            for keyword in &set.keywords {
                by_keyword.entry(keyword.clone()).or_default().push(idx);
            }
        }
        Self { sets, by_keyword }
    }

    pub fn sets(&self) -> &[ImageSet] {
        &self.sets
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Number of distinct lookup keywords.
    pub fn keyword_count(&self) -> usize {
        self.by_keyword.len()
    }

    /// Total images across all sets.
    pub fn image_count(&self) -> usize {
        self.sets.iter().map(|s| s.images.len()).sum()
    }

    /// The ids of every set reachable through `word`.
    pub fn sets_for(&self, word: &str) -> Vec<&str> {
        self.by_keyword
            .get(word)
            .map(|idxs| idxs.iter().map(|&i| self.sets[i].id.as_str()).collect())
            .unwrap_or_default()
    }

    /// Exact lookup: the union of images of every set containing `word`.
    ///
    /// `animated` is advisory. When given, only images of that kind are
    /// returned, unless none exist, in which case the full union is.
    pub fn lookup(&self, word: &str, animated: Option<bool>) -> Option<Vec<&Image>> {
        let idxs = self.by_keyword.get(word)?;

        let mut seen: HashSet<&str> = HashSet::new();
        let mut all: Vec<&Image> = Vec::new();
        for &i in idxs {
            for image in &self.sets[i].images {
                if seen.insert(image.url.as_str()) {
                    all.push(image);
                }
            }
        }
        if all.is_empty() {
            return None;
        }

        if let Some(want) = animated {
            let preferred: Vec<&Image> =
                all.iter().copied().filter(|i| i.animated == want).collect();
            if !preferred.is_empty() {
                return Some(preferred);
            }
        }
        Some(all)
    }

    /// Best keyword scoring strictly above the fuzzy threshold.
    pub fn fuzzy_lookup(&self, word: &str) -> Option<&str> {
        let mut best: Option<(&str, f64)> = None;
        for keyword in self.by_keyword.keys() {
            let s = score(word, keyword);
            match best {
                Some((_, best_score)) if s <= best_score => {}
                _ => best = Some((keyword.as_str(), s)),
            }
        }
        let (keyword, s) = best?;
        if s > FUZZY_THRESHOLD { Some(keyword) } else { None }
    }
}
