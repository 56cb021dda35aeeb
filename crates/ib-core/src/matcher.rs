use std::sync::LazyLock;

use rand::Rng;
use rand::seq::IndexedRandom;
use regex::Regex;

use crate::catalog::KeywordCatalog;
use crate::constants::{ANIM_EXT, STATIC_EXT, ext_class, is_animated_ext};
use crate::image::Image;
use crate::normalize::normalize;

static MAYBE_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    let exts = [STATIC_EXT, ANIM_EXT].concat().join("|");
    Regex::new(&format!(r"(?i)(?:^|\s|\^)(\w+)\.({exts})\b")).unwrap()
});

/// A `<word>.<extension>` candidate found in raw text. `extension` is lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawToken {
    pub word: String,
    pub extension: String,
}

impl RawToken {
    pub fn new(word: &str, extension: &str) -> Self {
        Self {
            word: word.to_string(),
            extension: extension.to_ascii_lowercase(),
        }
    }

    pub fn wants_animated(&self) -> bool {
        is_animated_ext(&self.extension)
    }
}

/// A token resolved to a concrete image.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMatch {
    /// Normalized keyword that matched (the replacement, for fuzzy hits).
    pub word: String,
    /// Extension as requested in the text.
    pub extension: String,
    /// Extension to show next to the link; always in the image's class.
    pub display_extension: String,
    pub image: Image,
    pub fuzzy: bool,
}

impl ResolvedMatch {
    /// Link label, e.g. `gatto.png`.
    pub fn label(&self) -> String {
        format!("{}.{}", self.word, self.display_extension)
    }
}

/// Outcome of running one text through the pipeline.
#[derive(Debug, Clone, Default)]
pub struct MatchReport {
    pub matches: Vec<ResolvedMatch>,
    /// Normalized words with no exact or fuzzy hit.
    pub misses: Vec<String>,
    /// `(requested, substituted)` pairs accepted by the fuzzy fallback.
    pub fuzzy: Vec<(String, String)>,
}

impl MatchReport {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn any_fuzzy(&self) -> bool {
        self.matches.iter().any(|m| m.fuzzy)
    }
}

/// Find every image token in `text`, skipping quoted (`>`) lines.
pub fn extract(text: &str) -> Vec<RawToken> {
    text.lines()
        .filter(|line| !line.trim_start().starts_with('>'))
        .flat_map(|line| {
            MAYBE_IMAGE
                .captures_iter(line)
                .map(|c| RawToken::new(&c[1], &c[2]))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Resolve one token against the catalog: exact, then fuzzy, then pick one
/// image uniformly at random. Returns `None` for a miss.
pub fn resolve(
    catalog: &KeywordCatalog,
    token: &RawToken,
    rng: &mut impl Rng,
) -> Option<ResolvedMatch> {
    let word = normalize(&token.word);
    if word.is_empty() {
        return None;
    }
    let animated = Some(token.wants_animated());

    let (word, candidates, fuzzy) = match catalog.lookup(&word, animated) {
        Some(candidates) => (word, candidates, false),
        None => {
            let replacement = catalog.fuzzy_lookup(&word)?;
            let candidates = catalog.lookup(replacement, animated)?;
            (replacement.to_string(), candidates, true)
        }
    };

    let image = (*candidates.choose(rng)?).clone();
    let class = ext_class(image.animated);
    let display_extension = if class.contains(&token.extension.as_str()) {
        token.extension.clone()
    } else {
        class.choose(rng).copied().unwrap_or(class[0]).to_string()
    };

    Some(ResolvedMatch {
        word,
        extension: token.extension.clone(),
        display_extension,
        image,
        fuzzy,
    })
}

/// Run the whole pipeline over `text`. Misses never abort the remaining tokens.
pub fn find_matches(catalog: &KeywordCatalog, text: &str, rng: &mut impl Rng) -> MatchReport {
    let mut report = MatchReport::default();
    for token in extract(text) {
        match resolve(catalog, &token, rng) {
            Some(m) => {
                if m.fuzzy {
                    report.fuzzy.push((normalize(&token.word), m.word.clone()));
                }
                report.matches.push(m);
            }
            None => report.misses.push(normalize(&token.word)),
        }
    }
    report
}
