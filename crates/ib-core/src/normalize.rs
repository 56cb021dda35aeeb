use unicode_normalization::UnicodeNormalization;

/// Fold a word to its lookup form.
///
/// Decomposes (NFD), drops everything outside ASCII, lower-cases, then keeps
/// only `[a-z_]`. Digits and punctuation vanish: `"Perché2"` becomes `"perche"`.
pub fn normalize(word: &str) -> String {
    word.nfd()
        .filter(char::is_ascii)
        .map(|c| c.to_ascii_lowercase())
        .filter(|c| c.is_ascii_lowercase() || *c == '_')
        .collect()
}
