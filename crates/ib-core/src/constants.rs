/// Extensions that name a still image.
pub const STATIC_EXT: &[&str] = &["jpeg", "jpg", "png"];

/// Extensions that name an animation or a clip.
pub const ANIM_EXT: &[&str] = &["gif", "avi", "gifv", "mp4"];

/// Capacity of each feed's dedup window (comments and inbox are separate).
pub const SEEN_CAPACITY: usize = 150;

/// Number of most-recent reply records kept addressable for lookup.
pub const HOT_WINDOW: usize = 100;

/// Minimum fuzzy score (0-100, exclusive) for a keyword substitution.
pub const FUZZY_THRESHOLD: f64 = 93.0;

/// Returns true if `ext` (any case) is one of the animated extensions.
pub fn is_animated_ext(ext: &str) -> bool {
    ANIM_EXT.iter().any(|e| e.eq_ignore_ascii_case(ext))
}

/// Returns true if `ext` (any case) is one of the static extensions.
pub fn is_static_ext(ext: &str) -> bool {
    STATIC_EXT.iter().any(|e| e.eq_ignore_ascii_case(ext))
}

/// The extension class matching an image kind.
pub fn ext_class(animated: bool) -> &'static [&'static str] {
    if animated { ANIM_EXT } else { STATIC_EXT }
}
