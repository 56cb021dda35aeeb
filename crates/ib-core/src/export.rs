//! Markdown rendering of the catalog for the published instructions page.

use crate::catalog::KeywordCatalog;
use crate::reply::fill;

/// `|Keywords|Images|` table, one row per set, sorted by id.
///
/// The public table skips hidden sets and hidden keywords; the full one
/// includes both.
pub fn render_table(catalog: &KeywordCatalog, include_hidden: bool) -> String {
    let mut out = String::from("|Keywords|Images|\n|:-|:-|\n");
    for set in catalog.sets() {
        if set.hide && !include_hidden {
            continue;
        }
        let mut keywords: Vec<&str> = set.keywords.iter().map(String::as_str).collect();
        if include_hidden {
            keywords.extend(set.hidden_keywords.iter().map(String::as_str));
        }
        let images = set
            .images
            .iter()
            .enumerate()
            .map(|(i, image)| format!("[{}]({})", i + 1, image.url))
            .collect::<Vec<_>>()
            .join(" ");
        out.push_str(&format!("|{}|{}|\n", keywords.join(", "), images));
    }
    out
}

/// Fill the page template's `{username}`, `{table}` and `{timestamp}`.
pub fn render_page(template: &str, username: &str, table: &str, timestamp: &str) -> String {
    fill(
        template,
        &[
            ("username", username),
            ("table", table),
            ("timestamp", timestamp),
        ],
    )
}
