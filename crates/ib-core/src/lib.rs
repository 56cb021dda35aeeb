//! Keyword-to-image engine for a comment-reply bot.
//!
//! Finds `word.ext` tokens in text, resolves them against an immutable
//! keyword catalog (exact, then fuzzy), and keeps the bookkeeping needed to
//! never answer the same message twice.
//!
//! Zero I/O: loading, persistence and the platform live in other crates.

pub mod catalog;
pub mod command;
pub mod constants;
pub mod export;
pub mod image;
pub mod ledger;
pub mod matcher;
pub mod normalize;
pub mod recency;
pub mod reply;
pub mod schedule;
pub mod similarity;

pub use catalog::KeywordCatalog;
pub use command::{CommandKind, classify, parse_delete_body, parse_force_subject};
pub use constants::{ANIM_EXT, FUZZY_THRESHOLD, HOT_WINDOW, SEEN_CAPACITY, STATIC_EXT};
pub use export::{render_page, render_table};
pub use image::{CatalogError, Image, ImageSet};
pub use ledger::{LedgerSnapshot, ReplyLedger, ReplyRecord};
pub use matcher::{MatchReport, RawToken, ResolvedMatch, extract, find_matches, resolve};
pub use normalize::normalize;
pub use recency::BoundedRecencySet;
pub use reply::Templates;
pub use schedule::ExportSchedule;
