//! Filesystem side of immaginibot: data directory layout, `bot.toml`
//! settings, the `images.toml` catalog, reply templates and the
//! `status.toml` reply ledger.

pub mod catalog_file;
pub mod error;
mod fsutil;
pub mod layout;
pub mod settings;
pub mod status;
pub mod templates;

pub use catalog_file::{load_catalog, parse_catalog};
pub use error::{Result, StoreError};
pub use layout::{DataDir, default_base_dir};
pub use settings::{BotSettings, RedditSettings, Settings};
pub use status::ReplyStateStore;
pub use templates::load_templates;
