use std::path::{Path, PathBuf};
use std::{env, fs};

use crate::error::{Result, StoreError};

/// Default base directory for all bot state.
pub fn default_base_dir() -> PathBuf {
    dirs_home().join(".immaginibot")
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// File layout under the data directory.
///
/// ```text
/// ~/.immaginibot/
/// ├── bot.toml
/// ├── images.toml
/// ├── status.toml
/// ├── immaginibot.pid
/// └── templates/
///     ├── body.txt
///     ├── force.txt
///     ├── body.json
///     ├── force.json
///     └── export.txt
/// ```
#[derive(Debug, Clone)]
pub struct DataDir {
    base: PathBuf,
}

impl DataDir {
    /// Use `base_dir` if given, else the default; creates the directory.
    pub fn open(base_dir: Option<&Path>) -> Result<Self> {
        let base = base_dir.map(PathBuf::from).unwrap_or_else(default_base_dir);
        fs::create_dir_all(&base).map_err(|e| StoreError::Io(base.clone(), e))?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn settings_path(&self) -> PathBuf {
        self.base.join("bot.toml")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.base.join("images.toml")
    }

    pub fn status_path(&self) -> PathBuf {
        self.base.join("status.toml")
    }

    pub fn pidfile_path(&self) -> PathBuf {
        self.base.join("immaginibot.pid")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.base.join("templates")
    }
}
