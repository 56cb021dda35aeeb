use std::fmt;
use std::path::PathBuf;

use ib_core::CatalogError;

#[derive(Debug)]
pub enum StoreError {
    Io(PathBuf, std::io::Error),
    TomlDecode(PathBuf, toml::de::Error),
    TomlEncode(toml::ser::Error),
    Json(PathBuf, serde_json::Error),
    Catalog(CatalogError),
    InvalidData(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(path, e) => write!(f, "I/O error on {}: {e}", path.display()),
            StoreError::TomlDecode(path, e) => {
                write!(f, "failed to parse {}: {e}", path.display())
            }
            StoreError::TomlEncode(e) => write!(f, "failed to serialize TOML: {e}"),
            StoreError::Json(path, e) => write!(f, "failed to parse {}: {e}", path.display()),
            StoreError::Catalog(e) => write!(f, "invalid catalog: {e}"),
            StoreError::InvalidData(msg) => write!(f, "invalid data: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(_, e) => Some(e),
            StoreError::TomlDecode(_, e) => Some(e),
            StoreError::TomlEncode(e) => Some(e),
            StoreError::Json(_, e) => Some(e),
            StoreError::Catalog(e) => Some(e),
            StoreError::InvalidData(_) => None,
        }
    }
}

impl From<toml::ser::Error> for StoreError {
    fn from(e: toml::ser::Error) -> Self {
        StoreError::TomlEncode(e)
    }
}

impl From<CatalogError> for StoreError {
    fn from(e: CatalogError) -> Self {
        StoreError::Catalog(e)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
