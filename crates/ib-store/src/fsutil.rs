use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

/// Read a whole file, `None` if it does not exist.
pub(crate) fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Io(path.to_path_buf(), e)),
    }
}

/// Write via a sibling temp file and rename, so readers never see a torn file.
pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| StoreError::Io(parent.to_path_buf(), e))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state");
    let temp: PathBuf = parent.join(format!(".{file_name}.tmp-{}", std::process::id()));
    fs::write(&temp, content).map_err(|e| StoreError::Io(temp.clone(), e))?;
    fs::rename(&temp, path).map_err(|e| StoreError::Io(path.to_path_buf(), e))?;
    Ok(())
}
