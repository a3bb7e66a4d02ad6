use std::fs;
use std::path::{Path, PathBuf};

/// Creates the directory that will hold `db_path`, if it has one.
pub fn ensure_parent_dir(db_path: &Path) -> std::io::Result<Option<PathBuf>> {
    match db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        Some(parent) => {
            ensure_dir(parent)?;
            Ok(Some(parent.to_path_buf()))
        }
        None => Ok(None),
    }
}

fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}
