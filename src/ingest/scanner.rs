use walkdir::WalkDir;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Lists every file directly inside `root`, dot-files included, ordered by extension and then by name.
pub fn scan_directory(root: &Path) -> Result<Vec<PathBuf>> {
    let walker = WalkDir::new(root).min_depth(1).max_depth(1).into_iter();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            Error::io(path, e.into())
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    files.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
    Ok(files)
}

fn sort_key(path: &Path) -> (String, String) {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    (ext, name)
}
