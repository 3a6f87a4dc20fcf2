//! Small filesystem helpers shared by the manifest, params and vendor code

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

/// Write `contents` to a sibling temp file and rename it over `path`.
///
/// Readers never observe a half-written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let staged = stage(path, contents)?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Write `contents` next to `path` without replacing it yet.
///
/// Dropping the returned handle removes the staged file.
pub fn stage(path: &Path, contents: &[u8]) -> std::io::Result<NamedTempFile> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut staged = tempfile::Builder::new()
        .prefix(".ksapp-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    staged.write_all(contents)?;
    staged.as_file().sync_all()?;
    Ok(staged)
}

/// Read a file, treating a missing file as `None`
pub fn read_optional(path: &Path) -> std::io::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
