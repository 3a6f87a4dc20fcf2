//! On-disk vendor cache
//!
//! Each installed package identity owns one directory:
//!
//! ```text
//! vendor/<registry>/<name>@<version>/   ← versioned entry
//! vendor/<registry>/<name>/             ← entry with an empty version
//! ```
//!
//! Entries are written into a staging directory next to their final
//! location and renamed into place, so a failed fetch never leaves a
//! partial entry behind.
//!
//! Identity parts come from registry data and must each stay one path
//! segment. Versions may contain `/` (free-form fs versions); they are
//! percent-encoded into the directory name and decoded by [`VendorCache::entries`].

use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::ContentSink;
use crate::error::{Error, Result};
use crate::pkg::PackageId;

const STAGING_PREFIX: &str = ".staging-";

#[derive(Debug, Clone)]
pub struct VendorCache {
    root: PathBuf,
}

impl VendorCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the entry for `id`
    ///
    /// Fails when a part of `id` would leave its path segment.
    pub fn entry_path(&self, id: &PackageId) -> Result<PathBuf> {
        let (registry, dir) = entry_segments(id).map_err(|reason| Error::CacheWriteFailed {
            path: PathBuf::from(id.to_string()),
            source: io::Error::new(io::ErrorKind::InvalidInput, reason),
        })?;
        Ok(self.root.join(registry).join(dir))
    }

    pub fn contains(&self, id: &PackageId) -> bool {
        self.entry_path(id).is_ok_and(|path| path.is_dir())
    }

    /// Every entry currently on disk, sorted
    pub fn entries(&self) -> Result<Vec<PackageId>> {
        let mut ids = Vec::new();
        for registry_dir in list_dirs(&self.root)? {
            let registry = file_name(&registry_dir);
            for package_dir in list_dirs(&registry_dir)? {
                let dir_name = file_name(&package_dir);
                let id = match dir_name.split_once('@') {
                    Some((name, version)) => {
                        PackageId::new(&registry, name, decode_version(version))
                    }
                    None => PackageId::new(&registry, dir_name, ""),
                };
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Build the entry for `id` from whatever `fill` streams into the sink
    ///
    /// An existing entry is replaced only after `fill` succeeds.
    pub fn materialize<T>(
        &self,
        id: &PackageId,
        fill: impl FnOnce(&mut dyn ContentSink) -> Result<T>,
    ) -> Result<T> {
        let target = self.entry_path(id)?;
        let registry_dir = self.root.join(&id.registry);
        let write_failed = |path: &Path, source: io::Error| Error::CacheWriteFailed {
            path: path.to_path_buf(),
            source,
        };

        std::fs::create_dir_all(&registry_dir).map_err(|e| write_failed(&registry_dir, e))?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&registry_dir)
            .map_err(|e| write_failed(&registry_dir, e))?;

        let mut staging_sink = StagingSink {
            dest: staging.path().to_path_buf(),
            package_dir: None,
        };
        let sink: &mut dyn ContentSink = &mut staging_sink;
        let result = fill(sink)?;

        if target.exists() {
            debug!("Replacing vendor entry {}", target.display());
            std::fs::remove_dir_all(&target).map_err(|e| write_failed(&target, e))?;
        }
        std::fs::rename(staging.path(), &target).map_err(|e| write_failed(&target, e))?;

        debug!("Materialized {} at {}", id, target.display());
        Ok(result)
    }

    /// Delete the entry for `id`, pruning its registry directory when empty
    ///
    /// Returns whether an entry existed.
    pub fn remove(&self, id: &PackageId) -> io::Result<bool> {
        let (registry, dir) =
            entry_segments(id).map_err(|reason| io::Error::new(io::ErrorKind::InvalidInput, reason))?;
        let target = self.root.join(&registry).join(dir);
        if !target.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&target)?;

        let registry_dir = self.root.join(registry);
        if std::fs::read_dir(&registry_dir)?.next().is_none() {
            std::fs::remove_dir(&registry_dir)?;
        }
        Ok(true)
    }
}

/// Registry directory and entry directory names for `id`
fn entry_segments(id: &PackageId) -> std::result::Result<(String, String), String> {
    check_segment("registry", &id.registry)?;
    check_segment("package name", &id.name)?;
    if id.name.contains('@') {
        return Err(format!("package name '{}' contains '@'", id.name));
    }

    let dir = if id.version.is_empty() {
        id.name.clone()
    } else {
        format!("{}@{}", id.name, encode_version(&id.version))
    };
    Ok((id.registry.clone(), dir))
}

/// Require `value` to be exactly one normal path component
fn check_segment(kind: &str, value: &str) -> std::result::Result<(), String> {
    let mut components = Path::new(value).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(part)), None) if part == value
    );
    if !single_normal || value.contains(['/', '\\', '\0']) {
        return Err(format!("{kind} '{value}' is not a single path segment"));
    }
    Ok(())
}

fn encode_version(version: &str) -> String {
    version
        .replace('%', "%25")
        .replace('/', "%2F")
        .replace('\\', "%5C")
        .replace('\0', "%00")
}

fn decode_version(encoded: &str) -> String {
    encoded
        .replace("%00", "\0")
        .replace("%5C", "\\")
        .replace("%2F", "/")
        .replace("%25", "%")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Visible subdirectories of `dir`; a missing `dir` has none
fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::read(dir, e)),
    };

    let mut dirs = Vec::new();
    for entry in read {
        let entry = entry.map_err(|e| Error::read(dir, e))?;
        let path = entry.path();
        if path.is_dir() && !file_name(&path).starts_with('.') {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Writes registry content into a staging directory
///
/// The first directory a registry reports is the package directory and
/// every later path is taken relative to it. A file reported before any
/// directory belongs under its own first path component.
struct StagingSink {
    dest: PathBuf,
    package_dir: Option<PathBuf>,
}

impl StagingSink {
    fn target(&mut self, path: &Path, is_dir: bool) -> Result<PathBuf> {
        let invalid = |reason: &str| Error::CacheWriteFailed {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, reason.to_string()),
        };

        let package_dir = self
            .package_dir
            .get_or_insert_with(|| {
                if is_dir {
                    path.to_path_buf()
                } else {
                    path.components()
                        .next()
                        .map(|c| PathBuf::from(c.as_os_str()))
                        .unwrap_or_default()
                }
            })
            .clone();
        let relative = path
            .strip_prefix(&package_dir)
            .map_err(|_| invalid("path is outside the package directory"))?;

        let mut target = self.dest.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => target.push(part),
                Component::CurDir => {}
                _ => return Err(invalid("path escapes the package directory")),
            }
        }
        Ok(target)
    }
}

impl ContentSink for StagingSink {
    fn on_file(&mut self, path: &Path, contents: &[u8]) -> Result<()> {
        let target = self.target(path, false)?;
        if target == self.dest {
            return Err(Error::CacheWriteFailed {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "file outside a package directory"),
            });
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::CacheWriteFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::write(&target, contents).map_err(|e| Error::CacheWriteFailed {
            path: target.clone(),
            source: e,
        })
    }

    fn on_directory(&mut self, path: &Path) -> Result<()> {
        let target = self.target(path, true)?;
        std::fs::create_dir_all(&target).map_err(|e| Error::CacheWriteFailed {
            path: target.clone(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fill_apache(sink: &mut dyn ContentSink) -> Result<()> {
        sink.on_directory(Path::new("apache"))?;
        sink.on_file(Path::new("apache/parts.yaml"), b"name: apache\n")?;
        sink.on_directory(Path::new("apache/prototypes"))?;
        sink.on_file(Path::new("apache/prototypes/simple.jsonnet"), b"{}")
    }

    #[test]
    fn test_entry_paths() {
        let cache = VendorCache::new("/app/vendor");
        assert_eq!(
            cache.entry_path(&PackageId::new("incubator", "apache", "1.2.0")).unwrap(),
            PathBuf::from("/app/vendor/incubator/apache@1.2.0")
        );
        assert_eq!(
            cache.entry_path(&PackageId::new("local", "apache", "")).unwrap(),
            PathBuf::from("/app/vendor/local/apache")
        );
    }

    #[test]
    fn test_materialize_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let cache = VendorCache::new(temp_dir.path().join("vendor"));
        let v1 = PackageId::new("incubator", "apache", "1.1.0");
        let unversioned = PackageId::new("local", "apache", "");

        cache.materialize(&v1, fill_apache).unwrap();
        cache.materialize(&unversioned, fill_apache).unwrap();

        let entry = cache.entry_path(&v1).unwrap();
        assert!(entry.join("parts.yaml").is_file());
        assert!(entry.join("prototypes/simple.jsonnet").is_file());
        assert_eq!(cache.entries().unwrap(), vec![v1, unversioned]);
    }

    #[test]
    fn test_failed_fill_leaves_no_entry() {
        let temp_dir = TempDir::new().unwrap();
        let cache = VendorCache::new(temp_dir.path().join("vendor"));
        let id = PackageId::new("incubator", "apache", "1.2.0");

        let result: Result<()> = cache.materialize(&id, |sink| {
            sink.on_file(Path::new("apache/parts.yaml"), b"partial")?;
            Err(Error::fetch("incubator", "fetch package file", "connection reset"))
        });

        assert!(result.is_err());
        assert!(!cache.contains(&id));
        assert!(cache.entries().unwrap().is_empty());
        let leftovers = std::fs::read_dir(temp_dir.path().join("vendor/incubator"))
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_rematerialize_replaces_content() {
        let temp_dir = TempDir::new().unwrap();
        let cache = VendorCache::new(temp_dir.path().join("vendor"));
        let id = PackageId::new("incubator", "apache", "1.2.0");

        cache.materialize(&id, fill_apache).unwrap();
        cache
            .materialize(&id, |sink| {
                sink.on_file(Path::new("apache/parts.yaml"), b"name: replaced\n")
            })
            .unwrap();

        let entry = cache.entry_path(&id).unwrap();
        assert_eq!(
            std::fs::read_to_string(entry.join("parts.yaml")).unwrap(),
            "name: replaced\n"
        );
        assert!(!entry.join("prototypes").exists());
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let temp_dir = TempDir::new().unwrap();
        let cache = VendorCache::new(temp_dir.path().join("vendor"));
        let id = PackageId::new("incubator", "apache", "1.2.0");

        let result = cache.materialize(&id, |sink| {
            sink.on_file(Path::new("apache/../../escape.txt"), b"x")
        });
        assert!(matches!(result, Err(Error::CacheWriteFailed { .. })));
        assert!(!temp_dir.path().join("escape.txt").exists());
    }

    #[test]
    fn test_remove_prunes_registry_dir() {
        let temp_dir = TempDir::new().unwrap();
        let cache = VendorCache::new(temp_dir.path().join("vendor"));
        let id = PackageId::new("incubator", "apache", "1.2.0");

        cache.materialize(&id, fill_apache).unwrap();
        assert!(cache.remove(&id).unwrap());
        assert!(!cache.remove(&id).unwrap());
        assert!(!temp_dir.path().join("vendor/incubator").exists());
    }

    #[test]
    fn test_identity_parts_stay_inside_the_cache() {
        let temp_dir = TempDir::new().unwrap();
        let outside = temp_dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("keep.txt"), "keep").unwrap();
        let cache = VendorCache::new(temp_dir.path().join("vendor"));

        let absolute = outside.to_string_lossy().into_owned();
        let bad_ids = [
            PackageId::new("local", absolute.as_str(), ""),
            PackageId::new("local", "../outside", ""),
            PackageId::new("local", "..", ""),
            PackageId::new("..", "outside", ""),
            PackageId::new("local", "a/b", "1.0"),
            PackageId::new("local", "a@b", "1.0"),
            PackageId::new("", "apache", "1.0"),
        ];
        for id in &bad_ids {
            assert!(
                matches!(cache.entry_path(id), Err(Error::CacheWriteFailed { .. })),
                "{id:?} should be rejected"
            );
            assert!(!cache.contains(id));
            assert!(cache.materialize(id, fill_apache).is_err());
            assert!(cache.remove(id).is_err());
        }

        assert!(outside.join("keep.txt").is_file());
        assert!(!temp_dir.path().join("vendor").exists());
    }

    #[test]
    fn test_versions_with_separators_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let cache = VendorCache::new(temp_dir.path().join("vendor"));
        let release = PackageId::new("local", "redis", "release/1.0");
        let dotted = PackageId::new("local", "redis", "..");
        let percent = PackageId::new("local", "redis", "100%2F");

        for id in [&release, &dotted, &percent] {
            cache.materialize(id, fill_apache).unwrap();
            assert!(cache.contains(id));
        }

        assert_eq!(
            cache.entry_path(&release).unwrap(),
            temp_dir.path().join("vendor/local/redis@release%2F1.0")
        );
        let mut expected = vec![release.clone(), dotted, percent];
        expected.sort();
        assert_eq!(cache.entries().unwrap(), expected);

        assert!(cache.remove(&release).unwrap());
        assert!(!cache.contains(&release));
    }

    #[test]
    fn test_nested_package_directory_is_stripped() {
        let temp_dir = TempDir::new().unwrap();
        let cache = VendorCache::new(temp_dir.path().join("vendor"));
        let id = PackageId::new("incubator", "apache", "1.2.0");

        cache
            .materialize(&id, |sink| {
                sink.on_directory(Path::new("stable/apache"))?;
                sink.on_file(Path::new("stable/apache/parts.yaml"), b"name: apache\n")?;
                sink.on_directory(Path::new("stable/apache/prototypes"))?;
                sink.on_file(Path::new("stable/apache/prototypes/simple.jsonnet"), b"{}")
            })
            .unwrap();

        let entry = cache.entry_path(&id).unwrap();
        assert!(entry.join("parts.yaml").is_file());
        assert!(entry.join("prototypes/simple.jsonnet").is_file());
        assert!(!entry.join("apache").exists());

        let result = cache.materialize(&id, |sink| {
            sink.on_directory(Path::new("stable/apache"))?;
            sink.on_file(Path::new("stable/redis/parts.yaml"), b"x")
        });
        assert!(matches!(result, Err(Error::CacheWriteFailed { .. })));
    }
}
