//! Registry backed by a local directory

use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use super::{
    library_for, ContentSink, PackageMetadata, Protocol, Registry, RegistryContext, RegistrySpec,
    PARTS_FILE, REGISTRY_FILE,
};
use crate::app::{LibraryConfig, RegistryConfig};
use crate::error::{Error, Result};

pub(crate) struct FsRegistry {
    config: RegistryConfig,
    app_root: PathBuf,
    root: PathBuf,
}

impl FsRegistry {
    pub(crate) fn new(config: RegistryConfig, ctx: &RegistryContext) -> Result<Self> {
        let root = resolve_root(&ctx.app_root, &config.uri)?;
        Ok(Self {
            config,
            app_root: ctx.app_root.clone(),
            root,
        })
    }

    fn spec_path(&self) -> PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    fn package_root(&self, spec: &RegistrySpec, name: &str) -> Result<PathBuf> {
        let dir = spec
            .package_dir(name)
            .ok_or_else(|| Error::PackageNotFound {
                registry: self.config.name.clone(),
                package: name.to_string(),
                available: spec.package_names(),
            })?;
        Ok(self.root.join(dir))
    }
}

/// Turn an fs URI into an absolute directory
///
/// Accepts `file://` URLs and plain paths; relative paths resolve against
/// the app root.
fn resolve_root(app_root: &Path, uri: &str) -> Result<PathBuf> {
    let path = uri.strip_prefix("file://").unwrap_or(uri);
    if path.is_empty() {
        return Err(Error::InvalidUri {
            uri: uri.to_string(),
            reason: "path is empty".to_string(),
        });
    }

    let path = Path::new(path);
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(app_root.join(path))
    }
}

impl Registry for FsRegistry {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn protocol(&self) -> Protocol {
        Protocol::Fs
    }

    fn uri(&self) -> &str {
        &self.config.uri
    }

    fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn fetch_spec(&self) -> Result<RegistrySpec> {
        let path = self.spec_path();
        let content = std::fs::read_to_string(&path).map_err(|e| Error::read(&path, e))?;
        RegistrySpec::from_yaml(&path, &content)
    }

    fn resolve_package_metadata(
        &self,
        name: &str,
        version_hint: Option<&str>,
    ) -> Result<PackageMetadata> {
        let spec = self.fetch_spec()?;
        let package_root = self.package_root(&spec, name)?;

        let parts_path = package_root.join(PARTS_FILE);
        let content =
            std::fs::read_to_string(&parts_path).map_err(|e| Error::read(&parts_path, e))?;
        let mut metadata: PackageMetadata =
            serde_yaml_ng::from_str(&content).map_err(|e| Error::parse(&parts_path, e))?;
        if metadata.name.is_empty() {
            metadata.name = name.to_string();
        }

        // A local checkout holds exactly one version of each package
        if let Some(hint) = version_hint {
            if !hint.is_empty() && hint != metadata.version {
                return Err(Error::VersionNotFound {
                    registry: self.config.name.clone(),
                    package: name.to_string(),
                    version: hint.to_string(),
                });
            }
        }

        Ok(metadata)
    }

    fn resolve_package_content(
        &self,
        name: &str,
        alias: &str,
        version_hint: Option<&str>,
        sink: &mut dyn ContentSink,
    ) -> Result<(PackageMetadata, LibraryConfig)> {
        let metadata = self.resolve_package_metadata(name, version_hint)?;
        let spec = self.fetch_spec()?;
        let package_root = self.package_root(&spec, name)?;

        debug!(
            registry = %self.config.name,
            package = name,
            "Walking {}",
            package_root.display()
        );

        for entry in WalkDir::new(&package_root).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                Error::fetch(&self.config.name, format!("walk package '{name}'"), e)
            })?;
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| Error::fetch(&self.config.name, "walk package", e))?;

            if entry.file_type().is_dir() {
                sink.on_directory(relative)?;
            } else if entry.file_type().is_file() {
                let contents =
                    std::fs::read(entry.path()).map_err(|e| Error::read(entry.path(), e))?;
                sink.on_file(relative, &contents)?;
            }
        }

        let lib = library_for(&self.config.name, &metadata, alias);
        Ok((metadata, lib))
    }

    fn validate_uri(&self, uri: &str) -> Result<()> {
        let root = resolve_root(&self.app_root, uri)?;
        if !root.is_dir() {
            return Err(Error::InvalidUri {
                uri: uri.to_string(),
                reason: format!("{} is not a directory", root.display()),
            });
        }
        if !root.join(REGISTRY_FILE).is_file() {
            return Err(Error::InvalidUri {
                uri: uri.to_string(),
                reason: format!("{} has no {}", root.display(), REGISTRY_FILE),
            });
        }
        Ok(())
    }

    fn set_uri(&mut self, uri: &str) -> Result<()> {
        self.validate_uri(uri)?;
        self.root = resolve_root(&self.app_root, uri)?;
        self.config.uri = uri.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::registry::StaticTransport;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        dirs: Vec<String>,
        files: Vec<(String, Vec<u8>)>,
    }

    impl ContentSink for RecordingSink {
        fn on_file(&mut self, path: &Path, contents: &[u8]) -> Result<()> {
            self.files
                .push((path.to_string_lossy().into_owned(), contents.to_vec()));
            Ok(())
        }

        fn on_directory(&mut self, path: &Path) -> Result<()> {
            self.dirs.push(path.to_string_lossy().into_owned());
            Ok(())
        }
    }

    fn write_registry(root: &Path) {
        std::fs::create_dir_all(root.join("apache/prototypes")).unwrap();
        std::fs::write(
            root.join(REGISTRY_FILE),
            "apiVersion: '0.1.0'\nkind: ksonnet.io/registry\nlibraries:\n  apache:\n    path: apache\n    version: master\n",
        )
        .unwrap();
        std::fs::write(
            root.join("apache").join(PARTS_FILE),
            "name: apache\ndescription: Apache web server\nversion: 0.1.0\n",
        )
        .unwrap();
        std::fs::write(root.join("apache/apache.libsonnet"), "{}").unwrap();
        std::fs::write(root.join("apache/prototypes/apache-simple.jsonnet"), "// @name x").unwrap();
    }

    fn fs_registry(app_root: &Path, uri: &str) -> FsRegistry {
        let ctx = RegistryContext {
            app_root: app_root.to_path_buf(),
            transport: Arc::new(StaticTransport::new()),
            settings: Settings::default(),
        };
        FsRegistry::new(RegistryConfig::new("local", Protocol::Fs, uri), &ctx).unwrap()
    }

    #[test]
    fn test_relative_uri_resolves_against_app_root() {
        let temp_dir = TempDir::new().unwrap();
        write_registry(&temp_dir.path().join("parts"));

        let registry = fs_registry(temp_dir.path(), "./parts");
        assert_eq!(registry.fetch_spec().unwrap().package_names(), vec!["apache"]);

        let absolute = format!("file://{}", temp_dir.path().join("parts").display());
        let registry = fs_registry(temp_dir.path(), &absolute);
        assert_eq!(registry.fetch_spec().unwrap().package_names(), vec!["apache"]);
    }

    #[test]
    fn test_metadata_and_version_hint() {
        let temp_dir = TempDir::new().unwrap();
        write_registry(temp_dir.path());
        let registry = fs_registry(temp_dir.path(), ".");

        let metadata = registry.resolve_package_metadata("apache", None).unwrap();
        assert_eq!(metadata.version, "0.1.0");
        assert_eq!(metadata.description, "Apache web server");

        assert!(registry.resolve_package_metadata("apache", Some("0.1.0")).is_ok());
        assert!(matches!(
            registry.resolve_package_metadata("apache", Some("9.9.9")),
            Err(Error::VersionNotFound { .. })
        ));
        assert!(matches!(
            registry.resolve_package_metadata("mysql", None),
            Err(Error::PackageNotFound { .. })
        ));
    }

    #[test]
    fn test_content_walk_is_relative_to_registry_root() {
        let temp_dir = TempDir::new().unwrap();
        write_registry(temp_dir.path());
        let registry = fs_registry(temp_dir.path(), ".");

        let mut sink = RecordingSink::default();
        let (_, lib) = registry
            .resolve_package_content("apache", "web", None, &mut sink)
            .unwrap();

        assert_eq!(lib.alias, "web");
        assert_eq!(lib.registry, "local");
        assert_eq!(sink.dirs, vec!["apache", "apache/prototypes"]);
        let files: Vec<&str> = sink.files.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(
            files,
            vec![
                "apache/apache.libsonnet",
                "apache/parts.yaml",
                "apache/prototypes/apache-simple.jsonnet"
            ]
        );
    }

    #[test]
    fn test_set_uri_validates_first() {
        let temp_dir = TempDir::new().unwrap();
        write_registry(&temp_dir.path().join("parts"));
        std::fs::create_dir_all(temp_dir.path().join("empty")).unwrap();

        let mut registry = fs_registry(temp_dir.path(), "./parts");
        let result = registry.set_uri("./empty");
        assert!(matches!(result, Err(Error::InvalidUri { .. })));
        assert_eq!(registry.uri(), "./parts");

        let result = registry.set_uri("./missing");
        assert!(matches!(result, Err(Error::InvalidUri { .. })));

        std::fs::create_dir_all(temp_dir.path().join("moved")).unwrap();
        write_registry(&temp_dir.path().join("moved"));
        registry.set_uri("./moved").unwrap();
        assert_eq!(registry.config().uri, "./moved");
    }
}
