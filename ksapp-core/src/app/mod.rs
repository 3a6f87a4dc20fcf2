//! App manifest access (`app.yaml` and `app.override.yaml`)
//!
//! The manifest records the app's registries, environments and installed
//! libraries. Libraries live in one global table and one table per
//! environment, each keyed by alias.
//!
//! ```text
//! <app root>/
//!     app.yaml            ← registries, environments, global libraries
//!     app.override.yaml   ← local-only registries/environments
//!     components/         ← component sources and params.yaml
//!     environments/<env>/ ← params.yaml overrides
//!     vendor/             ← installed package content
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fsutil;
use crate::registry::Protocol;

pub const APP_FILE: &str = "app.yaml";
pub const OVERRIDE_FILE: &str = "app.override.yaml";
pub const VENDOR_DIR: &str = "vendor";
pub const COMPONENTS_DIR: &str = "components";
pub const ENVIRONMENTS_DIR: &str = "environments";
pub const APP_API_VERSION: &str = "0.3.0";
pub const APP_KIND: &str = "ksonnet.io/app";

/// An installed dependency record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Package name inside its registry
    pub name: String,
    /// Registry the package came from
    pub registry: String,
    /// Resolved version (semver, commit SHA, or empty for unversioned packages)
    #[serde(default)]
    pub version: String,
    /// Key the record is stored under; filled from the table key on load
    #[serde(skip)]
    pub alias: String,
}

impl LibraryConfig {
    pub fn new(
        name: impl Into<String>,
        registry: impl Into<String>,
        version: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            registry: registry.into(),
            version: version.into(),
            alias: alias.into(),
        }
    }
}

/// A registry as recorded in the app manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(skip)]
    pub name: String,
    pub protocol: Protocol,
    pub uri: String,
    /// Stored in `app.override.yaml` instead of `app.yaml`
    #[serde(skip)]
    pub is_override: bool,
}

impl RegistryConfig {
    pub fn new(name: impl Into<String>, protocol: Protocol, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            protocol,
            uri: uri.into(),
            is_override: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub namespace: String,
}

/// An environment entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfig {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub destination: Destination,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub k8s_version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub libraries: BTreeMap<String, LibraryConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
    #[serde(skip)]
    pub is_override: bool,
}

/// Contents of `app.yaml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppManifest {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default)]
    pub registries: BTreeMap<String, RegistryConfig>,
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,
    #[serde(default)]
    pub libraries: BTreeMap<String, LibraryConfig>,
}

/// Contents of `app.override.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct OverrideManifest {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    registries: BTreeMap<String, RegistryConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    environments: BTreeMap<String, EnvironmentConfig>,
}

impl AppManifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            api_version: APP_API_VERSION.to_string(),
            kind: APP_KIND.to_string(),
            name: name.into(),
            version: "0.0.1".to_string(),
            registries: BTreeMap::new(),
            environments: BTreeMap::new(),
            libraries: BTreeMap::new(),
        }
    }

    /// Copy table keys into the records that mirror them
    fn fill_keys(&mut self) {
        for (name, registry) in self.registries.iter_mut() {
            registry.name = name.clone();
        }
        for (alias, lib) in self.libraries.iter_mut() {
            lib.alias = alias.clone();
        }
        for (name, env) in self.environments.iter_mut() {
            env.name = name.clone();
            for (alias, lib) in env.libraries.iter_mut() {
                lib.alias = alias.clone();
            }
        }
    }
}

/// A loaded app rooted at a directory containing `app.yaml`
#[derive(Debug, Clone)]
pub struct App {
    root: PathBuf,
    manifest: AppManifest,
}

impl App {
    /// Create a new app at `root`, writing an initial `app.yaml`
    pub fn init(root: &Path, name: &str) -> Result<Self> {
        let app = Self {
            root: root.to_path_buf(),
            manifest: AppManifest::new(name),
        };
        std::fs::create_dir_all(app.components_path()).map_err(|e| {
            Error::ManifestWriteFailed {
                path: app.components_path(),
                source: e,
            }
        })?;
        app.save()?;
        info!("Initialized app '{}' at {}", name, root.display());
        Ok(app)
    }

    /// Load the app rooted at `root`
    pub fn load(root: &Path) -> Result<Self> {
        let app_path = root.join(APP_FILE);
        let content = std::fs::read_to_string(&app_path).map_err(|e| Error::read(&app_path, e))?;
        let mut manifest: AppManifest =
            serde_yaml_ng::from_str(&content).map_err(|e| Error::parse(&app_path, e))?;

        let override_path = root.join(OVERRIDE_FILE);
        if let Some(content) =
            fsutil::read_optional(&override_path).map_err(|e| Error::read(&override_path, e))?
        {
            let overrides: OverrideManifest =
                serde_yaml_ng::from_str(&content).map_err(|e| Error::parse(&override_path, e))?;
            debug!(
                "Merging {} override registries and {} override environments",
                overrides.registries.len(),
                overrides.environments.len()
            );
            for (name, mut registry) in overrides.registries {
                registry.is_override = true;
                manifest.registries.insert(name, registry);
            }
            for (name, mut env) in overrides.environments {
                env.is_override = true;
                manifest.environments.insert(name, env);
            }
        }

        manifest.fill_keys();

        Ok(Self {
            root: root.to_path_buf(),
            manifest,
        })
    }

    /// Find the app containing `start` by walking up to the nearest `app.yaml`
    pub fn find(start: &Path) -> Result<Self> {
        let mut current = Some(start);
        while let Some(dir) = current {
            if dir.join(APP_FILE).is_file() {
                debug!("Found app root at {}", dir.display());
                return Self::load(dir);
            }
            current = dir.parent();
        }
        Err(Error::AppNotFound(start.to_path_buf()))
    }

    /// Persist `app.yaml` (and `app.override.yaml` when overrides exist)
    pub fn save(&self) -> Result<()> {
        let mut main = self.manifest.clone();
        main.registries.retain(|_, r| !r.is_override);
        main.environments.retain(|_, e| !e.is_override);

        let overrides = OverrideManifest {
            registries: self
                .manifest
                .registries
                .iter()
                .filter(|(_, r)| r.is_override)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            environments: self
                .manifest
                .environments
                .iter()
                .filter(|(_, e)| e.is_override)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        let app_path = self.root.join(APP_FILE);
        let content = serde_yaml_ng::to_string(&main)?;
        fsutil::write_atomic(&app_path, content.as_bytes()).map_err(|e| {
            Error::ManifestWriteFailed {
                path: app_path.clone(),
                source: e,
            }
        })?;

        let override_path = self.root.join(OVERRIDE_FILE);
        if overrides.registries.is_empty() && overrides.environments.is_empty() {
            if override_path.exists() {
                std::fs::remove_file(&override_path).map_err(|e| Error::ManifestWriteFailed {
                    path: override_path.clone(),
                    source: e,
                })?;
            }
        } else {
            let content = serde_yaml_ng::to_string(&overrides)?;
            fsutil::write_atomic(&override_path, content.as_bytes()).map_err(|e| {
                Error::ManifestWriteFailed {
                    path: override_path.clone(),
                    source: e,
                }
            })?;
        }

        debug!("Saved app manifest to {}", app_path.display());
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &AppManifest {
        &self.manifest
    }

    pub fn vendor_path(&self) -> PathBuf {
        self.root.join(VENDOR_DIR)
    }

    pub fn components_path(&self) -> PathBuf {
        self.root.join(COMPONENTS_DIR)
    }

    pub fn environments_path(&self) -> PathBuf {
        self.root.join(ENVIRONMENTS_DIR)
    }

    // === Environments ===

    pub fn environments(&self) -> &BTreeMap<String, EnvironmentConfig> {
        &self.manifest.environments
    }

    pub fn environment_names(&self) -> Vec<String> {
        self.manifest.environments.keys().cloned().collect()
    }

    pub fn environment(&self, name: &str) -> Option<&EnvironmentConfig> {
        self.manifest.environments.get(name)
    }

    /// Look up an environment, failing with the list of known ones
    pub fn require_environment(&self, name: &str) -> Result<&EnvironmentConfig> {
        self.environment(name)
            .ok_or_else(|| Error::UnknownEnvironment {
                name: name.to_string(),
                available: self.environment_names(),
            })
    }

    /// Add or replace an environment (in memory; call [`App::save`] to persist)
    pub fn add_environment(&mut self, name: &str, mut env: EnvironmentConfig) {
        env.name = name.to_string();
        for (alias, lib) in env.libraries.iter_mut() {
            lib.alias = alias.clone();
        }
        self.manifest.environments.insert(name.to_string(), env);
    }

    // === Registries ===

    pub fn registries(&self) -> &BTreeMap<String, RegistryConfig> {
        &self.manifest.registries
    }

    pub fn registry_names(&self) -> Vec<String> {
        self.manifest.registries.keys().cloned().collect()
    }

    /// Look up a registry, failing with the list of known ones
    pub fn registry(&self, name: &str) -> Result<&RegistryConfig> {
        self.manifest
            .registries
            .get(name)
            .ok_or_else(|| Error::UnknownRegistry {
                name: name.to_string(),
                available: self.registry_names(),
            })
    }

    /// Add or replace a registry config (in memory)
    pub fn upsert_registry(&mut self, config: RegistryConfig) {
        self.manifest
            .registries
            .insert(config.name.clone(), config);
    }

    // === Libraries ===

    /// Library table for a scope: global when `env` is `None`
    pub fn libraries(&self, env: Option<&str>) -> Result<&BTreeMap<String, LibraryConfig>> {
        match env {
            None => Ok(&self.manifest.libraries),
            Some(name) => Ok(&self.require_environment(name)?.libraries),
        }
    }

    fn libraries_mut(&mut self, env: Option<&str>) -> Result<&mut BTreeMap<String, LibraryConfig>> {
        match env {
            None => Ok(&mut self.manifest.libraries),
            Some(name) => {
                let available = self.environment_names();
                self.manifest
                    .environments
                    .get_mut(name)
                    .map(|e| &mut e.libraries)
                    .ok_or_else(|| Error::UnknownEnvironment {
                        name: name.to_string(),
                        available,
                    })
            }
        }
    }

    /// Write `lib` under its alias in the given scope, returning the record it replaced
    pub fn update_lib(
        &mut self,
        env: Option<&str>,
        lib: LibraryConfig,
    ) -> Result<Option<LibraryConfig>> {
        let table = self.libraries_mut(env)?;
        Ok(table.insert(lib.alias.clone(), lib))
    }

    /// Remove the record stored under `alias` in the given scope
    pub fn remove_lib(&mut self, env: Option<&str>, alias: &str) -> Result<Option<LibraryConfig>> {
        let table = self.libraries_mut(env)?;
        Ok(table.remove(alias))
    }

    /// Every library record across all scopes, paired with its environment name
    pub fn all_libraries(&self) -> impl Iterator<Item = (Option<&str>, &LibraryConfig)> {
        let global = self.manifest.libraries.values().map(|lib| (None, lib));
        let envs = self.manifest.environments.iter().flat_map(|(name, env)| {
            env.libraries
                .values()
                .map(move |lib| (Some(name.as_str()), lib))
        });
        global.chain(envs)
    }
}
