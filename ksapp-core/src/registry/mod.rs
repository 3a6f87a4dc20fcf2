//! Package registries
//!
//! A registry is a named source of packages. Three protocols are supported:
//!
//! ```text
//! github   github.com/<org>/<repo>/tree/<ref>/<path>   ← registry.yaml + package dirs
//! fs       ./local/dir or file:///abs/dir              ← registry.yaml + package dirs
//! helm     https://charts.example.com                  ← index.yaml + chart tarballs
//! ```
//!
//! Callers only ever hold a `dyn Registry`; protocol types stay private to
//! their modules and are built by [`build`].

mod fs;
mod github;
mod helm;
mod index;
mod transport;

pub mod cache;
pub mod gc;
pub mod manager;
pub mod vendor;

pub use cache::Installer;
pub use gc::GarbageCollector;
pub use index::{ChartIndex, ChartVersion};
pub use manager::{PackageDescription, PackageManager};
pub use transport::{HttpTransport, StaticTransport, Transport, TransportError};
pub use vendor::VendorCache;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use crate::app::{App, LibraryConfig, RegistryConfig};
use crate::config::Settings;
use crate::error::{Error, Result};

/// File describing a github or fs registry
pub const REGISTRY_FILE: &str = "registry.yaml";

/// File describing a package inside a github or fs registry
pub const PARTS_FILE: &str = "parts.yaml";

/// App-local cache root for registry metadata
pub const REGISTRY_CACHE_DIR: &str = ".ksonnet/registries";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Github,
    Fs,
    Helm,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Github => "github",
            Protocol::Fs => "fs",
            Protocol::Helm => "helm",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "github" => Ok(Protocol::Github),
            "fs" => Ok(Protocol::Fs),
            "helm" => Ok(Protocol::Helm),
            other => Err(Error::Config(format!(
                "unknown registry protocol '{other}' (expected github, fs or helm)"
            ))),
        }
    }
}

/// A registry's own descriptor (`registry.yaml`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySpec {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub libraries: BTreeMap<String, LibraryRef>,
}

/// A package listed in a registry descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryRef {
    #[serde(default)]
    pub version: String,
    /// Package directory relative to the registry root
    #[serde(default)]
    pub path: String,
}

impl RegistrySpec {
    pub fn new() -> Self {
        Self {
            api_version: "0.1.0".to_string(),
            kind: "ksonnet.io/registry".to_string(),
            libraries: BTreeMap::new(),
        }
    }

    pub fn from_yaml(source: &Path, content: &str) -> Result<Self> {
        serde_yaml_ng::from_str(content).map_err(|e| Error::parse(source, e))
    }

    pub fn package_names(&self) -> Vec<String> {
        self.libraries.keys().cloned().collect()
    }

    /// Directory of a listed package, falling back to its name
    pub fn package_dir<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        self.libraries.get(name).map(|lib| {
            if lib.path.is_empty() {
                name
            } else {
                lib.path.as_str()
            }
        })
    }
}

impl Default for RegistrySpec {
    fn default() -> Self {
        Self::new()
    }
}

/// Package metadata (`parts.yaml`) plus the resolved version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Resolved version: semver for charts, commit SHA for github, free-form for fs
    #[serde(default)]
    pub version: String,
}

/// Receives package content as a registry walks it.
///
/// Paths are relative to the registry root and start with the package
/// directory.
pub trait ContentSink {
    fn on_file(&mut self, path: &Path, contents: &[u8]) -> Result<()>;
    fn on_directory(&mut self, path: &Path) -> Result<()>;
}

/// A source of packages
pub trait Registry: Send + Sync {
    fn name(&self) -> &str;

    fn protocol(&self) -> Protocol;

    fn uri(&self) -> &str;

    /// The config this registry was built from
    fn config(&self) -> &RegistryConfig;

    /// Fetch the registry descriptor, listing every package it offers
    fn fetch_spec(&self) -> Result<RegistrySpec>;

    /// Resolve a package's metadata, pinning `version_hint` to a concrete version
    fn resolve_package_metadata(
        &self,
        name: &str,
        version_hint: Option<&str>,
    ) -> Result<PackageMetadata>;

    /// Stream a package's content into `sink`
    fn resolve_package_content(
        &self,
        name: &str,
        alias: &str,
        version_hint: Option<&str>,
        sink: &mut dyn ContentSink,
    ) -> Result<(PackageMetadata, LibraryConfig)>;

    /// Check that `uri` points at a usable registry of this protocol
    fn validate_uri(&self, uri: &str) -> Result<()>;

    /// Validate `uri` and switch this registry to it
    fn set_uri(&mut self, uri: &str) -> Result<()>;

    /// Drop cached metadata so the next lookup refetches it
    fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared dependencies handed to every registry at construction
#[derive(Clone)]
pub struct RegistryContext {
    pub app_root: PathBuf,
    pub transport: Arc<dyn Transport>,
    pub settings: Settings,
}

impl RegistryContext {
    pub fn new(app: &App, transport: Arc<dyn Transport>, settings: Settings) -> Self {
        Self {
            app_root: app.root().to_path_buf(),
            transport,
            settings,
        }
    }

    /// App-local cache directory for one registry
    pub fn cache_dir(&self, registry: &str) -> PathBuf {
        self.app_root.join(REGISTRY_CACHE_DIR).join(registry)
    }
}

/// Build the registry implementation for a config entry
pub fn build(config: &RegistryConfig, ctx: &RegistryContext) -> Result<Box<dyn Registry>> {
    tracing::debug!(
        registry = %config.name,
        protocol = %config.protocol,
        uri = %config.uri,
        "Building registry"
    );
    let registry: Box<dyn Registry> = match config.protocol {
        Protocol::Fs => Box::new(fs::FsRegistry::new(config.clone(), ctx)?),
        Protocol::Github => Box::new(github::GithubRegistry::new(config.clone(), ctx)?),
        Protocol::Helm => Box::new(helm::HelmRegistry::new(config.clone(), ctx)?),
    };
    Ok(registry)
}

/// Point registry `name` at `uri` once the protocol accepts it
///
/// Only the in-memory manifest changes; call [`App::save`] to persist.
pub fn update_uri(
    app: &mut App,
    ctx: &RegistryContext,
    name: &str,
    uri: &str,
) -> Result<RegistryConfig> {
    let mut registry = build(app.registry(name)?, ctx)?;
    registry.set_uri(uri)?;

    let updated = registry.config().clone();
    app.upsert_registry(updated.clone());
    tracing::info!(registry = name, "Registry URI set to {}", uri);
    Ok(updated)
}

/// Guess the protocol a registry URI speaks
///
/// Hosts named `github.*` are github registries with or without a scheme.
/// Other `http(s)` URLs are chart repositories. Anything else is a local
/// path, returned without its `file://` prefix.
pub fn infer_protocol(uri: &str) -> (Protocol, String) {
    let without_scheme = uri
        .strip_prefix("https://")
        .or_else(|| uri.strip_prefix("http://"));
    let host = without_scheme.unwrap_or(uri).split('/').next().unwrap_or("");
    if host.starts_with("github.") {
        return (Protocol::Github, uri.to_string());
    }
    if without_scheme.is_some() {
        return (Protocol::Helm, uri.to_string());
    }
    let path = uri.strip_prefix("file://").unwrap_or(uri);
    (Protocol::Fs, path.to_string())
}

/// Register a new registry `name` at `uri` once its protocol accepts it
///
/// Only the in-memory manifest changes; call [`App::save`] to persist.
pub fn add(
    app: &mut App,
    ctx: &RegistryContext,
    name: &str,
    uri: &str,
    is_override: bool,
) -> Result<RegistryConfig> {
    if !crate::pkg::is_valid_name(name) {
        return Err(Error::Config(format!(
            "invalid registry name '{name}': use letters, digits, '.', '-' and '_'"
        )));
    }
    if app.registry(name).is_ok() {
        return Err(Error::RegistryExists(name.to_string()));
    }

    let (protocol, uri) = infer_protocol(uri);
    let mut config = RegistryConfig::new(name, protocol, uri.clone());
    config.is_override = is_override;
    build(&config, ctx)?.validate_uri(&uri)?;

    app.upsert_registry(config.clone());
    tracing::info!(registry = name, protocol = %protocol, "Added registry at {}", uri);
    Ok(config)
}

/// Build a library record for a resolved package
pub(crate) fn library_for(registry: &str, metadata: &PackageMetadata, alias: &str) -> LibraryConfig {
    let alias = if alias.is_empty() {
        metadata.name.as_str()
    } else {
        alias
    };
    LibraryConfig::new(&metadata.name, registry, &metadata.version, alias)
}
