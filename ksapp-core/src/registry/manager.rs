//! Package manager
//!
//! Joins the app's library records, its registries and the vendor cache
//! into package listings and prototype lookups.

use serde::Serialize;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{build, PackageMetadata, Registry, RegistryContext, Transport, VendorCache};
use crate::app::App;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::pkg::{Descriptor, Package, PackageId};
use crate::prototype::{self, Prototype};

/// Directory inside a package holding its prototypes
const PROTOTYPES_DIR: &str = "prototypes";

/// Everything known about one package
#[derive(Debug, Clone, Serialize)]
pub struct PackageDescription {
    pub registry: String,
    pub metadata: PackageMetadata,
    pub installed: bool,
    pub prototypes: Vec<Prototype>,
}

pub struct PackageManager {
    registries: BTreeMap<String, Arc<dyn Registry>>,
    vendor: VendorCache,
    default_registry: String,
}

impl PackageManager {
    /// Build registries for every config in the app manifest
    pub fn new(app: &App, transport: Arc<dyn Transport>, settings: &Settings) -> Result<Self> {
        let ctx = RegistryContext::new(app, transport, settings.clone());
        let mut registries: Vec<Arc<dyn Registry>> = Vec::new();
        for config in app.registries().values() {
            registries.push(Arc::from(build(config, &ctx)?));
        }

        Ok(Self::with_registries(
            registries,
            VendorCache::new(app.vendor_path()),
            &settings.default_registry,
        ))
    }

    /// Assemble a manager from already-built registries
    pub fn with_registries(
        registries: impl IntoIterator<Item = Arc<dyn Registry>>,
        vendor: VendorCache,
        default_registry: &str,
    ) -> Self {
        let registries = registries
            .into_iter()
            .map(|r| (r.name().to_string(), r))
            .collect();
        Self {
            registries,
            vendor,
            default_registry: default_registry.to_string(),
        }
    }

    pub fn default_registry(&self) -> &str {
        &self.default_registry
    }

    pub fn vendor(&self) -> &VendorCache {
        &self.vendor
    }

    pub fn registry_names(&self) -> Vec<String> {
        self.registries.keys().cloned().collect()
    }

    pub fn registries(&self) -> impl Iterator<Item = &Arc<dyn Registry>> {
        self.registries.values()
    }

    /// Look up a registry by name
    pub fn registry(&self, name: &str) -> Result<Arc<dyn Registry>> {
        self.registries
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownRegistry {
                name: name.to_string(),
                available: self.registry_names(),
            })
    }

    pub fn is_installed(&self, id: &PackageId) -> bool {
        self.vendor.contains(id)
    }

    /// Every package referenced by a library record in any scope
    pub fn packages(&self, app: &App) -> Result<Vec<Package>> {
        let mut seen: BTreeMap<PackageId, Package> = BTreeMap::new();
        for (_, lib) in app.all_libraries() {
            let id = PackageId::from(lib);
            if seen.contains_key(&id) {
                continue;
            }
            let installed = self.is_installed(&id);
            seen.insert(
                id.clone(),
                Package {
                    id,
                    installed,
                    description: None,
                },
            );
        }
        Ok(seen.into_values().collect())
    }

    /// Installed packages plus everything each registry offers
    ///
    /// A registry listing never replaces an installed entry with the same
    /// identity. Any registry failure fails the whole listing.
    pub fn remote_packages(&self, app: &App) -> Result<Vec<Package>> {
        let mut merged: BTreeMap<PackageId, Package> = self
            .packages(app)?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        for registry in self.registries.values() {
            let spec = registry.fetch_spec()?;
            debug!(
                registry = registry.name(),
                "Registry lists {} packages",
                spec.libraries.len()
            );
            for (name, lib) in spec.libraries {
                let id = PackageId::new(registry.name(), name, lib.version);
                merged.entry(id.clone()).or_insert(Package {
                    id,
                    installed: false,
                    description: None,
                });
            }
        }

        Ok(merged.into_values().collect())
    }

    /// Names of environments whose library records reference `id`
    ///
    /// Order is unspecified.
    pub fn package_environments(&self, app: &App, id: &PackageId) -> Vec<String> {
        app.environments()
            .iter()
            .filter(|(_, env)| env.libraries.values().any(|lib| PackageId::from(lib) == *id))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// System prototypes followed by those of every installed package
    pub fn prototypes(&self, app: &App) -> Result<Vec<Prototype>> {
        let mut prototypes = prototype::system::prototypes()?;
        for package in self.packages(app)? {
            if !package.installed {
                warn!("{} is recorded but not vendored; skipping its prototypes", package.id);
                continue;
            }
            prototypes.extend(self.package_prototypes(&package.id)?);
        }
        Ok(prototypes)
    }

    /// Index over [`PackageManager::prototypes`]
    pub fn prototype_index(&self, app: &App) -> Result<prototype::Index> {
        prototype::Index::new(self.prototypes(app)?)
    }

    /// Prototypes shipped in a vendored package
    pub fn package_prototypes(&self, id: &PackageId) -> Result<Vec<Prototype>> {
        let dir = self.vendor.entry_path(id)?.join(PROTOTYPES_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut prototypes = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Read {
                path: dir.clone(),
                source: e.into(),
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension() != Some(OsStr::new("jsonnet")) {
                continue;
            }
            let source = std::fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
            prototypes.push(Prototype::parse(&source_name(id, path), &source)?);
        }
        Ok(prototypes)
    }

    /// Resolve a descriptor against its registry without installing anything
    pub fn resolve(&self, descriptor: &Descriptor) -> Result<(Arc<dyn Registry>, PackageMetadata)> {
        let registry = self.registry(descriptor.registry_or(&self.default_registry))?;
        let metadata =
            registry.resolve_package_metadata(&descriptor.name, descriptor.version.as_deref())?;
        Ok((registry, metadata))
    }

    /// Metadata and prototypes for one package
    pub fn describe(&self, descriptor: &Descriptor) -> Result<PackageDescription> {
        let (registry, metadata) = self.resolve(descriptor)?;
        let id = PackageId::new(registry.name(), &metadata.name, &metadata.version);
        let installed = self.is_installed(&id);
        let prototypes = if installed {
            self.package_prototypes(&id)?
        } else {
            Vec::new()
        };

        Ok(PackageDescription {
            registry: registry.name().to_string(),
            metadata,
            installed,
            prototypes,
        })
    }
}

fn source_name(id: &PackageId, path: &Path) -> String {
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{id}/{file}")
}
