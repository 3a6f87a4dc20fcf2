//! Dependency install flow
//!
//! Installing resolves a descriptor, vendors the package content unless
//! the exact identity is already present, and records the library in the
//! global or environment scope. The record it replaces is handed back to
//! the caller, which passes it to the [`GarbageCollector`](super::GarbageCollector).
//! Installing never deletes anything.

use tracing::{debug, info};

use super::PackageManager;
use crate::app::{App, LibraryConfig};
use crate::error::Result;
use crate::pkg::{Descriptor, PackageId};

pub struct Installer<'a> {
    packages: &'a PackageManager,
}

impl<'a> Installer<'a> {
    pub fn new(packages: &'a PackageManager) -> Self {
        Self { packages }
    }

    /// Install `descriptor` under `alias` in the global scope or `environment`
    ///
    /// Returns the record previously stored under `alias` in that scope.
    /// Re-installing the same identity without `force` rewrites an identical
    /// record and returns it as the previous one.
    pub fn install(
        &self,
        app: &mut App,
        descriptor: &Descriptor,
        alias: Option<&str>,
        environment: Option<&str>,
        force: bool,
    ) -> Result<Option<LibraryConfig>> {
        let registry_name = descriptor.registry_or(self.packages.default_registry());
        let registry = self.packages.registry(registry_name)?;
        let alias = alias
            .filter(|a| !a.is_empty())
            .unwrap_or(descriptor.name.as_str());
        let environment = environment.filter(|e| !e.is_empty());

        if let Some(env) = environment {
            app.require_environment(env)?;
        }

        let metadata =
            registry.resolve_package_metadata(&descriptor.name, descriptor.version.as_deref())?;
        let id = PackageId::new(registry.name(), &metadata.name, &metadata.version);
        self.packages.vendor().entry_path(&id)?;

        let lib = if force || !self.packages.is_installed(&id) {
            info!(
                registry = registry.name(),
                package = %metadata.name,
                version = %metadata.version,
                "Vendoring {}",
                id
            );
            let version = Some(metadata.version.as_str()).filter(|v| !v.is_empty());
            let (_, lib) = self.packages.vendor().materialize(&id, |sink| {
                registry.resolve_package_content(&descriptor.name, alias, version, sink)
            })?;
            lib
        } else {
            debug!("{} is already vendored", id);
            LibraryConfig::new(&metadata.name, registry.name(), &metadata.version, alias)
        };

        let previous = app.update_lib(environment, lib)?;
        app.save()?;

        match environment {
            Some(env) => info!("Installed {} as '{}' in environment '{}'", id, alias, env),
            None => info!("Installed {} as '{}'", id, alias),
        }
        Ok(previous)
    }

    /// Remove the record stored under `alias`, returning it for collection
    pub fn uninstall(
        &self,
        app: &mut App,
        alias: &str,
        environment: Option<&str>,
    ) -> Result<Option<LibraryConfig>> {
        let removed = app.remove_lib(environment, alias)?;
        if removed.is_some() {
            app.save()?;
            info!("Removed library '{}'", alias);
        } else {
            debug!("No library '{}' to remove", alias);
        }
        Ok(removed)
    }
}
