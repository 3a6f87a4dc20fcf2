//! Test helper functions for integration tests
//!
//! Shared across the test files using the tests/common/ pattern. Not every
//! test binary uses every helper.
#![allow(dead_code)]

use anyhow::Result;
use ksapp_core::app::{EnvironmentConfig, RegistryConfig};
use ksapp_core::registry::{Protocol, StaticTransport, Transport};
use ksapp_core::{App, PackageManager, Settings};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Once};

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Registry name used by the filesystem fixtures
pub const FS_REGISTRY: &str = "local";

/// Write a filesystem registry at `root` offering each `(name, version)`
pub fn write_fs_registry(root: &Path, packages: &[(&str, &str)]) -> Result<()> {
    fs::create_dir_all(root)?;

    let mut spec = String::from("apiVersion: '0.1.0'\nkind: ksonnet.io/registry\nlibraries:\n");
    for (name, version) in packages {
        spec.push_str(&format!("  {name}:\n    path: {name}\n    version: {version}\n"));
        write_package(root, name, version)?;
    }
    fs::write(root.join("registry.yaml"), spec)?;
    Ok(())
}

/// Write (or rewrite) one package of a filesystem registry
pub fn write_package(root: &Path, name: &str, version: &str) -> Result<()> {
    let dir = root.join(name);
    fs::create_dir_all(dir.join("prototypes"))?;
    fs::write(
        dir.join("parts.yaml"),
        format!("name: {name}\ndescription: The {name} package\nversion: {version}\n"),
    )?;
    fs::write(dir.join(format!("{name}.libsonnet")), "{}\n")?;
    Ok(())
}

/// Add a prototype file to a package of a filesystem registry
pub fn write_prototype(root: &Path, package: &str, prototype: &str) -> Result<()> {
    let short = prototype.rsplit('.').next().unwrap_or(prototype);
    fs::write(
        root.join(package).join("prototypes").join(format!("{short}.jsonnet")),
        format!(
            "// @apiVersion 0.1.0\n// @name {prototype}\n// @description {short} from {package}\n// @param name string Name of the component\n{{}}\n"
        ),
    )?;
    Ok(())
}

/// An app at `dir` with environments `default` and `prod` and a filesystem
/// registry `local` at `<dir>/registry` offering redis and apache 0.1.0
pub fn app_with_fs_registry(dir: &Path) -> Result<App> {
    write_fs_registry(&dir.join("registry"), &[("apache", "0.1.0"), ("redis", "0.1.0")])?;

    let mut app = App::init(dir, "testapp")?;
    app.upsert_registry(RegistryConfig::new(FS_REGISTRY, Protocol::Fs, "./registry"));
    app.add_environment("default", EnvironmentConfig::default());
    app.add_environment("prod", EnvironmentConfig::default());
    app.save()?;
    Ok(app)
}

/// Settings whose default registry is `default_registry`
pub fn settings(default_registry: &str) -> Settings {
    let mut settings = Settings::default();
    settings.default_registry = default_registry.to_string();
    settings
}

/// A package manager for an app that only uses filesystem registries
pub fn fs_manager(app: &App) -> Result<PackageManager> {
    let transport: Arc<dyn Transport> = Arc::new(StaticTransport::new());
    Ok(PackageManager::new(app, transport, &settings(FS_REGISTRY))?)
}
