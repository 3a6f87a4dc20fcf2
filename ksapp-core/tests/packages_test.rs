//! Integration tests for package listings, descriptions and prototype lookup

mod common;

use anyhow::Result;
use ksapp_core::prototype::SearchMode;
use ksapp_core::registry::{self, RegistryContext, StaticTransport};
use ksapp_core::{App, Descriptor, Error, Installer, PackageId};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_package_listings() -> Result<()> {
    common::init_test_logging();
    let temp_dir = TempDir::new()?;
    let mut app = common::app_with_fs_registry(temp_dir.path())?;
    let packages = common::fs_manager(&app)?;
    let installer = Installer::new(&packages);

    installer.install(&mut app, &Descriptor::parse("local/redis")?, None, None, false)?;
    installer.install(&mut app, &Descriptor::parse("local/redis")?, None, Some("prod"), false)?;

    let installed = packages.packages(&app)?;
    assert_eq!(installed.len(), 1);
    assert_eq!(installed[0].id, PackageId::new("local", "redis", "0.1.0"));
    assert!(installed[0].installed);

    let remote = packages.remote_packages(&app)?;
    let summary: Vec<(String, bool)> = remote
        .iter()
        .map(|p| (p.id.to_string(), p.installed))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("local/apache@0.1.0".to_string(), false),
            ("local/redis@0.1.0".to_string(), true),
        ]
    );

    let envs = packages.package_environments(&app, &PackageId::new("local", "redis", "0.1.0"));
    assert_eq!(envs, vec!["prod"]);
    Ok(())
}

#[test]
fn test_recorded_but_missing_package_is_not_installed() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut app = common::app_with_fs_registry(temp_dir.path())?;
    let packages = common::fs_manager(&app)?;

    Installer::new(&packages).install(&mut app, &Descriptor::parse("local/redis")?, None, None, false)?;
    std::fs::remove_dir_all(app.vendor_path())?;

    let listed = packages.packages(&app)?;
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].installed);

    // Its prototypes are skipped, the built-in ones remain
    let index = packages.prototype_index(&app)?;
    assert_eq!(index.len(), 4);
    Ok(())
}

#[test]
fn test_describe_package() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut app = common::app_with_fs_registry(temp_dir.path())?;
    common::write_prototype(&temp_dir.path().join("registry"), "redis", "io.ksonnet.pkg.redis-stateless")?;
    let packages = common::fs_manager(&app)?;

    let description = packages.describe(&Descriptor::parse("redis")?)?;
    assert_eq!(description.registry, "local");
    assert_eq!(description.metadata.description, "The redis package");
    assert!(!description.installed);
    assert!(description.prototypes.is_empty());

    Installer::new(&packages).install(&mut app, &Descriptor::parse("redis")?, None, None, false)?;
    let description = packages.describe(&Descriptor::parse("local/redis@0.1.0")?)?;
    assert!(description.installed);
    let names: Vec<&str> = description.prototypes.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["io.ksonnet.pkg.redis-stateless"]);
    Ok(())
}

#[test]
fn test_prototype_disambiguation() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut app = common::app_with_fs_registry(temp_dir.path())?;
    let registry_root = temp_dir.path().join("registry");
    common::write_prototype(&registry_root, "apache", "io.ksonnet.pkg.simple-deployed-service")?;
    common::write_prototype(&registry_root, "redis", "io.ksonnet.pkg.redis-persistent")?;
    common::write_prototype(&registry_root, "redis", "io.ksonnet.pkg.redis-stateless")?;

    let packages = common::fs_manager(&app)?;
    let installer = Installer::new(&packages);
    installer.install(&mut app, &Descriptor::parse("apache")?, None, None, false)?;
    installer.install(&mut app, &Descriptor::parse("redis")?, None, Some("prod"), false)?;

    let index = packages.prototype_index(&app)?;
    assert_eq!(index.len(), 7);

    // Suffix matching is on whole dotted segments
    let found = index.find_unique("deployed-service")?;
    assert_eq!(found.name, "io.ksonnet.pkg.deployed-service");
    assert_eq!(
        index.find_unique("simple-deployed-service")?.name,
        "io.ksonnet.pkg.simple-deployed-service"
    );

    match index.find_unique("deploy") {
        Err(Error::NoSuchPrototype { partial_matches, .. }) => {
            assert_eq!(
                partial_matches,
                vec![
                    "io.ksonnet.pkg.deployed-service",
                    "io.ksonnet.pkg.simple-deployed-service",
                    "io.ksonnet.pkg.single-port-deployment",
                ]
            );
        }
        other => panic!("expected NoSuchPrototype, got {other:?}"),
    }

    assert_eq!(index.search_names("redis", SearchMode::Substring).len(), 2);
    assert!(index.search_names("redis", SearchMode::Suffix).is_empty());
    Ok(())
}

#[test]
fn test_duplicate_prototype_names_are_fatal() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut app = common::app_with_fs_registry(temp_dir.path())?;
    common::write_prototype(&temp_dir.path().join("registry"), "redis", "io.ksonnet.pkg.namespace")?;

    let packages = common::fs_manager(&app)?;
    Installer::new(&packages).install(&mut app, &Descriptor::parse("redis")?, None, None, false)?;

    match packages.prototype_index(&app) {
        Err(Error::DuplicatePrototype(name)) => assert_eq!(name, "io.ksonnet.pkg.namespace"),
        other => panic!("expected DuplicatePrototype, got {:?}", other.map(|i| i.len())),
    }
    Ok(())
}

#[test]
fn test_update_registry_uri() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut app = common::app_with_fs_registry(temp_dir.path())?;
    common::write_fs_registry(&temp_dir.path().join("mirror"), &[("redis", "0.3.0")])?;
    let ctx = RegistryContext::new(&app, Arc::new(StaticTransport::new()), common::settings("local"));

    let err = registry::update_uri(&mut app, &ctx, "local", "./missing").unwrap_err();
    assert!(matches!(err, Error::InvalidUri { .. }));
    assert_eq!(app.registry("local")?.uri, "./registry");

    let updated = registry::update_uri(&mut app, &ctx, "local", "./mirror")?;
    assert_eq!(updated.uri, "./mirror");
    app.save()?;

    let reloaded = App::load(temp_dir.path())?;
    assert_eq!(reloaded.registry("local")?.uri, "./mirror");
    let packages = common::fs_manager(&reloaded)?;
    let (_, metadata) = packages.resolve(&Descriptor::parse("redis")?)?;
    assert_eq!(metadata.version, "0.3.0");

    assert!(matches!(
        registry::update_uri(&mut app, &ctx, "stable", "./mirror"),
        Err(Error::UnknownRegistry { .. })
    ));
    Ok(())
}

#[test]
fn test_add_registry() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut app = common::app_with_fs_registry(temp_dir.path())?;
    common::write_fs_registry(&temp_dir.path().join("mirror"), &[("mysql", "1.0.0")])?;
    let ctx = RegistryContext::new(&app, Arc::new(StaticTransport::new()), common::settings("local"));

    let err = registry::add(&mut app, &ctx, "mirror", "./missing", false).unwrap_err();
    assert!(matches!(err, Error::InvalidUri { .. }));
    assert!(app.registry("mirror").is_err());

    assert!(matches!(
        registry::add(&mut app, &ctx, "local", "./mirror", false),
        Err(Error::RegistryExists(name)) if name == "local"
    ));
    assert!(matches!(
        registry::add(&mut app, &ctx, "../mirror", "./mirror", false),
        Err(Error::Config(_))
    ));

    let mirror_url = format!("file://{}", temp_dir.path().join("mirror").display());
    let added = registry::add(&mut app, &ctx, "mirror", &mirror_url, true)?;
    assert_eq!(added.protocol, registry::Protocol::Fs);
    assert_eq!(added.uri, temp_dir.path().join("mirror").display().to_string());
    app.save()?;

    let reloaded = App::load(temp_dir.path())?;
    let mirror = reloaded.registry("mirror")?;
    assert!(mirror.is_override);
    assert_eq!(mirror.uri, added.uri);

    let packages = common::fs_manager(&reloaded)?;
    let (_, metadata) = packages.resolve(&Descriptor::parse("mirror/mysql")?)?;
    assert_eq!(metadata.version, "1.0.0");
    Ok(())
}
