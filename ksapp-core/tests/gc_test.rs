//! Integration tests for vendor cache garbage collection

mod common;

use anyhow::Result;
use ksapp_core::{App, Descriptor, GarbageCollector, Installer, PackageId};
use pretty_assertions::assert_eq;
use std::fs;
use tempfile::TempDir;

/// Install `descriptor` into `env` and collect whatever it superseded
fn install_and_collect(
    installer: &Installer,
    gc: &GarbageCollector,
    app: &mut App,
    descriptor: &str,
    env: &str,
) -> Result<bool> {
    let previous = installer.install(app, &Descriptor::parse(descriptor)?, None, Some(env), false)?;
    match previous {
        Some(old) => Ok(gc.remove_orphans(app, &PackageId::from(&old))?),
        None => Ok(false),
    }
}

#[test]
fn test_shared_entry_survives_until_last_reference_moves() -> Result<()> {
    common::init_test_logging();
    let temp_dir = TempDir::new()?;
    let mut app = common::app_with_fs_registry(temp_dir.path())?;
    let registry_root = temp_dir.path().join("registry");

    let packages = common::fs_manager(&app)?;
    let installer = Installer::new(&packages);
    let gc = GarbageCollector::new(packages.vendor());

    install_and_collect(&installer, &gc, &mut app, "local/redis", "default")?;
    install_and_collect(&installer, &gc, &mut app, "local/redis", "prod")?;
    let v1 = PackageId::new("local", "redis", "0.1.0");
    assert!(packages.is_installed(&v1));

    common::write_package(&registry_root, "redis", "0.2.0")?;
    let v2 = PackageId::new("local", "redis", "0.2.0");

    let collected = install_and_collect(&installer, &gc, &mut app, "local/redis", "default")?;
    assert!(!collected, "prod still references 0.1.0");
    assert!(packages.is_installed(&v1));
    assert!(packages.is_installed(&v2));

    let collected = install_and_collect(&installer, &gc, &mut app, "local/redis", "prod")?;
    assert!(collected);
    assert!(!packages.is_installed(&v1));
    assert!(packages.is_installed(&v2));
    Ok(())
}

#[test]
fn test_remove_orphans_respects_global_scope() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut app = common::app_with_fs_registry(temp_dir.path())?;
    let packages = common::fs_manager(&app)?;
    let installer = Installer::new(&packages);
    let gc = GarbageCollector::new(packages.vendor());

    let redis = Descriptor::parse("local/redis")?;
    installer.install(&mut app, &redis, None, None, false)?;
    installer.install(&mut app, &redis, None, Some("prod"), false)?;

    let removed = installer
        .uninstall(&mut app, "redis", Some("prod"))?
        .expect("prod record");
    let id = PackageId::from(&removed);
    assert!(!gc.remove_orphans(&app, &id)?);
    assert!(packages.is_installed(&id));

    let removed = installer.uninstall(&mut app, "redis", None)?.expect("global record");
    assert!(gc.remove_orphans(&app, &PackageId::from(&removed))?);
    assert!(!packages.is_installed(&id));
    assert!(!app.vendor_path().join("local").exists());
    Ok(())
}

#[test]
fn test_remove_orphans_is_idempotent() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let app = common::app_with_fs_registry(temp_dir.path())?;
    let packages = common::fs_manager(&app)?;
    let gc = GarbageCollector::new(packages.vendor());

    let missing = PackageId::new("local", "redis", "0.0.1");
    assert!(!gc.remove_orphans(&app, &missing)?);
    assert!(!gc.remove_orphans(&app, &missing)?);
    Ok(())
}

#[test]
fn test_sweep_removes_only_unreferenced_entries() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut app = common::app_with_fs_registry(temp_dir.path())?;
    let packages = common::fs_manager(&app)?;
    let installer = Installer::new(&packages);
    let gc = GarbageCollector::new(packages.vendor());

    installer.install(&mut app, &Descriptor::parse("local/redis")?, None, None, false)?;
    installer.install(&mut app, &Descriptor::parse("local/apache")?, None, Some("prod"), false)?;

    // Leftovers from an interrupted install and a removed record
    let stale = app.vendor_path().join("local").join("redis@0.0.9");
    fs::create_dir_all(&stale)?;
    fs::write(stale.join("parts.yaml"), "name: redis\n")?;
    installer.uninstall(&mut app, "apache", Some("prod"))?;

    let removed = gc.sweep(&app)?;
    assert_eq!(
        removed,
        vec![
            PackageId::new("local", "apache", "0.1.0"),
            PackageId::new("local", "redis", "0.0.9"),
        ]
    );
    assert!(packages.is_installed(&PackageId::new("local", "redis", "0.1.0")));

    assert!(gc.sweep(&app)?.is_empty());
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_failed_delete_keeps_the_new_record() -> Result<()> {
    use ksapp_core::Error;
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new()?;
    let mut app = common::app_with_fs_registry(temp_dir.path())?;
    let packages = common::fs_manager(&app)?;
    let installer = Installer::new(&packages);
    let gc = GarbageCollector::new(packages.vendor());

    let redis = Descriptor::parse("local/redis")?;
    installer.install(&mut app, &redis, None, None, false)?;
    common::write_package(&temp_dir.path().join("registry"), "redis", "0.2.0")?;
    let old = installer
        .install(&mut app, &redis, None, None, false)?
        .expect("0.1.0 record");

    let registry_dir = app.vendor_path().join("local");
    fs::set_permissions(&registry_dir, fs::Permissions::from_mode(0o555))?;

    // Privileged users ignore directory permissions
    let writable = fs::write(registry_dir.join(".check"), "").is_ok();
    let result = gc.remove_orphans(&app, &PackageId::from(&old));
    fs::set_permissions(&registry_dir, fs::Permissions::from_mode(0o755))?;
    if writable {
        return Ok(());
    }

    assert!(matches!(result, Err(Error::GcDeleteFailed { .. })));

    let reloaded = App::load(temp_dir.path())?;
    let redis = reloaded
        .all_libraries()
        .find(|(_, lib)| lib.name == "redis")
        .map(|(_, lib)| lib.version.clone());
    assert_eq!(redis.as_deref(), Some("0.2.0"));
    Ok(())
}

#[test]
fn test_versions_with_separators_install_and_survive_sweep() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut app = common::app_with_fs_registry(temp_dir.path())?;
    common::write_package(&temp_dir.path().join("registry"), "redis", "release/1.0")?;
    let packages = common::fs_manager(&app)?;
    let installer = Installer::new(&packages);
    let gc = GarbageCollector::new(packages.vendor());

    installer.install(&mut app, &Descriptor::parse("local/redis")?, None, None, false)?;
    let id = PackageId::new("local", "redis", "release/1.0");
    assert!(packages.is_installed(&id));
    assert!(app.vendor_path().join("local").join("redis@release%2F1.0").is_dir());

    assert!(gc.sweep(&app)?.is_empty());
    assert!(packages.is_installed(&id));
    Ok(())
}

#[test]
fn test_package_names_cannot_leave_the_vendor_directory() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut app = common::app_with_fs_registry(temp_dir.path())?;
    let registry_root = temp_dir.path().join("registry");
    fs::write(
        registry_root.join("redis").join("parts.yaml"),
        "name: ../../escaped\nversion: 0.1.0\n",
    )?;
    let packages = common::fs_manager(&app)?;
    let installer = Installer::new(&packages);

    let result = installer.install(&mut app, &Descriptor::parse("local/redis")?, None, None, false);
    assert!(result.is_err());
    assert!(!temp_dir.path().join("escaped").exists());
    assert!(app.all_libraries().next().is_none());
    Ok(())
}
