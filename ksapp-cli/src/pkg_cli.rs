//! Package CLI commands
//!
//! Installing and removing are two steps: the manifest is updated first,
//! then the vendor entry the old record pointed at is collected if nothing
//! references it any more.

use anyhow::{Context, Result};
use clap::Subcommand;
use tabled::Tabled;
use tracing::warn;

use ksapp_core::app::LibraryConfig;
use ksapp_core::{App, Descriptor, GarbageCollector, Installer, PackageId, PackageManager};

use crate::{print_table, Workspace};

#[derive(Subcommand, Debug)]
pub enum PkgCommand {
    /// Install a package (`[registry/]name[@version]`)
    Install {
        /// Package descriptor
        descriptor: String,

        /// Name to record the library under (defaults to the package name)
        #[clap(long)]
        name: Option<String>,

        /// Install into an environment instead of the global scope
        #[clap(long)]
        env: Option<String>,

        /// Re-vendor even if this version is already present
        #[clap(long)]
        force: bool,
    },

    /// List packages
    List {
        /// Include everything the registries offer
        #[clap(long)]
        remote: bool,

        /// Drop cached registry indexes first
        #[clap(long)]
        refresh: bool,

        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Remove an installed library
    Remove {
        /// Library name as recorded in the manifest
        name: String,

        /// Remove from an environment instead of the global scope
        #[clap(long)]
        env: Option<String>,
    },

    /// Show a package's metadata and prototypes
    Describe {
        /// Package descriptor
        descriptor: String,

        /// Output as JSON
        #[clap(long)]
        json: bool,
    },
}

impl PkgCommand {
    pub fn execute(self, workspace: &mut Workspace) -> Result<()> {
        let packages = workspace.packages()?;
        match self {
            PkgCommand::Install {
                descriptor,
                name,
                env,
                force,
            } => execute_install(
                &packages,
                &mut workspace.app,
                &descriptor,
                name.as_deref(),
                env.as_deref(),
                force,
            ),
            PkgCommand::List {
                remote,
                refresh,
                json,
            } => execute_list(&packages, &workspace.app, remote, refresh, json),
            PkgCommand::Remove { name, env } => {
                execute_remove(&packages, &mut workspace.app, &name, env.as_deref())
            }
            PkgCommand::Describe { descriptor, json } => {
                execute_describe(&packages, &descriptor, json)
            }
        }
    }
}

/// Collect the vendor entry of a superseded record
///
/// The manifest is already written, so a failed delete is only reported.
fn collect(packages: &PackageManager, app: &App, old: Option<LibraryConfig>) {
    let Some(old) = old else {
        return;
    };
    let id = PackageId::from(&old);
    if let Err(e) = GarbageCollector::new(packages.vendor()).remove_orphans(app, &id) {
        warn!("{:#}", e);
        eprintln!("Warning: {e}. Run `ksapp vendor sweep` to retry.");
    }
}

fn execute_install(
    packages: &PackageManager,
    app: &mut App,
    descriptor: &str,
    alias: Option<&str>,
    env: Option<&str>,
    force: bool,
) -> Result<()> {
    let descriptor = Descriptor::parse(descriptor)?;
    let previous = Installer::new(packages)
        .install(app, &descriptor, alias, env, force)
        .with_context(|| format!("Failed to install '{descriptor}'"))?;

    let alias = alias
        .filter(|a| !a.is_empty())
        .unwrap_or(descriptor.name.as_str());
    if let Some(lib) = app.libraries(env.filter(|e| !e.is_empty()))?.get(alias) {
        println!("Installed {} as '{}'", PackageId::from(lib), alias);
    }

    collect(packages, app, previous);
    Ok(())
}

fn execute_remove(
    packages: &PackageManager,
    app: &mut App,
    alias: &str,
    env: Option<&str>,
) -> Result<()> {
    let removed = Installer::new(packages)
        .uninstall(app, alias, env)
        .with_context(|| format!("Failed to remove '{alias}'"))?;

    match removed {
        Some(_) => println!("Removed '{alias}'"),
        None => println!("No library named '{alias}' is installed in that scope"),
    }
    collect(packages, app, removed);
    Ok(())
}

/// Table row for package listings
#[derive(Tabled)]
struct PackageRow {
    #[tabled(rename = "Registry")]
    registry: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Installed")]
    installed: String,
    #[tabled(rename = "Environments")]
    environments: String,
}

fn execute_list(
    packages: &PackageManager,
    app: &App,
    remote: bool,
    refresh: bool,
    json: bool,
) -> Result<()> {
    if refresh {
        for registry in packages.registries() {
            registry
                .refresh()
                .with_context(|| format!("Failed to refresh registry '{}'", registry.name()))?;
        }
    }

    let listed = if remote {
        packages.remote_packages(app)?
    } else {
        packages.packages(app)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&listed)?);
        return Ok(());
    }
    if listed.is_empty() {
        println!("No packages found.");
        return Ok(());
    }

    let rows: Vec<PackageRow> = listed
        .iter()
        .map(|p| PackageRow {
            registry: p.registry().to_string(),
            name: p.name().to_string(),
            version: p.version().to_string(),
            installed: if p.installed { "*" } else { "" }.to_string(),
            environments: packages.package_environments(app, &p.id).join(", "),
        })
        .collect();
    print_table(&rows);
    Ok(())
}

fn execute_describe(packages: &PackageManager, descriptor: &str, json: bool) -> Result<()> {
    let descriptor = Descriptor::parse(descriptor)?;
    let description = packages
        .describe(&descriptor)
        .with_context(|| format!("Failed to describe '{descriptor}'"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&description)?);
        return Ok(());
    }

    let metadata = &description.metadata;
    println!("LIBRARY NAME:\n{}\n", metadata.name);
    println!("REGISTRY:\n{}\n", description.registry);
    println!("VERSION:\n{}\n", metadata.version);
    println!("DESCRIPTION:\n{}\n", metadata.description);
    if !description.installed {
        println!("(not installed; prototypes are listed once it is)");
        return Ok(());
    }
    println!("PROTOTYPES:");
    for prototype in &description.prototypes {
        println!("  {}  {}", prototype.name, prototype.summary());
    }
    Ok(())
}
