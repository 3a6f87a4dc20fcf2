//! ksapp - package registries, vendored libraries and parameter overlays
//! for ksonnet-style apps

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use ksapp_core::registry::{self, HttpTransport, RegistryContext, Transport};
use ksapp_core::{App, GarbageCollector, PackageManager, ParamStore, Settings};

mod param_cli;
mod pkg_cli;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "ksapp",
    about = "Manage registries, vendored packages and parameters of a ksonnet app",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Override the settings file path
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Directory inside the app (defaults to the current directory)
    #[clap(long, global = true)]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install, list, describe and remove packages
    Pkg {
        #[clap(subcommand)]
        command: pkg_cli::PkgCommand,
    },

    /// Inspect and update registries
    Registry {
        #[clap(subcommand)]
        command: RegistryCommand,
    },

    /// Set, unset and show component parameters
    Param {
        #[clap(subcommand)]
        command: param_cli::ParamCommand,
    },

    /// Manage components
    Component {
        #[clap(subcommand)]
        command: ComponentCommand,
    },

    /// Browse the prototypes available to the app
    Prototype {
        #[clap(subcommand)]
        command: PrototypeCommand,
    },

    /// Maintain the vendor directory
    Vendor {
        #[clap(subcommand)]
        command: VendorCommand,
    },
}

#[derive(Subcommand, Debug)]
enum RegistryCommand {
    /// List configured registries
    List {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Add a registry; the protocol is inferred from the URI
    Add {
        /// Registry name
        name: String,
        /// github.com/<org>/<repo>/tree/<ref>/<path>, a chart repository URL or a local path
        uri: String,
        /// Store the registry in app.override.yaml
        #[clap(long = "override")]
        is_override: bool,
    },

    /// Point a registry at a new URI
    SetUri {
        /// Registry name
        name: String,
        /// New URI (validated before it is saved)
        uri: String,
    },
}

#[derive(Subcommand, Debug)]
enum ComponentCommand {
    /// List components
    List,

    /// Delete a component and every parameter that refers to it
    Rm {
        /// Component name, as `[module.]name`
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum PrototypeCommand {
    /// List system prototypes and those of installed packages
    List {
        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Show a prototype's parameters and template
    Describe {
        /// Full name or dotted suffix, e.g. `deployed-service`
        query: String,
    },

    /// Generate a component from a prototype
    Use {
        /// Full name or dotted suffix, e.g. `deployed-service`
        query: String,
        /// Component name, as `[module.]name`
        component: String,
        /// Prototype parameter as `name=value` (repeatable)
        #[clap(long = "param", short = 'p', value_parser = parse_param_pair)]
        params: Vec<(String, String)>,
    },
}

fn parse_param_pair(input: &str) -> std::result::Result<(String, String), String> {
    match input.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{input}'")),
    }
}

#[derive(Subcommand, Debug)]
enum VendorCommand {
    /// Delete vendored packages no scope references
    Sweep,
}

/// The app being operated on plus user settings
pub(crate) struct Workspace {
    pub app: App,
    pub settings: Settings,
}

impl Workspace {
    fn load(config: Option<&Path>, dir: Option<&Path>) -> Result<Self> {
        let settings = Settings::load(config).context("Failed to load settings")?;
        let start = match dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().context("Failed to read current directory")?,
        };
        let app = App::find(&start)?;
        debug!("Using app at {}", app.root().display());
        Ok(Self { app, settings })
    }

    pub fn transport(&self) -> Result<Arc<dyn Transport>> {
        let transport = HttpTransport::new(&self.settings.http)
            .context("Failed to build HTTP client")?;
        Ok(Arc::new(transport))
    }

    pub fn packages(&self) -> Result<PackageManager> {
        PackageManager::new(&self.app, self.transport()?, &self.settings)
            .context("Failed to load registries")
    }
}

fn initialize_tracing(log_level: &LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_filter_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level);

    let mut workspace = Workspace::load(cli.config.as_deref(), cli.dir.as_deref())?;

    match cli.command {
        Command::Pkg { command } => command.execute(&mut workspace),
        Command::Registry { command } => execute_registry(command, &mut workspace),
        Command::Param { command } => command.execute(&workspace),
        Command::Component { command } => execute_component(command, &workspace),
        Command::Prototype { command } => execute_prototype(command, &workspace),
        Command::Vendor { command } => execute_vendor(command, &workspace),
    }
}

pub(crate) fn print_table<T: Tabled>(rows: &[T]) {
    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");
}

/// Table row for configured registries
#[derive(Tabled)]
struct RegistryRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Protocol")]
    protocol: String,
    #[tabled(rename = "URI")]
    uri: String,
    #[tabled(rename = "Override")]
    is_override: String,
}

fn execute_registry(command: RegistryCommand, workspace: &mut Workspace) -> Result<()> {
    match command {
        RegistryCommand::List { json } => {
            let registries: Vec<_> = workspace.app.registries().values().collect();
            if json {
                let entries: Vec<serde_json::Value> = registries
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "name": r.name,
                            "protocol": r.protocol.as_str(),
                            "uri": r.uri,
                            "override": r.is_override,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
                return Ok(());
            }

            if registries.is_empty() {
                println!("No registries configured.");
                return Ok(());
            }
            let rows: Vec<RegistryRow> = registries
                .iter()
                .map(|r| RegistryRow {
                    name: r.name.clone(),
                    protocol: r.protocol.to_string(),
                    uri: r.uri.clone(),
                    is_override: if r.is_override { "yes" } else { "" }.to_string(),
                })
                .collect();
            print_table(&rows);
            Ok(())
        }
        RegistryCommand::Add {
            name,
            uri,
            is_override,
        } => {
            let ctx = RegistryContext::new(
                &workspace.app,
                workspace.transport()?,
                workspace.settings.clone(),
            );
            let added = registry::add(&mut workspace.app, &ctx, &name, &uri, is_override)
                .with_context(|| format!("Failed to add registry '{name}'"))?;
            workspace.app.save()?;
            println!("Added {} registry '{name}' at {}", added.protocol, added.uri);
            Ok(())
        }
        RegistryCommand::SetUri { name, uri } => {
            let ctx = RegistryContext::new(
                &workspace.app,
                workspace.transport()?,
                workspace.settings.clone(),
            );
            registry::update_uri(&mut workspace.app, &ctx, &name, &uri)
                .with_context(|| format!("Failed to update registry '{name}'"))?;
            workspace.app.save()?;
            println!("Registry '{name}' now points at {uri}");
            Ok(())
        }
    }
}

fn execute_component(command: ComponentCommand, workspace: &Workspace) -> Result<()> {
    let store = ParamStore::new(&workspace.app);
    match command {
        ComponentCommand::List => {
            for name in store.components()? {
                println!("{name}");
            }
            Ok(())
        }
        ComponentCommand::Rm { name } => {
            store
                .delete_component(&name)
                .with_context(|| format!("Failed to delete component '{name}'"))?;
            println!("Deleted component '{name}'");
            Ok(())
        }
    }
}

/// Table row for prototype listings
#[derive(Tabled)]
struct PrototypeRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Description")]
    description: String,
}

fn execute_prototype(command: PrototypeCommand, workspace: &Workspace) -> Result<()> {
    let packages = workspace.packages()?;
    let index = packages.prototype_index(&workspace.app)?;

    match command {
        PrototypeCommand::List { json } => {
            if json {
                let prototypes: Vec<_> = index.list().collect();
                println!("{}", serde_json::to_string_pretty(&prototypes)?);
                return Ok(());
            }
            let rows: Vec<PrototypeRow> = index
                .list()
                .map(|p| PrototypeRow {
                    name: p.name.clone(),
                    description: p.summary().to_string(),
                })
                .collect();
            print_table(&rows);
            Ok(())
        }
        PrototypeCommand::Describe { query } => {
            let prototype = index.find_unique(&query)?;
            println!("PROTOTYPE NAME:\n{}\n", prototype.name);
            println!("DESCRIPTION:\n{}\n", prototype.description);
            println!("REQUIRED PARAMETERS:");
            for param in &prototype.required_params {
                println!("  --{} ({}) {}", param.name, param.param_type, param.description);
            }
            println!("\nOPTIONAL PARAMETERS:");
            for param in &prototype.optional_params {
                println!(
                    "  --{} ({}) {} [default: {}]",
                    param.name,
                    param.param_type,
                    param.description,
                    param.default.as_deref().unwrap_or("")
                );
            }
            println!("\nTEMPLATE:\n{}", prototype.template);
            Ok(())
        }
        PrototypeCommand::Use {
            query,
            component,
            params,
        } => {
            let prototype = index.find_unique(&query)?;
            let created = ParamStore::new(&workspace.app)
                .use_prototype(prototype, &component, &params)
                .with_context(|| format!("Failed to create component '{component}'"))?;
            for source in &created.sources {
                println!("Created {}", source.display());
            }
            Ok(())
        }
    }
}

fn execute_vendor(command: VendorCommand, workspace: &Workspace) -> Result<()> {
    match command {
        VendorCommand::Sweep => {
            let packages = workspace.packages()?;
            let removed = GarbageCollector::new(packages.vendor())
                .sweep(&workspace.app)
                .context("Failed to sweep vendor directory")?;
            if removed.is_empty() {
                println!("Nothing to remove.");
            }
            for id in removed {
                println!("Removed {id}");
            }
            Ok(())
        }
    }
}
