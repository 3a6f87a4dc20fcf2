//! Parameter CLI commands

use anyhow::{Context, Result};
use clap::Subcommand;
use tabled::Tabled;

use ksapp_core::params::{self, decode};
use ksapp_core::ParamStore;

use crate::{print_table, Workspace};

#[derive(Subcommand, Debug)]
pub enum ParamCommand {
    /// Set a component parameter, or override it in an environment
    Set {
        /// Component name, as `[module.]name`
        component: String,

        /// Parameter path (dotted for nested values; a single name with --env)
        path: String,

        /// Value; numbers, booleans, null and JSON lists/objects are decoded
        value: String,

        /// Override in this environment instead of the component itself
        #[clap(long)]
        env: Option<String>,

        /// Store the value as a string without decoding it
        #[clap(long)]
        as_string: bool,
    },

    /// Set a module-wide or environment-wide parameter
    SetGlobal {
        /// Parameter path
        path: String,

        /// Value, decoded as for `param set`
        value: String,

        /// Module to set it in (the root module when omitted)
        #[clap(long, conflicts_with = "env")]
        module: Option<String>,

        /// Environment to set it in
        #[clap(long)]
        env: Option<String>,

        /// Store the value as a string without decoding it
        #[clap(long)]
        as_string: bool,
    },

    /// Remove a component parameter or an environment override
    Unset {
        /// Component name, as `[module.]name`
        component: String,

        /// Parameter path
        path: String,

        /// Remove the override in this environment
        #[clap(long)]
        env: Option<String>,
    },

    /// Show a component's parameters
    Show {
        /// Component name, as `[module.]name`
        component: String,

        /// Show the values the component renders with in this environment
        #[clap(long)]
        env: Option<String>,

        /// Output as JSON
        #[clap(long)]
        json: bool,
    },
}

/// Table row for parameter listings
#[derive(Tabled)]
struct ParamRow {
    #[tabled(rename = "Param")]
    param: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl ParamCommand {
    pub fn execute(self, workspace: &Workspace) -> Result<()> {
        let store = ParamStore::new(&workspace.app);
        match self {
            ParamCommand::Set {
                component,
                path,
                value,
                env,
                as_string,
            } => {
                let value = decode(&value, as_string);
                let result = match env.as_deref() {
                    Some(env) => store.set_environment(env, &component, &path, value),
                    None => store.set_local(&component, &path, value),
                };
                result.with_context(|| format!("Failed to set '{path}' on '{component}'"))
            }
            ParamCommand::SetGlobal {
                path,
                value,
                module,
                env,
                as_string,
            } => {
                let value = decode(&value, as_string);
                let result = match env.as_deref() {
                    Some(env) => store.set_environment_global(env, &path, value),
                    None => store.set_global(module.as_deref().unwrap_or(""), &path, value),
                };
                result.with_context(|| format!("Failed to set global '{path}'"))
            }
            ParamCommand::Unset {
                component,
                path,
                env,
            } => {
                let removed = match env.as_deref() {
                    Some(env) => store.unset_environment(env, &component, &path)?,
                    None => store.unset_local(&component, &path)?,
                };
                if !removed {
                    println!("'{path}' is not set on '{component}'");
                }
                Ok(())
            }
            ParamCommand::Show {
                component,
                env,
                json,
            } => {
                let effective = store.effective(env.as_deref(), &component)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&effective)?);
                    return Ok(());
                }

                let rows: Vec<ParamRow> = params::flatten(&effective)
                    .into_iter()
                    .map(|(param, value)| ParamRow { param, value })
                    .collect();
                if rows.is_empty() {
                    println!("No parameters set for '{component}'.");
                } else {
                    print_table(&rows);
                }
                Ok(())
            }
        }
    }
}
