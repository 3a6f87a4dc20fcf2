//! Parameter overlay store
//!
//! Parameters live in YAML documents at three scopes:
//!
//! ```text
//! components/[<module>/]params.yaml     module document
//!     global:                             module-wide parameters
//!     components:
//!       <name>: { ... }                   component parameters
//! environments/<env>/params.yaml        environment overrides
//!     components:
//!       <[module.]name>: { ... }          per-component overrides
//!     global: { ... }                     environment-wide parameters
//! ```
//!
//! Components are addressed as `[module.]name`: every segment but the last
//! names a directory under `components/`, the last names the component
//! source file (`<name>.jsonnet`, `.yaml`, `.yml` or `.json`) in it.
//! Parameter paths are dotted (`image.tag`); environment overrides set a
//! single named parameter. Documents are created on first write.

pub mod txn;
pub mod value;


pub use txn::Transaction;
pub use value::decode;

use serde_yaml_ng::{Mapping, Value};
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::app::App;
use crate::error::{Error, Result};
use crate::fsutil;
use crate::pkg;
use crate::prototype::Prototype;

pub const PARAMS_FILE: &str = "params.yaml";

const GLOBAL_KEY: &str = "global";
const COMPONENTS_KEY: &str = "components";
const COMPONENT_EXTENSIONS: [&str; 4] = ["jsonnet", "yaml", "yml", "json"];

/// A component resolved to its module directory and source files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRef {
    pub full_name: String,
    pub module: Vec<String>,
    pub name: String,
    pub sources: Vec<PathBuf>,
}

/// Read and write access to an app's parameter documents
pub struct ParamStore<'a> {
    app: &'a App,
}

impl<'a> ParamStore<'a> {
    pub fn new(app: &'a App) -> Self {
        Self { app }
    }

    /// Every component in the app, as `[module.]name`, sorted
    pub fn components(&self) -> Result<Vec<String>> {
        let root = self.app.components_path();
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = BTreeSet::new();
        for entry in WalkDir::new(&root).min_depth(1) {
            let entry = entry.map_err(|e| Error::Read {
                path: root.clone(),
                source: e.into(),
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || !is_component_source(path) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&root) else {
                continue;
            };
            let mut segments: Vec<String> = relative
                .parent()
                .into_iter()
                .flat_map(|p| p.components())
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            if segments.iter().any(|s| s.starts_with('.')) {
                continue;
            }
            if let Some(stem) = path.file_stem() {
                segments.push(stem.to_string_lossy().into_owned());
                names.insert(segments.join("."));
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Resolve `[module.]name` to an existing component
    pub fn component(&self, full_name: &str) -> Result<ComponentRef> {
        let segments: Vec<&str> = full_name.split('.').collect();
        let unknown = || -> Result<ComponentRef> {
            Err(Error::UnknownComponent {
                name: full_name.to_string(),
                available: self.components()?,
            })
        };
        if segments.iter().any(|s| s.is_empty()) {
            return unknown();
        }

        let (name, module) = match segments.split_last() {
            Some((name, module)) => (*name, module),
            None => return unknown(),
        };
        let module: Vec<String> = module.iter().map(|s| s.to_string()).collect();
        let dir = self.module_dir(&module);

        let sources: Vec<PathBuf> = COMPONENT_EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{name}.{ext}")))
            .filter(|p| p.is_file() && is_component_source(p))
            .collect();
        if sources.is_empty() {
            return unknown();
        }

        Ok(ComponentRef {
            full_name: full_name.to_string(),
            module,
            name: name.to_string(),
            sources,
        })
    }

    // === Reads ===

    /// Parameters authored for `component`
    pub fn component_params(&self, component: &str) -> Result<Mapping> {
        let target = self.component(component)?;
        let doc = load_document(&self.module_document_path(&target.module))?;
        Ok(mapping_at(&doc, &[COMPONENTS_KEY, target.name.as_str()]))
    }

    /// Module-wide parameters (`""` is the root module)
    pub fn global_params(&self, module: &str) -> Result<Mapping> {
        let module = parse_module(module)?;
        let doc = load_document(&self.module_document_path(&module))?;
        Ok(mapping_at(&doc, &[GLOBAL_KEY]))
    }

    /// Overrides `env` holds for `component`
    pub fn environment_params(&self, env: &str, component: &str) -> Result<Mapping> {
        self.app.require_environment(env)?;
        let target = self.component(component)?;
        let doc = load_document(&self.environment_document_path(env))?;
        Ok(mapping_at(&doc, &[COMPONENTS_KEY, target.full_name.as_str()]))
    }

    /// Environment-wide parameters for `env`
    pub fn environment_global_params(&self, env: &str) -> Result<Mapping> {
        self.app.require_environment(env)?;
        let doc = load_document(&self.environment_document_path(env))?;
        Ok(mapping_at(&doc, &[GLOBAL_KEY]))
    }

    /// Parameters `component` renders with in `env`
    ///
    /// The environment's overrides are deep-merged over the component's own
    /// parameters. With no environment this is the component document.
    pub fn effective(&self, env: Option<&str>, component: &str) -> Result<Mapping> {
        let mut params = self.component_params(component)?;
        if let Some(env) = env {
            let overrides = self.environment_params(env, component)?;
            deep_merge(&mut params, &overrides);
        }
        Ok(params)
    }

    // === Writes ===

    /// Set `path` in `component`'s parameters
    pub fn set_local(&self, component: &str, path: &str, value: Value) -> Result<()> {
        let segments = parse_path(path)?;
        let target = self.component(component)?;
        let doc_path = self.module_document_path(&target.module);

        let mut doc = load_document(&doc_path)?;
        let components = child_mapping(&mut doc, COMPONENTS_KEY, path)?;
        let params = child_mapping(components, &target.name, path)?;
        set_path(params, &segments, value, path)?;

        write_document(&doc_path, &doc)?;
        debug!(component = %target.full_name, "Set {}", path);
        Ok(())
    }

    /// Set `path` in the module-wide parameters of `module`
    pub fn set_global(&self, module: &str, path: &str, value: Value) -> Result<()> {
        let segments = parse_path(path)?;
        let module = parse_module(module)?;
        let doc_path = self.module_document_path(&module);

        let mut doc = load_document(&doc_path)?;
        set_path(child_mapping(&mut doc, GLOBAL_KEY, path)?, &segments, value, path)?;

        write_document(&doc_path, &doc)?;
        debug!(module = %module.join("."), "Set global {}", path);
        Ok(())
    }

    /// Override the single parameter `param` of `component` in `env`
    ///
    /// Only the environment document is read; the component's own value is
    /// left alone and takes effect again once the override is unset.
    pub fn set_environment(
        &self,
        env: &str,
        component: &str,
        param: &str,
        value: Value,
    ) -> Result<()> {
        self.app.require_environment(env)?;
        let target = self.component(component)?;
        let param = parse_param(param)?;
        let doc_path = self.environment_document_path(env);

        let mut doc = load_document(&doc_path)?;
        let components = child_mapping(&mut doc, COMPONENTS_KEY, &param)?;
        let overrides = child_mapping(components, &target.full_name, &param)?;
        overrides.insert(Value::String(param.clone()), value);

        write_document(&doc_path, &doc)?;
        debug!(environment = env, component = %target.full_name, "Set {}", param);
        Ok(())
    }

    /// Set `path` in the environment-wide parameters of `env`
    pub fn set_environment_global(&self, env: &str, path: &str, value: Value) -> Result<()> {
        self.app.require_environment(env)?;
        let segments = parse_path(path)?;
        let doc_path = self.environment_document_path(env);

        let mut doc = load_document(&doc_path)?;
        set_path(child_mapping(&mut doc, GLOBAL_KEY, path)?, &segments, value, path)?;

        write_document(&doc_path, &doc)?;
        debug!(environment = env, "Set global {}", path);
        Ok(())
    }

    /// Remove `path` from `component`'s parameters, pruning emptied parents
    ///
    /// Returns whether anything was removed.
    pub fn unset_local(&self, component: &str, path: &str) -> Result<bool> {
        let segments = parse_path(path)?;
        let target = self.component(component)?;
        let doc_path = self.module_document_path(&target.module);

        let mut doc = load_document(&doc_path)?;
        let mut full_path = vec![COMPONENTS_KEY.to_string(), target.name.clone()];
        full_path.extend(segments);
        if !remove_path(&mut doc, &full_path) {
            return Ok(false);
        }

        write_document(&doc_path, &doc)?;
        debug!(component = %target.full_name, "Unset {}", path);
        Ok(true)
    }

    /// Remove the override of `param` for `component` in `env`
    pub fn unset_environment(&self, env: &str, component: &str, param: &str) -> Result<bool> {
        self.app.require_environment(env)?;
        let target = self.component(component)?;
        let param = parse_param(param)?;
        let doc_path = self.environment_document_path(env);

        let mut doc = load_document(&doc_path)?;
        let full_path = [COMPONENTS_KEY.to_string(), target.full_name.clone(), param.clone()];
        if !remove_path(&mut doc, &full_path) {
            return Ok(false);
        }

        write_document(&doc_path, &doc)?;
        debug!(environment = env, component = %target.full_name, "Unset {}", param);
        Ok(true)
    }

    /// Create component `full_name` from jsonnet `source`, seeding its parameters
    ///
    /// The source file and the module document are written together. Fails
    /// if a component of that name exists with any source extension.
    pub fn create_component(
        &self,
        full_name: &str,
        source: &str,
        params: Mapping,
    ) -> Result<ComponentRef> {
        let (module, name) = parse_component_name(full_name)?;
        if self.component(full_name).is_ok() {
            return Err(Error::ComponentExists(full_name.to_string()));
        }

        let source_path = self.module_dir(&module).join(format!("{name}.jsonnet"));
        let doc_path = self.module_document_path(&module);
        let mut doc = load_document(&doc_path)?;
        child_mapping(&mut doc, COMPONENTS_KEY, full_name)?
            .insert(Value::String(name), Value::Mapping(params));

        let mut txn = Transaction::new();
        txn.write(&source_path, source);
        txn.write(&doc_path, encode_document(&doc)?);
        txn.commit()?;

        info!("Created component '{}'", full_name);
        self.component(full_name)
    }

    /// Generate component `full_name` from `prototype`
    ///
    /// `given` holds `(parameter, value)` pairs from the command line.
    pub fn use_prototype(
        &self,
        prototype: &Prototype,
        full_name: &str,
        given: &[(String, String)],
    ) -> Result<ComponentRef> {
        let (_, name) = parse_component_name(full_name)?;
        let params = prototype.bind_params(&name, given)?;
        debug!(prototype = %prototype.name, "Expanding into '{}'", full_name);
        self.create_component(full_name, &prototype.expand(&name), params)
    }

    /// Delete `component` and every parameter that refers to it
    ///
    /// The module document and every environment document are rewritten
    /// together; if any of them cannot be read or staged, none is written.
    /// The component source files are removed last.
    pub fn delete_component(&self, component: &str) -> Result<()> {
        let target = self.component(component)?;
        let mut txn = Transaction::new();

        let module_path = self.module_document_path(&target.module);
        let mut module_doc = load_document(&module_path)?;
        if remove_path(&mut module_doc, &[COMPONENTS_KEY.to_string(), target.name.clone()]) {
            txn.write(&module_path, encode_document(&module_doc)?);
        }

        for env in self.environment_dirs()? {
            let doc_path = self.environment_document_path(&env);
            let mut doc = load_document(&doc_path)?;
            if remove_path(&mut doc, &[COMPONENTS_KEY.to_string(), target.full_name.clone()]) {
                debug!(environment = %env, "Dropping overrides for {}", target.full_name);
                txn.write(&doc_path, encode_document(&doc)?);
            }
        }

        let written = txn.commit()?;

        for source in &target.sources {
            std::fs::remove_file(source).map_err(|e| Error::ManifestWriteFailed {
                path: source.clone(),
                source: e,
            })?;
        }

        info!(
            "Deleted component '{}' ({} parameter documents updated)",
            target.full_name, written
        );
        Ok(())
    }

    // === Paths ===

    fn module_dir(&self, module: &[String]) -> PathBuf {
        module
            .iter()
            .fold(self.app.components_path(), |dir, segment| dir.join(segment))
    }

    fn module_document_path(&self, module: &[String]) -> PathBuf {
        self.module_dir(module).join(PARAMS_FILE)
    }

    fn environment_document_path(&self, env: &str) -> PathBuf {
        self.app.environments_path().join(env).join(PARAMS_FILE)
    }

    /// Environments named in the manifest plus any directory on disk
    fn environment_dirs(&self) -> Result<BTreeSet<String>> {
        let mut envs: BTreeSet<String> = self.app.environment_names().into_iter().collect();

        let root = self.app.environments_path();
        if root.is_dir() {
            let entries = std::fs::read_dir(&root).map_err(|e| Error::read(&root, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| Error::read(&root, e))?;
                if entry.path().join(PARAMS_FILE).is_file() {
                    envs.insert(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        Ok(envs)
    }
}

// === Path parsing ===

/// Split a dotted parameter path, rejecting empty segments
pub fn parse_path(path: &str) -> Result<Vec<String>> {
    if path.is_empty() {
        return Err(Error::InvalidParamPath {
            path: path.to_string(),
            reason: "path is empty".to_string(),
        });
    }
    let segments: Vec<String> = path.split('.').map(str::to_string).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::InvalidParamPath {
            path: path.to_string(),
            reason: "path contains an empty segment".to_string(),
        });
    }
    Ok(segments)
}

/// Split `[module.]name` into its module directories and component name
fn parse_component_name(full_name: &str) -> Result<(Vec<String>, String)> {
    let invalid = |reason: &str| Error::InvalidComponentName {
        name: full_name.to_string(),
        reason: reason.to_string(),
    };
    let mut segments: Vec<String> = full_name.split('.').map(str::to_string).collect();
    if segments.iter().any(|s| !pkg::is_valid_name(s)) {
        return Err(invalid(
            "segments start with a letter or digit and hold only letters, digits, '-' and '_'",
        ));
    }
    match segments.pop() {
        Some(name) if name != "params" => Ok((segments, name)),
        _ => Err(invalid("'params' is reserved for parameter documents")),
    }
}

fn parse_param(param: &str) -> Result<String> {
    if param.is_empty() {
        return Err(Error::InvalidParamPath {
            path: param.to_string(),
            reason: "parameter name is empty".to_string(),
        });
    }
    Ok(param.to_string())
}

fn parse_module(module: &str) -> Result<Vec<String>> {
    let module = module.trim_matches('/');
    if module.is_empty() {
        return Ok(Vec::new());
    }
    parse_path(module)
}

fn is_component_source(path: &Path) -> bool {
    let is_params = path.file_stem() == Some(OsStr::new("params"));
    let has_extension = path
        .extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| COMPONENT_EXTENSIONS.contains(&ext));
    has_extension && !is_params
}

// === Documents ===

fn load_document(path: &Path) -> Result<Mapping> {
    let Some(content) = fsutil::read_optional(path).map_err(|e| Error::read(path, e))? else {
        return Ok(Mapping::new());
    };
    if content.trim().is_empty() {
        return Ok(Mapping::new());
    }

    match serde_yaml_ng::from_str::<Value>(&content).map_err(|e| Error::parse(path, e))? {
        Value::Mapping(map) => Ok(map),
        Value::Null => Ok(Mapping::new()),
        _ => Err(Error::InvalidDocument {
            path: path.to_path_buf(),
            reason: "top level is not a mapping".to_string(),
        }),
    }
}

fn encode_document(doc: &Mapping) -> Result<String> {
    Ok(serde_yaml_ng::to_string(doc)?)
}

fn write_document(path: &Path, doc: &Mapping) -> Result<()> {
    let mut txn = Transaction::new();
    txn.write(path, encode_document(doc)?);
    txn.commit()?;
    Ok(())
}

// === Tree edits ===

/// The mapping under `key`, created when absent or null
fn child_mapping<'m>(map: &'m mut Mapping, key: &str, path: &str) -> Result<&'m mut Mapping> {
    let entry = map
        .entry(Value::String(key.to_string()))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if entry.is_null() {
        *entry = Value::Mapping(Mapping::new());
    }
    entry.as_mapping_mut().ok_or_else(|| Error::InvalidParamPath {
        path: path.to_string(),
        reason: format!("'{key}' holds a value, not a mapping"),
    })
}

fn set_path(map: &mut Mapping, segments: &[String], value: Value, path: &str) -> Result<()> {
    match segments.split_first() {
        None => Ok(()),
        Some((last, [])) => {
            map.insert(Value::String(last.clone()), value);
            Ok(())
        }
        Some((first, rest)) => set_path(child_mapping(map, first, path)?, rest, value, path),
    }
}

fn remove_path(map: &mut Mapping, segments: &[String]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return false;
    };
    let key = Value::String(first.clone());
    if rest.is_empty() {
        return map.shift_remove(&key).is_some();
    }

    let (removed, emptied) = match map.get_mut(&key).and_then(Value::as_mapping_mut) {
        Some(child) => {
            let removed = remove_path(child, rest);
            (removed, child.is_empty())
        }
        None => (false, false),
    };
    if removed && emptied {
        map.shift_remove(&key);
    }
    removed
}

fn mapping_at(doc: &Mapping, keys: &[&str]) -> Mapping {
    let mut current = doc;
    for key in keys {
        match current.get(*key).and_then(Value::as_mapping) {
            Some(child) => current = child,
            None => return Mapping::new(),
        }
    }
    current.clone()
}

/// Overlay `overlay` onto `base`; nested mappings merge, everything else replaces
pub fn deep_merge(base: &mut Mapping, overlay: &Mapping) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Mapping(existing)), Value::Mapping(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Look up a dotted path in a parameter mapping
pub fn get_path<'m>(map: &'m Mapping, path: &str) -> Option<&'m Value> {
    let mut segments = path.split('.');
    let mut current = map.get(segments.next()?)?;
    for segment in segments {
        current = current.as_mapping()?.get(segment)?;
    }
    Some(current)
}

/// Leaf values of a parameter mapping as `(dotted.path, display)`, in document order
pub fn flatten(map: &Mapping) -> Vec<(String, String)> {
    let mut rows = Vec::new();
    flatten_into("", map, &mut rows);
    rows
}

fn flatten_into(prefix: &str, map: &Mapping, rows: &mut Vec<(String, String)>) {
    for (key, value) in map {
        let key = value::display(key);
        let path = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Mapping(child) if !child.is_empty() => flatten_into(&path, child, rows),
            other => rows.push((path, value::display(other))),
        }
    }
}
