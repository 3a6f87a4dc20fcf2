//! Error types for ksapp-core
//!
//! Every fallible operation in the crate returns [`Error`]. Lookups that fail
//! against a known set (registries, environments, components, prototypes)
//! carry the candidate list so a CLI can print something actionable.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by registry, cache and parameter operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed package descriptor '{input}': {reason}")]
    MalformedDescriptor { input: String, reason: String },

    #[error("unknown registry '{name}' (available: {})", display_list(.available))]
    UnknownRegistry { name: String, available: Vec<String> },

    #[error("unknown environment '{name}' (available: {})", display_list(.available))]
    UnknownEnvironment { name: String, available: Vec<String> },

    #[error("unable to find component '{name}' (available: {})", display_list(.available))]
    UnknownComponent { name: String, available: Vec<String> },

    #[error("registry '{0}' already exists")]
    RegistryExists(String),

    #[error("component '{0}' already exists")]
    ComponentExists(String),

    #[error("invalid component name '{name}': {reason}")]
    InvalidComponentName { name: String, reason: String },

    #[error("registry '{registry}' is unreachable during {operation}: {reason}")]
    RegistryUnreachable {
        registry: String,
        operation: String,
        reason: String,
    },

    #[error("registry '{registry}' failed to {operation}: {reason}")]
    FetchFailed {
        registry: String,
        operation: String,
        reason: String,
    },

    #[error("version '{version}' of package '{package}' not found in registry '{registry}'")]
    VersionNotFound {
        registry: String,
        package: String,
        version: String,
    },

    #[error("package '{package}' not found in registry '{registry}' (available: {})", display_list(.available))]
    PackageNotFound {
        registry: String,
        package: String,
        available: Vec<String>,
    },

    #[error("ambiguous match for '{query}': {}", .candidates.join(", "))]
    AmbiguousPrototype {
        query: String,
        candidates: Vec<String>,
    },

    #[error("{}", no_such_prototype_message(.query, .partial_matches))]
    NoSuchPrototype {
        query: String,
        partial_matches: Vec<String>,
    },

    #[error("prototype '{0}' is defined more than once")]
    DuplicatePrototype(String),

    #[error("invalid prototype '{source_name}': {reason}")]
    InvalidPrototype { source_name: String, reason: String },

    #[error("invalid parameters for prototype '{prototype}': {reason}")]
    PrototypeParams { prototype: String, reason: String },

    #[error("invalid registry URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("invalid parameter path '{path}': {reason}")]
    InvalidParamPath { path: String, reason: String },

    #[error("invalid parameter document {}: {reason}", .path.display())]
    InvalidDocument { path: PathBuf, reason: String },

    #[error("failed to write vendor cache entry {}: {source}", .path.display())]
    CacheWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write manifest {}: {source}", .path.display())]
    ManifestWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove orphaned vendor entry {}: {source}", .path.display())]
    GcDeleteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("app not found: no app.yaml in {} or any parent directory", .0.display())]
    AppNotFound(PathBuf),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for ksapp-core operations
pub type Result<T> = std::result::Result<T, Error>;

fn display_list(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

fn no_such_prototype_message(query: &str, partial_matches: &[String]) -> String {
    if partial_matches.is_empty() {
        format!("no prototype names matched '{query}'")
    } else {
        format!(
            "no prototype names matched '{query}'; a list of partial matches: {}",
            partial_matches.join(", ")
        )
    }
}

impl Error {
    /// Build a `FetchFailed` for a registry operation
    pub fn fetch(
        registry: impl Into<String>,
        operation: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Error::FetchFailed {
            registry: registry.into(),
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a `RegistryUnreachable` for a registry operation
    pub fn unreachable(
        registry: impl Into<String>,
        operation: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Error::RegistryUnreachable {
            registry: registry.into(),
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, source: serde_yaml_ng::Error) -> Self {
        Error::Parse {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_environment_lists_candidates() {
        let err = Error::UnknownEnvironment {
            name: "qa".to_string(),
            available: vec!["default".to_string(), "prod".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "unknown environment 'qa' (available: default, prod)"
        );
    }

    #[test]
    fn test_no_such_prototype_message() {
        let none = Error::NoSuchPrototype {
            query: "redis".to_string(),
            partial_matches: vec![],
        };
        assert_eq!(none.to_string(), "no prototype names matched 'redis'");

        let partial = Error::NoSuchPrototype {
            query: "deploy".to_string(),
            partial_matches: vec!["a.deployed-service".to_string()],
        };
        assert!(partial.to_string().contains("partial matches: a.deployed-service"));
    }
}
