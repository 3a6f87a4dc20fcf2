//! Package identities and descriptors

mod descriptor;

pub use descriptor::{is_valid_name, Descriptor};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::app::LibraryConfig;

/// Identity of a vendored package: `(registry, name, version)`
///
/// This is the dedup key for package listings and the key of a vendor
/// cache entry. Two entries with the same identity are assumed to hold the
/// same content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId {
    pub registry: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
}

impl PackageId {
    pub fn new(
        registry: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

impl From<&LibraryConfig> for PackageId {
    fn from(lib: &LibraryConfig) -> Self {
        Self::new(&lib.registry, &lib.name, &lib.version)
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.name)?;
        if !self.version.is_empty() {
            write!(f, "@{}", self.version)?;
        }
        Ok(())
    }
}

/// A package as shown in listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Package {
    pub id: PackageId,
    /// Whether a vendor cache entry exists for this identity
    pub installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Package {
    pub fn registry(&self) -> &str {
        &self.id.registry
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn version(&self) -> &str {
        &self.id.version
    }
}
