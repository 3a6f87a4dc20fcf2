use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid name pattern"));

/// Whether `name` is usable as a package or registry name
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

/// A package reference: `[registry/]name[@version]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub registry: Option<String>,
    pub name: String,
    pub version: Option<String>,
}

impl Descriptor {
    pub fn new(registry: Option<&str>, name: &str, version: Option<&str>) -> Self {
        Self {
            registry: registry.map(str::to_string),
            name: name.to_string(),
            version: version.map(str::to_string),
        }
    }

    /// Parse a descriptor string.
    ///
    /// The registry segment is optional; callers fall back to their
    /// configured default with [`Descriptor::registry_or`].
    pub fn parse(input: &str) -> Result<Self> {
        let malformed = |reason: &str| Error::MalformedDescriptor {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let input_trimmed = input.trim();
        if input_trimmed.is_empty() {
            return Err(malformed("empty descriptor"));
        }

        let (main_part, version) = match input_trimmed.split_once('@') {
            Some((main, version)) => {
                if version.contains('@') {
                    return Err(malformed("more than one '@'"));
                }
                if version.is_empty() {
                    return Err(malformed("version after '@' is empty"));
                }
                (main, Some(version.to_string()))
            }
            None => (input_trimmed, None),
        };

        let (registry, name) = match main_part.split_once('/') {
            Some((registry, name)) => {
                if name.contains('/') {
                    return Err(malformed("more than one '/'"));
                }
                if registry.is_empty() {
                    return Err(malformed("registry before '/' is empty"));
                }
                (Some(registry.to_string()), name)
            }
            None => (None, main_part),
        };

        if name.is_empty() {
            return Err(malformed("package name is empty"));
        }

        if !NAME_PATTERN.is_match(name) {
            return Err(malformed(
                "package name may only contain letters, digits, '.', '-' and '_'",
            ));
        }

        if let Some(registry) = &registry {
            if !NAME_PATTERN.is_match(registry) {
                return Err(malformed(
                    "registry name may only contain letters, digits, '.', '-' and '_'",
                ));
            }
        }

        Ok(Self {
            registry,
            name: name.to_string(),
            version,
        })
    }

    pub fn registry_or<'a>(&'a self, default_registry: &'a str) -> &'a str {
        self.registry.as_deref().unwrap_or(default_registry)
    }
}

impl FromStr for Descriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, "@{version}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_only() {
        let d = Descriptor::parse("apache").unwrap();
        assert_eq!(d.registry, None);
        assert_eq!(d.name, "apache");
        assert_eq!(d.version, None);
    }

    #[test]
    fn test_parse_full() {
        let d = Descriptor::parse("incubator/apache@1.2.0").unwrap();
        assert_eq!(d.registry.as_deref(), Some("incubator"));
        assert_eq!(d.name, "apache");
        assert_eq!(d.version.as_deref(), Some("1.2.0"));
    }

    #[test]
    fn test_parse_commit_version() {
        let d = Descriptor::parse("incubator/redis@40285d8a14f1ac5787e405e1023cf0c07f6aa28c")
            .unwrap();
        assert_eq!(
            d.version.as_deref(),
            Some("40285d8a14f1ac5787e405e1023cf0c07f6aa28c")
        );
    }

    #[test]
    fn test_roundtrip() {
        for input in ["incubator/apache@1.2.0", "incubator/apache", "apache@master", "apache"] {
            let d = Descriptor::parse(input).unwrap();
            assert_eq!(d.to_string(), input);
            assert_eq!(Descriptor::parse(&d.to_string()).unwrap(), d);
        }
    }

    #[test]
    fn test_malformed() {
        for input in ["/x", "x@", "x@1@2", "", "incubator/", "a/b/c", "inc/ap ache"] {
            let result = Descriptor::parse(input);
            assert!(
                matches!(result, Err(Error::MalformedDescriptor { .. })),
                "expected '{input}' to be malformed"
            );
        }
    }

    #[test]
    fn test_default_registry() {
        let d = Descriptor::parse("apache").unwrap();
        assert_eq!(d.registry_or("incubator"), "incubator");

        let d = Descriptor::parse("local/apache").unwrap();
        assert_eq!(d.registry_or("incubator"), "local");
    }
}
