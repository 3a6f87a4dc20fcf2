//! Chart repository index parsing
//!
//! A chart repository serves `index.yaml`, listing every chart with all of
//! its published versions, digests, and download URLs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A chart repository index (`index.yaml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartIndex {
    pub api_version: String,

    /// When the index was generated
    #[serde(default)]
    pub generated: String,

    /// Chart versions keyed by chart name, newest first after [`ChartIndex::sort`]
    #[serde(default)]
    pub entries: HashMap<String, Vec<ChartVersion>>,
}

/// One published version of a chart
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartVersion {
    pub name: String,

    pub version: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    /// SHA-256 of the chart tarball, hex encoded (optionally `sha256:` prefixed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    #[serde(default)]
    pub urls: Vec<String>,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub deprecated: bool,
}

impl ChartIndex {
    /// Parse and sort an index
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml_ng::Error> {
        let mut index: ChartIndex = serde_yaml_ng::from_str(content)?;
        index.sort();
        Ok(index)
    }

    /// Order every chart's versions newest first and drop duplicates
    pub fn sort(&mut self) {
        for versions in self.entries.values_mut() {
            versions.sort_by(|a, b| {
                match (
                    semver::Version::parse(&a.version),
                    semver::Version::parse(&b.version),
                ) {
                    (Ok(va), Ok(vb)) => vb.cmp(&va),
                    _ => b.version.cmp(&a.version),
                }
            });
            versions.dedup_by(|a, b| a.version == b.version);
        }
    }

    /// Sorted chart names
    pub fn chart_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn versions(&self, name: &str) -> Option<&Vec<ChartVersion>> {
        self.entries.get(name)
    }

    /// Newest stable version, or the newest pre-release when nothing is stable
    pub fn latest(&self, name: &str) -> Option<&ChartVersion> {
        let versions = self.entries.get(name)?;
        versions
            .iter()
            .find(|v| {
                semver::Version::parse(&v.version)
                    .map(|v| v.pre.is_empty())
                    .unwrap_or(false)
            })
            .or_else(|| versions.first())
    }

    /// Resolve a version specifier to a concrete chart version
    ///
    /// Supports:
    /// - Latest: `None`, `""` or `"latest"`
    /// - Exact version: `"1.2.0"`
    /// - Semver requirements: `"^1.2"`, `"~1.4"`, `">=1.0, <2.0"`
    pub fn resolve_version(&self, name: &str, specifier: Option<&str>) -> Option<&ChartVersion> {
        let versions = self.entries.get(name)?;

        let specifier = match specifier {
            None => return self.latest(name),
            Some(s) if s.is_empty() || s.eq_ignore_ascii_case("latest") => {
                return self.latest(name)
            }
            Some(s) => s,
        };

        if let Some(entry) = versions.iter().find(|e| e.version == specifier) {
            return Some(entry);
        }

        let requirement = semver::VersionReq::parse(specifier).ok()?;

        // Versions are sorted newest first, so the first match is the best one
        versions.iter().find(|entry| {
            semver::Version::parse(&entry.version)
                .map(|v| requirement.matches(&v))
                .unwrap_or(false)
        })
    }
}

impl ChartVersion {
    pub fn download_url(&self) -> Option<&str> {
        self.urls.first().map(|s| s.as_str())
    }

    /// Expected digest as bare lowercase hex
    pub fn digest_hex(&self) -> Option<String> {
        self.digest
            .as_deref()
            .map(|d| d.strip_prefix("sha256:").unwrap_or(d).to_ascii_lowercase())
            .filter(|d| !d.is_empty())
    }
}
