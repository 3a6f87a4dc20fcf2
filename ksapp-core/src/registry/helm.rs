//! Registry backed by a chart repository
//!
//! The repository serves `index.yaml` at its base URI. The index is cached
//! per registry under the app's `.ksonnet/registries/<name>/` directory and
//! refetched once it is older than the configured TTL.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{
    library_for, ChartIndex, ChartVersion, ContentSink, LibraryRef, PackageMetadata, Protocol,
    Registry, RegistryContext, RegistrySpec, Transport,
};
use crate::app::{LibraryConfig, RegistryConfig};
use crate::error::{Error, Result};
use crate::fsutil;

const INDEX_FILE: &str = "index.yaml";

/// Cached index with its fetch time
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedIndex {
    /// Unix timestamp of the fetch
    cached_at: u64,
    index: ChartIndex,
}

pub(crate) struct HelmRegistry {
    config: RegistryConfig,
    transport: Arc<dyn Transport>,
    cache_path: PathBuf,
    ttl: Duration,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn check_uri(uri: &str) -> Result<()> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        Ok(())
    } else {
        Err(Error::InvalidUri {
            uri: uri.to_string(),
            reason: "chart repository URI must start with http:// or https://".to_string(),
        })
    }
}

fn base_url(uri: &str) -> &str {
    uri.trim_end_matches('/')
}

impl HelmRegistry {
    pub(crate) fn new(config: RegistryConfig, ctx: &RegistryContext) -> Result<Self> {
        check_uri(&config.uri)?;
        Ok(Self {
            cache_path: ctx.cache_dir(&config.name).join(INDEX_FILE),
            transport: ctx.transport.clone(),
            ttl: ctx.settings.cache.index_ttl(),
            config,
        })
    }

    /// Load the cached index if it is still fresh
    fn load_cached_index(&self) -> Result<Option<ChartIndex>> {
        let content = match fsutil::read_optional(&self.cache_path)
            .map_err(|e| Error::read(&self.cache_path, e))?
        {
            Some(content) => content,
            None => return Ok(None),
        };

        let cached: CachedIndex =
            serde_yaml_ng::from_str(&content).map_err(|e| Error::parse(&self.cache_path, e))?;

        let age = Duration::from_secs(now_secs().saturating_sub(cached.cached_at));
        if age > self.ttl {
            debug!(registry = %self.config.name, "Index cache expired (age: {:?})", age);
            return Ok(None);
        }

        debug!(registry = %self.config.name, "Using cached index (age: {:?})", age);
        Ok(Some(cached.index))
    }

    fn save_to_cache(&self, index: &ChartIndex) -> Result<()> {
        let cached = CachedIndex {
            cached_at: now_secs(),
            index: index.clone(),
        };
        let content = serde_yaml_ng::to_string(&cached)?;
        fsutil::write_atomic(&self.cache_path, content.as_bytes()).map_err(|e| {
            Error::CacheWriteFailed {
                path: self.cache_path.clone(),
                source: e,
            }
        })?;
        debug!(registry = %self.config.name, "Saved index to {}", self.cache_path.display());
        Ok(())
    }

    fn fetch_index_from(&self, uri: &str) -> Result<ChartIndex> {
        let url = format!("{}/{}", base_url(uri), INDEX_FILE);
        let body = self
            .transport
            .get(&url, None)
            .map_err(|e| e.for_registry(&self.config.name, "fetch index"))?;
        let content = String::from_utf8_lossy(&body);
        ChartIndex::from_yaml(&content).map_err(|e| Error::fetch(&self.config.name, "parse index", e))
    }

    /// The chart index, from cache when fresh
    fn index(&self) -> Result<ChartIndex> {
        if let Some(index) = self.load_cached_index()? {
            return Ok(index);
        }

        let index = self.fetch_index_from(&self.config.uri)?;
        self.save_to_cache(&index)?;
        Ok(index)
    }

    fn resolve_entry(&self, name: &str, version_hint: Option<&str>) -> Result<ChartVersion> {
        let index = self.index()?;
        if index.versions(name).is_none() {
            return Err(Error::PackageNotFound {
                registry: self.config.name.clone(),
                package: name.to_string(),
                available: index.chart_names(),
            });
        }

        index
            .resolve_version(name, version_hint)
            .cloned()
            .ok_or_else(|| Error::VersionNotFound {
                registry: self.config.name.clone(),
                package: name.to_string(),
                version: version_hint.unwrap_or("latest").to_string(),
            })
    }

    fn download_url(&self, entry: &ChartVersion) -> Result<String> {
        let url = entry.download_url().ok_or_else(|| {
            Error::fetch(
                &self.config.name,
                "download chart",
                format!("{} {} has no download URL", entry.name, entry.version),
            )
        })?;

        if url.starts_with("http://") || url.starts_with("https://") {
            Ok(url.to_string())
        } else {
            Ok(format!(
                "{}/{}",
                base_url(&self.config.uri),
                url.trim_start_matches('/')
            ))
        }
    }

    /// Verify the SHA-256 digest of a downloaded chart
    fn verify_digest(&self, bytes: &[u8], expected: &str) -> Result<()> {
        let actual = hex::encode(Sha256::digest(bytes));
        if actual != expected {
            return Err(Error::fetch(
                &self.config.name,
                "verify chart digest",
                format!("expected sha256:{expected}, got sha256:{actual}"),
            ));
        }
        Ok(())
    }

    fn metadata(entry: &ChartVersion) -> PackageMetadata {
        PackageMetadata {
            name: entry.name.clone(),
            description: entry.description.clone(),
            keywords: entry.keywords.clone(),
            version: entry.version.clone(),
            ..Default::default()
        }
    }
}

impl Registry for HelmRegistry {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn protocol(&self) -> Protocol {
        Protocol::Helm
    }

    fn uri(&self) -> &str {
        &self.config.uri
    }

    fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn fetch_spec(&self) -> Result<RegistrySpec> {
        let index = self.index()?;
        let mut spec = RegistrySpec::new();
        for name in index.chart_names() {
            if let Some(latest) = index.latest(&name) {
                spec.libraries.insert(
                    name.clone(),
                    LibraryRef {
                        version: latest.version.clone(),
                        path: name.clone(),
                    },
                );
            }
        }
        Ok(spec)
    }

    fn resolve_package_metadata(
        &self,
        name: &str,
        version_hint: Option<&str>,
    ) -> Result<PackageMetadata> {
        let entry = self.resolve_entry(name, version_hint)?;
        Ok(Self::metadata(&entry))
    }

    fn resolve_package_content(
        &self,
        name: &str,
        alias: &str,
        version_hint: Option<&str>,
        sink: &mut dyn ContentSink,
    ) -> Result<(PackageMetadata, LibraryConfig)> {
        let entry = self.resolve_entry(name, version_hint)?;
        let url = self.download_url(&entry)?;

        info!(
            registry = %self.config.name,
            package = name,
            version = %entry.version,
            "Downloading chart from {}",
            url
        );

        let bytes = self
            .transport
            .get(&url, None)
            .map_err(|e| e.for_registry(&self.config.name, "download chart"))?;

        if let Some(expected) = entry.digest_hex() {
            self.verify_digest(&bytes, &expected)?;
            debug!("Verified digest sha256:{}", expected);
        }

        let unpacked = tempfile::tempdir()?;
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(Cursor::new(&bytes)));
        archive
            .unpack(unpacked.path())
            .map_err(|e| Error::fetch(&self.config.name, "unpack chart", e))?;

        for item in WalkDir::new(unpacked.path())
            .min_depth(1)
            .sort_by_file_name()
        {
            let item = item.map_err(|e| Error::fetch(&self.config.name, "unpack chart", e))?;
            let relative = item
                .path()
                .strip_prefix(unpacked.path())
                .map_err(|e| Error::fetch(&self.config.name, "unpack chart", e))?;

            if item.file_type().is_dir() {
                sink.on_directory(relative)?;
            } else if item.file_type().is_file() {
                let contents = std::fs::read(item.path()).map_err(|e| Error::read(item.path(), e))?;
                sink.on_file(relative, &contents)?;
            }
        }

        let metadata = Self::metadata(&entry);
        let lib = library_for(&self.config.name, &metadata, alias);
        Ok((metadata, lib))
    }

    fn validate_uri(&self, uri: &str) -> Result<()> {
        check_uri(uri)?;
        self.fetch_index_from(uri)
            .map(|_| ())
            .map_err(|e| Error::InvalidUri {
                uri: uri.to_string(),
                reason: e.to_string(),
            })
    }

    fn set_uri(&mut self, uri: &str) -> Result<()> {
        self.validate_uri(uri)?;
        self.config.uri = uri.to_string();
        self.refresh()
    }

    fn refresh(&self) -> Result<()> {
        match std::fs::remove_file(&self.cache_path) {
            Ok(()) => {
                debug!(registry = %self.config.name, "Dropped cached index");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::CacheWriteFailed {
                path: self.cache_path.clone(),
                source: e,
            }),
        }
    }
}
