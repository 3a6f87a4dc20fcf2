//! Registry hosted in a GitHub repository
//!
//! URIs look like `github.com/<org>/<repo>/tree/<ref>/<path>`. Packages are
//! pinned to commit SHAs: a version hint names a branch, tag or commit and
//! is resolved through the commits API before anything else is fetched.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    library_for, ContentSink, PackageMetadata, Protocol, Registry, RegistryContext, RegistrySpec,
    Transport, PARTS_FILE, REGISTRY_FILE,
};
use crate::app::{LibraryConfig, RegistryConfig};
use crate::error::{Error, Result};
use crate::fsutil;

const DEFAULT_REF: &str = "master";
const ACCEPT_SHA: &str = "application/vnd.github.v3.sha";
const ACCEPT_RAW: &str = "application/vnd.github.v3.raw";
const ACCEPT_JSON: &str = "application/vnd.github.v3+json";

static COMMIT_SHA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{40}$").expect("valid sha pattern"));

/// A parsed GitHub registry URI
#[derive(Debug, Clone, PartialEq, Eq)]
struct Location {
    host: String,
    org: String,
    repo: String,
    git_ref: String,
    /// Registry directory inside the repository, without slashes at either end
    path: String,
}

impl Location {
    fn parse(uri: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = uri
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        let mut segments = trimmed.split('/');

        let host = segments.next().filter(|s| !s.is_empty());
        let org = segments.next().filter(|s| !s.is_empty());
        let repo = segments.next().filter(|s| !s.is_empty());
        let (host, org, repo) = match (host, org, repo) {
            (Some(host), Some(org), Some(repo)) => (host, org, repo.trim_end_matches(".git")),
            _ => return Err(invalid("expected <host>/<org>/<repo>[/tree/<ref>/<path>]")),
        };

        let (git_ref, path) = match segments.next() {
            None => (DEFAULT_REF.to_string(), String::new()),
            Some("tree") | Some("blob") => {
                let git_ref = segments
                    .next()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| invalid("missing ref after 'tree'"))?;
                let rest: Vec<&str> = segments.filter(|s| !s.is_empty()).collect();
                (git_ref.to_string(), rest.join("/"))
            }
            Some(other) => {
                return Err(invalid(&format!(
                    "unexpected segment '{other}' (expected 'tree')"
                )))
            }
        };

        Ok(Self {
            host: host.to_string(),
            org: org.to_string(),
            repo: repo.to_string(),
            git_ref,
            path,
        })
    }

    fn api_base(&self) -> String {
        if self.host == "github.com" {
            "https://api.github.com".to_string()
        } else {
            format!("https://{}/api/v3", self.host)
        }
    }

    fn commits_url(&self, git_ref: &str) -> String {
        format!(
            "{}/repos/{}/{}/commits/{}",
            self.api_base(),
            self.org,
            self.repo,
            git_ref
        )
    }

    /// Contents API URL for a path relative to the registry root
    fn contents_url(&self, relative: &str, sha: &str) -> String {
        self.repo_contents_url(&self.repo_path(relative), sha)
    }

    fn repo_contents_url(&self, repo_path: &str, sha: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}?ref={}",
            self.api_base(),
            self.org,
            self.repo,
            repo_path,
            sha
        )
    }

    fn repo_path(&self, relative: &str) -> String {
        let relative = relative.trim_matches('/');
        match (self.path.is_empty(), relative.is_empty()) {
            (true, _) => relative.to_string(),
            (false, true) => self.path.clone(),
            (false, false) => format!("{}/{}", self.path, relative),
        }
    }

    /// Strip the registry directory from a repository path
    fn registry_relative<'a>(&self, repo_path: &'a str) -> &'a str {
        if self.path.is_empty() {
            return repo_path;
        }
        repo_path
            .strip_prefix(self.path.as_str())
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(repo_path)
    }
}

/// One item of a contents API directory listing
#[derive(Debug, Deserialize)]
struct ContentEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

pub(crate) struct GithubRegistry {
    config: RegistryConfig,
    location: Location,
    transport: Arc<dyn Transport>,
    cache_dir: PathBuf,
}

impl GithubRegistry {
    pub(crate) fn new(config: RegistryConfig, ctx: &RegistryContext) -> Result<Self> {
        let location = Location::parse(&config.uri)?;
        Ok(Self {
            cache_dir: ctx.cache_dir(&config.name),
            config,
            location,
            transport: ctx.transport.clone(),
        })
    }

    fn get(&self, url: &str, accept: &str, operation: &str) -> Result<Vec<u8>> {
        self.transport
            .get(url, Some(accept))
            .map_err(|e| e.for_registry(&self.config.name, operation))
    }

    /// Resolve a branch, tag or commit to a full commit SHA
    fn resolve_sha(&self, location: &Location, package: &str, hint: Option<&str>) -> Result<String> {
        let git_ref = hint
            .filter(|h| !h.is_empty())
            .unwrap_or(location.git_ref.as_str());
        if COMMIT_SHA.is_match(git_ref) {
            return Ok(git_ref.to_string());
        }

        let body = match self.transport.get(&location.commits_url(git_ref), Some(ACCEPT_SHA)) {
            Ok(body) => body,
            Err(e) if e.is_not_found() && hint.is_some() => {
                return Err(Error::VersionNotFound {
                    registry: self.config.name.clone(),
                    package: package.to_string(),
                    version: git_ref.to_string(),
                })
            }
            Err(e) => return Err(e.for_registry(&self.config.name, "resolve commit")),
        };

        let sha = String::from_utf8_lossy(&body).trim().to_string();
        if !COMMIT_SHA.is_match(&sha) {
            return Err(Error::fetch(
                &self.config.name,
                "resolve commit",
                format!("'{git_ref}' resolved to unexpected value '{sha}'"),
            ));
        }

        debug!(registry = %self.config.name, "Resolved {} to {}", git_ref, sha);
        Ok(sha)
    }

    fn fetch_spec_at(&self, location: &Location, sha: &str) -> Result<RegistrySpec> {
        let cache_path = self.cache_dir.join(sha).join(REGISTRY_FILE);
        if let Some(content) =
            fsutil::read_optional(&cache_path).map_err(|e| Error::read(&cache_path, e))?
        {
            debug!(registry = %self.config.name, "Using cached {}", cache_path.display());
            return RegistrySpec::from_yaml(&cache_path, &content);
        }

        let body = self.get(
            &location.contents_url(REGISTRY_FILE, sha),
            ACCEPT_RAW,
            "fetch registry.yaml",
        )?;
        let content = String::from_utf8_lossy(&body).into_owned();
        let spec = RegistrySpec::from_yaml(&cache_path, &content)?;

        fsutil::write_atomic(&cache_path, content.as_bytes()).map_err(|e| {
            Error::CacheWriteFailed {
                path: cache_path.clone(),
                source: e,
            }
        })?;
        debug!(registry = %self.config.name, "Cached registry spec at {}", cache_path.display());

        Ok(spec)
    }

    fn package_dir(&self, name: &str) -> Result<String> {
        let spec = self.fetch_spec()?;
        spec.package_dir(name)
            .map(str::to_string)
            .ok_or_else(|| Error::PackageNotFound {
                registry: self.config.name.clone(),
                package: name.to_string(),
                available: spec.package_names(),
            })
    }

    fn walk(&self, repo_path: &str, sha: &str, sink: &mut dyn ContentSink) -> Result<()> {
        let body = self.get(
            &self.location.repo_contents_url(repo_path, sha),
            ACCEPT_JSON,
            "list package contents",
        )?;
        let entries: Vec<ContentEntry> = serde_json::from_slice(&body)
            .map_err(|e| Error::fetch(&self.config.name, "list package contents", e))?;

        for entry in entries {
            let relative = Path::new(self.location.registry_relative(&entry.path));
            match entry.kind.as_str() {
                "dir" => {
                    sink.on_directory(relative)?;
                    self.walk(&entry.path, sha, sink)?;
                }
                "file" => {
                    let contents = self.get(
                        &self.location.repo_contents_url(&entry.path, sha),
                        ACCEPT_RAW,
                        "fetch package file",
                    )?;
                    sink.on_file(relative, &contents)?;
                }
                other => debug!("Skipping {} entry {}", other, entry.path),
            }
        }
        Ok(())
    }
}

impl Registry for GithubRegistry {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn protocol(&self) -> Protocol {
        Protocol::Github
    }

    fn uri(&self) -> &str {
        &self.config.uri
    }

    fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn fetch_spec(&self) -> Result<RegistrySpec> {
        let sha = self.resolve_sha(&self.location, REGISTRY_FILE, None)?;
        self.fetch_spec_at(&self.location, &sha)
    }

    fn resolve_package_metadata(
        &self,
        name: &str,
        version_hint: Option<&str>,
    ) -> Result<PackageMetadata> {
        let dir = self.package_dir(name)?;
        let sha = self.resolve_sha(&self.location, name, version_hint)?;

        let parts_path = format!("{dir}/{PARTS_FILE}");
        let body = self.get(
            &self.location.contents_url(&parts_path, &sha),
            ACCEPT_RAW,
            "fetch parts.yaml",
        )?;
        let mut metadata: PackageMetadata = serde_yaml_ng::from_slice(&body)
            .map_err(|e| Error::parse(Path::new(&parts_path), e))?;
        if metadata.name.is_empty() {
            metadata.name = name.to_string();
        }
        metadata.version = sha;

        Ok(metadata)
    }

    fn resolve_package_content(
        &self,
        name: &str,
        alias: &str,
        version_hint: Option<&str>,
        sink: &mut dyn ContentSink,
    ) -> Result<(PackageMetadata, LibraryConfig)> {
        let metadata = self.resolve_package_metadata(name, version_hint)?;
        let dir = self.package_dir(name)?;

        info!(
            registry = %self.config.name,
            package = name,
            version = %metadata.version,
            "Fetching package contents"
        );

        sink.on_directory(Path::new(&dir))?;
        self.walk(&self.location.repo_path(&dir), &metadata.version, sink)?;

        let lib = library_for(&self.config.name, &metadata, alias);
        Ok((metadata, lib))
    }

    fn validate_uri(&self, uri: &str) -> Result<()> {
        let location = Location::parse(uri)?;
        let invalid = |e: Error| Error::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        };

        let sha = self
            .resolve_sha(&location, REGISTRY_FILE, None)
            .map_err(invalid)?;
        self.get(
            &location.contents_url(REGISTRY_FILE, &sha),
            ACCEPT_RAW,
            "fetch registry.yaml",
        )
        .map_err(invalid)?;
        Ok(())
    }

    fn set_uri(&mut self, uri: &str) -> Result<()> {
        self.validate_uri(uri)?;
        self.location = Location::parse(uri)?;
        self.config.uri = uri.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::registry::StaticTransport;
    use tempfile::TempDir;

    const SHA: &str = "40285d8a14f1ac5787e405e1023cf0c07f6aa28c";
    const API: &str = "https://api.github.com/repos/ksonnet/parts";

    fn transport() -> StaticTransport {
        StaticTransport::new()
            .with(format!("{API}/commits/master"), SHA)
            .with(
                format!("{API}/contents/incubator/registry.yaml?ref={SHA}"),
                "apiVersion: '0.1.0'\nkind: ksonnet.io/registry\nlibraries:\n  redis:\n    path: redis\n    version: master\n",
            )
            .with(
                format!("{API}/contents/incubator/redis/parts.yaml?ref={SHA}"),
                "name: redis\ndescription: Redis\n",
            )
            .with(
                format!("{API}/contents/incubator/redis?ref={SHA}"),
                r#"[{"name":"parts.yaml","path":"incubator/redis/parts.yaml","type":"file"},
                    {"name":"prototypes","path":"incubator/redis/prototypes","type":"dir"}]"#,
            )
            .with(
                format!("{API}/contents/incubator/redis/prototypes?ref={SHA}"),
                r#"[{"name":"redis.jsonnet","path":"incubator/redis/prototypes/redis.jsonnet","type":"file"}]"#,
            )
            .with(
                format!("{API}/contents/incubator/redis/prototypes/redis.jsonnet?ref={SHA}"),
                "// @name io.ksonnet.pkg.redis",
            )
    }

    fn github_registry(app_root: &Path, transport: Arc<StaticTransport>) -> GithubRegistry {
        let ctx = RegistryContext {
            app_root: app_root.to_path_buf(),
            transport,
            settings: Settings::default(),
        };
        GithubRegistry::new(
            RegistryConfig::new(
                "incubator",
                Protocol::Github,
                "github.com/ksonnet/parts/tree/master/incubator",
            ),
            &ctx,
        )
        .unwrap()
    }

    #[derive(Default)]
    struct RecordingSink {
        entries: Vec<String>,
    }

    impl ContentSink for RecordingSink {
        fn on_file(&mut self, path: &Path, _contents: &[u8]) -> Result<()> {
            self.entries.push(format!("file {}", path.display()));
            Ok(())
        }

        fn on_directory(&mut self, path: &Path) -> Result<()> {
            self.entries.push(format!("dir {}", path.display()));
            Ok(())
        }
    }

    #[test]
    fn test_parse_location() {
        let location = Location::parse("github.com/ksonnet/parts/tree/master/incubator").unwrap();
        assert_eq!(location.org, "ksonnet");
        assert_eq!(location.repo, "parts");
        assert_eq!(location.git_ref, "master");
        assert_eq!(location.path, "incubator");

        let location = Location::parse("https://github.com/ksonnet/parts.git").unwrap();
        assert_eq!(location.git_ref, DEFAULT_REF);
        assert_eq!(location.path, "");
        assert_eq!(location.repo_path("redis"), "redis");

        let location = Location::parse("ghe.example.com/org/repo/tree/v1/a/b/").unwrap();
        assert_eq!(location.path, "a/b");
        assert_eq!(location.api_base(), "https://ghe.example.com/api/v3");
        assert_eq!(location.registry_relative("a/b/redis/parts.yaml"), "redis/parts.yaml");

        assert!(Location::parse("github.com/ksonnet").is_err());
        assert!(Location::parse("github.com/ksonnet/parts/commits/master").is_err());
        assert!(Location::parse("github.com/ksonnet/parts/tree").is_err());
    }

    #[test]
    fn test_fetch_spec_is_cached_by_sha() {
        let temp_dir = TempDir::new().unwrap();
        let transport = Arc::new(transport());
        let registry = github_registry(temp_dir.path(), transport.clone());

        let spec = registry.fetch_spec().unwrap();
        assert_eq!(spec.package_names(), vec!["redis"]);

        let cached = temp_dir
            .path()
            .join(".ksonnet/registries/incubator")
            .join(SHA)
            .join(REGISTRY_FILE);
        assert!(cached.is_file());

        registry.fetch_spec().unwrap();
        let spec_fetches = transport
            .requests()
            .iter()
            .filter(|url| url.contains("registry.yaml"))
            .count();
        assert_eq!(spec_fetches, 1);
    }

    #[test]
    fn test_metadata_pins_commit() {
        let temp_dir = TempDir::new().unwrap();
        let registry = github_registry(temp_dir.path(), Arc::new(transport()));

        let metadata = registry.resolve_package_metadata("redis", None).unwrap();
        assert_eq!(metadata.version, SHA);
        assert_eq!(metadata.description, "Redis");

        // A full SHA is used without asking the commits API
        let metadata = registry.resolve_package_metadata("redis", Some(SHA)).unwrap();
        assert_eq!(metadata.version, SHA);

        assert!(matches!(
            registry.resolve_package_metadata("redis", Some("no-such-branch")),
            Err(Error::VersionNotFound { .. })
        ));
        assert!(matches!(
            registry.resolve_package_metadata("mysql", None),
            Err(Error::PackageNotFound { .. })
        ));
    }

    #[test]
    fn test_content_walk() {
        let temp_dir = TempDir::new().unwrap();
        let registry = github_registry(temp_dir.path(), Arc::new(transport()));

        let mut sink = RecordingSink::default();
        let (metadata, lib) = registry
            .resolve_package_content("redis", "redis", None, &mut sink)
            .unwrap();

        assert_eq!(lib.version, metadata.version);
        assert_eq!(
            sink.entries,
            vec![
                "dir redis",
                "file redis/parts.yaml",
                "dir redis/prototypes",
                "file redis/prototypes/redis.jsonnet",
            ]
        );
    }

    #[test]
    fn test_validate_uri_reports_failures() {
        let temp_dir = TempDir::new().unwrap();
        let registry = github_registry(temp_dir.path(), Arc::new(transport()));

        registry
            .validate_uri("github.com/ksonnet/parts/tree/master/incubator")
            .unwrap();
        assert!(matches!(
            registry.validate_uri("github.com/ksonnet/parts/tree/master/stable"),
            Err(Error::InvalidUri { .. })
        ));
        assert!(matches!(
            registry.validate_uri("github.com/nobody/nothing"),
            Err(Error::InvalidUri { .. })
        ));
    }
}
