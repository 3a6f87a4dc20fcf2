//! HTTP transport used by the github and helm registries

use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::config::HttpSettings;
use crate::error::{Error, Result};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
}

impl TransportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::Status { status: 404, .. })
    }

    /// Attach registry and operation context
    pub fn for_registry(self, registry: &str, operation: &str) -> Error {
        match self {
            TransportError::Connect { .. } => Error::unreachable(registry, operation, self),
            TransportError::Status { .. } => Error::fetch(registry, operation, self),
        }
    }
}

/// Blocking GET over some transport
pub trait Transport: Send + Sync {
    /// Fetch `url`, sending `accept` as the Accept header when given
    fn get(&self, url: &str, accept: Option<&str>) -> std::result::Result<Vec<u8>, TransportError>;
}

/// [`Transport`] backed by a blocking reqwest client
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.timeout())
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, accept: Option<&str>) -> std::result::Result<Vec<u8>, TransportError> {
        tracing::debug!("GET {}", url);

        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(reqwest::header::ACCEPT, accept);
        }

        let response = request.send().map_err(|e| TransportError::Connect {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().map_err(|e| TransportError::Connect {
            url: url.to_string(),
            reason: format!("failed to read response body: {e}"),
        })?;

        Ok(bytes.to_vec())
    }
}

/// In-memory transport serving canned responses by URL
#[derive(Default)]
pub struct StaticTransport {
    responses: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
}

impl StaticTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.responses.insert(url.into(), body.into());
        self
    }

    /// URLs requested so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl Transport for StaticTransport {
    fn get(&self, url: &str, _accept: Option<&str>) -> std::result::Result<Vec<u8>, TransportError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| TransportError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}
