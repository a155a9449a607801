use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use unfurl_core::config::FetchConfig;

/// Body POSTed to the source URL to expand one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionRequest {
    pub target: String,
    #[serde(rename = "extant-nodes")]
    pub extant_nodes: Vec<String>,
}

/// Answer to the initial GET: headers (names lowercased) and the document.
#[derive(Debug, Clone, Default)]
pub struct SourceResponse {
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl SourceResponse {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("could not build http client: {0}")]
    Client(String),
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
}

impl FetchError {
    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
pub trait FetchClient: Send + Sync {
    /// GET the initial document.
    async fn open(&self, url: &str) -> Result<SourceResponse, FetchError>;

    /// POST an expansion request, returning the response document.
    async fn expand(&self, url: &str, request: &ExpansionRequest) -> Result<Bytes, FetchError>;
}

pub struct HttpFetchClient {
    client: Client,
}

impl HttpFetchClient {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FetchClient for HttpFetchClient {
    async fn open(&self, url: &str) -> Result<SourceResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        Ok(SourceResponse { headers, body })
    }

    async fn expand(&self, url: &str, request: &ExpansionRequest) -> Result<Bytes, FetchError> {
        tracing::debug!(
            "POST {} target={} extant={}",
            url,
            request.target,
            request.extant_nodes.len()
        );
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))
    }
}

/// In-process source for tests and offline use: canned documents keyed by
/// URL (for `open`) and by expansion target (for `expand`). Every expansion
/// request is kept for inspection.
#[derive(Default)]
pub struct ScriptedFetchClient {
    sources: Mutex<HashMap<String, SourceResponse>>,
    expansions: Mutex<HashMap<String, Bytes>>,
    requests: Mutex<Vec<ExpansionRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedFetchClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(self, url: &str, response: SourceResponse) -> Self {
        lock(&self.sources).insert(url.to_string(), response);
        self
    }

    pub fn with_expansion(self, target: &str, body: impl Into<Bytes>) -> Self {
        lock(&self.expansions).insert(target.to_string(), body.into());
        self
    }

    pub fn requests(&self) -> Vec<ExpansionRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl FetchClient for ScriptedFetchClient {
    async fn open(&self, url: &str) -> Result<SourceResponse, FetchError> {
        lock(&self.sources)
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }

    async fn expand(&self, url: &str, request: &ExpansionRequest) -> Result<Bytes, FetchError> {
        lock(&self.requests).push(request.clone());
        lock(&self.expansions)
            .get(&request.target)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}
