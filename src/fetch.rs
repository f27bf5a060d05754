use crate::error::{Result, VastError};
use async_trait::async_trait;
use log::debug;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Blocking fetch capability used by synchronous resolution
pub trait Fetcher {
    fn fetch(&self, locator: &str, timeout: Duration) -> Result<String>;
}

/// Non-blocking fetch capability used by asynchronous resolution
#[async_trait]
pub trait AsyncFetcher: Send + Sync {
    async fn fetch(&self, locator: &str, timeout: Duration) -> Result<String>;
}

/// Fetches VAST documents from `file://` URLs, local paths and http(s) URLs
#[derive(Debug, Default, Clone)]
pub struct HttpFetcher;

impl HttpFetcher {
    pub fn new() -> Self {
        HttpFetcher
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, locator: &str, timeout: Duration) -> Result<String> {
        if let Some(path) = local_path(locator) {
            return read_local(&path);
        }

        let url = url::Url::parse(locator)?;
        let req_id = request_id();
        debug!("[{}] Fetching from URL: {}", req_id, url);
        let start_time = Instant::now();

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VastError::Other(format!("Failed to build HTTP client: {}", e)))?;

        let response = client
            .get(url)
            .send()
            .map_err(|e| request_error(locator, timeout, &req_id, start_time, e))?;

        debug!("[{}] Received response in {:?}", req_id, start_time.elapsed());
        check_status(locator, response.status())?;

        let body = response.text().map_err(|e| VastError::FetchFailed {
            url: locator.to_string(),
            reason: format!("Failed to read response body: {}", e),
        })?;

        debug!("[{}] Total request completed in {:?}", req_id, start_time.elapsed());
        Ok(body)
    }
}

#[async_trait]
impl AsyncFetcher for HttpFetcher {
    async fn fetch(&self, locator: &str, timeout: Duration) -> Result<String> {
        if let Some(path) = local_path(locator) {
            debug!("Reading from file: {}", path.display());
            return tokio::fs::read_to_string(path)
                .await
                .map_err(VastError::IoError);
        }

        let url = url::Url::parse(locator)?;
        let req_id = request_id();
        debug!("[{}] Fetching from URL: {}", req_id, url);
        let start_time = Instant::now();

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VastError::Other(format!("Failed to build HTTP client: {}", e)))?;

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(locator, timeout, &req_id, start_time, e))?;

        debug!("[{}] Received response in {:?}", req_id, start_time.elapsed());
        check_status(locator, response.status())?;

        let body = response.text().await.map_err(|e| VastError::FetchFailed {
            url: locator.to_string(),
            reason: format!("Failed to read response body: {}", e),
        })?;

        debug!("[{}] Total request completed in {:?}", req_id, start_time.elapsed());
        Ok(body)
    }
}

/// Serves pre-fetched documents from memory, keyed by locator
#[derive(Debug, Default, Clone)]
pub struct CachedFetcher {
    documents: HashMap<String, String>,
}

impl CachedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, locator: impl Into<String>, xml: impl Into<String>) {
        self.documents.insert(locator.into(), xml.into());
    }

    pub fn with(mut self, locator: impl Into<String>, xml: impl Into<String>) -> Self {
        self.insert(locator, xml);
        self
    }

    fn lookup(&self, locator: &str) -> Result<String> {
        self.documents
            .get(locator)
            .cloned()
            .ok_or_else(|| VastError::FetchFailed {
                url: locator.to_string(),
                reason: "not in cache".to_string(),
            })
    }
}

impl Fetcher for CachedFetcher {
    fn fetch(&self, locator: &str, _timeout: Duration) -> Result<String> {
        self.lookup(locator)
    }
}

#[async_trait]
impl AsyncFetcher for CachedFetcher {
    async fn fetch(&self, locator: &str, _timeout: Duration) -> Result<String> {
        self.lookup(locator)
    }
}

/// Local file behind a `file://` URL or a plain path that exists
fn local_path(locator: &str) -> Option<PathBuf> {
    if let Some(path) = locator.strip_prefix("file://") {
        #[cfg(target_os = "windows")]
        let path = path.trim_start_matches('/');

        let path_buf = PathBuf::from(path);
        if path_buf.exists() {
            return Some(path_buf);
        }
        // Check if we need to look in the samples directory
        let samples_path = PathBuf::from("samples").join(path);
        if samples_path.exists() {
            return Some(samples_path);
        }
        return Some(path_buf);
    }

    if Path::new(locator).exists() {
        return Some(PathBuf::from(locator));
    }

    None
}

fn read_local(path: &Path) -> Result<String> {
    debug!("Reading from file: {}", path.display());
    fs::read_to_string(path).map_err(VastError::IoError)
}

/// Random request id for correlating fetch log lines
fn request_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect()
}

fn request_error(
    locator: &str,
    timeout: Duration,
    req_id: &str,
    start_time: Instant,
    e: reqwest::Error,
) -> VastError {
    debug!("[{}] Request failed after {:?}", req_id, start_time.elapsed());
    if e.is_timeout() {
        VastError::Timeout {
            url: locator.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        VastError::FetchFailed {
            url: locator.to_string(),
            reason: e.to_string(),
        }
    }
}

fn check_status(locator: &str, status: reqwest::StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(VastError::FetchFailed {
            url: locator.to_string(),
            reason: format!("HTTP status {}", status),
        })
    }
}
