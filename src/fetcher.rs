use std::time::Duration;

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::{
    image_classifier::{classify, ImageFormat},
    info, warn, APP_NAME, DEBUG_NAME,
};

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("{transport}: HTTP {status}")]
    Status { transport: String, status: u16 },

    #[error("{transport}: {message}")]
    Transport { transport: String, message: String },

    #[error("{transport}: empty response body")]
    Empty { transport: String },

    #[error("no transport configured")]
    NoTransport,
}

/// Raw bytes returned by one transport, with the URL they finally came from.
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    pub bytes: Vec<u8>,
    pub final_url: String,
}

/// One way of turning a URL into bytes.
pub trait Transport: Send {
    fn label(&self) -> &str;
    fn get(&self, url: &str) -> Result<FetchedBytes, FetchError>;
}

/// A downloaded payload. Lives only for the duration of one prepare.
#[derive(Debug, Clone)]
pub struct WallpaperImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub source_url: String,
    pub fetched_at: DateTime<Local>,
}

pub struct HttpTransport {
    label: String,
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// `use_proxy = false` bypasses system and environment proxies.
    pub fn new(use_proxy: bool, timeout: Duration) -> Result<Self, FetchError> {
        let label = if use_proxy { "proxy" } else { "direct" }.to_string();

        let mut builder = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION")));
        if !use_proxy {
            builder = builder.no_proxy();
        }

        let client = builder.build().map_err(|e| FetchError::Transport {
            transport: label.clone(),
            message: e.to_string(),
        })?;

        Ok(Self { label, client })
    }
}

impl Transport for HttpTransport {
    fn label(&self) -> &str {
        &self.label
    }

    fn get(&self, url: &str) -> Result<FetchedBytes, FetchError> {
        let transport_err = |e: reqwest::Error| FetchError::Transport {
            transport: self.label.clone(),
            message: e.to_string(),
        };

        let response = self.client.get(url).send().map_err(transport_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                transport: self.label.clone(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let bytes = response.bytes().map_err(transport_err)?.to_vec();
        if bytes.is_empty() {
            return Err(FetchError::Empty {
                transport: self.label.clone(),
            });
        }

        Ok(FetchedBytes { bytes, final_url })
    }
}

/// Tries each transport in order and returns the first success.
pub struct Fetcher {
    transports: Vec<Box<dyn Transport>>,
}

impl Fetcher {
    pub fn new(transports: Vec<Box<dyn Transport>>) -> Self {
        Self { transports }
    }

    /// Proxy-aware client first, then a direct connection.
    pub fn http() -> Self {
        let mut transports: Vec<Box<dyn Transport>> = Vec::new();
        for use_proxy in [true, false] {
            match HttpTransport::new(use_proxy, FETCH_TIMEOUT) {
                Ok(t) => transports.push(Box::new(t)),
                Err(e) => warn!("[{}][FETCH] Could not build HTTP client: {}", DEBUG_NAME, e),
            }
        }
        Self::new(transports)
    }

    pub fn fetch(&self, url: &str) -> Result<WallpaperImage, FetchError> {
        let mut last_err = FetchError::NoTransport;

        for transport in &self.transports {
            match transport.get(url) {
                Ok(fetched) => {
                    info!(
                        "[{}][FETCH] {} bytes via {} from {}",
                        DEBUG_NAME,
                        fetched.bytes.len(),
                        transport.label(),
                        fetched.final_url
                    );
                    return Ok(WallpaperImage {
                        format: classify(&fetched.bytes),
                        bytes: fetched.bytes,
                        source_url: fetched.final_url,
                        fetched_at: Local::now(),
                    });
                }
                Err(e) => {
                    warn!("[{}][FETCH] {} failed for {}: {}", DEBUG_NAME, transport.label(), url, e);
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }
}
