//! Fetching page markup through a CORS-relaxing proxy.
//!
//! The proxy takes the target URL as the whole, unencoded query string
//! (`https://proxy.corsfix.com/?https://example.com`). Image loads relayed at
//! capture time use the `?url=` form instead, see [`ProxyConfig::image_proxy_prefix`].

use crate::{Error, Fetch, Result};
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Header asking the proxy to serve and store cached responses
pub const CACHE_HEADER: &str = "x-corsfix-cache";

/// Proxy endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Endpoint the target URL is appended to
    pub endpoint: String,
    /// Send the cache-enabling header
    pub cache: bool,
    pub user_agent: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://proxy.corsfix.com/".to_string(),
            cache: true,
            user_agent: concat!("s8t/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_ms: 30000,
        }
    }
}

impl ProxyConfig {
    /// The proxied address of a page fetch
    pub fn page_url(&self, target_url: &str) -> String {
        format!("{}?{}", self.endpoint, target_url.trim())
    }

    /// Prefix for image loads relayed at capture time; the capturer appends the
    /// percent-encoded image address
    pub fn image_proxy_prefix(&self) -> String {
        format!("{}?url=", self.endpoint)
    }
}

/// Single-attempt fetcher backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct ProxyFetcher {
    client: Client,
    config: ProxyConfig,
}

impl ProxyFetcher {
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }
}

impl Fetch for ProxyFetcher {
    async fn fetch(&self, target_url: &str) -> Result<String> {
        let url = self.config.page_url(target_url);
        debug!("fetching {} via proxy", target_url);

        let mut req = self.client.get(&url);
        if self.config.cache {
            req = req.header(CACHE_HEADER, "true");
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::NetworkError(format!("Failed to fetch {}: {}", target_url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| Error::NetworkError(format!("Failed to read response body: {}", e)))?;
        debug!("fetched {} bytes for {}", body.len(), target_url);
        Ok(body)
    }
}
