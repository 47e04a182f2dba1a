//! HTTP client for a remote GeoDataSource.

use crate::config::UpstreamConfig;
use crate::error::GatewayError;
use axum::body::Bytes;
use std::time::Duration;
use tracing::debug;

pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn from_config(config: &UpstreamConfig) -> reqwest::Result<Self> {
        Self::new(config.base_url.clone(), config.timeout())
    }

    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// GETs `path` and returns the body untouched. Any non-2xx is an error.
    pub async fn fetch(&self, path: &str) -> Result<Bytes, GatewayError> {
        let url = self.url_for(path);
        debug!("Forwarding to {url}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(GatewayError::from_request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::UpstreamBadStatus(status));
        }

        response.bytes().await.map_err(GatewayError::from_request)
    }
}
