//! Reachability probe for externally hosted assets.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::ExternalProbe;

/// Issues an HTTP `HEAD` for `http(s)://` URLs and checks file existence
/// for `file://` URLs.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> DomainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::ValidationFailed(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ExternalProbe for HttpProbe {
    async fn probe(&self, url: &str) -> DomainResult<()> {
        if let Some(path) = url.strip_prefix("file://") {
            return if tokio::fs::try_exists(Path::new(path)).await? {
                Ok(())
            } else {
                Err(DomainError::AssetNotFound(url.to_string()))
            };
        }

        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| DomainError::AssetNotFound(format!("{url}: {e}")))?;
        debug!(url, status = response.status().as_u16(), "probed external asset");
        if response.status().is_success() {
            Ok(())
        } else {
            Err(DomainError::AssetNotFound(format!(
                "{url}: HTTP {}",
                response.status()
            )))
        }
    }
}
