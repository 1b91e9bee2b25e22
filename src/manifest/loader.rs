//! Manifest fetching with ordered fallback

use super::ManifestDocument;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Fetches a manifest document from a URL
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> crate::Result<ManifestDocument>;
}

/// Plain HTTP GET fetcher
pub struct HttpManifestFetcher {
    client: Client,
}

impl HttpManifestFetcher {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Create with a request timeout
    pub fn with_timeout(timeout: Duration) -> crate::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Default for HttpManifestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ManifestFetcher for HttpManifestFetcher {
    async fn fetch(&self, url: &str) -> crate::Result<ManifestDocument> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json::<ManifestDocument>().await?)
    }
}

/// Try each URL in order and return the first manifest that loads
pub async fn load_manifest(
    fetcher: &dyn ManifestFetcher,
    urls: &[String],
) -> crate::Result<ManifestDocument> {
    for url in urls {
        match fetcher.fetch(url).await {
            Ok(document) => {
                tracing::info!(
                    url = %url,
                    wallets = document.wallets.len(),
                    version = %document.version,
                    "Loaded wallet manifest"
                );
                return Ok(document);
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Manifest source failed, trying next");
            }
        }
    }

    Err(crate::Error::ManifestLoad(format!(
        "all {} manifest sources failed",
        urls.len()
    )))
}
