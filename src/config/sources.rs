//! Manifest source resolution
//!
//! Priority:
//! 1. `OMNI_MANIFEST_URL` env var (a single URL, no fallback)
//! 2. The public manifests below, tried in order until one answers
//!
//! # Examples
//!
//! ```bash
//! # Pin a self-hosted manifest
//! export OMNI_MANIFEST_URL="https://wallets.example.org/manifest.json"
//! ```

use crate::config::ManifestSource;
use url::Url;

/// Environment variable overriding the manifest location
pub const MANIFEST_URL_ENV: &str = "OMNI_MANIFEST_URL";

/// Public manifests, mirror second
mod defaults {
    pub const PRIMARY: &str =
        "https://raw.githubusercontent.com/hot-dao/near-selector/refs/heads/main/repository/manifest.json";
    pub const MIRROR: &str =
        "https://cdn.jsdelivr.net/gh/azbang/hot-connector/repository/manifest.json";
}

/// Ordered list of manifest URLs to try
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSources {
    urls: Vec<String>,
}

impl ManifestSources {
    /// Built-in fallback list
    pub fn defaults() -> Self {
        Self {
            urls: vec![defaults::PRIMARY.to_string(), defaults::MIRROR.to_string()],
        }
    }

    /// Resolve from the environment, falling back to the defaults
    pub fn from_env() -> Self {
        match std::env::var(MANIFEST_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => {
                tracing::debug!("Using {} for manifest", MANIFEST_URL_ENV);
                Self::with_urls(vec![url])
            }
            _ => Self::defaults(),
        }
    }

    /// Sources for a configured [`ManifestSource`]; `None` for inline manifests
    pub fn for_source(source: &ManifestSource) -> Option<Self> {
        match source {
            ManifestSource::Default => Some(Self::from_env()),
            ManifestSource::Url(url) => Some(Self::with_urls(vec![url.clone()])),
            ManifestSource::Inline(_) => None,
        }
    }

    /// Create with explicit URLs. Entries that do not parse as http(s) URLs are dropped.
    pub fn with_urls(urls: Vec<String>) -> Self {
        let urls = urls
            .into_iter()
            .filter(|raw| match Url::parse(raw) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => true,
                Ok(url) => {
                    tracing::warn!(url = %raw, scheme = url.scheme(), "Ignoring manifest URL with unsupported scheme");
                    false
                }
                Err(e) => {
                    tracing::warn!(url = %raw, error = %e, "Ignoring invalid manifest URL");
                    false
                }
            })
            .collect();
        Self { urls }
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

impl Default for ManifestSources {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_ordered() {
        let sources = ManifestSources::defaults();
        assert_eq!(sources.urls().len(), 2);
        assert_eq!(sources.urls()[0], defaults::PRIMARY);
        assert_eq!(sources.urls()[1], defaults::MIRROR);
    }

    #[test]
    fn invalid_urls_are_dropped() {
        let sources = ManifestSources::with_urls(vec![
            "not a url".to_string(),
            "ftp://example.org/manifest.json".to_string(),
            "https://example.org/manifest.json".to_string(),
        ]);
        assert_eq!(sources.urls(), ["https://example.org/manifest.json"]);
    }

    #[test]
    fn explicit_url_source_has_no_fallback() {
        let source = ManifestSource::Url("https://example.org/m.json".to_string());
        let sources = ManifestSources::for_source(&source).unwrap();
        assert_eq!(sources.urls(), ["https://example.org/m.json"]);
        assert!(ManifestSources::for_source(&ManifestSource::Inline(Default::default())).is_none());
    }
}
