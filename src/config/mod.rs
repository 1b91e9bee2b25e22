//! Configuration for the wallet connector

pub mod sources;

use crate::manifest::ManifestDocument;
use crate::wallet::Network;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

pub use sources::{ManifestSources, MANIFEST_URL_ENV};

/// Where the wallet manifest comes from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestSource {
    /// Built-in public manifests, tried in order
    #[default]
    Default,
    /// A single remote manifest
    Url(String),
    /// A manifest supplied by the application
    Inline(ManifestDocument),
}

/// Relay credentials; wallets that need the relay are dropped when this is absent
#[derive(Debug, Serialize, Deserialize)]
pub struct WalletConnectConfig {
    #[serde(
        serialize_with = "serialize_redacted",
        deserialize_with = "deserialize_secret"
    )]
    pub project_id: SecretString,
    #[serde(default)]
    pub metadata: Value,
}

impl Clone for WalletConnectConfig {
    fn clone(&self) -> Self {
        Self {
            project_id: SecretString::from(self.project_id.expose_secret().to_string()),
            metadata: self.metadata.clone(),
        }
    }
}

fn serialize_redacted<S: Serializer>(_: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str("[REDACTED]")
}

fn deserialize_secret<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

/// RPC endpoints handed to sandboxed wallets, per network
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Providers {
    #[serde(default)]
    pub mainnet: Vec<String>,
    #[serde(default)]
    pub testnet: Vec<String>,
}

impl Providers {
    pub fn for_network(&self, network: Network) -> &[String] {
        match network {
            Network::Mainnet => &self.mainnet,
            Network::Testnet => &self.testnet,
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Default network for every wallet call
    #[serde(default)]
    pub network: Network,
    /// Manifest source
    #[serde(default)]
    pub manifest: ManifestSource,
    /// Wallet ids never registered from the manifest
    #[serde(default)]
    pub excluded_wallets: Vec<String>,
    /// Capability flags a wallet must advertise to be offered
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
    /// Relay credentials
    #[serde(default)]
    pub wallet_connect: Option<WalletConnectConfig>,
    /// Sign in automatically when a parent frame announces a wallet
    #[serde(default = "default_auto_connect")]
    pub auto_connect: bool,
    /// RPC endpoints per network
    #[serde(default)]
    pub providers: Providers,
    /// Delay after the manifest loads before the connector reports ready (milliseconds)
    #[serde(default = "default_settle_ms")]
    pub manifest_settle_ms: u64,
    /// Upper bound on a sandbox or parent-frame round trip (milliseconds)
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    /// Path to audit log file
    #[serde(default)]
    pub audit_log_path: Option<String>,
    /// Minimum seconds between transaction submissions
    #[serde(default)]
    pub cooldown_seconds: Option<u64>,
    /// Path to a method policy file
    #[serde(default)]
    pub policy_path: Option<String>,
}

fn default_auto_connect() -> bool {
    true
}

fn default_settle_ms() -> u64 {
    100
}

fn default_rpc_timeout_ms() -> u64 {
    60_000
}

impl ConnectorConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.manifest_settle_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Load from a JSON file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| crate::Error::Config(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            manifest: ManifestSource::Default,
            excluded_wallets: Vec::new(),
            features: BTreeMap::new(),
            wallet_connect: None,
            auto_connect: default_auto_connect(),
            providers: Providers::default(),
            manifest_settle_ms: default_settle_ms(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            audit_log_path: None,
            cooldown_seconds: None,
            policy_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let parsed: ConnectorConfig = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(parsed.network, Network::Mainnet);
        assert!(parsed.auto_connect);
        assert_eq!(parsed.manifest_settle_ms, 100);
        assert_eq!(parsed.rpc_timeout(), Duration::from_secs(60));
        assert!(matches!(parsed.manifest, ManifestSource::Default));
    }

    #[test]
    fn explicit_fields() {
        let value = serde_json::json!({
            "network": "testnet",
            "manifest": { "url": "https://example.org/manifest.json" },
            "excluded_wallets": ["meteor-wallet"],
            "features": { "signMessage": true },
            "wallet_connect": { "project_id": "abc123" },
            "auto_connect": false,
            "rpc_timeout_ms": 5000
        });
        let parsed: ConnectorConfig = serde_json::from_value(value).expect("parse config");
        assert_eq!(parsed.network, Network::Testnet);
        assert!(matches!(parsed.manifest, ManifestSource::Url(ref u) if u.ends_with("manifest.json")));
        assert_eq!(parsed.excluded_wallets, vec!["meteor-wallet".to_string()]);
        assert!(!parsed.auto_connect);
        let wc = parsed.wallet_connect.expect("wallet connect");
        assert_eq!(wc.project_id.expose_secret(), "abc123");
    }

    #[test]
    fn project_id_is_redacted_on_output() {
        let config = ConnectorConfig {
            wallet_connect: Some(WalletConnectConfig {
                project_id: SecretString::from("super-secret".to_string()),
                metadata: Value::Null,
            }),
            ..Default::default()
        };
        let out = serde_json::to_string(&config).unwrap();
        assert!(!out.contains("super-secret"));
        assert!(out.contains("[REDACTED]"));
    }
}
