//! Wallet manifests
//!
//! A manifest document lists the wallet backends a connector may register. Entries
//! are filtered before registration: explicitly excluded ids are dropped (except the
//! permanently whitelisted [`ALWAYS_INCLUDED_WALLET`]), and so is any wallet needing
//! the WalletConnect relay when no relay credentials were configured.

mod loader;

pub use loader::{load_manifest, HttpManifestFetcher, ManifestFetcher};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// The only backend kind accepted for registration from a manifest
pub const SANDBOX_TYPE: &str = "sandbox";

/// Never removed by the exclusion list
pub const ALWAYS_INCLUDED_WALLET: &str = "hot-wallet";

/// Fields a debug manifest must carry
pub const REQUIRED_DEBUG_FIELDS: [&str; 8] = [
    "id",
    "name",
    "icon",
    "website",
    "version",
    "executor",
    "features",
    "permissions",
];

/// Capability flags advertised by a wallet (`signMessage`, `testnet`, ...)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletFeatures(pub BTreeMap<String, bool>);

impl WalletFeatures {
    pub fn has(&self, feature: &str) -> bool {
        self.0.get(feature).copied().unwrap_or(false)
    }

    pub fn testnet(&self) -> bool {
        self.has("testnet")
    }

    /// True when every flag set in `required` is also set here
    pub fn satisfies(&self, required: &BTreeMap<String, bool>) -> bool {
        required
            .iter()
            .all(|(feature, wanted)| !*wanted || self.has(feature))
    }
}

/// What a wallet's executor is allowed to do
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletPermissions {
    /// Requires the WalletConnect relay
    #[serde(default)]
    pub wallet_connect: bool,
    /// May persist data in its storage partition
    #[serde(default)]
    pub storage: bool,
    /// Origins the executor may open
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allows_open: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Descriptor of one wallet backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletManifest {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub website: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    /// Entry point of the executor
    pub executor: String,
    #[serde(default)]
    pub features: WalletFeatures,
    #[serde(default)]
    pub permissions: WalletPermissions,
    #[serde(default)]
    pub debug: bool,
}

impl WalletManifest {
    pub fn is_sandbox(&self) -> bool {
        self.kind == SANDBOX_TYPE
    }
}

/// `{ "wallets": [...], "version": "..." }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestDocument {
    #[serde(default)]
    pub wallets: Vec<WalletManifest>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl Default for ManifestDocument {
    fn default() -> Self {
        Self {
            wallets: Vec::new(),
            version: default_version(),
        }
    }
}

/// Apply exclusion and capability rules to a loaded manifest
pub fn filter_manifest(
    document: ManifestDocument,
    excluded_wallets: &[String],
    wallet_connect_configured: bool,
) -> ManifestDocument {
    let mut excluded: HashSet<&str> = excluded_wallets.iter().map(String::as_str).collect();
    excluded.remove(ALWAYS_INCLUDED_WALLET);

    let total = document.wallets.len();
    let wallets: Vec<WalletManifest> = document
        .wallets
        .into_iter()
        .filter(|wallet| {
            if wallet.permissions.wallet_connect && !wallet_connect_configured {
                tracing::debug!(wallet_id = %wallet.id, "Dropping wallet: WalletConnect not configured");
                return false;
            }
            !excluded.contains(wallet.id.as_str())
        })
        .collect();

    tracing::debug!(total, kept = wallets.len(), "Filtered manifest");
    ManifestDocument {
        wallets,
        version: document.version,
    }
}

/// Check a raw debug manifest against the required-field checklist and parse it.
pub fn validate_debug_manifest(raw: &Value) -> crate::Result<WalletManifest> {
    let object = raw
        .as_object()
        .ok_or_else(|| crate::Error::InvalidManifest("manifest must be a JSON object".into()))?;

    let kind = object.get("type").and_then(Value::as_str).unwrap_or_default();
    if kind != SANDBOX_TYPE {
        return Err(crate::Error::UnsupportedWalletType(kind.to_string()));
    }

    for field in REQUIRED_DEBUG_FIELDS {
        let present = match object.get(field) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Bool(b)) => *b,
            Some(_) => true,
        };
        if !present {
            return Err(crate::Error::InvalidManifest(format!(
                "manifest must have {}",
                field
            )));
        }
    }

    serde_json::from_value(raw.clone()).map_err(|e| crate::Error::InvalidManifest(e.to_string()))
}

#[cfg(test)]
pub(crate) fn sample_manifest(id: &str) -> WalletManifest {
    WalletManifest {
        id: id.to_string(),
        name: format!("{id} wallet"),
        icon: format!("https://example.org/{id}.png"),
        website: "https://example.org".to_string(),
        version: "1.0.0".to_string(),
        description: None,
        kind: SANDBOX_TYPE.to_string(),
        executor: format!("https://example.org/{id}.js"),
        features: WalletFeatures::default(),
        permissions: WalletPermissions::default(),
        debug: false,
    }
}
