//! Error types for the wallet connector

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to load manifest: {0}")]
    ManifestLoad(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Unsupported wallet type: {0} (only sandbox wallets can be registered)")]
    UnsupportedWalletType(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Wallet already registered: {0}")]
    WalletAlreadyRegistered(String),

    #[error("No wallet selected")]
    NoWalletSelected,

    #[error("No accounts found")]
    NoAccounts,

    #[error("Failed to sign in to {0}")]
    SignInFailed(String),

    #[error("Banned address: {0}")]
    BannedAddress(String),

    #[error("Backend call {method} failed: {error}")]
    Rpc { method: String, error: Value },

    #[error("Backend call {method} timed out (correlation id {id})")]
    RpcTimeout { method: String, id: String },

    #[error("Channel to backend closed")]
    ChannelClosed,

    #[error("Operation not supported by wallet: {0}")]
    NotSupported(String),

    #[error("User rejected")]
    UserRejected,

    #[error("Plugin blocked: {0}")]
    PluginBlocked(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for failures that mean "no active session" rather than a fault.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Error::NoWalletSelected | Error::NoAccounts)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_classification() {
        assert!(Error::NoWalletSelected.is_not_connected());
        assert!(Error::NoAccounts.is_not_connected());
        assert!(!Error::BannedAddress("evil.near".into()).is_not_connected());
    }

    #[test]
    fn rpc_error_keeps_backend_payload() {
        let err = Error::Rpc {
            method: "wallet:signIn".into(),
            error: serde_json::json!({"message": "locked"}),
        };
        assert!(err.to_string().contains("locked"));
    }
}
