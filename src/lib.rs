//! Omni Connector
//!
//! One signing and transaction interface over many wallet backends:
//! - Sandboxed third-party executors, described by a wallet manifest
//! - Wallets injected by the embedding application or living in the hosting frame
//! - Chain-native connectors aggregated by the multi-chain layer
//!
//! # Security Model
//!
//! - Third-party wallet code only talks to the connector through correlated JSON messages
//! - Every wallet call passes through the plugin chain
//! - Transactions touching a banned account are refused before any backend sees them

pub mod builder;
pub mod config;
pub mod connector;
pub mod events;
pub mod manifest;
pub mod omni;
pub mod plugins;
pub mod prompt;
pub mod proxy;
pub mod retry;
pub mod rpc;
pub mod storage;
pub mod wallet;

mod error;

// Re-export commonly used types
pub use builder::ConnectorBuilder;
pub use config::{ConnectorConfig, ManifestSource, Providers, MANIFEST_URL_ENV};
pub use connector::{ConnectedWallet, ConnectorEvent, ConnectorEventKind, ConnectorState, NearConnector};
pub use error::{Error, Result};
pub use manifest::{ManifestDocument, WalletManifest};
pub use omni::{HotConnector, OmniConnector, OmniWallet, WalletType};
pub use proxy::WalletProxy;
pub use wallet::{NearWallet, Network};
