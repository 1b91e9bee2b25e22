//! User-facing choices
//!
//! The connector never renders anything. Wallet selection, logout confirmation and
//! the multi-chain picker are delegated to implementations of these traits; a
//! declined prompt surfaces as [`crate::Error::UserRejected`].

use crate::manifest::WalletManifest;
use crate::omni::WalletType;
use async_trait::async_trait;
use serde::Serialize;

/// Lets the user choose one of the available wallets
#[async_trait]
pub trait WalletPicker: Send + Sync {
    /// Returns the chosen wallet id
    async fn select_wallet(&self, wallets: Vec<WalletManifest>) -> crate::Result<String>;
}

/// Yes/no confirmation, used before a user-initiated disconnect
#[async_trait]
pub trait ConfirmPrompt: Send + Sync {
    async fn confirm(&self, title: &str, message: &str) -> crate::Result<bool>;
}

/// One row of the multi-chain picker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainOption {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub wallet_type: WalletType,
    /// Present when the chain already has a connected wallet
    pub address: Option<String>,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainChoice {
    Connect(String),
    Disconnect(String),
}

/// Multi-chain picker
#[async_trait]
pub trait ChainPicker: Send + Sync {
    async fn pick_chain(&self, options: Vec<ChainOption>) -> crate::Result<ChainChoice>;
}

/// Picks the first offered wallet; rejects when none is offered
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstWalletPicker;

#[async_trait]
impl WalletPicker for FirstWalletPicker {
    async fn select_wallet(&self, wallets: Vec<WalletManifest>) -> crate::Result<String> {
        wallets
            .into_iter()
            .next()
            .map(|wallet| wallet.id)
            .ok_or(crate::Error::UserRejected)
    }
}

/// Always answers the same way
#[derive(Debug, Clone, Copy)]
pub struct StaticConfirm(pub bool);

#[async_trait]
impl ConfirmPrompt for StaticConfirm {
    async fn confirm(&self, title: &str, _message: &str) -> crate::Result<bool> {
        tracing::debug!(title, answer = self.0, "Static confirmation");
        Ok(self.0)
    }
}
