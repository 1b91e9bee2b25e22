//! Wallet backends
//!
//! Every backend implements [`NearWallet`]. The connector keeps them as [`Backend`]
//! values and dispatches on the variant; there is no backend inheritance.
//!
//! Backends never sign a transaction before [`WalletContext::validate_transaction`]
//! has cleared its receivers.

mod injected;
mod parent_frame;
mod process_host;
mod sandbox;
mod types;

pub use injected::{InjectedProvider, InjectedWallet};
pub use parent_frame::{ParentFrameWallet, PARENT_FRAME_NAMESPACE};
pub use process_host::ProcessSandboxHost;
pub use sandbox::{
    InProcessSandboxHost, SandboxEnv, SandboxHandler, SandboxHost, SandboxWallet,
    SANDBOX_HOST_NAMESPACE, SANDBOX_NAMESPACE,
};
pub use types::*;

#[cfg(test)]
pub(crate) use injected::tests::MockProvider;
#[cfg(test)]
pub(crate) use sandbox::tests::ScriptedWallet;

use crate::config::Providers;
use crate::connector::{validate_banned_in_tx, BannedAddressCheck};
use crate::manifest::WalletManifest;
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// The uniform wallet contract
#[async_trait]
pub trait NearWallet: Send + Sync {
    fn manifest(&self) -> &WalletManifest;

    async fn sign_in(&self, params: SignInParams) -> crate::Result<Vec<Account>>;

    async fn sign_out(&self, params: NetworkParams) -> crate::Result<()>;

    async fn get_accounts(&self, params: NetworkParams) -> crate::Result<Vec<Account>>;

    async fn sign_and_send_transaction(
        &self,
        params: SignAndSendTransactionParams,
    ) -> crate::Result<FinalExecutionOutcome>;

    async fn sign_and_send_transactions(
        &self,
        params: SignAndSendTransactionsParams,
    ) -> crate::Result<Vec<FinalExecutionOutcome>>;

    async fn sign_message(&self, params: SignMessageParams) -> crate::Result<SignedMessage>;

    /// Whether [`NearWallet::create_key`] is backed by the wallet
    fn supports_create_key(&self) -> bool {
        false
    }

    async fn create_key(&self, _params: CreateKeyParams) -> crate::Result<()> {
        Err(crate::Error::NotSupported("createKey".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sandbox,
    ParentFrame,
    Injected,
}

/// A registered backend
pub enum Backend {
    Sandbox(SandboxWallet),
    ParentFrame(ParentFrameWallet),
    Injected(InjectedWallet),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Sandbox(_) => BackendKind::Sandbox,
            Backend::ParentFrame(_) => BackendKind::ParentFrame,
            Backend::Injected(_) => BackendKind::Injected,
        }
    }

    pub fn id(&self) -> &str {
        &self.manifest().id
    }

    fn inner(&self) -> &dyn NearWallet {
        match self {
            Backend::Sandbox(wallet) => wallet,
            Backend::ParentFrame(wallet) => wallet,
            Backend::Injected(wallet) => wallet,
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("kind", &self.kind())
            .field("id", &self.id())
            .finish()
    }
}

#[async_trait]
impl NearWallet for Backend {
    fn manifest(&self) -> &WalletManifest {
        self.inner().manifest()
    }

    async fn sign_in(&self, params: SignInParams) -> crate::Result<Vec<Account>> {
        self.inner().sign_in(params).await
    }

    async fn sign_out(&self, params: NetworkParams) -> crate::Result<()> {
        self.inner().sign_out(params).await
    }

    async fn get_accounts(&self, params: NetworkParams) -> crate::Result<Vec<Account>> {
        self.inner().get_accounts(params).await
    }

    async fn sign_and_send_transaction(
        &self,
        params: SignAndSendTransactionParams,
    ) -> crate::Result<FinalExecutionOutcome> {
        self.inner().sign_and_send_transaction(params).await
    }

    async fn sign_and_send_transactions(
        &self,
        params: SignAndSendTransactionsParams,
    ) -> crate::Result<Vec<FinalExecutionOutcome>> {
        self.inner().sign_and_send_transactions(params).await
    }

    async fn sign_message(&self, params: SignMessageParams) -> crate::Result<SignedMessage> {
        self.inner().sign_message(params).await
    }

    fn supports_create_key(&self) -> bool {
        self.inner().supports_create_key()
    }

    async fn create_key(&self, params: CreateKeyParams) -> crate::Result<()> {
        self.inner().create_key(params).await
    }
}

/// State shared by the connector and every backend it creates
#[derive(Clone)]
pub struct WalletContext {
    network: Arc<RwLock<Network>>,
    banned: Option<Arc<dyn BannedAddressCheck>>,
    providers: Providers,
    rpc_timeout: Duration,
}

impl WalletContext {
    pub fn new(network: Network, providers: Providers, rpc_timeout: Duration) -> Self {
        Self {
            network: Arc::new(RwLock::new(network)),
            banned: None,
            providers,
            rpc_timeout,
        }
    }

    pub fn with_banned_check(mut self, check: Arc<dyn BannedAddressCheck>) -> Self {
        self.banned = Some(check);
        self
    }

    /// Connector-wide default network
    pub fn network(&self) -> Network {
        *self.network.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_network(&self, network: Network) {
        *self.network.write().unwrap_or_else(PoisonError::into_inner) = network;
    }

    /// The per-call override if given, else the connector default
    pub fn resolve_network(&self, requested: Option<Network>) -> Network {
        requested.unwrap_or_else(|| self.network())
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    pub fn banned_check(&self) -> Option<&Arc<dyn BannedAddressCheck>> {
        self.banned.as_ref()
    }

    pub async fn is_banned(&self, address: &str) -> crate::Result<bool> {
        match &self.banned {
            Some(check) => check.is_banned(address).await,
            None => Ok(false),
        }
    }

    /// No-op when no banned-address policy is configured
    pub async fn validate_transaction(
        &self,
        receiver_id: &str,
        actions: &[Action],
    ) -> crate::Result<()> {
        match &self.banned {
            Some(check) => validate_banned_in_tx(check.as_ref(), receiver_id, actions).await,
            None => Ok(()),
        }
    }

    pub async fn validate_transactions(&self, transactions: &[Transaction]) -> crate::Result<()> {
        for tx in transactions {
            self.validate_transaction(&tx.receiver_id, &tx.actions).await?;
        }
        Ok(())
    }
}

impl Default for WalletContext {
    fn default() -> Self {
        Self::new(
            Network::default(),
            Providers::default(),
            Duration::from_secs(60),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::BannedList;
    use serde_json::json;

    #[test]
    fn network_override_wins() {
        let ctx = WalletContext::default();
        assert_eq!(ctx.resolve_network(None), Network::Mainnet);
        assert_eq!(ctx.resolve_network(Some(Network::Testnet)), Network::Testnet);

        let shared = ctx.clone();
        shared.set_network(Network::Testnet);
        assert_eq!(ctx.resolve_network(None), Network::Testnet);
    }

    #[tokio::test]
    async fn validation_checks_every_transaction() {
        let ctx = WalletContext::default().with_banned_check(Arc::new(BannedList::new(["evil.near"])));
        let clean = Transaction {
            signer_id: None,
            receiver_id: "app.near".into(),
            actions: vec![],
        };
        let dirty = Transaction {
            signer_id: None,
            receiver_id: "token.near".into(),
            actions: vec![Action::function_call(
                "ft_transfer_call",
                json!({"receiver_id": "evil.near"}),
                "1",
                "1",
            )],
        };

        ctx.validate_transactions(std::slice::from_ref(&clean)).await.unwrap();
        assert!(ctx.validate_transactions(&[clean, dirty]).await.is_err());
        assert!(WalletContext::default().validate_transaction("evil.near", &[]).await.is_ok());
    }
}
