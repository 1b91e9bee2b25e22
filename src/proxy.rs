//! Wallet proxy
//!
//! The wallet handed to applications. Every operation re-enters the connector's
//! plugin chain; nothing is cached. The manifest is the backend's, unfiltered.

use crate::manifest::WalletManifest;
use crate::plugins::{
    terminal, CreateKey, GetAccounts, PluginManager, SignAndSendTransaction,
    SignAndSendTransactions, SignIn, SignMessage, SignOut,
};
use crate::wallet::{
    Account, CreateKeyParams, FinalExecutionOutcome, NearWallet, NetworkParams,
    SignAndSendTransactionParams, SignAndSendTransactionsParams, SignInParams,
    SignMessageParams, SignedMessage,
};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Clone)]
pub struct WalletProxy {
    wallet: Arc<dyn NearWallet>,
    plugins: PluginManager,
}

/// Run `$op` through the chain with the backend's `$method` as terminal
macro_rules! forward {
    ($self:ident, $op:ty, $method:ident, $args:expr) => {{
        let backend = Arc::clone(&$self.wallet);
        $self
            .plugins
            .execute::<$op>(
                Arc::clone(&$self.wallet),
                $args,
                Some(terminal::<$op, _, _>(move |args| {
                    let backend = Arc::clone(&backend);
                    async move { backend.$method(args).await }
                })),
            )
            .await
    }};
}

impl WalletProxy {
    pub fn new(wallet: Arc<dyn NearWallet>, plugins: PluginManager) -> Self {
        Self { wallet, plugins }
    }

    pub fn id(&self) -> &str {
        &self.wallet.manifest().id
    }

    /// The backend behind the chain
    pub fn inner(&self) -> &Arc<dyn NearWallet> {
        &self.wallet
    }
}

impl std::fmt::Debug for WalletProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletProxy")
            .field("id", &self.id())
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

#[async_trait]
impl NearWallet for WalletProxy {
    fn manifest(&self) -> &WalletManifest {
        self.wallet.manifest()
    }

    async fn sign_in(&self, params: SignInParams) -> crate::Result<Vec<Account>> {
        forward!(self, SignIn, sign_in, params)
    }

    async fn sign_out(&self, params: NetworkParams) -> crate::Result<()> {
        forward!(self, SignOut, sign_out, params)
    }

    async fn get_accounts(&self, params: NetworkParams) -> crate::Result<Vec<Account>> {
        forward!(self, GetAccounts, get_accounts, params)
    }

    async fn sign_and_send_transaction(
        &self,
        params: SignAndSendTransactionParams,
    ) -> crate::Result<FinalExecutionOutcome> {
        forward!(self, SignAndSendTransaction, sign_and_send_transaction, params)
    }

    async fn sign_and_send_transactions(
        &self,
        params: SignAndSendTransactionsParams,
    ) -> crate::Result<Vec<FinalExecutionOutcome>> {
        forward!(self, SignAndSendTransactions, sign_and_send_transactions, params)
    }

    async fn sign_message(&self, params: SignMessageParams) -> crate::Result<SignedMessage> {
        forward!(self, SignMessage, sign_message, params)
    }

    /// Always offered; without backend support only a plugin can complete it
    fn supports_create_key(&self) -> bool {
        true
    }

    async fn create_key(&self, params: CreateKeyParams) -> crate::Result<()> {
        if self.wallet.supports_create_key() {
            forward!(self, CreateKey, create_key, params)
        } else {
            self.plugins
                .execute::<CreateKey>(Arc::clone(&self.wallet), params, None)
                .await
        }
    }
}
