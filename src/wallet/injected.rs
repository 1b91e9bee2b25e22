//! Injected backend
//!
//! Wraps a provider the embedding application hands over directly. Calls are local;
//! the adapter only fills in the network, checks receivers, and normalizes replies.

use super::{
    Account, CreateKeyParams, FinalExecutionOutcome, NearWallet, NetworkParams, NetworkScoped,
    SignAndSendTransactionParams, SignAndSendTransactionsParams, SignInParams,
    SignMessageParams, SignedMessage, WalletContext,
};
use crate::manifest::WalletManifest;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// A wallet implementation supplied by the embedding application.
///
/// Transaction methods return the raw reply; some providers wrap outcomes as
/// `{ "transactions": [...] }`.
#[async_trait]
pub trait InjectedProvider: Send + Sync {
    fn manifest(&self) -> WalletManifest;

    async fn sign_in(&self, params: SignInParams) -> crate::Result<Vec<Account>>;

    async fn sign_out(&self, params: NetworkParams) -> crate::Result<()>;

    async fn get_accounts(&self, params: NetworkParams) -> crate::Result<Vec<Account>>;

    async fn sign_and_send_transaction(&self, params: SignAndSendTransactionParams) -> crate::Result<Value>;

    async fn sign_and_send_transactions(&self, params: SignAndSendTransactionsParams) -> crate::Result<Value>;

    async fn sign_message(&self, params: SignMessageParams) -> crate::Result<SignedMessage>;

    fn supports_create_key(&self) -> bool {
        false
    }

    async fn create_key(&self, _params: CreateKeyParams) -> crate::Result<()> {
        Err(crate::Error::NotSupported("createKey".to_string()))
    }
}

pub struct InjectedWallet {
    manifest: WalletManifest,
    ctx: WalletContext,
    provider: Arc<dyn InjectedProvider>,
}

impl InjectedWallet {
    pub fn new(provider: Arc<dyn InjectedProvider>, ctx: WalletContext) -> Self {
        Self {
            manifest: provider.manifest(),
            ctx,
            provider,
        }
    }
}

fn empty_reply(method: &str) -> crate::Error {
    crate::Error::Rpc {
        method: method.to_string(),
        error: Value::String("No result from wallet".to_string()),
    }
}

#[async_trait]
impl NearWallet for InjectedWallet {
    fn manifest(&self) -> &WalletManifest {
        &self.manifest
    }

    async fn sign_in(&self, params: SignInParams) -> crate::Result<Vec<Account>> {
        self.provider
            .sign_in(params.or_network(self.ctx.network()))
            .await
    }

    async fn sign_out(&self, params: NetworkParams) -> crate::Result<()> {
        self.provider
            .sign_out(params.or_network(self.ctx.network()))
            .await
    }

    async fn get_accounts(&self, params: NetworkParams) -> crate::Result<Vec<Account>> {
        self.provider
            .get_accounts(params.or_network(self.ctx.network()))
            .await
    }

    async fn sign_and_send_transaction(
        &self,
        params: SignAndSendTransactionParams,
    ) -> crate::Result<FinalExecutionOutcome> {
        self.ctx
            .validate_transaction(&params.receiver_id, &params.actions)
            .await?;
        let reply = self
            .provider
            .sign_and_send_transaction(params.or_network(self.ctx.network()))
            .await?;

        if reply.is_null() {
            return Err(empty_reply("signAndSendTransaction"));
        }
        if let Some(Value::Array(outcomes)) = reply.get("transactions") {
            return outcomes
                .first()
                .cloned()
                .ok_or_else(|| empty_reply("signAndSendTransaction"));
        }
        Ok(reply)
    }

    async fn sign_and_send_transactions(
        &self,
        params: SignAndSendTransactionsParams,
    ) -> crate::Result<Vec<FinalExecutionOutcome>> {
        self.ctx.validate_transactions(&params.transactions).await?;
        let reply = self
            .provider
            .sign_and_send_transactions(params.or_network(self.ctx.network()))
            .await?;

        match reply {
            Value::Null => Err(empty_reply("signAndSendTransactions")),
            Value::Array(outcomes) => Ok(outcomes),
            Value::Object(mut map) => match map.remove("transactions") {
                Some(Value::Array(outcomes)) => Ok(outcomes),
                _ => Err(crate::Error::Rpc {
                    method: "signAndSendTransactions".to_string(),
                    error: Value::Object(map),
                }),
            },
            other => Err(crate::Error::Rpc {
                method: "signAndSendTransactions".to_string(),
                error: other,
            }),
        }
    }

    async fn sign_message(&self, params: SignMessageParams) -> crate::Result<SignedMessage> {
        self.provider
            .sign_message(params.or_network(self.ctx.network()))
            .await
    }

    fn supports_create_key(&self) -> bool {
        self.provider.supports_create_key()
    }

    async fn create_key(&self, params: CreateKeyParams) -> crate::Result<()> {
        self.provider.create_key(params).await
    }
}
