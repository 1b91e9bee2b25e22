//! Wallet living in the hosting frame
//!
//! When the connector runs embedded, the hosting page announces its wallet and answers
//! `near-wallet-injected` requests. All parent-frame wallets share one [`RpcBridge`];
//! replies reach it through the connector's discovery task.

use super::{
    Account, FinalExecutionOutcome, NearWallet, NetworkParams, NetworkScoped,
    SignAndSendTransactionParams, SignAndSendTransactionsParams, SignInParams,
    SignMessageParams, SignedMessage, WalletContext,
};
use crate::manifest::WalletManifest;
use crate::rpc::RpcBridge;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub const PARENT_FRAME_NAMESPACE: &str = "near-wallet-injected";

pub struct ParentFrameWallet {
    manifest: WalletManifest,
    ctx: WalletContext,
    bridge: RpcBridge,
}

impl ParentFrameWallet {
    pub fn new(manifest: WalletManifest, ctx: WalletContext, bridge: RpcBridge) -> Self {
        Self {
            manifest,
            ctx,
            bridge,
        }
    }

    async fn call<P: Serialize, T: DeserializeOwned>(&self, method: &str, params: P) -> crate::Result<T> {
        let result = self.bridge.call(method, serde_json::to_value(params)?).await?;
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl NearWallet for ParentFrameWallet {
    fn manifest(&self) -> &WalletManifest {
        &self.manifest
    }

    async fn sign_in(&self, params: SignInParams) -> crate::Result<Vec<Account>> {
        let network = self.ctx.resolve_network(params.network);
        let result: Value = self
            .call("near:signIn", NetworkParams::on(network))
            .await?;

        // The hosting page may answer with a single account.
        match result {
            Value::Array(_) => Ok(serde_json::from_value(result)?),
            single => Ok(vec![serde_json::from_value(single)?]),
        }
    }

    async fn sign_out(&self, params: NetworkParams) -> crate::Result<()> {
        let _: Value = self
            .call("near:signOut", params.or_network(self.ctx.network()))
            .await?;
        Ok(())
    }

    async fn get_accounts(&self, params: NetworkParams) -> crate::Result<Vec<Account>> {
        self.call("near:getAccounts", params.or_network(self.ctx.network()))
            .await
    }

    async fn sign_and_send_transaction(
        &self,
        params: SignAndSendTransactionParams,
    ) -> crate::Result<FinalExecutionOutcome> {
        self.ctx
            .validate_transaction(&params.receiver_id, &params.actions)
            .await?;
        self.call(
            "near:signAndSendTransaction",
            params.or_network(self.ctx.network()),
        )
        .await
    }

    async fn sign_and_send_transactions(
        &self,
        params: SignAndSendTransactionsParams,
    ) -> crate::Result<Vec<FinalExecutionOutcome>> {
        self.ctx.validate_transactions(&params.transactions).await?;
        self.call(
            "near:signAndSendTransactions",
            params.or_network(self.ctx.network()),
        )
        .await
    }

    async fn sign_message(&self, params: SignMessageParams) -> crate::Result<SignedMessage> {
        self.call("near:signMessage", params.or_network(self.ctx.network()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::sample_manifest;
    use crate::rpc::{MessageLink, RpcRequest, RpcResponse};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    /// Spawns a fake hosting page answering every request with `answer`
    fn parent_answering(answer: Value) -> (ParentFrameWallet, tokio::task::JoinHandle<Vec<RpcRequest>>) {
        let (ours, mut theirs) = MessageLink::pair(8);
        let bridge = RpcBridge::new(PARENT_FRAME_NAMESPACE, ours.outbound, Duration::from_secs(5));
        let wallet = ParentFrameWallet::new(sample_manifest("frame"), WalletContext::default(), bridge.clone());

        let page = tokio::spawn(async move {
            let mut seen = Vec::new();
            if let Some(message) = theirs.inbound.recv().await {
                let request = RpcRequest::parse(PARENT_FRAME_NAMESPACE, &message).unwrap();
                let reply = RpcResponse::ok(PARENT_FRAME_NAMESPACE, request.id.clone(), answer);
                bridge.handle_message(&reply.to_value()).await;
                seen.push(request);
            }
            seen
        });
        (wallet, page)
    }

    #[tokio::test]
    async fn single_account_reply_is_normalized() {
        let (wallet, page) = parent_answering(json!({ "accountId": "host.near" }));
        let accounts = wallet.sign_in(SignInParams::default()).await.unwrap();
        assert_eq!(accounts, vec![Account::new("host.near")]);

        let seen = page.await.unwrap();
        assert_eq!(seen[0].method, "near:signIn");
        assert_eq!(seen[0].params, json!({ "network": "mainnet" }));
    }

    #[tokio::test]
    async fn account_list_reply_passes_through() {
        let (wallet, _page) = parent_answering(json!([{ "accountId": "a.near" }, { "accountId": "b.near" }]));
        let accounts = wallet.sign_in(SignInParams::default()).await.unwrap();
        assert_eq!(accounts.len(), 2);
    }

    #[tokio::test]
    async fn banned_transaction_is_not_posted() {
        let (ours, mut theirs) = MessageLink::pair(8);
        let bridge = RpcBridge::new(PARENT_FRAME_NAMESPACE, ours.outbound, Duration::from_secs(5));
        let ctx = WalletContext::default()
            .with_banned_check(Arc::new(crate::connector::BannedList::new(["evil.near"])));
        let wallet = ParentFrameWallet::new(sample_manifest("frame"), ctx, bridge);

        let result = wallet
            .sign_and_send_transactions(SignAndSendTransactionsParams {
                network: None,
                transactions: vec![crate::wallet::Transaction {
                    signer_id: None,
                    receiver_id: "evil.near".into(),
                    actions: vec![],
                }],
            })
            .await;
        assert!(matches!(result, Err(crate::Error::BannedAddress(_))));
        assert!(theirs.inbound.try_recv().is_err());
    }
}
