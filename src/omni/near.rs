//! NEAR chain connector backed by [`NearConnector`]

use super::{
    encode_nonce, intent_message, ConnectorCore, ConnectorInfo, IntentsOptions, OmniConnector,
    OmniWallet, SignedIntent, WalletType, INTENTS_CONTRACT,
};
use crate::connector::{ConnectorEvent, ConnectorEventKind, NearConnector};
use crate::events::ListenerId;
use crate::proxy::WalletProxy;
use crate::wallet::{Account, NearWallet, NetworkParams, SignMessageParams};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub const NEAR_CONNECTOR_ID: &str = "near";

/// A signed-in NEAR wallet as seen by the multi-chain layer
pub struct NearOmniWallet {
    wallet: WalletProxy,
}

impl NearOmniWallet {
    pub fn new(wallet: WalletProxy) -> Self {
        Self { wallet }
    }

    pub fn proxy(&self) -> &WalletProxy {
        &self.wallet
    }

    /// First account of the session, fetched on every call
    async fn account(&self) -> crate::Result<Account> {
        self.wallet
            .get_accounts(NetworkParams::default())
            .await?
            .into_iter()
            .next()
            .ok_or(crate::Error::NoAccounts)
    }
}

#[async_trait]
impl OmniWallet for NearOmniWallet {
    fn wallet_type(&self) -> WalletType {
        WalletType::Near
    }

    async fn address(&self) -> crate::Result<String> {
        Ok(self.account().await?.account_id)
    }

    async fn public_key(&self) -> crate::Result<String> {
        self.account()
            .await?
            .public_key
            .ok_or_else(|| crate::Error::NotSupported("publicKey".to_string()))
    }

    /// NEP-413 message signature over the intents message
    async fn sign_intents(
        &self,
        intents: Vec<Value>,
        options: IntentsOptions,
    ) -> crate::Result<SignedIntent> {
        let signer_id = self.intents_address().await?;
        let (message, nonce) = intent_message(&signer_id, &intents, &options)?;

        let signed = self
            .wallet
            .sign_message(SignMessageParams {
                message: message.clone(),
                recipient: INTENTS_CONTRACT.to_string(),
                nonce: nonce.to_vec(),
                network: None,
                signer_id: Some(signer_id),
            })
            .await?;

        Ok(SignedIntent {
            standard: "nep413".to_string(),
            payload: json!({
                "message": message,
                "nonce": encode_nonce(&nonce),
                "recipient": INTENTS_CONTRACT,
            }),
            public_key: signed.public_key,
            signature: signed.signature,
        })
    }
}

/// Mirrors the NEAR connector's session into a [`ConnectorCore`]
pub struct NearOmniConnector {
    core: ConnectorCore,
    connector: NearConnector,
    listeners: [ListenerId; 2],
}

impl NearOmniConnector {
    /// Subscribes to the connector's sign-in/sign-out and restores an existing session.
    ///
    /// A session that cannot be restored leaves this connector disconnected.
    pub async fn new(connector: NearConnector) -> Self {
        let core = ConnectorCore::new(ConnectorInfo {
            id: NEAR_CONNECTOR_ID.to_string(),
            name: "NEAR Wallet".to_string(),
            icon: "https://storage.herewallet.app/ft/1010:native.png".to_string(),
            wallet_type: WalletType::Near,
        });

        let sign_in = {
            let core = core.clone();
            connector.on(ConnectorEventKind::SignIn, move |event| {
                if let ConnectorEvent::SignIn { wallet, .. } = event {
                    core.set_wallet(Arc::new(NearOmniWallet::new(wallet.clone())));
                }
            })
        };
        let sign_out = {
            let core = core.clone();
            connector.on(ConnectorEventKind::SignOut, move |_| {
                core.remove_wallet();
            })
        };

        match connector.get_connected_wallet().await {
            Ok(connected) => core.set_wallet(Arc::new(NearOmniWallet::new(connected.wallet))),
            Err(e) if e.is_not_connected() => {
                tracing::debug!("No NEAR session to restore");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not restore NEAR session");
                core.remove_wallet();
            }
        }

        Self {
            core,
            connector,
            listeners: [sign_in, sign_out],
        }
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn crate::prompt::ConfirmPrompt>) -> Self {
        self.core = self.core.clone().with_confirm(confirm);
        self
    }

    pub fn near(&self) -> &NearConnector {
        &self.connector
    }
}

impl Drop for NearOmniConnector {
    fn drop(&mut self) {
        for id in self.listeners {
            self.connector.off(id);
        }
    }
}

#[async_trait]
impl OmniConnector for NearOmniConnector {
    fn core(&self) -> &ConnectorCore {
        &self.core
    }

    async fn connect(&self) -> crate::Result<()> {
        self.connector.connect(None).await.map(|_| ())
    }

    async fn silent_disconnect(&self) -> crate::Result<()> {
        self.connector.disconnect(None).await
    }
}
