//! Multi-chain layer
//!
//! Each chain has its own [`OmniConnector`] holding at most one connected
//! [`OmniWallet`]. [`ConnectorCore::set_wallet`] and [`ConnectorCore::remove_wallet`]
//! are the only places the slot changes, and each emits the matching
//! [`OmniEvent`]. [`HotConnector`] composes several chain connectors under one
//! event surface.

mod hot;
mod identity;
mod near;
mod stored;

pub use hot::HotConnector;
pub use identity::{bind_identity, IdentityBinding, IdentityVerifier};
pub use near::{NearOmniConnector, NearOmniWallet, NEAR_CONNECTOR_ID};
pub use stored::{storage_key, ChainSession, Session, StoredKeyConnector};

use crate::events::{EventEmitter, EventMap, ListenerId};
use crate::prompt::ConfirmPrompt;
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Contract that verifies signed intents
pub const INTENTS_CONTRACT: &str = "intents.near";

/// Deadline used when the caller gives none
pub const DEFAULT_INTENTS_DEADLINE: &str = "2100-01-01T00:00:00.000Z";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletType {
    Near,
    Evm,
    Solana,
    Ton,
    Stellar,
    Passkey,
}

impl fmt::Display for WalletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WalletType::Near => "near",
            WalletType::Evm => "evm",
            WalletType::Solana => "solana",
            WalletType::Ton => "ton",
            WalletType::Stellar => "stellar",
            WalletType::Passkey => "passkey",
        };
        f.write_str(name)
    }
}

/// A chain-normalized signed statement; the payload is opaque here
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedIntent {
    pub standard: String,
    pub payload: Value,
    pub public_key: String,
    pub signature: String,
}

/// Signed intents bound to a domain, for identity verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedAuth {
    pub signed: SignedIntent,
    pub public_key: String,
    pub chain_id: WalletType,
    pub address: String,
    pub seed: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntentsOptions {
    pub deadline: Option<DateTime<Utc>>,
    pub nonce: Option<[u8; 32]>,
}

/// A connected wallet on some chain
#[async_trait]
pub trait OmniWallet: Send + Sync {
    fn wallet_type(&self) -> WalletType;

    async fn address(&self) -> crate::Result<String>;

    async fn public_key(&self) -> crate::Result<String>;

    /// Account the intents contract knows this wallet by
    async fn intents_address(&self) -> crate::Result<String> {
        self.address().await
    }

    async fn sign_intents(
        &self,
        intents: Vec<Value>,
        options: IntentsOptions,
    ) -> crate::Result<SignedIntent>;

    /// Sign `intents` with a nonce derived from `domain` and a fresh seed
    async fn sign_intents_with_auth(
        &self,
        domain: &str,
        intents: Vec<Value>,
    ) -> crate::Result<SignedAuth> {
        let seed = auth_seed();
        let options = IntentsOptions {
            deadline: None,
            nonce: Some(auth_nonce(domain, &seed)),
        };
        let signed = self.sign_intents(intents, options).await?;
        Ok(SignedAuth {
            signed,
            public_key: self.public_key().await?,
            chain_id: self.wallet_type(),
            address: self.address().await?,
            seed,
        })
    }
}

#[derive(Clone)]
pub enum OmniEvent {
    Connect { wallet: Arc<dyn OmniWallet> },
    Disconnect { wallet: Arc<dyn OmniWallet> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OmniEventKind {
    Connect,
    Disconnect,
}

impl OmniEvent {
    pub fn wallet(&self) -> &Arc<dyn OmniWallet> {
        match self {
            OmniEvent::Connect { wallet } | OmniEvent::Disconnect { wallet } => wallet,
        }
    }
}

impl EventMap for OmniEvent {
    type Kind = OmniEventKind;

    fn kind(&self) -> OmniEventKind {
        match self {
            OmniEvent::Connect { .. } => OmniEventKind::Connect,
            OmniEvent::Disconnect { .. } => OmniEventKind::Disconnect,
        }
    }
}

pub type OmniHandler = Box<dyn Fn(&OmniEvent) + Send + Sync>;

/// Undoes one `on_connect`/`on_disconnect`
pub struct Subscription {
    events: EventEmitter<OmniEvent>,
    id: ListenerId,
}

impl Subscription {
    pub fn unsubscribe(self) -> bool {
        self.events.off(self.id)
    }
}

/// Static description of a chain connector
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectorInfo {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub wallet_type: WalletType,
}

/// Wallet slot and event bus shared by every chain connector.
///
/// Clones share the slot and the bus.
#[derive(Clone)]
pub struct ConnectorCore {
    info: ConnectorInfo,
    wallet: Arc<RwLock<Option<Arc<dyn OmniWallet>>>>,
    events: EventEmitter<OmniEvent>,
    confirm: Option<Arc<dyn ConfirmPrompt>>,
}

impl ConnectorCore {
    pub fn new(info: ConnectorInfo) -> Self {
        Self {
            info,
            wallet: Arc::new(RwLock::new(None)),
            events: EventEmitter::new(),
            confirm: None,
        }
    }

    /// Ask before a user-initiated disconnect; without a prompt it is approved
    pub fn with_confirm(mut self, confirm: Arc<dyn ConfirmPrompt>) -> Self {
        self.confirm = Some(confirm);
        self
    }

    pub fn info(&self) -> &ConnectorInfo {
        &self.info
    }

    pub fn wallet(&self) -> Option<Arc<dyn OmniWallet>> {
        self.wallet
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_wallet(&self, wallet: Arc<dyn OmniWallet>) {
        *self.wallet.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&wallet));
        tracing::info!(connector = %self.info.id, "Wallet connected");
        self.events.emit(OmniEvent::Connect { wallet });
    }

    /// Empty the slot. Emits only when a wallet was present.
    pub fn remove_wallet(&self) -> Option<Arc<dyn OmniWallet>> {
        let removed = self
            .wallet
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(wallet) = &removed {
            tracing::info!(connector = %self.info.id, "Wallet disconnected");
            self.events.emit(OmniEvent::Disconnect {
                wallet: Arc::clone(wallet),
            });
        }
        removed
    }

    pub fn subscribe(&self, kind: OmniEventKind, handler: OmniHandler) -> Subscription {
        Subscription {
            events: self.events.clone(),
            id: self.events.on(kind, handler),
        }
    }

    pub fn remove_all_listeners(&self) {
        self.events.remove_all_listeners(None);
    }

    async fn confirm_logout(&self) -> crate::Result<bool> {
        match &self.confirm {
            Some(prompt) => {
                prompt
                    .confirm(
                        &format!("Disconnect {}", self.info.name),
                        "Are you sure you want to disconnect this wallet?",
                    )
                    .await
            }
            None => Ok(true),
        }
    }
}

/// One chain's connector
#[async_trait]
pub trait OmniConnector: Send + Sync {
    fn core(&self) -> &ConnectorCore;

    /// Interactive connection
    async fn connect(&self) -> crate::Result<()>;

    /// Tear down the session without asking
    async fn silent_disconnect(&self) -> crate::Result<()>;

    fn is_supported(&self) -> bool {
        true
    }

    fn info(&self) -> &ConnectorInfo {
        self.core().info()
    }

    fn id(&self) -> &str {
        &self.info().id
    }

    fn wallet(&self) -> Option<Arc<dyn OmniWallet>> {
        self.core().wallet()
    }

    fn on_connect(&self, handler: OmniHandler) -> Subscription {
        self.core().subscribe(OmniEventKind::Connect, handler)
    }

    fn on_disconnect(&self, handler: OmniHandler) -> Subscription {
        self.core().subscribe(OmniEventKind::Disconnect, handler)
    }

    fn remove_all_listeners(&self) {
        self.core().remove_all_listeners()
    }

    /// Disconnect after confirmation, or immediately when `silent`
    async fn disconnect(&self, silent: bool) -> crate::Result<()> {
        if !silent && !self.core().confirm_logout().await? {
            return Err(crate::Error::UserRejected);
        }
        self.silent_disconnect().await?;
        self.core().remove_wallet();
        Ok(())
    }
}

/// 32 random bytes, hex encoded
pub fn auth_seed() -> String {
    random_bytes().iter().map(|b| format!("{:02x}", b)).collect()
}

/// Nonce binding a signature to `domain`
pub fn auth_nonce(domain: &str, seed: &str) -> [u8; 32] {
    *blake3::hash(format!("{}_{}", domain, seed).as_bytes()).as_bytes()
}

fn random_bytes() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    bytes[16..].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    bytes
}

pub fn encode_nonce(nonce: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(nonce)
}

#[derive(Serialize)]
struct IntentMessage<'a> {
    deadline: String,
    nonce: String,
    verifying_contract: &'a str,
    signer_id: &'a str,
    intents: &'a [Value],
}

/// The JSON message a wallet signs for `intents`, and the nonce it embeds
pub fn intent_message(
    signer_id: &str,
    intents: &[Value],
    options: &IntentsOptions,
) -> crate::Result<(String, [u8; 32])> {
    let nonce = options.nonce.unwrap_or_else(random_bytes);
    let deadline = options
        .deadline
        .map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| DEFAULT_INTENTS_DEADLINE.to_string());

    let message = serde_json::to_string(&IntentMessage {
        deadline,
        nonce: encode_nonce(&nonce),
        verifying_contract: INTENTS_CONTRACT,
        signer_id,
        intents,
    })?;
    Ok((message, nonce))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::prompt::StaticConfirm;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Wallet that "signs" by echoing the message
    pub(crate) struct FakeWallet {
        pub address: String,
        pub kind: WalletType,
    }

    impl FakeWallet {
        pub fn new(address: &str, kind: WalletType) -> Arc<Self> {
            Arc::new(Self {
                address: address.to_string(),
                kind,
            })
        }
    }

    #[async_trait]
    impl OmniWallet for FakeWallet {
        fn wallet_type(&self) -> WalletType {
            self.kind
        }

        async fn address(&self) -> crate::Result<String> {
            Ok(self.address.clone())
        }

        async fn public_key(&self) -> crate::Result<String> {
            Ok(format!("ed25519:{}", self.address))
        }

        async fn sign_intents(
            &self,
            intents: Vec<Value>,
            options: IntentsOptions,
        ) -> crate::Result<SignedIntent> {
            let (message, _) = intent_message(&self.address, &intents, &options)?;
            Ok(SignedIntent {
                standard: "raw_ed25519".into(),
                payload: Value::String(message),
                public_key: self.public_key().await?,
                signature: "ed25519:sig".into(),
            })
        }
    }

    pub(crate) fn info(id: &str, wallet_type: WalletType) -> ConnectorInfo {
        ConnectorInfo {
            id: id.to_string(),
            name: format!("{} connector", id),
            icon: format!("https://example.org/{}.png", id),
            wallet_type,
        }
    }

    /// Connector whose session is a fixed wallet
    pub(crate) struct FakeConnector {
        pub core: ConnectorCore,
        pub wallet: Arc<FakeWallet>,
        pub teardowns: AtomicUsize,
    }

    impl FakeConnector {
        pub fn new(id: &str, address: &str) -> Arc<Self> {
            Arc::new(Self {
                core: ConnectorCore::new(info(id, WalletType::Evm)),
                wallet: FakeWallet::new(address, WalletType::Evm),
                teardowns: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl OmniConnector for FakeConnector {
        fn core(&self) -> &ConnectorCore {
            &self.core
        }

        async fn connect(&self) -> crate::Result<()> {
            self.core.set_wallet(self.wallet.clone());
            Ok(())
        }

        async fn silent_disconnect(&self) -> crate::Result<()> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn intent_message_layout() {
        let options = IntentsOptions {
            deadline: Some(Utc.with_ymd_and_hms(2030, 5, 1, 12, 0, 0).unwrap()),
            nonce: Some([7u8; 32]),
        };
        let intents = vec![serde_json::json!({"intent": "transfer"})];
        let (message, nonce) = intent_message("alice.near", &intents, &options).unwrap();
        assert_eq!(nonce, [7u8; 32]);
        assert!(message.starts_with(r#"{"deadline":"2030-05-01T12:00:00.000Z","nonce":""#));
        assert!(message.contains(r#""verifying_contract":"intents.near","signer_id":"alice.near""#));

        let (message, _) = intent_message("alice.near", &[], &IntentsOptions::default()).unwrap();
        assert!(message.contains(DEFAULT_INTENTS_DEADLINE));
    }

    #[test]
    fn auth_nonce_depends_on_domain_and_seed() {
        let seed = auth_seed();
        assert_eq!(seed.len(), 64);
        assert_ne!(seed, auth_seed());
        assert_eq!(auth_nonce("app.org", &seed), auth_nonce("app.org", &seed));
        assert_ne!(auth_nonce("app.org", &seed), auth_nonce("evil.org", &seed));
    }

    #[tokio::test]
    async fn auth_signature_embeds_derived_nonce() {
        let wallet = FakeWallet::new("alice.near", WalletType::Near);
        let auth = wallet.sign_intents_with_auth("app.org", vec![]).await.unwrap();
        assert_eq!(auth.chain_id, WalletType::Near);
        assert_eq!(auth.address, "alice.near");

        let nonce = encode_nonce(&auth_nonce("app.org", &auth.seed));
        assert!(auth.signed.payload.as_str().unwrap().contains(&nonce));
    }

    #[tokio::test]
    async fn slot_changes_emit_paired_events() {
        let connector = FakeConnector::new("evm", "0xabc");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        let connect_sub = connector.on_connect(Box::new(move |_: &OmniEvent| log.lock().unwrap().push("connect")));
        let log = seen.clone();
        connector.on_disconnect(Box::new(move |_: &OmniEvent| log.lock().unwrap().push("disconnect")));

        connector.connect().await.unwrap();
        assert!(connector.wallet().is_some());
        connector.disconnect(true).await.unwrap();
        assert!(connector.wallet().is_none());
        // Already empty: no second event.
        connector.disconnect(true).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["connect", "disconnect"]);

        assert!(connect_sub.unsubscribe());
        connector.connect().await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn declined_confirmation_keeps_the_session() {
        let connector = FakeConnector {
            core: ConnectorCore::new(info("evm", WalletType::Evm))
                .with_confirm(Arc::new(StaticConfirm(false))),
            wallet: FakeWallet::new("0xabc", WalletType::Evm),
            teardowns: AtomicUsize::new(0),
        };
        connector.connect().await.unwrap();

        let err = connector.disconnect(false).await.unwrap_err();
        assert!(matches!(err, crate::Error::UserRejected));
        assert!(connector.wallet().is_some());
        assert_eq!(connector.teardowns.load(Ordering::SeqCst), 0);

        connector.disconnect(true).await.unwrap();
        assert_eq!(connector.teardowns.load(Ordering::SeqCst), 1);
    }
}
