//! Chain connector that remembers its session under one storage key

use super::{ConnectorCore, ConnectorInfo, OmniConnector, OmniWallet};
use crate::storage::DataStorage;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Storage key holding the connection marker of connector `id`
pub fn storage_key(id: &str) -> String {
    format!("hot-connector:{}", id)
}

/// A fresh session and the marker to persist for restoring it
pub struct Session {
    pub wallet: Arc<dyn OmniWallet>,
    pub marker: Value,
}

/// Chain-specific session handling behind a [`StoredKeyConnector`]
#[async_trait]
pub trait ChainSession: Send + Sync {
    /// Interactive connection
    async fn connect(&self) -> crate::Result<Session>;

    /// Rebuild a wallet from a persisted marker, without user interaction
    async fn restore(&self, marker: &Value) -> crate::Result<Arc<dyn OmniWallet>>;

    async fn disconnect(&self) -> crate::Result<()>;
}

pub struct StoredKeyConnector {
    core: ConnectorCore,
    session: Arc<dyn ChainSession>,
    storage: Arc<dyn DataStorage>,
    key: String,
}

impl StoredKeyConnector {
    /// Restores the persisted session, if any. Failures leave the connector disconnected.
    pub async fn new(
        info: ConnectorInfo,
        session: Arc<dyn ChainSession>,
        storage: Arc<dyn DataStorage>,
    ) -> Self {
        let key = storage_key(&info.id);
        let connector = Self {
            core: ConnectorCore::new(info),
            session,
            storage,
            key,
        };

        match connector.restore().await {
            Ok(Some(wallet)) => connector.core.set_wallet(wallet),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(connector = %connector.core.info().id, error = %e, "Could not restore session");
                connector.core.remove_wallet();
            }
        }
        connector
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn crate::prompt::ConfirmPrompt>) -> Self {
        self.core = self.core.with_confirm(confirm);
        self
    }

    async fn restore(&self) -> crate::Result<Option<Arc<dyn OmniWallet>>> {
        let Some(raw) = self.storage.get(&self.key).await? else {
            return Ok(None);
        };
        let marker: Value = serde_json::from_str(&raw)?;
        self.session.restore(&marker).await.map(Some)
    }
}

#[async_trait]
impl OmniConnector for StoredKeyConnector {
    fn core(&self) -> &ConnectorCore {
        &self.core
    }

    async fn connect(&self) -> crate::Result<()> {
        let Session { wallet, marker } = self.session.connect().await?;
        self.storage
            .set(&self.key, &serde_json::to_string(&marker)?)
            .await?;
        self.core.set_wallet(wallet);
        Ok(())
    }

    async fn silent_disconnect(&self) -> crate::Result<()> {
        self.storage.remove(&self.key).await?;
        self.session.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::omni::tests::{info, FakeWallet};
    use crate::omni::WalletType;
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Session keyed by address; restore fails for unknown wallet ids
    #[derive(Default)]
    struct KitSession {
        disconnects: AtomicUsize,
    }

    #[async_trait]
    impl ChainSession for KitSession {
        async fn connect(&self) -> crate::Result<Session> {
            Ok(Session {
                wallet: FakeWallet::new("GABC", WalletType::Stellar),
                marker: json!({ "id": "freighter", "address": "GABC" }),
            })
        }

        async fn restore(&self, marker: &Value) -> crate::Result<Arc<dyn OmniWallet>> {
            if marker["id"] != "freighter" {
                return Err(crate::Error::WalletNotFound(marker["id"].to_string()));
            }
            let address = marker["address"].as_str().unwrap_or_default();
            Ok(FakeWallet::new(address, WalletType::Stellar))
        }

        async fn disconnect(&self) -> crate::Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn connect_persists_and_restores() {
        let storage: Arc<dyn DataStorage> = Arc::new(MemoryStorage::new());
        let session = Arc::new(KitSession::default());

        let first = StoredKeyConnector::new(info("stellar", WalletType::Stellar), session.clone(), storage.clone()).await;
        assert!(first.wallet().is_none());
        first.connect().await.unwrap();
        assert!(storage.get("hot-connector:stellar").await.unwrap().is_some());

        let second = StoredKeyConnector::new(info("stellar", WalletType::Stellar), session.clone(), storage.clone()).await;
        let wallet = second.wallet().expect("restored");
        assert_eq!(wallet.address().await.unwrap(), "GABC");

        second.disconnect(true).await.unwrap();
        assert_eq!(storage.get("hot-connector:stellar").await.unwrap(), None);
        assert_eq!(session.disconnects.load(Ordering::SeqCst), 1);
        assert!(second.wallet().is_none());
    }

    #[tokio::test]
    async fn broken_marker_demotes_to_disconnected() {
        let storage: Arc<dyn DataStorage> = Arc::new(MemoryStorage::new());
        storage.set("hot-connector:stellar", r#"{"id":"lobstr"}"#).await.unwrap();
        let connector = StoredKeyConnector::new(
            info("stellar", WalletType::Stellar),
            Arc::new(KitSession::default()),
            storage.clone(),
        )
        .await;
        assert!(connector.wallet().is_none());

        storage.set("hot-connector:stellar", "not json").await.unwrap();
        let connector = StoredKeyConnector::new(
            info("stellar", WalletType::Stellar),
            Arc::new(KitSession::default()),
            storage,
        )
        .await;
        assert!(connector.wallet().is_none());
    }
}
