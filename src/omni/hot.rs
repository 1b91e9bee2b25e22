//! Aggregator over chain connectors

use super::{OmniConnector, OmniEvent, OmniEventKind, OmniHandler, OmniWallet, Subscription};
use crate::events::EventEmitter;
use crate::prompt::{ChainChoice, ChainOption, ChainPicker};
use std::sync::{Arc, PoisonError, RwLock};

struct Attached {
    connector: Arc<dyn OmniConnector>,
    forwarders: Vec<Subscription>,
}

/// Fans `connect` out to chain connectors and republishes their events on one bus
pub struct HotConnector {
    connectors: RwLock<Vec<Attached>>,
    events: EventEmitter<OmniEvent>,
    picker: Option<Arc<dyn ChainPicker>>,
}

impl HotConnector {
    pub fn new(connectors: Vec<Arc<dyn OmniConnector>>) -> Self {
        let hot = Self {
            connectors: RwLock::new(Vec::new()),
            events: EventEmitter::new(),
            picker: None,
        };
        for connector in connectors {
            hot.add_connector(connector);
        }
        hot
    }

    /// Picker offered by [`HotConnector::connect`] when no connector id is given
    pub fn with_picker(mut self, picker: Arc<dyn ChainPicker>) -> Self {
        self.picker = Some(picker);
        self
    }

    pub fn connectors(&self) -> Vec<Arc<dyn OmniConnector>> {
        self.connectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|a| Arc::clone(&a.connector))
            .collect()
    }

    /// Connected wallets, one per connected chain
    pub fn wallets(&self) -> Vec<Arc<dyn OmniWallet>> {
        self.connectors()
            .iter()
            .filter_map(|c| c.wallet())
            .collect()
    }

    pub fn add_connector(&self, connector: Arc<dyn OmniConnector>) {
        let forward = |kind: OmniEventKind| -> OmniHandler {
            let events = self.events.clone();
            Box::new(move |event: &OmniEvent| {
                tracing::debug!(event = ?kind, "Forwarding chain connector event");
                events.emit(event.clone());
            })
        };
        let forwarders = vec![
            connector.on_connect(forward(OmniEventKind::Connect)),
            connector.on_disconnect(forward(OmniEventKind::Disconnect)),
        ];

        tracing::debug!(connector = connector.id(), "Added chain connector");
        self.connectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Attached {
                connector,
                forwarders,
            });
    }

    /// Detach a connector and end its session without asking.
    ///
    /// Returns false when no connector has that id.
    pub async fn remove_connector(&self, id: &str) -> bool {
        let removed = {
            let mut connectors = self.connectors.write().unwrap_or_else(PoisonError::into_inner);
            connectors
                .iter()
                .position(|a| a.connector.id() == id)
                .map(|index| connectors.remove(index))
        };
        let Some(Attached {
            connector,
            forwarders,
        }) = removed
        else {
            return false;
        };

        for forwarder in forwarders {
            forwarder.unsubscribe();
        }
        if let Err(e) = connector.disconnect(true).await {
            tracing::warn!(connector = id, error = %e, "Disconnect of removed connector failed");
        }
        true
    }

    fn find(&self, id: &str) -> crate::Result<Arc<dyn OmniConnector>> {
        self.connectors()
            .into_iter()
            .find(|c| c.id() == id)
            .ok_or_else(|| crate::Error::WalletNotFound(id.to_string()))
    }

    /// Connect the chain connector `id`, or let the user pick one
    pub async fn connect(&self, id: Option<&str>) -> crate::Result<()> {
        if let Some(id) = id {
            return self.find(id)?.connect().await;
        }

        let picker = self
            .picker
            .as_ref()
            .ok_or_else(|| crate::Error::NotSupported("chain picker".to_string()))?;
        match picker.pick_chain(self.options().await).await? {
            ChainChoice::Connect(id) => self.find(&id)?.connect().await,
            ChainChoice::Disconnect(id) => self.find(&id)?.disconnect(false).await,
        }
    }

    async fn options(&self) -> Vec<ChainOption> {
        let mut options = Vec::new();
        for connector in self.connectors() {
            let wallet = connector.wallet();
            let address = match &wallet {
                Some(wallet) => wallet.address().await.ok(),
                None => None,
            };
            let info = connector.info();
            options.push(ChainOption {
                id: info.id.clone(),
                name: info.name.clone(),
                icon: info.icon.clone(),
                wallet_type: info.wallet_type,
                address,
                connected: wallet.is_some(),
            });
        }
        options
    }

    pub fn on_connect(&self, handler: OmniHandler) -> Subscription {
        Subscription {
            events: self.events.clone(),
            id: self.events.on(OmniEventKind::Connect, handler),
        }
    }

    pub fn on_disconnect(&self, handler: OmniHandler) -> Subscription {
        Subscription {
            events: self.events.clone(),
            id: self.events.on(OmniEventKind::Disconnect, handler),
        }
    }

    pub fn remove_all_listeners(&self) {
        self.events.remove_all_listeners(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::omni::tests::FakeConnector;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    struct Pick(ChainChoice);

    #[async_trait]
    impl ChainPicker for Pick {
        async fn pick_chain(&self, options: Vec<ChainOption>) -> crate::Result<ChainChoice> {
            assert_eq!(options.len(), 2);
            Ok(self.0.clone())
        }
    }

    fn recorder(hot: &HotConnector) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        hot.on_connect(Box::new(move |_: &OmniEvent| log.lock().unwrap().push("connect".into())));
        let log = seen.clone();
        hot.on_disconnect(Box::new(move |_: &OmniEvent| log.lock().unwrap().push("disconnect".into())));
        seen
    }

    #[tokio::test]
    async fn republishes_child_events() {
        let evm = FakeConnector::new("evm", "0xabc");
        let ton = FakeConnector::new("ton", "EQ123");
        let hot = HotConnector::new(vec![evm.clone() as Arc<dyn OmniConnector>, ton.clone()]);
        let seen = recorder(&hot);

        hot.connect(Some("ton")).await.unwrap();
        assert_eq!(hot.wallets().len(), 1);
        evm.connect().await.unwrap();
        assert_eq!(hot.wallets().len(), 2);
        ton.disconnect(true).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["connect", "connect", "disconnect"]);
        assert!(matches!(
            hot.connect(Some("solana")).await,
            Err(crate::Error::WalletNotFound(_))
        ));
    }

    #[tokio::test]
    async fn removed_connector_is_detached_and_torn_down() {
        let evm = FakeConnector::new("evm", "0xabc");
        let hot = HotConnector::new(vec![evm.clone() as Arc<dyn OmniConnector>]);
        let seen = recorder(&hot);
        let app_hits = Arc::new(Mutex::new(0));
        let hits = app_hits.clone();
        evm.on_connect(Box::new(move |_: &OmniEvent| *hits.lock().unwrap() += 1));

        hot.connect(Some("evm")).await.unwrap();
        assert!(hot.remove_connector("evm").await);
        assert!(!hot.remove_connector("evm").await);
        assert_eq!(evm.teardowns.load(Ordering::SeqCst), 1);
        assert!(hot.connectors().is_empty());

        // Listeners registered by others survive the removal.
        evm.connect().await.unwrap();
        assert_eq!(*app_hits.lock().unwrap(), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["connect"]);
    }

    #[tokio::test]
    async fn picker_chooses_the_connector() {
        let evm = FakeConnector::new("evm", "0xabc");
        let ton = FakeConnector::new("ton", "EQ123");
        let hot = HotConnector::new(vec![evm.clone() as Arc<dyn OmniConnector>, ton.clone()])
            .with_picker(Arc::new(Pick(ChainChoice::Connect("evm".into()))));

        hot.connect(None).await.unwrap();
        assert!(evm.wallet().is_some());
        assert!(ton.wallet().is_none());

        let bare = HotConnector::new(vec![]);
        assert!(matches!(bare.connect(None).await, Err(crate::Error::NotSupported(_))));
    }
}
