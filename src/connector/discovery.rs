//! Backend discovery
//!
//! Wallets announced at runtime (an injected provider, or the hosting frame's wallet)
//! arrive as [`DiscoveryEvent`]s on a channel the caller hands to
//! [`NearConnector::attach_discovery`]. The connector owns the listening task; dropping
//! the returned [`DiscoveryHandle`] stops it.

use super::NearConnector;
use crate::manifest::WalletManifest;
use crate::rpc::RpcBridge;
use crate::wallet::{InjectedProvider, PARENT_FRAME_NAMESPACE};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Sent to the hosting frame once the connector is ready for announcements
pub const NEAR_SELECTOR_READY: &str = "near-selector-ready";

pub enum DiscoveryEvent {
    /// A provider injected by the embedding application
    Injected(Arc<dyn InjectedProvider>),
    /// Any message posted by the hosting frame: announcements and RPC replies alike
    FrameMessage(Value),
}

/// Stops the discovery task when dropped
pub struct DiscoveryHandle {
    task: JoinHandle<()>,
}

impl DiscoveryHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for DiscoveryHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl NearConnector {
    /// Listen for wallet announcements on `events`.
    ///
    /// `parent` is the channel to the hosting frame, if there is one; parent-frame wallets
    /// talk over it and announcements are ignored without it. The task ends when `events`
    /// closes, failing any parent-frame call still in flight.
    pub fn attach_discovery(
        &self,
        mut events: mpsc::Receiver<DiscoveryEvent>,
        parent: Option<mpsc::Sender<Value>>,
    ) -> DiscoveryHandle {
        let connector = self.clone();
        let bridge = parent.as_ref().map(|outbound| {
            RpcBridge::new(
                PARENT_FRAME_NAMESPACE,
                outbound.clone(),
                connector.config().rpc_timeout(),
            )
        });

        let task = tokio::spawn(async move {
            connector.when_ready().await;
            if let Some(parent) = &parent {
                if parent
                    .send(json!({ "type": NEAR_SELECTOR_READY }))
                    .await
                    .is_err()
                {
                    warn!("Hosting frame channel closed before ready");
                }
            }

            while let Some(event) = events.recv().await {
                match event {
                    DiscoveryEvent::Injected(provider) => connector.register_injected(provider),
                    DiscoveryEvent::FrameMessage(message) => {
                        connector.handle_frame_message(&message, bridge.as_ref()).await;
                    }
                }
            }

            debug!("Discovery channel closed");
            if let Some(bridge) = bridge {
                bridge.fail_all().await;
            }
        });

        DiscoveryHandle { task }
    }

    async fn handle_frame_message(&self, message: &Value, bridge: Option<&RpcBridge>) {
        if let Some(bridge) = bridge {
            if bridge.handle_message(message).await {
                return;
            }
        }
        if message.get("type").and_then(Value::as_str) != Some(PARENT_FRAME_NAMESPACE) {
            return;
        }

        let Some(bridge) = bridge else {
            warn!("Wallet announced without a hosting frame channel, ignoring");
            return;
        };
        let manifest = match message
            .get("manifest")
            .cloned()
            .map(serde_json::from_value::<WalletManifest>)
        {
            Some(Ok(manifest)) => manifest,
            Some(Err(e)) => {
                warn!(error = %e, "Malformed wallet announcement");
                return;
            }
            None => {
                warn!("Wallet announcement without a manifest");
                return;
            }
        };

        let id = manifest.id.clone();
        self.register_parent_frame(manifest, bridge.clone());
        self.auto_connect(id);
    }

    fn auto_connect(&self, id: String) {
        if !self.config().auto_connect {
            return;
        }
        let connector = self.clone();
        tokio::spawn(async move {
            if let Err(e) = connector.connect(Some(&id)).await {
                warn!(wallet_id = %id, error = %e, "Auto-connect failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::tests::{quick_config, scripted};
    use crate::connector::{ConnectorEventKind, ConnectorServices};
    use crate::manifest::sample_manifest;
    use crate::rpc::RpcResponse;
    use crate::storage::{DataStorage, MemoryStorage, SELECTED_WALLET_KEY};
    use crate::wallet::{Account, MockProvider, NearWallet, NetworkParams};
    use std::time::Duration;

    fn connector(auto_connect: bool) -> NearConnector {
        let mut config = quick_config(vec![sample_manifest("w1")]);
        config.auto_connect = auto_connect;
        NearConnector::new(config, ConnectorServices::default())
    }

    fn changes(connector: &NearConnector) -> mpsc::UnboundedReceiver<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        connector.on(ConnectorEventKind::WalletsChanged, move |_| {
            let _ = tx.send(());
        });
        rx
    }

    #[tokio::test]
    async fn injected_wallet_takes_precedence_without_signing_in() {
        let connector = connector(true);
        connector.when_ready().await;
        let mut changed = changes(&connector);
        let signed_in = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = signed_in.clone();
        connector.on(ConnectorEventKind::SignIn, move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        let (tx, rx) = mpsc::channel(8);
        let _handle = connector.attach_discovery(rx, None);
        tx.send(DiscoveryEvent::Injected(Arc::new(MockProvider::new("inj", Value::Null))))
            .await
            .unwrap();
        changed.recv().await.unwrap();
        let ids: Vec<String> = connector.wallets().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["inj", "w1"]);

        // A second announcement with the same id replaces the first.
        tx.send(DiscoveryEvent::Injected(Arc::new(MockProvider::new("inj", Value::Null))))
            .await
            .unwrap();
        changed.recv().await.unwrap();
        assert_eq!(connector.wallets().len(), 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(signed_in.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(
            connector.inner.services.storage.get(SELECTED_WALLET_KEY).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn injected_announcement_keeps_existing_session() {
        let storage = Arc::new(MemoryStorage::new());
        let (connector, _) = scripted(&["w1"], storage.clone());
        connector.connect(Some("w1")).await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        let mut changed = changes(&connector);
        let _handle = connector.attach_discovery(rx, None);
        let rejecting = MockProvider::new("inj", Value::Null).rejecting_sign_in();
        tx.send(DiscoveryEvent::Injected(Arc::new(rejecting))).await.unwrap();
        changed.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(storage.get(SELECTED_WALLET_KEY).await.unwrap().as_deref(), Some("w1"));
        let connected = connector.get_connected_wallet().await.unwrap();
        assert_eq!(connected.wallet.manifest().id, "w1");
    }

    #[tokio::test]
    async fn parent_frame_wallet_round_trip() {
        let connector = connector(false);
        connector.when_ready().await;
        let mut changed = changes(&connector);

        let (tx, rx) = mpsc::channel(8);
        let (parent_tx, mut parent_rx) = mpsc::channel(8);
        let _handle = connector.attach_discovery(rx, Some(parent_tx));
        assert_eq!(parent_rx.recv().await.unwrap(), json!({ "type": NEAR_SELECTOR_READY }));

        let manifest = serde_json::to_value(sample_manifest("host")).unwrap();
        tx.send(DiscoveryEvent::FrameMessage(
            json!({ "type": PARENT_FRAME_NAMESPACE, "manifest": manifest }),
        ))
        .await
        .unwrap();
        changed.recv().await.unwrap();
        assert_eq!(connector.wallets()[0].id, "host");

        let wallet = connector.wallet(Some("host")).await.unwrap();
        let call = tokio::spawn(async move { wallet.get_accounts(NetworkParams::default()).await });

        let request = parent_rx.recv().await.unwrap();
        assert_eq!(request["method"], "near:getAccounts");
        assert_eq!(request["params"]["network"], "mainnet");
        let id = request["id"].as_str().unwrap().to_string();
        let reply = RpcResponse::ok(PARENT_FRAME_NAMESPACE, id, json!([{ "accountId": "host.near" }]));
        tx.send(DiscoveryEvent::FrameMessage(reply.to_value())).await.unwrap();

        let accounts = call.await.unwrap().unwrap();
        assert_eq!(accounts, vec![Account::new("host.near")]);
    }

    #[tokio::test]
    async fn announcement_without_parent_channel_is_ignored() {
        let connector = connector(false);
        connector.when_ready().await;
        let mut changed = changes(&connector);

        let (tx, rx) = mpsc::channel(8);
        let _handle = connector.attach_discovery(rx, None);
        let manifest = serde_json::to_value(sample_manifest("host")).unwrap();
        tx.send(DiscoveryEvent::FrameMessage(
            json!({ "type": PARENT_FRAME_NAMESPACE, "manifest": manifest }),
        ))
        .await
        .unwrap();
        tx.send(DiscoveryEvent::Injected(Arc::new(MockProvider::new("inj", Value::Null))))
            .await
            .unwrap();

        changed.recv().await.unwrap();
        let ids: Vec<String> = connector.wallets().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["inj", "w1"]);
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_listening() {
        let connector = connector(false);
        let (tx, rx) = mpsc::channel::<DiscoveryEvent>(8);
        let handle = connector.attach_discovery(rx, None);
        drop(handle);
        tokio::time::timeout(Duration::from_secs(1), tx.closed())
            .await
            .expect("receiver dropped");
    }
}
