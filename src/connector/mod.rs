//! NEAR wallet connector
//!
//! Owns the backend registry and drives the session lifecycle:
//!
//! ```text
//! Uninitialized -> ManifestLoading -> Ready
//! ```
//!
//! Loading starts on construction. The manifest is fetched (or taken inline), filtered,
//! and registered; debug wallets are restored from storage; then, after a short settle
//! delay, the connector turns ready. Every wallet-touching operation waits for ready
//! first. A manifest that fails to load leaves an empty registry, never a stuck gate.

mod banned;
mod discovery;

pub use banned::{validate_banned_in_tx, BannedAddressCheck, BannedList};
pub use discovery::{DiscoveryEvent, DiscoveryHandle, NEAR_SELECTOR_READY};

use crate::config::{ConnectorConfig, ManifestSource, ManifestSources};
use crate::events::{EventEmitter, EventMap, ListenerId};
use crate::manifest::{
    filter_manifest, load_manifest, validate_debug_manifest, HttpManifestFetcher,
    ManifestDocument, ManifestFetcher, WalletManifest,
};
use crate::plugins::{Plugin, PluginManager};
use crate::prompt::WalletPicker;
use crate::proxy::WalletProxy;
use crate::rpc::RpcBridge;
use crate::storage::{DataStorage, MemoryStorage, DEBUG_WALLETS_KEY, SELECTED_WALLET_KEY};
use crate::wallet::{
    Account, Backend, InProcessSandboxHost, InjectedProvider, InjectedWallet, NearWallet,
    Network, NetworkParams, ParentFrameWallet, SandboxHost, SandboxWallet, SignInParams,
    Transaction, WalletContext,
};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Uninitialized,
    ManifestLoading,
    Ready,
}

#[derive(Clone)]
pub enum ConnectorEvent {
    SignIn {
        wallet: WalletProxy,
        accounts: Vec<Account>,
        success: bool,
    },
    SignOut {
        success: bool,
    },
    /// The backend registry changed; rebuild any view of it
    WalletsChanged,
    ManifestUpdated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorEventKind {
    SignIn,
    SignOut,
    WalletsChanged,
    ManifestUpdated,
}

impl EventMap for ConnectorEvent {
    type Kind = ConnectorEventKind;

    fn kind(&self) -> ConnectorEventKind {
        match self {
            ConnectorEvent::SignIn { .. } => ConnectorEventKind::SignIn,
            ConnectorEvent::SignOut { .. } => ConnectorEventKind::SignOut,
            ConnectorEvent::WalletsChanged => ConnectorEventKind::WalletsChanged,
            ConnectorEvent::ManifestUpdated => ConnectorEventKind::ManifestUpdated,
        }
    }
}

/// External collaborators of a connector
#[derive(Clone)]
pub struct ConnectorServices {
    pub storage: Arc<dyn DataStorage>,
    pub fetcher: Arc<dyn ManifestFetcher>,
    pub sandbox_host: Arc<dyn SandboxHost>,
    pub picker: Option<Arc<dyn WalletPicker>>,
    pub banned: Option<Arc<dyn BannedAddressCheck>>,
}

impl Default for ConnectorServices {
    fn default() -> Self {
        Self {
            storage: Arc::new(MemoryStorage::new()),
            fetcher: Arc::new(HttpManifestFetcher::new()),
            sandbox_host: Arc::new(InProcessSandboxHost::new()),
            picker: None,
            banned: None,
        }
    }
}

/// Result of [`NearConnector::get_connected_wallet`]
#[derive(Debug, Clone)]
pub struct ConnectedWallet {
    pub wallet: WalletProxy,
    pub accounts: Vec<Account>,
}

struct Inner {
    config: ConnectorConfig,
    ctx: WalletContext,
    services: ConnectorServices,
    plugins: PluginManager,
    events: EventEmitter<ConnectorEvent>,
    manifest: RwLock<ManifestDocument>,
    wallets: RwLock<Vec<Arc<Backend>>>,
    state: watch::Receiver<ConnectorState>,
}

/// Cheaply cloneable handle; clones share one registry and session.
#[derive(Clone)]
pub struct NearConnector {
    inner: Arc<Inner>,
}

impl NearConnector {
    /// Create the connector and start loading the manifest in the background.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: ConnectorConfig, services: ConnectorServices) -> Self {
        Self::with_plugins(config, services, PluginManager::new())
    }

    pub fn with_plugins(
        config: ConnectorConfig,
        services: ConnectorServices,
        plugins: PluginManager,
    ) -> Self {
        let mut ctx = WalletContext::new(config.network, config.providers.clone(), config.rpc_timeout());
        if let Some(check) = &services.banned {
            ctx = ctx.with_banned_check(Arc::clone(check));
        }

        let (state_tx, state_rx) = watch::channel(ConnectorState::Uninitialized);
        let connector = Self {
            inner: Arc::new(Inner {
                config,
                ctx,
                services,
                plugins,
                events: EventEmitter::new(),
                manifest: RwLock::new(ManifestDocument::default()),
                wallets: RwLock::new(Vec::new()),
                state: state_rx,
            }),
        };

        state_tx.send_replace(ConnectorState::ManifestLoading);
        let loader = connector.clone();
        tokio::spawn(async move {
            loader.initialize().await;
            state_tx.send_replace(ConnectorState::Ready);
            info!(wallets = loader.wallet_count(), "Connector ready");
        });

        connector
    }

    async fn initialize(&self) {
        let document = self.fetch_manifest().await;
        let document = filter_manifest(
            document,
            &self.inner.config.excluded_wallets,
            self.inner.config.wallet_connect.is_some(),
        );
        *self
            .inner
            .manifest
            .write()
            .unwrap_or_else(PoisonError::into_inner) = document.clone();
        self.inner.events.emit(ConnectorEvent::ManifestUpdated);

        // Late injection announcements arrive during this window.
        tokio::time::sleep(self.inner.config.settle_delay()).await;

        for manifest in document.wallets {
            let id = manifest.id.clone();
            if let Err(e) = self.register_wallet(manifest) {
                debug!(wallet_id = %id, error = %e, "Skipping manifest entry");
            }
        }
        self.restore_debug_wallets().await;
    }

    async fn fetch_manifest(&self) -> ManifestDocument {
        let source = &self.inner.config.manifest;
        if let ManifestSource::Inline(document) = source {
            return document.clone();
        }

        let urls = ManifestSources::for_source(source)
            .map(|sources| sources.urls().to_vec())
            .unwrap_or_default();
        match load_manifest(self.inner.services.fetcher.as_ref(), &urls).await {
            Ok(document) => document,
            Err(e) => {
                warn!(error = %e, "Manifest unavailable, continuing with no wallets");
                ManifestDocument::default()
            }
        }
    }

    async fn restore_debug_wallets(&self) {
        let raw = match self.inner.services.storage.get(DEBUG_WALLETS_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Could not read debug wallets");
                return;
            }
        };
        let manifests: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(manifests) => manifests,
            Err(e) => {
                warn!(error = %e, "Stored debug wallets are not a JSON array");
                return;
            }
        };
        for manifest in manifests {
            if let Err(e) = self.register_debug_wallet(&manifest).await {
                warn!(error = %e, "Failed to restore debug wallet");
            }
        }
    }

    /// Wait for the manifest gate
    pub async fn when_ready(&self) {
        let mut state = self.inner.state.clone();
        if state
            .wait_for(|s| *s == ConnectorState::Ready)
            .await
            .is_err()
        {
            // Loader went away without flipping the gate; carry on with what we have.
            warn!("Manifest loader stopped before ready");
        }
    }

    pub fn state(&self) -> ConnectorState {
        *self.inner.state.borrow()
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    pub fn context(&self) -> &WalletContext {
        &self.inner.ctx
    }

    pub fn network(&self) -> Network {
        self.inner.ctx.network()
    }

    /// The filtered manifest
    pub fn manifest(&self) -> ManifestDocument {
        self.inner
            .manifest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn backends(&self) -> Vec<Arc<Backend>> {
        self.inner
            .wallets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn wallet_count(&self) -> usize {
        self.inner
            .wallets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn find(&self, id: &str) -> Option<Arc<Backend>> {
        self.backends().into_iter().find(|b| b.id() == id)
    }

    /// Every registered wallet, in precedence order
    pub fn wallets(&self) -> Vec<WalletManifest> {
        self.backends()
            .iter()
            .map(|b| b.manifest().clone())
            .collect()
    }

    /// Registered wallets offering the required features, and testnet when on testnet
    pub fn available_wallets(&self) -> Vec<WalletManifest> {
        let required = &self.inner.config.features;
        let testnet = self.network() == Network::Testnet;
        self.wallets()
            .into_iter()
            .filter(|m| m.features.satisfies(required))
            .filter(|m| !testnet || m.features.testnet())
            .collect()
    }

    fn wallets_changed(&self) {
        self.inner.events.emit(ConnectorEvent::WalletsChanged);
    }

    /// Put `backend` first, replacing any backend with the same id
    fn replace_front(&self, backend: Backend) {
        {
            let mut wallets = self
                .inner
                .wallets
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            wallets.retain(|b| b.id() != backend.id());
            wallets.insert(0, Arc::new(backend));
        }
        self.wallets_changed();
    }

    fn sandbox(&self, manifest: WalletManifest) -> Backend {
        Backend::Sandbox(SandboxWallet::new(
            manifest,
            self.inner.ctx.clone(),
            Arc::clone(&self.inner.services.sandbox_host),
            Arc::clone(&self.inner.services.storage),
        ))
    }

    /// Register a sandbox wallet. Registering an id twice is a no-op.
    pub fn register_wallet(&self, manifest: WalletManifest) -> crate::Result<()> {
        if !manifest.is_sandbox() {
            return Err(crate::Error::UnsupportedWalletType(manifest.kind));
        }
        {
            let mut wallets = self
                .inner
                .wallets
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if wallets.iter().any(|b| b.id() == manifest.id) {
                return Ok(());
            }
            debug!(wallet_id = %manifest.id, "Registered wallet");
            wallets.push(Arc::new(self.sandbox(manifest)));
        }
        self.wallets_changed();
        Ok(())
    }

    /// Validate and register a developer-supplied manifest, ahead of every other wallet.
    ///
    /// Rejected when a field is missing or the id is taken; the registry is then unchanged.
    pub async fn register_debug_wallet(&self, raw: &Value) -> crate::Result<WalletManifest> {
        let mut manifest = validate_debug_manifest(raw)?;
        manifest.debug = true;
        {
            let mut wallets = self
                .inner
                .wallets
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if wallets.iter().any(|b| b.id() == manifest.id) {
                return Err(crate::Error::WalletAlreadyRegistered(manifest.id));
            }
            wallets.insert(0, Arc::new(self.sandbox(manifest.clone())));
        }
        info!(wallet_id = %manifest.id, "Registered debug wallet");
        self.wallets_changed();
        self.persist_debug_wallets().await?;
        Ok(manifest)
    }

    /// Parse `json` and register it as a debug wallet
    pub async fn register_debug_wallet_json(&self, json: &str) -> crate::Result<WalletManifest> {
        let raw: Value = serde_json::from_str(json)
            .map_err(|e| crate::Error::InvalidManifest(e.to_string()))?;
        self.register_debug_wallet(&raw).await
    }

    /// Remove a debug wallet; manifest and announced wallets are left alone
    pub async fn remove_debug_wallet(&self, id: &str) -> crate::Result<()> {
        self.inner
            .wallets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|b| b.id() != id || !b.manifest().debug);
        self.persist_debug_wallets().await?;
        self.wallets_changed();
        Ok(())
    }

    async fn persist_debug_wallets(&self) -> crate::Result<()> {
        let debug: Vec<WalletManifest> = self
            .wallets()
            .into_iter()
            .filter(|m| m.debug)
            .collect();
        self.inner
            .services
            .storage
            .set(DEBUG_WALLETS_KEY, &serde_json::to_string(&debug)?)
            .await
    }

    /// Register a wallet the embedding application injected; it takes precedence
    pub fn register_injected(&self, provider: Arc<dyn InjectedProvider>) {
        let wallet = InjectedWallet::new(provider, self.inner.ctx.clone());
        info!(wallet_id = %wallet.manifest().id, "Injected wallet announced");
        self.replace_front(Backend::Injected(wallet));
    }

    /// Register the wallet announced by the hosting frame
    pub fn register_parent_frame(&self, manifest: WalletManifest, bridge: RpcBridge) {
        info!(wallet_id = %manifest.id, "Parent frame wallet announced");
        let wallet = ParentFrameWallet::new(manifest, self.inner.ctx.clone(), bridge);
        self.replace_front(Backend::ParentFrame(wallet));
    }

    fn proxy(&self, backend: Arc<Backend>) -> WalletProxy {
        WalletProxy::new(backend, self.inner.plugins.clone())
    }

    /// Ask the picker for one of the available wallets
    pub async fn select_wallet(&self) -> crate::Result<String> {
        self.when_ready().await;
        let picker = self
            .inner
            .services
            .picker
            .as_ref()
            .ok_or_else(|| crate::Error::NotSupported("selectWallet".to_string()))?;
        picker.select_wallet(self.available_wallets()).await
    }

    /// Sign in to wallet `id`, or to the wallet the user picks.
    ///
    /// On any failure the persisted selection is cleared.
    pub async fn connect(&self, id: Option<&str>) -> crate::Result<WalletProxy> {
        self.when_ready().await;
        let id = match id {
            Some(id) => id.to_string(),
            None => self.select_wallet().await?,
        };

        match self.sign_in(&id).await {
            Ok(wallet) => Ok(wallet),
            Err(e) => {
                warn!(wallet_id = %id, error = %e, "Failed to connect to wallet");
                if let Err(clear) = self.inner.services.storage.remove(SELECTED_WALLET_KEY).await {
                    warn!(error = %clear, "Could not clear wallet selection");
                }
                Err(e)
            }
        }
    }

    async fn sign_in(&self, id: &str) -> crate::Result<WalletProxy> {
        let wallet = self.wallet(Some(id)).await?;
        self.inner
            .services
            .storage
            .set(SELECTED_WALLET_KEY, id)
            .await?;
        debug!(wallet_id = %id, "Selected wallet, signing in");

        let accounts = wallet.sign_in(SignInParams::default()).await?;
        if accounts.is_empty() {
            return Err(crate::Error::SignInFailed(id.to_string()));
        }
        self.disconnect_if_banned(&wallet, &accounts).await?;

        info!(wallet_id = %id, accounts = accounts.len(), "Signed in");
        self.inner.events.emit(ConnectorEvent::SignIn {
            wallet: wallet.clone(),
            accounts,
            success: true,
        });
        Ok(wallet)
    }

    /// Sign out of `wallet`, or of the connected wallet, and clear the selection
    pub async fn disconnect(&self, wallet: Option<&dyn NearWallet>) -> crate::Result<()> {
        match wallet {
            Some(wallet) => self.sign_out(wallet).await,
            None => {
                let wallet = self.wallet(None).await?;
                self.sign_out(&wallet).await
            }
        }
    }

    async fn sign_out(&self, wallet: &dyn NearWallet) -> crate::Result<()> {
        wallet
            .sign_out(NetworkParams::on(self.network()))
            .await?;
        self.inner
            .services
            .storage
            .remove(SELECTED_WALLET_KEY)
            .await?;
        info!(wallet_id = %wallet.manifest().id, "Signed out");
        self.inner
            .events
            .emit(ConnectorEvent::SignOut { success: true });
        Ok(())
    }

    /// The persisted session, re-validated.
    ///
    /// `NoWalletSelected` and `NoAccounts` mean "not connected".
    pub async fn get_connected_wallet(&self) -> crate::Result<ConnectedWallet> {
        self.when_ready().await;
        let selected = self.inner.services.storage.get(SELECTED_WALLET_KEY).await?;
        let backend = selected
            .as_deref()
            .and_then(|id| self.find(id))
            .ok_or(crate::Error::NoWalletSelected)?;

        let accounts = backend.get_accounts(NetworkParams::default()).await?;
        if accounts.is_empty() {
            return Err(crate::Error::NoAccounts);
        }

        let wallet = self.proxy(backend);
        self.disconnect_if_banned(&wallet, &accounts).await?;
        Ok(ConnectedWallet { wallet, accounts })
    }

    /// Wallet `id`, or the connected wallet when `id` is `None`.
    ///
    /// Without a usable session the selection is cleared and `NoAccounts` returned.
    pub async fn wallet(&self, id: Option<&str>) -> crate::Result<WalletProxy> {
        self.when_ready().await;
        match id {
            Some(id) => self
                .find(id)
                .map(|backend| self.proxy(backend))
                .ok_or_else(|| crate::Error::WalletNotFound(id.to_string())),
            None => match self.get_connected_wallet().await {
                Ok(connected) => Ok(connected.wallet),
                Err(e) => {
                    debug!(error = %e, "No connected wallet");
                    self.inner
                        .services
                        .storage
                        .remove(SELECTED_WALLET_KEY)
                        .await?;
                    Err(crate::Error::NoAccounts)
                }
            },
        }
    }

    /// Sign out of `wallet` and fail if any account is banned
    pub async fn disconnect_if_banned(
        &self,
        wallet: &dyn NearWallet,
        accounts: &[Account],
    ) -> crate::Result<()> {
        if self.inner.ctx.banned_check().is_none() {
            return Ok(());
        }
        for account in accounts {
            if self.inner.ctx.is_banned(&account.account_id).await? {
                warn!(account_id = %account.account_id, "Banned account, disconnecting");
                if let Err(e) = self.sign_out(wallet).await {
                    warn!(error = %e, "Sign-out of banned account failed");
                }
                return Err(crate::Error::BannedAddress(account.account_id.clone()));
            }
        }
        Ok(())
    }

    /// Best-effort sign-out, switch network, then connect again
    pub async fn switch_network(&self, network: Network) -> crate::Result<WalletProxy> {
        if let Err(e) = self.disconnect(None).await {
            debug!(error = %e, "Ignoring disconnect failure while switching network");
        }
        self.inner.ctx.set_network(network);
        info!(network = %network, "Switched network");
        self.connect(None).await
    }

    /// Reject `tx` if its receiver or a nested receiver is banned
    pub async fn validate_banned_near_address_in_tx(&self, tx: &Transaction) -> crate::Result<()> {
        self.inner
            .ctx
            .validate_transaction(&tx.receiver_id, &tx.actions)
            .await
    }

    /// Append a plugin to the chain of every wallet this connector hands out
    pub fn use_plugin(&self, plugin: Arc<dyn Plugin>) {
        self.inner.plugins.use_plugin(plugin);
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.inner.plugins
    }

    pub fn on<F>(&self, kind: ConnectorEventKind, callback: F) -> ListenerId
    where
        F: Fn(&ConnectorEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, callback)
    }

    pub fn once<F>(&self, kind: ConnectorEventKind, callback: F) -> ListenerId
    where
        F: Fn(&ConnectorEvent) + Send + Sync + 'static,
    {
        self.inner.events.once(kind, callback)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    pub fn remove_all_listeners(&self, kind: Option<ConnectorEventKind>) {
        self.inner.events.remove_all_listeners(kind);
    }

    pub fn events(&self) -> &EventEmitter<ConnectorEvent> {
        &self.inner.events
    }
}
