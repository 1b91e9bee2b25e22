//! Sandboxed executor backend
//!
//! Third-party wallet code runs in an isolated context launched by a [`SandboxHost`].
//! The host only sees JSON messages: wallet calls go out as `near-wallet-sandbox`
//! requests, and the sandbox may ask for its private storage partition with
//! `near-wallet-sandbox-host` requests (`storage.get`, `storage.set`, `storage.remove`).
//!
//! The context is launched on first use and lives until the wallet is dropped.

use super::{
    Account, CreateKeyParams, FinalExecutionOutcome, NearWallet, Network, NetworkParams,
    NetworkScoped, SignAndSendTransactionParams, SignAndSendTransactionsParams, SignInParams,
    SignMessageParams, SignedMessage, WalletContext,
};
use crate::config::Providers;
use crate::manifest::WalletManifest;
use crate::rpc::{MessageLink, RpcBridge, RpcRequest, RpcResponse};
use crate::storage::{DataStorage, ScopedStorage};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;

/// Wallet calls into the sandbox
pub const SANDBOX_NAMESPACE: &str = "near-wallet-sandbox";
/// Requests from the sandbox back to the host
pub const SANDBOX_HOST_NAMESPACE: &str = "near-wallet-sandbox-host";

/// What a sandbox is told about its surroundings at launch
#[derive(Debug, Clone, Serialize)]
pub struct SandboxEnv {
    pub wallet_id: String,
    pub network: Network,
    pub providers: Providers,
}

/// Starts isolated execution contexts
#[async_trait]
pub trait SandboxHost: Send + Sync {
    async fn launch(&self, manifest: &WalletManifest, env: &SandboxEnv) -> crate::Result<MessageLink>;
}

struct Launched {
    bridge: RpcBridge,
    reader: JoinHandle<()>,
}

impl Drop for Launched {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

pub struct SandboxWallet {
    manifest: WalletManifest,
    ctx: WalletContext,
    host: Arc<dyn SandboxHost>,
    storage: ScopedStorage,
    launched: OnceCell<Launched>,
}

impl SandboxWallet {
    pub fn new(
        manifest: WalletManifest,
        ctx: WalletContext,
        host: Arc<dyn SandboxHost>,
        storage: Arc<dyn DataStorage>,
    ) -> Self {
        let storage = ScopedStorage::new(manifest.id.clone(), storage);
        Self {
            manifest,
            ctx,
            host,
            storage,
            launched: OnceCell::new(),
        }
    }

    pub fn is_launched(&self) -> bool {
        self.launched.initialized()
    }

    async fn launch(&self) -> crate::Result<Launched> {
        let env = SandboxEnv {
            wallet_id: self.manifest.id.clone(),
            network: self.ctx.network(),
            providers: self.ctx.providers().clone(),
        };
        let MessageLink { outbound, inbound } = self.host.launch(&self.manifest, &env).await?;
        let bridge = RpcBridge::new(SANDBOX_NAMESPACE, outbound.clone(), self.ctx.rpc_timeout());
        let reader = tokio::spawn(serve_link(
            self.manifest.id.clone(),
            bridge.clone(),
            outbound,
            inbound,
            self.manifest.permissions.storage.then(|| self.storage.clone()),
        ));

        tracing::info!(wallet_id = %self.manifest.id, executor = %self.manifest.executor, "Launched sandbox");
        Ok(Launched { bridge, reader })
    }

    async fn call<P: Serialize, T: DeserializeOwned>(&self, method: &str, params: P) -> crate::Result<T> {
        let launched = self.launched.get_or_try_init(|| self.launch()).await?;
        let result = launched.bridge.call(method, serde_json::to_value(params)?).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Wipe the storage partition of this wallet
    pub async fn clear_storage(&self) -> crate::Result<()> {
        self.storage.clear().await
    }
}

/// Pump messages from the sandbox until it goes away
async fn serve_link(
    wallet_id: String,
    bridge: RpcBridge,
    outbound: mpsc::Sender<Value>,
    mut inbound: mpsc::Receiver<Value>,
    storage: Option<ScopedStorage>,
) {
    while let Some(message) = inbound.recv().await {
        if bridge.handle_message(&message).await {
            continue;
        }

        let Some(request) = RpcRequest::parse(SANDBOX_HOST_NAMESPACE, &message) else {
            tracing::debug!(wallet_id = %wallet_id, "Ignoring unrecognized sandbox message");
            continue;
        };

        tracing::debug!(wallet_id = %wallet_id, method = %request.method, "Sandbox host request");
        let outcome = match &storage {
            Some(storage) => serve_storage(storage, &request).await,
            None => Err(json!({ "message": "storage permission not granted" })),
        };
        let reply = RpcResponse::from_outcome(SANDBOX_HOST_NAMESPACE, request.id, outcome);
        if outbound.send(reply.to_value()).await.is_err() {
            break;
        }
    }

    tracing::debug!(wallet_id = %wallet_id, "Sandbox link closed");
    bridge.fail_all().await;
}

async fn serve_storage(storage: &ScopedStorage, request: &RpcRequest) -> Result<Value, Value> {
    let key = request
        .params
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| json!({ "message": "missing key" }))?;

    let result = match request.method.as_str() {
        "storage.get" => storage.get(key).await.map(|value| json!(value)),
        "storage.set" => {
            let value = request
                .params
                .get("value")
                .and_then(Value::as_str)
                .ok_or_else(|| json!({ "message": "missing value" }))?;
            storage.set(key, value).await.map(|_| Value::Null)
        }
        "storage.remove" => storage.remove(key).await.map(|_| Value::Null),
        other => return Err(json!({ "message": format!("unknown host method {}", other) })),
    };

    result.map_err(|e| json!({ "message": e.to_string() }))
}

#[async_trait]
impl NearWallet for SandboxWallet {
    fn manifest(&self) -> &WalletManifest {
        &self.manifest
    }

    async fn sign_in(&self, params: SignInParams) -> crate::Result<Vec<Account>> {
        let mut params = params.or_network(self.ctx.network());
        params.contract_id.get_or_insert_with(String::new);
        self.call("wallet:signIn", params).await
    }

    async fn sign_out(&self, params: NetworkParams) -> crate::Result<()> {
        let params = params.or_network(self.ctx.network());
        let _: Value = self.call("wallet:signOut", params).await?;
        self.clear_storage().await
    }

    async fn get_accounts(&self, params: NetworkParams) -> crate::Result<Vec<Account>> {
        let params = params.or_network(self.ctx.network());
        self.call("wallet:getAccounts", params).await
    }

    async fn sign_and_send_transaction(
        &self,
        params: SignAndSendTransactionParams,
    ) -> crate::Result<FinalExecutionOutcome> {
        self.ctx
            .validate_transaction(&params.receiver_id, &params.actions)
            .await?;
        let params = params.or_network(self.ctx.network());
        self.call("wallet:signAndSendTransaction", params).await
    }

    async fn sign_and_send_transactions(
        &self,
        params: SignAndSendTransactionsParams,
    ) -> crate::Result<Vec<FinalExecutionOutcome>> {
        self.ctx.validate_transactions(&params.transactions).await?;
        let params = params.or_network(self.ctx.network());
        self.call("wallet:signAndSendTransactions", params).await
    }

    async fn sign_message(&self, params: SignMessageParams) -> crate::Result<SignedMessage> {
        let params = params.or_network(self.ctx.network());
        self.call("wallet:signMessage", params).await
    }

    fn supports_create_key(&self) -> bool {
        self.manifest.features.has("createKey")
    }

    async fn create_key(&self, params: CreateKeyParams) -> crate::Result<()> {
        if !self.supports_create_key() {
            return Err(crate::Error::NotSupported("createKey".to_string()));
        }
        let _: Value = self.call("wallet:createKey", params).await?;
        Ok(())
    }
}

/// Wallet logic answering sandbox requests inside this process
#[async_trait]
pub trait SandboxHandler: Send + Sync {
    async fn handle(&self, method: &str, params: Value) -> std::result::Result<Value, Value>;
}

/// Runs registered handlers as sandboxes on the tokio runtime.
///
/// Every request is answered from its own task, so a slow call never holds up others.
#[derive(Default)]
pub struct InProcessSandboxHost {
    handlers: RwLock<HashMap<String, Arc<dyn SandboxHandler>>>,
    launches: AtomicUsize,
}

impl InProcessSandboxHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(self, wallet_id: impl Into<String>, handler: Arc<dyn SandboxHandler>) -> Self {
        self.register(wallet_id, handler);
        self
    }

    pub fn register(&self, wallet_id: impl Into<String>, handler: Arc<dyn SandboxHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(wallet_id.into(), handler);
    }

    /// Number of contexts launched so far
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxHost for InProcessSandboxHost {
    async fn launch(&self, manifest: &WalletManifest, env: &SandboxEnv) -> crate::Result<MessageLink> {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&manifest.id)
            .cloned()
            .ok_or_else(|| crate::Error::WalletNotFound(manifest.id.clone()))?;

        let (host_end, sandbox_end) = MessageLink::pair(64);
        let MessageLink {
            outbound,
            mut inbound,
        } = sandbox_end;
        tracing::debug!(wallet_id = %manifest.id, network = %env.network, "Starting in-process sandbox");

        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                let Some(request) = RpcRequest::parse(SANDBOX_NAMESPACE, &message) else {
                    continue;
                };
                let handler = handler.clone();
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    let outcome = handler.handle(&request.method, request.params).await;
                    let reply = RpcResponse::from_outcome(SANDBOX_NAMESPACE, request.id, outcome);
                    let _ = outbound.send(reply.to_value()).await;
                });
            }
        });

        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(host_end)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::manifest::sample_manifest;
    use crate::storage::MemoryStorage;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every call and answers the common wallet methods
    #[derive(Default)]
    pub(crate) struct ScriptedWallet {
        pub calls: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl SandboxHandler for ScriptedWallet {
        async fn handle(&self, method: &str, params: Value) -> std::result::Result<Value, Value> {
            self.calls.lock().unwrap().push((method.to_string(), params.clone()));
            match method {
                "wallet:signIn" | "wallet:getAccounts" => {
                    Ok(json!([{ "accountId": "alice.near", "publicKey": "ed25519:abc" }]))
                }
                "wallet:signOut" => Ok(Value::Null),
                "wallet:signAndSendTransaction" => Ok(json!({ "status": { "SuccessValue": "" } })),
                "wallet:signMessage" => Err(json!({ "message": "user cancelled" })),
                other => Err(json!({ "message": format!("unsupported {}", other) })),
            }
        }
    }

    fn wallet_with(handler: Arc<ScriptedWallet>, storage: Arc<dyn DataStorage>) -> (SandboxWallet, Arc<InProcessSandboxHost>) {
        let host = Arc::new(InProcessSandboxHost::new().with_handler("w1", handler));
        let wallet = SandboxWallet::new(sample_manifest("w1"), WalletContext::default(), host.clone(), storage);
        (wallet, host)
    }

    #[tokio::test]
    async fn launches_lazily_once_and_fills_network() {
        let handler = Arc::new(ScriptedWallet::default());
        let (wallet, host) = wallet_with(handler.clone(), Arc::new(MemoryStorage::new()));
        assert!(!wallet.is_launched());

        let accounts = wallet.sign_in(SignInParams::default()).await.unwrap();
        assert_eq!(accounts, vec![Account { account_id: "alice.near".into(), public_key: Some("ed25519:abc".into()) }]);
        wallet.get_accounts(NetworkParams::on(Network::Testnet)).await.unwrap();
        assert_eq!(host.launch_count(), 1);

        let calls = handler.calls.lock().unwrap();
        assert_eq!(calls[0].1, json!({ "network": "mainnet", "contractId": "" }));
        assert_eq!(calls[1].1, json!({ "network": "testnet" }));
    }

    #[tokio::test]
    async fn backend_error_surfaces_verbatim() {
        let (wallet, _) = wallet_with(Arc::new(ScriptedWallet::default()), Arc::new(MemoryStorage::new()));
        let err = wallet
            .sign_message(SignMessageParams {
                message: "hi".into(),
                recipient: "app.near".into(),
                nonce: vec![0; 32],
                network: None,
                signer_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Rpc { error, .. } if error == json!({ "message": "user cancelled" })));
    }

    #[tokio::test]
    async fn sign_out_clears_partition() {
        let parent = MemoryStorage::new();
        let shared: Arc<dyn DataStorage> = Arc::new(parent.clone());
        let (wallet, _) = wallet_with(Arc::new(ScriptedWallet::default()), shared.clone());

        ScopedStorage::new("w1", shared.clone()).set("session", "token").await.unwrap();
        wallet.sign_out(NetworkParams::default()).await.unwrap();
        assert_eq!(shared.get("w1:session").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sandbox_cannot_overwrite_partition_index() {
        let shared: Arc<dyn DataStorage> = Arc::new(MemoryStorage::new());
        let (wallet, _) = wallet_with(Arc::new(ScriptedWallet::default()), shared.clone());

        let partition = ScopedStorage::new("w1", shared.clone());
        partition.set("__keys", "hello").await.unwrap();
        partition.set("__index:w1", "hello").await.unwrap();

        wallet.sign_out(NetworkParams::default()).await.unwrap();
        assert_eq!(shared.get("w1:__keys").await.unwrap(), None);
        assert_eq!(shared.get("w1:__index:w1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn banned_receiver_never_reaches_sandbox() {
        let handler = Arc::new(ScriptedWallet::default());
        let host = Arc::new(InProcessSandboxHost::new().with_handler("w1", handler.clone()));
        let ctx = WalletContext::default()
            .with_banned_check(Arc::new(crate::connector::BannedList::new(["evil.near"])));
        let wallet = SandboxWallet::new(sample_manifest("w1"), ctx, host.clone(), Arc::new(MemoryStorage::new()));

        let err = wallet
            .sign_and_send_transaction(SignAndSendTransactionParams {
                network: None,
                signer_id: None,
                receiver_id: "evil.near".into(),
                actions: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::BannedAddress(_)));
        assert_eq!(host.launch_count(), 0);
        assert!(handler.calls.lock().unwrap().is_empty());
    }

    /// Hands the sandbox end of the link to the test
    struct RawHost {
        sandbox_end: Mutex<Option<MessageLink>>,
    }

    #[async_trait]
    impl SandboxHost for RawHost {
        async fn launch(&self, _: &WalletManifest, _: &SandboxEnv) -> crate::Result<MessageLink> {
            let (host_end, sandbox_end) = MessageLink::pair(8);
            *self.sandbox_end.lock().unwrap() = Some(sandbox_end);
            Ok(host_end)
        }
    }

    #[tokio::test]
    async fn serves_storage_requests_from_sandbox() {
        let shared: Arc<dyn DataStorage> = Arc::new(MemoryStorage::new());
        let host = Arc::new(RawHost { sandbox_end: Mutex::new(None) });
        let mut manifest = sample_manifest("w1");
        manifest.permissions.storage = true;
        let ctx = WalletContext::new(Network::Mainnet, Providers::default(), Duration::from_secs(5));
        let wallet = Arc::new(SandboxWallet::new(manifest, ctx, host.clone(), shared.clone()));

        let pending = tokio::spawn({
            let wallet = wallet.clone();
            async move { wallet.get_accounts(NetworkParams::default()).await }
        });

        // Wait for the launch to hand over the sandbox end.
        let mut sandbox = loop {
            if let Some(link) = host.sandbox_end.lock().unwrap().take() {
                break link;
            }
            tokio::task::yield_now().await;
        };
        let call = RpcRequest::parse(SANDBOX_NAMESPACE, &sandbox.inbound.recv().await.unwrap()).unwrap();

        let set = RpcRequest::new(SANDBOX_HOST_NAMESPACE, "s1", "storage.set", json!({"key": "k", "value": "v"}));
        sandbox.outbound.send(serde_json::to_value(&set).unwrap()).await.unwrap();
        let reply: RpcResponse = serde_json::from_value(sandbox.inbound.recv().await.unwrap()).unwrap();
        assert!(reply.success);
        assert_eq!(shared.get("w1:k").await.unwrap().as_deref(), Some("v"));

        let get = RpcRequest::new(SANDBOX_HOST_NAMESPACE, "s2", "storage.get", json!({"key": "k"}));
        sandbox.outbound.send(serde_json::to_value(&get).unwrap()).await.unwrap();
        let reply: RpcResponse = serde_json::from_value(sandbox.inbound.recv().await.unwrap()).unwrap();
        assert_eq!(reply.result, Some(json!("v")));

        let answer = RpcResponse::ok(SANDBOX_NAMESPACE, call.id, json!([{ "accountId": "bob.near" }]));
        sandbox.outbound.send(answer.to_value()).await.unwrap();
        let accounts = pending.await.unwrap().unwrap();
        assert_eq!(accounts, vec![Account::new("bob.near")]);
    }
}
