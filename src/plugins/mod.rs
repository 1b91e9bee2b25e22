//! Plugin middleware chain
//!
//! Plugins intercept wallet operations in registration order. For each operation a
//! plugin either:
//!
//! - returns [`PluginResult::Result`] to stop the chain with a value,
//! - returns [`PluginResult::Next`] with (possibly changed) arguments for the rest of
//!   the chain, or
//! - calls [`Next::run`] itself to run the rest of the chain and post-process the
//!   outcome.
//!
//! A plugin that does not override an operation passes its arguments through, which
//! is the same as being skipped. After the last plugin the terminal step runs: the real
//! backend operation, or [`crate::Error::NotSupported`] when the backend has none.
//!
//! Each call takes a snapshot of the plugin list, so registering a plugin mid-call does
//! not affect calls already in flight.

mod audit_log;
mod cooldown;
mod policy;

pub use audit_log::AuditLogPlugin;
pub use cooldown::CooldownPlugin;
pub use policy::{MethodPolicyPlugin, PolicyConfig};

use crate::wallet::{
    Account, CreateKeyParams, FinalExecutionOutcome, NearWallet, NetworkParams,
    SignAndSendTransactionParams, SignAndSendTransactionsParams, SignInParams,
    SignMessageParams, SignedMessage,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

/// Wallet operations a plugin can intercept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    SignIn,
    SignOut,
    GetAccounts,
    SignAndSendTransaction,
    SignAndSendTransactions,
    SignMessage,
    CreateKey,
}

impl Method {
    pub const ALL: [Method; 7] = [
        Method::SignIn,
        Method::SignOut,
        Method::GetAccounts,
        Method::SignAndSendTransaction,
        Method::SignAndSendTransactions,
        Method::SignMessage,
        Method::CreateKey,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::SignIn => "signIn",
            Method::SignOut => "signOut",
            Method::GetAccounts => "getAccounts",
            Method::SignAndSendTransaction => "signAndSendTransaction",
            Method::SignAndSendTransactions => "signAndSendTransactions",
            Method::SignMessage => "signMessage",
            Method::CreateKey => "createKey",
        }
    }

    /// Operations that submit transactions to the chain
    pub fn sends_transactions(&self) -> bool {
        matches!(
            self,
            Method::SignAndSendTransaction | Method::SignAndSendTransactions
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidArgument(format!("unknown wallet method: {}", s)))
    }
}

/// Outcome of one interceptor
#[derive(Debug, Clone, PartialEq)]
pub enum PluginResult<A, R> {
    /// Stop the chain with this value
    Result(R),
    /// Continue with these arguments
    Next(A),
}

/// The real backend operation at the end of a chain
pub type Terminal<O> = Arc<
    dyn Fn(<O as Operation>::Args) -> BoxFuture<'static, crate::Result<<O as Operation>::Output>>
        + Send
        + Sync,
>;

/// Build a [`Terminal`] from an async closure
pub fn terminal<O, F, Fut>(f: F) -> Terminal<O>
where
    O: Operation,
    F: Fn(O::Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = crate::Result<O::Output>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

/// A wallet operation as seen by the chain
pub trait Operation: Sized + Send + 'static {
    type Args: Serialize + Send + 'static;
    type Output: Serialize + Send + 'static;

    const METHOD: Method;

    /// Dispatch to the plugin's handler for this operation
    fn intercept<'p>(
        plugin: &'p dyn Plugin,
        wallet: &'p dyn NearWallet,
        args: Self::Args,
        next: Next<Self>,
    ) -> BoxFuture<'p, crate::Result<PluginResult<Self::Args, Self::Output>>>;
}

macro_rules! operations {
    ($($(#[$doc:meta])* $name:ident($args:ty) -> $output:ty => $method:ident, $handler:ident;)*) => {
        $(
            $(#[$doc])*
            pub struct $name;

            impl Operation for $name {
                type Args = $args;
                type Output = $output;

                const METHOD: Method = Method::$method;

                fn intercept<'p>(
                    plugin: &'p dyn Plugin,
                    wallet: &'p dyn NearWallet,
                    args: Self::Args,
                    next: Next<Self>,
                ) -> BoxFuture<'p, crate::Result<PluginResult<Self::Args, Self::Output>>> {
                    plugin.$handler(wallet, args, next)
                }
            }
        )*
    };
}

operations! {
    SignIn(SignInParams) -> Vec<Account> => SignIn, sign_in;
    SignOut(NetworkParams) -> () => SignOut, sign_out;
    GetAccounts(NetworkParams) -> Vec<Account> => GetAccounts, get_accounts;
    SignAndSendTransaction(SignAndSendTransactionParams) -> FinalExecutionOutcome
        => SignAndSendTransaction, sign_and_send_transaction;
    SignAndSendTransactions(SignAndSendTransactionsParams) -> Vec<FinalExecutionOutcome>
        => SignAndSendTransactions, sign_and_send_transactions;
    SignMessage(SignMessageParams) -> SignedMessage => SignMessage, sign_message;
    /// Only reaches the backend when it supports key creation
    CreateKey(CreateKeyParams) -> () => CreateKey, create_key;
}

/// Intercepts wallet operations. Every handler defaults to passing its arguments on.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        "plugin"
    }

    async fn sign_in(
        &self,
        _wallet: &dyn NearWallet,
        args: SignInParams,
        _next: Next<SignIn>,
    ) -> crate::Result<PluginResult<SignInParams, Vec<Account>>> {
        Ok(PluginResult::Next(args))
    }

    async fn sign_out(
        &self,
        _wallet: &dyn NearWallet,
        args: NetworkParams,
        _next: Next<SignOut>,
    ) -> crate::Result<PluginResult<NetworkParams, ()>> {
        Ok(PluginResult::Next(args))
    }

    async fn get_accounts(
        &self,
        _wallet: &dyn NearWallet,
        args: NetworkParams,
        _next: Next<GetAccounts>,
    ) -> crate::Result<PluginResult<NetworkParams, Vec<Account>>> {
        Ok(PluginResult::Next(args))
    }

    async fn sign_and_send_transaction(
        &self,
        _wallet: &dyn NearWallet,
        args: SignAndSendTransactionParams,
        _next: Next<SignAndSendTransaction>,
    ) -> crate::Result<PluginResult<SignAndSendTransactionParams, FinalExecutionOutcome>> {
        Ok(PluginResult::Next(args))
    }

    async fn sign_and_send_transactions(
        &self,
        _wallet: &dyn NearWallet,
        args: SignAndSendTransactionsParams,
        _next: Next<SignAndSendTransactions>,
    ) -> crate::Result<PluginResult<SignAndSendTransactionsParams, Vec<FinalExecutionOutcome>>> {
        Ok(PluginResult::Next(args))
    }

    async fn sign_message(
        &self,
        _wallet: &dyn NearWallet,
        args: SignMessageParams,
        _next: Next<SignMessage>,
    ) -> crate::Result<PluginResult<SignMessageParams, SignedMessage>> {
        Ok(PluginResult::Next(args))
    }

    async fn create_key(
        &self,
        _wallet: &dyn NearWallet,
        args: CreateKeyParams,
        _next: Next<CreateKey>,
    ) -> crate::Result<PluginResult<CreateKeyParams, ()>> {
        Ok(PluginResult::Next(args))
    }
}

/// The rest of a chain, from one plugin onward
pub struct Next<O: Operation> {
    plugins: Arc<[Arc<dyn Plugin>]>,
    index: usize,
    wallet: Arc<dyn NearWallet>,
    terminal: Option<Terminal<O>>,
}

impl<O: Operation> Next<O> {
    fn advance(&self) -> Self {
        Self {
            plugins: Arc::clone(&self.plugins),
            index: self.index + 1,
            wallet: Arc::clone(&self.wallet),
            terminal: self.terminal.clone(),
        }
    }

    /// Number of plugins still ahead
    pub fn remaining(&self) -> usize {
        self.plugins.len().saturating_sub(self.index)
    }

    /// Run the remaining plugins and the terminal step with `args`
    pub fn run(self, args: O::Args) -> BoxFuture<'static, crate::Result<O::Output>> {
        Box::pin(async move {
            let Some(plugin) = self.plugins.get(self.index).cloned() else {
                return match &self.terminal {
                    Some(terminal) => terminal(args).await,
                    None => Err(crate::Error::NotSupported(O::METHOD.to_string())),
                };
            };

            tracing::trace!(
                method = %O::METHOD,
                plugin = plugin.name(),
                index = self.index,
                "Entering plugin"
            );
            let next = self.advance();
            let outcome = O::intercept(plugin.as_ref(), self.wallet.as_ref(), args, next).await?;
            match outcome {
                PluginResult::Result(value) => {
                    tracing::debug!(method = %O::METHOD, plugin = plugin.name(), "Plugin produced result");
                    Ok(value)
                }
                PluginResult::Next(args) => self.advance().run(args).await,
            }
        })
    }
}

/// Ordered plugin list shared by every wallet proxy of a connector
#[derive(Clone, Default)]
pub struct PluginManager {
    plugins: Arc<RwLock<Vec<Arc<dyn Plugin>>>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plugin; it runs after every plugin registered before it
    pub fn use_plugin(&self, plugin: Arc<dyn Plugin>) {
        tracing::debug!(plugin = plugin.name(), "Registered plugin");
        self.plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(plugin);
    }

    pub fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.plugins.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Run operation `O` through every plugin, ending in `terminal`
    pub async fn execute<O: Operation>(
        &self,
        wallet: Arc<dyn NearWallet>,
        args: O::Args,
        terminal: Option<Terminal<O>>,
    ) -> crate::Result<O::Output> {
        let plugins: Arc<[Arc<dyn Plugin>]> = self.plugins().into();
        tracing::debug!(
            method = %O::METHOD,
            wallet_id = %wallet.manifest().id,
            plugins = plugins.len(),
            "Executing plugin chain"
        );
        Next::<O> {
            plugins,
            index: 0,
            wallet,
            terminal,
        }
        .run(args)
        .await
    }
}
