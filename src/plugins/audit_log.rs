//! Audit log plugin
//!
//! Logs every wallet operation for compliance and debugging.

use super::{
    CreateKey, GetAccounts, Next, Operation, Plugin, PluginResult, SignAndSendTransaction,
    SignAndSendTransactions, SignIn, SignMessage, SignOut,
};
use crate::wallet::{
    Account, CreateKeyParams, FinalExecutionOutcome, NearWallet, NetworkParams,
    SignAndSendTransactionParams, SignAndSendTransactionsParams, SignInParams,
    SignMessageParams, SignedMessage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Entry in the audit log
#[derive(Debug, Serialize)]
struct AuditEntry {
    timestamp: DateTime<Utc>,
    entry_type: &'static str,
    method: &'static str,
    wallet_id: String,
    args: Value,
    result: Option<Value>,
    error: Option<String>,
    duration_ms: u64,
    status: &'static str,
}

/// Writer for audit log entries
struct AuditLogWriter {
    path: PathBuf,
}

impl AuditLogWriter {
    fn write(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(entry)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }
}

/// Plugin that appends a start and a completion entry (JSONL) for every operation
pub struct AuditLogPlugin {
    writer: Arc<Mutex<AuditLogWriter>>,
}

impl AuditLogPlugin {
    /// # Arguments
    /// * `log_path` - Path to the audit log file (JSONL format)
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(AuditLogWriter {
                path: log_path.into(),
            })),
        }
    }

    async fn append(&self, entry: AuditEntry) {
        let writer = self.writer.lock().await;
        if let Err(e) = writer.write(&entry) {
            tracing::warn!(error = %e, "Failed to write audit log entry");
        }
    }

    async fn record<O: Operation>(
        &self,
        wallet: &dyn NearWallet,
        args: O::Args,
        next: Next<O>,
    ) -> crate::Result<PluginResult<O::Args, O::Output>> {
        let wallet_id = wallet.manifest().id.clone();
        let args_value = serde_json::to_value(&args).unwrap_or(Value::Null);

        self.append(AuditEntry {
            timestamp: Utc::now(),
            entry_type: "call_start",
            method: O::METHOD.as_str(),
            wallet_id: wallet_id.clone(),
            args: args_value.clone(),
            result: None,
            error: None,
            duration_ms: 0,
            status: "pending",
        })
        .await;

        let started = Instant::now();
        let outcome = next.run(args).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (result, error, status) = match &outcome {
            Ok(value) => (
                Some(truncate_result(&serde_json::to_value(value).unwrap_or(Value::Null))),
                None,
                "success",
            ),
            Err(e) => (None, Some(e.to_string()), "error"),
        };

        self.append(AuditEntry {
            timestamp: Utc::now(),
            entry_type: "call_complete",
            method: O::METHOD.as_str(),
            wallet_id,
            args: args_value,
            result,
            error,
            duration_ms,
            status,
        })
        .await;

        // Audit logging never changes the outcome
        outcome.map(PluginResult::Result)
    }
}

/// Truncate result for logging
fn truncate_result(result: &Value) -> Value {
    let s = serde_json::to_string(result).unwrap_or_default();
    if s.len() > 1000 {
        let cut = (0..=1000).rev().find(|i| s.is_char_boundary(*i)).unwrap_or(0);
        serde_json::json!(format!("{}... [truncated]", &s[..cut]))
    } else {
        result.clone()
    }
}

#[async_trait]
impl Plugin for AuditLogPlugin {
    fn name(&self) -> &str {
        "audit-log"
    }

    async fn sign_in(
        &self,
        wallet: &dyn NearWallet,
        args: SignInParams,
        next: Next<SignIn>,
    ) -> crate::Result<PluginResult<SignInParams, Vec<Account>>> {
        self.record(wallet, args, next).await
    }

    async fn sign_out(
        &self,
        wallet: &dyn NearWallet,
        args: NetworkParams,
        next: Next<SignOut>,
    ) -> crate::Result<PluginResult<NetworkParams, ()>> {
        self.record(wallet, args, next).await
    }

    async fn get_accounts(
        &self,
        wallet: &dyn NearWallet,
        args: NetworkParams,
        next: Next<GetAccounts>,
    ) -> crate::Result<PluginResult<NetworkParams, Vec<Account>>> {
        self.record(wallet, args, next).await
    }

    async fn sign_and_send_transaction(
        &self,
        wallet: &dyn NearWallet,
        args: SignAndSendTransactionParams,
        next: Next<SignAndSendTransaction>,
    ) -> crate::Result<PluginResult<SignAndSendTransactionParams, FinalExecutionOutcome>> {
        self.record(wallet, args, next).await
    }

    async fn sign_and_send_transactions(
        &self,
        wallet: &dyn NearWallet,
        args: SignAndSendTransactionsParams,
        next: Next<SignAndSendTransactions>,
    ) -> crate::Result<PluginResult<SignAndSendTransactionsParams, Vec<FinalExecutionOutcome>>> {
        self.record(wallet, args, next).await
    }

    async fn sign_message(
        &self,
        wallet: &dyn NearWallet,
        args: SignMessageParams,
        next: Next<SignMessage>,
    ) -> crate::Result<PluginResult<SignMessageParams, SignedMessage>> {
        self.record(wallet, args, next).await
    }

    async fn create_key(
        &self,
        wallet: &dyn NearWallet,
        args: CreateKeyParams,
        next: Next<CreateKey>,
    ) -> crate::Result<PluginResult<CreateKeyParams, ()>> {
        self.record(wallet, args, next).await
    }
}
