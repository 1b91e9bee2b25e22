//! Cooldown plugin
//!
//! Enforces a minimum time between transaction submissions.

use super::{Next, Plugin, PluginResult, SignAndSendTransaction, SignAndSendTransactions};
use crate::wallet::{
    FinalExecutionOutcome, NearWallet, SignAndSendTransactionParams, SignAndSendTransactionsParams,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Plugin that blocks transactions sent too soon after the last successful one
pub struct CooldownPlugin {
    /// Minimum time between submissions
    cooldown_duration: Duration,
    /// Last successful submission
    last_sent: Arc<RwLock<Option<Instant>>>,
}

impl CooldownPlugin {
    /// # Arguments
    /// * `cooldown_seconds` - Minimum seconds between submissions
    pub fn new(cooldown_seconds: u64) -> Self {
        Self::with_duration(Duration::from_secs(cooldown_seconds))
    }

    pub fn with_duration(cooldown_duration: Duration) -> Self {
        Self {
            cooldown_duration,
            last_sent: Arc::new(RwLock::new(None)),
        }
    }

    async fn check(&self) -> crate::Result<()> {
        let last_sent = self.last_sent.read().await;
        if let Some(last) = *last_sent {
            let elapsed = last.elapsed();
            if elapsed < self.cooldown_duration {
                let remaining = self.cooldown_duration - elapsed;
                return Err(crate::Error::PluginBlocked(format!(
                    "Transaction cooldown active. Please wait {} more seconds.",
                    remaining.as_secs().max(1)
                )));
            }
        }

        tracing::debug!(
            cooldown_seconds = self.cooldown_duration.as_secs(),
            "Cooldown check passed"
        );
        Ok(())
    }

    async fn mark_sent(&self) {
        *self.last_sent.write().await = Some(Instant::now());
        tracing::info!("Updated last transaction timestamp for cooldown tracking");
    }
}

#[async_trait]
impl Plugin for CooldownPlugin {
    fn name(&self) -> &str {
        "cooldown"
    }

    async fn sign_and_send_transaction(
        &self,
        _wallet: &dyn NearWallet,
        args: SignAndSendTransactionParams,
        next: Next<SignAndSendTransaction>,
    ) -> crate::Result<PluginResult<SignAndSendTransactionParams, FinalExecutionOutcome>> {
        self.check().await?;
        let outcome = next.run(args).await?;
        self.mark_sent().await;
        Ok(PluginResult::Result(outcome))
    }

    async fn sign_and_send_transactions(
        &self,
        _wallet: &dyn NearWallet,
        args: SignAndSendTransactionsParams,
        next: Next<SignAndSendTransactions>,
    ) -> crate::Result<PluginResult<SignAndSendTransactionsParams, Vec<FinalExecutionOutcome>>> {
        self.check().await?;
        let outcomes = next.run(args).await?;
        self.mark_sent().await;
        Ok(PluginResult::Result(outcomes))
    }
}
