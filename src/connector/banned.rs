//! Banned-address policy

use crate::wallet::Action;
use async_trait::async_trait;
use std::collections::HashSet;

/// Decides whether a NEAR account may take part in a session or transaction
#[async_trait]
pub trait BannedAddressCheck: Send + Sync {
    async fn is_banned(&self, address: &str) -> crate::Result<bool>;
}

/// Fixed deny-list
#[derive(Debug, Clone, Default)]
pub struct BannedList {
    addresses: HashSet<String>,
}

impl BannedList {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl BannedAddressCheck for BannedList {
    async fn is_banned(&self, address: &str) -> crate::Result<bool> {
        Ok(self.addresses.contains(address))
    }
}

/// Reject a transaction whose receiver, or any receiver nested in function-call
/// arguments, is banned.
pub async fn validate_banned_in_tx(
    check: &dyn BannedAddressCheck,
    receiver_id: &str,
    actions: &[Action],
) -> crate::Result<()> {
    if check.is_banned(receiver_id).await? {
        tracing::warn!(receiver_id, "Rejected transaction to banned receiver");
        return Err(crate::Error::BannedAddress(receiver_id.to_string()));
    }

    for action in actions {
        let Action::FunctionCall(call) = action else {
            continue;
        };
        let Some(nested) = call.nested_receiver() else {
            continue;
        };
        if check.is_banned(nested).await? {
            tracing::warn!(
                receiver_id,
                nested_receiver = nested,
                method = %call.method_name,
                "Rejected transaction with banned nested receiver"
            );
            return Err(crate::Error::BannedAddress(nested.to_string()));
        }
    }

    Ok(())
}
