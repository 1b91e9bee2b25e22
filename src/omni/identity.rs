//! Identity binding
//!
//! Proves control of a wallet to an external verifier: the wallet signs an auth
//! payload for a domain and the verifier checks it. The verifier is the only
//! retried call in the crate.

use super::{OmniWallet, SignedAuth};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde_json::Value;

/// Checks a signed auth payload, e.g. by posting it to a backend
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Returns the verifier's answer (a session token, a profile, ...)
    async fn verify(&self, auth: &SignedAuth) -> crate::Result<Value>;
}

#[derive(Debug, Clone)]
pub struct IdentityBinding {
    pub auth: SignedAuth,
    pub response: Value,
    /// Verification attempts used, including the successful one
    pub attempts: u32,
}

/// Sign once, then verify under `policy`
pub async fn bind_identity(
    wallet: &dyn OmniWallet,
    domain: &str,
    verifier: &dyn IdentityVerifier,
    policy: &RetryPolicy,
) -> crate::Result<IdentityBinding> {
    let auth = wallet.sign_intents_with_auth(domain, Vec::new()).await?;
    tracing::info!(domain, address = %auth.address, chain = %auth.chain_id, "Binding wallet identity");

    let mut attempts = 0;
    let response = policy
        .run(
            |attempt| {
                attempts = attempt;
                verifier.verify(&auth)
            },
            is_retryable,
        )
        .await?;

    Ok(IdentityBinding {
        auth,
        response,
        attempts,
    })
}

/// Rejections by the user or by policy will not change on retry
fn is_retryable(error: &crate::Error) -> bool {
    !matches!(
        error,
        crate::Error::UserRejected | crate::Error::BannedAddress(_) | crate::Error::NotSupported(_)
    )
}
