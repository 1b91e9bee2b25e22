//! Method policy enforcement for wallet operations.

use super::{
    CreateKey, GetAccounts, Method, Next, Plugin, PluginResult, SignAndSendTransaction,
    SignAndSendTransactions, SignIn, SignMessage, SignOut,
};
use crate::wallet::{
    Account, CreateKeyParams, FinalExecutionOutcome, NearWallet, NetworkParams,
    SignAndSendTransactionParams, SignAndSendTransactionsParams, SignInParams,
    SignMessageParams, SignedMessage,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
enum PolicyMode {
    AllowAll,
    DefaultDeny,
}

#[derive(Debug, Clone)]
struct PolicyDecision {
    allowed: bool,
    rule_id: Option<String>,
    reason: String,
}

/// Which wallet methods may run, loaded from `policy.json`:
///
/// ```json
/// { "mode": "default-deny", "rules": [{ "method": "signIn", "allowed": true }] }
/// ```
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    mode: PolicyMode,
    rules: HashMap<Method, PolicyDecision>,
}

impl PolicyConfig {
    pub fn allow_all() -> Self {
        Self {
            mode: PolicyMode::AllowAll,
            rules: HashMap::new(),
        }
    }

    /// Load from a file; a missing file allows everything
    pub async fn load(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Ok(Self::allow_all());
        }

        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        let parsed: PolicyFile = serde_json::from_str(&contents)?;

        let mode = match parsed.mode.as_str() {
            "default-deny" => PolicyMode::DefaultDeny,
            "allow-all" => PolicyMode::AllowAll,
            other => {
                warn!(mode = other, "Unknown policy mode, defaulting to allow-all");
                PolicyMode::AllowAll
            }
        };

        let mut rules = HashMap::new();
        for rule in parsed.rules {
            let Ok(method) = rule.method.parse::<Method>() else {
                warn!(
                    method = %rule.method,
                    "Unknown wallet method in policy file; skipping rule"
                );
                continue;
            };

            rules.insert(
                method,
                PolicyDecision {
                    allowed: rule.allowed,
                    rule_id: rule.rule_id,
                    reason: rule.reason.unwrap_or_else(|| "policy rule".to_string()),
                },
            );
        }

        Ok(Self { mode, rules })
    }

    fn decision_for(&self, method: Method) -> PolicyDecision {
        if let Some(decision) = self.rules.get(&method) {
            return decision.clone();
        }

        match self.mode {
            PolicyMode::AllowAll => PolicyDecision {
                allowed: true,
                rule_id: None,
                reason: "allowed by default policy".to_string(),
            },
            PolicyMode::DefaultDeny => PolicyDecision {
                allowed: false,
                rule_id: None,
                reason: "denied by default policy".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct MethodPolicyPlugin {
    policy: PolicyConfig,
}

impl MethodPolicyPlugin {
    pub fn new(policy: PolicyConfig) -> Self {
        Self { policy }
    }

    fn enforce(&self, method: Method, wallet: &dyn NearWallet) -> crate::Result<()> {
        let decision = self.policy.decision_for(method);
        if decision.allowed {
            return Ok(());
        }

        let rule_id = decision
            .rule_id
            .as_ref()
            .map(|id| format!(" rule_id={}", id))
            .unwrap_or_default();
        warn!(method = %method, wallet_id = %wallet.manifest().id, "Policy denied wallet method");
        Err(crate::Error::PluginBlocked(format!(
            "Policy denied {}: {}{}",
            method, decision.reason, rule_id
        )))
    }
}

#[async_trait]
impl Plugin for MethodPolicyPlugin {
    fn name(&self) -> &str {
        "method-policy"
    }

    async fn sign_in(
        &self,
        wallet: &dyn NearWallet,
        args: SignInParams,
        _next: Next<SignIn>,
    ) -> crate::Result<PluginResult<SignInParams, Vec<Account>>> {
        self.enforce(Method::SignIn, wallet)?;
        Ok(PluginResult::Next(args))
    }

    async fn sign_out(
        &self,
        wallet: &dyn NearWallet,
        args: NetworkParams,
        _next: Next<SignOut>,
    ) -> crate::Result<PluginResult<NetworkParams, ()>> {
        self.enforce(Method::SignOut, wallet)?;
        Ok(PluginResult::Next(args))
    }

    async fn get_accounts(
        &self,
        wallet: &dyn NearWallet,
        args: NetworkParams,
        _next: Next<GetAccounts>,
    ) -> crate::Result<PluginResult<NetworkParams, Vec<Account>>> {
        self.enforce(Method::GetAccounts, wallet)?;
        Ok(PluginResult::Next(args))
    }

    async fn sign_and_send_transaction(
        &self,
        wallet: &dyn NearWallet,
        args: SignAndSendTransactionParams,
        _next: Next<SignAndSendTransaction>,
    ) -> crate::Result<PluginResult<SignAndSendTransactionParams, FinalExecutionOutcome>> {
        self.enforce(Method::SignAndSendTransaction, wallet)?;
        Ok(PluginResult::Next(args))
    }

    async fn sign_and_send_transactions(
        &self,
        wallet: &dyn NearWallet,
        args: SignAndSendTransactionsParams,
        _next: Next<SignAndSendTransactions>,
    ) -> crate::Result<PluginResult<SignAndSendTransactionsParams, Vec<FinalExecutionOutcome>>> {
        self.enforce(Method::SignAndSendTransactions, wallet)?;
        Ok(PluginResult::Next(args))
    }

    async fn sign_message(
        &self,
        wallet: &dyn NearWallet,
        args: SignMessageParams,
        _next: Next<SignMessage>,
    ) -> crate::Result<PluginResult<SignMessageParams, SignedMessage>> {
        self.enforce(Method::SignMessage, wallet)?;
        Ok(PluginResult::Next(args))
    }

    async fn create_key(
        &self,
        wallet: &dyn NearWallet,
        args: CreateKeyParams,
        _next: Next<CreateKey>,
    ) -> crate::Result<PluginResult<CreateKeyParams, ()>> {
        self.enforce(Method::CreateKey, wallet)?;
        Ok(PluginResult::Next(args))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PolicyFile {
    mode: String,
    rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Deserialize)]
struct PolicyRule {
    method: String,
    allowed: bool,
    rule_id: Option<String>,
    reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::tests::EchoWallet;
    use tempfile::TempDir;

    #[test]
    fn default_allow_policy_allows_unknown_methods() {
        let policy = PolicyConfig::allow_all();
        assert!(policy.decision_for(Method::SignMessage).allowed);
    }

    #[test]
    fn default_deny_policy_blocks_unlisted_methods() {
        let policy = PolicyConfig {
            mode: PolicyMode::DefaultDeny,
            rules: HashMap::new(),
        };
        assert!(!policy.decision_for(Method::SignAndSendTransaction).allowed);
    }

    #[tokio::test]
    async fn loads_rules_and_skips_unknown_methods() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(
            &path,
            r#"{
                "mode": "default-deny",
                "rules": [
                    { "method": "signIn", "allowed": true },
                    { "method": "getAccounts", "allowed": true },
                    { "method": "teleport", "allowed": true },
                    { "method": "signMessage", "allowed": false, "rule_id": "no-offchain", "reason": "disabled" }
                ]
            }"#,
        )
        .unwrap();

        let policy = PolicyConfig::load(&path).await.unwrap();
        assert_eq!(policy.rules.len(), 3);
        assert!(policy.decision_for(Method::SignIn).allowed);
        assert!(!policy.decision_for(Method::SignOut).allowed);

        let plugin = MethodPolicyPlugin::new(policy);
        let wallet = EchoWallet::new("w1");
        let err = plugin.enforce(Method::SignMessage, wallet.as_ref()).unwrap_err();
        assert!(err.to_string().contains("rule_id=no-offchain"));
        assert!(plugin.enforce(Method::GetAccounts, wallet.as_ref()).is_ok());
    }

    #[tokio::test]
    async fn missing_file_allows_everything() {
        let dir = TempDir::new().unwrap();
        let policy = PolicyConfig::load(&dir.path().join("absent.json")).await.unwrap();
        assert!(policy.decision_for(Method::CreateKey).allowed);
    }
}
