//! Wallet contract data types
//!
//! Field names follow the camelCase wire format wallets exchange with the host.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
        }
    }
}

impl FromStr for Network {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(crate::Error::InvalidArgument(format!(
                "unknown network: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

impl Account {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            public_key: None,
        }
    }
}

/// Arguments carrying an optional per-call network override
pub trait NetworkScoped {
    fn network(&self) -> Option<Network>;
    fn set_network(&mut self, network: Network);

    /// Fill in `default` when the caller gave no network
    fn or_network(mut self, default: Network) -> Self
    where
        Self: Sized,
    {
        if self.network().is_none() {
            self.set_network(default);
        }
        self
    }
}

macro_rules! network_scoped {
    ($($ty:ty),* $(,)?) => {
        $(impl NetworkScoped for $ty {
            fn network(&self) -> Option<Network> {
                self.network
            }

            fn set_network(&mut self, network: Network) {
                self.network = Some(network);
            }
        })*
    };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<Network>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub method_names: Vec<String>,
}

/// Arguments of `signOut` and `getAccounts`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<Network>,
}

impl NetworkParams {
    pub fn on(network: Network) -> Self {
        Self {
            network: Some(network),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallAction {
    pub method_name: String,
    #[serde(default)]
    pub args: Value,
    pub gas: String,
    pub deposit: String,
}

impl FunctionCallAction {
    /// A `receiver_id` embedded in the call arguments, as used by token transfers
    pub fn nested_receiver(&self) -> Option<&str> {
        self.args.get("receiver_id").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAction {
    pub deposit: String,
}

/// A NEAR transaction action. Variants the host never inspects keep their params opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum Action {
    CreateAccount,
    DeployContract(Value),
    FunctionCall(FunctionCallAction),
    Transfer(TransferAction),
    Stake(Value),
    AddKey(Value),
    DeleteKey(Value),
    DeleteAccount(Value),
}

impl Action {
    pub fn function_call(method_name: &str, args: Value, gas: &str, deposit: &str) -> Self {
        Action::FunctionCall(FunctionCallAction {
            method_name: method_name.to_string(),
            args,
            gas: gas.to_string(),
            deposit: deposit.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_id: Option<String>,
    pub receiver_id: String,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignAndSendTransactionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<Network>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_id: Option<String>,
    pub receiver_id: String,
    pub actions: Vec<Action>,
}

impl From<Transaction> for SignAndSendTransactionParams {
    fn from(tx: Transaction) -> Self {
        Self {
            network: None,
            signer_id: tx.signer_id,
            receiver_id: tx.receiver_id,
            actions: tx.actions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignAndSendTransactionsParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<Network>,
    pub transactions: Vec<Transaction>,
}

/// NEP-413 message signing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignMessageParams {
    pub message: String,
    pub recipient: String,
    /// 32 bytes
    pub nonce: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<Network>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedMessage {
    pub account_id: String,
    pub public_key: String,
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyParams {
    pub contract_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub method_names: Vec<String>,
}

/// Chain execution result, passed through untouched
pub type FinalExecutionOutcome = Value;

network_scoped!(
    SignInParams,
    NetworkParams,
    SignAndSendTransactionParams,
    SignAndSendTransactionsParams,
    SignMessageParams,
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn network_parsing() {
        assert_eq!("Testnet".parse::<Network>().unwrap(), Network::Testnet);
        assert_eq!(Network::Mainnet.to_string(), "mainnet");
        assert!("devnet".parse::<Network>().is_err());
    }

    #[test]
    fn actions_use_type_and_params_tags() {
        let tx: Transaction = serde_json::from_value(json!({
            "receiverId": "usdt.tether-token.near",
            "actions": [
                { "type": "CreateAccount" },
                { "type": "Transfer", "params": { "deposit": "1" } },
                {
                    "type": "FunctionCall",
                    "params": {
                        "methodName": "ft_transfer",
                        "args": { "receiver_id": "bob.near", "amount": "10" },
                        "gas": "30000000000000",
                        "deposit": "1"
                    }
                }
            ]
        }))
        .unwrap();

        assert_eq!(tx.actions.len(), 3);
        match &tx.actions[2] {
            Action::FunctionCall(call) => assert_eq!(call.nested_receiver(), Some("bob.near")),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn or_network_keeps_explicit_choice() {
        let explicit = NetworkParams::on(Network::Testnet).or_network(Network::Mainnet);
        assert_eq!(explicit.network, Some(Network::Testnet));

        let defaulted = SignInParams::default().or_network(Network::Mainnet);
        assert_eq!(defaulted.network, Some(Network::Mainnet));
    }

    #[test]
    fn sign_in_params_wire_format() {
        let params = SignInParams {
            network: Some(Network::Testnet),
            contract_id: Some("app.near".into()),
            method_names: vec!["vote".into()],
        };
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({"network": "testnet", "contractId": "app.near", "methodNames": ["vote"]})
        );
    }
}
