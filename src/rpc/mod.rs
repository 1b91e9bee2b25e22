//! Correlated request/response messaging with isolated backends
//!
//! Requests are posted as `{type: "<ns>-request", id, method, params}` and answered with
//! `{type: "<ns>-response", id, success, result | error}`. Every call gets a fresh v4
//! UUID; replies are matched by id only, so overlapping calls may complete in any order.
//!
//! A call that gets no reply fails with [`crate::Error::RpcTimeout`] once the bridge
//! timeout elapses. Its pending entry is dropped at that point and a late reply is
//! logged and discarded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};

/// A bidirectional JSON message channel to an isolated context
pub struct MessageLink {
    pub outbound: mpsc::Sender<Value>,
    pub inbound: mpsc::Receiver<Value>,
}

impl MessageLink {
    /// Two connected ends: what one side sends, the other receives
    pub fn pair(buffer: usize) -> (MessageLink, MessageLink) {
        let (a_tx, a_rx) = mpsc::channel(buffer);
        let (b_tx, b_rx) = mpsc::channel(buffer);
        (
            MessageLink {
                outbound: a_tx,
                inbound: b_rx,
            },
            MessageLink {
                outbound: b_tx,
                inbound: a_rx,
            },
        )
    }
}

pub fn request_type(namespace: &str) -> String {
    format!("{}-request", namespace)
}

pub fn response_type(namespace: &str) -> String {
    format!("{}-response", namespace)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(namespace: &str, id: impl Into<String>, method: &str, params: Value) -> Self {
        Self {
            kind: request_type(namespace),
            id: id.into(),
            method: method.to_string(),
            params,
        }
    }

    /// Parse `message` if it is a request in `namespace`
    pub fn parse(namespace: &str, message: &Value) -> Option<Self> {
        if message.get("type").and_then(Value::as_str) != Some(request_type(namespace).as_str()) {
            return None;
        }
        serde_json::from_value(message.clone()).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl RpcResponse {
    pub fn ok(namespace: &str, id: impl Into<String>, result: Value) -> Self {
        Self {
            kind: response_type(namespace),
            id: id.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(namespace: &str, id: impl Into<String>, error: Value) -> Self {
        Self {
            kind: response_type(namespace),
            id: id.into(),
            success: false,
            result: None,
            error: Some(error),
        }
    }

    /// Build from a handler outcome
    pub fn from_outcome(
        namespace: &str,
        id: impl Into<String>,
        outcome: std::result::Result<Value, Value>,
    ) -> Self {
        match outcome {
            Ok(result) => Self::ok(namespace, id, result),
            Err(error) => Self::err(namespace, id, error),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn into_outcome(self) -> std::result::Result<Value, Value> {
        if self.success {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(self.error.unwrap_or(Value::Null))
        }
    }
}

type Reply = oneshot::Sender<std::result::Result<Value, Value>>;

/// Caller side of the protocol: sends requests and settles them from replies.
///
/// The bridge does not read the inbound channel itself; whoever owns it feeds every
/// message through [`RpcBridge::handle_message`].
#[derive(Clone)]
pub struct RpcBridge {
    namespace: String,
    outbound: mpsc::Sender<Value>,
    pending: Arc<Mutex<HashMap<String, Reply>>>,
    timeout: Duration,
}

impl RpcBridge {
    pub fn new(namespace: impl Into<String>, outbound: mpsc::Sender<Value>, timeout: Duration) -> Self {
        Self {
            namespace: namespace.into(),
            outbound,
            pending: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Post a request and wait for the reply with the same id.
    ///
    /// A `success: false` reply surfaces as [`crate::Error::Rpc`] carrying the remote
    /// error payload unchanged.
    pub async fn call(&self, method: &str, params: Value) -> crate::Result<Value> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        // Register before sending so a fast reply cannot be missed.
        self.pending.lock().await.insert(id.clone(), tx);

        let request = RpcRequest::new(&self.namespace, id.clone(), method, params);
        tracing::debug!(
            namespace = %self.namespace,
            method,
            correlation_id = %id,
            "Sending RPC request"
        );
        if self.outbound.send(serde_json::to_value(&request)?).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(crate::Error::ChannelClosed);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(error))) => Err(crate::Error::Rpc {
                method: method.to_string(),
                error,
            }),
            Ok(Err(_)) => Err(crate::Error::ChannelClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                tracing::warn!(
                    namespace = %self.namespace,
                    method,
                    correlation_id = %id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "RPC request timed out"
                );
                Err(crate::Error::RpcTimeout {
                    method: method.to_string(),
                    id,
                })
            }
        }
    }

    /// Settle the pending call `message` answers. Returns false when the message is not
    /// a response in this namespace or its id matches no pending call.
    pub async fn handle_message(&self, message: &Value) -> bool {
        if message.get("type").and_then(Value::as_str)
            != Some(response_type(&self.namespace).as_str())
        {
            return false;
        }

        let response: RpcResponse = match serde_json::from_value(message.clone()) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(namespace = %self.namespace, error = %e, "Malformed RPC response");
                return false;
            }
        };

        let Some(reply) = self.pending.lock().await.remove(&response.id) else {
            tracing::warn!(
                namespace = %self.namespace,
                correlation_id = %response.id,
                "Dropping RPC response with unknown id"
            );
            return false;
        };

        tracing::debug!(
            namespace = %self.namespace,
            correlation_id = %response.id,
            success = response.success,
            "Received RPC response"
        );
        // The caller may have given up already.
        let _ = reply.send(response.into_outcome());
        true
    }

    /// Fail every pending call with `ChannelClosed`
    pub async fn fail_all(&self) {
        let drained: Vec<_> = self.pending.lock().await.drain().collect();
        if !drained.is_empty() {
            tracing::debug!(namespace = %self.namespace, count = drained.len(), "Abandoning pending RPC calls");
        }
        // Dropping the senders wakes the callers.
        drop(drained);
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NS: &str = "test-rpc";

    #[tokio::test]
    async fn settles_out_of_order_replies_by_id() {
        let (ours, mut theirs) = MessageLink::pair(8);
        let bridge = RpcBridge::new(NS, ours.outbound, Duration::from_secs(5));

        let first = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.call("wallet:getAccounts", json!({"n": 1})).await }
        });
        let second = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.call("wallet:getAccounts", json!({"n": 2})).await }
        });

        let a = theirs.inbound.recv().await.unwrap();
        let b = theirs.inbound.recv().await.unwrap();
        // Answer in reverse order, echoing the params back.
        for request in [b, a] {
            let request = RpcRequest::parse(NS, &request).unwrap();
            let reply = RpcResponse::ok(NS, request.id, request.params["n"].clone());
            assert!(bridge.handle_message(&reply.to_value()).await);
        }

        let mut results = vec![
            first.await.unwrap().unwrap(),
            second.await.unwrap().unwrap(),
        ];
        results.sort_by_key(|v| v.as_i64());
        assert_eq!(results, vec![json!(1), json!(2)]);
        assert_eq!(bridge.pending_count().await, 0);
    }

    #[tokio::test]
    async fn remote_error_payload_is_preserved() {
        let (ours, mut theirs) = MessageLink::pair(8);
        let bridge = RpcBridge::new(NS, ours.outbound, Duration::from_secs(5));

        let call = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.call("wallet:signIn", json!({})).await }
        });

        let request = RpcRequest::parse(NS, &theirs.inbound.recv().await.unwrap()).unwrap();
        let reply = RpcResponse::err(NS, request.id, json!({"code": 4001, "message": "locked"}));
        bridge.handle_message(&reply.to_value()).await;

        match call.await.unwrap() {
            Err(crate::Error::Rpc { method, error }) => {
                assert_eq!(method, "wallet:signIn");
                assert_eq!(error, json!({"code": 4001, "message": "locked"}));
            }
            other => panic!("expected rpc error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn mismatched_reply_leaves_call_pending_until_timeout() {
        let (ours, mut theirs) = MessageLink::pair(8);
        let bridge = RpcBridge::new(NS, ours.outbound, Duration::from_millis(100));

        let call = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.call("wallet:signIn", json!({})).await }
        });

        let request = RpcRequest::parse(NS, &theirs.inbound.recv().await.unwrap()).unwrap();
        assert_ne!(request.id, "xyz");
        let stray = RpcResponse::ok(NS, "xyz", json!(["acct"]));
        assert!(!bridge.handle_message(&stray.to_value()).await);
        assert_eq!(bridge.pending_count().await, 1);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, crate::Error::RpcTimeout { ref id, .. } if *id == request.id));
        assert_eq!(bridge.pending_count().await, 0);

        // A reply after the timeout is dropped.
        let late = RpcResponse::ok(NS, request.id, json!([]));
        assert!(!bridge.handle_message(&late.to_value()).await);
    }

    #[tokio::test]
    async fn ignores_other_namespaces() {
        let (ours, _theirs) = MessageLink::pair(8);
        let bridge = RpcBridge::new(NS, ours.outbound, Duration::from_secs(1));
        let foreign = RpcResponse::ok("other", "id", json!(null));
        assert!(!bridge.handle_message(&foreign.to_value()).await);
    }

    #[tokio::test]
    async fn closed_channel_fails_fast() {
        let (ours, theirs) = MessageLink::pair(8);
        drop(theirs);
        let bridge = RpcBridge::new(NS, ours.outbound, Duration::from_secs(5));
        let err = bridge.call("wallet:signOut", json!({})).await.unwrap_err();
        assert!(matches!(err, crate::Error::ChannelClosed));
    }

    #[tokio::test]
    async fn fail_all_wakes_callers() {
        let (ours, mut theirs) = MessageLink::pair(8);
        let bridge = RpcBridge::new(NS, ours.outbound, Duration::from_secs(5));
        let call = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.call("wallet:getAccounts", json!({})).await }
        });
        theirs.inbound.recv().await.unwrap();
        bridge.fail_all().await;
        assert!(matches!(
            call.await.unwrap(),
            Err(crate::Error::ChannelClosed)
        ));
    }
}
