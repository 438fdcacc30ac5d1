//! Request/response rendezvous between turn flows and clients.
//!
//! A flow can suspend on "a response of kind K (optionally matching
//! request-id R) from client C" and resume when it arrives. Responses with
//! no registered waiter are dropped: the protocol only uses responses a flow
//! has already asked for, so buffering them would just leak.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::types::ClientId;

type WaiterKey = (String, Option<String>);

/// How a [`SyncGate::wait`] call ended.
#[derive(Debug)]
pub enum WaitOutcome {
    /// The matching response, verbatim.
    Response(Value),
    /// The bound elapsed first; the client may be slow or stuck.
    TimedOut,
    /// The client was released (disconnect) before responding.
    Cancelled,
}

/// One-shot rendezvous registry keyed by (client, kind, request-id).
#[derive(Default)]
pub struct SyncGate {
    waiters: Mutex<HashMap<ClientId, HashMap<WaiterKey, oneshot::Sender<Value>>>>,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspends until a matching response arrives, the bound elapses, or the
    /// client is released. Returns exactly once; the registration is gone on
    /// return.
    pub async fn wait(
        &self,
        client: &str,
        kind: &str,
        request_id: Option<&str>,
        timeout: Option<Duration>,
    ) -> WaitOutcome {
        let (tx, rx) = oneshot::channel();
        let key: WaiterKey = (kind.to_string(), request_id.map(str::to_string));
        {
            let mut waiters = self.waiters.lock();
            // A duplicate wait replaces the old registration; the displaced
            // waiter resolves as cancelled.
            waiters
                .entry(client.to_string())
                .or_default()
                .insert(key.clone(), tx);
        }

        debug!(client = %client, kind = %kind, ?timeout, "waiting for response");

        let outcome = match timeout {
            Some(bound) => match tokio::time::timeout(bound, rx).await {
                Ok(Ok(value)) => WaitOutcome::Response(value),
                Ok(Err(_)) => WaitOutcome::Cancelled,
                Err(_) => WaitOutcome::TimedOut,
            },
            None => match rx.await {
                Ok(value) => WaitOutcome::Response(value),
                Err(_) => WaitOutcome::Cancelled,
            },
        };

        if matches!(outcome, WaitOutcome::TimedOut) {
            warn!(client = %client, kind = %kind, "timed out waiting for response");
            let mut waiters = self.waiters.lock();
            if let Some(entries) = waiters.get_mut(client) {
                entries.remove(&key);
                if entries.is_empty() {
                    waiters.remove(client);
                }
            }
        }
        outcome
    }

    /// Routes an incoming message to its waiter, if any. Returns whether a
    /// waiter consumed it; unmatched messages belong to the normal inbound
    /// path.
    pub fn deliver(&self, client: &str, message: &Value) -> bool {
        let Some(kind) = message.get("type").and_then(Value::as_str) else {
            return false;
        };
        let request_id = message
            .get("request_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let key: WaiterKey = (kind.to_string(), request_id);

        let waiter = {
            let mut waiters = self.waiters.lock();
            let Some(entries) = waiters.get_mut(client) else {
                return false;
            };
            let waiter = entries.remove(&key);
            if entries.is_empty() {
                waiters.remove(client);
            }
            waiter
        };

        match waiter {
            Some(tx) => {
                debug!(client = %client, kind = %kind, "response delivered to waiter");
                let _ = tx.send(message.clone());
                true
            }
            None => false,
        }
    }

    /// Unblocks every pending wait for `client` with a cancellation result.
    /// Idempotent.
    pub fn release_client(&self, client: &str) {
        let released = self
            .waiters
            .lock()
            .remove(client)
            .map(|entries| entries.len())
            .unwrap_or(0);
        if released > 0 {
            info!(client = %client, waiters = released, "released pending waiters");
        }
    }

    /// Total registered waiters, for diagnostics.
    pub fn active_waiters(&self) -> usize {
        self.waiters
            .lock()
            .values()
            .map(|entries| entries.len())
            .sum()
    }
}
