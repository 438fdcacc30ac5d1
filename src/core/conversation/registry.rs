//! Connected-client registry.
//!
//! Process-wide map from client id to its outbound channel. The WebSocket
//! layer registers a client on upgrade and deregisters it on close; turn
//! flows look senders up here and broadcast through it in group mode.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::events::{OutboundMessage, OutboundSender};
use super::types::ClientId;

/// One connected client.
#[derive(Clone)]
pub struct ClientHandle {
    pub sender: OutboundSender,
    pub display_name: String,
}

/// Process-wide map of connected clients.
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, ClientHandle>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, client: ClientId, sender: OutboundSender, display_name: String) {
        debug!(client = %client, name = %display_name, "client registered");
        self.clients
            .write()
            .insert(client, ClientHandle { sender, display_name });
    }

    pub fn deregister(&self, client: &str) {
        if self.clients.write().remove(client).is_some() {
            debug!(client = %client, "client deregistered");
        }
    }

    pub fn contains(&self, client: &str) -> bool {
        self.clients.read().contains_key(client)
    }

    pub fn sender(&self, client: &str) -> Option<OutboundSender> {
        self.clients.read().get(client).map(|h| h.sender.clone())
    }

    pub fn display_name(&self, client: &str) -> String {
        self.clients
            .read()
            .get(client)
            .map(|h| h.display_name.clone())
            .unwrap_or_else(|| client.to_string())
    }

    pub fn connected_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Sends `message` to every recipient. A failed or vanished recipient
    /// does not block delivery to the rest.
    pub async fn broadcast(&self, members: &[ClientId], message: &OutboundMessage) {
        let targets: Vec<(ClientId, OutboundSender)> = {
            let clients = self.clients.read();
            members
                .iter()
                .filter_map(|uid| {
                    clients
                        .get(uid)
                        .map(|handle| (uid.clone(), handle.sender.clone()))
                })
                .collect()
        };

        for (uid, sender) in targets {
            if sender.send(message.clone()).await.is_err() {
                warn!(client = %uid, "dropping message for unreachable client");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn register_lookup_deregister() {
        let registry = ClientRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        registry.register("c1".to_string(), tx, "Alice".to_string());

        assert!(registry.contains("c1"));
        assert_eq!(registry.display_name("c1"), "Alice");
        assert!(registry.sender("c1").is_some());

        registry.deregister("c1");
        assert!(!registry.contains("c1"));
        assert!(registry.sender("c1").is_none());
    }

    #[tokio::test]
    async fn unknown_client_falls_back_to_its_id() {
        let registry = ClientRegistry::new();
        assert_eq!(registry.display_name("ghost"), "ghost");
    }

    #[tokio::test]
    async fn broadcast_survives_a_dead_recipient() {
        let registry = ClientRegistry::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, rx_b) = mpsc::channel(4);
        registry.register("a".to_string(), tx_a, "A".to_string());
        registry.register("b".to_string(), tx_b, "B".to_string());
        drop(rx_b); // b's connection died

        let members = vec!["a".to_string(), "b".to_string(), "ghost".to_string()];
        registry
            .broadcast(&members, &OutboundMessage::InterruptSignal)
            .await;

        assert!(matches!(
            rx_a.try_recv(),
            Ok(OutboundMessage::InterruptSignal)
        ));
    }
}
