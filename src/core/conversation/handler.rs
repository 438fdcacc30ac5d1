//! Conversation entry point.
//!
//! Classifies incoming triggers, enforces one turn per client (or per
//! group), dispatches flows as tasks, and routes interrupts. The
//! check-and-create pair for task slots runs under one lock, which is the
//! primary turn-locking mechanism in the whole system.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::agent::AgentEngine;
use crate::core::memory::ConversationMemory;
use crate::core::stt::SpeechToText;
use crate::core::tts::SpeechSynthesizer;

use super::events::OutboundMessage;
use super::group::{GroupTurnContext, process_group_conversation};
use super::registry::ClientRegistry;
use super::single::{TurnContext, process_single_turn};
use super::sync_gate::SyncGate;
use super::types::{
    ClientId, ConversationSettings, GroupId, GroupRegistry, INTERRUPT_MARKER, PartialResponses,
    TurnInput, TurnMetadata, derive_group_id,
};
use super::utils::{TurnError, send_chain_end};

/// One in-flight turn occupying a client or group slot.
struct TurnSlot {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    /// Clients involved: one for single turns, all members for groups.
    clients: Vec<ClientId>,
    group_id: Option<GroupId>,
    skip_history: bool,
}

/// Orchestrator facade the transport layer talks to.
pub struct ConversationHandler {
    engine: Arc<dyn AgentEngine>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    transcriber: Option<Arc<dyn SpeechToText>>,
    memory: Arc<dyn ConversationMemory>,
    gate: Arc<SyncGate>,
    registry: Arc<ClientRegistry>,
    groups: Arc<GroupRegistry>,
    /// Group membership, maintained across conversations.
    roster: Mutex<HashMap<GroupId, Vec<ClientId>>>,
    slots: Mutex<HashMap<String, TurnSlot>>,
    partials: PartialResponses,
    settings: ConversationSettings,
}

impl ConversationHandler {
    pub fn new(
        engine: Arc<dyn AgentEngine>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        transcriber: Option<Arc<dyn SpeechToText>>,
        memory: Arc<dyn ConversationMemory>,
        gate: Arc<SyncGate>,
        registry: Arc<ClientRegistry>,
        settings: ConversationSettings,
    ) -> Self {
        Self {
            engine,
            synthesizer,
            transcriber,
            memory,
            gate,
            registry,
            groups: Arc::new(GroupRegistry::new()),
            roster: Mutex::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
            partials: PartialResponses::new(),
            settings,
        }
    }

    /// Whether a turn is currently running under `key`.
    pub fn is_busy(&self, key: &str) -> bool {
        self.slots
            .lock()
            .get(key)
            .is_some_and(|slot| !slot.handle.is_finished())
    }

    fn group_of(&self, client: &str) -> Option<(GroupId, Vec<ClientId>)> {
        let roster = self.roster.lock();
        roster
            .iter()
            .find(|(_, members)| members.iter().any(|m| m == client))
            .map(|(id, members)| (id.clone(), members.clone()))
    }

    /// Classifies and dispatches a trigger. Rejected when a turn is already
    /// in flight for the client's slot.
    pub async fn handle_trigger(&self, client_uid: &str, input: TurnInput, metadata: TurnMetadata) {
        let Some(sink) = self.registry.sender(client_uid) else {
            warn!(client = %client_uid, "trigger from unregistered client, ignoring");
            return;
        };

        let group = self
            .group_of(client_uid)
            .filter(|(_, members)| members.len() >= 2);
        let slot_key = group
            .as_ref()
            .map(|(id, _)| id.clone())
            .unwrap_or_else(|| client_uid.to_string());

        // The busy check and the slot insert happen under one lock so two
        // triggers can never both win the slot.
        let rejected = {
            let mut slots = self.slots.lock();
            if slots
                .get(&slot_key)
                .is_some_and(|slot| !slot.handle.is_finished())
            {
                true
            } else {
                let cancel = CancellationToken::new();
                let slot = match &group {
                    Some((group_id, members)) => {
                        self.groups.get_or_create(group_id, members);
                        let ctx = GroupTurnContext {
                            group_id: group_id.clone(),
                            registry: self.registry.clone(),
                            groups: self.groups.clone(),
                            engine: self.engine.clone(),
                            synthesizer: self.synthesizer.clone(),
                            transcriber: self.transcriber.clone(),
                            gate: self.gate.clone(),
                            partials: self.partials.clone(),
                            settings: self.settings.clone(),
                        };
                        let trigger = client_uid.to_string();
                        let token = cancel.clone();
                        let gid = group_id.clone();
                        let handle = tokio::spawn(async move {
                            match process_group_conversation(ctx, trigger, input, token).await {
                                Ok(()) | Err(TurnError::Interrupted) => {}
                                Err(err) => {
                                    error!(group = %gid, error = %err, "group conversation failed")
                                }
                            }
                        });
                        TurnSlot {
                            handle,
                            cancel,
                            clients: members.clone(),
                            group_id: Some(group_id.clone()),
                            skip_history: false,
                        }
                    }
                    None => {
                        let ctx = TurnContext {
                            client_uid: client_uid.to_string(),
                            sink: sink.clone(),
                            engine: self.engine.clone(),
                            synthesizer: self.synthesizer.clone(),
                            transcriber: self.transcriber.clone(),
                            memory: self.memory.clone(),
                            gate: self.gate.clone(),
                            partials: self.partials.clone(),
                            settings: self.settings.clone(),
                        };
                        let uid = client_uid.to_string();
                        let token = cancel.clone();
                        let handle = tokio::spawn(async move {
                            match process_single_turn(ctx, input, metadata, token).await {
                                Ok(()) => {}
                                Err(TurnError::Interrupted) => {
                                    debug!(client = %uid, "turn cancelled")
                                }
                                Err(err) => {
                                    error!(client = %uid, error = %err, "turn ended with error")
                                }
                            }
                        });
                        TurnSlot {
                            handle,
                            cancel,
                            clients: vec![client_uid.to_string()],
                            group_id: None,
                            skip_history: metadata.skip_history,
                        }
                    }
                };
                slots.insert(slot_key.clone(), slot);
                false
            }
        };

        if rejected {
            info!(client = %client_uid, slot = %slot_key, "turn in progress, trigger rejected");
            let _ = sink
                .send(OutboundMessage::Error {
                    message: "A conversation is already in progress.".to_string(),
                })
                .await;
        } else {
            info!(client = %client_uid, slot = %slot_key, "turn dispatched");
        }
    }

    /// Dispatches an AI-initiated turn with the fixed solicitation prompt.
    pub async fn handle_proactive(&self, client_uid: &str) {
        let prompt = self.settings.proactive_prompt.clone();
        self.handle_trigger(client_uid, TurnInput::Text(prompt), TurnMetadata::proactive())
            .await;
    }

    /// Cancels the active turn for the client's slot, persists partial
    /// responses with the interrupt marker, and notifies every involved
    /// client.
    pub async fn handle_interrupt(&self, client_uid: &str) {
        let slot_key = self
            .group_of(client_uid)
            .filter(|(_, members)| members.len() >= 2)
            .map(|(id, _)| id)
            .unwrap_or_else(|| client_uid.to_string());
        self.interrupt_slot(&slot_key).await;
    }

    async fn interrupt_slot(&self, slot_key: &str) {
        let Some(slot) = self.slots.lock().remove(slot_key) else {
            debug!(slot = %slot_key, "no active turn to interrupt");
            return;
        };
        if slot.handle.is_finished() {
            debug!(slot = %slot_key, "turn already settled");
            let _ = slot.handle.await;
            return;
        }

        info!(slot = %slot_key, "interrupting active turn");
        slot.cancel.cancel();
        if let Err(err) = slot.handle.await {
            if !err.is_cancelled() {
                warn!(slot = %slot_key, error = %err, "turn task panicked during interrupt");
            }
        }

        if !slot.skip_history {
            for client in &slot.clients {
                // An empty partial still records that the assistant was cut
                // off before saying anything.
                if let Some(partial) = self.partials.take(client) {
                    if let Err(e) = self
                        .memory
                        .append_assistant(client, &partial, &[INTERRUPT_MARKER])
                        .await
                    {
                        warn!(client = %client, error = %e, "failed to persist partial response");
                    }
                }
            }
        } else {
            for client in &slot.clients {
                self.partials.clear(client);
            }
        }

        self.registry
            .broadcast(&slot.clients, &OutboundMessage::InterruptSignal)
            .await;
        for client in &slot.clients {
            if let Some(sink) = self.registry.sender(client) {
                let _ = send_chain_end(&sink).await;
            }
        }

        if let Some(group_id) = &slot.group_id {
            self.groups.remove(group_id);
        }
    }

    /// Adds `invitee` to the caller's group, creating the group when needed.
    /// The group id is derived from the founding member set and stays fixed
    /// while membership changes.
    pub async fn join_group(&self, requester: &str, invitee: &str) {
        if !self.registry.contains(invitee) {
            self.notify_error(requester, "No such client to invite.").await;
            return;
        }
        if requester == invitee {
            self.notify_error(requester, "You are already in your own group.")
                .await;
            return;
        }

        let group_id = {
            let mut roster = self.roster.lock();
            if roster
                .values()
                .any(|members| members.iter().any(|m| m == invitee))
            {
                None
            } else if let Some((id, _)) = roster
                .iter()
                .find(|(_, members)| members.iter().any(|m| m == requester))
                .map(|(id, members)| (id.clone(), members.clone()))
            {
                if let Some(members) = roster.get_mut(&id) {
                    members.push(invitee.to_string());
                }
                Some(id)
            } else {
                let members = vec![requester.to_string(), invitee.to_string()];
                let id = derive_group_id(&members);
                roster.insert(id.clone(), members);
                Some(id)
            }
        };

        let Some(group_id) = group_id else {
            self.notify_error(requester, "That client is already in a group.")
                .await;
            return;
        };

        // Mid-conversation joins start reading from "now".
        if let Some(state) = self.groups.get(&group_id) {
            state.lock().add_member(invitee.to_string());
        }
        info!(group = %group_id, requester = %requester, invitee = %invitee, "client joined group");
    }

    /// Removes the client from its group. A leaving current speaker cancels
    /// the turn as if interrupted.
    pub async fn leave_group(&self, client_uid: &str) {
        let Some((group_id, _)) = self.group_of(client_uid) else {
            return;
        };

        let mut was_speaking = false;
        if let Some(state) = self.groups.get(&group_id) {
            let mut st = state.lock();
            was_speaking = st.current_speaker.as_deref() == Some(client_uid);
            st.remove_member(client_uid);
        }

        {
            let mut roster = self.roster.lock();
            if let Some(members) = roster.get_mut(&group_id) {
                members.retain(|m| m != client_uid);
                if members.len() <= 1 && !self.is_busy(&group_id) {
                    roster.remove(&group_id);
                    self.groups.remove(&group_id);
                }
            }
        }

        if was_speaking {
            self.interrupt_slot(&group_id).await;
        }
        info!(group = %group_id, client = %client_uid, "client left group");
    }

    /// Tears down everything tied to a disconnecting client: releases its
    /// sync-gate waiters, leaves its group, and cancels its active turn.
    pub async fn on_disconnect(&self, client_uid: &str) {
        self.gate.release_client(client_uid);
        if self.group_of(client_uid).is_some() {
            self.leave_group(client_uid).await;
        }
        if self.is_busy(client_uid) {
            self.interrupt_slot(client_uid).await;
        }
        self.partials.clear(client_uid);
        debug!(client = %client_uid, "client state released");
    }

    /// Cancels every active turn. Call on shutdown.
    pub fn shutdown(&self) {
        let mut slots = self.slots.lock();
        for (key, slot) in slots.drain() {
            if !slot.handle.is_finished() {
                info!(slot = %key, "cancelling turn for shutdown");
                slot.cancel.cancel();
                slot.handle.abort();
            }
        }
    }

    async fn notify_error(&self, client: &str, message: &str) {
        if let Some(sink) = self.registry.sender(client) {
            let _ = sink
                .send(OutboundMessage::Error {
                    message: message.to_string(),
                })
                .await;
        }
    }
}
