//! Parallel synthesis with in-order delivery.
//!
//! Sentences are synthesized concurrently to minimize first-audio latency,
//! but the client must receive them in producer order. Each submission gets
//! the next sequence number; completed audio flows over a channel into a
//! sender loop that drains a reorder buffer strictly in sequence:
//!
//! ```text
//! agent stream:   s0 ───── s1 ───── s2
//!                  │         │        │        (parallel synthesis)
//! completions:   (s1) ───── (s2) ── (s0)       (arrive out of order)
//!                        sender loop
//! client:         s0, s1, s2                   (strictly ordered)
//! ```
//!
//! The sender never advances past a gap, so correctness only needs every
//! submitted sequence to eventually enqueue a payload. That is
//! why failed syntheses enqueue a sentinel payload instead of vanishing.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::core::agent::{AudioOutput, SentenceOutput};
use crate::core::tts::SpeechSynthesizer;

use super::events::{OutboundMessage, OutboundSender};

struct Completion {
    sequence: u64,
    payload: OutboundMessage,
}

/// Per-turn synthesis scheduler. Create one per turn, `clear` it on every
/// exit path; after `clear` the manager is reusable for a fresh turn.
pub struct TtsTaskManager {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    limiter: Arc<Semaphore>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: Option<mpsc::UnboundedReceiver<Completion>>,
    sender_task: Option<JoinHandle<()>>,
    next_seq: u64,
    delivered_tx: Option<watch::Sender<u64>>,
    delivered_rx: watch::Receiver<u64>,
}

impl TtsTaskManager {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, max_concurrent: usize) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (delivered_tx, delivered_rx) = watch::channel(0);
        Self {
            synthesizer,
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            completion_tx,
            completion_rx: Some(completion_rx),
            sender_task: None,
            next_seq: 0,
            delivered_tx: Some(delivered_tx),
            delivered_rx,
        }
    }

    /// Submits one sentence. Assigns the next sequence number, starts a
    /// background synthesis, and returns immediately. Sentences with blank
    /// synthesis text are skipped before a sequence is assigned.
    pub fn speak(&mut self, sentence: SentenceOutput, sink: &OutboundSender) {
        if sentence.tts_text.trim().is_empty() {
            return;
        }

        let sequence = self.next_seq;
        self.next_seq += 1;
        self.ensure_sender(sink);

        let synthesizer = self.synthesizer.clone();
        let limiter = self.limiter.clone();
        let cancel = self.cancel.clone();
        let completion_tx = self.completion_tx.clone();

        let task = tokio::spawn(async move {
            let _permit = tokio::select! {
                _ = cancel.cancelled() => return,
                permit = limiter.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = synthesizer.synthesize(&sentence.tts_text) => result,
            };

            let payload = match result {
                Ok(audio) if !audio.data.is_empty() => {
                    debug!(sequence, bytes = audio.data.len(), "synthesis ready");
                    OutboundMessage::AudioResponse {
                        audio: BASE64.encode(&audio.data),
                        display_text: sentence.display_text,
                        actions: sentence.actions,
                        sequence,
                        sample_rate: Some(audio.sample_rate),
                        error: None,
                    }
                }
                Ok(_) => {
                    warn!(sequence, "synthesizer returned empty audio");
                    sentinel_payload(sequence, sentence.display_text, sentence.actions, None)
                }
                Err(e) => {
                    error!(sequence, error = %e, "synthesis failed");
                    sentinel_payload(
                        sequence,
                        sentence.display_text,
                        sentence.actions,
                        Some(e.to_string()),
                    )
                }
            };
            let _ = completion_tx.send(Completion { sequence, payload });
        });
        self.tasks.push(task);
    }

    /// Serializes audio the agent rendered itself through the same sequence
    /// counter, so it cannot overtake pending syntheses.
    pub fn speak_prerendered(&mut self, audio: AudioOutput, sink: &OutboundSender) {
        let sequence = self.next_seq;
        self.next_seq += 1;
        self.ensure_sender(sink);

        let payload = OutboundMessage::AudioResponse {
            audio: BASE64.encode(&audio.audio),
            display_text: audio.display_text,
            actions: audio.actions,
            sequence,
            sample_rate: Some(audio.sample_rate),
            error: None,
        };
        let _ = self.completion_tx.send(Completion { sequence, payload });
    }

    /// Suspends until every submitted sequence has been delivered (or the
    /// manager was cleared underneath us).
    pub async fn drain(&mut self) {
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "synthesis task panicked");
                }
            }
        }

        if self.next_seq > 0 {
            let target = self.next_seq;
            let mut delivered = self.delivered_rx.clone();
            if delivered.wait_for(|sent| *sent >= target).await.is_err() {
                debug!("sender loop stopped before drain completed");
            }
        }
    }

    /// Drains, then signals that no further audio follows for this turn.
    pub async fn finish(&mut self, sink: &OutboundSender) {
        self.drain().await;
        if sink.send(OutboundMessage::SynthComplete).await.is_err() {
            warn!("failed to send synth-complete signal");
        }
    }

    /// Cancels the sender loop and all outstanding syntheses, empties the
    /// reorder buffer, and resets the sequence counter. Call on every exit
    /// path; safe to call repeatedly.
    pub fn clear(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(sender) = self.sender_task.take() {
            sender.abort();
        }

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        self.completion_tx = completion_tx;
        self.completion_rx = Some(completion_rx);
        let (delivered_tx, delivered_rx) = watch::channel(0);
        self.delivered_tx = Some(delivered_tx);
        self.delivered_rx = delivered_rx;
        self.cancel = CancellationToken::new();
        self.next_seq = 0;
        debug!("tts task manager cleared");
    }

    /// Syntheses still running.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }

    /// Sequences submitted since the last `clear`.
    pub fn submitted(&self) -> u64 {
        self.next_seq
    }

    fn ensure_sender(&mut self, sink: &OutboundSender) {
        let running = self
            .sender_task
            .as_ref()
            .is_some_and(|task| !task.is_finished());
        if running {
            return;
        }
        let (Some(completion_rx), Some(delivered_tx)) =
            (self.completion_rx.take(), self.delivered_tx.take())
        else {
            return;
        };
        self.sender_task = Some(tokio::spawn(run_sender(
            completion_rx,
            sink.clone(),
            delivered_tx,
            self.cancel.clone(),
        )));
    }
}

/// Dequeues completions into a reorder buffer and sends payloads strictly in
/// sequence order, never advancing past a gap.
async fn run_sender(
    mut completions: mpsc::UnboundedReceiver<Completion>,
    sink: OutboundSender,
    delivered: watch::Sender<u64>,
    cancel: CancellationToken,
) {
    let mut buffered: BTreeMap<u64, OutboundMessage> = BTreeMap::new();
    let mut next_to_send: u64 = 0;

    loop {
        let completion = tokio::select! {
            _ = cancel.cancelled() => return,
            completion = completions.recv() => match completion {
                Some(completion) => completion,
                None => return,
            },
        };
        buffered.insert(completion.sequence, completion.payload);

        while let Some(payload) = buffered.remove(&next_to_send) {
            if sink.send(payload).await.is_err() {
                warn!(sequence = next_to_send, "failed to send audio chunk");
            }
            next_to_send += 1;
            let _ = delivered.send(next_to_send);
        }
    }
}

fn sentinel_payload(
    sequence: u64,
    display_text: String,
    actions: Option<crate::core::agent::Actions>,
    error: Option<String>,
) -> OutboundMessage {
    OutboundMessage::AudioResponse {
        audio: String::new(),
        display_text,
        actions,
        sequence,
        sample_rate: None,
        error,
    }
}
