//! # End-to-End Conversation Scenarios
//!
//! Drives the conversation handler with scripted agent and synthesizer
//! backends over plain channels, no sockets, and checks the client-visible
//! traces and the persisted history: the hello-world turn, out-of-order
//! synthesis, mid-stream interrupts, concurrent-trigger rejection, group
//! round-robin with memory windowing, and proactive turns.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use aria::core::agent::{
    AgentEngine, AgentError, AgentOutput, AgentRequest, AgentResult, AgentStream, SentenceOutput,
};
use aria::core::conversation::{
    ClientRegistry, ControlAction, ConversationHandler, ConversationSettings, OutboundMessage,
    SyncGate, TurnInput, TurnMetadata,
};
use aria::core::memory::{TranscriptStore, TranscriptStoreConfig};
use aria::core::tts::{AudioData, SpeechSynthesizer, SynthResult};

// ============================================================================
// Scripted backends
// ============================================================================

type Script = Box<dyn Fn(usize, &AgentRequest) -> Vec<String> + Send + Sync>;

/// Agent whose responses are scripted per call; records every request.
struct ScriptedAgent {
    script: Script,
    delay_between_ms: u64,
    fail_after: Option<usize>,
    requests: StdMutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    fn new(script: Script) -> Self {
        Self {
            script,
            delay_between_ms: 0,
            fail_after: None,
            requests: StdMutex::new(Vec::new()),
        }
    }

    fn fixed(sentences: Vec<&'static str>) -> Self {
        Self::new(Box::new(move |_, _| {
            sentences.iter().map(|s| s.to_string()).collect()
        }))
    }

    fn with_delay(mut self, ms: u64) -> Self {
        self.delay_between_ms = ms;
        self
    }

    /// Yield `n` sentences, then end the stream with an error.
    fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AgentEngine for ScriptedAgent {
    async fn chat(&self, request: AgentRequest) -> AgentResult<AgentStream> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };

        let mut items: Vec<AgentResult<AgentOutput>> = (self.script)(call, &request)
            .into_iter()
            .map(|s| Ok(AgentOutput::Sentence(SentenceOutput::from_display(s))))
            .collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(AgentError::Stream("backend exploded".to_string())));
        }

        let delay = self.delay_between_ms;
        let stream = futures::stream::unfold(items.into_iter(), move |mut items| async move {
            let item = items.next()?;
            if delay > 0 {
                sleep(Duration::from_millis(delay)).await;
            }
            Some((item, items))
        });
        Ok(Box::pin(stream))
    }
}

/// Synthesizer with per-text scripted latency.
struct ScriptedSynth {
    delays_ms: Vec<(&'static str, u64)>,
}

impl ScriptedSynth {
    fn instant() -> Self {
        Self {
            delays_ms: Vec::new(),
        }
    }

    fn with_delays(delays_ms: Vec<(&'static str, u64)>) -> Self {
        Self { delays_ms }
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for ScriptedSynth {
    async fn synthesize(&self, text: &str) -> SynthResult<AudioData> {
        let delay = self
            .delays_ms
            .iter()
            .find(|(t, _)| *t == text)
            .map(|(_, d)| *d)
            .unwrap_or(0);
        if delay > 0 {
            sleep(Duration::from_millis(delay)).await;
        }
        Ok(AudioData {
            data: text.as_bytes().to_vec(),
            sample_rate: 24000,
            format: "wav".to_string(),
        })
    }

    fn sample_rate(&self) -> u32 {
        24000
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    handler: Arc<ConversationHandler>,
    gate: Arc<SyncGate>,
    registry: Arc<ClientRegistry>,
    memory: Arc<TranscriptStore>,
    agent: Arc<ScriptedAgent>,
}

fn build(agent: ScriptedAgent, synth: ScriptedSynth, playback_timeout_ms: u64) -> Harness {
    let registry = Arc::new(ClientRegistry::new());
    let gate = Arc::new(SyncGate::new());
    let memory = Arc::new(TranscriptStore::new(TranscriptStoreConfig::default()));
    let agent = Arc::new(agent);

    let settings = ConversationSettings {
        playback_timeout: Duration::from_millis(playback_timeout_ms),
        ..Default::default()
    };
    let handler = Arc::new(ConversationHandler::new(
        agent.clone(),
        Arc::new(synth),
        None,
        memory.clone(),
        gate.clone(),
        registry.clone(),
        settings,
    ));

    Harness {
        handler,
        gate,
        registry,
        memory,
        agent,
    }
}

impl Harness {
    fn connect(&self, uid: &str, name: &str) -> mpsc::Receiver<OutboundMessage> {
        let (tx, rx) = mpsc::channel(256);
        self.registry
            .register(uid.to_string(), tx, name.to_string());
        rx
    }

    /// Delivers the playback confirmation once the flow registers its wait.
    async fn confirm_playback(&self, uid: &str) {
        for _ in 0..500 {
            if self
                .gate
                .deliver(uid, &json!({"type": "frontend-playback-complete"}))
            {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("no playback waiter appeared for {uid}");
    }
}

async fn recv(rx: &mut mpsc::Receiver<OutboundMessage>) -> OutboundMessage {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("outbound channel closed")
}

fn expect_control(message: OutboundMessage, expected: ControlAction) {
    match message {
        OutboundMessage::Control { action } => assert_eq!(action, expected),
        other => panic!("expected control {expected:?}, got {other:?}"),
    }
}

fn expect_audio(message: OutboundMessage) -> (u64, String) {
    match message {
        OutboundMessage::AudioResponse {
            sequence,
            display_text,
            ..
        } => (sequence, display_text),
        other => panic!("expected audio-response, got {other:?}"),
    }
}

async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {what}");
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn hello_world_single_turn() {
    let h = build(
        ScriptedAgent::fixed(vec!["Hello!"]),
        ScriptedSynth::instant(),
        5_000,
    );
    let mut rx = h.connect("c1", "Alice");

    h.handler
        .handle_trigger("c1", TurnInput::Text("hi".to_string()), TurnMetadata::default())
        .await;

    expect_control(recv(&mut rx).await, ControlAction::ConversationChainStart);
    match recv(&mut rx).await {
        OutboundMessage::FullText { text } => assert_eq!(text, "Thinking..."),
        other => panic!("expected thinking placeholder, got {other:?}"),
    }

    let (seq, text) = expect_audio(recv(&mut rx).await);
    assert_eq!(seq, 0);
    assert_eq!(text, "Hello!");

    assert!(matches!(recv(&mut rx).await, OutboundMessage::SynthComplete));

    h.confirm_playback("c1").await;

    assert!(matches!(
        recv(&mut rx).await,
        OutboundMessage::ForceNewMessage
    ));
    expect_control(recv(&mut rx).await, ControlAction::ConversationChainEnd);

    let memory = h.memory.clone();
    wait_for("history appended", move || {
        memory.transcript("c1").len() == 2
    })
    .await;
    assert_eq!(h.memory.transcript("c1"), vec!["User: hi", "Aria: Hello!"]);
}

#[tokio::test]
async fn out_of_order_synthesis_delivers_in_order() {
    let h = build(
        ScriptedAgent::fixed(vec!["A.", "B.", "C."]),
        ScriptedSynth::with_delays(vec![("A.", 300), ("B.", 50), ("C.", 100)]),
        5_000,
    );
    let mut rx = h.connect("c1", "Alice");

    h.handler
        .handle_trigger("c1", TurnInput::Text("go".to_string()), TurnMetadata::default())
        .await;

    expect_control(recv(&mut rx).await, ControlAction::ConversationChainStart);
    let _thinking = recv(&mut rx).await;

    for (expected_seq, expected_text) in [(0u64, "A."), (1, "B."), (2, "C.")] {
        let (seq, text) = expect_audio(recv(&mut rx).await);
        assert_eq!(seq, expected_seq);
        assert_eq!(text, expected_text);
    }
    assert!(matches!(recv(&mut rx).await, OutboundMessage::SynthComplete));

    h.confirm_playback("c1").await;
}

#[tokio::test]
async fn interrupt_mid_stream_preserves_partial() {
    let h = build(
        ScriptedAgent::fixed(vec![
            "Sentence zero.",
            "Sentence one.",
            "Sentence two.",
            "Sentence three.",
            "Sentence four.",
        ])
        .with_delay(150),
        ScriptedSynth::instant(),
        5_000,
    );
    let mut rx = h.connect("c1", "Alice");

    h.handler
        .handle_trigger("c1", TurnInput::Text("go".to_string()), TurnMetadata::default())
        .await;

    expect_control(recv(&mut rx).await, ControlAction::ConversationChainStart);
    let _thinking = recv(&mut rx).await;

    let (seq0, _) = expect_audio(recv(&mut rx).await);
    let (seq1, _) = expect_audio(recv(&mut rx).await);
    assert_eq!((seq0, seq1), (0, 1));

    h.handler.handle_interrupt("c1").await;

    // Nothing but the interrupt signalling may arrive past the cut.
    assert!(matches!(
        recv(&mut rx).await,
        OutboundMessage::InterruptSignal
    ));
    expect_control(recv(&mut rx).await, ControlAction::ConversationChainEnd);
    let leak = timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(leak.is_err(), "message leaked after interrupt: {leak:?}");

    let transcript = h.memory.transcript("c1");
    assert_eq!(transcript[0], "User: go");
    assert!(transcript[1].starts_with("Aria: Sentence zero."));
    assert_eq!(transcript.last().unwrap(), "[Interrupted by user]");
}

#[tokio::test]
async fn interrupt_before_any_audio_records_empty_response() {
    let h = build(
        ScriptedAgent::fixed(vec!["Too late."]).with_delay(500),
        ScriptedSynth::instant(),
        5_000,
    );
    let mut rx = h.connect("c1", "Alice");

    h.handler
        .handle_trigger("c1", TurnInput::Text("go".to_string()), TurnMetadata::default())
        .await;

    expect_control(recv(&mut rx).await, ControlAction::ConversationChainStart);
    let _thinking = recv(&mut rx).await;

    h.handler.handle_interrupt("c1").await;

    assert!(matches!(
        recv(&mut rx).await,
        OutboundMessage::InterruptSignal
    ));
    expect_control(recv(&mut rx).await, ControlAction::ConversationChainEnd);

    assert_eq!(
        h.memory.transcript("c1"),
        vec!["User: go", "Aria: ", "[Interrupted by user]"]
    );
}

#[tokio::test]
async fn concurrent_trigger_is_rejected() {
    let h = build(
        ScriptedAgent::fixed(vec!["Slow reply."]).with_delay(400),
        ScriptedSynth::instant(),
        5_000,
    );
    let mut rx = h.connect("c1", "Alice");

    h.handler
        .handle_trigger("c1", TurnInput::Text("first".to_string()), TurnMetadata::default())
        .await;
    sleep(Duration::from_millis(50)).await;
    h.handler
        .handle_trigger("c1", TurnInput::Text("second".to_string()), TurnMetadata::default())
        .await;

    expect_control(recv(&mut rx).await, ControlAction::ConversationChainStart);
    let _thinking = recv(&mut rx).await;

    // The second trigger produced only an error, no new chain-start.
    match recv(&mut rx).await {
        OutboundMessage::Error { message } => {
            assert!(message.contains("already in progress"));
        }
        other => panic!("expected rejection error, got {other:?}"),
    }

    // The first turn still completes normally.
    let (seq, text) = expect_audio(recv(&mut rx).await);
    assert_eq!((seq, text.as_str()), (0, "Slow reply."));
    assert!(matches!(recv(&mut rx).await, OutboundMessage::SynthComplete));
    h.confirm_playback("c1").await;
    assert!(matches!(
        recv(&mut rx).await,
        OutboundMessage::ForceNewMessage
    ));
    expect_control(recv(&mut rx).await, ControlAction::ConversationChainEnd);

    // Exactly one user line: the rejected trigger never became a turn.
    let memory = h.memory.clone();
    wait_for("history appended", move || {
        memory.transcript("c1").len() == 2
    })
    .await;
    assert_eq!(
        h.memory.transcript("c1"),
        vec!["User: first", "Aria: Slow reply."]
    );
}

#[tokio::test]
async fn agent_error_ends_turn_with_error_marker() {
    let h = build(
        ScriptedAgent::fixed(vec!["Partial.", "Never seen."])
            .with_delay(50)
            .failing_after(1),
        ScriptedSynth::instant(),
        5_000,
    );
    let mut rx = h.connect("c1", "Alice");

    h.handler
        .handle_trigger("c1", TurnInput::Text("go".to_string()), TurnMetadata::default())
        .await;

    expect_control(recv(&mut rx).await, ControlAction::ConversationChainStart);
    let _thinking = recv(&mut rx).await;
    let (_, text) = expect_audio(recv(&mut rx).await);
    assert_eq!(text, "Partial.");

    match recv(&mut rx).await {
        OutboundMessage::Error { message } => assert!(message.contains("agent failed")),
        other => panic!("expected error event, got {other:?}"),
    }
    expect_control(recv(&mut rx).await, ControlAction::ConversationChainEnd);

    let memory = h.memory.clone();
    wait_for("failure recorded", move || {
        memory.transcript("c1").len() == 3
    })
    .await;
    let transcript = h.memory.transcript("c1");
    assert_eq!(transcript[1], "Aria: Partial.");
    assert_eq!(transcript[2], "[error]");
}

#[tokio::test]
async fn playback_timeout_still_finishes_the_turn() {
    let h = build(
        ScriptedAgent::fixed(vec!["No one is listening."]),
        ScriptedSynth::instant(),
        200,
    );
    let mut rx = h.connect("c1", "Alice");

    h.handler
        .handle_trigger("c1", TurnInput::Text("go".to_string()), TurnMetadata::default())
        .await;

    expect_control(recv(&mut rx).await, ControlAction::ConversationChainStart);
    let _thinking = recv(&mut rx).await;
    let _audio = recv(&mut rx).await;
    assert!(matches!(recv(&mut rx).await, OutboundMessage::SynthComplete));

    // No confirmation is ever sent; the turn must close on its own.
    assert!(matches!(
        recv(&mut rx).await,
        OutboundMessage::ForceNewMessage
    ));
    expect_control(recv(&mut rx).await, ControlAction::ConversationChainEnd);

    let memory = h.memory.clone();
    wait_for("history appended despite timeout", move || {
        memory.transcript("c1").len() == 2
    })
    .await;
}

#[tokio::test]
async fn group_round_robin_with_memory_windows() {
    let h = build(
        ScriptedAgent::new(Box::new(|_, request| {
            vec![format!(
                "Hi from {}.",
                request.speaker.clone().unwrap_or_default()
            )]
        })),
        ScriptedSynth::instant(),
        5_000,
    );
    let mut rx_a = h.connect("a", "Alice");
    let mut rx_b = h.connect("b", "Bob");

    h.handler.join_group("a", "b").await;
    h.handler
        .handle_trigger("a", TurnInput::Text("start".to_string()), TurnMetadata::default())
        .await;

    // Three member turns: Alice, Bob, Alice again.
    for expected in ["Hi from Alice.", "Hi from Bob.", "Hi from Alice."] {
        // Both members observe the same turn.
        let mut heard = (false, false);
        loop {
            let msg = recv(&mut rx_a).await;
            if let OutboundMessage::AudioResponse { display_text, .. } = &msg {
                assert_eq!(display_text, expected);
                heard.0 = true;
            }
            if matches!(msg, OutboundMessage::SynthComplete) {
                break;
            }
        }
        loop {
            let msg = recv(&mut rx_b).await;
            if let OutboundMessage::AudioResponse { display_text, .. } = &msg {
                assert_eq!(display_text, expected);
                heard.1 = true;
            }
            if matches!(msg, OutboundMessage::SynthComplete) {
                break;
            }
        }
        assert!(heard.0 && heard.1, "both members hear the speaker");

        // Broadcast finalization waits for every member's confirmation.
        h.confirm_playback("a").await;
        h.confirm_playback("b").await;
    }

    h.handler.handle_interrupt("a").await;

    let requests = h.agent.requests();
    assert!(requests.len() >= 3);

    // P6: each member's context is exactly the history appended since its
    // previous turn.
    assert_eq!(requests[0].speaker.as_deref(), Some("Alice"));
    assert!(requests[0].user_text.contains("Alice: start"));

    assert_eq!(requests[1].speaker.as_deref(), Some("Bob"));
    assert!(requests[1].user_text.contains("Alice: start"));
    assert!(requests[1].user_text.contains("Alice: Hi from Alice."));

    assert_eq!(requests[2].speaker.as_deref(), Some("Alice"));
    assert!(requests[2].user_text.contains("Bob: Hi from Bob."));
    assert!(
        !requests[2].user_text.contains("start"),
        "already-observed history must not be replayed"
    );
}

#[tokio::test]
async fn group_interrupt_reaches_every_member() {
    let h = build(
        ScriptedAgent::new(Box::new(|_, request| {
            vec![format!(
                "Hi from {}.",
                request.speaker.clone().unwrap_or_default()
            )]
        }))
        .with_delay(300),
        ScriptedSynth::instant(),
        5_000,
    );
    let mut rx_a = h.connect("a", "Alice");
    let mut rx_b = h.connect("b", "Bob");

    h.handler.join_group("a", "b").await;
    h.handler
        .handle_trigger("a", TurnInput::Text("start".to_string()), TurnMetadata::default())
        .await;

    // Let the first member turn get going, then cut it from Bob's side.
    expect_control(recv(&mut rx_a).await, ControlAction::ConversationChainStart);
    expect_control(recv(&mut rx_b).await, ControlAction::ConversationChainStart);
    h.handler.handle_interrupt("b").await;

    let mut a_signalled = false;
    while let Ok(Some(msg)) = timeout(Duration::from_millis(500), rx_a.recv()).await {
        if matches!(msg, OutboundMessage::InterruptSignal) {
            a_signalled = true;
            break;
        }
    }
    let mut b_signalled = false;
    while let Ok(Some(msg)) = timeout(Duration::from_millis(500), rx_b.recv()).await {
        if matches!(msg, OutboundMessage::InterruptSignal) {
            b_signalled = true;
            break;
        }
    }
    assert!(a_signalled && b_signalled);
}

#[tokio::test]
async fn proactive_turn_is_excluded_from_history() {
    let h = build(
        ScriptedAgent::fixed(vec!["I am still here."]),
        ScriptedSynth::instant(),
        5_000,
    );
    let mut rx = h.connect("c1", "Alice");

    h.handler.handle_proactive("c1").await;

    expect_control(recv(&mut rx).await, ControlAction::ConversationChainStart);
    let _thinking = recv(&mut rx).await;
    let (_, text) = expect_audio(recv(&mut rx).await);
    assert_eq!(text, "I am still here.");
    assert!(matches!(recv(&mut rx).await, OutboundMessage::SynthComplete));
    h.confirm_playback("c1").await;
    assert!(matches!(
        recv(&mut rx).await,
        OutboundMessage::ForceNewMessage
    ));
    expect_control(recv(&mut rx).await, ControlAction::ConversationChainEnd);

    // The solicitation used the fixed prompt and left no trace in history.
    sleep(Duration::from_millis(100)).await;
    assert!(h.memory.transcript("c1").is_empty());
    assert_eq!(h.agent.requests()[0].user_text, "Please say something.");
}

#[tokio::test]
async fn empty_input_closes_the_chain_without_output() {
    let h = build(
        ScriptedAgent::fixed(vec!["Should never run."]),
        ScriptedSynth::instant(),
        5_000,
    );
    let mut rx = h.connect("c1", "Alice");

    h.handler
        .handle_trigger("c1", TurnInput::Text("   ".to_string()), TurnMetadata::default())
        .await;

    expect_control(recv(&mut rx).await, ControlAction::ConversationChainStart);
    let _thinking = recv(&mut rx).await;
    expect_control(recv(&mut rx).await, ControlAction::ConversationChainEnd);

    sleep(Duration::from_millis(100)).await;
    assert!(h.agent.requests().is_empty());
    assert!(h.memory.transcript("c1").is_empty());
}

#[tokio::test]
async fn interrupt_with_no_active_turn_is_a_noop() {
    let h = build(
        ScriptedAgent::fixed(vec!["irrelevant"]),
        ScriptedSynth::instant(),
        5_000,
    );
    let mut rx = h.connect("c1", "Alice");

    h.handler.handle_interrupt("c1").await;

    let silence = timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(silence.is_err(), "no-op interrupt must stay silent");
}
