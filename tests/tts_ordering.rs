//! # Ordered Synthesis Delivery Tests
//!
//! The parallel-with-order pattern is the central algorithmic idea of the
//! turn system, so it gets exercised in isolation here before it is
//! composed with agents or transports: adversarial synthesis delays, failure
//! sentinels, cancellation cuts, and manager reuse.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use aria::core::agent::SentenceOutput;
use aria::core::conversation::{OutboundMessage, TtsTaskManager};
use aria::core::tts::{AudioData, SpeechSynthesizer, SynthError, SynthResult};

/// Synthesizer whose latency and failures are scripted per text, so the
/// script is independent of task scheduling order.
struct ScriptedSynthesizer {
    delays_ms: Vec<(&'static str, u64)>,
    fail_on: Vec<&'static str>,
    calls: AtomicUsize,
}

impl ScriptedSynthesizer {
    fn new(delays_ms: Vec<(&'static str, u64)>) -> Self {
        Self {
            delays_ms,
            fail_on: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_on(mut self, texts: Vec<&'static str>) -> Self {
        self.fail_on = texts;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, text: &str) -> SynthResult<AudioData> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self
            .delays_ms
            .iter()
            .find(|(t, _)| *t == text)
            .map(|(_, d)| *d)
            .unwrap_or(0);
        if delay > 0 {
            sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_on.contains(&text) {
            return Err(SynthError::EmptyAudio(text.to_string()));
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

fn sentence(text: &str) -> SentenceOutput {
    SentenceOutput {
        display_text: text.to_string(),
        tts_text: text.to_string(),
        actions: None,
    }
}

fn as_audio(message: OutboundMessage) -> (u64, String, bool) {
    match message {
        OutboundMessage::AudioResponse {
            sequence,
            display_text,
            audio,
            ..
        } => (sequence, display_text, audio.is_empty()),
        other => panic!("expected audio-response, got {other:?}"),
    }
}

#[tokio::test]
async fn adversarial_delays_never_reorder_delivery() {
    let texts = [
        "alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel",
    ];
    // Early sequences slow, late sequences fast: worst case for ordering.
    let delays = vec![
        ("alpha", 200),
        ("bravo", 150),
        ("charlie", 100),
        ("delta", 60),
        ("echo", 30),
        ("foxtrot", 10),
        ("golf", 0),
        ("hotel", 0),
    ];
    let synth = Arc::new(ScriptedSynthesizer::new(delays));
    let mut manager = TtsTaskManager::new(synth.clone(), 8);
    let (tx, mut rx) = mpsc::channel(64);

    for text in texts {
        manager.speak(sentence(text), &tx);
    }
    manager.finish(&tx).await;

    for (expected_seq, expected_text) in texts.iter().enumerate() {
        let (seq, text, empty) = as_audio(rx.recv().await.expect("audio chunk"));
        assert_eq!(seq, expected_seq as u64);
        assert_eq!(text, *expected_text);
        assert!(!empty);
    }
    assert!(matches!(
        rx.recv().await.expect("final signal"),
        OutboundMessage::SynthComplete
    ));
    assert_eq!(synth.calls(), texts.len());
    manager.clear();
}

#[tokio::test]
async fn failures_midstream_leave_no_gaps() {
    let synth =
        Arc::new(ScriptedSynthesizer::new(vec![("two", 50)]).failing_on(vec!["one", "three"]));
    let mut manager = TtsTaskManager::new(synth, 4);
    let (tx, mut rx) = mpsc::channel(64);

    for text in ["zero", "one", "two", "three"] {
        manager.speak(sentence(text), &tx);
    }
    manager.finish(&tx).await;

    let received: Vec<(u64, String, bool)> = {
        let mut out = Vec::new();
        loop {
            match rx.recv().await.expect("message") {
                OutboundMessage::SynthComplete => break,
                msg => out.push(as_audio(msg)),
            }
        }
        out
    };

    let sequences: Vec<u64> = received.iter().map(|(seq, _, _)| *seq).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3]);
    // Failed sentences arrive as sentinels with their display text intact.
    assert!(received[1].2 && received[3].2);
    assert_eq!(received[1].1, "one");
    assert!(!received[0].2 && !received[2].2);
    manager.clear();
}

#[tokio::test]
async fn clear_cuts_delivery_and_nothing_leaks_after() {
    let synth = Arc::new(ScriptedSynthesizer::new(vec![
        ("late-a", 5_000),
        ("late-b", 5_000),
        ("late-c", 5_000),
    ]));
    let mut manager = TtsTaskManager::new(synth, 8);
    let (tx, mut rx) = mpsc::channel(64);

    for text in ["fast-0", "fast-1", "late-a", "late-b", "late-c"] {
        manager.speak(sentence(text), &tx);
    }

    // The two fast chunks make it out.
    let (seq0, _, _) = as_audio(rx.recv().await.expect("first chunk"));
    let (seq1, _, _) = as_audio(rx.recv().await.expect("second chunk"));
    assert_eq!((seq0, seq1), (0, 1));

    manager.clear();

    // No chunk past the cancellation point is ever delivered.
    let leak = timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(leak.is_err(), "audio leaked after clear: {leak:?}");
    assert_eq!(manager.pending_tasks(), 0);
    assert_eq!(manager.submitted(), 0);
}

#[tokio::test]
async fn manager_reuse_restarts_sequence_numbering() {
    let synth = Arc::new(ScriptedSynthesizer::new(Vec::new()));
    let mut manager = TtsTaskManager::new(synth, 4);

    for round in 0..3 {
        let (tx, mut rx) = mpsc::channel(16);
        manager.speak(sentence("first"), &tx);
        manager.speak(sentence("second"), &tx);
        manager.finish(&tx).await;

        let (seq0, _, _) = as_audio(rx.recv().await.expect("chunk"));
        let (seq1, _, _) = as_audio(rx.recv().await.expect("chunk"));
        assert_eq!((seq0, seq1), (0, 1), "wrong sequences in round {round}");
        assert!(matches!(
            rx.recv().await.expect("signal"),
            OutboundMessage::SynthComplete
        ));

        manager.clear();
    }
}
