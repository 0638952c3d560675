//! Session controller lifecycle against scripted providers

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use voice_bridge_config::Settings;
use voice_bridge_core::{
    AudioFrame, AudioStream, Error, GenerationStats, LanguageModel, Result, Role, SampleRate,
    SpeechToText, SynthesisStream, TextToSpeech, TranscriptEntry, TranscriptResult,
    TranscriptStream,
};
use voice_bridge_pipeline::AudioSink;
use voice_bridge_server::{Providers, ServerError, Session, SessionManager, SessionState};

/// Never transcribes anything
struct SilentStt;

impl SpeechToText for SilentStt {
    fn transcribe_stream<'a>(&'a self, audio: AudioStream<'a>) -> TranscriptStream<'a> {
        use futures::StreamExt;

        Box::pin(audio.filter_map(|_| futures::future::ready(None::<Result<TranscriptResult>>)))
    }

    fn model_name(&self) -> &str {
        "silent"
    }
}

#[derive(Default)]
struct CountingLlm {
    calls: AtomicUsize,
}

#[async_trait]
impl LanguageModel for CountingLlm {
    async fn generate_stream(
        &self,
        _messages: &[TranscriptEntry],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationStats> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut stats = GenerationStats::default();
        for fragment in ["Hello, ", "I am your assistant. ", "How can I help?"] {
            tokio::time::sleep(Duration::from_millis(2)).await;
            if tx.send(fragment.to_string()).await.is_err() {
                break;
            }
            stats.text.push_str(fragment);
        }
        Ok(stats)
    }

    fn model_name(&self) -> &str {
        "counting"
    }
}

struct SlowTts {
    frames: usize,
    fail: bool,
}

impl TextToSpeech for SlowTts {
    fn synthesize_stream<'a>(&'a self, _text: &'a str) -> SynthesisStream<'a> {
        Box::pin(async_stream::stream! {
            if self.fail {
                yield Err::<AudioFrame, Error>(Error::Provider("tts: quota exceeded".into()));
                return;
            }
            for seq in 0..self.frames {
                tokio::time::sleep(Duration::from_millis(5)).await;
                yield Ok(AudioFrame::new(vec![0.1; 160], SampleRate::Hz8000, seq as u64));
            }
        })
    }

    fn output_sample_rate(&self) -> SampleRate {
        SampleRate::Hz8000
    }

    fn voice_name(&self) -> &str {
        "slow"
    }
}

#[derive(Default)]
struct RecordingSink {
    sent: AtomicUsize,
    closed: AtomicBool,
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn send_audio(&self, _frame: &AudioFrame) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport("closed".into()));
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct Call {
    session: Arc<Session>,
    llm: Arc<CountingLlm>,
    sink: Arc<RecordingSink>,
}

fn call(stream_sid: &str, tts: SlowTts) -> Call {
    let llm = Arc::new(CountingLlm::default());
    let sink = Arc::new(RecordingSink::default());
    let providers = Providers::new(Arc::new(SilentStt), llm.clone(), Arc::new(tts));
    let session = Session::new(stream_sid, &Settings::default(), &providers, sink.clone()).unwrap();
    Call { session, llm, sink }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_greeting_queued_once() {
    let c = call("CA1", SlowTts { frames: 2, fail: false });
    assert_eq!(c.session.state(), SessionState::Connecting);

    // Seeded with the persona before the pipeline starts
    let transcript = c.session.transcript();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].role, Role::System);

    c.session.start();
    assert_eq!(c.session.state(), SessionState::Active);

    c.session.on_client_connected().await.unwrap();
    c.session.on_client_connected().await.unwrap();

    let session = c.session.clone();
    wait_for(move || session.transcript().iter().any(|e| e.role == Role::Assistant)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let transcript = c.session.transcript();
    let systems = transcript.iter().filter(|e| e.role == Role::System).count();
    assert_eq!(systems, 2);
    assert_eq!(transcript[1].content, Settings::default().persona.greeting_instruction);
    assert_eq!(c.llm.calls.load(Ordering::SeqCst), 1);
    assert!(c.sink.sent.load(Ordering::SeqCst) > 0);

    c.session.on_client_disconnected().await;
    assert_eq!(c.session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_disconnect_mid_response_stops_audio() {
    let c = call("CA2", SlowTts { frames: 400, fail: false });
    c.session.start();
    c.session.on_client_connected().await.unwrap();

    let sink = c.sink.clone();
    wait_for(move || sink.sent.load(Ordering::SeqCst) > 0).await;

    c.session.on_client_disconnected().await;
    let sent_at_cancel = c.sink.sent.load(Ordering::SeqCst);
    assert_eq!(c.session.state(), SessionState::Closed);
    assert!(c.sink.closed.load(Ordering::SeqCst));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(c.sink.sent.load(Ordering::SeqCst), sent_at_cancel);
    c.session.finished().await.unwrap();

    // Lifecycle signals after close are ignored
    c.session.on_client_connected().await.unwrap();
    c.session.on_client_disconnected().await;
    assert_eq!(c.llm.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stage_failure_closes_session() {
    let c = call("CA3", SlowTts { frames: 0, fail: true });
    c.session.start();
    c.session.on_client_connected().await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), c.session.finished())
        .await
        .expect("pipeline ends after stage failure");
    assert!(matches!(outcome, Err(Error::Stage(ref e)) if e.stage_name == "tts"));
    assert_eq!(c.session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_session_manager_capacity() {
    let manager = SessionManager::new(1);
    let first = call("CA4", SlowTts { frames: 1, fail: false });
    let second = call("CA5", SlowTts { frames: 1, fail: false });

    manager.insert(first.session.clone()).unwrap();
    assert!(!manager.has_capacity());
    assert!(matches!(
        manager.insert(second.session.clone()),
        Err(ServerError::Capacity(1))
    ));
    assert_eq!(manager.count(), 1);

    assert!(manager.remove("CA4").is_some());
    manager.insert(second.session.clone()).unwrap();
    assert_eq!(manager.count(), 1);
    assert!(manager.ensure_capacity().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_session_leaves_others_running() {
    let manager = SessionManager::new(4);
    let broken = call("CA6", SlowTts { frames: 0, fail: true });
    let healthy = call("CA7", SlowTts { frames: 2, fail: false });
    manager.insert(broken.session.clone()).unwrap();
    manager.insert(healthy.session.clone()).unwrap();

    for c in [&broken, &healthy] {
        c.session.start();
        c.session.on_client_connected().await.unwrap();
    }

    let outcome = tokio::time::timeout(Duration::from_secs(5), broken.session.finished())
        .await
        .expect("failed session ends");
    assert!(matches!(outcome, Err(Error::Stage(_))));
    manager.remove("CA6");

    let session = healthy.session.clone();
    wait_for(move || session.transcript().iter().any(|e| e.role == Role::Assistant)).await;
    assert_eq!(healthy.session.state(), SessionState::Active);
    assert!(healthy.sink.sent.load(Ordering::SeqCst) > 0);
    assert!(!healthy.sink.closed.load(Ordering::SeqCst));
    assert!(broken.sink.closed.load(Ordering::SeqCst));
    assert_eq!(manager.count(), 1);

    healthy.session.on_client_disconnected().await;
    healthy.session.finished().await.unwrap();
}
