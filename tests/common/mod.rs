//! Shared test utilities
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use voice_coach::config::{LlmConfig, PipelineConfig};
use voice_coach::gateway::{BackendError, ChatBackend, ChatRequest, ModelGateway};
use voice_coach::session::SessionDeps;
use voice_coach::voice::{AudioSink, SpeechSynthesizer};
use voice_coach::{Catalog, Room, SessionStore, SqliteStore};

pub type Reply = Result<String, BackendError>;

/// Silence timeout used by session tests
pub const SILENCE: Duration = Duration::from_millis(3000);

/// Set up an in-memory room store
#[must_use]
pub fn setup_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::in_memory().expect("failed to init test db"))
}

/// Create a test room
pub async fn create_room(store: &SqliteStore, topic: &str, mode: &str, persona: &str) -> Room {
    store
        .create(topic, mode, persona)
        .await
        .expect("failed to create test room")
}

/// Chat backend answering from a script
///
/// Each call takes one permit from `gate` before answering, so tests can
/// hold replies in flight. Open gates have plenty of permits.
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ChatRequest>>,
    gate: Semaphore,
}

impl ScriptedBackend {
    /// Backend that answers immediately
    #[must_use]
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Self::gated(replies, Semaphore::MAX_PERMITS)
    }

    /// Backend that answers only as permits are released
    #[must_use]
    pub fn held(replies: Vec<Reply>) -> Arc<Self> {
        Self::gated(replies, 0)
    }

    fn gated(replies: Vec<Reply>, permits: usize) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            gate: Semaphore::new(permits),
        })
    }

    /// Let one held reply through
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn complete(&self, request: &ChatRequest) -> Reply {
        self.requests.lock().unwrap().push(request.clone());
        self.gate.acquire().await.expect("gate closed").forget();
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(BackendError::Empty))
    }
}

/// Synthesizer recording what it was asked to say
#[derive(Default)]
pub struct RecordingSynth {
    pub spoken: Mutex<Vec<(String, String)>>,
}

impl RecordingSynth {
    pub fn texts(&self) -> Vec<String> {
        self.spoken.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn voices(&self) -> Vec<String> {
        self.spoken.lock().unwrap().iter().map(|(_, v)| v.clone()).collect()
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynth {
    async fn synthesize(&self, text: &str, voice_id: &str) -> voice_coach::Result<Vec<u8>> {
        self.spoken
            .lock()
            .unwrap()
            .push((text.to_string(), voice_id.to_string()));
        Ok(text.as_bytes().to_vec())
    }
}

/// Sink that finishes playback immediately
pub struct InstantSink;

#[async_trait]
impl AudioSink for InstantSink {
    async fn play(&self, _audio: Vec<u8>) -> voice_coach::Result<()> {
        Ok(())
    }
}

/// Everything a session test needs
pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub backend: Arc<ScriptedBackend>,
    pub synth: Arc<RecordingSynth>,
    pub deps: SessionDeps,
}

/// Session dependencies over an in-memory store and scripted services
#[must_use]
pub fn harness(backend: Arc<ScriptedBackend>) -> Harness {
    let store = setup_store();
    let synth = Arc::new(RecordingSynth::default());
    let catalog = Arc::new(Catalog::builtin());

    let llm = LlmConfig {
        primary_model: "primary".to_string(),
        fallback_models: vec!["fallback".to_string()],
        dispatch_spacing: Duration::ZERO,
        requests_per_minute: None,
        ..LlmConfig::default()
    };
    let gateway = ModelGateway::new(
        Arc::clone(&backend) as Arc<dyn ChatBackend>,
        &llm,
        2,
        Arc::clone(&catalog),
    );

    let deps = SessionDeps {
        store: Arc::clone(&store) as Arc<dyn SessionStore>,
        gateway: Arc::new(gateway),
        synthesizer: Arc::clone(&synth) as Arc<dyn SpeechSynthesizer>,
        sink: Arc::new(InstantSink),
        catalog,
        pipeline: PipelineConfig {
            silence_timeout: SILENCE,
            max_history_turns: 2,
        },
    };

    Harness {
        store,
        backend,
        synth,
        deps,
    }
}
