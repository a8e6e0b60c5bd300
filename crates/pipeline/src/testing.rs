//! Scripted collaborators for pipeline tests.
//!
//! Enabled for this crate's own tests and, through the `testing` feature,
//! for downstream crates' tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use voxchat_config::AppConfig;
use voxchat_core::character::Character;
use voxchat_core::error::{ProviderError, StoreError};
use voxchat_core::event::EventBus;
use voxchat_core::history::HistoryStore;
use voxchat_core::provider::{
    AudioRef, GenerationRequest, GenerationResponse, SpeechToText, SynthesizedAudio,
    TextGenerator, TextToSpeech, Usage,
};
use voxchat_core::scope::ConversationScope;
use voxchat_core::turn::Turn;
use voxchat_store::InMemoryStore;

use crate::orchestrator::{Pipeline, PipelineDeps, PipelineSettings};

pub const SOCRATES_ID: &str = "2";
pub const SOCRATES_PROMPT: &str = "You are Socrates. Answer with a question.";
/// "ID3" followed by padding, enough to look like an MP3 header.
pub const SAMPLE_AUDIO: &[u8] = b"ID3\x04\x00\x00\x00\x00\x00\x00";

pub fn socrates() -> Character {
    Character::new(SOCRATES_ID, "Socrates", SOCRATES_PROMPT)
        .with_description("Ancient Greek philosopher")
}

pub fn sample_audio() -> AudioRef {
    AudioRef::new("https://cdn.example.com/question.mp3", "mp3")
}

/// A text generator that returns a scripted sequence of results.
///
/// Once the script is exhausted every call fails with `EmptyResponse`.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Succeed with each reply in turn.
    pub fn replying<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(replies.into_iter().map(|r| Ok(r.into())).collect())
    }

    /// Sleep before answering (use with a paused clock).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::EmptyResponse("script exhausted".into())));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        next.map(|text| GenerationResponse {
            text,
            model,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
        })
    }
}

/// A transcriber that always returns the same result.
pub struct ScriptedTranscriber {
    result: Result<String, ProviderError>,
    calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            result: Ok(text.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            result: Err(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechToText for ScriptedTranscriber {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn transcribe(&self, _audio: &AudioRef) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// A synthesizer that records the voices it was asked for.
pub struct ScriptedSynthesizer {
    result: Result<SynthesizedAudio, ProviderError>,
    voices: Mutex<Vec<String>>,
}

impl ScriptedSynthesizer {
    pub fn ok() -> Self {
        Self {
            result: Ok(SynthesizedAudio {
                bytes: SAMPLE_AUDIO.to_vec(),
                mime_type: "audio/mpeg".into(),
            }),
            voices: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            result: Err(error),
            voices: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.voices.lock().unwrap().len()
    }

    pub fn voices(&self) -> Vec<String> {
        self.voices.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextToSpeech for ScriptedSynthesizer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn synthesize(
        &self,
        _text: &str,
        voice_id: &str,
    ) -> Result<SynthesizedAudio, ProviderError> {
        self.voices.lock().unwrap().push(voice_id.to_string());
        self.result.clone()
    }
}

/// In-memory history whose appends can be switched to fail.
pub struct FlakyHistory {
    inner: InMemoryStore,
    fail_appends: AtomicBool,
}

impl FlakyHistory {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            fail_appends: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_appends.store(failing, Ordering::SeqCst);
    }
}

impl Default for FlakyHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for FlakyHistory {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn list(&self, scope: &ConversationScope) -> Result<Vec<Turn>, StoreError> {
        HistoryStore::list(&self.inner, scope).await
    }

    async fn append(&self, turn: Turn) -> Result<(), StoreError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("disk full".into()));
        }
        self.inner.append(turn).await
    }
}

/// Wires scripted collaborators into a [`Pipeline`].
///
/// Defaults: Socrates as the only character, a generator with an empty
/// script, a transcriber answering "Hello", a working synthesizer.
pub struct Harness {
    pub characters: Arc<InMemoryStore>,
    pub history: Arc<FlakyHistory>,
    pub generator: Arc<ScriptedGenerator>,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub synthesizer: Arc<ScriptedSynthesizer>,
    pub settings: PipelineSettings,
    pub events: Arc<EventBus>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            characters: Arc::new(InMemoryStore::with_characters([socrates()])),
            history: Arc::new(FlakyHistory::new()),
            generator: Arc::new(ScriptedGenerator::new(Vec::new())),
            transcriber: Arc::new(ScriptedTranscriber::ok("Hello")),
            synthesizer: Arc::new(ScriptedSynthesizer::ok()),
            settings: PipelineSettings::from_config(&AppConfig::default()),
            events: Arc::new(EventBus::default()),
        }
    }

    pub fn generator(mut self, generator: ScriptedGenerator) -> Self {
        self.generator = Arc::new(generator);
        self
    }

    pub fn transcriber(mut self, transcriber: ScriptedTranscriber) -> Self {
        self.transcriber = Arc::new(transcriber);
        self
    }

    pub fn synthesizer(mut self, synthesizer: ScriptedSynthesizer) -> Self {
        self.synthesizer = Arc::new(synthesizer);
        self
    }

    pub fn failing_appends(self) -> Self {
        self.history.set_failing(true);
        self
    }

    pub fn settings(mut self, edit: impl FnOnce(&mut PipelineSettings)) -> Self {
        edit(&mut self.settings);
        self
    }

    pub fn deps(&self) -> PipelineDeps {
        PipelineDeps {
            characters: self.characters.clone(),
            history: self.history.clone(),
            generator: self.generator.clone(),
            transcriber: self.transcriber.clone(),
            synthesizer: self.synthesizer.clone(),
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.deps(), self.settings.clone(), self.events.clone())
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
