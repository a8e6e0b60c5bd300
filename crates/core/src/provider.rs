//! AI backend traits — text generation, speech-to-text and text-to-speech.
//!
//! The pipeline calls these without knowing which vendor sits behind them.
//! Cancellation is cooperative in the async sense: the pipeline races every
//! call against its shared deadline and drops the future when it fires, so
//! implementations only need to be cancel-safe (no detached side effects).
//!
//! Implementations: OpenAI-compatible chat completions, Qiniu speech.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;

/// A request for one generated reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The model to use (e.g. "deepseek-v3")
    pub model: String,

    /// The composed prompt, system message first
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A complete response from a text generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// The generated reply text
    pub text: String,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A reference to caller audio that the ASR backend fetches itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioRef {
    /// Publicly reachable URL of the uploaded audio
    pub url: String,

    /// Container/codec name, e.g. "mp3", "wav", "ogg"
    pub format: String,
}

impl AudioRef {
    pub fn new(url: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format: format.into(),
        }
    }
}

/// Synthesized speech returned by a TTS backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    /// Encoded audio bytes
    pub bytes: Vec<u8>,

    /// MIME type of `bytes`, e.g. "audio/mpeg"
    pub mime_type: String,
}

/// Generates a reply for a composed prompt.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// A human-readable name for this backend (e.g., "qiniu", "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<GenerationResponse, ProviderError>;

    /// Health check — can we reach the backend?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

/// Transcribes caller audio into text.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    fn name(&self) -> &str;

    async fn transcribe(&self, audio: &AudioRef) -> std::result::Result<String, ProviderError>;
}

/// Synthesizes speech for a reply in a given voice.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
    ) -> std::result::Result<SynthesizedAudio, ProviderError>;
}
