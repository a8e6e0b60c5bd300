//! Qiniu voice API: ASR and TTS over HTTP.
//!
//! ASR takes a public audio URL rather than uploaded bytes; the caller is
//! expected to have put the audio in object storage first.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;
use voxchat_core::error::ProviderError;
use voxchat_core::provider::{AudioRef, SpeechToText, SynthesizedAudio, TextToSpeech};

use crate::openai_compat::{check_status, transport_error};

pub const QINIU_SPEECH_URL: &str = "https://openai.qiniu.com/v1";

/// Speech backend for Qiniu's `/voice/asr` and `/voice/tts` endpoints.
pub struct QiniuSpeech {
    base_url: String,
    api_key: String,
    encoding: String,
    speed_ratio: f32,
    client: reqwest::Client,
}

impl QiniuSpeech {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            encoding: "mp3".into(),
            speed_ratio: 1.0,
            client: http_client(Duration::from_secs(30)),
        }
    }

    /// Set the TTS output encoding (mp3, wav, ...).
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    pub fn with_speed_ratio(mut self, speed_ratio: f32) -> Self {
        self.speed_ratio = speed_ratio;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    fn mime_type(&self) -> String {
        match self.encoding.as_str() {
            "mp3" => "audio/mpeg".into(),
            "wav" => "audio/wav".into(),
            "ogg" | "opus" => "audio/ogg".into(),
            "pcm" => "audio/pcm".into(),
            other => format!("audio/{other}"),
        }
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

#[async_trait]
impl SpeechToText for QiniuSpeech {
    fn name(&self) -> &str {
        "qiniu"
    }

    async fn transcribe(&self, audio: &AudioRef) -> std::result::Result<String, ProviderError> {
        let url = format!("{}/voice/asr", self.base_url);
        let body = AsrRequest {
            model: "asr",
            audio: AsrAudio {
                format: &audio.format,
                url: &audio.url,
            },
        };

        debug!(format = %audio.format, "Sending ASR request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response).await?;

        let parsed: AsrResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to decode ASR response: {e}"),
        })?;

        let text = parsed.data.result.text;
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse("ASR result text is empty".into()));
        }
        Ok(text)
    }
}

#[async_trait]
impl TextToSpeech for QiniuSpeech {
    fn name(&self) -> &str {
        "qiniu"
    }

    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
    ) -> std::result::Result<SynthesizedAudio, ProviderError> {
        let url = format!("{}/voice/tts", self.base_url);
        let body = TtsRequest {
            audio: TtsAudio {
                voice_type: voice_id,
                encoding: &self.encoding,
                speed_ratio: self.speed_ratio,
            },
            request: TtsText { text },
        };

        debug!(voice = %voice_id, chars = text.chars().count(), "Sending TTS request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response).await?;

        let parsed: TtsResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to decode TTS response: {e}"),
        })?;

        let encoded = parsed
            .data
            .filter(|d| !d.is_empty())
            .ok_or_else(|| ProviderError::EmptyResponse("TTS returned no audio".into()))?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("TTS audio is not valid base64: {e}"),
            })?;

        Ok(SynthesizedAudio {
            bytes,
            mime_type: self.mime_type(),
        })
    }
}

/// Stand-in used when `speech.provider = "none"`; every call fails.
pub struct DisabledSpeech;

#[async_trait]
impl SpeechToText for DisabledSpeech {
    fn name(&self) -> &str {
        "none"
    }

    async fn transcribe(&self, _audio: &AudioRef) -> std::result::Result<String, ProviderError> {
        Err(ProviderError::NotConfigured("speech recognition is disabled".into()))
    }
}

#[async_trait]
impl TextToSpeech for DisabledSpeech {
    fn name(&self) -> &str {
        "none"
    }

    async fn synthesize(
        &self,
        _text: &str,
        _voice_id: &str,
    ) -> std::result::Result<SynthesizedAudio, ProviderError> {
        Err(ProviderError::NotConfigured("speech synthesis is disabled".into()))
    }
}

// --- Qiniu voice API types (internal) ---

#[derive(Debug, Serialize)]
struct AsrRequest<'a> {
    model: &'a str,
    audio: AsrAudio<'a>,
}

#[derive(Debug, Serialize)]
struct AsrAudio<'a> {
    format: &'a str,
    url: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct AsrResponse {
    #[serde(default)]
    data: AsrData,
}

#[derive(Debug, Default, Deserialize)]
struct AsrData {
    #[serde(default)]
    result: AsrResult,
}

#[derive(Debug, Default, Deserialize)]
struct AsrResult {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    audio: TtsAudio<'a>,
    request: TtsText<'a>,
}

#[derive(Debug, Serialize)]
struct TtsAudio<'a> {
    voice_type: &'a str,
    encoding: &'a str,
    speed_ratio: f32,
}

#[derive(Debug, Serialize)]
struct TtsText<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct TtsResponse {
    #[serde(default)]
    data: Option<String>,
}
