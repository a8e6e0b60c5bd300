//! Response assembly — the JSON shapes handed back to clients.
//!
//! Every chat response has the same keys whether or not audio was produced;
//! absent values serialize as `null`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use voxchat_core::provider::SynthesizedAudio;
use voxchat_core::scope::SessionToken;
use voxchat_core::turn::Turn;

use crate::orchestrator::PipelineOutcome;

/// Synthesized speech, base64-encoded (standard alphabet, padded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPayload {
    pub mime_type: String,
    pub base64: String,
}

impl From<&SynthesizedAudio> for AudioPayload {
    fn from(audio: &SynthesizedAudio) -> Self {
        Self {
            mime_type: audio.mime_type.clone(),
            base64: STANDARD.encode(&audio.bytes),
        }
    }
}

/// The body of every chat and voice-chat response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Session token of an anonymous scope; `null` for verified users
    pub scope_token: Option<String>,
    pub transcribed_text: Option<String>,
    pub reply: String,
    pub audio: Option<AudioPayload>,
}

impl ChatResponse {
    pub fn assemble(outcome: &PipelineOutcome, response_token: Option<&SessionToken>) -> Self {
        Self {
            scope_token: response_token.map(|t| t.as_str().to_string()),
            transcribed_text: outcome.transcribed_text.clone(),
            reply: outcome.reply.clone(),
            audio: outcome.audio.as_ref().map(AudioPayload::from),
        }
    }
}

/// One turn as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub user_message: String,
    pub ai_message: String,
    /// Unix seconds
    pub timestamp: i64,
}

impl From<&Turn> for HistoryItem {
    fn from(turn: &Turn) -> Self {
        Self {
            user_message: turn.user_message.clone(),
            ai_message: turn.ai_message.clone(),
            timestamp: turn.created_at.timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub history: Vec<HistoryItem>,
}

impl HistoryResponse {
    pub fn from_turns(turns: &[Turn]) -> Self {
        Self {
            history: turns.iter().map(HistoryItem::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResponse {
    pub transcribed_text: String,
}
