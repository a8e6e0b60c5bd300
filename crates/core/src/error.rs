//! Error types for the VoxChat domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`PipelineError`] is the
//! taxonomy callers of the conversation pipeline see.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider returned an empty result: {0}")]
    EmptyResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// A named stage of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Speech-to-text transcription of the caller's audio
    Asr,
    /// Character lookup
    LoadCharacter,
    /// History load for the resolved scope
    LoadHistory,
    /// Text generation
    Generate,
    /// Best-effort turn persistence
    Persist,
    /// Text-to-speech synthesis of the reply
    Tts,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Asr => "asr",
            Stage::LoadCharacter => "load_character",
            Stage::LoadHistory => "load_history",
            Stage::Generate => "generate",
            Stage::Persist => "persist",
            Stage::Tts => "tts",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced to callers of the conversation pipeline.
///
/// Everything before the generate stage completes aborts the request with
/// no partial payload. A failed turn append is *not* an error here; it is
/// reported as a warning on the pipeline outcome.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("Upstream {stage} failed: {source}")]
    Upstream {
        stage: Stage,
        #[source]
        source: ProviderError,
    },

    #[error("Deadline exceeded during {stage}")]
    Timeout { stage: Stage },

    #[error("Storage failure during {stage}: {source}")]
    Storage {
        stage: Stage,
        #[source]
        source: StoreError,
    },
}

impl PipelineError {
    /// The stage this error is tagged with, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Upstream { stage, .. }
            | PipelineError::Timeout { stage }
            | PipelineError::Storage { stage, .. } => Some(*stage),
            PipelineError::Validation(_)
            | PipelineError::AuthenticationRequired
            | PipelineError::NotFound { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        };
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn upstream_error_is_stage_tagged() {
        let err = PipelineError::Upstream {
            stage: Stage::Asr,
            source: ProviderError::Network("connection reset".into()),
        };
        assert_eq!(err.stage(), Some(Stage::Asr));
        assert!(err.to_string().contains("asr"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn not_found_names_the_entity() {
        let err = PipelineError::NotFound {
            what: "character",
            id: "42".into(),
        };
        assert_eq!(err.to_string(), "character not found: 42");
        assert_eq!(err.stage(), None);
    }

    #[test]
    fn stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::LoadHistory).unwrap();
        assert_eq!(json, "\"load_history\"");
    }
}
