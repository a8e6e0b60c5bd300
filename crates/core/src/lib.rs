//! # VoxChat Core
//!
//! Domain types, collaborator traits, and error definitions for the VoxChat
//! conversation pipeline. This crate has **no framework dependencies**: it
//! defines the model that the storage, provider, pipeline and gateway crates
//! implement against.
//!
//! ## Layout
//!
//! Every external collaborator of the pipeline is a trait here:
//! - [`TextGenerator`], [`SpeechToText`], [`TextToSpeech`] for the AI backends
//! - [`CharacterRepository`] and [`HistoryStore`] for persistence
//! - [`AuthProvider`] for credential verification
//!
//! Implementations live in their own crates, which keeps the pipeline
//! testable with scripted stand-ins.

pub mod character;
pub mod error;
pub mod event;
pub mod history;
pub mod identity;
pub mod message;
pub mod provider;
pub mod scope;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use character::{Character, CharacterId, CharacterPage, CharacterQuery, CharacterRepository};
pub use error::{PipelineError, ProviderError, Stage, StoreError};
pub use event::{DomainEvent, EventBus};
pub use history::HistoryStore;
pub use identity::{AuthProvider, RequestIdentity, UserId};
pub use message::{Message, Role};
pub use provider::{
    AudioRef, GenerationRequest, GenerationResponse, SpeechToText, SynthesizedAudio,
    TextGenerator, TextToSpeech, Usage,
};
pub use scope::{ConversationScope, ScopeKey, ScopeKind, SessionToken};
pub use turn::Turn;
