//! The VoxChat conversation pipeline.
//!
//! One request flows through:
//!
//! 1. **Resolve** the conversation scope (verified user or session token)
//! 2. **Transcribe** caller audio, when the input is audio
//! 3. **Load** the character and the scope's history
//! 4. **Compose** the prompt: persona, replayed turns, new input
//! 5. **Generate** the reply
//! 6. **Persist** the turn (best effort)
//! 7. **Synthesize** the reply, when audio output is wanted
//!
//! Stages 2 to 7 share one deadline. The [`assembler`] turns the outcome into
//! the JSON shape returned to clients.

pub mod assembler;
pub mod composer;
pub mod deadline;
pub mod orchestrator;
pub mod resolver;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use assembler::{AudioPayload, ChatResponse, HistoryItem, HistoryResponse, TranscriptionResponse};
pub use composer::compose;
pub use deadline::Deadline;
pub use orchestrator::{
    Pipeline, PipelineDeps, PipelineInput, PipelineOutcome, PipelineRequest, PipelineSettings,
    PipelineWarning, resolve_voice,
};
pub use resolver::{IdentityResolver, ResolvedScope};
pub use tokio_util::sync::CancellationToken;
