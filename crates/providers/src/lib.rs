//! AI backend implementations for VoxChat.
//!
//! Text generation goes through any OpenAI-compatible chat completions
//! endpoint; speech goes through the Qiniu voice API. The router builds the
//! bundle of services the pipeline needs from configuration.

pub mod openai_compat;
pub mod router;
pub mod speech;

#[cfg(test)]
pub(crate) mod test_server;

pub use openai_compat::OpenAiCompatProvider;
pub use router::{AiServices, build_from_config};
pub use speech::{DisabledSpeech, QiniuSpeech};
