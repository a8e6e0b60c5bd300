//! The pipeline orchestrator — sequences the stages of one request.
//!
//! Stages run strictly in order under one [`Deadline`]. Anything that fails
//! before the reply is generated aborts the request with no partial result.
//!
//! Persisting the turn is best effort: a failed append is logged, published
//! as [`DomainEvent::PersistenceFailed`] and reported as a
//! [`PipelineWarning`], and the reply is still returned. The user already
//! paid for the generation; losing one turn of history is the lesser harm.
//! Synthesis failures follow [`TtsFailurePolicy`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voxchat_config::{AppConfig, ScopeMode, TtsFailurePolicy};
use voxchat_core::character::{Character, CharacterId, CharacterRepository};
use voxchat_core::error::{PipelineError, ProviderError, Stage};
use voxchat_core::event::{DomainEvent, EventBus};
use voxchat_core::history::HistoryStore;
use voxchat_core::provider::{
    AudioRef, GenerationRequest, SpeechToText, SynthesizedAudio, TextGenerator, TextToSpeech,
};
use voxchat_core::scope::ConversationScope;
use voxchat_core::turn::Turn;

use crate::composer::compose;
use crate::deadline::Deadline;
use crate::resolver::IdentityResolver;

/// The collaborators a pipeline borrows. Built once at startup.
#[derive(Clone)]
pub struct PipelineDeps {
    pub characters: Arc<dyn CharacterRepository>,
    pub history: Arc<dyn HistoryStore>,
    pub generator: Arc<dyn TextGenerator>,
    pub transcriber: Arc<dyn SpeechToText>,
    pub synthesizer: Arc<dyn TextToSpeech>,
}

/// Tunables of the pipeline, normally taken from `[pipeline]` config.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub deadline: Duration,
    pub tts_failure: TtsFailurePolicy,
    pub fallback_voice: String,
    pub scope_mode: ScopeMode,
    pub max_input_chars: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.default_model.clone(),
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
            deadline: Duration::from_secs(config.pipeline.deadline_secs),
            tts_failure: config.pipeline.tts_failure,
            fallback_voice: config.pipeline.fallback_voice.clone(),
            scope_mode: config.pipeline.scope_mode,
            max_input_chars: config.pipeline.max_input_chars,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// What the caller said.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineInput {
    Text(String),
    Audio(AudioRef),
}

/// One request to the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub character_id: CharacterId,
    pub input: PipelineInput,
    /// Voice for the reply; overrides the character's default
    pub voice_override: Option<String>,
    pub want_audio: bool,
}

impl PipelineRequest {
    pub fn text(character_id: CharacterId, text: impl Into<String>) -> Self {
        Self {
            character_id,
            input: PipelineInput::Text(text.into()),
            voice_override: None,
            want_audio: false,
        }
    }

    pub fn audio(character_id: CharacterId, audio: AudioRef) -> Self {
        Self {
            character_id,
            input: PipelineInput::Audio(audio),
            voice_override: None,
            want_audio: true,
        }
    }

    pub fn with_voice(mut self, voice: Option<String>) -> Self {
        self.voice_override = voice.filter(|v| !v.trim().is_empty());
        self
    }

    pub fn with_audio_output(mut self, want_audio: bool) -> Self {
        self.want_audio = want_audio;
        self
    }
}

/// A degradation that did not fail the request.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineWarning {
    /// The turn was not stored
    PersistenceFailed(String),
    /// Audio was requested but could not be synthesized
    SynthesisFailed(String),
}

/// The result of a successful run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Set when the input was audio
    pub transcribed_text: Option<String>,
    pub reply: String,
    pub audio: Option<SynthesizedAudio>,
    pub warnings: Vec<PipelineWarning>,
}

/// Pick the TTS voice: explicit override, then the character's default,
/// then the configured fallback.
pub fn resolve_voice<'a>(
    override_voice: Option<&'a str>,
    character: Option<&'a Character>,
    fallback: &'a str,
) -> &'a str {
    override_voice
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| character.and_then(Character::default_voice))
        .unwrap_or(fallback)
}

/// The conversation pipeline.
pub struct Pipeline {
    deps: PipelineDeps,
    settings: PipelineSettings,
    resolver: IdentityResolver,
    events: Arc<EventBus>,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps, settings: PipelineSettings, events: Arc<EventBus>) -> Self {
        let resolver = IdentityResolver::new(settings.scope_mode);
        Self {
            deps,
            settings,
            resolver,
            events,
        }
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn characters(&self) -> &Arc<dyn CharacterRepository> {
        &self.deps.characters
    }

    /// A text turn without audio output.
    pub async fn chat(
        &self,
        character_id: CharacterId,
        text: impl Into<String>,
        scope: &ConversationScope,
        cancel: CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        self.run(PipelineRequest::text(character_id, text), scope, cancel)
            .await
    }

    /// A spoken turn: transcribe, reply, and optionally speak the reply.
    pub async fn voice_chat(
        &self,
        character_id: CharacterId,
        audio: AudioRef,
        voice_id: Option<String>,
        want_audio: bool,
        scope: &ConversationScope,
        cancel: CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        let request = PipelineRequest::audio(character_id, audio)
            .with_voice(voice_id)
            .with_audio_output(want_audio);
        self.run(request, scope, cancel).await
    }

    /// All turns of a scope, oldest first.
    pub async fn history(
        &self,
        scope: &ConversationScope,
        cancel: CancellationToken,
    ) -> Result<Vec<Turn>, PipelineError> {
        let deadline = Deadline::after(self.settings.deadline, cancel);
        self.stage(&deadline, Stage::LoadHistory, async {
            self.deps
                .history
                .list(scope)
                .await
                .map_err(|source| PipelineError::Storage {
                    stage: Stage::LoadHistory,
                    source,
                })
        })
        .await
    }

    /// Standalone speech-to-text.
    pub async fn transcribe(
        &self,
        audio: AudioRef,
        cancel: CancellationToken,
    ) -> Result<String, PipelineError> {
        validate_audio(&audio)?;
        let deadline = Deadline::after(self.settings.deadline, cancel);
        self.transcribe_stage(&deadline, &audio).await
    }

    /// Standalone text-to-speech. Without a voice, the fallback voice is used.
    pub async fn synthesize(
        &self,
        text: &str,
        voice_id: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<SynthesizedAudio, PipelineError> {
        self.validate_text(text)?;
        let voice = resolve_voice(voice_id, None, &self.settings.fallback_voice);
        let deadline = Deadline::after(self.settings.deadline, cancel);
        self.stage(&deadline, Stage::Tts, async {
            self.deps
                .synthesizer
                .synthesize(text, voice)
                .await
                .map_err(|source| PipelineError::Upstream {
                    stage: Stage::Tts,
                    source,
                })
        })
        .await
    }

    /// Run one request through every stage.
    pub async fn run(
        &self,
        request: PipelineRequest,
        scope: &ConversationScope,
        cancel: CancellationToken,
    ) -> Result<PipelineOutcome, PipelineError> {
        self.validate(&request, scope)?;
        let deadline = Deadline::after(self.settings.deadline, cancel);
        let mut warnings = Vec::new();

        info!(
            character_id = %request.character_id,
            scope = %scope,
            audio_in = matches!(request.input, PipelineInput::Audio(_)),
            audio_out = request.want_audio,
            "Pipeline run started"
        );

        // 1. Transcribe
        let (input_text, transcribed_text) = match &request.input {
            PipelineInput::Text(text) => (text.clone(), None),
            PipelineInput::Audio(audio) => {
                let text = self.transcribe_stage(&deadline, audio).await?;
                (text.clone(), Some(text))
            }
        };

        // 2. Load character
        let character = self
            .stage(&deadline, Stage::LoadCharacter, async {
                self.deps
                    .characters
                    .get(&request.character_id)
                    .await
                    .map_err(|source| PipelineError::Storage {
                        stage: Stage::LoadCharacter,
                        source,
                    })?
                    .ok_or_else(|| PipelineError::NotFound {
                        what: "character",
                        id: request.character_id.to_string(),
                    })
            })
            .await?;

        // 3. Load history
        let history = self
            .stage(&deadline, Stage::LoadHistory, async {
                self.deps
                    .history
                    .list(scope)
                    .await
                    .map_err(|source| PipelineError::Storage {
                        stage: Stage::LoadHistory,
                        source,
                    })
            })
            .await?;

        // 4. Compose
        let messages = compose(&character.system_prompt, &history, &input_text);
        debug!(
            history_turns = history.len(),
            messages = messages.len(),
            "Prompt composed"
        );

        // 5. Generate
        let generation = GenerationRequest {
            model: self.settings.model.clone(),
            messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        let response = self
            .stage(&deadline, Stage::Generate, async {
                self.deps
                    .generator
                    .generate(generation)
                    .await
                    .map_err(|source| PipelineError::Upstream {
                        stage: Stage::Generate,
                        source,
                    })
            })
            .await?;
        let reply = response.text;

        // 6. Persist (best effort)
        let turn = Turn::new(scope.clone(), &input_text, &reply);
        match deadline
            .run(Stage::Persist, self.deps.history.append(turn))
            .await?
        {
            Ok(()) => {
                debug!(scope = %scope, "Turn persisted");
                self.events.publish(DomainEvent::TurnPersisted {
                    scope: scope.to_string(),
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                warn!(scope = %scope, error = %e, "Failed to persist turn; returning reply anyway");
                self.events.publish(DomainEvent::PersistenceFailed {
                    scope: scope.to_string(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                warnings.push(PipelineWarning::PersistenceFailed(e.to_string()));
            }
        }

        // 7. Synthesize
        let audio = if request.want_audio {
            let voice = resolve_voice(
                request.voice_override.as_deref(),
                Some(&character),
                &self.settings.fallback_voice,
            );
            let synthesized = self
                .stage(&deadline, Stage::Tts, async {
                    self.deps
                        .synthesizer
                        .synthesize(&reply, voice)
                        .await
                        .map_err(|source| PipelineError::Upstream {
                            stage: Stage::Tts,
                            source,
                        })
                })
                .await;

            match (synthesized, self.settings.tts_failure) {
                (Ok(audio), _) => Some(audio),
                (Err(PipelineError::Upstream { source, .. }), TtsFailurePolicy::TextOnly) => {
                    warn!(error = %source, voice, "Synthesis failed; returning text only");
                    self.events.publish(DomainEvent::SynthesisDegraded {
                        error: source.to_string(),
                        timestamp: Utc::now(),
                    });
                    warnings.push(PipelineWarning::SynthesisFailed(source.to_string()));
                    None
                }
                (Err(e), _) => return Err(e),
            }
        } else {
            None
        };

        info!(
            character_id = %request.character_id,
            reply_chars = reply.chars().count(),
            warnings = warnings.len(),
            "Pipeline run finished"
        );

        Ok(PipelineOutcome {
            transcribed_text,
            reply,
            audio,
            warnings,
        })
    }

    async fn transcribe_stage(
        &self,
        deadline: &Deadline,
        audio: &AudioRef,
    ) -> Result<String, PipelineError> {
        self.stage(deadline, Stage::Asr, async {
            let text = self
                .deps
                .transcriber
                .transcribe(audio)
                .await
                .map_err(|source| PipelineError::Upstream {
                    stage: Stage::Asr,
                    source,
                })?;
            if text.trim().is_empty() {
                return Err(PipelineError::Upstream {
                    stage: Stage::Asr,
                    source: ProviderError::EmptyResponse("transcription is empty".into()),
                });
            }
            Ok(text)
        })
        .await
    }

    /// Run one stage under the deadline, with timing and events.
    async fn stage<T, F>(&self, deadline: &Deadline, stage: Stage, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, PipelineError>>,
    {
        let started = Instant::now();
        let result = deadline.run(stage, fut).await.and_then(|inner| inner);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => {
                debug!(stage = %stage, elapsed_ms, "Stage completed");
                self.events.publish(DomainEvent::StageCompleted {
                    stage,
                    elapsed_ms,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                warn!(stage = %stage, elapsed_ms, error = %e, "Stage failed");
                self.events.publish(DomainEvent::StageFailed {
                    stage,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
        result
    }

    fn validate(
        &self,
        request: &PipelineRequest,
        scope: &ConversationScope,
    ) -> Result<(), PipelineError> {
        if request.character_id.as_str().trim().is_empty() {
            return Err(PipelineError::Validation("character_id is required".into()));
        }
        if scope.character_id() != &request.character_id {
            return Err(PipelineError::Validation(
                "scope belongs to a different character".into(),
            ));
        }
        match &request.input {
            PipelineInput::Text(text) => self.validate_text(text),
            PipelineInput::Audio(audio) => validate_audio(audio),
        }
    }

    fn validate_text(&self, text: &str) -> Result<(), PipelineError> {
        if text.trim().is_empty() {
            return Err(PipelineError::Validation("message is empty".into()));
        }
        let chars = text.chars().count();
        if chars > self.settings.max_input_chars {
            return Err(PipelineError::Validation(format!(
                "message is {chars} characters; the limit is {}",
                self.settings.max_input_chars
            )));
        }
        Ok(())
    }
}

fn validate_audio(audio: &AudioRef) -> Result<(), PipelineError> {
    if audio.url.trim().is_empty() {
        return Err(PipelineError::Validation("audio_url is required".into()));
    }
    if audio.format.trim().is_empty() {
        return Err(PipelineError::Validation("audio_format is required".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use voxchat_core::identity::UserId;
    use voxchat_core::message::Role;
    use voxchat_core::scope::SessionToken;

    fn user_scope() -> ConversationScope {
        ConversationScope::authenticated(UserId::from("7"), CharacterId::from(SOCRATES_ID))
    }

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[test]
    fn voice_resolution_branches() {
        let with_voice = socrates().with_default_voice("char_voice");
        let without_voice = socrates();

        assert_eq!(
            resolve_voice(Some("override"), Some(&with_voice), "fallback"),
            "override"
        );
        assert_eq!(resolve_voice(None, Some(&with_voice), "fallback"), "char_voice");
        assert_eq!(resolve_voice(None, Some(&without_voice), "fallback"), "fallback");
        assert_eq!(resolve_voice(Some("  "), None, "fallback"), "fallback");
    }

    #[tokio::test]
    async fn text_chat_composes_history_and_persists() {
        let h = Harness::new().generator(ScriptedGenerator::replying(["Hello there", "I am well"]));
        let pipeline = h.pipeline();

        let first = pipeline
            .chat(CharacterId::from(SOCRATES_ID), "Hi", &user_scope(), cancel())
            .await
            .unwrap();
        assert_eq!(first.reply, "Hello there");
        assert!(first.transcribed_text.is_none());
        assert!(first.audio.is_none());
        assert!(first.warnings.is_empty());

        pipeline
            .chat(CharacterId::from(SOCRATES_ID), "How are you?", &user_scope(), cancel())
            .await
            .unwrap();

        let requests = h.generator.requests();
        let second: Vec<(Role, &str)> = requests[1]
            .messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            second,
            vec![
                (Role::System, SOCRATES_PROMPT),
                (Role::User, "Hi"),
                (Role::Assistant, "Hello there"),
                (Role::User, "How are you?"),
            ]
        );

        let history = pipeline.history(&user_scope(), cancel()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].ai_message, "I am well");
    }

    #[tokio::test]
    async fn anonymous_session_history_grows() {
        let h = Harness::new().generator(ScriptedGenerator::replying(["one", "two"]));
        let pipeline = h.pipeline();

        let resolved = pipeline
            .resolver()
            .resolve(
                &voxchat_core::identity::RequestIdentity::Anonymous,
                None,
                CharacterId::from(SOCRATES_ID),
            )
            .unwrap();
        let token = resolved.response_token.clone().unwrap();
        assert!(!token.as_str().is_empty());

        pipeline
            .chat(CharacterId::from(SOCRATES_ID), "first", &resolved.scope, cancel())
            .await
            .unwrap();

        let again = ConversationScope::anonymous(
            SessionToken::from_supplied(token.as_str()),
            CharacterId::from(SOCRATES_ID),
        );
        pipeline
            .chat(CharacterId::from(SOCRATES_ID), "second", &again, cancel())
            .await
            .unwrap();

        assert_eq!(pipeline.history(&again, cancel()).await.unwrap().len(), 2);
        assert_eq!(h.generator.requests()[1].messages.len(), 4);
    }

    #[tokio::test]
    async fn persistence_failure_is_a_warning() {
        let h = Harness::new()
            .generator(ScriptedGenerator::replying(["still here"]))
            .failing_appends();
        let pipeline = h.pipeline();
        let mut events = pipeline.events().subscribe();

        let outcome = pipeline
            .chat(CharacterId::from(SOCRATES_ID), "Hello", &user_scope(), cancel())
            .await
            .unwrap();

        assert_eq!(outcome.reply, "still here");
        assert!(matches!(
            outcome.warnings.as_slice(),
            [PipelineWarning::PersistenceFailed(_)]
        ));

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event.as_ref(), DomainEvent::PersistenceFailed { .. }) {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn unknown_character_is_not_found_without_generation() {
        let h = Harness::new();
        let pipeline = h.pipeline();
        let scope = ConversationScope::authenticated(UserId::from("7"), CharacterId::from("404"));

        let err = pipeline
            .chat(CharacterId::from("404"), "Hello", &scope, cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { what: "character", .. }));
        assert_eq!(h.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn generation_failure_stops_the_run() {
        let h = Harness::new().generator(ScriptedGenerator::new(vec![Err(
            ProviderError::Network("reset".into()),
        )]));
        let pipeline = h.pipeline();

        let err = pipeline
            .voice_chat(
                CharacterId::from(SOCRATES_ID),
                sample_audio(),
                None,
                true,
                &user_scope(),
                cancel(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Upstream {
                stage: Stage::Generate,
                ..
            }
        ));
        assert!(pipeline.history(&user_scope(), cancel()).await.unwrap().is_empty());
        assert_eq!(h.synthesizer.call_count(), 0);
    }

    #[tokio::test]
    async fn voice_chat_transcribes_and_synthesizes() {
        let h = Harness::new()
            .generator(ScriptedGenerator::replying(["Know thyself."]))
            .transcriber(ScriptedTranscriber::ok("What is wisdom?"));
        let pipeline = h.pipeline();

        let outcome = pipeline
            .voice_chat(
                CharacterId::from(SOCRATES_ID),
                sample_audio(),
                Some("voice_x".into()),
                true,
                &user_scope(),
                cancel(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.transcribed_text.as_deref(), Some("What is wisdom?"));
        assert_eq!(outcome.reply, "Know thyself.");
        assert_eq!(outcome.audio.unwrap().bytes, SAMPLE_AUDIO.to_vec());
        assert_eq!(h.synthesizer.voices(), vec!["voice_x".to_string()]);

        let history = pipeline.history(&user_scope(), cancel()).await.unwrap();
        assert_eq!(history[0].user_message, "What is wisdom?");
    }

    #[tokio::test]
    async fn voice_falls_back_to_configured_voice() {
        let h = Harness::new().generator(ScriptedGenerator::replying(["ok"]));
        let pipeline = h.pipeline();

        pipeline
            .voice_chat(
                CharacterId::from(SOCRATES_ID),
                sample_audio(),
                None,
                true,
                &user_scope(),
                cancel(),
            )
            .await
            .unwrap();
        assert_eq!(
            h.synthesizer.voices(),
            vec![PipelineSettings::default().fallback_voice]
        );
    }

    #[tokio::test]
    async fn asr_failure_skips_generation() {
        let h = Harness::new().transcriber(ScriptedTranscriber::failing(
            ProviderError::ApiError {
                status_code: 500,
                message: "boom".into(),
            },
        ));
        let pipeline = h.pipeline();

        let err = pipeline
            .voice_chat(
                CharacterId::from(SOCRATES_ID),
                sample_audio(),
                None,
                false,
                &user_scope(),
                cancel(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Asr));
        assert_eq!(h.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_transcription_is_upstream_asr() {
        let h = Harness::new().transcriber(ScriptedTranscriber::ok("   "));
        let pipeline = h.pipeline();

        let err = pipeline
            .voice_chat(
                CharacterId::from(SOCRATES_ID),
                sample_audio(),
                None,
                false,
                &user_scope(),
                cancel(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Upstream {
                stage: Stage::Asr,
                source: ProviderError::EmptyResponse(_)
            }
        ));
    }

    #[tokio::test]
    async fn tts_failure_policy_fail() {
        let h = Harness::new()
            .generator(ScriptedGenerator::replying(["reply"]))
            .synthesizer(ScriptedSynthesizer::failing(ProviderError::Network("down".into())));
        let pipeline = h.pipeline();

        let err = pipeline
            .voice_chat(
                CharacterId::from(SOCRATES_ID),
                sample_audio(),
                None,
                true,
                &user_scope(),
                cancel(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Tts));
        // The turn was already committed before synthesis.
        assert_eq!(pipeline.history(&user_scope(), cancel()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tts_failure_policy_text_only() {
        let h = Harness::new()
            .generator(ScriptedGenerator::replying(["reply"]))
            .synthesizer(ScriptedSynthesizer::failing(ProviderError::Network("down".into())))
            .settings(|s| s.tts_failure = TtsFailurePolicy::TextOnly);
        let pipeline = h.pipeline();

        let outcome = pipeline
            .voice_chat(
                CharacterId::from(SOCRATES_ID),
                sample_audio(),
                None,
                true,
                &user_scope(),
                cancel(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.reply, "reply");
        assert!(outcome.audio.is_none());
        assert!(matches!(
            outcome.warnings.as_slice(),
            [PipelineWarning::SynthesisFailed(_)]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_during_generate_skips_persist_and_tts() {
        let h = Harness::new()
            .generator(
                ScriptedGenerator::replying(["too late"]).with_delay(Duration::from_secs(120)),
            )
            .settings(|s| s.deadline = Duration::from_secs(60));
        let pipeline = h.pipeline();

        let err = pipeline
            .voice_chat(
                CharacterId::from(SOCRATES_ID),
                sample_audio(),
                None,
                true,
                &user_scope(),
                cancel(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Timeout {
                stage: Stage::Generate
            }
        ));
        assert!(pipeline.history(&user_scope(), cancel()).await.unwrap().is_empty());
        assert_eq!(h.synthesizer.call_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_token_times_out_before_any_stage() {
        let h = Harness::new();
        let pipeline = h.pipeline();
        let token = CancellationToken::new();
        token.cancel();

        let err = pipeline
            .chat(CharacterId::from(SOCRATES_ID), "Hello", &user_scope(), token)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Timeout {
                stage: Stage::LoadCharacter
            }
        ));
        assert_eq!(h.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn input_validation() {
        let h = Harness::new().settings(|s| s.max_input_chars = 5);
        let pipeline = h.pipeline();

        for text in ["", "   ", "too long text"] {
            let err = pipeline
                .chat(CharacterId::from(SOCRATES_ID), text, &user_scope(), cancel())
                .await
                .unwrap_err();
            assert!(matches!(err, PipelineError::Validation(_)), "{text:?}");
        }

        let err = pipeline
            .voice_chat(
                CharacterId::from(SOCRATES_ID),
                AudioRef::new("", "mp3"),
                None,
                false,
                &user_scope(),
                cancel(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        let mismatched =
            ConversationScope::authenticated(UserId::from("7"), CharacterId::from("other"));
        let err = pipeline
            .chat(CharacterId::from(SOCRATES_ID), "Hi", &mismatched, cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert_eq!(h.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn standalone_transcribe_and_synthesize() {
        let h = Harness::new().transcriber(ScriptedTranscriber::ok("hello"));
        let pipeline = h.pipeline();

        assert_eq!(pipeline.transcribe(sample_audio(), cancel()).await.unwrap(), "hello");

        let audio = pipeline.synthesize("Hello", None, cancel()).await.unwrap();
        assert_eq!(audio.mime_type, "audio/mpeg");
        assert_eq!(
            h.synthesizer.voices(),
            vec![PipelineSettings::default().fallback_voice]
        );

        assert!(matches!(
            pipeline.synthesize(" ", Some("v"), cancel()).await,
            Err(PipelineError::Validation(_))
        ));
    }
}
