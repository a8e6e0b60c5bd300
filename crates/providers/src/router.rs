//! Service router — builds the AI backends the pipeline needs from config.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use voxchat_config::AppConfig;
use voxchat_core::provider::{SpeechToText, TextGenerator, TextToSpeech};

use crate::openai_compat::OpenAiCompatProvider;
use crate::speech::{DisabledSpeech, QINIU_SPEECH_URL, QiniuSpeech};

/// The three AI operations, ready to hand to the pipeline.
#[derive(Clone)]
pub struct AiServices {
    pub generator: Arc<dyn TextGenerator>,
    pub transcriber: Arc<dyn SpeechToText>,
    pub synthesizer: Arc<dyn TextToSpeech>,
    /// Model sent with every generation request
    pub model: String,
}

impl std::fmt::Debug for AiServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiServices")
            .field("generator", &self.generator.name())
            .field("transcriber", &self.transcriber.name())
            .field("synthesizer", &self.synthesizer.name())
            .field("model", &self.model)
            .finish()
    }
}

/// Build providers from configuration.
///
/// The default provider is always present, even if it has no
/// `[providers.<name>]` table.
pub fn build_from_config(config: &AppConfig) -> AiServices {
    let mut generators: HashMap<String, Arc<dyn TextGenerator>> = HashMap::new();

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();

        let base_url = provider_config
            .api_url
            .clone()
            .unwrap_or_else(|| default_base_url(name));

        generators.insert(
            name.clone(),
            Arc::new(OpenAiCompatProvider::new(name, &base_url, &api_key)),
        );
    }

    let generator = match generators.remove(&config.default_provider) {
        Some(g) => g,
        None => {
            let api_key = config.api_key.clone().unwrap_or_default();
            let base_url = default_base_url(&config.default_provider);
            Arc::new(OpenAiCompatProvider::new(
                &config.default_provider,
                &base_url,
                &api_key,
            ))
        }
    };

    let model = config
        .providers
        .get(&config.default_provider)
        .and_then(|p| p.default_model.clone())
        .unwrap_or_else(|| config.default_model.clone());

    let (transcriber, synthesizer): (Arc<dyn SpeechToText>, Arc<dyn TextToSpeech>) =
        match config.speech.provider.as_str() {
            "none" => {
                let disabled = Arc::new(DisabledSpeech);
                let transcriber: Arc<dyn SpeechToText> = disabled.clone();
                let synthesizer: Arc<dyn TextToSpeech> = disabled;
                (transcriber, synthesizer)
            }
            other => {
                if other != "qiniu" {
                    tracing::warn!(provider = other, "Unknown speech provider, using qiniu");
                }
                let api_key = config
                    .speech
                    .api_key
                    .clone()
                    .or_else(|| config.api_key.clone())
                    .unwrap_or_default();
                let base_url = config
                    .speech
                    .api_url
                    .clone()
                    .unwrap_or_else(|| QINIU_SPEECH_URL.to_string());
                let speech = Arc::new(
                    QiniuSpeech::new(base_url, api_key)
                        .with_encoding(&config.speech.encoding)
                        .with_speed_ratio(config.speech.speed_ratio)
                        .with_timeout(Duration::from_secs(config.speech.timeout_secs)),
                );
                let transcriber: Arc<dyn SpeechToText> = speech.clone();
                let synthesizer: Arc<dyn TextToSpeech> = speech;
                (transcriber, synthesizer)
            }
        };

    AiServices {
        generator,
        transcriber,
        synthesizer,
        model,
    }
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "qiniu" => "https://openai.qiniu.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxchat_config::ProviderConfig;

    #[test]
    fn default_base_urls() {
        assert_eq!(default_base_url("qiniu"), "https://openai.qiniu.com/v1");
        assert!(default_base_url("openai").contains("api.openai.com"));
        assert!(default_base_url("ollama").contains("localhost:11434"));
    }

    #[test]
    fn build_from_default_config() {
        let config = AppConfig::default();
        let services = build_from_config(&config);
        assert_eq!(services.generator.name(), "qiniu");
        assert_eq!(services.transcriber.name(), "qiniu");
        assert_eq!(services.synthesizer.name(), "qiniu");
        assert_eq!(services.model, "deepseek-v3");
    }

    #[test]
    fn provider_table_overrides_model() {
        let mut config = AppConfig::default();
        config.default_provider = "deepseek".into();
        config.providers.insert(
            "deepseek".into(),
            ProviderConfig {
                api_key: Some("sk-ds".into()),
                api_url: None,
                default_model: Some("deepseek-chat".into()),
            },
        );
        let services = build_from_config(&config);
        assert_eq!(services.generator.name(), "deepseek");
        assert_eq!(services.model, "deepseek-chat");
    }

    #[test]
    fn speech_can_be_disabled() {
        let mut config = AppConfig::default();
        config.speech.provider = "none".into();
        let services = build_from_config(&config);
        assert_eq!(services.transcriber.name(), "none");
        assert_eq!(services.synthesizer.name(), "none");
    }
}
