//! `voxchat status` — Show configuration status.

use std::path::Path;

use voxchat_config::{AppConfig, StorageBackend};

pub async fn run(explicit: Option<&Path>, check: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = super::config_path(explicit);
    let config: AppConfig = super::load_config(explicit)?;

    println!("VoxChat Status");
    println!("==============");
    println!("  Config file:  {}", config_path.display());
    println!("  Provider:     {}", config.default_provider);
    println!("  Model:        {}", config.default_model);
    println!("  Temperature:  {}", config.default_temperature);
    println!("  API key:      {}", if config.has_api_key() { "set" } else { "missing" });
    println!("  Speech:       {}", config.speech.provider);
    println!("  Deadline:     {}s", config.pipeline.deadline_secs);
    println!("  TTS failure:  {:?}", config.pipeline.tts_failure);
    println!("  Scope mode:   {:?}", config.pipeline.scope_mode);
    match config.storage.backend {
        StorageBackend::Sqlite => {
            println!("  Storage:      sqlite ({})", config.storage.database_path().display())
        }
        StorageBackend::Memory => println!("  Storage:      memory"),
    }
    println!("  Gateway:      {}:{}", config.gateway.host, config.gateway.port);
    println!("  Characters:   {} seeded from config", config.characters.len());

    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file — run `voxchat onboard` first");
    }

    if check {
        let services = voxchat_providers::build_from_config(&config);
        let generator = services.generator.name().to_string();
        match services.generator.health_check().await {
            Ok(true) => println!("  ✅ LLM backend `{generator}` reachable"),
            Ok(false) => println!("  ❌ LLM backend `{generator}` answered with an error"),
            Err(e) => println!("  ❌ LLM backend `{generator}` unreachable: {e}"),
        }
    }

    Ok(())
}
